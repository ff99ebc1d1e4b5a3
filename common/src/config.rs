//! Configuration types for output and logging settings

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Only report errors
    pub quiet: bool,
    /// Verbosity level: 0=INFO, 1=DEBUG, 2+=TRACE
    pub verbose: u8,
    /// Print summary at the end
    pub print_summary: bool,
}

impl OutputConfig {
    /// Default log directive derived from the quiet/verbose flags
    ///
    /// `RUST_LOG` takes precedence over this when set.
    pub fn log_directive(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
