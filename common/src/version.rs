//! Build identification
//!
//! Logged at startup and stored next to published test results, so a failed run can be traced
//! back to the exact orchestrator build that produced it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildInfo {
    /// Crate version (e.g. "0.4.0")
    pub semantic: String,
    /// `git describe` of the checkout the tool was built from (e.g. "v0.3.2-7-g644da27")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_describe: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_hash: Option<String>,
}

impl BuildInfo {
    /// Values captured by build.rs when this crate was compiled
    pub fn current() -> Self {
        Self {
            semantic: env!("CARGO_PKG_VERSION").to_string(),
            git_describe: option_env!("CORRUPTION_GIT_DESCRIBE").map(str::to_string),
            git_hash: option_env!("CORRUPTION_GIT_HASH").map(str::to_string),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl std::fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.semantic)?;
        match (&self.git_describe, &self.git_hash) {
            (Some(describe), _) => write!(f, " ({describe})"),
            (None, Some(hash)) => write!(f, " ({})", &hash[..hash.len().min(12)]),
            (None, None) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(describe: Option<&str>, hash: Option<&str>) -> BuildInfo {
        BuildInfo {
            semantic: "0.4.0".to_string(),
            git_describe: describe.map(str::to_string),
            git_hash: hash.map(str::to_string),
        }
    }

    #[test]
    fn current_matches_crate_version() {
        assert_eq!(BuildInfo::current().semantic, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn display_prefers_describe_over_hash() {
        assert_eq!(
            info(Some("v0.3.2-7-g644da27"), Some("644da27abcdef0123")).to_string(),
            "0.4.0 (v0.3.2-7-g644da27)"
        );
        assert_eq!(
            info(None, Some("644da27abcdef0123")).to_string(),
            "0.4.0 (644da27abcde)"
        );
        assert_eq!(info(None, None).to_string(), "0.4.0");
    }

    #[test]
    fn json_omits_missing_git_fields() {
        assert_eq!(info(None, None).to_json().unwrap(), r#"{"semantic":"0.4.0"}"#);
        let parsed: BuildInfo = serde_json::from_str(r#"{"semantic":"0.4.0"}"#).unwrap();
        assert_eq!(parsed, info(None, None));
    }
}
