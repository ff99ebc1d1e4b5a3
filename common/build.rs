use std::path::Path;
use std::process::Command;

/// Trimmed stdout of a git command run at the workspace root, if it succeeded
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .current_dir("..")
        .args(args)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn main() {
    // builds outside of a git checkout simply have no git fields in their build info
    let vars: [(&str, &[&str]); 2] = [
        (
            "CORRUPTION_GIT_DESCRIBE",
            &["describe", "--tags", "--long", "--always", "--dirty"],
        ),
        ("CORRUPTION_GIT_HASH", &["rev-parse", "HEAD"]),
    ];
    for (var, args) in vars {
        if let Some(value) = git(args) {
            println!("cargo:rustc-env={var}={value}");
        }
    }
    if Path::new("..").join(".git").exists() {
        println!("cargo:rerun-if-changed=../.git/HEAD");
        println!("cargo:rerun-if-changed=../.git/refs");
    }
}
