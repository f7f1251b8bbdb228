use std::env;
use std::process::Command;

/// Embed a build identifier as `GIT_HASH`.
///
/// `PAYOUT_BUILD_ID` wins when set (release pipelines build from tarballs
/// without a `.git` directory).
fn build_id() -> String {
    if let Ok(id) = env::var("PAYOUT_BUILD_ID")
        && !id.trim().is_empty()
    {
        return id.trim().to_string();
    }

    Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=10"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn main() {
    println!("cargo:rustc-env=GIT_HASH={}", build_id());
    println!("cargo:rerun-if-env-changed=PAYOUT_BUILD_ID");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
}
