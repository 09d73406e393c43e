use std::process::Command;

/// Короткий хеш коммита для строки версии `tidebus --version`.
///
/// `TIDEBUS_GIT_COMMIT` подменяет вызов git (сборка из архива без `.git`).
fn git_commit() -> String {
    if let Ok(commit) = std::env::var("TIDEBUS_GIT_COMMIT") {
        return commit;
    }
    Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".into())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-env-changed=TIDEBUS_GIT_COMMIT");

    println!("cargo:rustc-env=GIT_COMMIT={}", git_commit());

    let build_time = chrono::Utc::now().to_rfc3339();
    println!("cargo:rustc-env=BUILD_TIME={build_time}");
}
