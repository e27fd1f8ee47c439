use std::process::Command;

fn main() {
    let version = describe_release().unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

    println!("cargo:rustc-env=GEORENDER_VERSION={version}");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/tags");
}

/// Nearest release tag (`v1.2.3` -> `1.2.3`), with commit distance and dirty suffix.
/// `None` outside a git checkout or when no release tag exists.
fn describe_release() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--match", "v[0-9]*", "--dirty"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let described = String::from_utf8_lossy(&output.stdout);
    let described = described.trim();
    let version = described.strip_prefix('v').unwrap_or(described);

    (!version.is_empty()).then(|| version.to_string())
}
