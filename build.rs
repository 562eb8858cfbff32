//! Build script: embeds the git hash and checks GPU toolkits for GPU features.

use std::process::Command;

fn main() {
    // Embed git short hash for version string
    if let Ok(output) = Command::new("git")
        .args(["rev-parse", "--short=7", "HEAD"])
        .output()
        && output.status.success()
    {
        let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
        println!("cargo:rustc-env=GIT_HASH={}", hash);
    }
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/");

    if cfg!(feature = "cuda") {
        check_tool("nvcc", &["--version"], "CUDA toolkit (nvcc)");
    }
    if cfg!(feature = "vulkan") {
        check_tool("glslc", &["--version"], "Vulkan SDK (glslc)");
    }
}

/// Warn early when a toolkit whisper-rs-sys needs is missing.
fn check_tool(program: &str, args: &[&str], what: &str) {
    let found = Command::new(program)
        .args(args)
        .output()
        .is_ok_and(|out| out.status.success());
    if !found {
        println!("cargo::warning={what} not found in PATH; the whisper-rs build will likely fail");
    }
}
