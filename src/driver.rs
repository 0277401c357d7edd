//! Shells out to `nasm` and `gcc` to turn generated assembly into a running
//! executable, and runs it (§6.3).

use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;

use crate::error::{CompileError, Result};

/// Assemble `asm_path` with `nasm -g -f elf64`, then link with
/// `gcc -no-pie -z noexecstack`, producing an executable next to it.
pub fn assemble_and_link(asm_path: &Path) -> Result<PathBuf> {
    let object_path = asm_path.with_extension("o");
    let exe_path = asm_path.with_extension("out");

    debug!("running nasm on {}", asm_path.display());
    run_tool(
        "nasm",
        Command::new("nasm")
            .args(["-g", "-f", "elf64", "-o"])
            .arg(&object_path)
            .arg(asm_path),
    )?;

    debug!("running gcc on {}", object_path.display());
    run_tool(
        "gcc",
        Command::new("gcc")
            .args(["-no-pie", "-z", "noexecstack", "-o"])
            .arg(&exe_path)
            .arg(&object_path),
    )?;

    Ok(exe_path)
}

fn run_tool(tool: &'static str, cmd: &mut Command) -> Result<()> {
    let status = cmd.status()?;
    if !status.success() {
        return Err(CompileError::ToolFailure {
            tool,
            status: status.code().unwrap_or(-1),
        });
    }
    Ok(())
}

/// Run `exe_path` once and return its exit code, then delete the
/// executable (mirrors the source's `run_once`, which cleans up after a
/// single execution rather than leaving binaries behind for every sample).
pub fn run_once(exe_path: &Path) -> Result<i32> {
    debug!("running {}", exe_path.display());
    let status = Command::new(exe_path).status()?;
    let code = status.code().unwrap_or(-1);
    let _ = std::fs::remove_file(exe_path);
    Ok(code)
}

/// `true` if both `nasm` and `gcc` are reachable on `PATH`; integration
/// tests that shell out to them skip (rather than fail) when this is false.
pub fn toolchain_available() -> bool {
    which("nasm") && which("gcc")
}

fn which(tool: &str) -> bool {
    Command::new(tool)
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toolchain_available_does_not_panic() {
        let _ = toolchain_available();
    }
}
