//! Process launcher - wraps an opaque expression into a fixed interpreter
//! invocation and spawns it with captured output streams.
//!
//! The expression is never executed directly. On Windows it is inserted into
//! a PowerShell invocation whose preamble silences the progress stream,
//! forces UTF-8 console encoding, and pipes through `Out-String -Width 4096`
//! so column-based formatters do not wrap. On Unix the expression goes to
//! `sh -c`, mirroring how the shell command is selected per platform.

use std::process::Stdio;
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::debug;

/// PowerShell preamble applied to every invocation: no progress noise,
/// UTF-8 in and out.
#[cfg(windows)]
const PS_PREAMBLE: &str = "$ProgressPreference='SilentlyContinue'; \
     [Console]::OutputEncoding = [System.Text.Encoding]::UTF8; \
     $OutputEncoding = [System.Text.Encoding]::UTF8; ";

/// Width passed to `Out-String` so Format-Table output keeps one row per line.
#[cfg(windows)]
const OUTPUT_WIDTH: u32 = 4096;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to spawn {interpreter}: {source}")]
    Spawn {
        interpreter: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// The interpreter program and argument list for one expression.
///
/// Kept as explicit argv rather than a single shell string so the expression
/// stays an opaque argument to the interpreter.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: &'static str,
    pub args: Vec<String>,
}

/// Build the fixed interpreter invocation for an expression.
#[cfg(windows)]
pub fn build_invocation(expression: &str) -> Invocation {
    let wrapped = format!("{PS_PREAMBLE}& {{ {expression} | Out-String -Width {OUTPUT_WIDTH} }}");
    Invocation {
        program: "powershell.exe",
        args: vec![
            "-NoProfile".to_string(),
            "-ExecutionPolicy".to_string(),
            "Bypass".to_string(),
            "-Command".to_string(),
            wrapped,
        ],
    }
}

/// Build the fixed interpreter invocation for an expression.
#[cfg(not(windows))]
pub fn build_invocation(expression: &str) -> Invocation {
    Invocation {
        program: "sh",
        args: vec!["-c".to_string(), expression.to_string()],
    }
}

/// Spawn the interpreter for an expression with stdout and stderr piped for
/// independent byte-level reads. The caller owns reaping the child; a spawn
/// failure surfaces immediately.
pub fn launch(expression: &str) -> Result<Child, LaunchError> {
    let invocation = build_invocation(expression);
    debug!(program = invocation.program, "Launching interpreter");

    let mut command = Command::new(invocation.program);
    command
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // The interpreter gets its own process group so that terminating a run
    // covers descendants still holding the pipe write ends.
    #[cfg(unix)]
    command.process_group(0);

    command.spawn().map_err(|source| LaunchError::Spawn {
        interpreter: invocation.program,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(windows))]
    fn expression_is_passed_as_opaque_argument() {
        let invocation = build_invocation("echo 'a | b'");
        assert_eq!(invocation.program, "sh");
        assert_eq!(invocation.args, vec!["-c", "echo 'a | b'"]);
    }

    #[test]
    #[cfg(windows)]
    fn expression_is_wrapped_with_preamble() {
        let invocation = build_invocation("Get-Date");
        assert_eq!(invocation.program, "powershell.exe");
        let command_arg = invocation.args.last().unwrap();
        assert!(command_arg.contains("$ProgressPreference='SilentlyContinue'"));
        assert!(command_arg.contains("& { Get-Date | Out-String -Width 4096 }"));
        assert!(invocation.args.contains(&"-NoProfile".to_string()));
    }

    #[tokio::test]
    #[cfg(not(windows))]
    async fn launch_spawns_a_reapable_child() {
        let mut child = launch("true").expect("sh is always available");
        let status = child.wait().await.unwrap();
        assert!(status.success());
    }
}
