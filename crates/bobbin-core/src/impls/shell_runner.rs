//! Runs `ExternalProcess` payloads through a shell.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::domain::ExecutionError;
use crate::ports::CommandRunner;

/// Bytes of stderr kept in a failure reason.
const STDERR_TAIL: usize = 2048;

/// `<shell> -c <payload>` with stdin closed and output captured.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new("sh")
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> Result<(), ExecutionError> {
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        debug!(
            status = %output.status,
            stdout_bytes = output.stdout.len(),
            "external process finished"
        );

        if output.status.success() {
            Ok(())
        } else {
            Err(ExecutionError::NonZeroExit {
                code: output.status.code(),
                stderr: tail(&output.stderr),
            })
        }
    }
}

fn tail(bytes: &[u8]) -> String {
    let start = bytes.len().saturating_sub(STDERR_TAIL);
    String::from_utf8_lossy(&bytes[start..]).trim().to_string()
}
