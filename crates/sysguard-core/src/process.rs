//! Helper process invocation with bounded output capture.

use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Runs a helper program and returns its captured standard output.
#[async_trait(?Send)]
pub trait ProcessRunner {
    /// Runs `program` with `args`, capturing at most `limit` bytes of stdout.
    ///
    /// A helper that cannot be executed yields an empty string. Output longer
    /// than `limit` is an [`Error::BufferOverflow`].
    async fn run(&self, program: &Path, args: &[&str], limit: usize) -> Result<String>;
}

/// Spawns real child processes.
///
/// Stdin and stderr are closed; stdout is piped and drained before the child
/// is reaped.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    timeout: Option<Duration>,
}

impl CommandRunner {
    /// Creates a runner that waits for the helper indefinitely.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a runner that kills helpers running longer than `timeout`.
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

#[async_trait(?Send)]
impl ProcessRunner for CommandRunner {
    async fn run(&self, program: &Path, args: &[&str], limit: usize) -> Result<String> {
        let helper = program.display().to_string();

        let mut child = match Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
                debug!(%helper, error = %e, "Helper not executable, treating output as empty");
                return Ok(String::new());
            }
            Err(source) => return Err(Error::Spawn { helper, source }),
        };

        let captured = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, capture(&mut child, &helper, limit))
                .await
                .ok(),
            None => Some(capture(&mut child, &helper, limit).await),
        };

        match captured {
            Some(result) => result,
            None => {
                let timeout = self.timeout.unwrap_or_default();
                warn!(%helper, ?timeout, "Helper timed out, killing it");
                let _ = child.kill().await;
                Err(Error::HelperTimeout { helper, timeout })
            }
        }
    }
}

/// Drains the child's stdout, then reaps it.
async fn capture(child: &mut Child, helper: &str, limit: usize) -> Result<String> {
    let output = match child.stdout.take() {
        Some(stdout) => read_bounded(stdout, helper, limit).await,
        None => Ok(String::new()),
    };

    if output.is_err() {
        // The child may be blocked on a full pipe.
        let _ = child.kill().await;
        return output;
    }

    let status = child.wait().await?;
    debug!(%helper, %status, "Helper exited");
    output
}

/// Reads `reader` to the end into a buffer of at most `limit` bytes.
///
/// Content that does not fit is rejected rather than truncated.
pub async fn read_bounded<R>(reader: R, source_name: &str, limit: usize) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(limit.min(64 * 1024));
    reader.take(limit as u64 + 1).read_to_end(&mut buf).await?;

    if buf.len() > limit {
        return Err(Error::BufferOverflow {
            source_name: source_name.to_string(),
            limit,
        });
    }

    Ok(String::from_utf8_lossy(&buf).into_owned())
}
