//! FFmpeg subprocess execution.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ffmpeg::FfmpegCommand;
use crate::error::EncoderError;

/// Lines of stderr kept for the failure message.
const STDERR_TAIL_LINES: usize = 20;

/// Runs encoder invocations to completion.
#[async_trait]
pub trait EncoderRunner: Send + Sync {
    /// Runs one invocation. Cancelling the token kills the process.
    async fn run(
        &self,
        command: &FfmpegCommand,
        cancel: &CancellationToken,
    ) -> Result<(), EncoderError>;
}

/// Runs commands with the system FFmpeg binary.
pub struct FfmpegRunner {
    binary: PathBuf,
}

impl FfmpegRunner {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl EncoderRunner for FfmpegRunner {
    async fn run(
        &self,
        command: &FfmpegCommand,
        cancel: &CancellationToken,
    ) -> Result<(), EncoderError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(command.as_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(output = ?command.output_path(), "Starting ffmpeg");

        let mut child = cmd
            .spawn()
            .map_err(|e| EncoderError::SpawnFailed(e.to_string()))?;

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(line = %line, "ffmpeg output");
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                Vec::from(tail).join("\n")
            })
        });

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| EncoderError::SpawnFailed(e.to_string()))?,
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill ffmpeg");
                }
                return Err(EncoderError::Cancelled);
            }
        };

        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return Err(EncoderError::FfmpegFailed {
                code: status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(())
    }
}
