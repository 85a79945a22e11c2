//! Audio sinks
//!
//! `CommandSink` pipes the Job Service's audio stream into an external
//! player process (ffplay by default). Killing the process stops playback;
//! the process exiting is end of stream.

use crate::error::PlaybackError;
use crate::job_service::{AudioStream, JobService};
use async_trait::async_trait;
use echoaudit_common::CallKey;
use futures::StreamExt;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A started audio stream
pub struct ActiveStream {
    stop: CancellationToken,
    finished: oneshot::Receiver<()>,
}

impl ActiveStream {
    /// `finished` resolves when the stream ends, on its own or after `stop`
    pub fn new(stop: CancellationToken, finished: oneshot::Receiver<()>) -> Self {
        Self { stop, finished }
    }

    pub(crate) fn into_parts(self) -> (CancellationToken, oneshot::Receiver<()>) {
        (self.stop, self.finished)
    }
}

/// Something that can play one recording
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn start(&self, call: &CallKey) -> Result<ActiveStream, PlaybackError>;
}

/// Plays through an external command reading audio from stdin
pub struct CommandSink {
    service: Arc<dyn JobService>,
    command: Vec<String>,
}

impl CommandSink {
    pub fn new(service: Arc<dyn JobService>, command: Vec<String>) -> Self {
        Self { service, command }
    }
}

#[async_trait]
impl AudioSink for CommandSink {
    async fn start(&self, call: &CallKey) -> Result<ActiveStream, PlaybackError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| PlaybackError::Player("player command is empty".to_string()))?;

        let audio = self.service.audio_stream(call).await?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PlaybackError::Player(format!("failed to start {program}: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PlaybackError::Player("player stdin not captured".to_string()))?;

        let stop = CancellationToken::new();
        let (finished_tx, finished) = oneshot::channel();
        let token = stop.clone();
        let call = call.clone();

        tokio::spawn(async move {
            let played = async {
                if let Err(e) = pump(audio, stdin).await {
                    // The player closing its input early is a normal way to end
                    debug!(call = %call, error = %e, "Audio pump ended");
                }
                child.wait().await
            };

            let exit = tokio::select! {
                _ = token.cancelled() => None,
                exit = played => Some(exit),
            };

            match exit {
                Some(Ok(status)) => debug!(call = %call, %status, "Player exited"),
                Some(Err(e)) => warn!(call = %call, error = %e, "Waiting for player failed"),
                None => {
                    if let Err(e) = child.start_kill() {
                        debug!(call = %call, error = %e, "Player already gone");
                    }
                    let _ = child.wait().await;
                    debug!(call = %call, "Player stopped");
                }
            }
            let _ = finished_tx.send(());
        });

        Ok(ActiveStream::new(stop, finished))
    }
}

/// Copy the audio stream into the player; closing stdin signals EOF
async fn pump(mut audio: AudioStream, mut stdin: ChildStdin) -> Result<(), PlaybackError> {
    while let Some(chunk) = audio.next().await {
        stdin.write_all(&chunk?).await?;
    }
    stdin.shutdown().await?;
    Ok(())
}
