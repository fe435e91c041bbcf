//! Session writer task: serializes outbound commands and writes NDJSON
//! lines to an agent's stdin.

use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::jlp::codec::JlpCodec;
use crate::jlp::envelope::OutboundCommand;
use crate::{AppError, Result};

/// Drive a [`FramedWrite`] over `stdin`, encoding each [`OutboundCommand`]
/// received on `cmd_rx` as one NDJSON line.
///
/// Exits cleanly on cancellation or when `cmd_rx` closes (all senders
/// dropped). A write failure (e.g. `stdin_full`, or the agent has exited)
/// is surfaced to the caller rather than silently dropped, so the Flush
/// Scheduler's backoff/escalation logic can react.
///
/// # Errors
///
/// Returns [`AppError::FlowControl`] on a failed write to stdin.
pub async fn run_writer<W>(
    agent_id: String,
    stdin: W,
    mut cmd_rx: mpsc::Receiver<OutboundCommand>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut framed = FramedWrite::new(stdin, JlpCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(agent_id, "session writer: cancellation received, stopping");
                break;
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    None => {
                        debug!(agent_id, "session writer: command channel closed, stopping");
                        break;
                    }
                    Some(command) => {
                        let line = command.to_line()?;
                        if let Err(err) = framed.send(line).await {
                            warn!(agent_id, %err, "session writer: write failed");
                            return Err(AppError::FlowControl(format!("stdin_full: {err}")));
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
