//! Session reader task: decodes NDJSON lines from an agent's stdout into
//! [`SessionEvent`]s.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::jlp::codec::JlpCodec;
use crate::jlp::envelope::InboundEnvelope;
use crate::session::{AgentSession, SessionEvent};

/// Drive a [`FramedRead`] over an agent's stdout, routing each decoded
/// envelope through [`AgentSession::route`] and forwarding the resulting
/// [`SessionEvent`] through `event_tx`.
///
/// On clean EOF, emits [`SessionEvent::Terminated`] with reason
/// `"stream closed"`. A codec-level framing error (oversize line, invalid
/// JSON, failed envelope validation) emits
/// [`SessionEvent::ProtocolViolation`] and continues reading — the caller
/// decides whether repeated violations warrant terminating the session.
///
/// Respects `cancel`: when fired, the reader exits without emitting a
/// termination event.
pub async fn run_reader<R>(
    agent_id: String,
    mut framed: FramedRead<R, JlpCodec>,
    event_tx: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(agent_id, "session reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(agent_id, "session reader: EOF detected");
                        send(&event_tx, SessionEvent::Terminated { reason: "stream closed".into() }).await;
                        break;
                    }
                    Some(Err(err)) => {
                        warn!(agent_id, %err, "session reader: framing/decode error");
                        send(&event_tx, SessionEvent::ProtocolViolation { detail: err.to_string() }).await;
                    }
                    Some(Ok(line)) => {
                        match InboundEnvelope::parse(&line, true) {
                            Ok(envelope) => {
                                // Routing is a pure function of the envelope; the
                                // session's own state is looked up by the caller
                                // when applying the resulting event.
                                let event = route_standalone(&envelope);
                                send(&event_tx, event).await;
                            }
                            Err(err) => {
                                warn!(agent_id, %err, "session reader: envelope validation failed");
                                send(&event_tx, SessionEvent::ProtocolViolation { detail: err.to_string() }).await;
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Route an envelope without a live [`AgentSession`] borrow — used by the
/// reader task, which does not own session state (the Orchestrator Core
/// does, per single-writer discipline).
fn route_standalone(envelope: &InboundEnvelope) -> SessionEvent {
    // AgentSession::route depends only on the envelope, not on session
    // state, so a throwaway session is a correct, allocation-light stand-in.
    let stand_in = AgentSession::new(
        envelope.agent_id.clone(),
        envelope.agent_label.clone(),
        std::time::Instant::now(),
    );
    stand_in.route(envelope)
}

async fn send(event_tx: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    if event_tx.send(event).await.is_err() {
        debug!("session reader: event_tx closed, dropping event");
    }
}
