//! Handshake negotiation: waiting for and validating an agent's initial
//! `handshake` envelope, and deciding protocol-version compatibility.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use crate::jlp::codec::JlpCodec;
use crate::jlp::envelope::InboundEnvelope;
use crate::{AppError, Result};

/// Advertised protocol version of this orchestrator build.
pub const ADVERTISED_PROTOCOL_VERSION: &str = "0.3";

/// Read lines from `stdout` until a `handshake` envelope arrives or
/// `timeout` elapses.
///
/// Lines that fail to parse, or parse as a non-handshake message, are
/// logged and skipped — only an explicit timeout or an unrecoverable I/O
/// error aborts the wait early.
///
/// # Errors
///
/// - [`AppError::Handshake`]`("handshake_timeout")` — no handshake received in time.
/// - [`AppError::Handshake`] — the child stream closed before a handshake arrived.
pub async fn wait_for_handshake<R>(
    stdout: R,
    max_frame_bytes: usize,
    timeout: Duration,
) -> Result<(InboundEnvelope, FramedRead<R, JlpCodec>)>
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, JlpCodec::with_max_frame_bytes(max_frame_bytes));

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(AppError::Handshake("handshake_timeout".into()));
        }

        let next = tokio::time::timeout(remaining, framed.next())
            .await
            .map_err(|_| AppError::Handshake("handshake_timeout".into()))?;

        match next {
            None => {
                return Err(AppError::Handshake(
                    "agent stream closed before handshake".into(),
                ))
            }
            Some(Err(AppError::Jlp(detail))) => {
                tracing::debug!(detail, "handshake: skipping malformed line while waiting");
            }
            Some(Err(err)) => return Err(err),
            Some(Ok(line)) => match InboundEnvelope::parse(&line, true) {
                Ok(envelope) if matches!(envelope.kind, crate::jlp::envelope::InboundType::Handshake) => {
                    return Ok((envelope, framed));
                }
                Ok(_) => {
                    tracing::debug!("handshake: skipping non-handshake message while waiting");
                }
                Err(err) => {
                    tracing::debug!(%err, "handshake: skipping unparsable line while waiting");
                }
            },
        }
    }
}

/// Decide whether `received` is compatible with `advertised`.
///
/// Compatible when equal, or when `received` differs from `advertised` only
/// in the patch component, or in an additive minor bump (same major).
/// Incompatible on any major mismatch. The decision is made once, at
/// handshake time; it is never re-evaluated against later traffic.
#[must_use]
pub fn version_compatible(advertised: &str, received: &str) -> bool {
    let Some((adv_major, adv_minor)) = parse_major_minor(advertised) else {
        return false;
    };
    let Some((rcv_major, rcv_minor)) = parse_major_minor(received) else {
        return false;
    };
    adv_major == rcv_major && rcv_minor >= adv_minor
}

fn parse_major_minor(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_version_match_is_compatible() {
        assert!(version_compatible("0.3", "0.3"));
    }

    #[test]
    fn patch_and_additive_minor_differences_are_compatible() {
        assert!(version_compatible("0.3", "0.3.1"));
        assert!(version_compatible("0.3", "0.4"));
    }

    #[test]
    fn major_mismatch_is_incompatible() {
        assert!(!version_compatible("0.3", "1.0"));
    }

    #[test]
    fn older_minor_than_advertised_is_incompatible() {
        assert!(!version_compatible("0.4", "0.3"));
    }
}
