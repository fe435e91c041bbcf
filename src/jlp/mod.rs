//! Line-delimited JSON protocol (JLP): wire codec and message envelopes
//! exchanged between the Orchestrator Core and an Agent subprocess over
//! stdin/stdout.

pub mod codec;
pub mod envelope;

pub use codec::JlpCodec;
pub use envelope::{InboundEnvelope, OutboundCommand};
