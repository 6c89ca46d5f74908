//! Wire delivery for the agent.
//!
//! Outbound delivery goes through the [`AgentTransport`] trait; inbound
//! delivery enqueues raw wire bytes onto the agent's processing queue.
//! Two implementations are provided: an HTTP push transport for real
//! deployments and an in-process loopback network for tests and the
//! conformance harness.

use async_trait::async_trait;

pub mod error;
pub mod http;
pub mod mem;

pub use error::TransportError;
pub use http::{serve_inbound, HttpTransport};
pub use mem::LoopbackNetwork;

/// Media type distinguishing agent wire traffic from ordinary HTTP payloads.
pub const AGENT_WIRE_CONTENT_TYPE: &str = "application/ssi-agent-wire";

/// HTTP status signalling that the receiving agent accepted the message.
pub const STATUS_ACCEPTED: u16 = 202;

/// Outbound wire delivery.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Deliver `wire` to `endpoint`, returning the HTTP-style status code.
    ///
    /// Anything other than [`STATUS_ACCEPTED`] is a delivery failure
    /// observable to the sender; transport-level faults are errors.
    async fn send(&self, endpoint: &str, wire: Vec<u8>) -> Result<u16, TransportError>;
}
