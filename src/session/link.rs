//! The seam between a session and its underlying connection.
//!
//! A link carries whole encrypted records in both directions. Transports
//! implement the two halves however suits them: WebSocket maps one record
//! to one binary message, raw TCP layers a keystream cipher and delimiter
//! framing underneath. The session state machine is identical over both.

use crate::core::error::SessionError;

/// Identity of one established connection, fixed at handshake time.
///
/// `local_id` is embedded in outgoing heartbeats; incoming heartbeats must
/// carry `peer_id` to count. On WebSocket links both are the same value
/// (derived from the request path); on TCP links each side's identity is
/// the hex of the stream nonce it sent.
#[derive(Debug, Clone)]
pub struct LinkIdentity {
    /// Identity announced in outgoing heartbeats.
    pub local_id: String,
    /// Identity expected in incoming heartbeats.
    pub peer_id: String,
}

impl LinkIdentity {
    /// Shared identity, used by WebSocket links.
    pub fn symmetric(id: String) -> Self {
        Self {
            local_id: id.clone(),
            peer_id: id,
        }
    }
}

/// Sending half of a connection: consumes one encrypted record per call.
pub trait RecordSink: Send + 'static {
    /// Transmit one encrypted record.
    fn send(
        &mut self,
        record: Vec<u8>,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;
}

/// Receiving half of a connection: yields one encrypted record per call.
pub trait RecordSource: Send + 'static {
    /// Receive the next complete encrypted record.
    ///
    /// Returns [`SessionError::ConnectionClosed`] on orderly shutdown and
    /// other [`SessionError`] variants on transport faults.
    fn recv(&mut self) -> impl Future<Output = Result<Vec<u8>, SessionError>> + Send;
}
