//! Logical frames: the unit carried by every wire record.
//!
//! A frame is either tunneled packet data or a heartbeat announcing the
//! sender's connection identity and clock:
//!
//! ```text
//! d-<payload bytes>
//! h-<identity hex>-<unix timestamp, decimal>
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in seconds, as carried in heartbeat frames.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// A logical protocol message, exactly one per wire record.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// One raw IP packet.
    Data(Vec<u8>),
    /// Liveness announcement carrying the sender's per-connection identity
    /// and local clock.
    Heartbeat {
        /// Hex identity of the connection the sender believes it is on.
        peer_id: String,
        /// Sender's unix timestamp.
        timestamp: f64,
    },
}

impl Frame {
    /// Build a heartbeat frame for the given identity at the current time.
    pub fn heartbeat(peer_id: &str) -> Self {
        Frame::Heartbeat {
            peer_id: peer_id.to_string(),
            timestamp: unix_now(),
        }
    }

    /// Serialize the frame for padding and encryption.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Frame::Data(payload) => {
                let mut out = Vec::with_capacity(2 + payload.len());
                out.extend_from_slice(b"d-");
                out.extend_from_slice(payload);
                out
            }
            Frame::Heartbeat { peer_id, timestamp } => {
                format!("h-{peer_id}-{timestamp}").into_bytes()
            }
        }
    }

    /// Parse a decrypted, unpadded frame. Returns `None` for anything that
    /// is neither a data nor a well-formed heartbeat frame.
    pub fn decode(raw: &[u8]) -> Option<Frame> {
        if let Some(payload) = raw.strip_prefix(b"d-") {
            return Some(Frame::Data(payload.to_vec()));
        }
        if raw.starts_with(b"h-") {
            let text = std::str::from_utf8(raw).ok()?;
            let mut parts = text.splitn(3, '-');
            parts.next(); // "h"
            let peer_id = parts.next()?.to_string();
            let timestamp: f64 = parts.next()?.parse().ok()?;
            if peer_id.is_empty() || !timestamp.is_finite() {
                return None;
            }
            return Some(Frame::Heartbeat { peer_id, timestamp });
        }
        None
    }
}
