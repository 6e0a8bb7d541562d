//! Error types for the tunnel.
//!
//! Three layers, matching how far an error propagates:
//! [`CryptoError`] stays inside one record, [`SessionError`] terminates one
//! connection, [`TunnelError`] takes down the process.

use thiserror::Error;

/// Per-record errors. A record failing one of these checks is silently
/// dropped by the session receiver; the connection survives.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD decryption failed (invalid tag, truncated record, or wrong key).
    #[error("authentication failed")]
    AuthenticationFailed,

    /// AEAD encryption failed. The offending frame is dropped.
    #[error("encryption failed")]
    EncryptionFailed,

    /// Replay nonce already seen or older than the retention window.
    #[error("replay detected")]
    ReplayDetected,

    /// Declared frame length exceeds the record body.
    #[error("malformed padding header")]
    MalformedPadding,
}

/// Per-connection errors. Any of these terminates exactly one session;
/// the connection manager retries (client) or discards (server).
#[derive(Debug, Error)]
pub enum SessionError {
    /// Stream nonce exchange failed or the peer sent no usable identity.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// No valid heartbeat within the liveness timeout.
    #[error("connection {0} timed out")]
    LivenessTimeout(u64),

    /// Underlying connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// I/O error on the underlying connection.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket protocol error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Process-level errors surfaced to the host at startup or during
/// multiplexer operation. Not retried.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Malformed or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Could not bind a listening socket.
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        /// Address that could not be bound.
        addr: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Virtual network device could not be created or configured.
    #[error("device error: {0}")]
    Device(#[from] tun::Error),

    /// I/O fault on the packet device.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A multiplexer or manager loop ended unexpectedly.
    #[error("tunnel loop ended: {0}")]
    LoopEnded(String),
}
