//! Protocol constants.
//!
//! Both ends of a tunnel must agree on these values; changing them breaks
//! interoperability with existing peers.

use std::time::Duration;

// =============================================================================
// CRYPTOGRAPHIC CONSTANTS
// =============================================================================

/// XChaCha20 nonce size, prepended to every encrypted record.
pub const AEAD_NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// Bytes added to a padded record by encryption (nonce + tag).
pub const ENCRYPTION_OVERHEAD: usize = AEAD_NONCE_SIZE + AEAD_TAG_SIZE;

/// Per-connection stream nonce exchanged in the clear on raw TCP.
pub const STREAM_NONCE_SIZE: usize = 32;

// =============================================================================
// PADDING HEADER
// =============================================================================

/// Padded record header: length (u16 LE) + replay nonce (u64 LE).
pub const PADDING_HEADER_SIZE: usize = 2 + 8;

/// Total bytes a frame grows by between padding and encryption.
pub const PADDING_TOTAL_OVERHEAD: usize = PADDING_HEADER_SIZE + ENCRYPTION_OVERHEAD;

/// Size of the pre-generated random filler template.
pub const PADDING_TEMPLATE_SIZE: usize = 65536;

/// How often the random filler template is regenerated.
pub const PADDING_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

// =============================================================================
// REPLAY PROTECTION
// =============================================================================

/// Replay nonces are timestamps counted in this many ticks per second.
/// Bounds the number of records a connection may send per second.
pub const REPLAY_NONCE_RESOLUTION: u64 = 1_000_000;

/// Nonces older than this window are rejected and evicted.
pub const REPLAY_RETENTION_WINDOW: Duration = Duration::from_secs(300);

/// How often the replay guard sweeps its working set.
pub const REPLAY_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

// =============================================================================
// HEARTBEAT / LIVENESS
// =============================================================================

/// Interval between outgoing heartbeats.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// A session with no valid heartbeat for this long is dead.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum tolerated clock skew of a peer heartbeat timestamp.
pub const TIMEDIFF_TOLERANCE: Duration = Duration::from_secs(300);

/// How often the liveness checker runs.
pub const LIVENESS_CHECK_INTERVAL: Duration = Duration::from_secs(5);

// =============================================================================
// TRANSPORT
// =============================================================================

/// Delay before a client redials a failed or broken connection.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Default target size for padded records.
pub const DEFAULT_PADDING_TARGET: usize = 4096;

/// Default MTU of the virtual network device.
pub const DEFAULT_MTU: u16 = 1500;

/// Stream-transport record delimiter. Reserved: never produced by the
/// base64 alphabet used for record encoding.
pub const RECORD_DELIMITER: u8 = b'\n';

/// Read chunk size for the raw TCP receiver.
pub const STREAM_READ_CHUNK: usize = 1024;

/// Packet device read buffer: the largest frame the record length field
/// can describe, so no device read is ever truncated.
pub const DEVICE_READ_BUFFER: usize = 65536;
