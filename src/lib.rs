//! # Emberlink
//!
//! Emberlink establishes an encrypted point-to-point virtual network link
//! between two hosts by tunneling raw IP packets over WebSocket or plain TCP
//! connections. It provides:
//!
//! - **Security**: XChaCha20-Poly1305 authenticated encryption keyed from a
//!   single pre-shared secret, with timestamp-based replay protection
//! - **Stealth**: randomized record padding and, on raw TCP, an additional
//!   per-connection keystream layer so no two connections look alike
//! - **Resilience**: heartbeat-based liveness detection, automatic client
//!   redial, and any number of simultaneous carrier connections
//! - **Simplicity**: no key exchange, no PKI, one shared secret
//!
//! ## Modules
//!
//! - [`core`]: constants, error types, and configuration
//! - [`crypto`]: authenticated encryption, keystream layer, padding, replay guard
//! - [`protocol`]: logical frames and the stream-transport wire codec
//! - [`session`]: the per-connection protocol state machine
//! - [`transport`]: connection managers (client/server × WebSocket/TCP)
//! - [`device`]: virtual network device interface
//! - [`mux`]: the packet multiplexer binding device and transports
//!
//! ## Example
//!
//! ```no_run
//! use emberlink::core::TunnelSettings;
//! use emberlink::crypto::SharedSecret;
//! use emberlink::mux::Multiplexer;
//! use emberlink::transport::{Endpoint, TransportManager};
//!
//! # async fn run(device: impl emberlink::device::PacketDevice) -> anyhow::Result<()> {
//! let secret = SharedSecret::new("example-key");
//! let settings = TunnelSettings::default();
//! let mut mux = Multiplexer::new(device);
//! mux.attach(TransportManager::new(
//!     Endpoint::WsClient { url: "ws://198.51.100.7:8765".into() },
//!     secret,
//!     settings,
//! ));
//! mux.run().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod core;
pub mod crypto;
pub mod device;
pub mod mux;
pub mod protocol;
pub mod session;
pub mod transport;

pub use crate::core::{Config, TunnelError, TunnelSettings};
pub use crate::crypto::SharedSecret;
pub use crate::mux::Multiplexer;
pub use crate::transport::{Endpoint, TransportManager};
