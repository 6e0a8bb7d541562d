//! Core constants, error types, and configuration.

pub mod config;
pub mod constants;
pub mod error;

pub use config::{ClientEndpoints, Config, EndpointConfig, IpConfig, ServerEndpoints, TunnelSettings};
pub use constants::*;
pub use error::{CryptoError, SessionError, TunnelError};
