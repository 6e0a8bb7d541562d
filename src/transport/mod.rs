//! Connection managers: dialing, accepting, and supervising sessions.
//!
//! A [`TransportManager`] owns one configured endpoint and keeps it
//! serviced for the lifetime of the tunnel. Client-role managers dial,
//! run a session to termination, and redial after a fixed delay; server
//! role managers bind once and spawn a session per accepted connection.
//! Any mix of managers can feed the same packet queues.

mod tcp;
mod ws;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::core::TunnelSettings;
use crate::core::error::TunnelError;
use crate::crypto::SharedSecret;
use crate::mux::PacketQueue;

/// Count of currently established connections behind one manager.
///
/// Incremented when a session reaches `STREAMING`, decremented when it
/// terminates. The device pump consults the sum across all managers.
#[derive(Clone, Default)]
pub struct ConnectionCounter(Arc<AtomicUsize>);

impl ConnectionCounter {
    /// Create a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn decrement(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    /// Current number of established connections.
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// Issues process-unique connection ids, shared by every manager.
#[derive(Clone, Default)]
pub struct ConnectionIdGen(Arc<AtomicU64>);

impl ConnectionIdGen {
    /// Create a generator starting at 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next unique connection id.
    pub fn next_id(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Shared tunnel plumbing handed to each manager by the multiplexer.
#[derive(Clone)]
pub struct TransportContext {
    /// Packets read from the device, awaiting a connection.
    pub outbound: PacketQueue,
    /// Decrypted packets awaiting delivery to the device.
    pub inbound: PacketQueue,
    /// Connection id source.
    pub ids: ConnectionIdGen,
}

/// One configured connection endpoint.
#[derive(Debug, Clone)]
pub enum Endpoint {
    /// Dial a WebSocket URL, redialing on failure.
    WsClient {
        /// `ws://host:port/path` to dial.
        url: String,
    },
    /// Accept WebSocket connections on a local address.
    WsServer {
        /// `host:port` to bind.
        addr: String,
    },
    /// Dial a raw TCP address, redialing on failure.
    TcpClient {
        /// `host:port` to dial.
        addr: String,
    },
    /// Accept raw TCP connections on a local address.
    TcpServer {
        /// `host:port` to bind.
        addr: String,
    },
}

/// Supervises all connections for one endpoint.
pub struct TransportManager {
    endpoint: Endpoint,
    secret: SharedSecret,
    settings: TunnelSettings,
    counter: ConnectionCounter,
}

impl TransportManager {
    /// Create a manager for one endpoint.
    pub fn new(endpoint: Endpoint, secret: SharedSecret, settings: TunnelSettings) -> Self {
        Self {
            endpoint,
            secret,
            settings,
            counter: ConnectionCounter::new(),
        }
    }

    /// Handle to this manager's connection counter.
    pub fn counter(&self) -> ConnectionCounter {
        self.counter.clone()
    }

    /// Service the endpoint until a fatal fault.
    ///
    /// Per-connection failures are absorbed (logged, redialed or awaited
    /// anew); only unrecoverable conditions such as a failed bind surface
    /// as an error.
    pub async fn run(self, ctx: TransportContext) -> Result<(), TunnelError> {
        let TransportManager {
            endpoint,
            secret,
            settings,
            counter,
        } = self;
        let shared = SessionShared {
            secret,
            settings,
            counter,
            ctx,
        };
        match endpoint {
            Endpoint::WsClient { url } => ws::run_client(url, shared).await,
            Endpoint::WsServer { addr } => ws::run_server(addr, shared).await,
            Endpoint::TcpClient { addr } => tcp::run_client(addr, shared).await,
            Endpoint::TcpServer { addr } => tcp::run_server(addr, shared).await,
        }
    }
}

/// Everything a transport needs to stand up sessions.
#[derive(Clone)]
pub(crate) struct SessionShared {
    pub(crate) secret: SharedSecret,
    pub(crate) settings: TunnelSettings,
    pub(crate) counter: ConnectionCounter,
    pub(crate) ctx: TransportContext,
}
