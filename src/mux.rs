//! Packet multiplexing between the virtual network device and the
//! connection pool.
//!
//! All connections, regardless of transport, share one outbound and one
//! inbound queue. Any session may pick up the next outbound packet and any
//! session may deliver an inbound one, so packets flow over whichever
//! connection is available. When no connection is established at all,
//! outbound packets are dropped at the device edge instead of queueing up
//! stale traffic.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, trace};

use crate::core::constants::DEVICE_READ_BUFFER;
use crate::core::error::TunnelError;
use crate::device::PacketDevice;
use crate::transport::{ConnectionCounter, ConnectionIdGen, TransportContext, TransportManager};

/// Unbounded multi-producer multi-consumer packet queue.
///
/// Producers push from any task; consumers race on `pop`, each packet going
/// to exactly one of them. Cloning shares the underlying channel.
#[derive(Clone)]
pub struct PacketQueue {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl PacketQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Enqueue one packet. Never blocks.
    pub fn push(&self, packet: Vec<u8>) {
        // The receiver lives as long as any clone of the queue does.
        let _ = self.tx.send(packet);
    }

    /// Dequeue the next packet, waiting until one arrives. Returns `None`
    /// only if every sender has been dropped.
    pub async fn pop(&self) -> Option<Vec<u8>> {
        self.rx.lock().await.recv().await
    }

    /// Non-blocking dequeue attempt.
    pub fn try_pop(&self) -> Option<Vec<u8>> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Bridges one packet device to a pool of connection managers.
pub struct Multiplexer<D> {
    device: D,
    outbound: PacketQueue,
    inbound: PacketQueue,
    ids: ConnectionIdGen,
    managers: Vec<TransportManager>,
    counters: Vec<ConnectionCounter>,
}

impl<D: PacketDevice> Multiplexer<D> {
    /// Create a multiplexer over a packet device.
    pub fn new(device: D) -> Self {
        Self {
            device,
            outbound: PacketQueue::new(),
            inbound: PacketQueue::new(),
            ids: ConnectionIdGen::new(),
            managers: Vec::new(),
            counters: Vec::new(),
        }
    }

    /// Attach a connection manager to the shared queues.
    pub fn attach(&mut self, manager: TransportManager) {
        self.counters.push(manager.counter());
        self.managers.push(manager);
    }

    /// Run the tunnel until any component fails.
    ///
    /// Spawns the device pump loops and every attached manager as one
    /// cancellation group; the first fault tears the rest down.
    pub async fn run(self) -> Result<(), TunnelError> {
        let Multiplexer {
            device,
            outbound,
            inbound,
            ids,
            managers,
            counters,
        } = self;

        info!(transports = managers.len(), "tunnel starting");
        let (read_half, write_half) = tokio::io::split(device);

        let mut tasks: JoinSet<Result<(), TunnelError>> = JoinSet::new();
        tasks.spawn(device_to_net(read_half, outbound.clone(), counters));
        tasks.spawn(net_to_device(write_half, inbound.clone()));
        for manager in managers {
            let ctx = TransportContext {
                outbound: outbound.clone(),
                inbound: inbound.clone(),
                ids: ids.clone(),
            };
            tasks.spawn(manager.run(ctx));
        }

        let outcome = match tasks.join_next().await {
            Some(Ok(result)) => result,
            Some(Err(e)) => Err(TunnelError::LoopEnded(format!("task panicked: {e}"))),
            None => Ok(()),
        };
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        outcome
    }
}

/// Reads packets off the device and feeds the shared outbound queue.
///
/// With zero established connections packets are dropped immediately so
/// the queue never accumulates traffic nobody can carry.
async fn device_to_net(
    mut device: impl tokio::io::AsyncRead + Unpin + Send,
    outbound: PacketQueue,
    counters: Vec<ConnectionCounter>,
) -> Result<(), TunnelError> {
    let mut buf = vec![0u8; DEVICE_READ_BUFFER];
    loop {
        let n = device.read(&mut buf).await?;
        if n == 0 {
            return Err(TunnelError::LoopEnded("packet device closed".into()));
        }
        if counters.iter().map(ConnectionCounter::get).sum::<usize>() == 0 {
            debug!(bytes = n, "no connection established, packet dropped");
            continue;
        }
        trace!(bytes = n, "device -> queue");
        outbound.push(buf[..n].to_vec());
    }
}

/// Writes decrypted inbound packets back to the device.
async fn net_to_device(
    mut device: impl tokio::io::AsyncWrite + Unpin + Send,
    inbound: PacketQueue,
) -> Result<(), TunnelError> {
    loop {
        let Some(packet) = inbound.pop().await else {
            return Err(TunnelError::LoopEnded("inbound queue closed".into()));
        };
        trace!(bytes = packet.len(), "queue -> device");
        device.write_all(&packet).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queue_delivers_in_order() {
        let q = PacketQueue::new();
        q.push(vec![1]);
        q.push(vec![2]);
        assert_eq!(q.pop().await, Some(vec![1]));
        assert_eq!(q.pop().await, Some(vec![2]));
        assert!(q.try_pop().is_none());
    }

    #[tokio::test]
    async fn each_packet_goes_to_exactly_one_consumer() {
        let q = PacketQueue::new();
        for i in 0..100u8 {
            q.push(vec![i]);
        }
        let a = q.clone();
        let b = q.clone();
        let consume = |q: PacketQueue| async move {
            let mut got = Vec::new();
            while let Some(p) = q.try_pop() {
                got.push(p[0]);
            }
            got
        };
        let (got_a, got_b) = tokio::join!(consume(a), consume(b));
        let mut all: Vec<u8> = got_a.into_iter().chain(got_b).collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn device_packets_dropped_at_zero_connections() {
        let (client, mut server) = tokio::io::duplex(4096);
        let outbound = PacketQueue::new();
        let counter = ConnectionCounter::new();
        let (read_half, _write_half) = tokio::io::split(client);

        let pump = tokio::spawn(device_to_net(
            read_half,
            outbound.clone(),
            vec![counter.clone()],
        ));

        server.write_all(b"dropped").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(outbound.try_pop().is_none());

        // One connection up and the next packet flows.
        counter.increment();
        server.write_all(b"carried").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(outbound.try_pop(), Some(b"carried".to_vec()));

        pump.abort();
    }

    #[tokio::test]
    async fn large_device_reads_are_not_truncated() {
        let (client, mut server) = tokio::io::duplex(16384);
        let outbound = PacketQueue::new();
        let counter = ConnectionCounter::new();
        counter.increment();
        let (read_half, _write_half) = tokio::io::split(client);
        let pump = tokio::spawn(device_to_net(read_half, outbound.clone(), vec![counter]));

        // Well past any plausible interface MTU.
        let packet = vec![0x5au8; 9000];
        server.write_all(&packet).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(outbound.try_pop(), Some(packet));
        pump.abort();
    }

    #[tokio::test]
    async fn inbound_packets_reach_the_device() {
        let (client, server) = tokio::io::duplex(4096);
        let inbound = PacketQueue::new();
        let (_read_half, write_half) = tokio::io::split(client);
        let (mut server_read, _server_write) = tokio::io::split(server);

        let pump = tokio::spawn(net_to_device(write_half, inbound.clone()));
        inbound.push(b"packet".to_vec());

        let mut buf = [0u8; 6];
        server_read.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"packet");
        pump.abort();
    }
}
