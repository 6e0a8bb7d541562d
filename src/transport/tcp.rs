//! Raw TCP transport.
//!
//! The handshake exchanges one random stream nonce per direction in the
//! clear; each direction is then obfuscated with a keystream cipher derived
//! from the shared secret and that direction's nonce, and carries
//! base64-delimited encrypted records. The nonce each side sent doubles as
//! its heartbeat identity.

use std::collections::VecDeque;
use std::time::Duration;

use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use super::SessionShared;
use crate::core::constants::{RECONNECT_DELAY, STREAM_NONCE_SIZE, STREAM_READ_CHUNK};
use crate::core::error::{SessionError, TunnelError};
use crate::crypto::KeystreamCipher;
use crate::protocol::{RecordSplitter, encode_record};
use crate::session::{LinkIdentity, RecordSink, RecordSource, Session};

/// Sending half of an established TCP link.
pub(crate) struct TcpRecordSink {
    writer: OwnedWriteHalf,
    cipher: KeystreamCipher,
}

impl RecordSink for TcpRecordSink {
    async fn send(&mut self, record: Vec<u8>) -> Result<(), SessionError> {
        let mut wire = encode_record(&record);
        self.cipher.apply(&mut wire);
        self.writer.write_all(&wire).await?;
        Ok(())
    }
}

/// Receiving half of an established TCP link.
pub(crate) struct TcpRecordSource {
    reader: OwnedReadHalf,
    cipher: KeystreamCipher,
    splitter: RecordSplitter,
    pending: VecDeque<Vec<u8>>,
}

impl RecordSource for TcpRecordSource {
    async fn recv(&mut self) -> Result<Vec<u8>, SessionError> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Ok(record);
            }
            let mut chunk = [0u8; STREAM_READ_CHUNK];
            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                return Err(SessionError::ConnectionClosed);
            }
            self.cipher.apply(&mut chunk[..n]);
            self.pending.extend(self.splitter.push(&chunk[..n]));
        }
    }
}

/// Exchange stream nonces and derive the per-direction ciphers.
///
/// Each side keys its sending cipher with the nonce it sent and its
/// receiving cipher with the nonce it read, so the two directions never
/// share a keystream.
async fn establish(
    mut stream: TcpStream,
    shared: &SessionShared,
) -> Result<(LinkIdentity, TcpRecordSink, TcpRecordSource), SessionError> {
    let mut local_nonce = [0u8; STREAM_NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut local_nonce);

    stream.write_all(&local_nonce).await?;
    let mut peer_nonce = [0u8; STREAM_NONCE_SIZE];
    stream.read_exact(&mut peer_nonce).await?;

    let identity = LinkIdentity {
        local_id: hex::encode(local_nonce),
        peer_id: hex::encode(peer_nonce),
    };
    let (reader, writer) = stream.into_split();
    let sink = TcpRecordSink {
        writer,
        cipher: KeystreamCipher::derive(&shared.secret, &local_nonce),
    };
    let source = TcpRecordSource {
        reader,
        cipher: KeystreamCipher::derive(&shared.secret, &peer_nonce),
        splitter: RecordSplitter::new(),
        pending: VecDeque::new(),
    };
    Ok((identity, sink, source))
}

/// Run one session over an established stream, keeping the counter honest.
async fn serve(stream: TcpStream, shared: &SessionShared) {
    let id = shared.ctx.ids.next_id();
    let (identity, sink, source) = match establish(stream, shared).await {
        Ok(parts) => parts,
        Err(e) => {
            warn!(conn = id, "tcp handshake failed: {e}");
            return;
        }
    };
    info!(conn = id, peer = %identity.peer_id, "tcp connection established");

    let session = Session::new(
        id,
        identity,
        &shared.secret,
        shared.settings,
        sink,
        source,
        shared.ctx.outbound.clone(),
        shared.ctx.inbound.clone(),
    );
    shared.counter.increment();
    match session.run().await {
        Ok(()) => info!(conn = id, "tcp connection closed"),
        Err(e) => warn!(conn = id, "tcp connection lost: {e}"),
    }
    shared.counter.decrement();
}

/// Dial `addr`, run the session to termination, redial after a fixed delay.
pub(crate) async fn run_client(addr: String, shared: SessionShared) -> Result<(), TunnelError> {
    loop {
        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("set_nodelay failed: {e}");
                }
                serve(stream, &shared).await;
            }
            Err(e) => warn!(%addr, "tcp dial failed: {e}"),
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

/// Accept connections on `addr`, one session task per peer.
pub(crate) async fn run_server(addr: String, shared: SessionShared) -> Result<(), TunnelError> {
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| TunnelError::BindFailed {
            addr: addr.clone(),
            source,
        })?;
    info!(%addr, "tcp listener ready");

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "tcp peer connected");
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("set_nodelay failed: {e}");
                }
                let shared = shared.clone();
                tokio::spawn(async move { serve(stream, &shared).await });
            }
            Err(e) => {
                warn!(%addr, "tcp accept failed: {e}");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TunnelSettings;
    use crate::crypto::SharedSecret;
    use crate::mux::PacketQueue;
    use crate::transport::{ConnectionCounter, ConnectionIdGen, TransportContext};

    fn shared() -> SessionShared {
        shared_with(TunnelSettings::default())
    }

    fn shared_with(settings: TunnelSettings) -> SessionShared {
        SessionShared {
            secret: SharedSecret::new("tcp test secret"),
            settings,
            counter: ConnectionCounter::new(),
            ctx: TransportContext {
                outbound: PacketQueue::new(),
                inbound: PacketQueue::new(),
                ids: ConnectionIdGen::new(),
            },
        }
    }

    async fn wait_for_count(counter: &ConnectionCounter, want: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while counter.get() != want {
            assert!(
                tokio::time::Instant::now() < deadline,
                "counter never reached {want}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn handshake_exchanges_identities() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared_a = shared();
        let shared_b = shared();

        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            establish(stream, &shared_b).await.unwrap()
        });
        let stream = TcpStream::connect(addr).await.unwrap();
        let (client_identity, _, _) = establish(stream, &shared_a).await.unwrap();
        let (server_identity, _, _) = accept.await.unwrap();

        // Each side's local identity is the other side's peer identity.
        assert_eq!(client_identity.local_id, server_identity.peer_id);
        assert_eq!(client_identity.peer_id, server_identity.local_id);
        assert_ne!(client_identity.local_id, client_identity.peer_id);
    }

    #[tokio::test]
    async fn records_survive_the_obfuscated_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared_a = shared();
        let shared_b = shared();

        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            establish(stream, &shared_b).await.unwrap()
        });
        let stream = TcpStream::connect(addr).await.unwrap();
        let (_, mut client_sink, _) = establish(stream, &shared_a).await.unwrap();
        let (_, _, mut server_source) = accept.await.unwrap();

        client_sink.send(b"first encrypted record".to_vec()).await.unwrap();
        client_sink.send(b"second".to_vec()).await.unwrap();
        assert_eq!(server_source.recv().await.unwrap(), b"first encrypted record");
        assert_eq!(server_source.recv().await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn counter_returns_to_zero_after_liveness_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = shared_with(TunnelSettings {
            liveness_timeout: Duration::from_millis(300),
            ..TunnelSettings::default()
        });
        let counter = shared.counter.clone();
        assert_eq!(counter.get(), 0);

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            serve(stream, &shared).await;
        });

        // A peer that completes the nonce exchange and then goes silent.
        let mut peer = TcpStream::connect(addr).await.unwrap();
        let nonce = [3u8; STREAM_NONCE_SIZE];
        peer.write_all(&nonce).await.unwrap();
        let mut server_nonce = [0u8; STREAM_NONCE_SIZE];
        peer.read_exact(&mut server_nonce).await.unwrap();

        // Established: the session counts itself in.
        wait_for_count(&counter, 1).await;
        // No heartbeats ever arrive, so liveness tears the session down
        // and the count comes back.
        wait_for_count(&counter, 0).await;
        drop(peer);
    }

    #[tokio::test]
    async fn counter_returns_to_zero_when_the_peer_hangs_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = shared();
        let counter = shared.counter.clone();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            serve(stream, &shared).await;
        });

        let mut peer = TcpStream::connect(addr).await.unwrap();
        let nonce = [4u8; STREAM_NONCE_SIZE];
        peer.write_all(&nonce).await.unwrap();
        let mut server_nonce = [0u8; STREAM_NONCE_SIZE];
        peer.read_exact(&mut server_nonce).await.unwrap();
        wait_for_count(&counter, 1).await;

        drop(peer);
        wait_for_count(&counter, 0).await;
    }

    #[tokio::test]
    async fn closed_stream_reports_connection_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared_a = shared();
        let shared_b = shared();

        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            establish(stream, &shared_b).await.unwrap()
        });
        let stream = TcpStream::connect(addr).await.unwrap();
        let (_, client_sink, _) = establish(stream, &shared_a).await.unwrap();
        let (_, _, mut server_source) = accept.await.unwrap();

        drop(client_sink);
        assert!(matches!(
            server_source.recv().await,
            Err(SessionError::ConnectionClosed)
        ));
    }
}
