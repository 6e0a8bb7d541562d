//! Per-connection protocol state machine.
//!
//! A session owns one established connection end-to-end. After the
//! transport-specific handshake (`INITIALIZING`, performed by the
//! connection manager while building the link), the session enters
//! `STREAMING`: a supervised group of concurrent tasks moving packets
//! between the shared queues and the wire, heartbeating, and watching
//! liveness. The first task to fault cancels all of its siblings, the
//! session returns the fault (`TERMINATED`), and the connection manager
//! decides whether to redial.

pub mod link;

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::core::TunnelSettings;
use crate::core::constants::{LIVENESS_CHECK_INTERVAL, PADDING_REFRESH_INTERVAL, REPLAY_SWEEP_INTERVAL};
use crate::core::error::{CryptoError, SessionError};
use crate::crypto::{CryptoEngine, RecordPadder, ReplayGuard, SharedSecret};
use crate::mux::PacketQueue;
use crate::protocol::{Frame, unix_now};

pub use link::{LinkIdentity, RecordSink, RecordSource};

/// Records in flight between the session's producing tasks and the single
/// writer that owns the sink.
const OUTGOING_RECORD_BACKLOG: usize = 32;

/// Heartbeat bookkeeping for one session.
///
/// `watermark` only ever increases; `peer_authenticated` transitions
/// false→true once and never reverts while the session lives.
struct HeartbeatState {
    watermark: f64,
    peer_authenticated: bool,
}

/// State shared by the session's concurrent tasks.
struct SessionState {
    id: u64,
    identity: LinkIdentity,
    settings: TunnelSettings,
    engine: CryptoEngine,
    padder: Mutex<RecordPadder>,
    heartbeat: Mutex<HeartbeatState>,
}

impl SessionState {
    /// Pad and encrypt one frame into a wire-ready encrypted record.
    async fn seal(&self, frame: &Frame) -> Result<Vec<u8>, CryptoError> {
        let padded = self.padder.lock().await.pad(&frame.encode())?;
        self.engine.encrypt(&padded)
    }
}

/// The protocol state machine for one established connection.
pub struct Session<S, R> {
    state: Arc<SessionState>,
    sink: S,
    source: R,
    outbound: PacketQueue,
    inbound: PacketQueue,
}

impl<S: RecordSink, R: RecordSource> Session<S, R> {
    /// Build a session over an established link.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        identity: LinkIdentity,
        secret: &SharedSecret,
        settings: TunnelSettings,
        sink: S,
        source: R,
        outbound: PacketQueue,
        inbound: PacketQueue,
    ) -> Self {
        let padder = RecordPadder::new(
            settings.padding_target,
            ReplayGuard::new(settings.replay_window),
        );
        Self {
            state: Arc::new(SessionState {
                id,
                identity,
                settings,
                engine: CryptoEngine::new(secret),
                padder: Mutex::new(padder),
                heartbeat: Mutex::new(HeartbeatState {
                    watermark: unix_now(),
                    peer_authenticated: false,
                }),
            }),
            sink,
            source,
            outbound,
            inbound,
        }
    }

    /// Run the session to termination.
    ///
    /// Spawns the sender, receiver, heartbeat, liveness, and maintenance
    /// tasks as one cancellation group and returns the first fault. By the
    /// time this returns, every sub-task has been cancelled and the
    /// underlying connection halves dropped.
    pub async fn run(self) -> Result<(), SessionError> {
        let Session {
            state,
            sink,
            source,
            outbound,
            inbound,
        } = self;

        let (record_tx, record_rx) = mpsc::channel(OUTGOING_RECORD_BACKLOG);

        let mut tasks: JoinSet<Result<(), SessionError>> = JoinSet::new();
        tasks.spawn(write_loop(sink, record_rx));
        tasks.spawn(data_send_loop(state.clone(), outbound, record_tx.clone()));
        tasks.spawn(heartbeat_loop(state.clone(), record_tx));
        tasks.spawn(recv_loop(state.clone(), source, inbound));
        tasks.spawn(liveness_loop(state.clone()));
        tasks.spawn(maintenance_loop(state.clone()));

        // First sub-task to finish decides the session's outcome; the
        // siblings are cancelled as a group.
        let outcome = match tasks.join_next().await {
            Some(Ok(result)) => result,
            Some(Err(_)) | None => Err(SessionError::ConnectionClosed),
        };
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}

        debug!(conn = state.id, "session terminated");
        outcome
    }
}

/// Sole owner of the sink: serializes records from all producing tasks.
async fn write_loop<S: RecordSink>(
    mut sink: S,
    mut record_rx: mpsc::Receiver<Vec<u8>>,
) -> Result<(), SessionError> {
    while let Some(record) = record_rx.recv().await {
        sink.send(record).await?;
    }
    Err(SessionError::ConnectionClosed)
}

/// Dequeues outbound packets, seals them as data frames, hands them to the
/// writer. Strictly in dequeue order.
async fn data_send_loop(
    state: Arc<SessionState>,
    outbound: PacketQueue,
    record_tx: mpsc::Sender<Vec<u8>>,
) -> Result<(), SessionError> {
    loop {
        let Some(packet) = outbound.pop().await else {
            return Err(SessionError::ConnectionClosed);
        };
        let len = packet.len();
        match state.seal(&Frame::Data(packet)).await {
            Ok(record) => {
                record_tx
                    .send(record)
                    .await
                    .map_err(|_| SessionError::ConnectionClosed)?;
                debug!(conn = state.id, bytes = len, "packet -> wire");
            }
            // Packer refused the frame; drop it and keep the session.
            Err(e) => debug!(conn = state.id, "dropping outbound packet: {e}"),
        }
    }
}

/// Announces our identity and clock on a fixed interval.
async fn heartbeat_loop(
    state: Arc<SessionState>,
    record_tx: mpsc::Sender<Vec<u8>>,
) -> Result<(), SessionError> {
    let mut ticker = tokio::time::interval(state.settings.heartbeat_interval);
    loop {
        ticker.tick().await;
        let frame = Frame::heartbeat(&state.identity.local_id);
        match state.seal(&frame).await {
            Ok(record) => record_tx
                .send(record)
                .await
                .map_err(|_| SessionError::ConnectionClosed)?,
            Err(e) => debug!(conn = state.id, "dropping heartbeat: {e}"),
        }
    }
}

/// Receives records, runs the per-record pipeline, and delivers authorized
/// data frames to the inbound queue.
async fn recv_loop(
    state: Arc<SessionState>,
    mut source: impl RecordSource,
    inbound: PacketQueue,
) -> Result<(), SessionError> {
    loop {
        let record = source.recv().await?;
        handle_record(&state, &inbound, &record).await;
    }
}

/// Per-record pipeline: decrypt, unpad, decode, dispatch. Every failure
/// here drops the single record and nothing else.
async fn handle_record(state: &SessionState, inbound: &PacketQueue, record: &[u8]) {
    let plaintext = match state.engine.decrypt(record) {
        Ok(p) => p,
        Err(_) => {
            debug!(conn = state.id, "dropping record: authentication failed");
            return;
        }
    };

    let body = match state.padder.lock().await.unpad(&plaintext) {
        Ok(b) => b,
        Err(CryptoError::ReplayDetected) => {
            warn!(conn = state.id, "replay attack or unexpected nonce reuse, record dropped");
            return;
        }
        Err(e) => {
            debug!(conn = state.id, "dropping record: {e}");
            return;
        }
    };

    match Frame::decode(&body) {
        Some(Frame::Data(payload)) => {
            let authenticated = state.heartbeat.lock().await.peer_authenticated;
            if authenticated {
                debug!(conn = state.id, bytes = payload.len(), "wire -> packet");
                inbound.push(payload);
            } else {
                debug!(conn = state.id, "dropping packet: peer not yet authenticated");
            }
        }
        Some(Frame::Heartbeat { peer_id, timestamp }) => {
            heartbeat_received(state, &peer_id, timestamp).await;
        }
        None => debug!(conn = state.id, "dropping unrecognized frame"),
    }
}

/// Validate a peer heartbeat and advance the liveness watermark.
async fn heartbeat_received(state: &SessionState, peer_id: &str, timestamp: f64) {
    if peer_id != state.identity.peer_id {
        warn!(conn = state.id, "heartbeat with foreign identity ignored");
        return;
    }
    if timestamp > unix_now() + state.settings.timediff_tolerance.as_secs_f64() {
        warn!(conn = state.id, "heartbeat from the future ignored");
        return;
    }

    let mut hb = state.heartbeat.lock().await;
    hb.watermark = hb.watermark.max(timestamp);
    if !hb.peer_authenticated {
        hb.peer_authenticated = true;
        info!(conn = state.id, "peer authenticated, forwarding enabled");
    }
}

/// Declares the session dead after too long without a valid heartbeat.
async fn liveness_loop(state: Arc<SessionState>) -> Result<(), SessionError> {
    // Check at least as often as the timeout can expire.
    let period = LIVENESS_CHECK_INTERVAL.min(state.settings.liveness_timeout);
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await; // first tick fires immediately
    loop {
        ticker.tick().await;
        let watermark = state.heartbeat.lock().await.watermark;
        if unix_now() - watermark > state.settings.liveness_timeout.as_secs_f64() {
            return Err(SessionError::LivenessTimeout(state.id));
        }
    }
}

/// Periodic hygiene: refresh the padding template, sweep replay state.
async fn maintenance_loop(state: Arc<SessionState>) -> Result<(), SessionError> {
    let mut refresh = tokio::time::interval(PADDING_REFRESH_INTERVAL);
    let mut sweep = tokio::time::interval(REPLAY_SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = refresh.tick() => state.padder.lock().await.refresh_template(),
            _ = sweep.tick() => state.padder.lock().await.sweep_replay(),
        }
    }
}
