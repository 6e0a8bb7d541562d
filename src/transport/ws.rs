//! WebSocket transport.
//!
//! One encrypted record per binary message, no extra framing. The client
//! appends a random token to the request path; both sides hash the query
//! string into a shared connection identity, so heartbeats prove the peer
//! saw the same handshake.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rand::RngCore;
use sha2::{Digest, Sha512};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::{WebSocketStream, accept_hdr_async, connect_async};
use tracing::{debug, info, warn};

use super::SessionShared;
use crate::core::constants::{RECONNECT_DELAY, STREAM_NONCE_SIZE};
use crate::core::error::{SessionError, TunnelError};
use crate::session::{LinkIdentity, RecordSink, RecordSource, Session};

/// Sending half of a WebSocket link.
pub(crate) struct WsRecordSink<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

impl<S> RecordSink for WsRecordSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, record: Vec<u8>) -> Result<(), SessionError> {
        self.sink.send(Message::Binary(record)).await?;
        Ok(())
    }
}

/// Receiving half of a WebSocket link. Control frames are handled by the
/// protocol layer; anything that is not a binary message is skipped.
pub(crate) struct WsRecordSource<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

impl<S> RecordSource for WsRecordSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn recv(&mut self) -> Result<Vec<u8>, SessionError> {
        loop {
            match self.stream.next().await {
                None => return Err(SessionError::ConnectionClosed),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(Message::Binary(record))) => return Ok(record),
                Some(Ok(Message::Close(_))) => return Err(SessionError::ConnectionClosed),
                Some(Ok(_)) => continue,
            }
        }
    }
}

/// Derive the shared connection identity from a request path.
///
/// The identity is the hex SHA-512 of the query string, '?' included, so
/// both ends compute the same value from what went over the handshake.
fn identity_from_path(path: &str) -> Option<LinkIdentity> {
    let query_start = path.find('?')?;
    let digest = Sha512::digest(path[query_start..].as_bytes());
    Some(LinkIdentity::symmetric(hex::encode(digest)))
}

/// Loggable abbreviation of a connection identity.
fn short_id(id: &str) -> &str {
    id.get(..16).unwrap_or(id)
}

/// Run one session over an accepted or dialed WebSocket.
async fn serve<S>(ws: WebSocketStream<S>, identity: LinkIdentity, shared: &SessionShared)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let id = shared.ctx.ids.next_id();
    info!(conn = id, link = short_id(&identity.peer_id), "websocket connection established");

    let (sink, stream) = ws.split();
    let session = Session::new(
        id,
        identity,
        &shared.secret,
        shared.settings,
        WsRecordSink { sink },
        WsRecordSource { stream },
        shared.ctx.outbound.clone(),
        shared.ctx.inbound.clone(),
    );
    shared.counter.increment();
    match session.run().await {
        Ok(()) => info!(conn = id, "websocket connection closed"),
        Err(e) => warn!(conn = id, "websocket connection lost: {e}"),
    }
    shared.counter.decrement();
}

/// Dial `url` with a fresh identity token, redialing after a fixed delay.
pub(crate) async fn run_client(url: String, shared: SessionShared) -> Result<(), TunnelError> {
    loop {
        let mut token = [0u8; STREAM_NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut token);
        let dial_url = if url.contains('?') {
            format!("{url}&_={}", hex::encode(token))
        } else {
            format!("{url}?_={}", hex::encode(token))
        };

        match connect_async(dial_url.as_str()).await {
            Ok((ws, _response)) => match identity_from_path(&dial_url) {
                Some(identity) => serve(ws, identity, &shared).await,
                None => warn!(%url, "dial url lost its query string"),
            },
            Err(e) => warn!(%url, "websocket dial failed: {e}"),
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

/// Accept WebSocket connections on `addr`, one session task per peer.
///
/// Handshakes without a query string carry no identity material and are
/// dropped before a session is built.
pub(crate) async fn run_server(addr: String, shared: SessionShared) -> Result<(), TunnelError> {
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| TunnelError::BindFailed {
            addr: addr.clone(),
            source,
        })?;
    info!(%addr, "websocket listener ready");

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "websocket peer connected");
                let shared = shared.clone();
                tokio::spawn(async move {
                    let mut path = String::new();
                    let callback = |req: &Request, resp: Response| {
                        path = req.uri().to_string();
                        Ok(resp)
                    };
                    let ws = match accept_hdr_async(stream, callback).await {
                        Ok(ws) => ws,
                        Err(e) => {
                            warn!(%peer, "websocket handshake failed: {e}");
                            return;
                        }
                    };
                    match identity_from_path(&path) {
                        Some(identity) => serve(ws, identity, &shared).await,
                        None => warn!(%peer, "request without identity token rejected"),
                    }
                });
            }
            Err(e) => {
                warn!(%addr, "websocket accept failed: {e}");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_shared_across_url_forms() {
        // Client hashes the full dial url, server hashes the request path;
        // both start at the query string.
        let client = identity_from_path("ws://198.51.100.7:8080/tun?_=deadbeef").unwrap();
        let server = identity_from_path("/tun?_=deadbeef").unwrap();
        assert_eq!(client.local_id, server.local_id);
        assert_eq!(client.local_id, client.peer_id);
    }

    #[test]
    fn identity_requires_a_query() {
        assert!(identity_from_path("/tun").is_none());
    }

    #[test]
    fn distinct_tokens_give_distinct_identities() {
        let a = identity_from_path("/tun?_=aaaa").unwrap();
        let b = identity_from_path("/tun?_=bbbb").unwrap();
        assert_ne!(a.local_id, b.local_id);
    }

    #[test]
    fn short_id_handles_any_length() {
        let full = identity_from_path("/tun?_=deadbeef").unwrap();
        assert_eq!(short_id(&full.peer_id).len(), 16);
        assert_eq!(short_id("brief"), "brief");
        assert_eq!(short_id(""), "");
    }
}
