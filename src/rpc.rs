/// Chain client: connect to a node and fetch the facts a probe run needs.
///
/// `Connector` and `ChainClient` are the seam the stall detector works
/// against. `WsConnector` implements them over a websocket JSON-RPC 2.0
/// connection; requests are multiplexed by id so the snapshot queries can be
/// in flight at the same time.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream, WebSocketStream};

use crate::networks::TypeRegistry;

/// Chain facts gathered in one probe run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSnapshot {
    pub best_block: u64,
    pub peer_count: u64,
    /// Best block reported by each connected peer. `None` when the client
    /// was configured not to collect per-peer heights.
    pub peer_best_blocks: Option<Vec<u64>>,
    pub pending_extrinsics: u64,
    pub is_healthy: bool,
}

/// Settings handed to the collaborator at connect time.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub types: TypeRegistry,
    /// Request the peer list so per-peer best blocks are available.
    pub peer_heights: bool,
}

/// Errors from the chain client.
#[derive(Debug)]
pub enum RpcError {
    /// The websocket handshake failed.
    Connect {
        url: String,
        source: tungstenite::Error,
    },
    /// A request frame could not be written.
    Send { source: tungstenite::Error },
    /// The connection went away before a response arrived.
    Closed,
    /// The node answered with a JSON-RPC error object.
    Rpc {
        method: &'static str,
        code: i64,
        message: String,
    },
    /// The response did not have the expected shape.
    Decode {
        method: &'static str,
        source: serde_json::Error,
    },
    /// A block number field was not valid hex.
    InvalidNumber { method: &'static str, value: String },
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Connect { url, source } => {
                write!(f, "failed to connect to {}: {}", url, source)
            }
            RpcError::Send { source } => write!(f, "failed to send request: {}", source),
            RpcError::Closed => write!(f, "connection closed before response"),
            RpcError::Rpc {
                method,
                code,
                message,
            } => write!(f, "{} returned error {}: {}", method, code, message),
            RpcError::Decode { method, source } => {
                write!(f, "failed to decode {} response: {}", method, source)
            }
            RpcError::InvalidNumber { method, value } => {
                write!(f, "{} returned invalid block number {:?}", method, value)
            }
        }
    }
}

impl std::error::Error for RpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RpcError::Connect { source, .. } => Some(source),
            RpcError::Send { source } => Some(source),
            RpcError::Decode { source, .. } => Some(source),
            RpcError::Closed | RpcError::Rpc { .. } | RpcError::InvalidNumber { .. } => None,
        }
    }
}

/// Establishes a connection to a node.
pub trait Connector {
    type Client: ChainClient;

    async fn connect(&self, url: &str, config: &ClientConfig) -> Result<Self::Client, RpcError>;
}

/// A connected node that can report a snapshot of its view of the chain.
pub trait ChainClient {
    async fn fetch_snapshot(&self) -> Result<ChainSnapshot, RpcError>;
}

// --- Wire types ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeerInfo {
    best_number: u64,
}

#[derive(Debug, Deserialize)]
struct Header {
    number: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    peers: u64,
    is_syncing: bool,
    should_have_peers: bool,
}

impl Health {
    fn is_healthy(&self) -> bool {
        !self.is_syncing && (self.peers > 0 || !self.should_have_peers)
    }
}

#[derive(Debug, Deserialize)]
struct ErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Response {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<ErrorObject>,
}

/// Parse a `0x`-prefixed hex block number.
fn parse_block_number(method: &'static str, raw: &str) -> Result<u64, RpcError> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    u64::from_str_radix(digits, 16).map_err(|_| RpcError::InvalidNumber {
        method,
        value: raw.to_string(),
    })
}

// --- Websocket implementation ---

/// Connects over `ws://` using tokio-tungstenite.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

type Reply = oneshot::Sender<Result<Value, RpcError>>;

struct Outgoing {
    id: u64,
    method: &'static str,
    reply: Reply,
}

/// JSON-RPC client over a single websocket connection.
///
/// A background task owns the socket: it writes queued requests and routes
/// responses back to their waiters by id. Dropping the client closes the
/// connection.
pub struct WsChainClient {
    requests: mpsc::UnboundedSender<Outgoing>,
    next_id: AtomicU64,
    peer_heights: bool,
}

impl Connector for WsConnector {
    type Client = WsChainClient;

    async fn connect(&self, url: &str, config: &ClientConfig) -> Result<Self::Client, RpcError> {
        tracing::debug!(
            url,
            aliases = config.types.len(),
            "registering type aliases with client"
        );

        let (stream, _) = connect_async(url).await.map_err(|e| RpcError::Connect {
            url: url.to_string(),
            source: e,
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(drive(stream, rx));

        Ok(WsChainClient {
            requests: tx,
            next_id: AtomicU64::new(1),
            peer_heights: config.peer_heights,
        })
    }
}

/// Socket loop: forward requests, dispatch responses, fail waiters on close.
async fn drive(
    mut stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut requests: mpsc::UnboundedReceiver<Outgoing>,
) {
    let mut pending: HashMap<u64, (&'static str, Reply)> = HashMap::new();

    loop {
        tokio::select! {
            out = requests.recv() => {
                let Some(Outgoing { id, method, reply }) = out else {
                    let _ = stream.close(None).await;
                    return;
                };
                let body = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "method": method,
                    "params": [],
                });
                tracing::trace!(id, method, "sending request");
                match stream.send(tungstenite::Message::Text(body.to_string())).await {
                    Ok(()) => {
                        pending.insert(id, (method, reply));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(RpcError::Send { source: e }));
                    }
                }
            }
            msg = stream.next() => {
                let text = match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => text,
                    Some(Ok(tungstenite::Message::Binary(bin))) => {
                        String::from_utf8_lossy(&bin).into_owned()
                    }
                    Some(Ok(_)) => continue,
                    None | Some(Err(_)) => break,
                };
                dispatch(&text, &mut pending);
            }
        }
    }

    tracing::debug!(waiting = pending.len(), "websocket closed");
    for (_, (_, reply)) in pending.drain() {
        let _ = reply.send(Err(RpcError::Closed));
    }
}

fn dispatch(text: &str, pending: &mut HashMap<u64, (&'static str, Reply)>) {
    let response: Response = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring unparseable frame");
            return;
        }
    };
    let Some((method, reply)) = response.id.and_then(|id| pending.remove(&id)) else {
        tracing::debug!(id = ?response.id, "ignoring frame with no matching request");
        return;
    };

    let result = match response.error {
        Some(err) => Err(RpcError::Rpc {
            method,
            code: err.code,
            message: err.message,
        }),
        None => Ok(response.result.unwrap_or(Value::Null)),
    };
    let _ = reply.send(result);
}

impl WsChainClient {
    async fn request<T: DeserializeOwned>(&self, method: &'static str) -> Result<T, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Outgoing { id, method, reply })
            .map_err(|_| RpcError::Closed)?;

        let value = rx.await.map_err(|_| RpcError::Closed)??;
        serde_json::from_value(value).map_err(|e| RpcError::Decode { method, source: e })
    }

    async fn best_block(&self) -> Result<u64, RpcError> {
        let header: Header = self.request("chain_getHeader").await?;
        parse_block_number("chain_getHeader", &header.number)
    }

    async fn pending_extrinsics(&self) -> Result<u64, RpcError> {
        let pending: Vec<Value> = self.request("author_pendingExtrinsics").await?;
        Ok(pending.len() as u64)
    }
}

impl ChainClient for WsChainClient {
    async fn fetch_snapshot(&self) -> Result<ChainSnapshot, RpcError> {
        if self.peer_heights {
            let (peers, best_block, pending_extrinsics, health) = tokio::try_join!(
                self.request::<Vec<PeerInfo>>("system_peers"),
                self.best_block(),
                self.pending_extrinsics(),
                self.request::<Health>("system_health"),
            )?;
            Ok(ChainSnapshot {
                best_block,
                peer_count: peers.len() as u64,
                peer_best_blocks: Some(peers.iter().map(|p| p.best_number).collect()),
                pending_extrinsics,
                is_healthy: health.is_healthy(),
            })
        } else {
            let (best_block, pending_extrinsics, health) = tokio::try_join!(
                self.best_block(),
                self.pending_extrinsics(),
                self.request::<Health>("system_health"),
            )?;
            Ok(ChainSnapshot {
                best_block,
                peer_count: health.peers,
                peer_best_blocks: None,
                pending_extrinsics,
                is_healthy: health.is_healthy(),
            })
        }
    }
}
