/// Stall detection: one bounded connect, one snapshot, one verdict.
///
/// A run initializes the last-block file, races the connect against a
/// one-shot timer, fetches a snapshot and decides:
///
/// - no peers: the node is isolated and its view of the chain can't be trusted
/// - a strict majority of peers more than `ahead_margin` blocks ahead and the
///   best block unchanged since the last recorded value: stalled
/// - otherwise healthy, recording the best block when peers were ahead
///
/// A stalled run leaves the last-block file untouched so the next run keeps
/// comparing against the same stale value.
use std::time::Duration;

use crate::rpc::{ChainClient, ChainSnapshot, ClientConfig, Connector, RpcError};
use crate::state::{LastBlockFile, StateError};

/// Final result of a probe run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Healthy,
    Stalled,
    NoPeers,
    ConnectionTimeout,
    /// The connect attempt failed outright before the deadline.
    ConnectionFailed,
}

impl Outcome {
    /// Process exit status: 0 for healthy, 1 for every "node is down" verdict.
    pub fn exit_code(self) -> u8 {
        match self {
            Outcome::Healthy => 0,
            Outcome::Stalled
            | Outcome::NoPeers
            | Outcome::ConnectionTimeout
            | Outcome::ConnectionFailed => 1,
        }
    }
}

/// Failures that abort a run without a verdict.
#[derive(Debug)]
pub enum DetectorError {
    Rpc(RpcError),
    State(StateError),
}

impl std::fmt::Display for DetectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectorError::Rpc(e) => write!(f, "fetching chain snapshot: {}", e),
            DetectorError::State(e) => write!(f, "last-block state: {}", e),
        }
    }
}

impl std::error::Error for DetectorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DetectorError::Rpc(e) => Some(e),
            DetectorError::State(e) => Some(e),
        }
    }
}

impl From<RpcError> for DetectorError {
    fn from(e: RpcError) -> Self {
        DetectorError::Rpc(e)
    }
}

impl From<StateError> for DetectorError {
    fn from(e: StateError) -> Self {
        DetectorError::State(e)
    }
}

/// Count peers whose best block is more than `margin` blocks past ours.
pub fn count_peers_ahead(best_block: u64, peer_best_blocks: &[u64], margin: u64) -> u64 {
    let threshold = best_block.saturating_add(margin);
    peer_best_blocks.iter().filter(|&&b| b > threshold).count() as u64
}

/// Strict majority: more than half of all peers.
pub fn majority_ahead(peers_ahead: u64, peer_count: u64) -> bool {
    peers_ahead.saturating_mul(2) > peer_count
}

/// What the snapshot alone says, before consulting the last-block file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assessment {
    NoPeers,
    /// No majority of peers ahead, or per-peer heights were not collected.
    InSync,
    /// A majority of peers is ahead; the last recorded block decides.
    Behind { peers_ahead: u64 },
}

/// Decision policy shared by both probe variants: with per-peer heights the
/// majority-ahead check runs, without them only the no-peers check does.
#[derive(Debug, Clone, Copy)]
pub struct StallPolicy {
    pub ahead_margin: u64,
}

impl Default for StallPolicy {
    fn default() -> Self {
        Self { ahead_margin: 10 }
    }
}

impl StallPolicy {
    pub fn assess(&self, snapshot: &ChainSnapshot) -> Assessment {
        if snapshot.peer_count == 0 {
            return Assessment::NoPeers;
        }

        let Some(peers) = snapshot.peer_best_blocks.as_deref() else {
            return Assessment::InSync;
        };

        let peers_ahead = count_peers_ahead(snapshot.best_block, peers, self.ahead_margin);
        if majority_ahead(peers_ahead, snapshot.peer_count) {
            Assessment::Behind { peers_ahead }
        } else {
            Assessment::InSync
        }
    }
}

/// Owns the last-block file and runs the full probe against a connector.
pub struct StallDetector<C> {
    connector: C,
    state: LastBlockFile,
    connect_timeout: Duration,
    policy: StallPolicy,
}

impl<C: Connector> StallDetector<C> {
    pub fn new(
        connector: C,
        state: LastBlockFile,
        connect_timeout: Duration,
        policy: StallPolicy,
    ) -> Self {
        Self {
            connector,
            state,
            connect_timeout,
            policy,
        }
    }

    /// Run one probe against `url`.
    pub async fn run(&self, url: &str, config: &ClientConfig) -> Result<Outcome, DetectorError> {
        self.state.ensure_initialized();

        tracing::info!(url, state = %self.state.path().display(), "connecting to node");
        // Whichever branch finishes first decides; the other future is
        // dropped, so a late connect can never follow a timeout.
        let client = tokio::select! {
            connected = self.connector.connect(url, config) => match connected {
                Ok(client) => client,
                Err(e) => {
                    tracing::warn!(error = %e, "connection failed");
                    return Ok(Outcome::ConnectionFailed);
                }
            },
            _ = tokio::time::sleep(self.connect_timeout) => {
                tracing::warn!(
                    timeout_ms = self.connect_timeout.as_millis() as u64,
                    "connection timed out"
                );
                return Ok(Outcome::ConnectionTimeout);
            }
        };
        tracing::info!("connected");

        let snapshot = client.fetch_snapshot().await?;
        self.decide(&snapshot)
    }

    /// Apply the policy to a snapshot, reading and updating the last-block
    /// file as needed.
    pub fn decide(&self, snapshot: &ChainSnapshot) -> Result<Outcome, DetectorError> {
        let best_peer_block = snapshot
            .peer_best_blocks
            .as_ref()
            .and_then(|peers| peers.iter().max().copied());
        tracing::info!(
            best_block = snapshot.best_block,
            best_peer_block = ?best_peer_block,
            peers = snapshot.peer_count,
            pending_extrinsics = snapshot.pending_extrinsics,
            healthy = snapshot.is_healthy,
            "chain snapshot"
        );

        match self.policy.assess(snapshot) {
            Assessment::NoPeers => {
                tracing::warn!("node has no peers");
                Ok(Outcome::NoPeers)
            }
            Assessment::InSync => Ok(Outcome::Healthy),
            Assessment::Behind { peers_ahead } => {
                let last_block = self.state.read()?;
                if last_block == Some(snapshot.best_block) {
                    tracing::warn!(
                        peers_ahead,
                        peers = snapshot.peer_count,
                        best_block = snapshot.best_block,
                        "best block has not advanced while most peers are ahead"
                    );
                    return Ok(Outcome::Stalled);
                }

                tracing::info!(
                    peers_ahead,
                    peers = snapshot.peer_count,
                    last_block = ?last_block,
                    "behind peers but still advancing"
                );
                self.state.write(snapshot.best_block)?;
                Ok(Outcome::Healthy)
            }
        }
    }
}
