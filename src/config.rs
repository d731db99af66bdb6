use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::networks;

/// Top-level configuration loaded from nodeup.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct NodeupConfig {
    pub probe: ProbeConfig,
    pub state: StateConfig,
    pub stall: StallConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub network: String,
    /// Explicit node endpoint; falls back to the network's default.
    pub url: Option<String>,
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub file: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StallConfig {
    /// A peer counts as ahead only when its best block exceeds ours by more
    /// than this many blocks.
    pub ahead_margin: u64,
    /// Collect per-peer best blocks and run the majority-ahead check.
    pub peer_heights: bool,
}

// --- Default implementations ---

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            network: networks::DEFAULT_NETWORK.to_string(),
            url: None,
            connect_timeout_ms: 2000,
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("/tmp/nodeup.lastblock"),
        }
    }
}

impl Default for StallConfig {
    fn default() -> Self {
        Self {
            ahead_margin: 10,
            peer_heights: true,
        }
    }
}

/// Errors raised while loading the config file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

impl NodeupConfig {
    /// Load config from `path`. A missing file yields the defaults; a file
    /// that exists but cannot be read or parsed is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let cfg = NodeupConfig::load(&dir.path().join("nodeup.toml")).unwrap();
        assert_eq!(cfg.probe.network, "mainnet");
        assert_eq!(cfg.probe.url, None);
        assert_eq!(cfg.probe.connect_timeout_ms, 2000);
        assert_eq!(cfg.state.file, PathBuf::from("/tmp/nodeup.lastblock"));
        assert_eq!(cfg.stall.ahead_margin, 10);
        assert!(cfg.stall.peer_heights);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nodeup.toml");
        std::fs::write(
            &path,
            "[probe]\nnetwork = \"testnet\"\nurl = \"ws://10.0.0.5:9944\"\n\n[stall]\npeer_heights = false\n",
        )
        .unwrap();

        let cfg = NodeupConfig::load(&path).unwrap();
        assert_eq!(cfg.probe.network, "testnet");
        assert_eq!(cfg.probe.url.as_deref(), Some("ws://10.0.0.5:9944"));
        assert_eq!(cfg.probe.connect_timeout_ms, 2000);
        assert!(!cfg.stall.peer_heights);
        assert_eq!(cfg.stall.ahead_margin, 10);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nodeup.toml");
        std::fs::write(&path, "[probe\nnetwork = ").unwrap();

        let err = NodeupConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("failed to parse config"));
    }
}
