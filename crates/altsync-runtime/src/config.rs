//! Node configuration
//!
//! Durations are whole seconds on disk:
//!
//! ```json
//! { "debounce_delay": 2, "heartbeat_interval": 60, "chunk_size": 4 }
//! ```
//!
//! Missing fields fall back to the defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use altsync_core::{SyncError, SyncResult};
use altsync_wire::CodecConfig;

/// altsync node configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Delay that coalesces bursts of local changes into one announce
    #[serde(with = "secs")]
    pub debounce_delay: Duration,
    /// Minimum spacing between accepted peer-set-changed triggers
    #[serde(with = "secs")]
    pub peer_change_min_interval: Duration,
    /// Wait after an accepted peer-set change before jitter starts
    #[serde(with = "secs")]
    pub settle_delay: Duration,
    /// Upper bound (inclusive) of the random pre-announce delay
    #[serde(with = "secs")]
    pub max_jitter: Duration,
    /// How often the heartbeat checks for idleness
    #[serde(with = "secs")]
    pub heartbeat_interval: Duration,
    /// Announce is forced once this long passes without one
    #[serde(with = "secs")]
    pub heartbeat_idle: Duration,
    /// Character records per delta message
    pub chunk_size: usize,
    /// Upper bound on digest entries before size fitting
    pub max_digest_entries: usize,
    pub codec: CodecConfig,
    /// Where the store snapshot lives; `None` keeps everything in memory
    pub snapshot_path: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            debounce_delay: Duration::from_secs(2),
            peer_change_min_interval: Duration::from_secs(60),
            settle_delay: Duration::from_secs(5),
            max_jitter: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(60),
            heartbeat_idle: Duration::from_secs(300),
            chunk_size: 4,
            max_digest_entries: 24,
            codec: CodecConfig::default(),
            snapshot_path: None,
        }
    }
}

impl NodeConfig {
    /// Fewer, later announces for heavily throttled channels
    pub fn low_bandwidth() -> Self {
        NodeConfig {
            debounce_delay: Duration::from_secs(5),
            peer_change_min_interval: Duration::from_secs(180),
            settle_delay: Duration::from_secs(10),
            max_jitter: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(120),
            heartbeat_idle: Duration::from_secs(900),
            chunk_size: 3,
            max_digest_entries: 8,
            ..Default::default()
        }
    }

    /// Short timers for tests and simulation
    pub fn fast() -> Self {
        NodeConfig {
            debounce_delay: Duration::from_secs(1),
            peer_change_min_interval: Duration::from_secs(5),
            settle_delay: Duration::from_secs(1),
            max_jitter: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_idle: Duration::from_secs(20),
            ..Default::default()
        }
    }

    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    /// Load from a JSON file
    pub fn from_json_file(path: &Path) -> SyncResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> SyncResult<Self> {
        let config: NodeConfig =
            serde_json::from_str(json).map_err(|e| SyncError::Persistence(e.to_string()))?;
        if config.chunk_size == 0 {
            return Err(SyncError::Persistence("chunk_size must be at least 1".into()));
        }
        Ok(config)
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
