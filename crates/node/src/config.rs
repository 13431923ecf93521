//! Node Configuration

use anyhow::{Context, Result};
use clap::ValueEnum;
use l2_consensus::{ConsensusConfig, SubmissionFailurePolicy, DEFAULT_DIFFICULTY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where snapshots and per-transaction records live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Embedded sled database under `data_dir`
    Sled,
    /// Process memory, lost on exit
    Memory,
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Data directory for the sled backend
    pub data_dir: PathBuf,
    pub storage: StorageBackend,
    /// Leading zero hex digits required of a proposer hash
    pub difficulty: usize,
    /// Time between batches in milliseconds
    pub batch_interval_ms: u64,
    /// Number of generated devnet accounts
    pub accounts: usize,
    /// Balance credited to each devnet account before the first batch
    pub initial_balance: u64,
    /// Random transfers signed per batch
    pub txs_per_batch: usize,
    /// Corrupt a recorded state root every N batches (0 = never)
    pub fraud_every: u64,
    /// Stop after N batches (0 = run until Ctrl+C)
    pub max_batches: u64,
    pub failure_policy: SubmissionFailurePolicy,
    /// Time a verified batch waits before it can be finalized
    pub challenge_period_ms: u64,
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            storage: StorageBackend::Memory,
            difficulty: DEFAULT_DIFFICULTY,
            batch_interval_ms: 1000,
            accounts: 4,
            initial_balance: 1_000,
            txs_per_batch: 8,
            fraud_every: 0,
            max_batches: 0,
            failure_policy: SubmissionFailurePolicy::Drop,
            challenge_period_ms: 5_000,
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Read a JSON config file, missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Config file if given, defaults otherwise
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Pipeline settings derived from this config
    pub fn consensus(&self) -> ConsensusConfig {
        ConsensusConfig {
            difficulty: self.difficulty,
            failure_policy: self.failure_policy,
            challenge_period: Duration::from_millis(self.challenge_period_ms),
            ..ConsensusConfig::default()
        }
    }
}
