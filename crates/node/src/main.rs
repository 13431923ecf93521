//! Rollup node
//!
//! Main entry point for the optimistic rollup.
//! `devnet` runs the batch pipeline and a fraud-proof validator against an
//! in-process L1. `inspect` prints the snapshot chain kept in a data dir.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::{NodeConfig, StorageBackend};
use k256::ecdsa::SigningKey;
use l1_bridge::{L1Error, MemoryL1, StateCommitmentChain};
use l1_integration::{address_hex, digest_hex, Address, BatchId, H256, U256};
use l2_consensus::{
    ConsensusError, EventInbox, LeaderNode, LeaderNodeBuilder, ValidatorNode,
    ValidatorNodeBuilder, VerificationOutcome,
};
use l2_runtime::{
    address_of, keccak256, sign, AccountLedger, SledStore, SnapshotStore, UnsignedTransaction,
    DEFAULT_CHAIN_ID,
};
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

/// Optimistic rollup node
#[derive(Parser, Debug)]
#[command(name = "rollup")]
#[command(about = "Optimistic rollup execution engine", long_about = None)]
struct Args {
    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a local devnet against an in-memory L1
    Devnet {
        /// Data directory for persistent state
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Storage backend
        #[arg(long, value_enum)]
        storage: Option<StorageBackend>,

        /// Proof-of-work difficulty
        #[arg(long)]
        difficulty: Option<usize>,

        /// Time between batches in milliseconds
        #[arg(long)]
        batch_interval_ms: Option<u64>,

        /// Number of devnet accounts
        #[arg(long)]
        accounts: Option<usize>,

        /// Random transfers per batch
        #[arg(long)]
        txs_per_batch: Option<usize>,

        /// Corrupt a recorded state root every N batches (0 = never)
        #[arg(long)]
        fraud_every: Option<u64>,

        /// Stop after N batches (0 = run until Ctrl+C)
        #[arg(long)]
        max_batches: Option<u64>,

        /// Challenge period in milliseconds
        #[arg(long)]
        challenge_period_ms: Option<u64>,

        /// Re-buffer transactions of a batch the L1 refused
        #[arg(long)]
        rebuffer: bool,
    },
    /// Print the snapshot chain of a sled data dir
    Inspect {
        /// Data directory to read
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = NodeConfig::resolve(args.config.as_deref())?;
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    match args.command {
        Command::Devnet {
            data_dir,
            storage,
            difficulty,
            batch_interval_ms,
            accounts,
            txs_per_batch,
            fraud_every,
            max_batches,
            challenge_period_ms,
            rebuffer,
        } => {
            if let Some(data_dir) = data_dir {
                config.data_dir = data_dir;
            }
            if let Some(storage) = storage {
                config.storage = storage;
            }
            if let Some(difficulty) = difficulty {
                config.difficulty = difficulty;
            }
            if let Some(interval) = batch_interval_ms {
                config.batch_interval_ms = interval;
            }
            if let Some(accounts) = accounts {
                config.accounts = accounts;
            }
            if let Some(txs) = txs_per_batch {
                config.txs_per_batch = txs;
            }
            if let Some(every) = fraud_every {
                config.fraud_every = every;
            }
            if let Some(max) = max_batches {
                config.max_batches = max;
            }
            if let Some(period) = challenge_period_ms {
                config.challenge_period_ms = period;
            }
            if rebuffer {
                config.failure_policy = l2_consensus::SubmissionFailurePolicy::Rebuffer;
            }
            run_devnet(config).await
        }
        Command::Inspect { data_dir } => run_inspect(&data_dir.unwrap_or(config.data_dir)),
    }
}

/// Deterministic devnet key for account `index`
fn devnet_key(index: usize) -> Result<SigningKey> {
    let seed = keccak256(format!("rollup-devnet-account-{}", index).as_bytes());
    SigningKey::from_slice(seed.as_bytes()).context("deriving devnet key")
}

fn open_store(config: &NodeConfig) -> Result<SnapshotStore> {
    match config.storage {
        StorageBackend::Memory => Ok(SnapshotStore::in_memory()),
        StorageBackend::Sled => {
            std::fs::create_dir_all(&config.data_dir)?;
            let kv = SledStore::open(&config.data_dir)?;
            Ok(SnapshotStore::new(Arc::new(kv)))
        }
    }
}

struct Devnet {
    l1: MemoryL1,
    leader: Arc<LeaderNode>,
    validator: ValidatorNode,
    inbox: EventInbox,
    keys: Vec<SigningKey>,
    addresses: Vec<Address>,
    /// Verified batches still inside their challenge period
    awaiting_finalization: Vec<BatchId>,
}

impl Devnet {
    /// Sign random transfers between devnet accounts, nonces taken from the live state
    async fn submit_transfers(&self, count: usize) {
        if self.keys.len() < 2 {
            return;
        }
        let state = self.leader.state().await;
        let mut nonces: Vec<U256> = self.addresses.iter().map(|a| state.nonce(a)).collect();

        let transfers: Vec<(usize, usize, u64)> = {
            let mut rng = rand::thread_rng();
            (0..count)
                .map(|_| {
                    let from = rng.gen_range(0..self.keys.len());
                    let to = (from + rng.gen_range(1..self.keys.len())) % self.keys.len();
                    (from, to, rng.gen_range(1..=25))
                })
                .collect()
        };

        for (from, to, amount) in transfers {
            let tx = UnsignedTransaction::transfer(
                self.addresses[to],
                U256::from(amount),
                nonces[from],
                DEFAULT_CHAIN_ID,
            );
            let submitted = sign(&tx, &self.keys[from])
                .map_err(l2_consensus::ConsensusError::from)
                .and_then(|(signed, signature)| self.leader.submit(signed, &signature));
            match submitted {
                Ok(_) => nonces[from] += U256::one(),
                Err(e) => tracing::warn!("Transfer from account {} not submitted: {}", from, e),
            }
        }
    }

    /// Overwrite the recorded root of the batch's first transaction
    async fn corrupt_batch(&self, batch_id: &BatchId) -> Result<bool> {
        let Some(tx) = self.leader.latest_block().transactions.first().cloned() else {
            return Ok(false);
        };
        let ledger = self.leader.ledger();
        let ledger = ledger.lock().await;
        ledger
            .store()
            .record_state_root(&tx.hash(), &H256::repeat_byte(0xff))?;
        tracing::warn!(
            "Injected bad state root for tx {} in batch {}",
            digest_hex(&tx.hash()),
            digest_hex(batch_id)
        );
        Ok(true)
    }

    /// Run the validator over queued events, resolving its challenges as fraudulent
    async fn settle(&mut self) -> Result<()> {
        loop {
            let mut challenged = Vec::new();
            let mut verified = Vec::new();
            while let Some(event) = self.inbox.try_next() {
                match self.validator.process_event(&event).await {
                    Ok(Some(VerificationOutcome::Challenged { .. })) => {
                        challenged.extend(event.batch_id())
                    }
                    Ok(Some(VerificationOutcome::Valid)) => verified.extend(event.batch_id()),
                    Ok(None) => {}
                    Err(e) => tracing::error!("Validator failed on {:?}: {}", event.batch_id(), e),
                }
            }

            self.awaiting_finalization.extend(verified);
            self.finalize_due().await;

            if challenged.is_empty() {
                return Ok(());
            }
            for batch_id in &challenged {
                self.l1.resolve_challenge(batch_id, false)?;
            }
        }
    }

    /// Finalize every waiting batch whose challenge period is over
    async fn finalize_due(&mut self) {
        let mut still_open = Vec::new();
        for batch_id in std::mem::take(&mut self.awaiting_finalization) {
            match self.validator.finalize(&batch_id).await {
                Ok(()) => tracing::info!("Finalized batch {}", digest_hex(&batch_id)),
                Err(ConsensusError::L1(L1Error::ChallengePeriodActive { .. })) => {
                    still_open.push(batch_id)
                }
                Err(e) => tracing::warn!("Could not finalize {}: {}", digest_hex(&batch_id), e),
            }
        }
        self.awaiting_finalization = still_open;
    }
}

/// Run a local devnet
async fn run_devnet(config: NodeConfig) -> Result<()> {
    tracing::info!("Starting rollup devnet");
    tracing::info!("  Storage: {:?} ({:?})", config.storage, config.data_dir);
    tracing::info!("  Difficulty: {}", config.difficulty);
    tracing::info!("  Batch interval: {}ms", config.batch_interval_ms);
    tracing::info!("  Accounts: {}", config.accounts);
    tracing::info!("  Failure policy: {:?}", config.failure_policy);
    tracing::info!("  Challenge period: {}ms", config.challenge_period_ms);

    let store = open_store(&config)?;
    if let Some(head) = store.head()? {
        bail!(
            "{} already holds a chain (head {}); the devnet L1 is in-memory, use a fresh --data-dir or `rollup inspect`",
            config.data_dir.display(),
            head
        );
    }

    let keys = (0..config.accounts).map(devnet_key).collect::<Result<Vec<_>>>()?;
    let addresses: Vec<Address> = keys.iter().map(address_of).collect();
    let sequencer = addresses.first().copied().unwrap_or_default();

    let l1 = MemoryL1::new(sequencer);
    let leader = Arc::new(
        LeaderNodeBuilder::new(AccountLedger::new(store), Arc::new(l1.clone()))
            .config(config.consensus())
            .sequencer(sequencer)
            .build(),
    );
    let challenger = Address::from_slice(&keccak256(b"rollup-devnet-challenger").as_bytes()[12..]);
    let validator = ValidatorNodeBuilder::new(leader.clone(), Arc::new(l1.connect(challenger))).build();
    let inbox = EventInbox::new(l1.subscribe());
    l1.set_challenge_period(leader.config().challenge_period).await?;

    for address in &addresses {
        leader.deposit(*address, U256::from(config.initial_balance)).await?;
        tracing::info!("Funded {} with {}", address_hex(address), config.initial_balance);
    }

    let mut devnet = Devnet {
        l1,
        leader,
        validator,
        inbox,
        keys,
        addresses,
        awaiting_finalization: Vec::new(),
    };

    let mut interval = tokio::time::interval(Duration::from_millis(config.batch_interval_ms.max(1)));
    let mut committed = 0u64;

    tracing::info!("Devnet running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down...");
                break;
            }
        }

        devnet.submit_transfers(config.txs_per_batch).await;

        let batch_id = match devnet.leader.process_batch(&devnet.addresses).await {
            Ok(batch_id) => batch_id,
            Err(e) => {
                tracing::error!("Batch failed: {}", e);
                continue;
            }
        };
        committed += 1;

        if config.fraud_every > 0 && committed % config.fraud_every == 0 {
            devnet.corrupt_batch(&batch_id).await?;
        }
        devnet.settle().await?;

        let leader_stats = devnet.leader.stats();
        let validator_stats = devnet.validator.stats();
        tracing::info!(
            "Batch {}: {} submitted, {} txs committed, {} dropped, {} verified, {} challenged, {} invalidations",
            committed,
            leader_stats.batches_submitted,
            leader_stats.transactions_committed,
            leader_stats.transactions_dropped,
            validator_stats.batches_verified,
            validator_stats.challenges_raised,
            validator_stats.invalidations_handled
        );

        if config.max_batches > 0 && committed >= config.max_batches {
            break;
        }
    }

    let state = devnet.leader.state().await;
    for address in &devnet.addresses {
        tracing::info!(
            "{}: balance {}, nonce {}",
            address_hex(address),
            state.balance(address),
            state.nonce(address)
        );
    }
    tracing::info!("Devnet stopped after {} batches", committed);

    Ok(())
}

/// Print the snapshot chain from head to genesis
fn run_inspect(data_dir: &Path) -> Result<()> {
    if !data_dir.exists() {
        bail!("{} does not exist", data_dir.display());
    }
    let store = SnapshotStore::new(Arc::new(SledStore::open(data_dir)?));
    let chain = store.chain()?;

    if chain.is_empty() {
        println!("{}: no snapshots", data_dir.display());
        return Ok(());
    }

    println!("{}: {} snapshots", data_dir.display(), chain.len());
    for (key, record) in chain {
        let taken = chrono::DateTime::from_timestamp_millis(record.timestamp)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| record.timestamp.to_string());
        println!(
            "{}  block {}  root {}  {} accounts  {}",
            key,
            record.block_number,
            digest_hex(&record.committed_root()),
            record.accounts.len(),
            taken
        );
    }
    Ok(())
}
