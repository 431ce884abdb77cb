//! Etchash command-line tool.
//!
//! Inspects the consensus schedule of an Etchash network and seals headers
//! with the local CPU miner.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use etchash_consensus::{
    antigravity, block_reward, cache_size, dataset_size, era, seed_hash, should_reject_reorg,
    time_bomb, BlockHeader, DifficultyCalculator, EpochCache, EpochSchedule, EthashVerifier,
    ReorgContext,
};
use etchash_mining::Miner;
use num_bigint::BigUint;
use num_traits::Num;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod config;

use config::CliConfig;

/// Etchash consensus inspection and mining.
#[derive(Parser, Debug)]
#[command(name = "etchash")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "etchash.toml")]
    config: PathBuf,

    /// Network preset (classic, mordor)
    #[arg(short, long)]
    network: Option<String>,

    /// Number of mining threads (0 = one per CPU)
    #[arg(long)]
    threads: Option<usize>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the epoch, working-set sizes and rewards at a block
    Info {
        /// Block number
        block: u64,
    },
    /// Compute the required difficulty of a block
    Difficulty {
        /// Parent difficulty (decimal or 0x hex)
        parent_difficulty: String,
        /// Parent timestamp in seconds
        parent_timestamp: u64,
        /// Block timestamp in seconds
        timestamp: u64,
        /// Block number
        number: u64,
        /// The parent included uncles
        #[arg(long)]
        parent_has_uncles: bool,
    },
    /// Evaluate a reorg against the antigravity guard
    Reorg {
        /// Total difficulty at the common ancestor
        ancestor_td: String,
        /// Total difficulty at the local head
        local_td: String,
        /// Total difficulty at the proposed head
        proposed_td: String,
        /// Common ancestor timestamp in seconds
        ancestor_time: u64,
        /// Local head timestamp in seconds
        local_time: u64,
    },
    /// Seal a synthetic header with the local CPU miner
    Mine {
        /// Block number
        number: u64,
        /// Difficulty (decimal or 0x hex)
        #[arg(long, default_value = "1")]
        difficulty: String,
        /// Give up after this many seconds
        #[arg(long, default_value = "300")]
        timeout_secs: u64,
    },
    /// Write the resolved configuration to a file
    InitConfig {
        /// Output path (defaults to --config)
        path: Option<PathBuf>,
    },
}

fn parse_big(raw: &str) -> Result<BigUint> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => BigUint::from_str_radix(hex, 16),
        None => BigUint::from_str_radix(raw, 10),
    };
    parsed.map_err(|e| anyhow!("Invalid number '{}': {}", raw, e))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = CliConfig::load(&args.config, &args)?;
    let params = config.chain_params()?;
    info!(network = %config.network, "Loaded chain parameters");

    match args.command {
        Command::Info { block } => {
            let schedule = EpochSchedule::new(params.ecip1099_block);
            let epoch = schedule.describe(block);
            let finality = config.finality_config();

            println!("network:            {}", config.network);
            println!("block:              {}", block);
            println!("ecip1099 active:    {}", schedule.is_active(block));
            println!("dag epoch:          {}", epoch.dag);
            println!("seed epoch:         {}", epoch.seed);
            println!("seed hash:          0x{}", hex::encode(seed_hash(epoch.seed)));
            println!("cache size:         {}", cache_size(epoch.dag));
            println!("dataset size:       {}", dataset_size(epoch.dag));
            println!("next epoch at:      {}", schedule.next_epoch_start(block));
            println!("era:                {}", era(block, params.era_length));
            println!("block reward:       {}", block_reward(block, params.era_length));
            println!(
                "difficulty bomb:    {}",
                time_bomb(
                    block,
                    params.die_hard_block,
                    params.gotham_block,
                    params.ecip1041_block
                )
            );
            println!(
                "difficulty rules:   {:?}",
                DifficultyCalculator::new(&params).ruleset(block)
            );
            println!(
                "finality:           min {} peers, head age <= {}s, every {}s",
                finality.min_peers,
                finality.max_head_age.as_secs(),
                finality.poll_interval.as_secs()
            );
        }

        Command::Difficulty {
            parent_difficulty,
            parent_timestamp,
            timestamp,
            number,
            parent_has_uncles,
        } => {
            let parent_difficulty = parse_big(&parent_difficulty)?;
            let difficulty = DifficultyCalculator::new(&params).calculate(
                &parent_difficulty,
                parent_timestamp,
                timestamp,
                number,
                parent_has_uncles,
            );
            println!("{}", difficulty);
        }

        Command::Reorg {
            ancestor_td,
            local_td,
            proposed_td,
            ancestor_time,
            local_time,
        } => {
            let ctx = ReorgContext {
                common_ancestor_td: parse_big(&ancestor_td)?,
                local_td: parse_big(&local_td)?,
                proposed_td: parse_big(&proposed_td)?,
                common_ancestor_time: ancestor_time,
                local_head_time: local_time,
            };
            println!("time delta:   {}s", ctx.time_delta());
            println!("antigravity:  {}", antigravity(ctx.time_delta()));
            println!(
                "decision:     {}",
                if should_reject_reorg(&ctx) { "reject" } else { "accept" }
            );
        }

        Command::Mine {
            number,
            difficulty,
            timeout_secs,
        } => {
            let difficulty = parse_big(&difficulty)?;
            let cache = Arc::new(EpochCache::new(EpochSchedule::new(params.ecip1099_block)));

            let mut miner_config = config.miner_config();
            miner_config.internal_mining = true;
            miner_config.external_mining = false;
            info!(threads = miner_config.threads, "Starting miner");

            let miner = Miner::new(miner_config, Arc::clone(&cache))?;
            miner.start();

            let header = BlockHeader {
                number,
                timestamp: unix_now(),
                difficulty,
                extra_data: b"etchash".to_vec(),
                ..Default::default()
            };
            info!(number, "Building working set");
            miner
                .submit_block(header)
                .await
                .context("Failed to submit block to miner")?;

            let outcome = tokio::select! {
                sealed = tokio::time::timeout(Duration::from_secs(timeout_secs), miner.next_sealed()) => Some(sealed),
                _ = tokio::signal::ctrl_c() => None,
            };
            let sealed = match outcome {
                Some(Ok(sealed)) => sealed?,
                Some(Err(_)) => {
                    miner.shutdown();
                    bail!("No seal found within {}s", timeout_secs);
                }
                None => {
                    miner.shutdown();
                    bail!("Interrupted");
                }
            };

            if !EthashVerifier::new(cache).validate(&sealed) {
                bail!("Sealed header failed verification");
            }

            println!("nonce:       0x{:016x}", sealed.nonce);
            println!("mix digest:  0x{}", hex::encode(sealed.mix_digest));
            println!("hash:        0x{}", hex::encode(sealed.hash()));
            println!("hashes:      {}", miner.local_hash_count());
            miner.shutdown();
        }

        Command::InitConfig { path } => {
            let path = path.unwrap_or(args.config);
            let mut resolved = config;
            resolved.chain = Some(params.to_config());
            resolved.save(&path)?;
            info!(path = %path.display(), "Configuration written");
        }
    }

    Ok(())
}
