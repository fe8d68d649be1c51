//! xln-node — the driver binary around the pure runtime kernel.
//!
//! The kernel never does I/O; this binary owns the loop:
//!   1. Collect inputs (transport queue + jurisdiction confirmations)
//!   2. Log them to the WAL, apply one tick, log the outputs
//!   3. Hand intents to the chain adapter, messages to the transport
//!   4. Snapshot every N ticks
//!
//! `demo` runs a three-entity payment scenario end to end (including a
//! routed multi-hop payment), `replay` rebuilds an env from snapshot +
//! WAL, `inspect` prints a snapshot header.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

mod demo;

#[derive(Parser, Debug)]
#[command(name = "xln-node", version, about = "XLN off-chain settlement kernel driver")]
struct Args {
    /// Directory for WAL and snapshot files.
    #[arg(long, default_value = "./xln-data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the built-in three-entity scenario with persistence.
    Demo {
        /// Logical ticks to run.
        #[arg(long, default_value_t = 24)]
        ticks: u64,

        /// Snapshot cadence in ticks.
        #[arg(long, default_value_t = xln_core::constants::SNAPSHOT_EVERY_N_HEIGHTS)]
        snapshot_every: u64,

        /// Seed for the scenario's payment generator.
        #[arg(long, default_value_t = 0xC0FFEE)]
        seed: u64,
    },

    /// Rebuild an env from a snapshot and the WAL records after it.
    Replay {
        #[arg(long)]
        snapshot: PathBuf,

        #[arg(long)]
        wal: PathBuf,
    },

    /// Print a snapshot's header without mounting it.
    Inspect {
        #[arg(long)]
        snapshot: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,xln=debug".parse().expect("static filter parses")),
        )
        .init();

    let args = Args::parse();
    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("creating data dir {}", args.data_dir.display()))?;

    match args.command {
        Command::Demo { ticks, snapshot_every, seed } => {
            demo::run(&args.data_dir, ticks, snapshot_every, seed)
        }
        Command::Replay { snapshot, wal } => {
            let keys = demo::demo_keystore().context("building demo keystore")?;
            let env = xln_store::replay(&snapshot, &wal, &keys).context("replaying")?;
            let root = xln_store::snapshot::state_root(&env);
            info!(tick = env.tick, root = %root, "replay complete");
            println!("replayed to tick {} with state root {root}", env.tick);
            Ok(())
        }
        Command::Inspect { snapshot } => inspect(&snapshot),
    }
}

fn inspect(path: &PathBuf) -> anyhow::Result<()> {
    use xln_codec::{decode, Item};

    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let item = decode(&bytes).context("decoding snapshot rlp")?;
    let fields = item.as_list().ok().context("snapshot body is not a list")?;
    let [tick, timestamp, root, entries] = fields else {
        anyhow::bail!("unrecognized snapshot layout");
    };
    println!("tick:       {}", tick.as_u64().context("tick field")?);
    println!("timestamp:  {}", timestamp.as_u64().context("timestamp field")?);
    println!("state root: {}", hex::encode(root.as_bytes().context("root field")?));
    let entries = entries.as_list().ok().context("entries are not a list")?;
    println!("replicas:   {}", entries.len());
    for entry in entries {
        if let Ok([_, entity, signer, height, _]) = entry.as_list() {
            println!(
                "  entity {} signer {} at height {}",
                hex::encode(entity.as_bytes().unwrap_or_default()),
                hex::encode(signer.as_bytes().unwrap_or_default()),
                height.as_u64().unwrap_or_default(),
            );
        }
    }
    Ok(())
}
