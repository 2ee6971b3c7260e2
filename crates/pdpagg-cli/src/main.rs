// crates/pdpagg-cli/src/main.rs

#![forbid(unsafe_code)]
#![deny(
    rust_2018_idioms,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo
)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pdpagg_core::{
    io::{read_aggregate_auto, write_aggregate_auto},
    io_jsonl::stream_jsonl,
    Aggregate, Commitment, PieceLink,
};
use pdpagg_crypto::Ed25519Attestor;
use pdpagg_merkle::build_aggregate;
use pdpagg_pipeline::{
    invocation_link, AggregateSubmitter, Buffer, FsStore, LinkMessage, MemoryQueue,
    PieceAccepter, PieceAggregator, PieceMessage, PipelineConfig, ProofSetBackend, Receipt,
    ReceiptStore, RecordingBackend, SpoolBackend,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "pdpagg",
    about = "PDP piece-aggregation CLI",
    long_about = "PDP piece-aggregation CLI.\n\nUse this tool to build and verify aggregates, and to drive the aggregate -> submit -> accept pipeline over a directory-backed store.",
    version = env!("CARGO_PKG_VERSION"),
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print the link string of a piece
    Link {
        /// Piece commitment (64 hex chars)
        #[arg(long)]
        commitment: String,

        /// Padded piece size in bytes (power of two)
        #[arg(long)]
        padded_size: u64,

        /// Payload padding in bytes
        #[arg(long, default_value_t = 0)]
        padding: u64,
    },

    /// Build an aggregate from piece messages (JSONL, one `{"piece": ...}` per line)
    Build {
        /// Input piece messages (JSONL)
        #[arg(long)]
        pieces: PathBuf,

        /// Output path for the aggregate (JSON/CBOR)
        #[arg(long, default_value = "aggregate.json")]
        out: PathBuf,
    },

    /// Replay every inclusion proof of an aggregate
    Verify {
        /// Input aggregate (JSON/CBOR)
        #[arg(long)]
        aggregate: PathBuf,
    },

    /// Run aggregate -> submit -> accept over a batch of piece messages
    Run {
        /// Pipeline configuration (TOML)
        #[arg(long)]
        config: PathBuf,

        /// Input piece messages (JSONL)
        #[arg(long)]
        pieces: PathBuf,

        /// Record root additions in memory instead of spooling them.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// Look up and verify the receipt of a piece
    Receipt {
        /// Pipeline configuration (TOML)
        #[arg(long)]
        config: PathBuf,

        /// Piece link string
        #[arg(long)]
        piece: String,
    },
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Link {
            commitment,
            padded_size,
            padding,
        } => link(&commitment, padded_size, padding),

        Cmd::Build { pieces, out } => build(&pieces, &out),

        Cmd::Verify { aggregate } => verify(&aggregate),

        Cmd::Run {
            config,
            pieces,
            dry_run,
        } => run(&config, &pieces, dry_run),

        Cmd::Receipt { config, piece } => receipt(&config, &piece),
    }
}

/// Initialize tracing with an env-driven filter (default INFO).
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_target(false).with_level(true).compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

fn parse_commitment(s: &str) -> Result<Commitment> {
    let bytes = hex::decode(s.trim()).context("commitment is not hex")?;
    let Ok(c) = Commitment::try_from(bytes.as_slice()) else {
        bail!("commitment must be 32 bytes, got {}", bytes.len());
    };
    Ok(c)
}

fn link(commitment: &str, padded_size: u64, padding: u64) -> Result<()> {
    let link = PieceLink::from_padded_size(parse_commitment(commitment)?, padded_size, padding)?;
    println!("{link}");
    Ok(())
}

/// Read piece messages; bad lines are logged and skipped.
fn read_piece_messages(path: &Path) -> Result<(Vec<PieceMessage>, usize)> {
    let mut msgs = Vec::new();
    let mut skipped = 0usize;
    for item in stream_jsonl::<PieceMessage, _>(path)? {
        match item {
            Ok(m) => msgs.push(m),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "skipping line");
                skipped += 1;
            }
        }
    }
    Ok((msgs, skipped))
}

fn build(pieces: &Path, out: &Path) -> Result<()> {
    info!(pieces=%pieces.display(), out=%out.display(), "building aggregate");
    let (msgs, skipped) = read_piece_messages(pieces)?;
    if skipped > 0 {
        bail!("{skipped} malformed lines in {}", pieces.display());
    }
    let mut links = msgs
        .iter()
        .map(PieceMessage::decode)
        .collect::<Result<Vec<_>, _>>()?;
    links.sort();

    let agg = build_aggregate(&links).context("building aggregate")?;
    write_aggregate_auto(out, &agg)
        .with_context(|| format!("writing aggregate to {}", out.display()))?;

    println!(
        "Built {} from {} pieces → {}",
        agg.root,
        agg.len(),
        out.display()
    );
    Ok(())
}

fn verify(path: &Path) -> Result<()> {
    info!(aggregate=%path.display(), "verifying aggregate");
    let agg = read_aggregate_auto(path)
        .with_context(|| format!("reading aggregate from {}", path.display()))?;
    agg.verify()
        .with_context(|| format!("verifying {}", path.display()))?;
    println!("OK: {} proofs reproduce {}", agg.len(), agg.root);
    Ok(())
}

#[derive(Debug, Serialize)]
struct RunSummary {
    pieces: usize,
    rejected: usize,
    aggregates: Vec<String>,
    submitted: usize,
    receipts: usize,
    submit_error: Option<String>,
}

fn run(config: &Path, pieces: &Path, dry_run: bool) -> Result<()> {
    let cfg = PipelineConfig::load(config)?;
    let Some(seed) = cfg.signer_seed.as_deref() else {
        bail!("{}: signer_seed is required to issue receipts", config.display());
    };
    let attestor = Ed25519Attestor::from_seed_hex(seed)?;

    let backend: Box<dyn ProofSetBackend> = match (&cfg.spool_dir, dry_run) {
        (_, true) => Box::new(RecordingBackend::new()),
        (Some(dir), false) => Box::new(SpoolBackend::new(dir)),
        (None, false) => bail!("{}: spool_dir is required unless --dry-run", config.display()),
    };

    let workspace = FsStore::<Buffer>::new(cfg.workspace_dir());
    let aggregates = FsStore::<Aggregate>::new(cfg.aggregates_dir());
    let receipts = FsStore::<Receipt>::new(cfg.receipts_dir());
    let index = FsStore::<String>::new(cfg.receipt_index_dir());
    let pending = FsStore::<Vec<PieceLink>>::new(cfg.pending_dir());
    let submissions = MemoryQueue::<LinkMessage>::new();
    let acceptance = MemoryQueue::<LinkMessage>::new();

    let (msgs, skipped) = read_piece_messages(pieces)?;
    info!(
        pieces = msgs.len(),
        skipped,
        proof_set = cfg.proof_set_id,
        dry_run,
        store=%cfg.store_dir.display(),
        "running pipeline"
    );

    let aggregated = PieceAggregator::new(&workspace, &aggregates, &submissions)
        .with_policy(cfg.policy())
        .with_max_piece_size(cfg.max_piece_size)
        .handle(&msgs)?;

    let submitter = AggregateSubmitter::new(&aggregates, &*backend, &acceptance, cfg.proof_set_id);
    let fresh = submissions
        .drain()
        .iter()
        .map(LinkMessage::decode)
        .collect::<Result<Vec<_>, _>>()?;
    let (submitted, submit_error) = match submitter.submit_pending(&pending, &fresh) {
        Ok(roots) => (roots.len(), None),
        Err(e) if e.is_retryable() => {
            warn!(
                error = %e,
                dir = %cfg.pending_dir().display(),
                "submission failed; roots stay pending for the next run"
            );
            (0, Some(e.to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    let accepter = PieceAccepter::new(&aggregates, ReceiptStore::new(&receipts, &index), &attestor);
    let accepted = accepter.handle(&acceptance.drain())?;

    let summary = RunSummary {
        pieces: msgs.len() + skipped,
        rejected: aggregated.rejected.len() + skipped,
        aggregates: aggregated.output.iter().map(ToString::to_string).collect(),
        submitted,
        receipts: accepted.output.len(),
        submit_error,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn receipt(config: &Path, piece: &str) -> Result<()> {
    let cfg = PipelineConfig::load(config)?;
    let piece: PieceLink = piece.parse().context("parsing piece link")?;
    let ran = invocation_link(&piece);

    let receipts = FsStore::<Receipt>::new(cfg.receipts_dir());
    let index = FsStore::<String>::new(cfg.receipt_index_dir());
    let store = ReceiptStore::new(&receipts, &index);

    let Some(r) = store.get_verified(&ran)? else {
        bail!("no receipt for {piece} (invocation {ran})");
    };
    info!(%piece, %ran, issuer = %r.issuer, "receipt verified");
    println!("{}", serde_json::to_string_pretty(&r)?);
    Ok(())
}
