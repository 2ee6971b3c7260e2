//! pdpagg-bench-harness
//!
//! Time the aggregation path end to end (generate -> build -> verify -> pipeline)
//! and append CSV rows into `benchmarks/reports/bench-<unix>.csv`.
//!
//! Usage examples:
//!   cargo run -p pdpagg-bench-harness -- --profile benchmarks/configs/profiles/small.toml
//!   cargo run --release -p pdpagg-bench-harness -- --profile benchmarks/configs/profiles/medium.toml

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{ensure, Context, Result};
use serde::Deserialize;

use pdpagg_core::{Aggregate, PieceLink};
use pdpagg_crypto::Ed25519Attestor;
use pdpagg_merkle::build_aggregate;
use pdpagg_pipeline::{
    AggregateSubmitter, Buffer, BufferPolicy, LinkMessage, MemoryQueue, MemoryStore,
    PieceAccepter, PieceAggregator, Receipt, ReceiptStore, RecordingBackend,
};

#[derive(Debug, Deserialize)]
struct Profile {
    /// Number of synthetic pieces per repeat
    pieces: usize,
    /// Smallest piece height (size = 32 << height)
    min_height: u8,
    /// Largest piece height
    max_height: u8,
    /// Aggregation threshold for the pipeline stage
    min_aggregate_size: u64,
    /// Repetitions of the whole run
    repeats: u32,
}

fn parse_flag(name: &str, default: &str) -> String {
    let mut it = std::env::args().skip(1);
    while let Some(k) = it.next() {
        if k == format!("--{name}") {
            return it.next().unwrap_or_else(|| default.to_string());
        }
    }
    default.to_string()
}

fn dur_ms(d: Duration) -> u128 {
    d.as_millis()
}

/// Deterministic pieces (xorshift64) with heights in `[min, max]`, arrival order.
fn gen_pieces(profile: &Profile, seed: u64) -> Result<Vec<PieceLink>> {
    let span = u64::from(profile.max_height - profile.min_height) + 1;
    let mut x = seed | 1;
    let mut out = Vec::with_capacity(profile.pieces);
    for _ in 0..profile.pieces {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        let mut c = [0u8; 32];
        for (i, chunk) in c.chunks_mut(8).enumerate() {
            chunk.copy_from_slice(&x.rotate_left(i as u32 * 16).to_le_bytes());
        }
        c[31] &= 0x3f;
        let height = profile.min_height + (x % span) as u8;
        out.push(PieceLink::new(c, height, 0)?);
    }
    Ok(out)
}

fn main() -> Result<()> {
    let profile_path = PathBuf::from(parse_flag("profile", "benchmarks/configs/profiles/small.toml"));

    let profile_src = fs::read_to_string(&profile_path)
        .with_context(|| format!("read profile {:?}", profile_path))?;
    let profile: Profile = toml::from_str(&profile_src).context("parse profile toml")?;
    ensure!(
        profile.min_height >= 2 && profile.min_height <= profile.max_height,
        "heights must satisfy 2 <= min_height <= max_height"
    );
    println!(
        "Profile: pieces={}, heights={}..={}, threshold={}, repeats={}",
        profile.pieces, profile.min_height, profile.max_height, profile.min_aggregate_size, profile.repeats
    );

    fs::create_dir_all("benchmarks/reports").ok();

    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock before unix epoch")?
        .as_secs();
    let csv_path = PathBuf::from(format!("benchmarks/reports/bench-{ts}.csv"));
    let mut csv = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&csv_path)?;
    writeln!(csv, "timestamp,pieces,threshold,repeat,stage,ms,extra")?;

    let attestor = Ed25519Attestor::from_seed(&[0x5a; 32]);

    for rep in 0..profile.repeats {
        let row = |stage: &str, d: Duration, extra: String| {
            format!(
                "{ts},{},{},{rep},{stage},{},{extra}",
                profile.pieces,
                profile.min_aggregate_size,
                dur_ms(d)
            )
        };

        // 1) generate pieces
        let t0 = Instant::now();
        let pieces = gen_pieces(&profile, u64::from(rep) + 0x9e37_79b9)?;
        writeln!(csv, "{}", row("gen", t0.elapsed(), String::new()))?;

        // 2) one aggregate over every piece
        let t0 = Instant::now();
        let mut sorted = pieces.clone();
        sorted.sort();
        let agg = build_aggregate(&sorted)?;
        let t_build = t0.elapsed();
        writeln!(
            csv,
            "{}",
            row("build", t_build, format!("root={}", hex::encode(agg.root.commitment())))
        )?;

        // 3) replay every proof
        let t0 = Instant::now();
        agg.verify()?;
        writeln!(csv, "{}", row("verify", t0.elapsed(), format!("proofs={}", agg.len())))?;

        // 4) aggregate -> submit -> accept in memory
        let workspace = MemoryStore::<Buffer>::new();
        let aggregates = MemoryStore::<Aggregate>::new();
        let receipts = MemoryStore::<Receipt>::new();
        let index = MemoryStore::<String>::new();
        let submissions = MemoryQueue::<LinkMessage>::new();
        let acceptance = MemoryQueue::<LinkMessage>::new();
        let backend = RecordingBackend::new();

        let t0 = Instant::now();
        let roots = PieceAggregator::new(&workspace, &aggregates, &submissions)
            .with_policy(BufferPolicy::new(profile.min_aggregate_size))
            .aggregate_pieces(&pieces)?;
        writeln!(csv, "{}", row("aggregate", t0.elapsed(), format!("aggregates={}", roots.len())))?;

        let t0 = Instant::now();
        AggregateSubmitter::new(&aggregates, &backend, &acceptance, 1).submit_aggregates(&roots)?;
        submissions.drain();
        writeln!(csv, "{}", row("submit", t0.elapsed(), String::new()))?;

        let t0 = Instant::now();
        let issued = PieceAccepter::new(&aggregates, ReceiptStore::new(&receipts, &index), &attestor)
            .accept_pieces(&roots)?;
        acceptance.drain();
        writeln!(csv, "{}", row("accept", t0.elapsed(), format!("receipts={}", issued.len())))?;
    }

    println!("Wrote report → {}", csv_path.display());
    Ok(())
}
