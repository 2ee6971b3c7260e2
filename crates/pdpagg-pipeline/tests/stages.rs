//! End-to-end behavior of the three stages wired through in-memory queues.
//!
//! Covers the threshold scenarios of the buffer policy, failure atomicity at
//! each stage boundary, and idempotence under redelivery.

use anyhow::{bail, Result};
use pdpagg_core::{Aggregate, PieceLink};
use pdpagg_crypto::Ed25519Attestor;
use pdpagg_merkle::AggregateError;
use pdpagg_pipeline::{
    AggregateSubmitter, Buffer, FsStore, LinkMessage, MemoryQueue, MemoryStore, PieceAccepter,
    PieceAggregator, PieceMessage, PipelineError, Queue, Receipt, ReceiptStore, RecordingBackend,
    Step, Store, BUFFER_KEY, PENDING_KEY,
};
use std::sync::atomic::{AtomicBool, Ordering};

const MIB: u64 = 1 << 20;

fn piece(tag: u8, size: u64) -> PieceLink {
    PieceLink::from_padded_size([tag; 32], size, 0).unwrap()
}

/// Memory store whose writes can be switched off.
#[derive(Default)]
struct FlakyStore<V> {
    inner: MemoryStore<V>,
    fail_puts: AtomicBool,
}

impl<V: Clone + Send> Store<V> for FlakyStore<V> {
    fn get(&self, key: &str) -> Result<Option<V>> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: &V) -> Result<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            bail!("injected write failure for {key}");
        }
        self.inner.put(key, value)
    }
}

/// Queue that rejects every publish.
struct DeadQueue;

impl Queue<LinkMessage> for DeadQueue {
    fn publish(&self, message: &LinkMessage) -> Result<()> {
        bail!("queue unavailable for {}", message.link)
    }
}

struct Harness {
    workspace: MemoryStore<Buffer>,
    aggregates: MemoryStore<Aggregate>,
    submissions: MemoryQueue<LinkMessage>,
}

impl Harness {
    fn new() -> Self {
        Self {
            workspace: MemoryStore::new(),
            aggregates: MemoryStore::new(),
            submissions: MemoryQueue::new(),
        }
    }

    fn stage(&self) -> PieceAggregator<'_> {
        PieceAggregator::new(&self.workspace, &self.aggregates, &self.submissions)
    }

    fn buffer(&self) -> Buffer {
        self.workspace.get(BUFFER_KEY).unwrap().unwrap()
    }
}

#[test]
fn half_threshold_piece_is_buffered() {
    let h = Harness::new();
    let roots = h.stage().aggregate_pieces(&[piece(1, 64 * MIB)]).unwrap();
    assert!(roots.is_empty());
    assert_eq!(h.buffer().total_size(), 64 * MIB);
    assert!(h.submissions.is_empty());
    assert!(h.aggregates.is_empty());
}

#[test]
fn two_halves_make_one_aggregate() {
    let h = Harness::new();
    let stage = h.stage();
    stage.aggregate_pieces(&[piece(1, 64 * MIB)]).unwrap();
    let roots = stage.aggregate_pieces(&[piece(2, 64 * MIB)]).unwrap();
    assert_eq!(roots.len(), 1);
    assert!(h.buffer().is_empty());

    let agg = h.aggregates.get(&roots[0].to_string()).unwrap().unwrap();
    assert_eq!(agg.links().collect::<Vec<_>>(), vec![piece(1, 64 * MIB), piece(2, 64 * MIB)]);
    agg.verify().unwrap();
    assert_eq!(h.submissions.drain(), vec![LinkMessage::new(&roots[0])]);
}

#[test]
fn oversized_piece_leaves_buffer_alone() {
    let h = Harness::new();
    let stage = h.stage();
    stage.aggregate_pieces(&[piece(9, 32 * MIB)]).unwrap();
    let before = h.buffer();
    // 130 MiB is padded to 256 MiB, above the threshold.
    let big = PieceLink::from_padded_size([1u8; 32], (130 * MIB).next_power_of_two(), 0).unwrap();
    let roots = stage.aggregate_pieces(&[big]).unwrap();
    assert_eq!(roots, vec![big]);
    assert_eq!(h.buffer(), before);
}

#[test]
fn undersized_piece_never_reaches_the_buffer() {
    let h = Harness::new();
    let stage = h.stage();
    stage.aggregate_pieces(&[piece(1, 64 * MIB)]).unwrap();
    let before = h.buffer();

    let handled = stage.handle(&[PieceMessage::new(&piece(2, 64))]).unwrap();
    assert!(handled.output.is_empty());
    assert!(matches!(
        handled.rejected[..],
        [PipelineError::PieceTooSmall { size: 64, .. }]
    ));
    assert_eq!(h.buffer(), before);

    let err = stage.aggregate_pieces(&[piece(3, 32)]).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Build(AggregateError::PieceTooSmall { size: 32, .. })
    ));
    assert!(!err.is_retryable());
    assert_eq!(h.buffer(), before);

    // The workspace still reaches the threshold afterwards.
    let roots = stage.aggregate_pieces(&[piece(4, 64 * MIB)]).unwrap();
    assert_eq!(roots.len(), 1);
    assert!(h.buffer().is_empty());
    let agg = h.aggregates.get(&roots[0].to_string()).unwrap().unwrap();
    assert_eq!(agg.links().collect::<Vec<_>>(), vec![piece(1, 64 * MIB), piece(4, 64 * MIB)]);
}

#[test]
fn three_halves_leave_one_buffered() {
    let h = Harness::new();
    let pieces = [piece(1, 64 * MIB), piece(2, 64 * MIB), piece(3, 64 * MIB)];
    let roots = h.stage().aggregate_pieces(&pieces).unwrap();
    assert_eq!(roots.len(), 1);
    let buffer = h.buffer();
    assert_eq!(buffer.total_size(), 64 * MIB);
    assert_eq!(buffer.pieces(), &[piece(3, 64 * MIB)]);
}

#[test]
fn failed_buffer_write_has_no_side_effects() {
    let workspace = FlakyStore::<Buffer>::default();
    let aggregates = MemoryStore::<Aggregate>::new();
    let submissions = MemoryQueue::<LinkMessage>::new();
    let stage = PieceAggregator::new(&workspace, &aggregates, &submissions);

    // Bootstrap the buffer, then break writes.
    stage.aggregate_pieces(&[piece(1, 64 * MIB)]).unwrap();
    workspace.fail_puts.store(true, Ordering::SeqCst);

    let err = stage.aggregate_pieces(&[piece(2, 64 * MIB)]).unwrap_err();
    assert!(matches!(err, PipelineError::Io { step: Step::PersistBuffer, .. }));
    assert!(err.is_retryable());
    assert!(aggregates.is_empty());
    assert!(submissions.is_empty());

    // Redelivery after recovery produces the aggregate exactly once.
    workspace.fail_puts.store(false, Ordering::SeqCst);
    let roots = stage.aggregate_pieces(&[piece(2, 64 * MIB)]).unwrap();
    assert_eq!(roots.len(), 1);
    assert_eq!(aggregates.len(), 1);
    assert_eq!(submissions.len(), 1);
}

#[test]
fn replay_from_unadvanced_buffer_is_identical() {
    let batch = [piece(4, 32 * MIB), piece(5, 64 * MIB), piece(6, 32 * MIB)];

    let run = || {
        let h = Harness::new();
        h.stage().aggregate_pieces(&[piece(1, 32 * MIB)]).unwrap();
        let roots = h.stage().aggregate_pieces(&batch).unwrap();
        let stored: Vec<Aggregate> = roots
            .iter()
            .map(|r| h.aggregates.get(&r.to_string()).unwrap().unwrap())
            .collect();
        (roots, stored, h.buffer())
    };
    assert_eq!(run(), run());
}

#[test]
fn enqueue_failure_keeps_written_aggregate() {
    let workspace = MemoryStore::<Buffer>::new();
    let aggregates = MemoryStore::<Aggregate>::new();
    let stage = PieceAggregator::new(&workspace, &aggregates, &DeadQueue);
    let err = stage
        .aggregate_pieces(&[piece(1, 64 * MIB), piece(2, 64 * MIB)])
        .unwrap_err();
    assert!(matches!(err, PipelineError::Io { step: Step::Enqueue, .. }));
    assert_eq!(aggregates.len(), 1);
}

#[test]
fn backend_failure_blocks_acceptance() {
    let h = Harness::new();
    let roots = h
        .stage()
        .aggregate_pieces(&[piece(1, 64 * MIB), piece(2, 64 * MIB)])
        .unwrap();

    let backend = RecordingBackend::failing();
    let acceptance = MemoryQueue::<LinkMessage>::new();
    let submitter = AggregateSubmitter::new(&h.aggregates, &backend, &acceptance, 5);
    let err = submitter.submit_aggregates(&roots).unwrap_err();
    assert!(matches!(err, PipelineError::Backend { proof_set: 5, roots: 1, .. }));
    assert!(err.is_retryable());
    assert!(acceptance.is_empty());

    backend.set_failing(false);
    let handled = submitter.handle(&h.submissions.drain()).unwrap();
    assert!(handled.rejected.is_empty());
    assert_eq!(acceptance.drain(), vec![LinkMessage::new(&roots[0])]);

    let calls = backend.calls();
    assert_eq!(calls.len(), 1);
    let subroots: Vec<&str> = calls[0].1[0]
        .subroots
        .iter()
        .map(|s| s.subroot_identifier.as_str())
        .collect();
    assert_eq!(
        subroots,
        vec![piece(1, 64 * MIB).to_string(), piece(2, 64 * MIB).to_string()]
    );
}

#[test]
fn failed_submission_stays_pending_until_accepted() {
    let h = Harness::new();
    let stage = h.stage();
    let first = stage
        .aggregate_pieces(&[piece(1, 64 * MIB), piece(2, 64 * MIB)])
        .unwrap();

    let pending = MemoryStore::<Vec<PieceLink>>::new();
    let backend = RecordingBackend::failing();
    let acceptance = MemoryQueue::<LinkMessage>::new();
    let submitter = AggregateSubmitter::new(&h.aggregates, &backend, &acceptance, 2);

    let err = submitter.submit_pending(&pending, &first).unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(pending.get(PENDING_KEY).unwrap(), Some(first.clone()));
    assert!(acceptance.is_empty());

    // A later batch carries the failed roots along with the new ones.
    let second = stage
        .aggregate_pieces(&[piece(3, 64 * MIB), piece(4, 64 * MIB)])
        .unwrap();
    backend.set_failing(false);
    let submitted = submitter.submit_pending(&pending, &second).unwrap();
    assert_eq!(submitted, vec![first[0], second[0]]);
    assert_eq!(pending.get(PENDING_KEY).unwrap(), Some(Vec::new()));
    assert_eq!(
        acceptance.drain(),
        vec![LinkMessage::new(&first[0]), LinkMessage::new(&second[0])]
    );

    let calls = backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1.len(), 2);

    // Nothing pending, nothing submitted.
    assert!(submitter.submit_pending(&pending, &[]).unwrap().is_empty());
    assert_eq!(backend.calls().len(), 1);
}

#[test]
fn missing_aggregate_is_fatal_for_submission() {
    let aggregates = MemoryStore::<Aggregate>::new();
    let backend = RecordingBackend::new();
    let acceptance = MemoryQueue::<LinkMessage>::new();
    let submitter = AggregateSubmitter::new(&aggregates, &backend, &acceptance, 1);
    let err = submitter.submit_aggregates(&[piece(1, 256)]).unwrap_err();
    assert!(matches!(err, PipelineError::MissingAggregate(_)));
    assert!(!err.is_retryable());
    assert!(backend.calls().is_empty());
}

#[test]
fn receipts_are_stable_under_redelivery() {
    let h = Harness::new();
    let roots = h
        .stage()
        .aggregate_pieces(&[piece(1, 64 * MIB), piece(2, 32 * MIB), piece(3, 32 * MIB)])
        .unwrap();
    assert_eq!(roots.len(), 1);

    let receipts = MemoryStore::<Receipt>::new();
    let index = MemoryStore::<String>::new();
    let attestor = Ed25519Attestor::from_seed(&[3u8; 32]);
    let accepter = PieceAccepter::new(&h.aggregates, ReceiptStore::new(&receipts, &index), &attestor);

    let first = accepter.handle(&[LinkMessage::new(&roots[0])]).unwrap().output;
    let second = accepter.accept_pieces(&roots).unwrap();
    assert_eq!(first, second);
    assert_eq!(receipts.len(), 3);

    let store = ReceiptStore::new(&receipts, &index);
    for r in &first {
        let got = store.get_verified(&r.ran).unwrap().unwrap();
        assert_eq!(&got, r);
        assert_eq!(got.aggregate, roots[0]);
    }
}

#[test]
fn fs_stores_survive_a_restart() {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("pdpagg_stages_{nanos}"));
    let submissions = MemoryQueue::<LinkMessage>::new();

    {
        let ws = FsStore::<Buffer>::new(dir.join("workspace"));
        let aggs = FsStore::<Aggregate>::new(dir.join("aggregates"));
        PieceAggregator::new(&ws, &aggs, &submissions)
            .aggregate_pieces(&[piece(1, 64 * MIB)])
            .unwrap();
    }

    let ws = FsStore::<Buffer>::new(dir.join("workspace"));
    let aggs = FsStore::<Aggregate>::new(dir.join("aggregates"));
    let roots = PieceAggregator::new(&ws, &aggs, &submissions)
        .aggregate_pieces(&[piece(2, 64 * MIB)])
        .unwrap();
    assert_eq!(roots.len(), 1);
    let agg = aggs.get(&roots[0].to_string()).unwrap().unwrap();
    assert_eq!(agg.len(), 2);
    assert!(ws.get(BUFFER_KEY).unwrap().unwrap().is_empty());
    let _ = std::fs::remove_dir_all(dir);
}
