//! Positional metadata/buffer pairing with bounded retention.
//!
//! Two FIFO pending sequences are joined head-to-head whenever both are
//! non-empty. Joined pairs are retained up to `capacity`; past that the
//! oldest pair is evicted and its buffer released. Pairing is by arrival
//! position only: a dropped buffer on one side shifts every later join.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use contracts::{BufferHandle, BufferReleaser, MetadataRecord, PairedUnit};
use observability::metrics;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, instrument, trace, warn};

/// Result of one arrival
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Pairs formed by this arrival
    pub formed: usize,
    /// Pairs evicted (and released) over capacity
    pub evicted: usize,
}

/// Lifetime counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PairingStats {
    pub formed: u64,
    pub evicted: u64,
    pub taken: u64,
    pub released: u64,
    pub release_failures: u64,
}

/// Pairing queue
pub struct PairingQueue {
    label: &'static str,
    capacity: usize,
    pending_metadata: VecDeque<MetadataRecord>,
    pending_buffers: VecDeque<BufferHandle>,
    retained: VecDeque<PairedUnit>,
    releaser: Arc<dyn BufferReleaser>,
    stats: PairingStats,
}

impl fmt::Debug for PairingQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingQueue")
            .field("label", &self.label)
            .field("capacity", &self.capacity)
            .field("pending_metadata", &self.pending_metadata.len())
            .field("pending_buffers", &self.pending_buffers.len())
            .field("retained", &self.retained.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl PairingQueue {
    /// Create a queue retaining at most `capacity` pairs (minimum 1)
    pub fn new(capacity: usize, releaser: Arc<dyn BufferReleaser>) -> Self {
        Self {
            label: "pairing",
            capacity: capacity.max(1),
            pending_metadata: VecDeque::new(),
            pending_buffers: VecDeque::new(),
            retained: VecDeque::with_capacity(capacity.max(1) + 1),
            releaser,
            stats: PairingStats::default(),
        }
    }

    /// Name used in log fields
    pub fn with_label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn retained_len(&self) -> usize {
        self.retained.len()
    }

    pub fn pending_metadata_len(&self) -> usize {
        self.pending_metadata.len()
    }

    pub fn pending_buffers_len(&self) -> usize {
        self.pending_buffers.len()
    }

    /// No pending or retained state at all
    pub fn is_empty(&self) -> bool {
        self.retained.is_empty() && self.pending_metadata.is_empty() && self.pending_buffers.is_empty()
    }

    pub fn stats(&self) -> PairingStats {
        self.stats
    }

    /// Metadata of retained pairs, oldest first
    pub fn retained_metadata(&self) -> impl Iterator<Item = &MetadataRecord> {
        self.retained.iter().map(|pair| &pair.metadata)
    }

    #[instrument(
        name = "pairing_on_metadata",
        level = "trace",
        skip(self, record),
        fields(queue = self.label, frame_number = record.frame_number)
    )]
    pub fn on_metadata_arrived(&mut self, record: MetadataRecord) -> JoinOutcome {
        self.pending_metadata.push_back(record);
        self.join()
    }

    #[instrument(
        name = "pairing_on_buffer",
        level = "trace",
        skip(self, buffer),
        fields(queue = self.label, buffer_id = %buffer.id())
    )]
    pub fn on_buffer_arrived(&mut self, buffer: BufferHandle) -> JoinOutcome {
        self.pending_buffers.push_back(buffer);
        self.join()
    }

    fn join(&mut self) -> JoinOutcome {
        let mut outcome = JoinOutcome::default();

        while !self.pending_metadata.is_empty() && !self.pending_buffers.is_empty() {
            let (Some(metadata), Some(buffer)) = (
                self.pending_metadata.pop_front(),
                self.pending_buffers.pop_front(),
            ) else {
                break;
            };
            trace!(
                queue = self.label,
                frame_number = metadata.frame_number,
                buffer_id = %buffer.id(),
                "pair formed"
            );
            self.retained.push_back(PairedUnit { metadata, buffer });
            self.stats.formed += 1;
            outcome.formed += 1;
            metrics::record_pair_formed();

            while self.retained.len() > self.capacity {
                let Some(evicted) = self.retained.pop_front() else {
                    break;
                };
                let (metadata, buffer) = evicted.into_parts();
                debug!(
                    queue = self.label,
                    frame_number = metadata.frame_number,
                    buffer_id = %buffer.id(),
                    "evicting oldest pair"
                );
                self.stats.evicted += 1;
                outcome.evicted += 1;
                metrics::record_pair_evicted();
                self.release(buffer);
            }
        }

        metrics::record_pending_depths(self.pending_metadata.len(), self.pending_buffers.len());
        outcome
    }

    /// Remove the oldest retained pair; the caller now owns its buffer
    pub fn take_oldest_pair(&mut self) -> Option<PairedUnit> {
        let pair = self.retained.pop_front()?;
        self.stats.taken += 1;
        trace!(
            queue = self.label,
            frame_number = pair.metadata.frame_number,
            buffer_id = %pair.buffer.id(),
            "pair taken"
        );
        Some(pair)
    }

    /// Release every owned buffer and clear all state
    ///
    /// Idempotent. Returns the number of buffers released.
    #[instrument(name = "pairing_drain", skip(self), fields(queue = self.label))]
    pub fn drain_and_release_all(&mut self) -> usize {
        let dropped_metadata = self.pending_metadata.len();
        self.pending_metadata.clear();

        let mut released = 0;
        while let Some(pair) = self.retained.pop_front() {
            self.release(pair.buffer);
            released += 1;
        }
        while let Some(buffer) = self.pending_buffers.pop_front() {
            self.release(buffer);
            released += 1;
        }

        if released > 0 || dropped_metadata > 0 {
            debug!(
                queue = self.label,
                released, dropped_metadata, "pairing queue drained"
            );
        }
        metrics::record_pending_depths(0, 0);
        released
    }

    /// Best-effort release; failures are logged, never propagated
    fn release(&mut self, buffer: BufferHandle) {
        let buffer_id = buffer.id();
        match self.releaser.release_buffer(buffer) {
            Ok(()) => {
                self.stats.released += 1;
                metrics::record_buffer_released(1);
            }
            Err(e) => {
                self.stats.release_failures += 1;
                warn!(queue = self.label, %buffer_id, error = %e, "buffer release failed");
            }
        }
    }
}

/// Pairing queue shared across tasks under a mutex
#[derive(Clone)]
pub struct SharedPairingQueue {
    inner: Arc<Mutex<PairingQueue>>,
}

impl SharedPairingQueue {
    pub fn new(queue: PairingQueue) -> Self {
        Self {
            inner: Arc::new(Mutex::new(queue)),
        }
    }

    /// Exclusive access for multi-step operations
    pub fn lock(&self) -> MutexGuard<'_, PairingQueue> {
        self.inner.lock()
    }

    pub fn on_metadata_arrived(&self, record: MetadataRecord) -> JoinOutcome {
        self.inner.lock().on_metadata_arrived(record)
    }

    pub fn on_buffer_arrived(&self, buffer: BufferHandle) -> JoinOutcome {
        self.inner.lock().on_buffer_arrived(buffer)
    }

    pub fn take_oldest_pair(&self) -> Option<PairedUnit> {
        self.inner.lock().take_oldest_pair()
    }

    pub fn drain_and_release_all(&self) -> usize {
        self.inner.lock().drain_and_release_all()
    }

    pub fn retained_len(&self) -> usize {
        self.inner.lock().retained_len()
    }

    pub fn stats(&self) -> PairingStats {
        self.inner.lock().stats()
    }
}

impl fmt::Debug for SharedPairingQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedPairingQueue")
            .field(&*self.inner.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{BufferId, ContractError, RequestId};
    use device::BufferLedger;
    use proptest::prelude::*;

    fn meta(frame_number: u64) -> MetadataRecord {
        MetadataRecord {
            frame_number,
            request_id: RequestId(1),
            timestamp_ns: frame_number * 1_000,
        }
    }

    fn queue(capacity: usize) -> (PairingQueue, Arc<BufferLedger>) {
        let ledger = Arc::new(BufferLedger::new());
        (PairingQueue::new(capacity, ledger.clone()), ledger)
    }

    #[test]
    fn test_positional_pairing_leaves_extra_metadata_pending() {
        let (mut q, ledger) = queue(4);
        let b1 = ledger.mint(1);
        let b2 = ledger.mint(2);
        let (id1, id2) = (b1.id(), b2.id());

        q.on_metadata_arrived(meta(1));
        assert_eq!(q.on_buffer_arrived(b1).formed, 1);
        q.on_metadata_arrived(meta(2));
        q.on_metadata_arrived(meta(3));
        assert_eq!(q.on_buffer_arrived(b2).formed, 1);

        assert_eq!(q.pending_metadata_len(), 1);
        assert_eq!(q.pending_buffers_len(), 0);

        let first = q.take_oldest_pair().unwrap();
        assert_eq!((first.metadata.frame_number, first.buffer.id()), (1, id1));
        let second = q.take_oldest_pair().unwrap();
        assert_eq!((second.metadata.frame_number, second.buffer.id()), (2, id2));
        assert!(q.take_oldest_pair().is_none());

        ledger.release_buffer(first.buffer).unwrap();
        ledger.release_buffer(second.buffer).unwrap();
        assert!(ledger.is_balanced());
    }

    #[test]
    fn test_buffers_first_then_metadata() {
        let (mut q, ledger) = queue(2);
        let b1 = ledger.mint(1);
        let id1 = b1.id();
        q.on_buffer_arrived(b1);
        q.on_buffer_arrived(ledger.mint(2));
        let outcome = q.on_metadata_arrived(meta(7));
        assert_eq!(outcome, JoinOutcome { formed: 1, evicted: 0 });

        let pair = q.take_oldest_pair().unwrap();
        assert_eq!(pair.metadata.frame_number, 7);
        assert_eq!(pair.buffer.id(), id1);
        ledger.release_buffer(pair.buffer).unwrap();

        assert_eq!(q.drain_and_release_all(), 1);
        assert!(ledger.is_balanced());
    }

    #[test]
    fn test_capacity_evicts_oldest_and_releases() {
        let (mut q, ledger) = queue(2);
        let first = ledger.mint(1);
        let first_id = first.id();

        q.on_metadata_arrived(meta(1));
        q.on_buffer_arrived(first);
        q.on_metadata_arrived(meta(2));
        q.on_buffer_arrived(ledger.mint(2));
        q.on_metadata_arrived(meta(3));
        let outcome = q.on_buffer_arrived(ledger.mint(3));

        assert_eq!(outcome.evicted, 1);
        assert_eq!(q.retained_len(), 2);
        assert!(ledger.was_returned(first_id));
        let frames: Vec<_> = q.retained_metadata().map(|m| m.frame_number).collect();
        assert_eq!(frames, vec![2, 3]);
        assert_eq!(q.stats().evicted, 1);
    }

    #[test]
    fn test_drain_releases_everything_and_is_idempotent() {
        let (mut q, ledger) = queue(2);
        for frame in 1..=3 {
            q.on_metadata_arrived(meta(frame));
            q.on_buffer_arrived(ledger.mint(frame));
        }
        // one unmatched buffer
        q.on_buffer_arrived(ledger.mint(4));

        assert_eq!(q.retained_len(), 2);
        assert_eq!(ledger.report().outstanding, 3);
        assert_eq!(q.drain_and_release_all(), 3);
        assert!(q.is_empty());
        assert!(ledger.is_balanced());

        assert_eq!(q.drain_and_release_all(), 0);
        assert_eq!(ledger.report().double_releases, 0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let (q, _) = queue(0);
        assert_eq!(q.capacity(), 1);
    }

    struct FailingReleaser;

    impl BufferReleaser for FailingReleaser {
        fn release_buffer(&self, buffer: BufferHandle) -> Result<(), ContractError> {
            Err(ContractError::InvalidRelease {
                buffer_id: buffer.id(),
                message: "device gone".into(),
            })
        }
    }

    #[test]
    fn test_release_failure_is_not_propagated() {
        let ledger = BufferLedger::new();
        let mut q = PairingQueue::new(1, Arc::new(FailingReleaser));
        q.on_metadata_arrived(meta(1));
        q.on_buffer_arrived(ledger.mint(1));
        q.on_metadata_arrived(meta(2));
        let outcome = q.on_buffer_arrived(ledger.mint(2));
        assert_eq!(outcome.evicted, 1);
        assert_eq!(q.stats().release_failures, 1);
        assert_eq!(q.drain_and_release_all(), 1);
        assert_eq!(q.stats().release_failures, 2);
    }

    #[test]
    fn test_shared_queue_clones_see_same_state() {
        let ledger = Arc::new(BufferLedger::new());
        let shared = SharedPairingQueue::new(PairingQueue::new(1, ledger.clone()).with_label("input"));
        let other = shared.clone();

        shared.on_metadata_arrived(meta(1));
        other.on_buffer_arrived(ledger.mint(1));
        assert_eq!(shared.retained_len(), 1);

        let pair = other.take_oldest_pair().unwrap();
        assert_eq!(shared.lock().label(), "input");
        ledger.release_buffer(pair.buffer).unwrap();
        assert!(ledger.is_balanced());
        assert_eq!(shared.stats().taken, 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Metadata,
        Buffer,
        Take,
        Drain,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => Just(Op::Metadata),
            4 => Just(Op::Buffer),
            2 => Just(Op::Take),
            1 => Just(Op::Drain),
        ]
    }

    proptest! {
        #[test]
        fn prop_every_buffer_released_exactly_once(
            capacity in 1usize..4,
            ops in prop::collection::vec(op(), 0..200),
        ) {
            let (mut q, ledger) = queue(capacity);
            let mut next_frame = 0u64;
            let mut metadata_seen = 0u64;
            let mut buffers_seen = 0u64;

            for op in ops {
                match op {
                    Op::Metadata => {
                        next_frame += 1;
                        metadata_seen += 1;
                        q.on_metadata_arrived(meta(next_frame));
                    }
                    Op::Buffer => {
                        buffers_seen += 1;
                        q.on_buffer_arrived(ledger.mint(buffers_seen));
                    }
                    Op::Take => {
                        if let Some(pair) = q.take_oldest_pair() {
                            ledger.release_buffer(pair.buffer).unwrap();
                        }
                    }
                    Op::Drain => {
                        q.drain_and_release_all();
                    }
                }
                prop_assert!(q.retained_len() <= capacity);
                prop_assert!(q.pending_metadata_len() == 0 || q.pending_buffers_len() == 0);
            }
            q.drain_and_release_all();

            let report = ledger.report();
            prop_assert_eq!(report.issued, buffers_seen);
            prop_assert!(report.is_balanced(), "ledger unbalanced: {}", report);
            prop_assert!(metadata_seen >= q.stats().formed);
        }

        #[test]
        fn prop_pairs_follow_arrival_order(
            interleaving in prop::collection::vec(any::<bool>(), 0..64),
        ) {
            // true = metadata, false = buffer; both sides counted in order
            let (mut q, ledger) = queue(64);
            let mut metas = 0u64;
            let mut buffer_ids: Vec<BufferId> = Vec::new();
            for is_meta in interleaving {
                if is_meta {
                    metas += 1;
                    q.on_metadata_arrived(meta(metas));
                } else {
                    let buffer = ledger.mint(buffer_ids.len() as u64);
                    buffer_ids.push(buffer.id());
                    q.on_buffer_arrived(buffer);
                }
            }

            let mut position = 0usize;
            while let Some(pair) = q.take_oldest_pair() {
                prop_assert_eq!(pair.metadata.frame_number, position as u64 + 1);
                prop_assert_eq!(pair.buffer.id(), buffer_ids[position]);
                ledger.release_buffer(pair.buffer).unwrap();
                position += 1;
            }
            prop_assert_eq!(position as u64, metas.min(buffer_ids.len() as u64));
            q.drain_and_release_all();
            prop_assert!(ledger.is_balanced());
        }
    }
}
