//! Buffer ledger
//!
//! Every handle leaving the device is recorded here; every handle coming
//! back (released, or consumed as reprocess input) is checked off. A
//! balanced ledger means nothing leaked and nothing was returned twice.

use std::collections::{HashMap, HashSet};
use std::fmt;

use bytes::Bytes;
use contracts::{BufferFormat, BufferHandle, BufferId, BufferReleaser, ContractError, StreamKind};
use parking_lot::Mutex;
use tracing::warn;

/// Snapshot of ledger counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerReport {
    /// Handles handed out
    pub issued: u64,
    /// Handles returned through `release_buffer`
    pub released: u64,
    /// Handles consumed as reprocess input
    pub queued: u64,
    /// Handles still held by the consumer
    pub outstanding: u64,
    /// Returns of a handle that was already returned
    pub double_releases: u64,
    /// Returns of a handle that was never issued
    pub unknown_releases: u64,
}

impl LedgerReport {
    pub fn is_balanced(&self) -> bool {
        self.outstanding == 0 && self.double_releases == 0 && self.unknown_releases == 0
    }
}

impl fmt::Display for LedgerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "issued={} released={} queued={} outstanding={} double={} unknown={}",
            self.issued,
            self.released,
            self.queued,
            self.outstanding,
            self.double_releases,
            self.unknown_releases
        )
    }
}

#[derive(Default)]
struct LedgerState {
    next_id: u64,
    outstanding: HashMap<BufferId, StreamKind>,
    returned: HashSet<BufferId>,
    report: LedgerReport,
}

/// Per-buffer ownership accounting
#[derive(Default)]
pub struct BufferLedger {
    state: Mutex<LedgerState>,
}

impl BufferLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new handle and record it as outstanding
    pub fn issue(
        &self,
        stream: StreamKind,
        format: BufferFormat,
        timestamp_ns: u64,
        data: Bytes,
    ) -> BufferHandle {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = BufferId(state.next_id);
        state.outstanding.insert(id, stream);
        state.report.issued += 1;
        BufferHandle::new(id, stream, format, timestamp_ns, data)
    }

    /// Issue a small private-format handle (test helper)
    pub fn mint(&self, timestamp_ns: u64) -> BufferHandle {
        self.issue(
            StreamKind::Private,
            BufferFormat::Private,
            timestamp_ns,
            Bytes::from_static(&[0u8; 16]),
        )
    }

    /// Record a handle consumed as reprocess input
    pub fn consume(&self, buffer: BufferHandle) -> Result<(), ContractError> {
        self.check_in(buffer, true)
    }

    fn check_in(&self, buffer: BufferHandle, queued: bool) -> Result<(), ContractError> {
        let id = buffer.id();
        drop(buffer);

        let mut state = self.state.lock();
        if state.outstanding.remove(&id).is_some() {
            state.returned.insert(id);
            if queued {
                state.report.queued += 1;
            } else {
                state.report.released += 1;
            }
            return Ok(());
        }

        let message = if state.returned.contains(&id) {
            state.report.double_releases += 1;
            "already returned"
        } else {
            state.report.unknown_releases += 1;
            "never issued"
        };
        warn!(buffer_id = %id, message, "invalid buffer return");
        Err(ContractError::InvalidRelease {
            buffer_id: id,
            message: message.to_string(),
        })
    }

    /// Ids still held by the consumer, ascending
    pub fn outstanding_ids(&self) -> Vec<BufferId> {
        let state = self.state.lock();
        let mut ids: Vec<_> = state.outstanding.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Whether a handle has been returned (released or queued)
    pub fn was_returned(&self, id: BufferId) -> bool {
        self.state.lock().returned.contains(&id)
    }

    pub fn report(&self) -> LedgerReport {
        let state = self.state.lock();
        let mut report = state.report.clone();
        report.outstanding = state.outstanding.len() as u64;
        report
    }

    pub fn is_balanced(&self) -> bool {
        self.report().is_balanced()
    }
}

impl BufferReleaser for BufferLedger {
    fn release_buffer(&self, buffer: BufferHandle) -> Result<(), ContractError> {
        self.check_in(buffer, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_release_balances() {
        let ledger = BufferLedger::new();
        let a = ledger.mint(1);
        let b = ledger.mint(2);
        assert_eq!(ledger.report().outstanding, 2);

        ledger.release_buffer(a).unwrap();
        ledger.consume(b).unwrap();

        let report = ledger.report();
        assert_eq!(report.released, 1);
        assert_eq!(report.queued, 1);
        assert!(report.is_balanced());
    }

    #[test]
    fn test_double_release_is_flagged() {
        let ledger = BufferLedger::new();
        let a = ledger.mint(1);
        let id = a.id();
        ledger.release_buffer(a).unwrap();

        // Forge a second handle with the same id
        let forged = BufferHandle::new(
            id,
            StreamKind::Private,
            BufferFormat::Private,
            1,
            Bytes::new(),
        );
        let err = ledger.release_buffer(forged).unwrap_err();
        assert!(matches!(err, ContractError::InvalidRelease { .. }));
        assert_eq!(ledger.report().double_releases, 1);
        assert!(!ledger.is_balanced());
    }

    #[test]
    fn test_unknown_release_is_flagged() {
        let ledger = BufferLedger::new();
        let stray = BufferHandle::new(
            BufferId(999),
            StreamKind::Final,
            BufferFormat::Jpeg,
            0,
            Bytes::new(),
        );
        assert!(ledger.release_buffer(stray).is_err());
        assert_eq!(ledger.report().unknown_releases, 1);
    }

    #[test]
    fn test_outstanding_ids_lists_leaks() {
        let ledger = BufferLedger::new();
        let a = ledger.mint(1);
        let b = ledger.mint(2);
        let b_id = b.id();
        ledger.release_buffer(a).unwrap();
        assert_eq!(ledger.outstanding_ids(), vec![b_id]);
        ledger.release_buffer(b).unwrap();
        assert!(ledger.was_returned(b_id));
    }
}
