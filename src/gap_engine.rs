/// Per-connection sequence gap reconciliation
///
/// Tracks the next expected byte offset of every open connection, buffers
/// packets that arrive ahead of it, and chains buffered packets back in as
/// soon as the stream catches up. Once the trace is exhausted, `finalize`
/// turns whatever is still buffered into an exact list of missing byte ranges.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::connection::ConnectionKey;
use crate::record::{CloseFlag, PacketRecord};
use crate::report::{Gap, GapStart, LossReport, OpenConnection, UnresolvedEntry};
use crate::stats::TraceStats;

/// Offset a connection expects right after its start record
pub const START_OFFSET: u64 = 1;

/// How a start record (sequence number 0) sets the first expected offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPolicy {
    /// Always `START_OFFSET`, whatever the start record carries
    #[default]
    Fixed,
    /// Advance by the start record's payload + header like any other record
    SegmentLength,
}

/// A buffered out-of-sequence packet
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OosEntry {
    pub sequence: u64,
    pub next_offset: u64,
    pub close: CloseFlag,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Copy)]
struct Expected {
    offset: u64,
    since: f64,
}

type Pool<K> = BTreeMap<K, BTreeMap<u64, OosEntry>>;

#[derive(Debug, Clone)]
pub struct GapEngine<K = ConnectionKey> {
    // Open connections: key -> next expected offset
    expected: BTreeMap<K, Expected>,

    // Out-of-sequence pool: key -> (sequence -> entry)
    pool: Pool<K>,

    // Connections that reached a close flag while in sequence
    closed: Vec<K>,

    stats: TraceStats,
    start_policy: StartPolicy,
}

impl<K: Ord + Clone + fmt::Debug> GapEngine<K> {
    pub fn new() -> Self {
        Self::with_start_policy(StartPolicy::default())
    }

    pub fn with_start_policy(start_policy: StartPolicy) -> Self {
        GapEngine {
            expected: BTreeMap::new(),
            pool: BTreeMap::new(),
            closed: Vec::new(),
            stats: TraceStats::new(),
            start_policy,
        }
    }

    /// Process one packet record
    pub fn ingest(&mut self, record: &PacketRecord<K>) {
        self.stats.record_packet(record.size(), record.timestamp);

        let in_sequence = self
            .expected
            .get(&record.key)
            .map_or(false, |exp| exp.offset == record.sequence);

        if in_sequence {
            self.chain_walk(&record.key, record.next_offset(), record.close, record.timestamp);
        } else if record.is_start() {
            self.start(record);
        } else {
            self.buffer(record);
        }
    }

    fn start(&mut self, record: &PacketRecord<K>) {
        if let Some(exp) = self.expected.get(&record.key) {
            // Repeated start of a connection that is already open
            debug!(key = ?record.key, expected = exp.offset, "ignoring duplicate start");
            return;
        }

        self.stats.record_connection();
        let offset = match self.start_policy {
            StartPolicy::Fixed => START_OFFSET,
            StartPolicy::SegmentLength => record.next_offset(),
        };
        debug!(key = ?record.key, offset, "connection started");

        self.chain_walk(&record.key, offset, record.close, record.timestamp);
    }

    fn buffer(&mut self, record: &PacketRecord<K>) {
        let entry = OosEntry {
            sequence: record.sequence,
            next_offset: record.next_offset(),
            close: record.close,
            timestamp: record.timestamp,
        };

        let replaced = self
            .pool
            .entry(record.key.clone())
            .or_default()
            .insert(record.sequence, entry);

        trace!(
            key = ?record.key,
            seq = record.sequence,
            replaced = replaced.is_some(),
            "buffered out-of-sequence packet"
        );
    }

    /// Advance `key` to `next_offset`, then keep advancing through every
    /// buffered packet that has become contiguous. The connection closes if
    /// any packet along the chain carries the terminating flag.
    fn chain_walk(&mut self, key: &K, mut next_offset: u64, close: CloseFlag, mut timestamp: f64) {
        let mut closes = close.terminates();
        let mut chained = 0usize;

        let slot = self.expected.entry(key.clone()).or_insert(Expected {
            offset: next_offset,
            since: timestamp,
        });

        loop {
            slot.offset = next_offset;
            slot.since = timestamp;

            match take_pooled(&mut self.pool, key, next_offset) {
                Some(entry) => {
                    next_offset = entry.next_offset;
                    timestamp = entry.timestamp;
                    closes |= entry.close.terminates();
                    chained += 1;
                }
                None => break,
            }
        }

        if chained > 0 {
            debug!(?key, chained, offset = next_offset, "chained buffered packets");
        }

        if closes {
            self.expected.remove(key);
            self.closed.push(key.clone());
            debug!(?key, offset = next_offset, "connection closed");
        }
    }

    /// Reconcile the buffered packets against the open connections and
    /// produce the final loss report.
    pub fn finalize(mut self) -> LossReport<K> {
        info!(
            packets = self.stats.total_packets(),
            open = self.expected.len(),
            pooled = self.pooled_count(),
            "reconciling trace"
        );

        // Leftovers of cleanly closed connections are retransmissions, even
        // when a repeated start has reopened the key since
        for key in &self.closed {
            if let Some(entries) = self.pool.remove(key) {
                self.stats.record_stale(entries.len());
            }
        }

        // Entries the stream has already moved past
        for (key, exp) in &self.expected {
            let emptied = match self.pool.get_mut(key) {
                Some(entries) => {
                    let before = entries.len();
                    entries.retain(|&seq, _| seq >= exp.offset);
                    self.stats.record_redundant(before - entries.len());
                    entries.is_empty()
                }
                None => false,
            };
            if emptied {
                self.pool.remove(key);
            }
        }

        let unresolved: Vec<UnresolvedEntry<K>> = self
            .pool
            .iter()
            .flat_map(|(key, entries)| {
                entries.values().map(move |entry| UnresolvedEntry {
                    key: key.clone(),
                    sequence: entry.sequence,
                    next_offset: entry.next_offset,
                    close: entry.close,
                    timestamp: entry.timestamp,
                })
            })
            .collect();

        let mut gaps = Vec::new();
        let mut missing_bytes = 0u64;
        let mut missing_start = Vec::new();
        let mut closed_with_gaps = Vec::new();

        for (key, mut entries) in std::mem::take(&mut self.pool) {
            let (first_seq, first) = match entries.pop_first() {
                Some(first) => first,
                None => continue,
            };

            let (from, base) = match self.expected.get(&key) {
                Some(exp) => (GapStart::Offset(exp.offset), exp.offset),
                None => {
                    missing_start.push(key.clone());
                    (GapStart::ConnectionStart, 0)
                }
            };

            if first_seq > base {
                let bytes = first_seq - base;
                missing_bytes = missing_bytes.saturating_add(bytes);
                gaps.push(Gap {
                    key: key.clone(),
                    from,
                    to: first_seq,
                    bytes,
                    timestamp: first.timestamp,
                });
            }

            // Walk the rest in sequence order; contiguous entries advance the
            // offset, anything beyond it opens the next gap. Only a close flag
            // on the last entry walked ends the connection.
            let mut offset = first.next_offset;
            let mut closes = first.close.terminates();
            while let Some((seq, entry)) = entries.pop_first() {
                if seq > offset {
                    let bytes = seq - offset;
                    missing_bytes = missing_bytes.saturating_add(bytes);
                    gaps.push(Gap {
                        key: key.clone(),
                        from: GapStart::Offset(offset),
                        to: seq,
                        bytes,
                        timestamp: entry.timestamp,
                    });
                }
                offset = offset.max(entry.next_offset);
                closes = entry.close.terminates();
            }

            if closes {
                self.expected.remove(&key);
                closed_with_gaps.push(key);
            }
        }

        let open: Vec<OpenConnection<K>> = self
            .expected
            .into_iter()
            .map(|(key, exp)| OpenConnection {
                key,
                expected_offset: exp.offset,
                since: exp.since,
            })
            .collect();

        info!(
            missing_bytes,
            gaps = gaps.len(),
            open = open.len(),
            orphaned = missing_start.len(),
            "reconciliation complete"
        );

        LossReport {
            stats: self.stats,
            missing_bytes,
            gaps,
            open,
            unresolved,
            missing_start,
            closed_in_sequence: self.closed.len(),
            closed_with_gaps,
        }
    }

    /// Expected offset of an open connection
    pub fn expected_offset(&self, key: &K) -> Option<u64> {
        self.expected.get(key).map(|exp| exp.offset)
    }

    /// Number of buffered entries for one connection
    pub fn pooled(&self, key: &K) -> usize {
        self.pool.get(key).map_or(0, |entries| entries.len())
    }

    /// Number of buffered entries across all connections
    pub fn pooled_count(&self) -> usize {
        self.pool.values().map(|entries| entries.len()).sum()
    }

    pub fn open_count(&self) -> usize {
        self.expected.len()
    }

    pub fn is_open(&self, key: &K) -> bool {
        self.expected.contains_key(key)
    }

    /// Connections closed in sequence, in closing order
    pub fn closed_ledger(&self) -> &[K] {
        &self.closed
    }

    pub fn stats(&self) -> &TraceStats {
        &self.stats
    }

    pub fn start_policy(&self) -> StartPolicy {
        self.start_policy
    }
}

impl<K: Ord + Clone + fmt::Debug> Default for GapEngine<K> {
    fn default() -> Self {
        Self::new()
    }
}

fn take_pooled<K: Ord>(pool: &mut Pool<K>, key: &K, sequence: u64) -> Option<OosEntry> {
    let entries = pool.get_mut(key)?;
    let entry = entries.remove(&sequence)?;
    if entries.is_empty() {
        pool.remove(key);
    }
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(key: u64, seq: u64, len: u64, close: CloseFlag) -> PacketRecord<u64> {
        PacketRecord {
            key,
            timestamp: seq as f64,
            sequence: seq,
            payload_len: len,
            header_len: 0,
            close,
        }
    }

    fn open(key: u64, seq: u64, len: u64) -> PacketRecord<u64> {
        packet(key, seq, len, CloseFlag::Open)
    }

    #[test]
    fn test_start_sets_fixed_offset() {
        let mut engine = GapEngine::new();
        engine.ingest(&open(1, 0, 10));
        assert_eq!(engine.expected_offset(&1), Some(START_OFFSET));
        assert_eq!(engine.stats().connections_started(), 1);
    }

    #[test]
    fn test_start_segment_length_policy() {
        let mut engine = GapEngine::with_start_policy(StartPolicy::SegmentLength);
        engine.ingest(&open(1, 0, 10));
        assert_eq!(engine.expected_offset(&1), Some(10));
    }

    #[test]
    fn test_in_sequence_advance() {
        let mut engine = GapEngine::new();
        engine.ingest(&open(1, 0, 0));
        engine.ingest(&open(1, 1, 100));
        engine.ingest(&open(1, 101, 50));
        assert_eq!(engine.expected_offset(&1), Some(151));
        assert_eq!(engine.pooled(&1), 0);
    }

    #[test]
    fn test_chain_walk_drains_pool() {
        let mut engine = GapEngine::new();
        engine.ingest(&open(1, 0, 0));
        engine.ingest(&open(1, 21, 10));
        engine.ingest(&open(1, 11, 10));
        assert_eq!(engine.pooled(&1), 2);
        assert_eq!(engine.expected_offset(&1), Some(1));

        engine.ingest(&open(1, 1, 10));
        assert_eq!(engine.expected_offset(&1), Some(31));
        assert_eq!(engine.pooled(&1), 0);
        assert_eq!(engine.pooled_count(), 0);
    }

    #[test]
    fn test_chain_walk_stops_at_hole() {
        let mut engine = GapEngine::new();
        engine.ingest(&open(1, 0, 0));
        engine.ingest(&open(1, 11, 10));
        engine.ingest(&open(1, 31, 10));
        engine.ingest(&open(1, 1, 10));
        assert_eq!(engine.expected_offset(&1), Some(21));
        assert_eq!(engine.pooled(&1), 1);
    }

    #[test]
    fn test_close_in_chain_closes_connection() {
        let mut engine = GapEngine::new();
        engine.ingest(&open(1, 0, 0));
        engine.ingest(&packet(1, 11, 0, CloseFlag::Closed));
        engine.ingest(&open(1, 1, 10));
        assert!(!engine.is_open(&1));
        assert_eq!(engine.closed_ledger(), &[1]);
    }

    #[test]
    fn test_closing_flag_does_not_close() {
        let mut engine = GapEngine::new();
        engine.ingest(&open(1, 0, 0));
        engine.ingest(&packet(1, 1, 5, CloseFlag::Closing));
        assert!(engine.is_open(&1));
        assert!(engine.closed_ledger().is_empty());
    }

    #[test]
    fn test_start_chains_early_arrivals() {
        let mut engine = GapEngine::new();
        engine.ingest(&open(1, 1, 10));
        engine.ingest(&packet(1, 11, 10, CloseFlag::Closed));
        assert!(!engine.is_open(&1));

        engine.ingest(&open(1, 0, 0));
        assert!(!engine.is_open(&1));
        assert_eq!(engine.pooled_count(), 0);
        assert_eq!(engine.closed_ledger(), &[1]);
    }

    #[test]
    fn test_duplicate_start_ignored() {
        let mut engine = GapEngine::new();
        engine.ingest(&open(1, 0, 0));
        engine.ingest(&open(1, 1, 99));
        engine.ingest(&open(1, 0, 0));
        assert_eq!(engine.expected_offset(&1), Some(100));
        assert_eq!(engine.stats().connections_started(), 1);
    }

    #[test]
    fn test_duplicate_oos_overwrites() {
        let mut engine = GapEngine::new();
        engine.ingest(&open(1, 0, 0));
        engine.ingest(&open(1, 50, 10));
        engine.ingest(&open(1, 50, 20));
        assert_eq!(engine.pooled(&1), 1);

        let report = engine.finalize();
        assert_eq!(report.unresolved()[0].next_offset, 70);
    }

    #[test]
    fn test_counters_cover_every_branch() {
        let mut engine = GapEngine::new();
        engine.ingest(&open(1, 0, 4));
        engine.ingest(&open(1, 1, 10));
        engine.ingest(&open(1, 90, 6));
        assert_eq!(engine.stats().total_packets(), 3);
        assert_eq!(engine.stats().total_bytes(), 20);
    }

    #[test]
    fn test_finalize_discards_stale_after_close() {
        let mut engine = GapEngine::new();
        engine.ingest(&open(1, 0, 0));
        engine.ingest(&packet(1, 1, 10, CloseFlag::Closed));
        engine.ingest(&open(1, 1, 10));

        let report = engine.finalize();
        assert_eq!(report.missing_bytes(), 0);
        assert!(report.gaps().is_empty());
        assert!(report.open().is_empty());
        assert_eq!(report.stats().stale_entries_discarded(), 1);
    }

    #[test]
    fn test_finalize_discards_redundant() {
        let mut engine = GapEngine::new();
        engine.ingest(&open(1, 0, 0));
        engine.ingest(&open(1, 1, 10));
        engine.ingest(&open(1, 21, 10));
        engine.ingest(&open(1, 11, 10));
        // retransmission of an already-sequenced packet
        engine.ingest(&open(1, 1, 10));

        let report = engine.finalize();
        assert_eq!(report.missing_bytes(), 0);
        assert_eq!(report.stats().redundant_entries_discarded(), 1);
        assert_eq!(report.open()[0].expected_offset, 31);
    }

    #[test]
    fn test_finalize_multiple_gaps() {
        let mut engine = GapEngine::new();
        engine.ingest(&open(1, 0, 0));
        engine.ingest(&open(1, 1, 10));
        engine.ingest(&open(1, 21, 10)); // missing 11..21
        engine.ingest(&open(1, 31, 10));
        engine.ingest(&open(1, 61, 10)); // missing 41..61

        let report = engine.finalize();
        assert_eq!(report.missing_bytes(), 30);
        let spans: Vec<_> = report.gaps().iter().map(|g| (g.from, g.to, g.bytes)).collect();
        assert_eq!(
            spans,
            vec![
                (GapStart::Offset(11), 21, 10),
                (GapStart::Offset(41), 61, 20),
            ]
        );
    }

    #[test]
    fn test_finalize_orphan() {
        let mut engine = GapEngine::new();
        engine.ingest(&open(9, 500, 10));
        engine.ingest(&open(9, 510, 10));

        let report = engine.finalize();
        assert_eq!(report.missing_bytes(), 500);
        assert_eq!(report.gaps()[0].from, GapStart::ConnectionStart);
        assert_eq!(report.missing_start(), &[9]);
        assert!(report.open().is_empty());
    }

    #[test]
    fn test_finalize_overlapping_entries() {
        let mut engine = GapEngine::new();
        engine.ingest(&open(1, 0, 0));
        engine.ingest(&open(1, 11, 20)); // covers 11..31
        engine.ingest(&open(1, 21, 20)); // overlaps, ends 41
        engine.ingest(&open(1, 51, 10));

        let report = engine.finalize();
        // 1..11 and 41..51
        assert_eq!(report.missing_bytes(), 20);
        assert_eq!(report.gaps().len(), 2);
    }

    #[test]
    fn test_finalize_close_behind_gap() {
        let mut engine = GapEngine::new();
        engine.ingest(&open(1, 0, 0));
        engine.ingest(&open(1, 1, 10));
        engine.ingest(&packet(1, 21, 10, CloseFlag::Closed));

        let report = engine.finalize();
        assert_eq!(report.missing_bytes(), 10);
        assert!(report.open().is_empty());
        assert_eq!(report.closed_with_gaps(), &[1]);
    }

    #[test]
    fn test_finalize_close_followed_by_data_stays_open() {
        let mut engine = GapEngine::new();
        engine.ingest(&open(1, 0, 0));
        engine.ingest(&packet(1, 21, 10, CloseFlag::Closed));
        engine.ingest(&open(1, 41, 10));

        let report = engine.finalize();
        assert_eq!(report.missing_bytes(), 30);
        assert!(report.closed_with_gaps().is_empty());
        assert_eq!(report.open()[0].expected_offset, 1);
    }

    #[test]
    fn test_oversized_lengths_saturate() {
        let mut engine = GapEngine::new();
        engine.ingest(&open(1, 0, 0));
        engine.ingest(&PacketRecord {
            header_len: 1,
            ..open(1, 5, u64::MAX)
        });
        engine.ingest(&open(1, 7, u64::MAX));

        assert_eq!(engine.stats().total_bytes(), u64::MAX);
        let report = engine.finalize();
        assert_eq!(report.missing_bytes(), 4);
    }
}
