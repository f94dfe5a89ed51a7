/// Loss report
///
/// Final state of a reconciled trace: gaps, connections left open, buffered
/// packets that never fit, and the totals derived from them.

use std::fmt::Display;
use std::io::{self, Write};

use crate::record::CloseFlag;
use crate::stats::TraceStats;

const RULE: &str =
    "======================================================================================";

/// Where a gap begins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapStart {
    /// The connection's start was never observed
    ConnectionStart,
    Offset(u64),
}

/// A byte range that never appeared in the trace
#[derive(Debug, Clone, PartialEq)]
pub struct Gap<K> {
    pub key: K,
    pub from: GapStart,
    pub to: u64,
    pub bytes: u64,
    /// Timestamp of the first packet seen after the gap
    pub timestamp: f64,
}

/// A connection with no terminating close; loss after `expected_offset`
/// cannot be determined.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenConnection<K> {
    pub key: K,
    pub expected_offset: u64,
    pub since: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedEntry<K> {
    pub key: K,
    pub sequence: u64,
    pub next_offset: u64,
    pub close: CloseFlag,
    pub timestamp: f64,
}

/// Age thresholds, in trace seconds before the last packet
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub stale_after_secs: f64,
    pub critical_after_secs: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            stale_after_secs: 20.0,
            critical_after_secs: 60.0,
        }
    }
}

/// Loss or open state that predates the stale threshold
#[derive(Debug, Clone, PartialEq)]
pub struct StaleWarning<K> {
    pub key: K,
    pub since: f64,
    /// `None` for an open connection
    pub missing_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Staleness<K> {
    pub warnings: Vec<StaleWarning<K>>,
    /// Some warning also predates the critical threshold
    pub critical: bool,
}

#[derive(Debug, Clone)]
pub struct LossReport<K> {
    pub(crate) stats: TraceStats,
    pub(crate) missing_bytes: u64,
    pub(crate) gaps: Vec<Gap<K>>,
    pub(crate) open: Vec<OpenConnection<K>>,
    pub(crate) unresolved: Vec<UnresolvedEntry<K>>,
    pub(crate) missing_start: Vec<K>,
    pub(crate) closed_in_sequence: usize,
    pub(crate) closed_with_gaps: Vec<K>,
}

impl<K: Clone> LossReport<K> {
    pub fn stats(&self) -> &TraceStats {
        &self.stats
    }

    /// Bytes definitively missing; excludes whatever open connections lost
    /// after their last known offset.
    pub fn missing_bytes(&self) -> u64 {
        self.missing_bytes
    }

    pub fn loss_ratio(&self) -> f64 {
        self.stats.loss_ratio(self.missing_bytes)
    }

    pub fn loss_percent(&self) -> f64 {
        self.loss_ratio() * 100.0
    }

    /// Gaps ordered by connection, then offset
    pub fn gaps(&self) -> &[Gap<K>] {
        &self.gaps
    }

    pub fn open(&self) -> &[OpenConnection<K>] {
        &self.open
    }

    pub fn unresolved(&self) -> &[UnresolvedEntry<K>] {
        &self.unresolved
    }

    /// Connections seen only through out-of-sequence packets
    pub fn missing_start(&self) -> &[K] {
        &self.missing_start
    }

    pub fn closed_with_gaps(&self) -> &[K] {
        &self.closed_with_gaps
    }

    pub fn closed_in_sequence(&self) -> usize {
        self.closed_in_sequence
    }

    /// Connections started plus those whose start was never seen
    pub fn connection_count(&self) -> u64 {
        self.stats.connections_started() + self.missing_start.len() as u64
    }

    /// True when no open connection leaves trailing loss undetermined
    pub fn is_complete(&self) -> bool {
        self.open.is_empty()
    }

    /// Gaps and open connections older than the stale threshold
    pub fn staleness(&self, thresholds: Thresholds) -> Staleness<K> {
        let last = match self.stats.last_timestamp() {
            Some(last) => last,
            None => {
                return Staleness {
                    warnings: Vec::new(),
                    critical: false,
                }
            }
        };
        let stale_before = last - thresholds.stale_after_secs;
        let critical_before = last - thresholds.critical_after_secs;

        let mut warnings: Vec<StaleWarning<K>> = self
            .gaps
            .iter()
            .filter(|gap| gap.timestamp < stale_before)
            .map(|gap| StaleWarning {
                key: gap.key.clone(),
                since: gap.timestamp,
                missing_bytes: Some(gap.bytes),
            })
            .collect();

        warnings.extend(
            self.open
                .iter()
                .filter(|conn| conn.since < stale_before)
                .map(|conn| StaleWarning {
                    key: conn.key.clone(),
                    since: conn.since,
                    missing_bytes: None,
                }),
        );

        let critical = warnings.iter().any(|w| w.since < critical_before);
        Staleness { warnings, critical }
    }
}

impl<K: Clone + Display> LossReport<K> {
    /// Write the full human-readable report
    pub fn write_to<W: Write>(&self, out: &mut W, thresholds: Thresholds) -> io::Result<()> {
        writeln!(out, "{}", RULE)?;
        writeln!(out, "* OUTPUT FROM PACKET LOSS ANALYSIS")?;
        writeln!(out, "{}", RULE)?;

        writeln!(out, "\nConnections still open:")?;
        if self.open.is_empty() && self.missing_start.is_empty() {
            writeln!(out, "None")?;
        }
        for conn in &self.open {
            writeln!(
                out,
                "{} expecting seq num {} since {:.3} (subsequent loss undetermined)",
                conn.key, conn.expected_offset, conn.since
            )?;
        }
        for key in &self.missing_start {
            writeln!(out, "{} with packets received but missing start packet", key)?;
        }

        writeln!(out, "\nRemaining out-of-sequence packets:")?;
        if self.unresolved.is_empty() {
            writeln!(out, "None")?;
        }
        for entry in &self.unresolved {
            writeln!(
                out,
                "{} with packet no. {} at time {:.3}",
                entry.key, entry.sequence, entry.timestamp
            )?;
        }

        writeln!(out, "\nBytes missing:")?;
        if self.gaps.is_empty() {
            writeln!(out, "None")?;
        }
        for gap in &self.gaps {
            match gap.from {
                GapStart::ConnectionStart => writeln!(
                    out,
                    "{}: {} missing bytes between start of connection and seq num {} at time {:.3}",
                    gap.key, gap.bytes, gap.to, gap.timestamp
                )?,
                GapStart::Offset(from) => writeln!(
                    out,
                    "{}: {} missing bytes between seq num {} and {} at time {:.3}",
                    gap.key, gap.bytes, from, gap.to, gap.timestamp
                )?,
            }
        }

        writeln!(out, "\nSummary:")?;
        writeln!(
            out,
            "{} packets checked containing a total of {} bytes from {} connections.",
            self.stats.total_packets(),
            self.stats.total_bytes(),
            self.connection_count()
        )?;
        writeln!(
            out,
            "{} / {} bytes missing from trace sequence ({:.3}% loss).",
            self.missing_bytes,
            self.stats.total_bytes(),
            self.loss_percent()
        )?;
        if !self.open.is_empty() {
            writeln!(
                out,
                "Subsequent missing bytes from {} open connection(s) could not be determined.",
                self.open.len()
            )?;
        }

        writeln!(out, "\n{}", RULE)?;
        let staleness = self.staleness(thresholds);
        if staleness.warnings.is_empty() {
            writeln!(
                out,
                "* No packets missing before last {} s of trace.",
                thresholds.stale_after_secs
            )?;
        } else {
            writeln!(
                out,
                "* Warning! Packet(s) missing or connection(s) open since before last {} s of trace!",
                thresholds.stale_after_secs
            )?;
            for warning in &staleness.warnings {
                match warning.missing_bytes {
                    Some(bytes) => writeln!(
                        out,
                        "* {} bytes missing from {} since {:.3}",
                        bytes, warning.key, warning.since
                    )?,
                    None => writeln!(out, "* {} open since {:.3}", warning.key, warning.since)?,
                }
            }
            if staleness.critical {
                writeln!(
                    out,
                    "* Warning! Packet(s) missing or connection(s) open since before last {} s of trace!",
                    thresholds.critical_after_secs
                )?;
            }
        }
        writeln!(out, "{}", RULE)?;

        Ok(())
    }
}
