/// Packet Loss - Offline TCP Trace Gap Analysis
///
/// Reconstructs, per connection, how many bytes of a captured byte stream never
/// appeared in a packet trace. Features include:
/// - Tab-separated trace parsing
/// - Full 4-tuple or packed 64-bit connection keys
/// - Out-of-sequence buffering with chain resolution
/// - End-of-stream gap reconciliation with per-gap breakdown
/// - Staleness warnings and text reports

pub mod analysis;
pub mod config;
pub mod connection;
pub mod error;
pub mod gap_engine;
pub mod record;
pub mod report;
pub mod stats;
pub mod trace;

pub use analysis::{analyze, analyze_packed, analyze_tuples};
pub use config::{Config, KeyMode};
pub use connection::{ConnectionKey, PackedConnectionId};
pub use error::{Error, Result};
pub use gap_engine::{GapEngine, OosEntry, StartPolicy, START_OFFSET};
pub use record::{CloseFlag, PacketRecord};
pub use report::{Gap, GapStart, LossReport, OpenConnection, Staleness, Thresholds};
pub use stats::TraceStats;
pub use trace::{ParseError, TraceParser, TraceSummary};
