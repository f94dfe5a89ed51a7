/// Trace analysis driver
///
/// Feeds parsed records into a `GapEngine` in file order and reconciles once
/// the input is exhausted.

use std::fmt;
use std::io::BufRead;

use tracing::info;

use crate::config::AnalysisConfig;
use crate::connection::{ConnectionKey, PackedConnectionId};
use crate::error::{Error, Result};
use crate::gap_engine::GapEngine;
use crate::record::PacketRecord;
use crate::report::LossReport;
use crate::trace::TraceParser;

/// Analyse a trace, keying connections with `to_key`
pub fn analyze<K, R, F>(reader: R, config: &AnalysisConfig, mut to_key: F) -> Result<LossReport<K>>
where
    K: Ord + Clone + fmt::Debug,
    R: BufRead,
    F: FnMut(&ConnectionKey) -> Result<K>,
{
    let mut engine = GapEngine::with_start_policy(config.start_policy);
    let interval = config.progress_interval.max(1);
    let mut failure = None;
    let mut count = 0u64;

    TraceParser::parse_stream(reader, |record| {
        let key = match to_key(&record.key) {
            Ok(key) => key,
            Err(e) => {
                failure = Some(e);
                return false;
            }
        };

        engine.ingest(&PacketRecord {
            key,
            timestamp: record.timestamp,
            sequence: record.sequence,
            payload_len: record.payload_len,
            header_len: record.header_len,
            close: record.close,
        });

        count += 1;
        if count % interval == 0 {
            info!(
                records = count,
                open = engine.open_count(),
                pooled = engine.pooled_count(),
                "progress"
            );
        }
        true
    })?;

    if let Some(e) = failure {
        return Err(e);
    }

    Ok(engine.finalize())
}

/// Analyse a trace keyed on the full 4-tuple
pub fn analyze_tuples<R: BufRead>(reader: R, config: &AnalysisConfig) -> Result<LossReport<ConnectionKey>> {
    analyze(reader, config, |key| Ok(*key))
}

/// Analyse a trace keyed on packed lab-network ids
pub fn analyze_packed<R: BufRead>(
    reader: R,
    config: &AnalysisConfig,
) -> Result<LossReport<PackedConnectionId>> {
    analyze(reader, config, packed_key)
}

pub fn packed_key(key: &ConnectionKey) -> Result<PackedConnectionId> {
    PackedConnectionId::from_key(key).ok_or_else(|| Error::Unpackable(key.to_string()))
}
