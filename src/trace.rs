/// Tab-separated trace parser
///
/// Splits each line of a packet trace into fields and converts the columns the
/// gap engine needs into a `PacketRecord`. Lines missing any address or port
/// are incomplete and skipped; every other malformed line is an error.

use crate::connection::ConnectionKey;
use crate::error::{Error, Result};
use crate::record::*;
use std::io::BufRead;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("too few fields: need {need}, have {have}")]
    MissingFields { need: usize, have: usize },

    #[error("invalid number in field {field}: {value:?}")]
    InvalidNumber { field: usize, value: String },

    #[error("invalid address in field {field}: {value:?}")]
    InvalidAddress { field: usize, value: String },

    #[error("invalid close flag: {0}")]
    InvalidCloseFlag(u8),
}

pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Counters for one pass over a trace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceSummary {
    pub lines: u64,
    pub records: u64,
    pub skipped: u64,
}

pub struct TraceParser;

impl TraceParser {
    /// Parse one trace line
    /// Returns `None` for blank or incomplete lines
    pub fn parse_line(line: &str) -> ParseResult<Option<PacketRecord>> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Ok(None);
        }

        let fields: Vec<&str> = line.split('\t').collect();

        // Incomplete address/port columns are filtered, not rejected
        let incomplete = (FIELD_SRC_ADDR..=FIELD_DST_PORT)
            .any(|i| fields.get(i).map_or(true, |f| f.trim().is_empty()));
        if incomplete {
            return Ok(None);
        }

        if fields.len() < MIN_FIELDS {
            return Err(ParseError::MissingFields {
                need: MIN_FIELDS,
                have: fields.len(),
            });
        }

        let key = ConnectionKey::new(
            address(&fields, FIELD_SRC_ADDR)?,
            number(&fields, FIELD_SRC_PORT)?,
            address(&fields, FIELD_DST_ADDR)?,
            number(&fields, FIELD_DST_PORT)?,
        );

        let flag: u8 = number(&fields, FIELD_CLOSE_FLAG)?;
        let close = CloseFlag::from_u8(flag).ok_or(ParseError::InvalidCloseFlag(flag))?;

        Ok(Some(PacketRecord {
            key,
            timestamp: number(&fields, FIELD_TIMESTAMP)?,
            sequence: number(&fields, FIELD_SEQUENCE)?,
            payload_len: number(&fields, FIELD_PAYLOAD_LEN)?,
            header_len: number(&fields, FIELD_HEADER_LEN)?,
            close,
        }))
    }

    /// Parse every line of a trace
    /// Calls callback for each complete record; stops early if callback
    /// returns false. Errors carry the 1-based line number.
    pub fn parse_stream<R, F>(reader: R, mut callback: F) -> Result<TraceSummary>
    where
        R: BufRead,
        F: FnMut(PacketRecord) -> bool,
    {
        let mut summary = TraceSummary::default();

        for line in reader.lines() {
            let line = line?;
            summary.lines += 1;

            let parsed = Self::parse_line(&line).map_err(|source| Error::Parse {
                line: summary.lines,
                source,
            })?;

            match parsed {
                Some(record) => {
                    summary.records += 1;
                    if !callback(record) {
                        debug!(line = summary.lines, "trace parse stopped by caller");
                        break;
                    }
                }
                None => summary.skipped += 1,
            }
        }

        info!(
            lines = summary.lines,
            records = summary.records,
            skipped = summary.skipped,
            "trace parsed"
        );
        Ok(summary)
    }
}

fn field<'a>(fields: &[&'a str], index: usize) -> &'a str {
    fields.get(index).map_or("", |f| f.trim())
}

fn number<T: FromStr>(fields: &[&str], index: usize) -> ParseResult<T> {
    let value = field(fields, index);
    value.parse().map_err(|_| ParseError::InvalidNumber {
        field: index,
        value: value.to_string(),
    })
}

fn address(fields: &[&str], index: usize) -> ParseResult<IpAddr> {
    let value = field(fields, index);
    value.parse().map_err(|_| ParseError::InvalidAddress {
        field: index,
        value: value.to_string(),
    })
}
