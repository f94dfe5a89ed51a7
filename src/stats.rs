/// Trace statistics tracking
///
/// Aggregate counters kept by the gap engine while a trace is ingested:
/// packets, bytes, connection starts and the time span of the capture.

#[derive(Debug, Clone, Default)]
pub struct TraceStats {
    total_packets: u64,
    total_bytes: u64,
    connections_started: u64,

    // Trace time span
    first_timestamp: Option<f64>,
    last_timestamp: Option<f64>,

    // End-of-stream cleanup
    stale_entries_discarded: u64,
    redundant_entries_discarded: u64,
}

impl TraceStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted packet of `size` bytes seen at `timestamp`
    pub fn record_packet(&mut self, size: u64, timestamp: f64) {
        if self.first_timestamp.is_none() {
            self.first_timestamp = Some(timestamp);
        }
        self.last_timestamp = Some(timestamp);
        self.total_packets += 1;
        self.total_bytes = self.total_bytes.saturating_add(size);
    }

    /// Record a connection start
    pub fn record_connection(&mut self) {
        self.connections_started += 1;
    }

    /// Record pool entries dropped because their connection closed cleanly
    pub fn record_stale(&mut self, count: usize) {
        self.stale_entries_discarded += count as u64;
    }

    /// Record pool entries dropped because the stream already covered them
    pub fn record_redundant(&mut self, count: usize) {
        self.redundant_entries_discarded += count as u64;
    }

    pub fn total_packets(&self) -> u64 {
        self.total_packets
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn connections_started(&self) -> u64 {
        self.connections_started
    }

    pub fn first_timestamp(&self) -> Option<f64> {
        self.first_timestamp
    }

    pub fn last_timestamp(&self) -> Option<f64> {
        self.last_timestamp
    }

    /// Seconds between the first and last accepted packet
    pub fn duration_secs(&self) -> f64 {
        match (self.first_timestamp, self.last_timestamp) {
            (Some(first), Some(last)) if last > first => last - first,
            _ => 0.0,
        }
    }

    pub fn stale_entries_discarded(&self) -> u64 {
        self.stale_entries_discarded
    }

    pub fn redundant_entries_discarded(&self) -> u64 {
        self.redundant_entries_discarded
    }

    /// Fraction of counted bytes that are missing; 0.0 for an empty trace
    pub fn loss_ratio(&self, missing_bytes: u64) -> f64 {
        if missing_bytes == 0 || self.total_bytes == 0 {
            0.0
        } else {
            missing_bytes as f64 / self.total_bytes as f64
        }
    }
}
