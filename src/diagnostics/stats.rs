use serde::Serialize;
use std::time::Instant;

/// Collects frame statistics for a started device session.
#[derive(Debug)]
pub struct DiagnosticStats {
    frame_count: u64,
    error_count: u64,
    total_bytes: u64,
    start_time: Instant,
    last_timestamp_ns: u64,
}

/// Snapshot of diagnostic stats for serialisation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticSnapshot {
    pub fps: f64,
    pub frame_count: u64,
    pub error_count: u64,
    pub bandwidth_bps: u64,
    pub last_timestamp_ns: u64,
}

impl Default for DiagnosticStats {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticStats {
    /// Create new stats with zeroed counters.
    pub fn new() -> Self {
        Self {
            frame_count: 0,
            error_count: 0,
            total_bytes: 0,
            start_time: Instant::now(),
            last_timestamp_ns: 0,
        }
    }

    /// Record a frame delivered upstream.
    pub fn record_frame(&mut self, bytes: usize, timestamp_ns: u64) {
        self.frame_count += 1;
        self.total_bytes += bytes as u64;
        self.last_timestamp_ns = timestamp_ns;
    }

    /// Record a failed frame query.
    pub fn record_error(&mut self) {
        self.error_count += 1;
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Delivered frames per second since the session started.
    pub fn fps(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed < 0.001 {
            return 0.0;
        }
        self.frame_count as f64 / elapsed
    }

    /// Bandwidth in bytes per second.
    pub fn bandwidth_bps(&self) -> u64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed < 0.001 {
            return 0;
        }
        (self.total_bytes as f64 / elapsed) as u64
    }

    /// Reset all counters and restart the session clock.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Take a serialisable snapshot.
    pub fn snapshot(&self) -> DiagnosticSnapshot {
        DiagnosticSnapshot {
            fps: self.fps(),
            frame_count: self.frame_count,
            error_count: self.error_count,
            bandwidth_bps: self.bandwidth_bps(),
            last_timestamp_ns: self.last_timestamp_ns,
        }
    }
}
