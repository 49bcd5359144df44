use serde::{Deserialize, Serialize};

/// DRAM geometry and timing.
///
/// All times are picoseconds. Counts should be powers of two;
/// anything else is rounded down during address decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Controller clock period.
    pub clock_period: u64,
    /// Row precharge time.
    pub t_rp: u64,
    /// Row-to-column delay.
    pub t_rcd: u64,
    /// Column access strobe latency.
    pub t_cas: u64,
    /// Idle gap on the data bus when switching read/write direction.
    pub turnaround: u64,
    /// Width of one channel's data bus in bytes.
    pub channel_width: usize,
    /// Bus beats per logical transfer (burst length).
    pub prefetch_size: usize,
    /// Cache block size in bytes.
    pub block_size: usize,
    /// Read queue slots per channel.
    pub rq_size: usize,
    /// Write queue slots per channel.
    pub wq_size: usize,
    pub channels: usize,
    pub ranks: usize,
    pub banks: usize,
    pub rows: usize,
    pub columns: usize,
}

impl Default for Config {
    /// A single channel of DDR4-1600-ish timing.
    fn default() -> Self {
        Self {
            clock_period: 1250,
            t_rp: 12_500,
            t_rcd: 12_500,
            t_cas: 12_500,
            turnaround: 7500,
            channel_width: 8,
            prefetch_size: 8,
            block_size: 64,
            rq_size: 64,
            wq_size: 64,
            channels: 1,
            ranks: 1,
            banks: 8,
            rows: 65_536,
            columns: 1024,
        }
    }
}

impl Config {
    /// Time one burst occupies the data bus.
    #[must_use]
    pub fn dbus_return_time(&self) -> u64 {
        self.clock_period * self.prefetch_size as u64
    }
}
