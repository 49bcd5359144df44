use serde::{Deserialize, Serialize};

/// Per-channel counters for one simulation phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub name: String,
    /// Reads issued to an already open row.
    pub rq_row_buffer_hit: u64,
    pub rq_row_buffer_miss: u64,
    /// Writes issued to an already open row.
    pub wq_row_buffer_hit: u64,
    pub wq_row_buffer_miss: u64,
    /// Write admissions rejected because the queue was full.
    pub wq_full: u64,
    /// Cycles a ready bank spent waiting for the data bus.
    pub dbus_cycle_congested: u64,
    pub dbus_count_congested: u64,
}

impl ChannelStats {
    #[must_use]
    pub fn named(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    /// Accesses that paid only the column latency.
    #[must_use]
    pub fn total_row_buffer_hits(&self) -> u64 {
        self.rq_row_buffer_hit + self.wq_row_buffer_hit
    }

    #[must_use]
    pub fn total_row_buffer_misses(&self) -> u64 {
        self.rq_row_buffer_miss + self.wq_row_buffer_miss
    }
}

impl std::ops::AddAssign for ChannelStats {
    fn add_assign(&mut self, other: Self) {
        self.rq_row_buffer_hit += other.rq_row_buffer_hit;
        self.rq_row_buffer_miss += other.rq_row_buffer_miss;
        self.wq_row_buffer_hit += other.wq_row_buffer_hit;
        self.wq_row_buffer_miss += other.wq_row_buffer_miss;
        self.wq_full += other.wq_full;
        self.dbus_cycle_congested += other.dbus_cycle_congested;
        self.dbus_count_congested += other.dbus_count_congested;
    }
}

/// Counters the upstream side maintains about its own traffic.
///
/// The controller only resets these at phase boundaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamStats {
    pub reads_sent: u64,
    pub prefetches_sent: u64,
    pub writes_sent: u64,
}

impl std::ops::AddAssign for UpstreamStats {
    fn add_assign(&mut self, other: Self) {
        self.reads_sent += other.reads_sent;
        self.prefetches_sent += other.prefetches_sent;
        self.writes_sent += other.writes_sent;
    }
}
