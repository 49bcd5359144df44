use crate::addrdec::AddressDecoder;
use crate::channel::DramChannel;
use crate::config::Config;
use crate::request::{self, ReturnQueue};
use crate::stats::{ChannelStats, UpstreamStats};
use crate::upstream;
use color_eyre::eyre;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Off-chip DRAM controller.
///
/// Owns every channel and the address decoder, pulls requests from the
/// upstream cache channels once per tick, and dispatches them to the
/// channel the decoded address selects.
pub struct MemoryController {
    channels: Vec<DramChannel>,
    decoder: Arc<AddressDecoder>,
    queues: Vec<Arc<Mutex<upstream::Channel>>>,
    pub warmup: bool,
    pub current_time: u64,
    clock_period: u64,
    channel_width: usize,
}

/// Admit a contiguous prefix of `queue`; the first rejected packet
/// stays at the head for the next tick.
fn drain_prefix<T>(queue: &mut VecDeque<T>, mut admit: impl FnMut(&T) -> bool) {
    while let Some(front) = queue.front() {
        if !admit(front) {
            break;
        }
        queue.pop_front();
    }
}

impl MemoryController {
    pub fn new(
        config: &Config,
        queues: Vec<Arc<Mutex<upstream::Channel>>>,
    ) -> eyre::Result<Self> {
        let decoder = Arc::new(AddressDecoder::new(
            config.channel_width,
            config.prefetch_size,
            config.block_size,
            config.channels,
            config.banks,
            config.columns,
            config.ranks,
            config.rows,
        )?);
        let channels = (0..decoder.channels())
            .map(|_| DramChannel::new(config, Arc::clone(&decoder)))
            .collect();
        Ok(Self {
            channels,
            decoder,
            queues,
            warmup: false,
            current_time: 0,
            clock_period: config.clock_period,
            channel_width: config.channel_width,
        })
    }

    #[must_use]
    pub fn decoder(&self) -> &AddressDecoder {
        &self.decoder
    }

    #[must_use]
    pub fn channels(&self) -> &[DramChannel] {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut [DramChannel] {
        &mut self.channels
    }

    /// Total addressable bytes across all channels.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.decoder.size()
    }

    /// Log the modeled capacity and bus parameters.
    pub fn initialize(&self) {
        const KIB: u64 = 1024;
        const MIB: u64 = 1024 * KIB;
        const GIB: u64 = 1024 * MIB;
        let size = self.size();
        let pretty = if size >= GIB {
            format!("{} GiB", size / GIB)
        } else if size >= MIB {
            format!("{} MiB", size / MIB)
        } else if size >= KIB {
            format!("{} kiB", size / KIB)
        } else {
            format!("{size} B")
        };
        log::info!(
            "off-chip DRAM size: {} channels: {} width: {}-bit data rate: {} MT/s",
            pretty,
            self.channels.len(),
            8 * self.channel_width,
            1_000_000 / self.clock_period,
        );
    }

    /// Advance the controller and every channel by one tick.
    ///
    /// Returns the number of state-advancing events, for external
    /// deadlock detection.
    pub fn operate(&mut self) -> u64 {
        self.current_time += self.clock_period;

        self.initiate_requests();

        let mut progress = 0;
        for channel in &mut self.channels {
            progress += channel.operate();
        }
        progress
    }

    /// Pull admissible prefixes of every upstream queue.
    fn initiate_requests(&mut self) {
        let queues = self.queues.clone();
        for ul in &queues {
            let mut ul = ul.lock().unwrap();
            let returned = Arc::clone(&ul.returned);

            drain_prefix(&mut ul.rq, |packet| self.add_rq(packet, &returned));
            drain_prefix(&mut ul.pq, |packet| self.add_rq(packet, &returned));
            drain_prefix(&mut ul.wq, |packet| self.add_wq(packet));
        }
    }

    /// Admit one read (or prefetch) packet into its channel's read
    /// queue. Returns false when the queue is full.
    pub fn add_rq(&mut self, packet: &upstream::Request, returned: &ReturnQueue) -> bool {
        let channel_idx = self.decoder.get_channel(packet.address) as usize;
        assert!(
            channel_idx < self.channels.len(),
            "decoded channel {channel_idx} exceeds the configured channel count"
        );
        let channel = &mut self.channels[channel_idx];

        let mut entry = request::Request::from(packet);
        entry.ready_time = self.current_time;
        if packet.response_requested {
            entry.packets[0].to_return = smallvec::smallvec![Arc::clone(returned)];
        }
        channel.rq.insert(entry).is_some()
    }

    /// Admit one write packet into its channel's write queue. Returns
    /// false (and counts the rejection) when the queue is full.
    pub fn add_wq(&mut self, packet: &upstream::Request) -> bool {
        let channel_idx = self.decoder.get_channel(packet.address) as usize;
        assert!(
            channel_idx < self.channels.len(),
            "decoded channel {channel_idx} exceeds the configured channel count"
        );
        let channel = &mut self.channels[channel_idx];

        let mut entry = request::Request::from(packet);
        entry.ready_time = self.current_time;
        if channel.wq.insert(entry).is_none() {
            channel.sim_stats.wq_full += 1;
            return false;
        }
        true
    }

    /// Reset per-phase counters and propagate the warmup flag.
    pub fn begin_phase(&mut self) {
        for (idx, channel) in self.channels.iter_mut().enumerate() {
            channel.sim_stats = ChannelStats::named(format!("Channel {idx}"));
            channel.warmup = self.warmup;
        }
        for ul in &self.queues {
            let mut ul = ul.lock().unwrap();
            ul.sim_stats = UpstreamStats::default();
            ul.roi_stats = UpstreamStats::default();
        }
    }

    /// Snapshot the phase counters into the region-of-interest records.
    pub fn end_phase(&mut self) {
        for channel in &mut self.channels {
            channel.roi_stats = channel.sim_stats.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::upstream;
    use color_eyre::eyre;
    use std::sync::{Arc, Mutex};

    fn test_config() -> Config {
        Config {
            clock_period: 1000,
            t_rp: 4000,
            t_rcd: 4000,
            t_cas: 4000,
            turnaround: 8000,
            channel_width: 8,
            prefetch_size: 8,
            block_size: 64,
            rq_size: 8,
            wq_size: 8,
            channels: 1,
            ranks: 1,
            banks: 1,
            rows: 64,
            columns: 64,
        }
    }

    fn controller_with(
        config: &Config,
        num_upstream: usize,
    ) -> (
        super::MemoryController,
        Vec<Arc<Mutex<upstream::Channel>>>,
    ) {
        let queues: Vec<_> = (0..num_upstream)
            .map(|_| Arc::new(Mutex::new(upstream::Channel::new())))
            .collect();
        let controller = super::MemoryController::new(config, queues.clone()).unwrap();
        (controller, queues)
    }

    fn read(addr: u64) -> upstream::Request {
        upstream::Request {
            address: addr,
            v_address: addr,
            response_requested: true,
            ..upstream::Request::default()
        }
    }

    fn write(addr: u64, data: u64) -> upstream::Request {
        upstream::Request {
            address: addr,
            v_address: addr,
            data,
            ..upstream::Request::default()
        }
    }

    // test geometry: offset 6 bits, column 3, row 6
    fn addr(row: u64, column: u64) -> u64 {
        (row << 9) | (column << 6)
    }

    #[test]
    fn test_size_is_power_of_two_product() -> eyre::Result<()> {
        let (controller, _) = controller_with(&test_config(), 1);
        // 64 B per transfer * 8 column groups * 64 rows
        assert_eq!(controller.size(), 64 * 8 * 64);
        Ok(())
    }

    #[test]
    fn test_read_miss_then_hit_round_trip() {
        let (mut controller, queues) = controller_with(&test_config(), 1);
        queues.lock_first().send_read(read(addr(0, 0)));

        let mut delivered_at = None;
        for _ in 0..30 {
            controller.operate();
            if !queues.lock_first().returned.lock().unwrap().is_empty() {
                delivered_at = Some(controller.current_time);
                break;
            }
        }
        // 1 tick admission + tRP + tRCD + tCAS + burst
        assert_eq!(delivered_at, Some(21_000));
        let responses = queues.lock_first().take_returned();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].address, addr(0, 0));

        // second read hits the open row
        queues.lock_first().send_read(read(addr(0, 1)));
        let admitted_at = controller.current_time + 1000;
        let mut delivered_at = None;
        for _ in 0..30 {
            controller.operate();
            if !queues.lock_first().returned.lock().unwrap().is_empty() {
                delivered_at = Some(controller.current_time);
                break;
            }
        }
        // tCAS + burst only
        assert_eq!(delivered_at, Some(admitted_at + 12_000));

        let stats = &controller.channels()[0].sim_stats;
        assert_eq!(stats.rq_row_buffer_miss, 1);
        assert_eq!(stats.rq_row_buffer_hit, 1);
    }

    #[test]
    fn test_coalesced_reads_get_one_access_three_responses() {
        let (mut controller, queues) = controller_with(&test_config(), 3);
        for queue in &queues {
            queue.lock().unwrap().send_read(read(addr(7, 3)));
        }

        for _ in 0..30 {
            controller.operate();
        }
        for queue in &queues {
            assert_eq!(queue.lock().unwrap().take_returned().len(), 1);
        }
        // one DRAM access served all three requesters
        let stats = &controller.channels()[0].sim_stats;
        assert_eq!(stats.rq_row_buffer_miss + stats.rq_row_buffer_hit, 1);
    }

    #[test]
    fn test_write_queue_backpressure() {
        let (mut controller, queues) = controller_with(&test_config(), 1);
        for row in 0..9 {
            queues.lock_first().send_write(write(addr(row, 0), row));
        }
        controller.operate();

        // eight slots filled, the ninth stays upstream
        assert_eq!(queues.lock_first().wq.len(), 1);
        assert_eq!(controller.channels()[0].sim_stats.wq_full, 1);
        assert_eq!(queues.lock_first().wq[0].address, addr(8, 0));
    }

    #[test]
    fn test_rq_backpressure_keeps_prefix_order() {
        let (mut controller, queues) = controller_with(&test_config(), 1);
        for row in 0..10 {
            queues.lock_first().send_read(read(addr(row, 0)));
        }
        queues.lock_first().send_prefetch(read(addr(20, 0)));
        controller.operate();

        // the read queue fills before the prefetch queue is visited
        let ul = queues.lock_first();
        assert_eq!(ul.rq.len(), 2);
        assert_eq!(ul.rq[0].address, addr(8, 0));
        assert_eq!(ul.pq.len(), 1);
    }

    #[test]
    fn test_write_forwarding_answers_read_immediately() {
        let (mut controller, queues) = controller_with(&test_config(), 1);
        queues.lock_first().send_write(write(addr(2, 2), 0x0123_4567));
        queues.lock_first().send_read(read(addr(2, 2) + 8));
        controller.operate();

        let responses = queues.lock_first().take_returned();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].data, 0x0123_4567);
        assert_eq!(controller.channels()[0].rq.occupancy(), 0);
        assert_eq!(controller.channels()[0].wq.occupancy(), 1);
    }

    #[test]
    fn test_multi_channel_dispatch() {
        let config = Config {
            channels: 2,
            ..test_config()
        };
        let (mut controller, queues) = controller_with(&config, 1);
        // channel bit sits directly below the row bits
        let chan1_addr = 1 << 9;
        queues.lock_first().send_read(read(0));
        queues.lock_first().send_read(read(chan1_addr));
        controller.operate();

        assert_eq!(controller.channels()[0].rq.occupancy(), 1);
        assert_eq!(controller.channels()[1].rq.occupancy(), 1);
    }

    #[test]
    fn test_warmup_drains_within_one_tick() {
        let (mut controller, queues) = controller_with(&test_config(), 1);
        controller.warmup = true;
        controller.begin_phase();
        for column in 0..4 {
            queues.lock_first().send_read(read(addr(0, column)));
        }
        controller.operate();

        assert_eq!(queues.lock_first().take_returned().len(), 4);
        assert_eq!(controller.channels()[0].rq.occupancy(), 0);
    }

    #[test]
    fn test_phase_lifecycle_resets_and_snapshots() {
        let (mut controller, queues) = controller_with(&test_config(), 1);
        queues.lock_first().send_read(read(addr(0, 0)));
        for _ in 0..30 {
            controller.operate();
        }
        assert_eq!(controller.channels()[0].sim_stats.rq_row_buffer_miss, 1);

        controller.end_phase();
        assert_eq!(controller.channels()[0].roi_stats.rq_row_buffer_miss, 1);

        controller.begin_phase();
        assert_eq!(controller.channels()[0].sim_stats.rq_row_buffer_miss, 0);
        assert_eq!(controller.channels()[0].sim_stats.name, "Channel 0");
        assert_eq!(
            queues.lock_first().sim_stats,
            crate::stats::UpstreamStats::default()
        );
    }

    #[test]
    fn test_response_count_matches_requested() {
        let (mut controller, queues) = controller_with(&test_config(), 1);
        // five responders, one silent read
        for row in 0..5 {
            queues.lock_first().send_read(read(addr(row, 0)));
        }
        let mut silent = read(addr(5, 0));
        silent.response_requested = false;
        queues.lock_first().send_read(silent);

        for _ in 0..200 {
            controller.operate();
        }
        assert_eq!(queues.lock_first().take_returned().len(), 5);
    }

    /// Convenience for the common single-upstream case.
    trait LockFirst {
        fn lock_first(&self) -> std::sync::MutexGuard<'_, upstream::Channel>;
    }

    impl LockFirst for Vec<Arc<Mutex<upstream::Channel>>> {
        fn lock_first(&self) -> std::sync::MutexGuard<'_, upstream::Channel> {
            self[0].lock().unwrap()
        }
    }
}
