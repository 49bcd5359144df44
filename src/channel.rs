use crate::addrdec::AddressDecoder;
use crate::config::Config;
use crate::queue::SlotQueue;
use crate::request::{self, Request};
use crate::stats::ChannelStats;
use console::style;
use std::sync::Arc;

/// Which per-channel queue a scheduled entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Read,
    Write,
}

/// Back-reference from a bank to the queue slot it serves.
///
/// Slot indices are stable while an entry is in flight, so no pointers
/// into the queues are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestRef {
    pub queue: QueueKind,
    pub index: usize,
}

/// Per-bank row buffer and command state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankState {
    /// No request in flight; the row buffer may still hold a row.
    Idle { open_row: Option<u64> },
    /// A request has been issued against this bank.
    Busy {
        open_row: u64,
        row_buffer_hit: bool,
        /// When the bank (or, once on the bus, the transfer) completes.
        ready_time: u64,
        req: RequestRef,
    },
}

impl BankState {
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, BankState::Busy { .. })
    }
}

/// One DRAM channel: read/write queues, bank states, and the shared
/// data bus.
pub struct DramChannel {
    pub rq: SlotQueue<Request>,
    pub wq: SlotQueue<Request>,
    banks: Vec<BankState>,
    /// Bank whose transfer currently occupies the data bus.
    active_request: Option<usize>,
    /// Earliest time the bus can start a new transfer.
    dbus_cycle_available: u64,
    write_mode: bool,
    pub warmup: bool,
    pub current_time: u64,

    clock_period: u64,
    t_rp: u64,
    t_rcd: u64,
    t_cas: u64,
    turnaround: u64,
    dbus_return_time: u64,

    decoder: Arc<AddressDecoder>,
    pub sim_stats: ChannelStats,
    pub roi_stats: ChannelStats,
}

impl DramChannel {
    #[must_use]
    pub fn new(config: &Config, decoder: Arc<AddressDecoder>) -> Self {
        let num_banks = decoder.ranks() * decoder.banks();
        Self {
            rq: SlotQueue::new(config.rq_size),
            wq: SlotQueue::new(config.wq_size),
            banks: vec![BankState::Idle { open_row: None }; num_banks],
            active_request: None,
            dbus_cycle_available: 0,
            write_mode: false,
            warmup: false,
            current_time: 0,
            clock_period: config.clock_period,
            t_rp: config.t_rp,
            t_rcd: config.t_rcd,
            t_cas: config.t_cas,
            turnaround: config.turnaround,
            dbus_return_time: config.dbus_return_time(),
            decoder,
            sim_stats: ChannelStats::default(),
            roi_stats: ChannelStats::default(),
        }
    }

    #[must_use]
    pub fn bank_request_capacity(&self) -> usize {
        self.banks.len()
    }

    #[must_use]
    pub fn bank(&self, idx: usize) -> &BankState {
        &self.banks[idx]
    }

    #[must_use]
    pub fn write_mode(&self) -> bool {
        self.write_mode
    }

    #[must_use]
    pub fn dbus_cycle_available(&self) -> u64 {
        self.dbus_cycle_available
    }

    #[must_use]
    pub fn active_request(&self) -> Option<usize> {
        self.active_request
    }

    /// Flat bank index of an address within this channel.
    #[must_use]
    pub fn bank_index(&self, addr: crate::address) -> usize {
        let rank = self.decoder.get_rank(addr) as usize;
        let bank = self.decoder.get_bank(addr) as usize;
        rank * self.decoder.banks() + bank
    }

    fn queue_mut(&mut self, kind: QueueKind) -> &mut SlotQueue<Request> {
        match kind {
            QueueKind::Read => &mut self.rq,
            QueueKind::Write => &mut self.wq,
        }
    }

    /// Advance the channel by one tick.
    ///
    /// Returns the number of state-advancing events, for external
    /// deadlock detection.
    pub fn operate(&mut self) -> u64 {
        self.current_time += self.clock_period;

        if self.warmup {
            return self.drain_warmup();
        }

        let mut progress = 0;
        self.check_write_collision();
        self.check_read_collision();
        progress += self.finish_dbus_request();
        self.swap_write_mode();
        progress += self.populate_dbus();
        progress += self.schedule_packets();
        progress
    }

    /// Satisfy reads instantly and discard writes while caches warm up.
    fn drain_warmup(&mut self) -> u64 {
        let mut progress = 0;
        for entry in self.rq.drain() {
            for packet in &entry.packets {
                packet.return_response(packet.data);
            }
            progress += 1;
        }
        for _ in self.wq.drain() {
            progress += 1;
        }
        progress
    }

    /// Drop write entries whose block is already covered by another
    /// write; the older entry dominates.
    fn check_write_collision(&mut self) {
        for idx in 0..self.wq.capacity() {
            let Some(addr) = self
                .wq
                .get(idx)
                .filter(|entry| !entry.forward_checked)
                .map(|entry| entry.address)
            else {
                continue;
            };

            let collides = self
                .wq
                .iter()
                .any(|(other, entry)| other != idx && self.decoder.same_block(entry.address, addr));

            if collides {
                log::trace!("write to {addr:#x} collides, dropping");
                self.wq.take(idx);
            } else {
                self.wq.get_mut(idx).unwrap().forward_checked = true;
            }
        }
    }

    /// Forward pending writes into colliding reads and coalesce reads
    /// that target the same block.
    fn check_read_collision(&mut self) {
        for idx in 0..self.rq.capacity() {
            let Some(addr) = self
                .rq
                .get(idx)
                .filter(|entry| !entry.forward_checked)
                .map(|entry| entry.address)
            else {
                continue;
            };

            // a matching write answers the read without touching DRAM
            let forward = self
                .wq
                .iter()
                .find(|(_, write)| self.decoder.same_block(write.address, addr))
                .map(|(_, write)| write.data());
            if let Some(data) = forward {
                let read = self.rq.take(idx).unwrap();
                for packet in &read.packets {
                    packet.return_response(data);
                }
                log::trace!("read to {addr:#x} forwarded from write queue");
                continue;
            }

            // another read to the same block absorbs this entry
            let merge_into = self
                .rq
                .iter()
                .find(|(other, entry)| {
                    *other != idx && self.decoder.same_block(entry.address, addr)
                })
                .map(|(other, _)| other);
            if let Some(other) = merge_into {
                let absorbed = self.rq.take(idx).unwrap();
                let target = self.rq.get_mut(other).unwrap();
                for packet in absorbed.packets {
                    match target
                        .packets
                        .iter_mut()
                        .find(|have| have.address == packet.address)
                    {
                        Some(have) => {
                            request::merge_depends(
                                &mut have.instr_depend_on_me,
                                &packet.instr_depend_on_me,
                            );
                            request::merge_sinks(&mut have.to_return, &packet.to_return);
                        }
                        None => target.packets.push(packet),
                    }
                }
                log::trace!("read to {addr:#x} merged into slot {other}");
                continue;
            }

            self.rq.get_mut(idx).unwrap().forward_checked = true;
        }
    }

    /// Complete the transfer on the data bus, delivering responses and
    /// freeing the queue slot.
    fn finish_dbus_request(&mut self) -> u64 {
        let Some(bank_idx) = self.active_request else {
            return 0;
        };
        let BankState::Busy {
            open_row,
            ready_time,
            req,
            ..
        } = self.banks[bank_idx]
        else {
            return 0;
        };
        if ready_time > self.current_time {
            return 0;
        }

        let entry = self
            .queue_mut(req.queue)
            .take(req.index)
            .expect("active bank refers to an occupied queue slot");
        for packet in &entry.packets {
            packet.return_response(packet.data);
        }
        self.banks[bank_idx] = BankState::Idle {
            open_row: Some(open_row),
        };
        self.active_request = None;
        log::trace!("transfer for {:#x} left the data bus", entry.address);
        1
    }

    /// Switch between read and write bursts when the queues become
    /// unbalanced.
    fn swap_write_mode(&mut self) {
        let high_watermark = (self.wq.capacity() * 7) >> 3;
        let low_watermark = (self.wq.capacity() * 6) >> 3;

        let wq_occu = self.wq.occupancy();
        let rq_occu = self.rq.occupancy();

        let switch = if self.write_mode {
            wq_occu == 0 || (rq_occu > 0 && wq_occu < low_watermark)
        } else {
            wq_occu >= high_watermark || (rq_occu == 0 && wq_occu > 0)
        };
        if !switch {
            return;
        }

        // every bank except the one on the bus goes back to scheduling
        for idx in 0..self.banks.len() {
            if Some(idx) == self.active_request {
                continue;
            }
            let BankState::Busy {
                open_row,
                ready_time,
                req,
                ..
            } = self.banks[idx]
            else {
                continue;
            };
            // the row survives only if its activation had completed
            let open_row = if ready_time < self.current_time + self.t_cas {
                None
            } else {
                Some(open_row)
            };
            self.banks[idx] = BankState::Idle { open_row };

            let now = self.current_time;
            let entry = self
                .queue_mut(req.queue)
                .get_mut(req.index)
                .expect("bank refers to an occupied queue slot");
            entry.scheduled = false;
            entry.ready_time = now;
        }

        self.dbus_cycle_available = match self.active_request.map(|idx| self.banks[idx]) {
            Some(BankState::Busy { ready_time, .. }) => ready_time + self.turnaround,
            _ => self.current_time + self.turnaround,
        };
        self.write_mode = !self.write_mode;
        log::debug!(
            "{} at {}: now in {} mode",
            style("dbus direction switch").yellow(),
            self.current_time,
            if self.write_mode { "write" } else { "read" },
        );
    }

    /// Move the longest-waiting ready bank onto the data bus.
    fn populate_dbus(&mut self) -> u64 {
        let next = self
            .banks
            .iter()
            .enumerate()
            .filter_map(|(idx, bank)| match bank {
                BankState::Busy { ready_time, .. } => Some((idx, *ready_time)),
                BankState::Idle { .. } => None,
            })
            .min_by_key(|&(_, ready_time)| ready_time);
        let Some((idx, ready_time)) = next else {
            return 0;
        };
        if ready_time > self.current_time {
            return 0;
        }

        if self.active_request.is_none() && self.dbus_cycle_available <= self.current_time {
            self.active_request = Some(idx);
            let BankState::Busy {
                ready_time,
                row_buffer_hit,
                ..
            } = &mut self.banks[idx]
            else {
                unreachable!("selected bank is busy");
            };
            *ready_time = self.current_time + self.dbus_return_time;
            let hit = *row_buffer_hit;
            match (self.write_mode, hit) {
                (false, true) => self.sim_stats.rq_row_buffer_hit += 1,
                (false, false) => self.sim_stats.rq_row_buffer_miss += 1,
                (true, true) => self.sim_stats.wq_row_buffer_hit += 1,
                (true, false) => self.sim_stats.wq_row_buffer_miss += 1,
            }
            1
        } else {
            // a bank is ready but the bus is not
            let wait = match self.active_request.map(|active| self.banks[active]) {
                Some(BankState::Busy { ready_time, .. }) => ready_time - self.current_time,
                _ => self.dbus_cycle_available - self.current_time,
            };
            self.sim_stats.dbus_cycle_congested += wait / self.clock_period;
            self.sim_stats.dbus_count_congested += 1;
            0
        }
    }

    /// Issue one queued entry to its bank, preferring entries whose
    /// bank is free and, among those, the longest-waiting one.
    fn schedule_packets(&mut self) -> u64 {
        let kind = if self.write_mode {
            QueueKind::Write
        } else {
            QueueKind::Read
        };
        let queue = match kind {
            QueueKind::Read => &self.rq,
            QueueKind::Write => &self.wq,
        };

        let mut best: Option<(usize, u64, bool)> = None;
        for (idx, entry) in queue.iter() {
            if entry.scheduled {
                continue;
            }
            let bank_free = !self.banks[self.bank_index(entry.address)].is_busy();
            let better = match best {
                None => true,
                Some((_, best_ready, best_free)) => match (bank_free, best_free) {
                    (true, false) => true,
                    (false, true) => false,
                    _ => entry.ready_time < best_ready,
                },
            };
            if better {
                best = Some((idx, entry.ready_time, bank_free));
            }
        }

        let Some((idx, ready_time, bank_free)) = best else {
            return 0;
        };
        if !bank_free || ready_time > self.current_time {
            return 0;
        }

        let addr = self.queue_mut(kind).get(idx).unwrap().address;
        let row = self.decoder.get_row(addr);
        let bank_idx = self.bank_index(addr);
        let BankState::Idle { open_row } = self.banks[bank_idx] else {
            unreachable!("chosen bank is free");
        };
        let row_buffer_hit = open_row == Some(row);
        let access_time = self.t_cas
            + if row_buffer_hit {
                0
            } else {
                self.t_rp + self.t_rcd
            };
        self.banks[bank_idx] = BankState::Busy {
            open_row: row,
            row_buffer_hit,
            ready_time: self.current_time + access_time,
            req: RequestRef { queue: kind, index: idx },
        };

        let entry = self.queue_mut(kind).get_mut(idx).unwrap();
        entry.scheduled = true;
        entry.ready_time = u64::MAX;
        log::trace!(
            "scheduled {addr:#x} on bank {bank_idx} (row {row}, {})",
            if row_buffer_hit { "hit" } else { "miss" },
        );
        1
    }
}
