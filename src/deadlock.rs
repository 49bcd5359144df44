use crate::{address, controller::MemoryController};
use itertools::Itertools;

/// Snapshot of every live queue entry, gathered when the simulation
/// driver suspects a deadlock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub channels: Vec<ChannelState>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelState {
    /// (address, v_address) of each live read queue entry.
    pub rq: Vec<(address, address)>,
    /// (address, v_address) of each live write queue entry.
    pub wq: Vec<(address, address)>,
}

impl MemoryController {
    /// Gather the live entries of every channel's queues.
    #[must_use]
    pub fn deadlock_state(&self) -> State {
        let channels = self
            .channels()
            .iter()
            .map(|channel| ChannelState {
                rq: channel
                    .rq
                    .iter()
                    .map(|(_, entry)| (entry.address, entry.v_address()))
                    .collect(),
                wq: channel
                    .wq
                    .iter()
                    .map(|(_, entry)| (entry.address, entry.v_address()))
                    .collect(),
            })
            .collect();
        State { channels }
    }

    /// Dump every live queue entry, per channel.
    pub fn print_deadlock(&self) {
        eprintln!("{}", self.deadlock_state());
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (idx, channel) in self.channels.iter().enumerate() {
            writeln!(f, "DRAM Channel {idx}")?;
            for (name, entries) in [("RQ", &channel.rq), ("WQ", &channel.wq)] {
                writeln!(
                    f,
                    "{name}: [{}]",
                    entries
                        .iter()
                        .map(|(addr, v_addr)| format!("address: {addr:#x} v_addr: {v_addr:#x}"))
                        .format(", ")
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::upstream;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_state_lists_live_entries() {
        let config = Config {
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
        };
        let queue = Arc::new(Mutex::new(upstream::Channel::new()));
        let mut controller =
            crate::MemoryController::new(&config, vec![Arc::clone(&queue)]).unwrap();

        queue.lock().unwrap().send_read(upstream::Request {
            address: 0x200,
            v_address: 0x7fff_0200,
            response_requested: true,
            ..upstream::Request::default()
        });
        queue.lock().unwrap().send_write(upstream::Request {
            address: 0x400,
            v_address: 0x7fff_0400,
            ..upstream::Request::default()
        });
        controller.operate();

        let state = controller.deadlock_state();
        assert_eq!(state.channels.len(), 1);
        assert_eq!(state.channels[0].rq, vec![(0x200, 0x7fff_0200)]);
        assert_eq!(state.channels[0].wq, vec![(0x400, 0x7fff_0400)]);
        assert!(state.to_string().contains("DRAM Channel 0"));
        assert!(state.to_string().contains("address: 0x200"));
    }
}
