use crate::request::{Response, ReturnQueue};
use crate::{address, request, stats};
use smallvec::SmallVec;
use std::collections::VecDeque;

/// Request packet as delivered by an upstream cache channel.
#[derive(Debug, Clone)]
pub struct Request {
    pub address: address,
    pub v_address: address,
    pub data: u64,
    pub pf_metadata: u32,
    pub asid: [u16; 2],
    /// Instruction ids blocked on this line, sorted and unique.
    pub instr_depend_on_me: Vec<u64>,
    /// Whether the sender expects a response on its `returned` queue.
    pub response_requested: bool,
    pub to_return: SmallVec<[ReturnQueue; 1]>,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            address: 0,
            v_address: 0,
            data: 0,
            pf_metadata: 0,
            asid: [0, 0],
            instr_depend_on_me: Vec::new(),
            response_requested: false,
            to_return: SmallVec::new(),
        }
    }
}

/// Queues connecting one upstream cache channel to the controller.
///
/// The upstream side produces into `rq`/`pq`/`wq` on its own ticks; the
/// controller consumes a contiguous prefix of each once per tick and
/// appends responses to `returned`.
#[derive(Debug)]
pub struct Channel {
    pub rq: VecDeque<Request>,
    pub pq: VecDeque<Request>,
    pub wq: VecDeque<Request>,
    pub returned: ReturnQueue,
    pub sim_stats: stats::UpstreamStats,
    pub roi_stats: stats::UpstreamStats,
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rq: VecDeque::new(),
            pq: VecDeque::new(),
            wq: VecDeque::new(),
            returned: request::return_queue(),
            sim_stats: stats::UpstreamStats::default(),
            roi_stats: stats::UpstreamStats::default(),
        }
    }

    pub fn send_read(&mut self, req: Request) {
        self.sim_stats.reads_sent += 1;
        self.rq.push_back(req);
    }

    pub fn send_prefetch(&mut self, req: Request) {
        self.sim_stats.prefetches_sent += 1;
        self.pq.push_back(req);
    }

    pub fn send_write(&mut self, req: Request) {
        self.sim_stats.writes_sent += 1;
        self.wq.push_back(req);
    }

    /// Drain every response delivered so far.
    pub fn take_returned(&mut self) -> Vec<Response> {
        self.returned.lock().unwrap().drain(..).collect()
    }
}
