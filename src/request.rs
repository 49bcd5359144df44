use crate::{address, upstream};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Response sink shared with an upstream channel.
///
/// The controller only ever appends; the upstream side drains on its
/// own ticks.
pub type ReturnQueue = Arc<Mutex<VecDeque<Response>>>;

#[must_use]
pub fn return_queue() -> ReturnQueue {
    Arc::new(Mutex::new(VecDeque::new()))
}

/// Completed access delivered back upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub address: address,
    pub v_address: address,
    pub data: u64,
    pub pf_metadata: u32,
    pub instr_depend_on_me: Vec<u64>,
}

/// One cache line's worth of request state.
#[derive(Debug, Clone)]
pub struct Packet {
    pub address: address,
    pub v_address: address,
    pub data: u64,
    pub pf_metadata: u32,
    pub asid: [u16; 2],
    /// Instruction ids blocked on this line, sorted and unique.
    pub instr_depend_on_me: Vec<u64>,
    /// Sinks awaiting a response for this line.
    pub to_return: SmallVec<[ReturnQueue; 1]>,
}

impl Packet {
    /// Build a response carrying this packet's identity and the given data.
    #[must_use]
    pub fn response(&self, data: u64) -> Response {
        Response {
            address: self.address,
            v_address: self.v_address,
            data,
            pf_metadata: self.pf_metadata,
            instr_depend_on_me: self.instr_depend_on_me.clone(),
        }
    }

    /// Push a response with the given data to every sink of this packet.
    pub fn return_response(&self, data: u64) {
        let response = self.response(data);
        for ret in &self.to_return {
            ret.lock().unwrap().push_back(response.clone());
        }
    }
}

impl From<&upstream::Request> for Packet {
    fn from(req: &upstream::Request) -> Self {
        Self {
            address: req.address,
            v_address: req.v_address,
            data: req.data,
            pf_metadata: req.pf_metadata,
            asid: req.asid,
            instr_depend_on_me: req.instr_depend_on_me.clone(),
            to_return: req.to_return.clone(),
        }
    }
}

impl std::fmt::Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:#x}", self.address)
    }
}

/// Entry of a per-channel read or write queue.
///
/// All packets of one entry target the same block; extra packets come
/// from read coalescing.
#[derive(Debug, Clone)]
pub struct Request {
    pub address: address,
    pub packets: SmallVec<[Packet; 1]>,
    pub forward_checked: bool,
    pub scheduled: bool,
    /// Earliest time the entry may be issued to a bank.
    ///
    /// `u64::MAX` once scheduled, so it stays out of later picks until
    /// the data bus completes it.
    pub ready_time: u64,
}

impl Request {
    #[must_use]
    pub fn v_address(&self) -> address {
        self.packets[0].v_address
    }

    /// Data carried by the entry (a write's payload).
    #[must_use]
    pub fn data(&self) -> u64 {
        self.packets[0].data
    }
}

impl From<&upstream::Request> for Request {
    fn from(req: &upstream::Request) -> Self {
        let packet = Packet::from(req);
        Self {
            address: req.address,
            packets: smallvec::smallvec![packet],
            forward_checked: false,
            scheduled: false,
            ready_time: 0,
        }
    }
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{:#x}{}{}",
            self.address,
            if self.scheduled { "*" } else { "" },
            if self.packets.len() > 1 {
                format!("(x{})", self.packets.len())
            } else {
                String::new()
            }
        )
    }
}

/// Union of two sorted dependency sets, in place, keeping order and
/// uniqueness.
pub fn merge_depends(dst: &mut Vec<u64>, src: &[u64]) {
    let merged = itertools::merge(dst.iter().copied(), src.iter().copied());
    let mut out = Vec::with_capacity(dst.len() + src.len());
    for id in merged {
        if out.last() != Some(&id) {
            out.push(id);
        }
    }
    *dst = out;
}

/// Union of two sink sets, in place; identity is the shared queue
/// allocation, existing order is preserved.
pub fn merge_sinks(dst: &mut SmallVec<[ReturnQueue; 1]>, src: &[ReturnQueue]) {
    for sink in src {
        if !dst.iter().any(|have| Arc::ptr_eq(have, sink)) {
            dst.push(Arc::clone(sink));
        }
    }
}
