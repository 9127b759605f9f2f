//! Fixed-latency page-table walker model driving the TLB's walker channels.

use std::collections::VecDeque;

use mptlb::{
    vpn_of, PageLevel, PteFlags, PtwRequest, PtwResponse, TranslationEntry, WalkFault,
    PAGE_SHIFT,
};
use serde::Deserialize;
use tracing::{debug, trace};

/// A leaf translation known to the walker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Mapping {
    pub vaddr: u64,
    pub paddr: u64,
    #[serde(default = "default_level")]
    pub level: PageLevel,
    #[serde(default)]
    pub asid: u16,
    /// PTE bits, e.g. `"R | W | A | D"`.
    pub flags: PteFlags,
    #[serde(default)]
    pub access_fault: bool,
}

fn default_level() -> PageLevel {
    PageLevel::Page4K
}

impl Mapping {
    fn response(&self) -> PtwResponse {
        PtwResponse {
            entry: TranslationEntry::new(
                vpn_of(self.vaddr) & self.level.vpn_mask(),
                self.paddr >> PAGE_SHIFT,
                self.asid,
                self.level,
                self.flags,
            ),
            fault: WalkFault {
                page_fault: false,
                access_fault: self.access_fault,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    req: PtwRequest,
    due: u64,
}

#[derive(Debug, Clone)]
pub struct Walker {
    table: Vec<PtwResponse>,
    latency: u64,
    depth: usize,
    queue: VecDeque<InFlight>,
}

impl Walker {
    pub fn new(mappings: &[Mapping], latency: u64, depth: usize) -> Self {
        Self {
            table: mappings.iter().map(Mapping::response).collect(),
            latency,
            depth: depth.max(1),
            queue: VecDeque::new(),
        }
    }

    /// Whether the request channels are ready this tick.
    pub fn ready(&self) -> bool {
        self.queue.len() < self.depth
    }

    pub fn in_flight(&self) -> usize {
        self.queue.len()
    }

    /// Queues a request accepted at tick `now`. A request already in flight is merged.
    pub fn accept(&mut self, now: u64, req: PtwRequest) {
        if self.queue.iter().any(|f| f.req == req) {
            trace!(vpn = req.vpn, asid = req.asid, "walk already in flight");
            return;
        }
        let due = now.saturating_add(self.latency);
        debug!(vpn = req.vpn, asid = req.asid, due, "walk started");
        self.queue.push_back(InFlight { req, due });
    }

    /// The response due at tick `now`, at most one per tick.
    pub fn respond(&mut self, now: u64) -> Option<PtwResponse> {
        if self.queue.front()?.due > now {
            return None;
        }
        let InFlight { req, .. } = self.queue.pop_front()?;
        Some(self.resolve(req))
    }

    /// Drops every walk in flight.
    pub fn cancel_all(&mut self) {
        if !self.queue.is_empty() {
            debug!(dropped = self.queue.len(), "walks cancelled");
        }
        self.queue.clear();
    }

    fn resolve(&self, req: PtwRequest) -> PtwResponse {
        let found = self
            .table
            .iter()
            .find(|resp| resp.entry.hit(req.vpn, req.asid));
        match found {
            Some(&resp) => resp,
            None => {
                debug!(vpn = req.vpn, asid = req.asid, "walk found no leaf");
                PtwResponse {
                    entry: TranslationEntry::new(
                        req.vpn,
                        0,
                        req.asid,
                        PageLevel::Page4K,
                        PteFlags::empty(),
                    ),
                    fault: WalkFault {
                        page_fault: true,
                        access_fault: false,
                    },
                }
            }
        }
    }
}
