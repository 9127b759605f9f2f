//! Multi-port Sv39 TLB model.
//!
//! The model is a synchronous discrete-time simulation of a hardware TLB:
//! - a normal-page array (set- or fully-associative, 4KiB entries) and a fully-associative
//!   super-page array (2MiB/1GiB entries and, optionally, normal-page victims)
//! - per-port lookup pipelines that are either non-blocking (fixed one-tick latency) or
//!   blocking (response held until the page-table walker resolves the miss)
//! - RISC-V permission checking with access faults taking priority over page faults
//!
//! The page-table walker and the PMP/PMA checker are external. Walker traffic is exchanged
//! through [`TickInput`] / [`TickOutput`], PMP checks through [`PmpChecker`].

pub mod config;
pub mod entry;
mod error;
pub mod perm;
mod port;
pub mod replacement;
pub mod storage;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use config::{NormalArrayConfig, NormalShape, PortMode, SuperArrayConfig, TlbConfig};
pub use entry::{vpn_of, PageLevel, PAGE_SHIFT, PteFlags, StaticPm, TranslationEntry, WalkFault};
pub use error::{ConfigError, Result, TlbError};
pub use perm::{FaultFlags, FaultKinds};
pub use port::PortState;
pub use replacement::{ReplacementKind, Replacer};
pub use storage::{ArrayKind, EntryStorage, InsertOutcome, StorageLookup};

use port::{Port, PortCtx};


/// Kind of memory access being translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    Load,
    Store,
    Fetch,
    Atomic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegeMode {
    User,
    Supervisor,
    Machine,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SatpMode {
    #[default]
    Bare,
    Sv39,
}

/// Snapshot of the CSR state that governs translation, sampled every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsrState {
    pub satp_mode: SatpMode,
    pub asid: u16,
    pub privilege: PrivilegeMode,
    /// `mstatus.MPRV`: data accesses use `mpp` as their privilege.
    pub mprv: bool,
    pub mpp: PrivilegeMode,
    pub sum: bool,
    pub mxr: bool,
}

impl Default for CsrState {
    fn default() -> Self {
        Self {
            satp_mode: SatpMode::Bare,
            asid: 0,
            privilege: PrivilegeMode::Machine,
            mprv: false,
            mpp: PrivilegeMode::User,
            sum: false,
            mxr: false,
        }
    }
}

impl CsrState {
    /// Sv39 translation at `privilege` with address space `asid`.
    pub fn sv39(asid: u16, privilege: PrivilegeMode) -> Self {
        Self {
            satp_mode: SatpMode::Sv39,
            asid,
            privilege,
            ..Self::default()
        }
    }

    /// Privilege an access of `kind` is checked at.
    #[inline]
    pub fn effective_mode(&self, kind: AccessKind) -> PrivilegeMode {
        if kind != AccessKind::Fetch && self.mprv {
            self.mpp
        } else {
            self.privilege
        }
    }

    #[inline]
    pub fn vm_enabled(&self, kind: AccessKind) -> bool {
        self.satp_mode == SatpMode::Sv39 && self.effective_mode(kind) != PrivilegeMode::Machine
    }

    #[inline]
    pub fn mode_flags(&self, kind: AccessKind) -> perm::ModeFlags {
        perm::ModeFlags {
            sum: self.sum,
            mxr: self.mxr,
            vm_enabled: self.vm_enabled(kind),
        }
    }

    /// Translation context; a change between ticks invalidates the whole TLB.
    #[inline]
    fn generation(&self) -> (SatpMode, u16) {
        (self.satp_mode, self.asid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupRequest {
    pub vaddr: u64,
    pub kind: AccessKind,
    /// Access size in bytes, forwarded to the PMP check.
    #[serde(default = "default_access_size")]
    pub size: u8,
}

fn default_access_size() -> u8 {
    8
}

impl LookupRequest {
    pub fn new(vaddr: u64, kind: AccessKind) -> Self {
        Self {
            vaddr,
            kind,
            size: default_access_size(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResponse {
    pub vaddr: u64,
    pub paddr: u64,
    pub miss: bool,
    /// Missed in the super-page array (the same-tick fast path).
    pub fast_miss: bool,
    pub faults: FaultFlags,
    /// Static PMP result of the page, reported when the dynamic check path was taken.
    pub static_pm: Option<StaticPm>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PtwRequest {
    pub vpn: u64,
    pub asid: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtwResponse {
    pub entry: TranslationEntry,
    pub fault: WalkFault,
}

/// Which entries a flush invalidates (`sfence.vma` operand combinations).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushScope {
    All,
    /// Non-global entries of one address space.
    Asid(u16),
    /// Every entry covering the address, global or not.
    Addr(u64),
    /// Non-global entries of one address space covering the address.
    AddrAsid { vaddr: u64, asid: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushEvent {
    pub scope: FlushScope,
}

impl FlushEvent {
    pub fn all() -> Self {
        Self {
            scope: FlushScope::All,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmpVerdict {
    Allowed,
    Denied,
}

/// Physical memory protection / attribute checks on translated addresses.
pub trait PmpChecker {
    /// Dynamic check of one access.
    fn check(&mut self, paddr: u64, size: u8, kind: AccessKind) -> PmpVerdict;

    /// Permissions that hold for the whole page, evaluated once when the page is refilled.
    ///
    /// The default implementation vouches for nothing, so every access falls back to
    /// [`PmpChecker::check`].
    fn static_check(&mut self, ppn: u64, level: PageLevel) -> StaticPm {
        let _ = (ppn, level);
        StaticPm::INVALID
    }
}

impl<T: PmpChecker + ?Sized> PmpChecker for &mut T {
    #[inline]
    fn check(&mut self, paddr: u64, size: u8, kind: AccessKind) -> PmpVerdict {
        <T as PmpChecker>::check(&mut **self, paddr, size, kind)
    }

    #[inline]
    fn static_check(&mut self, ppn: u64, level: PageLevel) -> StaticPm {
        <T as PmpChecker>::static_check(&mut **self, ppn, level)
    }
}

/// PMP that permits every access.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PmpChecker for AllowAll {
    #[inline]
    fn check(&mut self, _paddr: u64, _size: u8, _kind: AccessKind) -> PmpVerdict {
        PmpVerdict::Allowed
    }

    #[inline]
    fn static_check(&mut self, _ppn: u64, _level: PageLevel) -> StaticPm {
        StaticPm::ALLOW_ALL
    }
}

/// Everything presented to the TLB in one tick. Per-port vectors are indexed by port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickInput {
    pub requests: Vec<Option<LookupRequest>>,
    /// Walker request channel readiness, per port.
    pub ptw_ready: Vec<bool>,
    /// Walker response, broadcast to every port.
    pub ptw_response: Option<PtwResponse>,
    pub flush: Option<FlushEvent>,
    pub csr: CsrState,
}

impl TickInput {
    /// No requests, walker ready on every port.
    pub fn idle(ports: usize, csr: CsrState) -> Self {
        Self {
            requests: vec![None; ports],
            ptw_ready: vec![true; ports],
            ptw_response: None,
            flush: None,
            csr,
        }
    }

    #[track_caller]
    pub fn with_request(mut self, port: usize, req: LookupRequest) -> Self {
        self.requests[port] = Some(req);
        self
    }

    #[track_caller]
    pub fn with_ptw_ready(mut self, port: usize, ready: bool) -> Self {
        self.ptw_ready[port] = ready;
        self
    }

    pub fn with_ptw_response(mut self, resp: PtwResponse) -> Self {
        self.ptw_response = Some(resp);
        self
    }

    pub fn with_flush(mut self, scope: FlushScope) -> Self {
        self.flush = Some(FlushEvent { scope });
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickOutput {
    pub responses: Vec<Option<LookupResponse>>,
    /// Walker request channel, valid when `Some`.
    pub ptw_requests: Vec<Option<PtwRequest>>,
    /// Whether the request presented on each port was accepted.
    pub accepted: Vec<bool>,
}

impl TickOutput {
    fn with_ports(ports: usize) -> Self {
        Self {
            responses: vec![None; ports],
            ptw_requests: vec![None; ports],
            accepted: vec![false; ports],
        }
    }
}

/// Counters for one lookup port.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PortStats {
    /// Translated lookups (translation enabled).
    pub lookups: u64,
    pub hits: u64,
    pub misses: u64,
    /// Walker requests accepted by the walker.
    pub ptw_requests: u64,
}

/// Optional TLB statistics.
///
/// Only maintained when the `stats` feature is enabled; otherwise [`Tlb::stats`] returns
/// `None`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct TlbStats {
    pub ports: Vec<PortStats>,
    pub refills: u64,
    /// Normal-page victims moved into the super-page array.
    pub victim_reinserts: u64,
    pub flushes: u64,
}

/// The TLB: entry storage plus one lifecycle state machine per port.
#[derive(Debug, Clone)]
pub struct Tlb {
    config: TlbConfig,
    storage: EntryStorage,
    ports: Vec<Port>,
    now: u64,
    last_generation: Option<(SatpMode, u16)>,
    /// Most recent refill and the tick it committed at.
    last_refill: Option<(u64, TranslationEntry)>,
    #[cfg(feature = "stats")]
    stats: TlbStats,
}

impl Tlb {
    pub fn new(config: TlbConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let storage = EntryStorage::new(&config);
        let ports = config
            .ports
            .iter()
            .enumerate()
            .map(|(index, &mode)| Port::new(index, mode))
            .collect();
        #[cfg(feature = "stats")]
        let stats = TlbStats {
            ports: vec![PortStats::default(); config.ports.len()],
            ..TlbStats::default()
        };
        Ok(Self {
            config,
            storage,
            ports,
            now: 0,
            last_generation: None,
            last_refill: None,
            #[cfg(feature = "stats")]
            stats,
        })
    }

    #[inline]
    pub fn config(&self) -> &TlbConfig {
        &self.config
    }

    #[inline]
    pub fn storage(&self) -> &EntryStorage {
        &self.storage
    }

    #[inline]
    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    /// Number of ticks evaluated so far.
    #[inline]
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn port_mode(&self, port: usize) -> Result<PortMode> {
        self.port(port).map(Port::mode)
    }

    pub fn port_state(&self, port: usize) -> Result<PortState> {
        self.port(port).map(Port::state)
    }

    /// Whether `port` would accept a request next tick (a flush in that tick still
    /// rejects it).
    pub fn ready(&self, port: usize) -> Result<bool> {
        self.port(port).map(Port::ready)
    }

    fn port(&self, port: usize) -> Result<&Port> {
        self.ports.get(port).ok_or(TlbError::NoSuchPort {
            port,
            ports: self.ports.len(),
        })
    }

    /// Returns current statistics when the `stats` feature is enabled.
    #[inline]
    pub fn stats(&self) -> Option<TlbStats> {
        #[cfg(feature = "stats")]
        {
            Some(self.stats.clone())
        }

        #[cfg(not(feature = "stats"))]
        {
            None
        }
    }

    #[inline]
    pub fn reset_stats(&mut self) {
        #[cfg(feature = "stats")]
        {
            self.stats = TlbStats {
                ports: vec![PortStats::default(); self.ports.len()],
                ..TlbStats::default()
            };
        }
    }

    /// Evaluates one tick.
    ///
    /// Every port reads the storage as it stood at the start of the tick. Updates commit
    /// afterwards in a fixed order: recency touches (port order), the walker refill, then
    /// the flush. A flush (explicit, or implied by a satp change) drops a same-tick walker
    /// response entirely.
    pub fn tick<P: PmpChecker + ?Sized>(
        &mut self,
        input: &TickInput,
        pmp: &mut P,
    ) -> Result<TickOutput> {
        let ports = self.ports.len();
        if input.requests.len() != ports {
            return Err(TlbError::PortCountMismatch {
                field: "requests",
                got: input.requests.len(),
                expected: ports,
            });
        }
        if input.ptw_ready.len() != ports {
            return Err(TlbError::PortCountMismatch {
                field: "ptw_ready",
                got: input.ptw_ready.len(),
                expected: ports,
            });
        }

        let now = self.now;
        let generation = input.csr.generation();
        let generation_changed = self.last_generation.is_some_and(|g| g != generation);
        self.last_generation = Some(generation);
        let flush = if generation_changed {
            debug!(tick = now, asid = input.csr.asid, "satp changed, flushing");
            Some(FlushScope::All)
        } else {
            input.flush.map(|f| f.scope)
        };
        let flushing = flush.is_some();

        let refill = match input.ptw_response {
            Some(resp) if !flushing => {
                let entry = resp.entry.with_fault(resp.fault);
                let replenish = pmp.static_check(entry.ppn(), entry.level());
                Some((entry.with_static_pm(replenish), replenish))
            }
            Some(resp) => {
                debug!(
                    tick = now,
                    vpn = resp.entry.vpn(),
                    "walker response dropped by flush"
                );
                None
            }
            None => None,
        };

        let ctx = PortCtx {
            csr: &input.csr,
            storage: &self.storage,
            refill: refill.map(|(entry, _)| entry),
            just_refilled: self
                .last_refill
                .filter(|&(at, _)| at + 1 == now)
                .map(|(_, entry)| entry),
            flushing,
            refill_settling: self
                .last_refill
                .is_some_and(|(at, _)| now - at <= 2),
            ptw_ready: false,
            paddr_bits: self.config.paddr_bits,
        };

        let mut out = TickOutput::with_ports(ports);
        let mut touches = Vec::new();
        for (i, port) in self.ports.iter_mut().enumerate() {
            let port_ctx = PortCtx {
                ptw_ready: input.ptw_ready[i],
                ..ctx
            };
            let res = port.tick(&port_ctx, &mut *pmp, input.requests[i], &mut touches);

            #[cfg(feature = "stats")]
            {
                let stats = &mut self.stats.ports[i];
                if let Some(hit) = res.lookup {
                    stats.lookups = stats.lookups.wrapping_add(1);
                    if hit {
                        stats.hits = stats.hits.wrapping_add(1);
                    } else {
                        stats.misses = stats.misses.wrapping_add(1);
                    }
                }
                if res.ptw_request.is_some() && input.ptw_ready[i] {
                    stats.ptw_requests = stats.ptw_requests.wrapping_add(1);
                }
            }

            out.responses[i] = res.response;
            out.ptw_requests[i] = res.ptw_request;
            out.accepted[i] = res.accepted;
        }

        self.storage.touch(&touches);

        if let Some((entry, replenish)) = refill {
            let outcome = self.storage.insert(entry, replenish);
            debug!(
                tick = now,
                vpn = entry.vpn(),
                asid = entry.asid(),
                level = ?entry.level(),
                array = ?outcome.array,
                way = outcome.way,
                evicted = outcome.evicted.is_some(),
                "refill"
            );
            self.last_refill = Some((now, entry));

            #[cfg(feature = "stats")]
            {
                self.stats.refills = self.stats.refills.wrapping_add(1);
                if outcome.reinserted {
                    self.stats.victim_reinserts = self.stats.victim_reinserts.wrapping_add(1);
                }
            }
        }

        if let Some(scope) = flush {
            let dropped = self.storage.flush(scope);
            debug!(tick = now, ?scope, dropped, "flush");

            #[cfg(feature = "stats")]
            {
                self.stats.flushes = self.stats.flushes.wrapping_add(1);
            }
        }

        self.now += 1;
        Ok(out)
    }
}
