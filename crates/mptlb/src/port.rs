//! Per-port request lifecycle.
//!
//! A request accepted in tick `t` is looked up against the storage snapshot of tick `t`
//! and retired in tick `t + 1`. Non-blocking ports always answer on the retire tick.
//! Blocking ports park a miss (`miss_pending`), keep a walker request on the wire until it
//! is accepted (`ptw_outstanding`) and hold their response channel invalid
//! (`response_suppressed`) until a walker response matches the parked request.

use tracing::{debug, trace};

use crate::entry::{vpn_of, TranslationEntry};
use crate::perm::{fast_check, full_check, FaultFlags, ModeFlags};
use crate::storage::{EntryStorage, Touch};
use crate::{
    CsrState, LookupRequest, LookupResponse, PmpChecker, PortMode, PrivilegeMode, PtwRequest,
};

/// Miss-handling flags of a port. Always clear on non-blocking ports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortState {
    pub miss_pending: bool,
    pub ptw_outstanding: bool,
    pub response_suppressed: bool,
}

/// Tick-wide inputs shared by every port.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PortCtx<'a> {
    pub(crate) csr: &'a CsrState,
    pub(crate) storage: &'a EntryStorage,
    /// Walker result presented this tick; `None` under flush.
    pub(crate) refill: Option<TranslationEntry>,
    /// Entry committed at the previous tick boundary.
    pub(crate) just_refilled: Option<TranslationEntry>,
    pub(crate) flushing: bool,
    /// A refill committed in one of the two previous ticks.
    pub(crate) refill_settling: bool,
    pub(crate) ptw_ready: bool,
    pub(crate) paddr_bits: u8,
}

#[derive(Debug, Default)]
pub(crate) struct PortOutput {
    pub(crate) response: Option<LookupResponse>,
    pub(crate) ptw_request: Option<PtwRequest>,
    pub(crate) accepted: bool,
    /// `Some(hit)` when the accepted request performed a translated lookup.
    #[cfg_attr(not(feature = "stats"), allow(dead_code))]
    pub(crate) lookup: Option<bool>,
}

/// An accepted request together with the privilege state it was accepted under.
#[derive(Debug, Clone, Copy)]
struct Access {
    req: LookupRequest,
    mode: PrivilegeMode,
    flags: ModeFlags,
    asid: u16,
}

impl Access {
    #[inline]
    fn vpn(&self) -> u64 {
        vpn_of(self.req.vaddr)
    }
}

#[derive(Debug, Clone, Copy)]
enum Lookup {
    /// Translation off.
    Bare,
    Hit {
        entry: TranslationEntry,
        super_hit: bool,
    },
    Miss,
}

/// Pipeline register between accept and retire.
#[derive(Debug, Clone, Copy)]
struct Stage {
    access: Access,
    lookup: Lookup,
}

#[derive(Debug, Clone)]
pub(crate) struct Port {
    index: usize,
    mode: PortMode,
    state: PortState,
    stage: Option<Stage>,
    parked: Option<Access>,
}

impl Port {
    pub(crate) fn new(index: usize, mode: PortMode) -> Self {
        Self {
            index,
            mode,
            state: PortState::default(),
            stage: None,
            parked: None,
        }
    }

    #[inline]
    pub(crate) fn mode(&self) -> PortMode {
        self.mode
    }

    #[inline]
    pub(crate) fn state(&self) -> PortState {
        self.state
    }

    /// Whether a request presented next tick (absent a flush) would be accepted.
    #[inline]
    pub(crate) fn ready(&self) -> bool {
        !self.state.response_suppressed
    }

    pub(crate) fn tick<P: PmpChecker + ?Sized>(
        &mut self,
        ctx: &PortCtx<'_>,
        pmp: &mut P,
        request: Option<LookupRequest>,
        touches: &mut Vec<Touch>,
    ) -> PortOutput {
        let mut out = PortOutput::default();

        if ctx.flushing && self.state != PortState::default() {
            debug!(port = self.index, "flush discards parked miss");
            self.state = PortState::default();
            self.parked = None;
        }

        if let Some(stage) = self.stage.take() {
            self.retire(stage, ctx, &mut *pmp, &mut out);
        }

        if self.state.miss_pending {
            self.wait(ctx, &mut *pmp, &mut out);
        }

        if let Some(req) = request {
            if ctx.flushing || self.state.response_suppressed {
                trace!(port = self.index, vaddr = req.vaddr, "request not accepted");
            } else {
                out.accepted = true;
                out.lookup = self.accept(req, ctx, touches);
            }
        }

        out
    }

    fn accept(
        &mut self,
        req: LookupRequest,
        ctx: &PortCtx<'_>,
        touches: &mut Vec<Touch>,
    ) -> Option<bool> {
        let csr = ctx.csr;
        let access = Access {
            req,
            mode: csr.effective_mode(req.kind),
            flags: csr.mode_flags(req.kind),
            asid: csr.asid,
        };

        if !access.flags.vm_enabled {
            self.stage = Some(Stage {
                access,
                lookup: Lookup::Bare,
            });
            return None;
        }

        let found = ctx.storage.lookup(access.vpn(), access.asid);
        touches.extend(found.touches());
        let lookup = match found.entry() {
            Some(entry) => Lookup::Hit {
                entry,
                super_hit: found.super_hit(),
            },
            None => Lookup::Miss,
        };
        if matches!(lookup, Lookup::Miss) && self.mode == PortMode::Blocking {
            // The port is busy from the accepting tick on; retire adds `ptw_outstanding`.
            self.state.miss_pending = true;
            self.state.response_suppressed = true;
        }
        self.stage = Some(Stage { access, lookup });
        Some(found.hit())
    }

    fn retire<P: PmpChecker + ?Sized>(
        &mut self,
        stage: Stage,
        ctx: &PortCtx<'_>,
        pmp: &mut P,
        out: &mut PortOutput,
    ) {
        let Stage { access, lookup } = stage;
        match lookup {
            Lookup::Bare => out.response = Some(bare_response(&access.req, ctx.paddr_bits)),
            Lookup::Hit { entry, super_hit } => {
                out.response = Some(hit_response(
                    &access,
                    &entry,
                    super_hit,
                    ctx.paddr_bits,
                    pmp,
                ));
            }
            Lookup::Miss => {
                let vpn = access.vpn();
                if let Some(entry) = ctx.just_refilled.filter(|e| e.hit(vpn, access.asid)) {
                    trace!(port = self.index, vpn, "miss covered by last refill");
                    out.response = Some(hit_response(
                        &access,
                        &entry,
                        false,
                        ctx.paddr_bits,
                        pmp,
                    ));
                    self.state = PortState::default();
                    return;
                }

                match self.mode {
                    PortMode::NonBlocking => {
                        out.response = Some(miss_response(&access.req));
                        if ctx.flushing {
                            trace!(port = self.index, vpn, "walker request dropped by flush");
                        } else if ctx.refill_settling {
                            trace!(port = self.index, vpn, "walker request held back after refill");
                        } else {
                            out.ptw_request = Some(PtwRequest {
                                vpn,
                                asid: access.asid,
                            });
                        }
                    }
                    PortMode::Blocking => {
                        if ctx.flushing {
                            // Flags were already cleared at the top of the tick.
                            debug!(port = self.index, vpn, "flush discards miss");
                            return;
                        }
                        self.state = PortState {
                            miss_pending: true,
                            ptw_outstanding: true,
                            response_suppressed: true,
                        };
                        self.parked = Some(access);
                    }
                }
            }
        }
    }

    fn wait<P: PmpChecker + ?Sized>(
        &mut self,
        ctx: &PortCtx<'_>,
        pmp: &mut P,
        out: &mut PortOutput,
    ) {
        let Some(access) = self.parked else {
            return;
        };
        let vpn = access.vpn();

        if let Some(entry) = ctx.refill.filter(|e| e.hit(vpn, access.asid)) {
            debug!(port = self.index, vpn, "walker response resolves parked miss");
            out.response = Some(hit_response(
                &access,
                &entry,
                false,
                ctx.paddr_bits,
                pmp,
            ));
            self.state = PortState::default();
            self.parked = None;
            return;
        }

        if self.state.ptw_outstanding {
            out.ptw_request = Some(PtwRequest {
                vpn,
                asid: access.asid,
            });
            if ctx.ptw_ready {
                debug!(port = self.index, vpn, "walker accepted request");
                self.state.ptw_outstanding = false;
            }
        }
    }
}

fn bare_response(req: &LookupRequest, paddr_bits: u8) -> LookupResponse {
    LookupResponse {
        vaddr: req.vaddr,
        paddr: req.vaddr & paddr_mask(paddr_bits),
        miss: false,
        fast_miss: false,
        faults: FaultFlags::NONE,
        static_pm: None,
    }
}

fn miss_response(req: &LookupRequest) -> LookupResponse {
    LookupResponse {
        vaddr: req.vaddr,
        paddr: 0,
        miss: true,
        fast_miss: true,
        faults: FaultFlags::NONE,
        static_pm: None,
    }
}

/// Physical addresses are truncated to the configured width on both the bare and the
/// translated path.
#[inline]
fn paddr_mask(paddr_bits: u8) -> u64 {
    (1u64 << paddr_bits) - 1
}

fn hit_response<P: PmpChecker + ?Sized>(
    access: &Access,
    entry: &TranslationEntry,
    super_hit: bool,
    paddr_bits: u8,
    pmp: &mut P,
) -> LookupResponse {
    let req = &access.req;
    let paddr = entry.translate(req.vaddr) & paddr_mask(paddr_bits);
    let faults = if super_hit {
        fast_check(entry, req.kind, access.mode, access.flags)
    } else {
        full_check(
            entry,
            req.kind,
            paddr,
            req.size,
            pmp,
            access.mode,
            access.flags,
        )
    };
    let static_pm = entry.static_pm();
    LookupResponse {
        vaddr: req.vaddr,
        paddr,
        miss: false,
        fast_miss: !super_hit,
        faults,
        static_pm: (!super_hit && static_pm.valid).then_some(static_pm),
    }
}
