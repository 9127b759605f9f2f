use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{AccessKind, FlushScope, PmpVerdict};

pub const PAGE_SHIFT: u32 = 12;
/// Sv39 virtual page number width.
pub const VPN_BITS: u32 = 27;
/// VPN bits consumed per page-table level.
pub const LEVEL_BITS: u32 = 9;

const VPN_MASK: u64 = (1 << VPN_BITS) - 1;

/// Page-size class of a translation, i.e. the page-table level the walker stopped at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PageLevel {
    #[serde(rename = "4k")]
    Page4K = 0,
    #[serde(rename = "2m")]
    Page2M = 1,
    #[serde(rename = "1g")]
    Page1G = 2,
}

impl PageLevel {
    #[inline]
    pub const fn bytes(self) -> u64 {
        1 << (PAGE_SHIFT + LEVEL_BITS * self as u32)
    }

    /// Mask selecting the VPN bits that take part in the tag compare.
    #[inline]
    pub const fn vpn_mask(self) -> u64 {
        VPN_MASK & !((1 << (LEVEL_BITS * self as u32)) - 1)
    }

    /// 2M and 1G translations live in the super-page array.
    #[inline]
    pub const fn is_super(self) -> bool {
        !matches!(self, PageLevel::Page4K)
    }
}

/// Extracts the Sv39 virtual page number of `vaddr`.
#[inline]
pub fn vpn_of(vaddr: u64) -> u64 {
    (vaddr >> PAGE_SHIFT) & VPN_MASK
}

bitflags! {
    /// Leaf PTE permission bits, laid out as in the RISC-V PTE (bit 0, `V`, is tracked
    /// separately as the entry's validity).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct PteFlags: u8 {
        const R = 1 << 1;
        const W = 1 << 2;
        const X = 1 << 3;
        const U = 1 << 4;
        const G = 1 << 5;
        const A = 1 << 6;
        const D = 1 << 7;
    }
}

/// Fault information reported by the page-table walker alongside an entry.
///
/// Faulting walks are cached like any other translation so repeated accesses fault
/// without another round trip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalkFault {
    #[serde(default)]
    pub page_fault: bool,
    #[serde(default)]
    pub access_fault: bool,
}

impl WalkFault {
    pub const NONE: Self = Self {
        page_fault: false,
        access_fault: false,
    };
}

/// Static PMP/PMA permissions of a whole page, captured when the entry is refilled.
///
/// `valid` is only set when the checker could vouch for the entire page; otherwise the
/// per-access dynamic check is authoritative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StaticPm {
    pub valid: bool,
    pub r: bool,
    pub w: bool,
    pub x: bool,
}

impl StaticPm {
    pub const INVALID: Self = Self {
        valid: false,
        r: false,
        w: false,
        x: false,
    };

    pub const ALLOW_ALL: Self = Self {
        valid: true,
        r: true,
        w: true,
        x: true,
    };

    /// Lifts a dynamic per-access verdict into the static representation.
    pub fn from_verdict(verdict: PmpVerdict) -> Self {
        let allowed = verdict == PmpVerdict::Allowed;
        Self {
            valid: true,
            r: allowed,
            w: allowed,
            x: allowed,
        }
    }

    #[inline]
    pub fn denies(&self, kind: AccessKind) -> bool {
        match kind {
            AccessKind::Load => !self.r,
            AccessKind::Store | AccessKind::Atomic => !self.w,
            AccessKind::Fetch => !self.x,
        }
    }
}

/// A cached Sv39 translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationEntry {
    /// VPN with the bits below the page size cleared.
    vpn: u64,
    ppn: u64,
    asid: u16,
    level: PageLevel,
    flags: PteFlags,
    fault: WalkFault,
    static_pm: StaticPm,
    valid: bool,
}

impl Default for TranslationEntry {
    fn default() -> Self {
        Self {
            vpn: 0,
            ppn: 0,
            asid: 0,
            level: PageLevel::Page4K,
            flags: PteFlags::empty(),
            fault: WalkFault::NONE,
            static_pm: StaticPm::INVALID,
            valid: false,
        }
    }
}

impl TranslationEntry {
    pub fn new(vpn: u64, ppn: u64, asid: u16, level: PageLevel, flags: PteFlags) -> Self {
        Self {
            vpn: vpn & level.vpn_mask(),
            ppn,
            asid,
            level,
            flags,
            fault: WalkFault::NONE,
            static_pm: StaticPm::INVALID,
            valid: true,
        }
    }

    #[inline]
    pub fn with_fault(mut self, fault: WalkFault) -> Self {
        self.fault = fault;
        self
    }

    #[inline]
    pub fn with_static_pm(mut self, static_pm: StaticPm) -> Self {
        self.static_pm = static_pm;
        self
    }

    #[inline]
    pub fn vpn(&self) -> u64 {
        self.vpn
    }

    #[inline]
    pub fn ppn(&self) -> u64 {
        self.ppn
    }

    #[inline]
    pub fn asid(&self) -> u16 {
        self.asid
    }

    #[inline]
    pub fn level(&self) -> PageLevel {
        self.level
    }

    #[inline]
    pub fn flags(&self) -> PteFlags {
        self.flags
    }

    #[inline]
    pub fn fault(&self) -> WalkFault {
        self.fault
    }

    #[inline]
    pub fn static_pm(&self) -> StaticPm {
        self.static_pm
    }

    #[inline]
    pub fn global(&self) -> bool {
        self.flags.contains(PteFlags::G)
    }

    #[inline]
    pub fn valid(&self) -> bool {
        self.valid
    }

    #[inline]
    pub(crate) fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Whether this entry's page contains `vpn`, ignoring ASID.
    #[inline]
    pub fn covers(&self, vpn: u64) -> bool {
        self.valid && (vpn & self.level.vpn_mask()) == self.vpn
    }

    /// Full tag match: valid, ASID (or global) and VPN prefix.
    #[inline]
    pub fn hit(&self, vpn: u64, asid: u16) -> bool {
        self.covers(vpn) && (self.global() || self.asid == asid)
    }

    /// Whether installing `other` must replace this slot rather than allocate a new one.
    #[inline]
    pub(crate) fn same_mapping(&self, other: &TranslationEntry) -> bool {
        self.valid
            && self.vpn == other.vpn
            && self.level == other.level
            && (self.global() || self.asid == other.asid)
    }

    pub(crate) fn flush_matches(&self, scope: FlushScope) -> bool {
        if !self.valid {
            return false;
        }
        match scope {
            FlushScope::All => true,
            FlushScope::Asid(asid) => !self.global() && self.asid == asid,
            FlushScope::Addr(vaddr) => self.covers(vpn_of(vaddr)),
            FlushScope::AddrAsid { vaddr, asid } => {
                !self.global() && self.asid == asid && self.covers(vpn_of(vaddr))
            }
        }
    }

    /// Physical address of `vaddr` through this entry.
    #[inline]
    pub fn translate(&self, vaddr: u64) -> u64 {
        let offset_mask = self.level.bytes() - 1;
        ((self.ppn << PAGE_SHIFT) & !offset_mask) | (vaddr & offset_mask)
    }
}
