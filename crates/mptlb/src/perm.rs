//! Permission and fault derivation for a translated access.
//!
//! Everything here is a pure function of the entry, the access and the privilege state.
//! Access faults (walker access fault or PMP denial) take priority: when one is raised the
//! page-fault bit for the same access is cleared.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::entry::{PteFlags, StaticPm, TranslationEntry, WalkFault};
use crate::{AccessKind, PmpChecker, PrivilegeMode};

bitflags! {
    /// Access kinds a fault is reported for. Atomics report on `STORE`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct FaultKinds: u8 {
        const LOAD = 1 << 0;
        const STORE = 1 << 1;
        const FETCH = 1 << 2;
    }
}

impl FaultKinds {
    #[inline]
    pub fn of(kind: AccessKind) -> Self {
        match kind {
            AccessKind::Load => FaultKinds::LOAD,
            AccessKind::Store | AccessKind::Atomic => FaultKinds::STORE,
            AccessKind::Fetch => FaultKinds::FETCH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FaultFlags {
    pub page_fault: FaultKinds,
    pub access_fault: FaultKinds,
    /// The access would have to set A or D; raised as a page fault so software can update
    /// the PTE.
    pub needs_update: bool,
}

impl FaultFlags {
    pub const NONE: Self = Self {
        page_fault: FaultKinds::empty(),
        access_fault: FaultKinds::empty(),
        needs_update: false,
    };

    #[inline]
    pub fn any(&self) -> bool {
        !self.page_fault.is_empty() || !self.access_fault.is_empty()
    }
}

/// PTE permission bits plus the raw walker fault bits cached with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryPerm {
    pub flags: PteFlags,
    pub fault: WalkFault,
}

impl EntryPerm {
    pub fn of(entry: &TranslationEntry) -> Self {
        Self {
            flags: entry.flags(),
            fault: entry.fault(),
        }
    }
}

/// `mstatus` bits that modulate the check, plus whether translation is on at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModeFlags {
    pub sum: bool,
    pub mxr: bool,
    pub vm_enabled: bool,
}

/// Derives the fault flags of one access.
///
/// `pm` is only consulted when `pm.valid` is set.
pub fn check(
    perm: EntryPerm,
    kind: AccessKind,
    pm: StaticPm,
    mode: PrivilegeMode,
    flags: ModeFlags,
) -> FaultFlags {
    if !flags.vm_enabled {
        return FaultFlags::NONE;
    }

    let pte = perm.flags;
    let is_fetch = kind == AccessKind::Fetch;
    let user_page = pte.contains(PteFlags::U);
    let mode_ok = !((mode == PrivilegeMode::User && !user_page)
        || (mode == PrivilegeMode::Supervisor && user_page && (!flags.sum || is_fetch)));

    let perm_fail = match kind {
        AccessKind::Load => {
            !(mode_ok
                && (pte.contains(PteFlags::R) || (flags.mxr && pte.contains(PteFlags::X))))
        }
        AccessKind::Store | AccessKind::Atomic => !(mode_ok && pte.contains(PteFlags::W)),
        AccessKind::Fetch => !(mode_ok && pte.contains(PteFlags::X)),
    };

    let needs_update = match kind {
        AccessKind::Load | AccessKind::Fetch => !pte.contains(PteFlags::A),
        AccessKind::Store | AccessKind::Atomic => !pte.contains(PteFlags::A | PteFlags::D),
    };

    let access_fault = perm.fault.access_fault || (pm.valid && pm.denies(kind));
    let page_fault = (perm_fail || perm.fault.page_fault || needs_update) && !access_fault;

    let bit = FaultKinds::of(kind);
    FaultFlags {
        page_fault: if page_fault { bit } else { FaultKinds::empty() },
        access_fault: if access_fault { bit } else { FaultKinds::empty() },
        needs_update,
    }
}

/// Check for a super-page fast hit: the entry's static PMP result stands in for the
/// dynamic check, so the PMP collaborator is not consulted.
#[inline]
pub fn fast_check(
    entry: &TranslationEntry,
    kind: AccessKind,
    mode: PrivilegeMode,
    flags: ModeFlags,
) -> FaultFlags {
    check(EntryPerm::of(entry), kind, entry.static_pm(), mode, flags)
}

/// Check for every other hit: the PMP collaborator judges the translated address.
pub fn full_check<P: PmpChecker + ?Sized>(
    entry: &TranslationEntry,
    kind: AccessKind,
    paddr: u64,
    size: u8,
    pmp: &mut P,
    mode: PrivilegeMode,
    flags: ModeFlags,
) -> FaultFlags {
    if !flags.vm_enabled {
        return FaultFlags::NONE;
    }
    let pm = StaticPm::from_verdict(pmp.check(paddr, size, kind));
    check(EntryPerm::of(entry), kind, pm, mode, flags)
}
