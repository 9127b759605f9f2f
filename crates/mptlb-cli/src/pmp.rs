use mptlb::{AccessKind, PageLevel, PmpChecker, PmpVerdict, StaticPm, PAGE_SHIFT};
use serde::Deserialize;

/// One physical region with uniform permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PmpRegion {
    pub base: u64,
    pub size: u64,
    #[serde(default)]
    pub r: bool,
    #[serde(default)]
    pub w: bool,
    #[serde(default)]
    pub x: bool,
}

impl PmpRegion {
    fn contains(&self, start: u64, len: u64) -> bool {
        let Some(end) = start.checked_add(len) else {
            return false;
        };
        start >= self.base && end <= self.base.saturating_add(self.size)
    }

    fn overlaps(&self, start: u64, len: u64) -> bool {
        start < self.base.saturating_add(self.size) && self.base < start.saturating_add(len)
    }

    fn allows(&self, kind: AccessKind) -> bool {
        match kind {
            AccessKind::Load => self.r,
            AccessKind::Store | AccessKind::Atomic => self.w,
            AccessKind::Fetch => self.x,
        }
    }
}

/// Region-table PMP. The first region that overlaps an access decides it; with regions
/// configured, an access no region covers is denied. An empty table allows everything.
#[derive(Debug, Clone, Default)]
pub struct RegionPmp {
    regions: Vec<PmpRegion>,
    checks: u64,
}

impl RegionPmp {
    pub fn new(regions: Vec<PmpRegion>) -> Self {
        Self { regions, checks: 0 }
    }

    /// Dynamic checks performed so far.
    pub fn checks(&self) -> u64 {
        self.checks
    }

    fn first_overlapping(&self, start: u64, len: u64) -> Option<&PmpRegion> {
        self.regions.iter().find(|r| r.overlaps(start, len))
    }
}

impl PmpChecker for RegionPmp {
    fn check(&mut self, paddr: u64, size: u8, kind: AccessKind) -> PmpVerdict {
        self.checks += 1;
        if self.regions.is_empty() {
            return PmpVerdict::Allowed;
        }
        let len = u64::from(size.max(1));
        match self.first_overlapping(paddr, len) {
            Some(region) if region.contains(paddr, len) && region.allows(kind) => {
                PmpVerdict::Allowed
            }
            _ => PmpVerdict::Denied,
        }
    }

    fn static_check(&mut self, ppn: u64, level: PageLevel) -> StaticPm {
        if self.regions.is_empty() {
            return StaticPm::ALLOW_ALL;
        }
        let base = ppn << PAGE_SHIFT;
        match self.first_overlapping(base, level.bytes()) {
            Some(region) if region.contains(base, level.bytes()) => StaticPm {
                valid: true,
                r: region.r,
                w: region.w,
                x: region.x,
            },
            _ => StaticPm::INVALID,
        }
    }
}
