//! Normal-page and super-page entry arrays.

use tracing::trace;

use crate::config::{NormalShape, TlbConfig};
use crate::entry::{StaticPm, TranslationEntry};
use crate::replacement::{ReplacementKind, Replacer};
use crate::FlushScope;

/// Which of the two arrays a slot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayKind {
    Normal,
    Super,
}

/// A matching slot, copied out of the array so lookups never hold a borrow across the
/// tick's commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHit {
    pub entry: TranslationEntry,
    pub set: usize,
    pub way: usize,
}

/// Result of probing both arrays with the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageLookup {
    pub normal: Option<SlotHit>,
    pub super_page: Option<SlotHit>,
}

impl StorageLookup {
    #[inline]
    pub fn hit(&self) -> bool {
        self.normal.is_some() || self.super_page.is_some()
    }

    /// Hit in the fully-associative super-page array (the fast path).
    #[inline]
    pub fn super_hit(&self) -> bool {
        self.super_page.is_some()
    }

    /// The translation to use; the super-page copy wins when both arrays hit.
    #[inline]
    pub fn entry(&self) -> Option<TranslationEntry> {
        self.super_page.or(self.normal).map(|slot| slot.entry)
    }

    /// Recency updates implied by this lookup.
    pub fn touches(&self) -> impl Iterator<Item = Touch> + '_ {
        let normal = self.normal.map(|slot| Touch {
            array: ArrayKind::Normal,
            set: slot.set,
            way: slot.way,
        });
        let super_page = self.super_page.map(|slot| Touch {
            array: ArrayKind::Super,
            set: slot.set,
            way: slot.way,
        });
        normal.into_iter().chain(super_page)
    }
}

/// A recency update for one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Touch {
    pub array: ArrayKind,
    pub set: usize,
    pub way: usize,
}

/// Where a refill landed and what it displaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    pub array: ArrayKind,
    pub set: usize,
    pub way: usize,
    /// Valid entry displaced from the target array, if any.
    pub evicted: Option<TranslationEntry>,
    /// Set when `evicted` was moved into the super-page array instead of being dropped.
    pub reinserted: bool,
}

#[derive(Debug, Clone)]
struct EntryArray {
    sets: usize,
    ways: usize,
    entries: Vec<TranslationEntry>,
    replacer: Replacer,
}

struct Placement {
    set: usize,
    way: usize,
    evicted: Option<TranslationEntry>,
}

impl EntryArray {
    fn new(sets: usize, ways: usize, kind: ReplacementKind, seed: u16) -> Self {
        Self {
            sets,
            ways,
            entries: vec![TranslationEntry::default(); sets * ways],
            replacer: Replacer::new(kind, sets, ways, seed),
        }
    }

    #[inline]
    fn set_of(&self, vpn: u64) -> usize {
        (vpn as usize) & (self.sets - 1)
    }

    #[inline]
    fn slot(&self, set: usize, way: usize) -> &TranslationEntry {
        &self.entries[set * self.ways + way]
    }

    #[inline]
    fn slot_mut(&mut self, set: usize, way: usize) -> &mut TranslationEntry {
        &mut self.entries[set * self.ways + way]
    }

    fn lookup(&self, vpn: u64, asid: u16) -> Option<SlotHit> {
        let set = self.set_of(vpn);
        (0..self.ways).find_map(|way| {
            let entry = self.slot(set, way);
            entry.hit(vpn, asid).then_some(SlotHit {
                entry: *entry,
                set,
                way,
            })
        })
    }

    fn place(&mut self, entry: TranslationEntry) -> Placement {
        let set = self.set_of(entry.vpn());

        if let Some(way) = (0..self.ways).find(|&way| self.slot(set, way).same_mapping(&entry)) {
            *self.slot_mut(set, way) = entry;
            self.replacer.touch(set, way);
            return Placement {
                set,
                way,
                evicted: None,
            };
        }

        let way = (0..self.ways)
            .find(|&way| !self.slot(set, way).valid())
            .unwrap_or_else(|| self.replacer.victim(set));
        let old = *self.slot(set, way);
        *self.slot_mut(set, way) = entry;
        self.replacer.touch(set, way);
        Placement {
            set,
            way,
            evicted: old.valid().then_some(old),
        }
    }

    fn flush(&mut self, scope: FlushScope) -> usize {
        let mut dropped = 0;
        for entry in &mut self.entries {
            if entry.flush_matches(scope) {
                entry.invalidate();
                dropped += 1;
            }
        }
        dropped
    }
}

/// Owns both entry arrays and their replacement state.
///
/// The arrays are only mutated through [`EntryStorage::insert`], [`EntryStorage::touch`] and
/// [`EntryStorage::flush`]; the controller calls them once per tick after every port has
/// finished reading.
#[derive(Debug, Clone)]
pub struct EntryStorage {
    normal: EntryArray,
    super_page: EntryArray,
    normal_as_victim: bool,
}

impl EntryStorage {
    pub fn new(config: &TlbConfig) -> Self {
        let (sets, ways) = match config.normal.shape {
            NormalShape::SetAssociative { sets, ways } => (sets, ways),
            NormalShape::FullyAssociative { ways } => (1, ways),
        };
        Self {
            normal: EntryArray::new(sets, ways, config.normal.replacement, config.random_seed),
            super_page: EntryArray::new(
                1,
                config.super_page.ways,
                config.super_page.replacement,
                config.random_seed.rotate_left(8),
            ),
            normal_as_victim: config.normal_as_victim,
        }
    }

    /// Searches both arrays for `(vpn, asid)`.
    ///
    /// Storage does not know whether translation is enabled; callers must not consult it
    /// when it is off.
    pub fn lookup(&self, vpn: u64, asid: u16) -> StorageLookup {
        StorageLookup {
            normal: self.normal.lookup(vpn, asid),
            super_page: self.super_page.lookup(vpn, asid),
        }
    }

    /// Installs a walker result. 4K pages go to the normal array, larger pages to the
    /// super-page array. `replenish` is the static PMP result for the page.
    pub fn insert(&mut self, entry: TranslationEntry, replenish: StaticPm) -> InsertOutcome {
        debug_assert!(entry.valid());
        let entry = entry.with_static_pm(replenish);

        if entry.level().is_super() {
            let placed = self.super_page.place(entry);
            return InsertOutcome {
                array: ArrayKind::Super,
                set: placed.set,
                way: placed.way,
                evicted: placed.evicted,
                reinserted: false,
            };
        }

        let placed = self.normal.place(entry);
        let reinserted = match placed.evicted {
            Some(victim) if self.normal_as_victim => {
                let moved = self.super_page.place(victim);
                trace!(
                    vpn = victim.vpn(),
                    asid = victim.asid(),
                    way = moved.way,
                    "normal-page victim moved to super-page array"
                );
                true
            }
            _ => false,
        };
        InsertOutcome {
            array: ArrayKind::Normal,
            set: placed.set,
            way: placed.way,
            evicted: placed.evicted,
            reinserted,
        }
    }

    /// Applies a tick's recency updates in order.
    pub fn touch(&mut self, touches: &[Touch]) {
        let normal = touches
            .iter()
            .filter(|t| t.array == ArrayKind::Normal)
            .map(|t| (t.set, t.way));
        self.normal.replacer.touch_all(normal);
        let super_page = touches
            .iter()
            .filter(|t| t.array == ArrayKind::Super)
            .map(|t| (t.set, t.way));
        self.super_page.replacer.touch_all(super_page);
    }

    /// Invalidates every entry selected by `scope`; returns how many were dropped.
    pub fn flush(&mut self, scope: FlushScope) -> usize {
        self.normal.flush(scope) + self.super_page.flush(scope)
    }

    /// Valid entries of one array, in slot order.
    pub fn entries(&self, array: ArrayKind) -> impl Iterator<Item = &TranslationEntry> + '_ {
        let arr = match array {
            ArrayKind::Normal => &self.normal,
            ArrayKind::Super => &self.super_page,
        };
        arr.entries.iter().filter(|e| e.valid())
    }

    pub fn valid_count(&self) -> usize {
        self.entries(ArrayKind::Normal).count() + self.entries(ArrayKind::Super).count()
    }
}
