//! Page-table collaborator
//!
//! The kernel core never touches raw page-table bits. Object creation and the
//! capability window talk to the hardware walker through [`Mmu`]; a platform
//! layer implements it for the real MMU, and [`SoftMmu`] implements it in
//! software for hosted runs and tests.
//!
//! ## Levels
//!
//! ```text
//! level 2 (root)  ->  level 1  ->  level 0 (4 KiB leaves)
//!   1 GiB/entry       2 MiB/entry    4 KiB/entry
//! ```
//!
//! An entry flagged [`MapFlags::TABLE`] points at the next-lower table, any
//! other entry is a leaf.

use alloc::collections::BTreeMap;

use bitflags::bitflags;

use super::{FrameAllocator, PageAllocator, PhysAddr, VirtAddr};
use crate::config::MAX_MAP_LEVEL;

bitflags! {
    /// Page-table entry attributes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MapFlags: u8 {
        const READ    = 1 << 0;
        const WRITE   = 1 << 1;
        const EXECUTE = 1 << 2;
        const USER    = 1 << 3;
        /// Entry points at a next-level table
        const TABLE   = 1 << 4;
    }
}

/// A decoded page-table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pte {
    pub phys: PhysAddr,
    pub flags: MapFlags,
}

impl Pte {
    #[inline]
    pub fn is_table(&self) -> bool {
        self.flags.contains(MapFlags::TABLE)
    }
}

/// Abstract page-table walker
pub trait Mmu {
    /// Install `vaddr -> paddr` as an entry at `level` in the tree rooted at
    /// `root`. Missing intermediate tables are allocated when `allocate` is
    /// set. Returns `false` if the slot is occupied or a table is missing.
    fn map(
        &mut self,
        root: PhysAddr,
        vaddr: VirtAddr,
        paddr: PhysAddr,
        flags: MapFlags,
        level: u8,
        allocate: bool,
    ) -> bool;

    /// Remove the entry for `vaddr` at exactly `level`. Returns `false` if
    /// the path ends above `level` or the slot is empty.
    fn unmap(&mut self, root: PhysAddr, vaddr: VirtAddr, level: u8) -> bool;

    /// Entry for `vaddr` at `level`, walking down from `table` (a root)
    fn walk(&self, table: PhysAddr, vaddr: VirtAddr, level: u8) -> Option<Pte>;
}

/// Software page tables
///
/// Entries live in a map keyed by `(table, index)`. Intermediate tables come
/// from a private [`FrameAllocator`] so their addresses never collide with
/// kernel objects.
#[derive(Debug)]
pub struct SoftMmu {
    entries: BTreeMap<(PhysAddr, usize), Pte>,
    tables: FrameAllocator,
}

impl SoftMmu {
    /// Intermediate tables are drawn from `tables`
    pub fn new(tables: FrameAllocator) -> Self {
        Self { entries: BTreeMap::new(), tables }
    }

    /// Number of live entries, across all tables
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Table at `level` on the path to `vaddr`, creating it when `allocate`
    fn descend(&mut self, root: PhysAddr, vaddr: VirtAddr, level: u8, allocate: bool) -> Option<PhysAddr> {
        let mut table = root;
        for current in ((level + 1)..=MAX_MAP_LEVEL).rev() {
            let key = (table, vaddr.table_index(current));
            table = match self.entries.get(&key) {
                Some(pte) if pte.is_table() => pte.phys,
                Some(_) => return None,
                None if allocate => {
                    let next = self.tables.allocate_page()?;
                    self.entries.insert(key, Pte { phys: next, flags: MapFlags::TABLE });
                    next
                }
                None => return None,
            };
        }
        Some(table)
    }
}

impl Mmu for SoftMmu {
    fn map(
        &mut self,
        root: PhysAddr,
        vaddr: VirtAddr,
        paddr: PhysAddr,
        flags: MapFlags,
        level: u8,
        allocate: bool,
    ) -> bool {
        if level > MAX_MAP_LEVEL {
            return false;
        }
        let Some(table) = self.descend(root, vaddr, level, allocate) else {
            return false;
        };
        let key = (table, vaddr.table_index(level));
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, Pte { phys: paddr, flags });
        true
    }

    fn unmap(&mut self, root: PhysAddr, vaddr: VirtAddr, level: u8) -> bool {
        if level > MAX_MAP_LEVEL {
            return false;
        }
        let Some(table) = self.descend(root, vaddr, level, false) else {
            return false;
        };
        self.entries.remove(&(table, vaddr.table_index(level))).is_some()
    }

    fn walk(&self, table: PhysAddr, vaddr: VirtAddr, level: u8) -> Option<Pte> {
        if level > MAX_MAP_LEVEL {
            return None;
        }
        let mut current = table;
        for l in ((level + 1)..=MAX_MAP_LEVEL).rev() {
            let pte = self.entries.get(&(current, vaddr.table_index(l)))?;
            if !pte.is_table() {
                return None;
            }
            current = pte.phys;
        }
        self.entries.get(&(current, vaddr.table_index(level))).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mmu() -> SoftMmu {
        SoftMmu::new(FrameAllocator::new(PhysAddr::new(0x8000_0000), 16))
    }

    const ROOT: PhysAddr = PhysAddr::new(0x1000);

    #[test]
    fn map_walk_unmap_leaf() {
        let mut mmu = mmu();
        let va = VirtAddr::new(0x4000_2000);
        assert!(!mmu.map(ROOT, va, PhysAddr::new(0x5000), MapFlags::READ, 0, false));
        assert!(mmu.map(ROOT, va, PhysAddr::new(0x5000), MapFlags::READ, 0, true));
        // Two intermediate tables plus the leaf.
        assert_eq!(mmu.entry_count(), 3);

        let pte = mmu.walk(ROOT, va, 0).unwrap();
        assert_eq!(pte.phys, PhysAddr::new(0x5000));
        assert!(mmu.walk(ROOT, va, 1).unwrap().is_table());

        assert!(!mmu.map(ROOT, va, PhysAddr::new(0x6000), MapFlags::READ, 0, true));
        assert!(mmu.unmap(ROOT, va, 0));
        assert_eq!(mmu.walk(ROOT, va, 0), None);
        assert!(!mmu.unmap(ROOT, va, 0));
        // Intermediate tables stay in place.
        assert!(mmu.walk(ROOT, va, 1).unwrap().is_table());
    }

    #[test]
    fn unmap_only_touches_the_requested_level() {
        let mut mmu = mmu();
        let a = VirtAddr::new(0x4000_2000);
        let b = VirtAddr::new(0x4000_3000);
        let empty = VirtAddr::new(0x4000_4000);
        assert!(mmu.map(ROOT, a, PhysAddr::new(0x5000), MapFlags::READ, 0, true));
        assert!(mmu.map(ROOT, b, PhysAddr::new(0x6000), MapFlags::READ, 0, false));

        // No leaf at `empty`: nothing is removed and siblings survive.
        assert!(!mmu.unmap(ROOT, empty, 0));
        assert_eq!(mmu.walk(ROOT, b, 0).map(|p| p.phys), Some(PhysAddr::new(0x6000)));

        // A path that ends early reports failure.
        assert!(!mmu.unmap(ROOT, VirtAddr::new(0x8000_0000), 0));

        // Removing the level-1 table entry detaches the whole segment.
        assert!(mmu.unmap(ROOT, a, 1));
        assert_eq!(mmu.walk(ROOT, a, 0), None);
        assert_eq!(mmu.walk(ROOT, b, 0), None);
        assert!(!mmu.unmap(ROOT, a, 1));
    }

    #[test]
    fn caller_supplied_table_is_used_for_leaves() {
        let mut mmu = mmu();
        let va = VirtAddr::new(0x20_0000_0000);
        let leaf_table = PhysAddr::new(0x9000);
        assert!(mmu.map(ROOT, va, leaf_table, MapFlags::TABLE, 1, true));
        assert!(mmu.map(ROOT, va, PhysAddr::new(0x7000), MapFlags::READ | MapFlags::WRITE, 0, false));
        assert_eq!(mmu.entries.get(&(leaf_table, 0)).map(|p| p.phys), Some(PhysAddr::new(0x7000)));
    }

    #[test]
    fn huge_leaf_blocks_descent() {
        let mut mmu = mmu();
        let va = VirtAddr::new(0x4000_0000);
        assert!(mmu.map(ROOT, va, PhysAddr::new(0x4000_0000), MapFlags::READ, 2, false));
        assert!(!mmu.map(ROOT, va, PhysAddr::new(0x1000), MapFlags::READ, 0, true));
        assert_eq!(mmu.walk(ROOT, va, 0), None);
    }
}
