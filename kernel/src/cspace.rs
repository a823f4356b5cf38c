//! Capability spaces
//!
//! A task addresses its capabilities through a flat index:
//!
//! ```text
//! index = space * SLOTS_PER_CAP_SPACE + offset
//! ```
//!
//! Cap space `n` is mapped read/write into the task's capability window:
//!
//! ```text
//! CAP_WINDOW_BASE + (n / spaces_per_window) * WINDOW_SEGMENT_SIZE
//!                 + (n % spaces_per_window) * PAGE_SIZE
//! ```
//!
//! Segment 0 is installed at task creation, segment `k` by the `k`-th
//! extension. Slot 0 of space 0 is a permanent `Null` sentinel; every other
//! slot of an inserted space starts on the task's free list.

use crate::config::{CAP_WINDOW_BASE, PAGE_SIZE, SLOTS_PER_CAP_SPACE, WINDOW_SEGMENT_SIZE};
use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::lock::LockOwner;
use crate::memory::{MapFlags, Mmu, VirtAddr};
use crate::objects::{CapIndex, CapSpaceId, SlotRef, TaskId};

impl<M: Mmu> Kernel<M> {
    /// Virtual address of cap space `number` inside a capability window
    pub fn space_vaddr(&self, number: usize) -> VirtAddr {
        let per_window = self.config.spaces_per_window;
        VirtAddr::new(
            CAP_WINDOW_BASE
                + (number / per_window) as u64 * WINDOW_SEGMENT_SIZE
                + (number % per_window) as u64 * PAGE_SIZE as u64,
        )
    }

    /// Virtual base of window segment `segment`
    pub(crate) fn segment_vaddr(&self, segment: usize) -> VirtAddr {
        VirtAddr::new(CAP_WINDOW_BASE + segment as u64 * WINDOW_SEGMENT_SIZE)
    }

    /// Insert the cap space named by the CapSpace capability at `index`
    /// into `task`'s own numbering
    pub fn insert_cap_space(&mut self, task: TaskId, index: CapIndex) -> Result<()> {
        let space = self.capability(task, index)?.as_cap_space()?.space();
        self.with_tasks_locked(LockOwner::task(task), task, task, |k| k.insert_space(task, space))
    }

    /// Map `space` at the task's next window position and thread its slots
    /// onto the free list
    pub(crate) fn insert_space(&mut self, task: TaskId, space: CapSpaceId) -> Result<()> {
        let cs = self.cap_space(space)?;
        if cs.owner.is_some() {
            return Err(Error::IllegalState);
        }
        let phys = cs.phys();

        let t = self.task(task)?;
        let number = t.spaces.len();
        if number >= self.config.space_limit(t.extensions) {
            return Err(Error::Exhausted);
        }
        let root = t.root_table().ok_or(Error::IllegalState)?;
        let vaddr = self.space_vaddr(number);
        if !self.mmu.map(root, vaddr, phys, MapFlags::READ | MapFlags::WRITE, 0, false) {
            log::warn!("task {}: no window table for cap space {} at {:?}", task, number, vaddr);
            return Err(Error::IllegalState);
        }

        let cs = &mut self.cap_spaces[space.index()];
        cs.owner = Some(task);
        cs.number = number;
        self.task_entry(task).spaces.push(space);

        // Push high offsets first so the lowest free index is handed out first.
        let first = if number == 0 { 1 } else { 0 };
        for offset in (first..SLOTS_PER_CAP_SPACE as u32).rev() {
            self.release_slot(task, SlotRef::new(space, offset));
        }
        log::debug!("task {}: inserted cap space {} as #{}", task, space, number);
        Ok(())
    }

    /// Grow `task`'s window by one segment backed by the level-0 PageTable
    /// capability at `index`
    pub fn extend_cap_space(&mut self, task: TaskId, index: CapIndex) -> Result<()> {
        let at = self.lookup(task, index)?;
        self.with_tasks_locked(LockOwner::task(task), task, task, |k| {
            let pt = *k.slot(at).cap.as_page_table()?;
            let t = k.task(task)?;
            if t.extensions >= k.config.max_extensions {
                return Err(Error::Exhausted);
            }
            if pt.level() != 0 {
                return Err(Error::IllegalArgument);
            }
            if pt.is_mapped() {
                return Err(Error::IllegalState);
            }
            let root = t.root_table().ok_or(Error::IllegalState)?;
            let segment = t.extensions as usize + 1;
            let vbase = k.segment_vaddr(segment);
            if !k.mmu.map(root, vbase, pt.phys(), MapFlags::TABLE, 1, true) {
                return Err(Error::IllegalState);
            }
            k.slot_mut(at).cap.as_page_table_mut()?.set_mapped(vbase);
            k.task_entry(task).extensions += 1;
            log::debug!("task {}: window extended to {} segments", task, segment + 1);
            Ok(())
        })
    }

    /// Resolve a flat index to its slot
    ///
    /// Fails `NotFound` for unused or killed tasks and for indices beyond
    /// the inserted spaces. The slot itself may be `Null`.
    pub fn lookup(&self, task: TaskId, index: CapIndex) -> Result<SlotRef> {
        let t = self.task(task)?;
        if !t.state.is_live() {
            return Err(Error::NotFound);
        }
        let number = index / SLOTS_PER_CAP_SPACE;
        let offset = (index % SLOTS_PER_CAP_SPACE) as u32;
        let space = *t.spaces.get(number).ok_or(Error::NotFound)?;
        debug_assert_eq!(
            t.root_table().and_then(|root| self.mmu.walk(root, self.space_vaddr(number), 0)).map(|p| p.phys),
            Some(self.cap_spaces[space.index()].phys()),
            "cap space window out of sync"
        );
        Ok(SlotRef::new(space, offset))
    }

    /// Inverse of [`lookup`](Self::lookup)
    pub fn slot_index(&self, at: SlotRef) -> Result<CapIndex> {
        let cs = self.cap_space(at.space)?;
        if cs.owner.is_none() || at.offset as usize >= SLOTS_PER_CAP_SPACE {
            return Err(Error::NotFound);
        }
        Ok(cs.number * SLOTS_PER_CAP_SPACE + at.offset as usize)
    }

    /// Index the next capability created in or moved into `task` lands at
    pub fn free_index(&self, task: TaskId) -> Result<CapIndex> {
        let head = self.task(task)?.free_head.ok_or(Error::Exhausted)?;
        self.slot_index(head)
    }

    // ---------------------------------------------------------------------
    // Free list
    // ---------------------------------------------------------------------

    /// Pop the head of `task`'s free list
    pub(crate) fn alloc_slot(&mut self, task: TaskId) -> Result<SlotRef> {
        let head = self.task(task)?.free_head.ok_or(Error::Exhausted)?;
        self.claim_slot(task, head);
        Ok(head)
    }

    /// Take a specific free slot off the list
    pub(crate) fn claim_slot(&mut self, task: TaskId, at: SlotRef) {
        let slot = self.slot(at);
        assert!(slot.free, "claiming {:?} which is not free", at);
        let (prev, next) = (slot.free_prev, slot.free_next);
        match prev {
            Some(prev) => self.slot_mut(prev).free_next = next,
            None => self.task_entry(task).free_head = next,
        }
        if let Some(next) = next {
            self.slot_mut(next).free_prev = prev;
        }
        let slot = self.slot_mut(at);
        slot.free = false;
        slot.free_prev = None;
        slot.free_next = None;
        self.task_entry(task).free_count -= 1;
    }

    /// Push an empty slot onto the head of `task`'s free list
    pub(crate) fn release_slot(&mut self, task: TaskId, at: SlotRef) {
        let head = self.task_entry(task).free_head;
        let slot = self.slot_mut(at);
        assert!(!slot.free, "{:?} released twice", at);
        debug_assert!(slot.cap.is_null() && !slot.is_linked());
        slot.free = true;
        slot.free_prev = None;
        slot.free_next = head;
        if let Some(head) = head {
            self.slot_mut(head).free_prev = Some(at);
        }
        let t = self.task_entry(task);
        t.free_head = Some(at);
        t.free_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::objects::{Capability, TaskState};
    use crate::testing::Fixture;

    #[test]
    fn lookup_on_unused_task_is_not_found() {
        let f = Fixture::new().unwrap();
        let unused = TaskId::new(10, 0);
        assert_eq!(f.kernel.task_state(unused), Ok(TaskState::Unused));
        for index in [0, 1, 5, 63, 64, 4096, usize::MAX] {
            assert_eq!(f.kernel.lookup(unused, index), Err(Error::NotFound));
        }
    }

    #[test]
    fn lookup_checks_generation_and_range() {
        let f = Fixture::new().unwrap();
        let stale = TaskId::new(f.root.index(), f.root.generation() + 1);
        assert_eq!(f.kernel.lookup(stale, 1), Err(Error::NotFound));
        assert_eq!(f.kernel.lookup(f.root, SLOTS_PER_CAP_SPACE), Err(Error::NotFound));
        assert!(f.kernel.lookup(f.root, SLOTS_PER_CAP_SPACE - 1).is_ok());
    }

    #[test]
    fn slot_zero_is_never_handed_out() {
        let f = Fixture::new().unwrap();
        assert_eq!(f.kernel.capability(f.root, 0), Ok(&Capability::Null));
        assert_eq!(f.kernel.free_index(f.root), Ok(6));
        assert_eq!(f.kernel.task(f.root).unwrap().free_slots(), SLOTS_PER_CAP_SPACE - 6);
    }

    #[test]
    fn inserted_space_extends_numbering_and_window() {
        let mut f = Fixture::new().unwrap();
        let root = f.root;
        let cs = f.free().unwrap();
        f.kernel.create_cap_space_object(root, cs, f.boot.memory).unwrap();
        let phys = f.kernel.capability(root, cs).unwrap().as_cap_space().unwrap().phys();

        f.kernel.insert_cap_space(root, cs).unwrap();
        assert_eq!(f.kernel.task(root).unwrap().used_spaces(), 2);
        let at = f.kernel.lookup(root, SLOTS_PER_CAP_SPACE).unwrap();
        assert_eq!(f.kernel.slot_index(at), Ok(SLOTS_PER_CAP_SPACE));

        let table = f.kernel.task(root).unwrap().root_table().unwrap();
        let pte = f.kernel.mmu().walk(table, f.kernel.space_vaddr(1), 0).unwrap();
        assert_eq!(pte.phys, phys);

        assert_eq!(f.kernel.insert_cap_space(root, cs), Err(Error::IllegalState));
    }

    #[test]
    fn window_grows_by_extension() {
        let config = KernelConfig { spaces_per_window: 2, max_extensions: 1, ..KernelConfig::default() };
        let mut f = Fixture::with_config(config).unwrap();
        let (root, memory) = (f.root, f.boot.memory);
        let mut spaces = [0; 3];
        for cs in spaces.iter_mut() {
            *cs = f.free().unwrap();
            f.kernel.create_cap_space_object(root, *cs, memory).unwrap();
        }
        f.kernel.insert_cap_space(root, spaces[0]).unwrap();
        assert_eq!(f.kernel.insert_cap_space(root, spaces[1]), Err(Error::Exhausted));

        let wrong = f.free().unwrap();
        f.kernel.create_page_table_object(root, wrong, memory, 1).unwrap();
        assert_eq!(f.kernel.extend_cap_space(root, wrong), Err(Error::IllegalArgument));

        let segment = f.free().unwrap();
        f.kernel.create_page_table_object(root, segment, memory, 0).unwrap();
        f.kernel.extend_cap_space(root, segment).unwrap();
        assert_eq!(f.kernel.task(root).unwrap().extensions(), 1);
        let pt = *f.kernel.capability(root, segment).unwrap().as_page_table().unwrap();
        assert!(pt.is_mapped());
        assert_eq!(pt.vbase(), f.kernel.segment_vaddr(1));

        f.kernel.insert_cap_space(root, spaces[1]).unwrap();
        assert!(f.kernel.lookup(root, 2 * SLOTS_PER_CAP_SPACE).is_ok());
        assert_eq!(f.kernel.extend_cap_space(root, segment), Err(Error::Exhausted));
    }

    #[test]
    fn free_list_hands_out_lowest_first_then_reuses() {
        let mut f = Fixture::new().unwrap();
        let first = f.endpoint().unwrap();
        let second = f.endpoint().unwrap();
        assert_eq!(second, first + 1);
        f.kernel.destroy(f.root, first).unwrap();
        assert_eq!(f.kernel.free_index(f.root), Ok(first));
    }
}
