//! Object creation (retyping)
//!
//! Every `create_*_object` operation carves a sub-range out of a Memory
//! capability and places the new capability in an empty destination slot:
//!
//! ```text
//! before:  src Memory(used = u)            dest Null (free)
//! after:   src Memory(used = end - base) -> dest X   (depth(src) + 1)
//! ```
//!
//! The destination is linked directly after the source, making it the
//! source's newest child. All checks run before anything changes, so a
//! failed creation leaves the destination `Null` and the source watermark
//! untouched.

use crate::config::{ENDPOINT_OBJECT_SIZE, ID_OBJECT_SIZE, MAX_MAP_LEVEL, PAGE_SIZE};
use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::lock::LockOwner;
use crate::memory::{MapFlags, Mmu, PhysAddr, VirtAddr};
use crate::objects::capability::{page_size_at, Carve};
use crate::objects::{
    CapIndex, CapSpace, CapSpaceCap, CapSpaceId, Capability, Endpoint, EndpointCap, EndpointId,
    EndpointRights, IdCap, MemoryCap, MemoryFlags, PageTable, PageTableCap, PageTableId, SlotRef,
    TaskCap, TaskId, TaskRights, TaskState,
};

const PAGE: u64 = PAGE_SIZE as u64;
const KERNEL_RW: MemoryFlags = MemoryFlags::READ.union(MemoryFlags::WRITE);

/// Existing capabilities a new task is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskArgs {
    /// CapSpace capability, not yet inserted anywhere
    pub cap_space: CapIndex,
    /// Unmapped PageTable capability at the root level
    pub root_table: CapIndex,
    /// Unmapped level-0 PageTable capability for the first window segment
    pub window_table: CapIndex,
}

/// A validated creation waiting to be committed
struct Plan {
    dest: SlotRef,
    src: SlotRef,
    carve: Carve,
}

impl<M: Mmu> Kernel<M> {
    /// Validate a carve of `size`/`align` from the Memory capability at `src`
    /// into the empty slot at `dest`
    fn plan_creation(
        &self,
        task: TaskId,
        dest: CapIndex,
        src: CapIndex,
        size: u64,
        align: u64,
        flags: MemoryFlags,
        kernel_object: bool,
    ) -> Result<Plan> {
        let src = self.lookup(task, src)?;
        let dest = self.lookup(task, dest)?;
        let source = self.slot(src);
        let memory = source.cap.as_memory()?;
        let carve = memory.plan_carve(size, align, flags)?;
        if kernel_object && memory.is_device() {
            return Err(Error::PermissionDenied);
        }
        if source.depth == u16::MAX {
            return Err(Error::Exhausted);
        }
        let target = self.slot(dest);
        if !target.cap.is_null() || !target.free {
            return Err(Error::IllegalState);
        }
        Ok(Plan { dest, src, carve })
    }

    /// Apply a plan: fill the destination, link it, advance the watermark
    fn commit_creation(&mut self, task: TaskId, plan: &Plan, cap: Capability) -> Result<CapIndex> {
        self.claim_slot(task, plan.dest);
        self.slot_mut(plan.src).cap.as_memory_mut()?.commit_carve(&plan.carve);
        self.slot_mut(plan.dest).cap = cap;
        let depth = self.slot(plan.src).depth + 1;
        self.link_after(plan.src, plan.dest, depth);
        log::debug!(
            "task {}: created {:?} at {:?} ({} bytes)",
            task,
            cap.cap_type(),
            plan.carve.start,
            plan.carve.size
        );
        self.slot_index(plan.dest)
    }

    /// Carve a smaller Memory capability
    pub fn create_memory_object(
        &mut self,
        task: TaskId,
        dest: CapIndex,
        src: CapIndex,
        size: u64,
        align: u64,
        flags: MemoryFlags,
    ) -> Result<CapIndex> {
        self.with_tasks_locked(LockOwner::task(task), task, task, |k| {
            let plan = k.plan_creation(task, dest, src, size, align, flags, false)?;
            let child = MemoryCap::new(plan.carve.start, size.trailing_zeros() as u8, plan.carve.flags);
            k.commit_creation(task, &plan, Capability::Memory(child))
        })
    }

    /// Create a task from one page of memory plus an existing cap space and
    /// page tables
    ///
    /// The new task starts `Suspended` with its cap space inserted as space 0,
    /// its first window segment installed and every global mapping copied.
    pub fn create_task_object(
        &mut self,
        task: TaskId,
        dest: CapIndex,
        src: CapIndex,
        args: TaskArgs,
    ) -> Result<CapIndex> {
        self.with_tasks_locked(LockOwner::task(task), task, task, |k| {
            let plan = k.plan_creation(task, dest, src, PAGE, PAGE, KERNEL_RW, true)?;

            let space = *k.capability(task, args.cap_space)?.as_cap_space()?;
            if k.cap_space(space.space())?.owner().is_some() {
                return Err(Error::IllegalState);
            }
            let root_at = k.lookup(task, args.root_table)?;
            let window_at = k.lookup(task, args.window_table)?;
            let root = k.unmapped_table(root_at, MAX_MAP_LEVEL)?;
            let window = k.unmapped_table(window_at, 0)?;

            let entry = k
                .tasks
                .iter()
                .position(|t| t.state == TaskState::Unused)
                .ok_or(Error::Exhausted)?;
            let id = k.tasks[entry].claim(plan.carve.start);
            if let Err(err) = k.init_task(id, (root.table(), root.phys()), window.phys(), space.space()) {
                k.tasks[entry].abandon();
                return Err(err);
            }

            k.slot_mut(root_at).cap.as_page_table_mut()?.set_mapped(VirtAddr::new(0));
            let window_base = k.segment_vaddr(0);
            k.slot_mut(window_at).cap.as_page_table_mut()?.set_mapped(window_base);
            let index = k.commit_creation(task, &plan, Capability::Task(TaskCap::new(id, TaskRights::all())))?;
            k.task_entry(id).state = TaskState::Suspended;
            Ok(index)
        })
    }

    /// PageTable capability at `at` with the given level, not yet mapped
    fn unmapped_table(&self, at: SlotRef, level: u8) -> Result<PageTableCap> {
        let pt = *self.slot(at).cap.as_page_table()?;
        if pt.level() != level {
            return Err(Error::IllegalArgument);
        }
        if pt.is_mapped() {
            return Err(Error::IllegalState);
        }
        Ok(pt)
    }

    /// Task-init routine shared by object creation and bootstrap
    ///
    /// Installs the first window segment, copies global mappings and inserts
    /// `space`. On failure every mapping made here is removed again.
    pub(crate) fn init_task(
        &mut self,
        id: TaskId,
        root: (PageTableId, PhysAddr),
        window: PhysAddr,
        space: CapSpaceId,
    ) -> Result<()> {
        self.task_entry(id).root_table = Some(root);
        let root_phys = root.1;
        let mut installed = alloc::vec::Vec::with_capacity(1 + self.global_mappings.len());

        let window_base = self.segment_vaddr(0);
        let mut result = if self.mmu.map(root_phys, window_base, window, MapFlags::TABLE, 1, true) {
            installed.push((window_base, 1));
            Ok(())
        } else {
            Err(Error::IllegalState)
        };

        for i in 0..self.global_mappings.len() {
            if result.is_err() {
                break;
            }
            let gm = self.global_mappings[i];
            if self.mmu.map(root_phys, gm.vaddr, gm.paddr, gm.flags, gm.level, true) {
                installed.push((gm.vaddr, gm.level));
            } else {
                log::warn!("task {}: global mapping at {:?} conflicts", id, gm.vaddr);
                result = Err(Error::IllegalState);
            }
        }

        if result.is_ok() {
            result = self.insert_space(id, space);
        }

        if result.is_err() {
            for (vaddr, level) in installed.into_iter().rev() {
                self.mmu.unmap(root_phys, vaddr, level);
            }
            self.task_entry(id).root_table = None;
        }
        result
    }

    /// Create a page-table object at `level`
    pub fn create_page_table_object(
        &mut self,
        task: TaskId,
        dest: CapIndex,
        src: CapIndex,
        level: u8,
    ) -> Result<CapIndex> {
        if level > MAX_MAP_LEVEL {
            return Err(Error::IllegalArgument);
        }
        self.with_tasks_locked(LockOwner::task(task), task, task, |k| {
            let plan = k.plan_creation(task, dest, src, PAGE, PAGE, KERNEL_RW, true)?;
            let id = PageTableId::new(k.page_tables.len() as u32);
            k.page_tables.push(PageTable::new(plan.carve.start, level));
            k.commit_creation(task, &plan, Capability::PageTable(PageTableCap::new(id, plan.carve.start, level)))
        })
    }

    /// Create a page of `4096 << (9 * level)` bytes with access `flags`
    pub fn create_virt_page_object(
        &mut self,
        task: TaskId,
        dest: CapIndex,
        src: CapIndex,
        level: u8,
        flags: MemoryFlags,
    ) -> Result<CapIndex> {
        if level > MAX_MAP_LEVEL {
            return Err(Error::IllegalArgument);
        }
        let size = page_size_at(level);
        self.with_tasks_locked(LockOwner::task(task), task, task, |k| {
            let plan = k.plan_creation(task, dest, src, size, size, flags, false)?;
            let page = crate::objects::VirtPageCap::new(plan.carve.start, level, plan.carve.flags);
            k.commit_creation(task, &plan, Capability::VirtPage(page))
        })
    }

    /// Create an uninserted cap space
    pub fn create_cap_space_object(&mut self, task: TaskId, dest: CapIndex, src: CapIndex) -> Result<CapIndex> {
        self.with_tasks_locked(LockOwner::task(task), task, task, |k| {
            let plan = k.plan_creation(task, dest, src, PAGE, PAGE, KERNEL_RW, true)?;
            let id = CapSpaceId::new(k.cap_spaces.len() as u32);
            k.cap_spaces.push(CapSpace::new(plan.carve.start));
            k.commit_creation(task, &plan, Capability::CapSpace(CapSpaceCap::new(id, plan.carve.start)))
        })
    }

    /// Create an endpoint; the capability carries both SEND and RECEIVE
    pub fn create_endpoint_object(&mut self, task: TaskId, dest: CapIndex, src: CapIndex) -> Result<CapIndex> {
        self.with_tasks_locked(LockOwner::task(task), task, task, |k| {
            let plan =
                k.plan_creation(task, dest, src, ENDPOINT_OBJECT_SIZE, ENDPOINT_OBJECT_SIZE, KERNEL_RW, true)?;
            let id = EndpointId::new(k.endpoints.len() as u32);
            k.endpoints.push(Endpoint::new(plan.carve.start));
            k.commit_creation(task, &plan, Capability::Endpoint(EndpointCap::new(id, EndpointRights::all())))
        })
    }

    /// Mint a fresh Id token
    pub fn create_id_object(&mut self, task: TaskId, dest: CapIndex, src: CapIndex) -> Result<CapIndex> {
        self.with_tasks_locked(LockOwner::task(task), task, task, |k| {
            let plan =
                k.plan_creation(task, dest, src, ID_OBJECT_SIZE, ID_OBJECT_SIZE, MemoryFlags::empty(), false)?;
            let token = k.next_token;
            k.next_token += 1;
            k.commit_creation(task, &plan, Capability::Id(IdCap::new(token, plan.carve.start.as_u64())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::GlobalMapping;
    use crate::testing::Fixture;

    /// Fresh cap space and tables from root memory
    fn task_args(f: &mut Fixture) -> TaskArgs {
        let (root, memory) = (f.root, f.boot.memory);
        let cap_space = f.free().unwrap();
        f.kernel.create_cap_space_object(root, cap_space, memory).unwrap();
        let root_table = f.free().unwrap();
        f.kernel.create_page_table_object(root, root_table, memory, MAX_MAP_LEVEL).unwrap();
        let window_table = f.free().unwrap();
        f.kernel.create_page_table_object(root, window_table, memory, 0).unwrap();
        TaskArgs { cap_space, root_table, window_table }
    }

    #[test]
    fn one_page_of_memory_funds_exactly_one_task() {
        let mut f = Fixture::new().unwrap();
        let root = f.root;
        let page = f.free().unwrap();
        f.kernel.create_memory_object(root, page, f.boot.memory, 4096, 4096, MemoryFlags::RWX).unwrap();
        assert_eq!(f.kernel.capability(root, page).unwrap().as_memory().unwrap().size_class(), 12);

        let args = task_args(&mut f);
        let dest = f.free().unwrap();
        let task = f.kernel.create_task_object(root, dest, page, args).unwrap();
        assert_eq!(f.kernel.capability(root, page).unwrap().as_memory().unwrap().remaining(), 0);
        let id = f.kernel.capability(root, task).unwrap().as_task().unwrap().task();
        assert_eq!(f.kernel.task_state(id), Ok(TaskState::Suspended));

        let args = task_args(&mut f);
        let dest = f.free().unwrap();
        assert_eq!(f.kernel.create_task_object(root, dest, page, args), Err(Error::Exhausted));
        assert!(f.kernel.capability(root, dest).unwrap().is_null());
        assert!(f.kernel.slot(f.kernel.lookup(root, dest).unwrap()).is_free());
    }

    #[test]
    fn failed_creation_changes_nothing() {
        let mut f = Fixture::new().unwrap();
        let root = f.root;
        let used = f.kernel.capability(root, f.boot.memory).unwrap().as_memory().unwrap().used();
        let dest = f.free().unwrap();

        let bad_size = f.kernel.create_memory_object(root, dest, f.boot.memory, 3, 1, MemoryFlags::READ);
        assert_eq!(bad_size, Err(Error::IllegalArgument));
        let too_big = f.kernel.create_memory_object(root, dest, f.boot.memory, 1 << 30, 4096, MemoryFlags::READ);
        assert_eq!(too_big, Err(Error::Exhausted));
        assert_eq!(f.kernel.create_id_object(root, f.boot.task, f.boot.memory), Err(Error::IllegalState));
        assert_eq!(f.kernel.create_id_object(root, dest, f.boot.task), Err(Error::TypeMismatch));

        assert_eq!(f.kernel.capability(root, f.boot.memory).unwrap().as_memory().unwrap().used(), used);
        assert!(f.kernel.capability(root, dest).unwrap().is_null());
    }

    #[test]
    fn carved_memory_cannot_widen_access() {
        let mut f = Fixture::new().unwrap();
        let root = f.root;
        let ro = f.free().unwrap();
        f.kernel.create_memory_object(root, ro, f.boot.memory, 1 << 13, 4096, MemoryFlags::READ).unwrap();
        let dest = f.free().unwrap();
        assert_eq!(
            f.kernel.create_memory_object(root, dest, ro, 4096, 4096, MemoryFlags::WRITE),
            Err(Error::PermissionDenied)
        );
        // Kernel objects need read/write backing
        assert_eq!(f.kernel.create_endpoint_object(root, dest, ro), Err(Error::PermissionDenied));
    }

    #[test]
    fn task_needs_fresh_tables() {
        let mut f = Fixture::new().unwrap();
        let root = f.root;
        let mut args = task_args(&mut f);
        args.root_table = f.boot.root_table;
        let dest = f.free().unwrap();
        assert_eq!(f.kernel.create_task_object(root, dest, f.boot.memory, args), Err(Error::IllegalState));

        let mut args = task_args(&mut f);
        args.window_table = args.root_table;
        let dest = f.free().unwrap();
        assert_eq!(f.kernel.create_task_object(root, dest, f.boot.memory, args), Err(Error::IllegalArgument));

        let mut args = task_args(&mut f);
        args.cap_space = f.boot.cap_space;
        let dest = f.free().unwrap();
        assert_eq!(f.kernel.create_task_object(root, dest, f.boot.memory, args), Err(Error::IllegalState));
    }

    #[test]
    fn new_task_receives_global_mappings() {
        let mut f = Fixture::new().unwrap();
        let mapping = GlobalMapping {
            vaddr: VirtAddr::new(0x10_0000_0000),
            paddr: PhysAddr::new(0x9000_0000),
            flags: MapFlags::READ | MapFlags::WRITE,
            level: 0,
        };
        f.kernel.add_global_mapping(mapping);
        let (child, _) = f.spawn().unwrap();
        let table = f.kernel.task(child).unwrap().root_table().unwrap();
        let pte = f.kernel.mmu().walk(table, mapping.vaddr, 0).unwrap();
        assert_eq!(pte.phys, mapping.paddr);
        assert_eq!(f.kernel.task(child).unwrap().used_spaces(), 1);
        assert_eq!(f.kernel.free_index(child), Ok(1));
    }

    #[test]
    fn conflicting_global_mapping_rolls_back_task_tables() {
        let mut f = Fixture::new().unwrap();
        let root = f.root;
        let mapping = GlobalMapping {
            vaddr: VirtAddr::new(0x10_0000_0000),
            paddr: PhysAddr::new(0x9000_0000),
            flags: MapFlags::READ,
            level: 0,
        };
        f.kernel.add_global_mapping(mapping);
        f.kernel.add_global_mapping(GlobalMapping { paddr: PhysAddr::new(0x9100_0000), ..mapping });

        let args = task_args(&mut f);
        let table = f.kernel.capability(root, args.root_table).unwrap().as_page_table().unwrap().phys();
        let dest = f.free().unwrap();
        assert_eq!(f.kernel.create_task_object(root, dest, f.boot.memory, args), Err(Error::IllegalState));

        // Both the window segment and the first global mapping are gone.
        let mmu = f.kernel.mmu();
        assert_eq!(mmu.walk(table, f.kernel.space_vaddr(0), 1), None);
        assert_eq!(mmu.walk(table, mapping.vaddr, 0), None);
        assert!(f.kernel.capability(root, dest).unwrap().is_null());
    }

    #[test]
    fn virt_page_size_follows_level() {
        let mut f = Fixture::new().unwrap();
        let root = f.root;
        let dest = f.free().unwrap();
        f.kernel.create_virt_page_object(root, dest, f.boot.memory, 1, MemoryFlags::READ).unwrap();
        let Capability::VirtPage(page) = *f.kernel.capability(root, dest).unwrap() else {
            panic!("expected a page");
        };
        assert_eq!(page.size(), 2 << 20);
        assert!(page.phys().is_aligned(2 << 20));
        let dest = f.free().unwrap();
        assert_eq!(
            f.kernel.create_virt_page_object(root, dest, f.boot.memory, MAX_MAP_LEVEL + 1, MemoryFlags::READ),
            Err(Error::IllegalArgument)
        );
    }

    #[test]
    fn ids_are_unique_tokens() {
        let mut f = Fixture::new().unwrap();
        let root = f.root;
        let a = f.free().unwrap();
        f.kernel.create_id_object(root, a, f.boot.memory).unwrap();
        let b = f.free().unwrap();
        f.kernel.create_id_object(root, b, f.boot.memory).unwrap();
        let cap_a = *f.kernel.capability(root, a).unwrap();
        let cap_b = *f.kernel.capability(root, b).unwrap();
        assert!(cap_a.same_id(&cap_a));
        assert!(!cap_a.same_id(&cap_b));
    }

    #[test]
    fn endpoint_capability_has_both_rights() {
        let mut f = Fixture::new().unwrap();
        let ep = f.endpoint().unwrap();
        let cap = *f.kernel.capability(f.root, ep).unwrap().as_endpoint().unwrap();
        assert_eq!(cap.rights(), EndpointRights::all());
        assert!(f.kernel.endpoint(cap.endpoint()).unwrap().is_live());
    }
}
