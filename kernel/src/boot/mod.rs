//! Kernel bootstrap
//!
//! Builds the root task out of pages handed over by the platform and gives
//! it the initial capabilities everything else is derived from. The root
//! task is created through the same task-init routine as
//! [`create_task_object`](Kernel::create_task_object), so it sees the same
//! window layout and global mappings as any later task.
//!
//! # Initial capability layout
//!
//! | index | capability                                     |
//! |-------|------------------------------------------------|
//! | 0     | `Null` sentinel                                |
//! | 1     | Memory covering the boot region                |
//! | 2     | Task naming the root task, all rights          |
//! | 3     | CapSpace of the root task's space 0            |
//! | 4     | PageTable, the root task's top-level table     |
//! | 5     | PageTable, first capability window segment     |

use crate::config::MAX_MAP_LEVEL;
use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::memory::{Mmu, PageAllocator, PhysAddr, VirtAddr};
use crate::objects::{
    CapIndex, CapSpace, CapSpaceCap, CapSpaceId, Capability, MemoryCap, MemoryFlags, PageTable,
    PageTableCap, PageTableId, SlotRef, TaskCap, TaskId, TaskRights, TaskState,
};

pub const ROOT_MEMORY_SLOT: CapIndex = 1;
pub const ROOT_TASK_SLOT: CapIndex = 2;
pub const ROOT_CAP_SPACE_SLOT: CapIndex = 3;
pub const ROOT_PAGE_TABLE_SLOT: CapIndex = 4;
pub const ROOT_WINDOW_TABLE_SLOT: CapIndex = 5;

/// Physical memory handed to the root task as one Memory capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base: PhysAddr,
    /// log2 of the region size in bytes
    pub size_class: u8,
}

impl MemoryRegion {
    pub const fn new(base: PhysAddr, size_class: u8) -> Self {
        Self { base, size_class }
    }
}

/// What the root task starts with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootInfo {
    pub root_task: TaskId,
    pub memory: CapIndex,
    pub task: CapIndex,
    pub cap_space: CapIndex,
    pub root_table: CapIndex,
    pub window_table: CapIndex,
    /// First index not taken by an initial capability
    pub first_free: CapIndex,
}

/// Pages the root task is built from
struct BootPages {
    task: PhysAddr,
    space: PhysAddr,
    root: PhysAddr,
    window: PhysAddr,
}

impl BootPages {
    fn allocate(frames: &mut impl PageAllocator) -> Result<Self> {
        let mut taken = [PhysAddr::new(0); 4];
        for i in 0..taken.len() {
            match frames.allocate_page() {
                Some(page) => taken[i] = page,
                None => {
                    for &page in &taken[..i] {
                        frames.free_page(page);
                    }
                    log::error!("bootstrap: out of pages for the root task");
                    return Err(Error::Exhausted);
                }
            }
        }
        let [task, space, root, window] = taken;
        Ok(Self { task, space, root, window })
    }

    fn free(self, frames: &mut impl PageAllocator) {
        for page in [self.task, self.space, self.root, self.window] {
            frames.free_page(page);
        }
    }
}

impl<M: Mmu> Kernel<M> {
    /// Create the root task and its initial capabilities
    ///
    /// Only valid on a kernel with no tasks. The root task is left `Ready`
    /// on CPU 0's queue. On failure every page taken from `frames` is
    /// returned.
    pub fn bootstrap(
        &mut self,
        frames: &mut impl PageAllocator,
        region: MemoryRegion,
        flags: MemoryFlags,
    ) -> Result<BootInfo> {
        if self.tasks.iter().any(|t| t.state != TaskState::Unused) {
            return Err(Error::IllegalState);
        }
        if region.size_class >= 64 || region.base.checked_add(1u64 << region.size_class).is_none() {
            return Err(Error::IllegalArgument);
        }
        let entry = self.tasks.first().map(|t| t.id.index() as usize).ok_or(Error::Exhausted)?;

        let pages = BootPages::allocate(frames)?;
        let space = CapSpaceId::new(self.cap_spaces.len() as u32);
        let root = PageTableId::new(self.page_tables.len() as u32);
        let window = PageTableId::new(root.index() as u32 + 1);
        self.cap_spaces.push(CapSpace::new(pages.space));
        self.page_tables.push(PageTable::new(pages.root, MAX_MAP_LEVEL));
        self.page_tables.push(PageTable::new(pages.window, 0));

        let id = self.tasks[entry].claim(pages.task);
        if let Err(err) = self.init_task(id, (root, pages.root), pages.window, space) {
            self.tasks[entry].abandon();
            self.cap_spaces.truncate(space.index());
            self.page_tables.truncate(root.index());
            pages.free(frames);
            log::error!("bootstrap: root task init failed: {}", err);
            return Err(err);
        }

        let mut root_table = PageTableCap::new(root, pages.root, MAX_MAP_LEVEL);
        root_table.set_mapped(VirtAddr::new(0));
        let mut window_table = PageTableCap::new(window, pages.window, 0);
        window_table.set_mapped(self.segment_vaddr(0));

        let initial = [
            (ROOT_MEMORY_SLOT, Capability::Memory(MemoryCap::new(region.base, region.size_class, flags))),
            (ROOT_TASK_SLOT, Capability::Task(TaskCap::new(id, TaskRights::all()))),
            (ROOT_CAP_SPACE_SLOT, Capability::CapSpace(CapSpaceCap::new(space, pages.space))),
            (ROOT_PAGE_TABLE_SLOT, Capability::PageTable(root_table)),
            (ROOT_WINDOW_TABLE_SLOT, Capability::PageTable(window_table)),
        ];
        for (index, cap) in initial {
            let at = SlotRef::new(space, index as u32);
            self.claim_slot(id, at);
            self.slot_mut(at).cap = cap;
        }

        self.task_entry(id).state = TaskState::Suspended;
        self.resume(id)?;
        log::info!(
            "bootstrap: root task {} with {:#x} bytes at {:?}",
            id,
            1u64 << region.size_class,
            region.base
        );
        Ok(BootInfo {
            root_task: id,
            memory: ROOT_MEMORY_SLOT,
            task: ROOT_TASK_SLOT,
            cap_space: ROOT_CAP_SPACE_SLOT,
            root_table: ROOT_PAGE_TABLE_SLOT,
            window_table: ROOT_WINDOW_TABLE_SLOT,
            first_free: ROOT_WINDOW_TABLE_SLOT + 1,
        })
    }
}
