//! Hosted test fixture
//!
//! A [`Kernel`] over [`SoftMmu`] with a bootstrapped root task already
//! running on CPU 0, plus shortcuts for the object setups most scenarios
//! need. Built for unit tests and, with the `testing` feature, for benches
//! and downstream crates.

use crate::boot::{BootInfo, MemoryRegion};
use crate::config::{KernelConfig, MAX_MAP_LEVEL};
use crate::error::Result;
use crate::kernel::Kernel;
use crate::memory::{FrameAllocator, PhysAddr, SoftMmu};
use crate::objects::{CapIndex, MemoryFlags, TaskId};
use crate::retype::TaskArgs;
use crate::scheduler::CpuId;

/// Frames backing SoftMmu's intermediate tables
pub const TABLE_POOL_BASE: u64 = 0x4000_0000;
/// Frames the root task is built from
pub const BOOT_POOL_BASE: u64 = 0x8000_0000;
/// Base of the root Memory capability
pub const ROOT_MEMORY_BASE: u64 = 0x1_0000_0000;
/// 16 MiB of root memory
pub const ROOT_MEMORY_CLASS: u8 = 24;

pub const CPU0: CpuId = CpuId(0);

pub struct Fixture {
    pub kernel: Kernel<SoftMmu>,
    pub boot: BootInfo,
    pub root: TaskId,
}

impl Fixture {
    /// Default configuration, root task running on CPU 0
    pub fn new() -> Result<Self> {
        Self::with_config(KernelConfig::default())
    }

    pub fn with_config(config: KernelConfig) -> Result<Self> {
        let mmu = SoftMmu::new(FrameAllocator::new(PhysAddr::new(TABLE_POOL_BASE), 4096));
        let mut kernel = Kernel::new(config, mmu)?;
        let mut frames = FrameAllocator::new(PhysAddr::new(BOOT_POOL_BASE), 16);
        let region = MemoryRegion::new(PhysAddr::new(ROOT_MEMORY_BASE), ROOT_MEMORY_CLASS);
        let boot = kernel.bootstrap(&mut frames, region, MemoryFlags::RWX)?;
        kernel.switch_to(CPU0, boot.root_task)?;
        Ok(Self { kernel, boot, root: boot.root_task })
    }

    /// Next free index of the root task
    pub fn free(&self) -> Result<CapIndex> {
        self.kernel.free_index(self.root)
    }

    /// Create an endpoint in the root task, both rights
    pub fn endpoint(&mut self) -> Result<CapIndex> {
        let dest = self.free()?;
        self.kernel.create_endpoint_object(self.root, dest, self.boot.memory)
    }

    /// Create a suspended task from root memory
    ///
    /// Returns the task and the index of its Task capability in the root.
    pub fn spawn(&mut self) -> Result<(TaskId, CapIndex)> {
        let (root, memory) = (self.root, self.boot.memory);
        let space = self.free()?;
        self.kernel.create_cap_space_object(root, space, memory)?;
        let table = self.free()?;
        self.kernel.create_page_table_object(root, table, memory, MAX_MAP_LEVEL)?;
        let window = self.free()?;
        self.kernel.create_page_table_object(root, window, memory, 0)?;
        let dest = self.free()?;
        let args = TaskArgs { cap_space: space, root_table: table, window_table: window };
        let index = self.kernel.create_task_object(root, dest, memory, args)?;
        let task = self.kernel.capability(root, index)?.as_task()?.task();
        Ok((task, index))
    }

    /// Hand `to` a full-rights copy of the root's capability at `index`
    pub fn share(&mut self, to: TaskId, index: CapIndex) -> Result<CapIndex> {
        let copy = self.kernel.copy(self.root, index)?;
        self.kernel.transfer(to, self.root, copy)
    }

    /// Make `task` the running task of CPU 0
    pub fn run(&mut self, task: TaskId) -> Result<()> {
        if self.kernel.current(CPU0) == Some(task) {
            return Ok(());
        }
        if self.kernel.task_state(task)? == crate::objects::TaskState::Suspended {
            self.kernel.resume(task)?;
        }
        self.kernel.switch_to(CPU0, task)?;
        Ok(())
    }
}
