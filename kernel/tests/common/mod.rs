//! Shared setup for the scenario tests: a kernel over the software MMU with
//! a bootstrapped root task running on CPU 0.

#![allow(dead_code)]

use keel_kernel::config::MAX_MAP_LEVEL;
use keel_kernel::memory::{FrameAllocator, PhysAddr, SoftMmu};
use keel_kernel::objects::{CapIndex, MemoryFlags, TaskId};
use keel_kernel::{BootInfo, CpuId, Kernel, KernelConfig, MemoryRegion, TaskArgs};

pub const CPU: CpuId = CpuId(0);

pub struct System {
    pub kernel: Kernel<SoftMmu>,
    pub boot: BootInfo,
}

impl System {
    pub fn boot() -> Self {
        Self::boot_with(KernelConfig::default())
    }

    pub fn boot_with(config: KernelConfig) -> Self {
        let tables = FrameAllocator::new(PhysAddr::new(0x4000_0000), 1024);
        let mut kernel = Kernel::new(config, SoftMmu::new(tables)).expect("valid config");
        let mut frames = FrameAllocator::new(PhysAddr::new(0x8000_0000), 8);
        let region = MemoryRegion::new(PhysAddr::new(0x2_0000_0000), 22);
        let boot = kernel.bootstrap(&mut frames, region, MemoryFlags::RWX).expect("bootstrap");
        kernel.switch_to(CPU, boot.root_task).expect("root task runs");
        Self { kernel, boot }
    }

    pub fn root(&self) -> TaskId {
        self.boot.root_task
    }

    pub fn free(&self) -> CapIndex {
        self.kernel.free_index(self.root()).expect("root has free slots")
    }

    pub fn endpoint(&mut self) -> CapIndex {
        let dest = self.free();
        self.kernel
            .create_endpoint_object(self.root(), dest, self.boot.memory)
            .expect("endpoint")
    }

    /// New suspended task; returns it and its Task capability in the root
    pub fn spawn(&mut self) -> (TaskId, CapIndex) {
        let (root, memory) = (self.root(), self.boot.memory);
        let cap_space = self.free();
        self.kernel.create_cap_space_object(root, cap_space, memory).expect("cap space");
        let root_table = self.free();
        self.kernel
            .create_page_table_object(root, root_table, memory, MAX_MAP_LEVEL)
            .expect("root table");
        let window_table = self.free();
        self.kernel
            .create_page_table_object(root, window_table, memory, 0)
            .expect("window table");
        let dest = self.free();
        let index = self
            .kernel
            .create_task_object(root, dest, memory, TaskArgs { cap_space, root_table, window_table })
            .expect("task");
        let task = self.kernel.capability(root, index).unwrap().as_task().unwrap().task();
        (task, index)
    }

    /// Copy the root's capability at `index` into `to`
    pub fn share(&mut self, to: TaskId, index: CapIndex) -> CapIndex {
        let copy = self.kernel.copy(self.root(), index).expect("copy");
        self.kernel.transfer(to, self.root(), copy).expect("transfer")
    }
}
