//! The kernel object store
//!
//! [`Kernel`] owns every kernel object in arenas and the per-CPU scheduling
//! contexts. Operations are grouped by concern into `impl` blocks in
//! [`cspace`](crate::cspace), [`retype`](crate::retype),
//! [`transfer`](crate::transfer), [`scheduler`](crate::scheduler),
//! [`task_ops`](crate::task_ops), [`ipc`](crate::ipc),
//! [`syscall`](crate::syscall) and [`boot`](crate::boot).
//!
//! ## Locking
//!
//! Operations take `&mut self`, so the borrow checker already serialises them
//! on one core. The reentrant task and endpoint locks still bracket every
//! critical section so that the discipline carries over unchanged to a port
//! where CPUs enter concurrently. Two tasks are always locked in ascending
//! arena index order, and liveness is checked only once both are held.

use alloc::vec::Vec;

use crate::config::KernelConfig;
use crate::error::{Error, Result};
use crate::lock::LockOwner;
use crate::memory::{MapFlags, Mmu, PhysAddr, VirtAddr};
use crate::objects::{
    CapIndex, CapSpace, CapSpaceId, Capability, Endpoint, EndpointId, PageTable, PageTableId, Slot,
    SlotRef, Task, TaskId, TaskState,
};
use crate::scheduler::{Cpu, CpuId};

/// A mapping copied into every new task's root table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalMapping {
    pub vaddr: VirtAddr,
    pub paddr: PhysAddr,
    pub flags: MapFlags,
    pub level: u8,
}

/// Kernel state: object arenas, CPU contexts and the MMU collaborator
pub struct Kernel<M: Mmu> {
    pub(crate) config: KernelConfig,
    pub(crate) mmu: M,
    pub(crate) tasks: Vec<Task>,
    pub(crate) cap_spaces: Vec<CapSpace>,
    pub(crate) page_tables: Vec<PageTable>,
    pub(crate) endpoints: Vec<Endpoint>,
    pub(crate) cpus: Vec<Cpu>,
    pub(crate) global_mappings: Vec<GlobalMapping>,
    pub(crate) next_token: u64,
}

impl<M: Mmu> Kernel<M> {
    /// Create a kernel with `config.max_tasks` unused task entries
    pub fn new(config: KernelConfig, mmu: M) -> Result<Self> {
        config.validate()?;
        let tasks = (0..config.max_tasks as u32).map(Task::unused).collect();
        let cpus = (0..config.cpus as u32).map(|i| Cpu::new(CpuId(i))).collect();
        log::info!(
            "kernel: {} cpus, {} task entries, {} cap spaces per window",
            config.cpus,
            config.max_tasks,
            config.spaces_per_window
        );
        Ok(Self {
            config,
            mmu,
            tasks,
            cap_spaces: Vec::new(),
            page_tables: Vec::new(),
            endpoints: Vec::new(),
            cpus,
            global_mappings: Vec::new(),
            next_token: 1,
        })
    }

    #[inline]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    #[inline]
    pub fn mmu(&self) -> &M {
        &self.mmu
    }

    /// Record a mapping that every task created from now on receives
    pub fn add_global_mapping(&mut self, mapping: GlobalMapping) {
        self.global_mappings.push(mapping);
    }

    // ---------------------------------------------------------------------
    // Object access
    // ---------------------------------------------------------------------

    /// Task entry named by `id`, if the generation still matches
    pub fn task(&self, id: TaskId) -> Result<&Task> {
        match self.tasks.get(id.index() as usize) {
            Some(task) if task.id == id => Ok(task),
            _ => Err(Error::NotFound),
        }
    }

    pub(crate) fn task_mut(&mut self, id: TaskId) -> Result<&mut Task> {
        match self.tasks.get_mut(id.index() as usize) {
            Some(task) if task.id == id => Ok(task),
            _ => Err(Error::NotFound),
        }
    }

    /// Task entry that must exist: ids stored in kernel links are kept
    /// current by kill and reuse
    pub(crate) fn task_entry(&mut self, id: TaskId) -> &mut Task {
        let task = &mut self.tasks[id.index() as usize];
        assert_eq!(task.id, id, "stale task link");
        task
    }

    pub fn task_state(&self, id: TaskId) -> Result<TaskState> {
        self.task(id).map(|t| t.state)
    }

    pub(crate) fn is_live(&self, id: TaskId) -> bool {
        self.task(id).map(|t| t.state.is_live()).unwrap_or(false)
    }

    pub fn endpoint(&self, id: EndpointId) -> Result<&Endpoint> {
        match self.endpoints.get(id.index()) {
            Some(ep) if ep.live => Ok(ep),
            _ => Err(Error::NotFound),
        }
    }

    pub fn cap_space(&self, id: CapSpaceId) -> Result<&CapSpace> {
        self.cap_spaces.get(id.index()).ok_or(Error::NotFound)
    }

    pub fn page_table(&self, id: PageTableId) -> Result<&PageTable> {
        self.page_tables.get(id.index()).ok_or(Error::NotFound)
    }

    pub fn cpu(&self, cpu: CpuId) -> Result<&Cpu> {
        self.cpus.get(cpu.index()).ok_or(Error::IllegalArgument)
    }

    /// Slot behind a reference
    pub fn slot(&self, at: SlotRef) -> &Slot {
        &self.cap_spaces[at.space.index()].slots[at.offset as usize]
    }

    pub(crate) fn slot_mut(&mut self, at: SlotRef) -> &mut Slot {
        &mut self.cap_spaces[at.space.index()].slots[at.offset as usize]
    }

    /// Capability stored at `index` in `task`'s cap space
    pub fn capability(&self, task: TaskId, index: CapIndex) -> Result<&Capability> {
        let at = self.lookup(task, index)?;
        Ok(&self.slot(at).cap)
    }

    /// Owner of the slot's cap space
    pub(crate) fn slot_owner(&self, at: SlotRef) -> Option<TaskId> {
        self.cap_spaces[at.space.index()].owner
    }

    // ---------------------------------------------------------------------
    // Locking helpers
    // ---------------------------------------------------------------------

    /// Identity used for locks taken on behalf of the current task of `cpu`
    pub(crate) fn owner_on(&self, cpu: CpuId) -> LockOwner {
        match self.cpus.get(cpu.index()).and_then(|c| c.current) {
            Some(task) => LockOwner::task(task),
            None => LockOwner::cpu(cpu),
        }
    }

    /// Run `f` with both tasks locked
    ///
    /// Locks are taken in ascending arena index order whatever the argument
    /// order. Both tasks must still be live once locked, otherwise
    /// `IllegalState`. `a` and `b` may be the same task.
    pub(crate) fn with_tasks_locked<R>(
        &mut self,
        owner: LockOwner,
        a: TaskId,
        b: TaskId,
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        self.task(a)?;
        self.task(b)?;
        let (first, second) = if a.index() <= b.index() { (a, b) } else { (b, a) };
        self.tasks[first.index() as usize].lock.acquire(owner);
        if second != first {
            self.tasks[second.index() as usize].lock.acquire(owner);
        }

        let result = if self.is_live(a) && self.is_live(b) {
            f(self)
        } else {
            Err(Error::IllegalState)
        };

        if second != first {
            self.tasks[second.index() as usize].lock.release(owner);
        }
        self.tasks[first.index() as usize].lock.release(owner);
        result
    }

    /// Run `f` with `ep` locked
    pub(crate) fn with_endpoint_locked<R>(
        &mut self,
        owner: LockOwner,
        ep: EndpointId,
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        self.endpoint(ep)?;
        self.endpoints[ep.index()].lock.acquire(owner);
        let result = f(self);
        self.endpoints[ep.index()].lock.release(owner);
        result
    }
}
