//! Tasks
//!
//! A task is the unit of execution and of capability ownership. Its identity
//! is an arena index plus a generation counter bumped every time the entry is
//! reused, so a stale [`TaskId`] never resolves to a newer task.
//!
//! ## State machine
//!
//! ```text
//! Unused -> Creating -> Suspended <-> Ready <-> Running <-> Waiting
//!                            \           \         |          /
//!                             `-----------`--------+---------'--> Killed
//! ```

use core::fmt;

use super::{CapSpaceId, EndpointId, PageTableId, SlotRef};
use crate::error::Error;
use crate::ipc::MessageBuffer;
use crate::lock::ReentrantLock;
use crate::memory::PhysAddr;
use crate::scheduler::CpuId;

/// Task identity: arena index plus generation
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId {
    index: u32,
    generation: u32,
}

impl TaskId {
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Encoding used across the system-call boundary:
    /// `generation << 32 | index`
    #[inline]
    #[must_use]
    pub const fn to_raw(self) -> u64 {
        (self.generation as u64) << 32 | self.index as u64
    }

    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self { index: raw as u32, generation: (raw >> 32) as u32 }
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({}.{})", self.index, self.generation)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Arena entry not in use
    Unused,
    /// Being initialised by object creation
    Creating,
    /// Initialised or explicitly suspended, not schedulable
    Suspended,
    /// On a ready queue
    Ready,
    /// Current task of some CPU
    Running,
    /// Blocked, see [`Blocked`]
    Waiting,
    /// Terminal
    Killed,
}

impl TaskState {
    /// Live tasks own capabilities and can be looked up
    #[inline]
    pub const fn is_live(self) -> bool {
        !matches!(self, TaskState::Unused | TaskState::Killed)
    }
}

/// Why a `Waiting` task is blocked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blocked {
    /// Queued as a sender. `call` senders wait for a reply after delivery.
    Send { endpoint: EndpointId, call: bool },
    /// Queued as a receiver
    Receive { endpoint: EndpointId },
    /// Message delivered by `call`, waiting for `callee` to reply
    Reply { callee: TaskId },
    /// Parked by `wait()` until an explicit wakeup
    Event,
}

/// Saved user register file
///
/// Index order used by register access: `pc`, `sp`, then `gprs[0..31]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    pub pc: u64,
    pub sp: u64,
    pub gprs: [u64; 31],
}

impl Registers {
    pub const COUNT: usize = 33;

    pub const fn new() -> Self {
        Self { pc: 0, sp: 0, gprs: [0; 31] }
    }

    pub fn get(&self, index: usize) -> Option<u64> {
        match index {
            0 => Some(self.pc),
            1 => Some(self.sp),
            n => self.gprs.get(n - 2).copied(),
        }
    }

    pub fn set(&mut self, index: usize, value: u64) -> Option<()> {
        let reg = match index {
            0 => &mut self.pc,
            1 => &mut self.sp,
            n => self.gprs.get_mut(n - 2)?,
        };
        *reg = value;
        Some(())
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

/// Links of one intrusive queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueLinks {
    pub(crate) prev: Option<TaskId>,
    pub(crate) next: Option<TaskId>,
    pub(crate) queued: bool,
}

/// Task control block
#[derive(Debug)]
pub struct Task {
    pub(crate) id: TaskId,
    pub(crate) lock: ReentrantLock,
    pub(crate) state: TaskState,
    /// Page carved for this task object
    pub(crate) phys: PhysAddr,
    pub(crate) root_table: Option<(PageTableId, PhysAddr)>,
    /// Inserted cap spaces, indexed by their number
    pub(crate) spaces: alloc::vec::Vec<CapSpaceId>,
    pub(crate) extensions: u8,
    pub(crate) free_head: Option<SlotRef>,
    pub(crate) free_count: usize,
    /// CPU whose ready queue this task joins when woken
    pub(crate) home_cpu: CpuId,
    pub(crate) ready_links: QueueLinks,
    pub(crate) ready_cpu: Option<CpuId>,
    pub(crate) wait_links: QueueLinks,
    pub(crate) blocked: Option<Blocked>,
    pub(crate) msg: MessageBuffer,
    /// Task that called us and awaits our reply
    pub(crate) caller: Option<TaskId>,
    /// Set when a blocking IPC ended because the partner was killed
    pub(crate) ipc_error: Option<Error>,
    pub(crate) registers: Registers,
}

impl Task {
    pub(crate) fn unused(index: u32) -> Self {
        Self {
            id: TaskId::new(index, 0),
            lock: ReentrantLock::new(),
            state: TaskState::Unused,
            phys: PhysAddr::new(0),
            root_table: None,
            spaces: alloc::vec::Vec::new(),
            extensions: 0,
            free_head: None,
            free_count: 0,
            home_cpu: CpuId(0),
            ready_links: QueueLinks::default(),
            ready_cpu: None,
            wait_links: QueueLinks::default(),
            blocked: None,
            msg: MessageBuffer::new(),
            caller: None,
            ipc_error: None,
            registers: Registers::new(),
        }
    }

    /// Reuse this entry for a new task. The generation is bumped so old
    /// identities go stale.
    pub(crate) fn claim(&mut self, phys: PhysAddr) -> TaskId {
        let index = self.id.index();
        let generation = self.id.generation().wrapping_add(1);
        *self = Task::unused(index);
        self.id = TaskId::new(index, generation);
        self.state = TaskState::Creating;
        self.phys = phys;
        self.id
    }

    /// Give the entry back after a failed creation, keeping the bumped
    /// generation
    pub(crate) fn abandon(&mut self) {
        let id = self.id;
        *self = Task::unused(id.index());
        self.id = id;
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        self.state
    }

    #[inline]
    pub fn blocked(&self) -> Option<Blocked> {
        self.blocked
    }

    #[inline]
    pub fn caller(&self) -> Option<TaskId> {
        self.caller
    }

    /// Error the last blocking IPC ended with, if its partner went away
    #[inline]
    pub fn ipc_error(&self) -> Option<Error> {
        self.ipc_error
    }

    #[inline]
    pub fn used_spaces(&self) -> usize {
        self.spaces.len()
    }

    #[inline]
    pub fn extensions(&self) -> u8 {
        self.extensions
    }

    #[inline]
    pub fn free_slots(&self) -> usize {
        self.free_count
    }

    #[inline]
    pub fn message(&self) -> &MessageBuffer {
        &self.msg
    }

    #[inline]
    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    #[inline]
    pub fn root_table(&self) -> Option<PhysAddr> {
        self.root_table.map(|(_, phys)| phys)
    }
}
