//! Scheduler Types
//!
//! Per-CPU scheduling context and the switch descriptor handed to the
//! platform's context-switch shim.

use core::fmt;

use spin::Mutex;

use crate::objects::{TaskId, TaskList};

/// Execution unit identity
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpuId(pub u32);

impl CpuId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

/// A context change the platform layer must carry out
///
/// The scheduler has already updated all task states; the shim saves the
/// registers of `from` and restores those of `to`. `to == None` means the
/// CPU has nothing to run and should idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    pub from: Option<TaskId>,
    pub to: Option<TaskId>,
}

impl Switch {
    /// Fold a later switch on the same CPU into this one
    #[must_use]
    pub fn then(self, later: Switch) -> Switch {
        Switch { from: self.from, to: later.to }
    }
}

/// Scheduling context of one CPU
///
/// Only the owning CPU changes `current`; the ready queue may be appended to
/// from any CPU, so it sits behind its own lock.
#[derive(Debug)]
pub struct Cpu {
    pub(crate) id: CpuId,
    pub(crate) current: Option<TaskId>,
    pub(crate) idle: Option<TaskId>,
    pub(crate) ready: Mutex<TaskList>,
    /// Switch forced by a kill, collected by the CPU on its next entry
    pub(crate) pending: Option<Switch>,
}

impl Cpu {
    pub(crate) fn new(id: CpuId) -> Self {
        Self { id, current: None, idle: None, ready: Mutex::new(TaskList::new()), pending: None }
    }

    #[inline]
    pub fn id(&self) -> CpuId {
        self.id
    }

    #[inline]
    pub fn current(&self) -> Option<TaskId> {
        self.current
    }

    #[inline]
    pub fn idle(&self) -> Option<TaskId> {
        self.idle
    }

    pub fn ready_len(&self) -> usize {
        self.ready.lock().len()
    }
}
