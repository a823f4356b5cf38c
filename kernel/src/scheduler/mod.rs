//! Scheduler - task states, ready queues and context switches
//!
//! Cooperative scheduling with one FIFO ready queue per CPU. Nothing here
//! swaps stacks: every operation updates task states and the CPU context,
//! then returns a [`Switch`] telling the platform shim which register file
//! to save and which to restore.
//!
//! ## Transitions
//!
//! - `resume`: Suspended -> Ready
//! - `switch_to`: Ready/Creating -> Running, previous Running -> Ready
//! - `yield_now`: Running -> Ready, head of the ready queue -> Running
//! - `wait`: Running -> Waiting
//! - `wakeup`: Waiting -> Ready
//! - `suspend`: Ready/Running -> Suspended
//! - `kill`: any live state -> Killed, after leaving every queue
//!
//! ## Idle task
//!
//! A CPU may register an idle task. It never sits on a ready queue: it runs
//! when the queue is empty and parks as `Suspended` when displaced.
//!
//! ## Suspension points
//!
//! `wait`, `yield_now` and the blocking IPC operations. When a task running
//! on another CPU is killed or suspended, that CPU's resulting switch is
//! parked in [`Cpu`] until it calls [`Kernel::take_pending_switch`]; there is
//! no cross-CPU signal.

mod types;

pub use types::{Cpu, CpuId, Switch};

use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::lock::LockOwner;
use crate::memory::Mmu;
use crate::objects::{Blocked, Link, TaskId, TaskState};
use crate::sched_trace;

impl<M: Mmu> Kernel<M> {
    /// Task running on `cpu`
    pub fn current(&self, cpu: CpuId) -> Option<TaskId> {
        self.cpus.get(cpu.index()).and_then(|c| c.current)
    }

    pub(crate) fn current_task(&self, cpu: CpuId) -> Result<TaskId> {
        self.cpu(cpu)?.current.ok_or(Error::IllegalState)
    }

    /// Register `id` as the idle task of `cpu`. It must be `Suspended`.
    pub fn set_idle_task(&mut self, cpu: CpuId, id: TaskId) -> Result<()> {
        self.cpu(cpu)?;
        if self.task_state(id)? != TaskState::Suspended {
            return Err(Error::IllegalState);
        }
        self.task_entry(id).home_cpu = cpu;
        self.cpus[cpu.index()].idle = Some(id);
        Ok(())
    }

    /// Switch forced on `cpu` by a kill or suspend issued elsewhere
    pub fn take_pending_switch(&mut self, cpu: CpuId) -> Option<Switch> {
        self.cpus.get_mut(cpu.index()).and_then(|c| c.pending.take())
    }

    pub(crate) fn is_idle(&self, cpu: CpuId, id: TaskId) -> bool {
        self.cpus[cpu.index()].idle == Some(id)
    }

    fn running_on(&self, id: TaskId) -> Option<CpuId> {
        self.cpus.iter().find(|c| c.current == Some(id)).map(|c| c.id)
    }

    /// Append `id` to its home CPU's ready queue
    pub(crate) fn enqueue_ready(&mut self, id: TaskId) {
        let task = self.task_entry(id);
        let cpu = task.home_cpu;
        task.state = TaskState::Ready;
        task.ready_cpu = Some(cpu);
        self.cpus[cpu.index()].ready.lock().push_back(&mut self.tasks, Link::Ready, id);
        sched_trace!("enqueue {} on {:?}", id, cpu);
    }

    /// Take `id` off whichever ready queue holds it
    fn dequeue_ready(&mut self, id: TaskId) {
        let task = self.task_entry(id);
        if !task.ready_links.queued {
            return;
        }
        let Some(cpu) = task.ready_cpu.take() else {
            panic!("task {} queued without a ready cpu", id);
        };
        self.cpus[cpu.index()].ready.lock().remove(&mut self.tasks, Link::Ready, id);
        sched_trace!("dequeue {} from {:?}", id, cpu);
    }

    /// Pick what runs on `cpu` after `from` stopped running
    ///
    /// The head of the ready queue wins, then the idle task, else nothing.
    pub(crate) fn reschedule(&mut self, cpu: CpuId, from: Option<TaskId>) -> Switch {
        let next = self.cpus[cpu.index()].ready.lock().pop_front(&mut self.tasks, Link::Ready);
        let to = match next {
            Some(id) => {
                self.task_entry(id).ready_cpu = None;
                Some(id)
            }
            None => self.cpus[cpu.index()].idle.filter(|&idle| self.is_live(idle)),
        };
        if let Some(id) = to {
            let task = self.task_entry(id);
            task.state = TaskState::Running;
            task.home_cpu = cpu;
        }
        self.cpus[cpu.index()].current = to;
        log::debug!("{:?}: switch {:?} -> {:?}", cpu, from, to);
        Switch { from, to }
    }

    /// Stop `id` running wherever it runs and park the resulting switch
    fn stop_running(&mut self, id: TaskId) {
        if let Some(cpu) = self.running_on(id) {
            self.cpus[cpu.index()].current = None;
            let switch = self.reschedule(cpu, Some(id));
            let slot = &mut self.cpus[cpu.index()].pending;
            *slot = Some(match slot.take() {
                Some(earlier) => earlier.then(switch),
                None => switch,
            });
        }
    }

    /// Suspended -> Ready
    pub fn resume(&mut self, id: TaskId) -> Result<()> {
        if self.task_state(id)? != TaskState::Suspended {
            return Err(Error::IllegalState);
        }
        let home = self.task(id)?.home_cpu;
        if self.is_idle(home, id) {
            return Err(Error::IllegalState);
        }
        self.enqueue_ready(id);
        Ok(())
    }

    /// Ready or Running -> Suspended
    ///
    /// Suspending a running task reschedules its CPU; the switch is parked
    /// for [`take_pending_switch`](Self::take_pending_switch).
    pub fn suspend(&mut self, id: TaskId) -> Result<()> {
        match self.task_state(id)? {
            TaskState::Ready => self.dequeue_ready(id),
            TaskState::Running => {
                self.task_entry(id).state = TaskState::Suspended;
                self.stop_running(id);
            }
            _ => return Err(Error::IllegalState),
        }
        self.task_entry(id).state = TaskState::Suspended;
        Ok(())
    }

    /// Run `id` on `cpu` now
    ///
    /// `id` must be `Ready` or `Creating`. The previously running task is
    /// demoted to `Ready` and re-enqueued (the idle task is parked instead).
    pub fn switch_to(&mut self, cpu: CpuId, id: TaskId) -> Result<Switch> {
        self.cpu(cpu)?;
        match self.task_state(id)? {
            TaskState::Ready | TaskState::Creating => {}
            _ => return Err(Error::IllegalState),
        }
        self.dequeue_ready(id);

        let prev = self.cpus[cpu.index()].current;
        if let Some(prev) = prev {
            if self.task_state(prev)? == TaskState::Running {
                if self.is_idle(cpu, prev) {
                    self.task_entry(prev).state = TaskState::Suspended;
                } else {
                    self.task_entry(prev).home_cpu = cpu;
                    self.enqueue_ready(prev);
                }
            }
        }

        let task = self.task_entry(id);
        task.state = TaskState::Running;
        task.home_cpu = cpu;
        self.cpus[cpu.index()].current = Some(id);
        log::debug!("{:?}: switch_to {:?} -> {}", cpu, prev, id);
        Ok(Switch { from: prev, to: Some(id) })
    }

    /// Give up the CPU to the next ready task
    ///
    /// Returns `None` when the caller keeps running because nothing else is
    /// ready.
    pub fn yield_now(&mut self, cpu: CpuId) -> Result<Option<Switch>> {
        let current = self.cpu(cpu)?.current;
        let ready = self.cpus[cpu.index()].ready_len();
        match current {
            None => {
                let switch = self.reschedule(cpu, None);
                Ok(switch.to.map(|_| switch))
            }
            Some(idle) if self.is_idle(cpu, idle) => {
                if ready == 0 {
                    return Ok(None);
                }
                self.task_entry(idle).state = TaskState::Suspended;
                Ok(Some(self.reschedule(cpu, Some(idle))))
            }
            Some(task) => {
                if ready == 0 {
                    return Ok(None);
                }
                self.enqueue_ready(task);
                Ok(Some(self.reschedule(cpu, Some(task))))
            }
        }
    }

    /// Pick the next task for `cpu` once its current task stopped running
    ///
    /// Fails `IllegalState` while the current task is still `Running`; use
    /// [`yield_now`](Self::yield_now) to give up the CPU voluntarily.
    pub fn schedule(&mut self, cpu: CpuId) -> Result<Switch> {
        let from = self.cpu(cpu)?.current;
        if let Some(id) = from {
            if self.task_state(id)? == TaskState::Running {
                return Err(Error::IllegalState);
            }
        }
        self.cpus[cpu.index()].current = None;
        Ok(self.reschedule(cpu, from))
    }

    /// Park the current task of `cpu` until [`wakeup`](Self::wakeup)
    pub fn wait(&mut self, cpu: CpuId) -> Result<Switch> {
        self.block_current(cpu, Blocked::Event)
    }

    /// Waiting -> Ready for a task parked by [`wait`](Self::wait)
    ///
    /// Tasks blocked in IPC can only be released by their IPC partner or by
    /// kill, so waking them here fails with `IllegalState`.
    pub fn wakeup(&mut self, id: TaskId) -> Result<()> {
        let task = self.task(id)?;
        if task.state != TaskState::Waiting || task.blocked != Some(Blocked::Event) {
            return Err(Error::IllegalState);
        }
        self.wake(id);
        Ok(())
    }

    /// Make a blocked task ready, whatever it was blocked on
    pub(crate) fn wake(&mut self, id: TaskId) {
        self.task_entry(id).blocked = None;
        self.enqueue_ready(id);
    }

    /// Running -> Waiting for the current task of `cpu`, then reschedule
    pub(crate) fn block_current(&mut self, cpu: CpuId, why: Blocked) -> Result<Switch> {
        let current = self.current_task(cpu)?;
        if self.is_idle(cpu, current) {
            return Err(Error::IllegalState);
        }
        let task = self.task_entry(current);
        task.state = TaskState::Waiting;
        task.blocked = Some(why);
        task.ipc_error = None;
        self.cpus[cpu.index()].current = None;
        sched_trace!("{} blocks on {:?}", current, why);
        Ok(self.reschedule(cpu, Some(current)))
    }

    /// Kill a task, taking it off every queue first
    ///
    /// A task waiting for this one's reply is woken with
    /// [`Error::NotFound`] recorded as its `ipc_error`.
    pub(crate) fn kill_task(&mut self, id: TaskId) -> Result<()> {
        let task = self.task(id)?;
        let (state, blocked, caller) = (task.state, task.blocked, task.caller);
        match state {
            TaskState::Unused | TaskState::Killed => return Err(Error::IllegalState),
            TaskState::Ready => self.dequeue_ready(id),
            TaskState::Waiting => match blocked {
                Some(Blocked::Send { endpoint, .. }) => {
                    self.with_endpoint_locked(LockOwner::task(id), endpoint, |k| {
                        k.endpoints[endpoint.index()].senders.remove(&mut k.tasks, Link::Wait, id);
                        Ok(())
                    })?;
                }
                Some(Blocked::Receive { endpoint }) => {
                    self.with_endpoint_locked(LockOwner::task(id), endpoint, |k| {
                        k.endpoints[endpoint.index()].receivers.remove(&mut k.tasks, Link::Wait, id);
                        Ok(())
                    })?;
                }
                Some(Blocked::Reply { callee }) => {
                    if let Ok(callee) = self.task_mut(callee) {
                        if callee.caller == Some(id) {
                            callee.caller = None;
                        }
                    }
                }
                Some(Blocked::Event) | None => {}
            },
            TaskState::Creating | TaskState::Suspended | TaskState::Running => {}
        }
        if let Some(caller) = caller {
            let awaiting = self.task(caller).is_ok_and(|t| {
                t.state == TaskState::Waiting && t.blocked == Some(Blocked::Reply { callee: id })
            });
            if awaiting {
                log::warn!("task {} killed while task {} awaits its reply", id, caller);
                self.task_entry(caller).ipc_error = Some(Error::NotFound);
                self.wake(caller);
            }
        }

        let task = self.task_entry(id);
        task.state = TaskState::Killed;
        task.blocked = None;
        task.caller = None;
        if state == TaskState::Running {
            self.stop_running(id);
        }
        for cpu in self.cpus.iter_mut() {
            if cpu.idle == Some(id) {
                cpu.idle = None;
            }
        }
        log::info!("task {} killed", id);
        Ok(())
    }
}
