//! Task operations invoked through Task capabilities
//!
//! Each operation names its target by a Task capability in the acting task's
//! cap space and requires the matching [`TaskRights`] bit.

use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::memory::Mmu;
use crate::objects::{CapIndex, Registers, TaskId, TaskRights, TaskState};
use crate::scheduler::{CpuId, Switch};

impl<M: Mmu> Kernel<M> {
    /// Resolve a Task capability and check `right`
    ///
    /// The capability's embedded identity is checked against the arena, so a
    /// capability to a task whose entry was since reused reports `NotFound`.
    pub(crate) fn resolve_task(&self, actor: TaskId, index: CapIndex, right: TaskRights) -> Result<TaskId> {
        let cap = *self.capability(actor, index)?.as_task()?;
        if !cap.rights().contains(right) {
            return Err(Error::PermissionDenied);
        }
        self.task(cap.task())?;
        Ok(cap.task())
    }

    /// Kill the task named at `index` (KILL)
    pub fn task_kill(&mut self, actor: TaskId, index: CapIndex) -> Result<()> {
        let target = self.resolve_task(actor, index, TaskRights::KILL)?;
        self.kill_task(target)
    }

    /// Suspend the task named at `index` (SUSPEND)
    pub fn task_suspend(&mut self, actor: TaskId, index: CapIndex) -> Result<()> {
        let target = self.resolve_task(actor, index, TaskRights::SUSPEND)?;
        self.suspend(target)
    }

    /// Resume the task named at `index` (RESUME)
    pub fn task_resume(&mut self, actor: TaskId, index: CapIndex) -> Result<()> {
        let target = self.resolve_task(actor, index, TaskRights::RESUME)?;
        self.resume(target)
    }

    /// Switch `cpu` directly to the task named at `index` by its current
    /// task (SWITCH)
    pub fn task_switch(&mut self, cpu: CpuId, index: CapIndex) -> Result<Switch> {
        let actor = self.current_task(cpu)?;
        let target = self.resolve_task(actor, index, TaskRights::SWITCH)?;
        self.switch_to(cpu, target)
    }

    /// Read the saved registers of a suspended task (GET_REGS)
    pub fn task_read_registers(&self, actor: TaskId, index: CapIndex) -> Result<Registers> {
        let target = self.resolve_task(actor, index, TaskRights::GET_REGS)?;
        let task = self.task(target)?;
        if task.state != TaskState::Suspended {
            return Err(Error::IllegalState);
        }
        Ok(task.registers)
    }

    /// Overwrite the saved registers of a suspended task (SET_REGS)
    pub fn task_write_registers(&mut self, actor: TaskId, index: CapIndex, regs: Registers) -> Result<()> {
        let target = self.resolve_task(actor, index, TaskRights::SET_REGS)?;
        let task = self.task_mut(target)?;
        if task.state != TaskState::Suspended {
            return Err(Error::IllegalState);
        }
        task.registers = regs;
        Ok(())
    }

    /// Register file the platform shim restores when `id` runs
    pub fn registers(&self, id: TaskId) -> Result<&Registers> {
        Ok(&self.task(id)?.registers)
    }

    /// Save `id`'s register file on the way out of a switch
    pub fn save_registers(&mut self, id: TaskId, regs: Registers) -> Result<()> {
        self.task_mut(id)?.registers = regs;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fixture, CPU0};

    #[test]
    fn rights_gate_each_operation() {
        let mut f = Fixture::new().unwrap();
        let (child, cap) = f.spawn().unwrap();
        let resume_only = f.kernel.copy_with_rights(f.root, cap, TaskRights::RESUME.bits()).unwrap();

        assert_eq!(f.kernel.task_kill(f.root, resume_only), Err(Error::PermissionDenied));
        assert_eq!(f.kernel.task_suspend(f.root, resume_only), Err(Error::PermissionDenied));
        assert_eq!(f.kernel.task_switch(CPU0, resume_only), Err(Error::PermissionDenied));
        assert_eq!(f.kernel.task_read_registers(f.root, resume_only), Err(Error::PermissionDenied));

        f.kernel.task_resume(f.root, resume_only).unwrap();
        assert_eq!(f.kernel.task_state(child), Ok(TaskState::Ready));
        assert_eq!(f.kernel.task_resume(f.root, cap), Err(Error::IllegalState));
    }

    #[test]
    fn registers_only_while_suspended() {
        let mut f = Fixture::new().unwrap();
        let (child, cap) = f.spawn().unwrap();
        let mut regs = Registers::new();
        regs.pc = 0x40_0000;
        regs.sp = 0x7fff_f000;
        regs.gprs[0] = 42;

        f.kernel.task_write_registers(f.root, cap, regs).unwrap();
        assert_eq!(f.kernel.task_read_registers(f.root, cap), Ok(regs));
        assert_eq!(f.kernel.registers(child), Ok(&regs));

        f.kernel.task_resume(f.root, cap).unwrap();
        assert_eq!(f.kernel.task_read_registers(f.root, cap), Err(Error::IllegalState));
        assert_eq!(f.kernel.task_write_registers(f.root, cap, regs), Err(Error::IllegalState));
    }

    #[test]
    fn switch_runs_target_and_requeues_caller() {
        let mut f = Fixture::new().unwrap();
        let (child, cap) = f.spawn().unwrap();
        f.kernel.task_resume(f.root, cap).unwrap();

        let switch = f.kernel.task_switch(CPU0, cap).unwrap();
        assert_eq!(switch, Switch { from: Some(f.root), to: Some(child) });
        assert_eq!(f.kernel.task_state(f.root), Ok(TaskState::Ready));
        assert_eq!(f.kernel.task_state(child), Ok(TaskState::Running));
    }

    #[test]
    fn killing_a_parked_receiver_leaves_the_queue() {
        let mut f = Fixture::new().unwrap();
        let ep = f.endpoint().unwrap();
        let (child, cap) = f.spawn().unwrap();
        let theirs = f.share(child, ep).unwrap();
        f.run(child).unwrap();
        f.kernel.receive(CPU0, theirs, true).unwrap();

        let id = f.kernel.capability(f.root, ep).unwrap().as_endpoint().unwrap().endpoint();
        assert_eq!(f.kernel.endpoint(id).unwrap().receivers().len(), 1);

        f.kernel.task_kill(f.root, cap).unwrap();
        assert_eq!(f.kernel.task_state(child), Ok(TaskState::Killed));
        assert!(!f.kernel.endpoint(id).unwrap().has_waiters());
        assert_eq!(f.kernel.task_kill(f.root, cap), Err(Error::IllegalState));
    }

    #[test]
    fn killing_yourself_parks_a_switch() {
        let mut f = Fixture::new().unwrap();
        let (child, cap) = f.spawn().unwrap();
        f.kernel.task_resume(f.root, cap).unwrap();

        f.kernel.task_kill(f.root, f.boot.task).unwrap();
        assert_eq!(f.kernel.task_state(f.root), Ok(TaskState::Killed));
        assert_eq!(
            f.kernel.take_pending_switch(CPU0),
            Some(Switch { from: Some(f.root), to: Some(child) })
        );
        assert_eq!(f.kernel.current(CPU0), Some(child));
        assert_eq!(f.kernel.take_pending_switch(CPU0), None);
    }
}
