//! System call interface
//!
//! The platform trap handler reads the syscall number and six argument
//! registers of the current task into [`SyscallArgs`], calls
//! [`Kernel::dispatch`], writes `value` and `error` back, and performs the
//! returned [`Switch`] if any. Numbers are listed in [`numbers`].

pub mod numbers;

use crate::error::{Error, Result, SUCCESS};
use crate::ipc::{IpcOutcome, IpcStatus};
use crate::kernel::Kernel;
use crate::memory::Mmu;
use crate::objects::{CapIndex, MemoryFlags, TaskId, TaskRights};
use crate::retype::TaskArgs;
use crate::scheduler::{CpuId, Switch};
use crate::syscall_trace;

/// Decoded trap registers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyscallArgs {
    pub number: u64,
    pub args: [u64; 6],
}

impl SyscallArgs {
    pub const fn new(number: u64, args: [u64; 6]) -> Self {
        Self { number, args }
    }
}

/// Values written back to the calling task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallReturn {
    pub value: u64,
    /// [`SUCCESS`] or an [`Error::code`]
    pub error: u64,
    /// Context change to perform before returning to user space
    pub switch: Option<Switch>,
}

impl SyscallReturn {
    pub fn is_ok(&self) -> bool {
        self.error == SUCCESS
    }

    pub fn error(&self) -> Option<Error> {
        Error::from_code(self.error)
    }
}

/// What a handler produced before the return registers are filled in
struct Handled {
    value: u64,
    switch: Option<Switch>,
}

impl Handled {
    const fn value(value: u64) -> Self {
        Self { value, switch: None }
    }
}

impl From<Switch> for Handled {
    fn from(switch: Switch) -> Self {
        Self { value: 0, switch: Some(switch) }
    }
}

#[inline]
fn index(arg: u64) -> CapIndex {
    arg as CapIndex
}

fn level(arg: u64) -> Result<u8> {
    u8::try_from(arg).map_err(|_| Error::IllegalArgument)
}

fn memory_flags(arg: u64) -> Result<MemoryFlags> {
    u8::try_from(arg).ok().and_then(MemoryFlags::from_bits).ok_or(Error::IllegalArgument)
}

impl<M: Mmu> Kernel<M> {
    /// Decode and run one system call issued by the current task of `cpu`
    pub fn dispatch(&mut self, cpu: CpuId, call: SyscallArgs) -> SyscallReturn {
        let caller = self.current(cpu);
        syscall_trace!("{:?}: {:?} syscall {:#x} {:x?}", cpu, caller, call.number, call.args);

        let result = match caller {
            Some(task) => self.handle(cpu, task, call),
            None => Err(Error::IllegalState),
        };
        let pending = self.take_pending_switch(cpu);
        match result {
            Ok(done) => {
                let switch = match (done.switch, pending) {
                    (Some(first), Some(later)) => Some(first.then(later)),
                    (first, later) => first.or(later),
                };
                SyscallReturn { value: done.value, error: SUCCESS, switch }
            }
            Err(err) => {
                log::warn!("{:?}: syscall {:#x} from {:?} failed: {}", cpu, call.number, caller, err);
                SyscallReturn { value: 0, error: err.code(), switch: pending }
            }
        }
    }

    fn handle(&mut self, cpu: CpuId, task: TaskId, call: SyscallArgs) -> Result<Handled> {
        use numbers::*;
        let a = call.args;
        let handled = match call.number {
            CAP_TRANSFER => {
                let dst = self.resolve_task(task, index(a[0]), TaskRights::empty())?;
                Handled::value(self.transfer(dst, task, index(a[1]))? as u64)
            }
            CAP_DELEGATE => {
                let dst = self.resolve_task(task, index(a[0]), TaskRights::empty())?;
                Handled::value(self.delegate(dst, task, index(a[1]))? as u64)
            }
            CAP_COPY => {
                let mask = u8::try_from(a[1]).map_err(|_| Error::IllegalArgument)?;
                Handled::value(self.copy_with_rights(task, index(a[0]), mask)? as u64)
            }
            CAP_REVOKE => {
                self.revoke(task, index(a[0]))?;
                Handled::value(0)
            }
            CAP_DESTROY => {
                self.destroy(task, index(a[0]))?;
                Handled::value(0)
            }
            CAP_INSERT_SPACE => {
                self.insert_cap_space(task, index(a[0]))?;
                Handled::value(0)
            }
            CAP_EXTEND_WINDOW => {
                self.extend_cap_space(task, index(a[0]))?;
                Handled::value(0)
            }
            CAP_TYPE => Handled::value(self.capability(task, index(a[0]))?.cap_type() as u64),

            CREATE_MEMORY => {
                let flags = memory_flags(a[4])?;
                Handled::value(self.create_memory_object(task, index(a[0]), index(a[1]), a[2], a[3], flags)? as u64)
            }
            CREATE_TASK => {
                let args = TaskArgs { cap_space: index(a[2]), root_table: index(a[3]), window_table: index(a[4]) };
                Handled::value(self.create_task_object(task, index(a[0]), index(a[1]), args)? as u64)
            }
            CREATE_PAGE_TABLE => {
                Handled::value(self.create_page_table_object(task, index(a[0]), index(a[1]), level(a[2])?)? as u64)
            }
            CREATE_VIRT_PAGE => {
                let flags = memory_flags(a[3])?;
                let dest = self.create_virt_page_object(task, index(a[0]), index(a[1]), level(a[2])?, flags)?;
                Handled::value(dest as u64)
            }
            CREATE_CAP_SPACE => Handled::value(self.create_cap_space_object(task, index(a[0]), index(a[1]))? as u64),
            CREATE_ENDPOINT => Handled::value(self.create_endpoint_object(task, index(a[0]), index(a[1]))? as u64),
            CREATE_ID => Handled::value(self.create_id_object(task, index(a[0]), index(a[1]))? as u64),

            TASK_KILL => {
                self.task_kill(task, index(a[0]))?;
                Handled::value(0)
            }
            TASK_SUSPEND => {
                self.task_suspend(task, index(a[0]))?;
                Handled::value(0)
            }
            TASK_RESUME => {
                self.task_resume(task, index(a[0]))?;
                Handled::value(0)
            }
            TASK_SWITCH => self.task_switch(cpu, index(a[0]))?.into(),
            TASK_READ_REGISTER => {
                let regs = self.task_read_registers(task, index(a[0]))?;
                Handled::value(regs.get(a[1] as usize).ok_or(Error::IllegalArgument)?)
            }
            TASK_WRITE_REGISTER => {
                let mut regs = self.task_read_registers(task, index(a[0]))?;
                regs.set(a[1] as usize, a[2]).ok_or(Error::IllegalArgument)?;
                self.task_write_registers(task, index(a[0]), regs)?;
                Handled::value(0)
            }
            TASK_YIELD => Handled { value: 0, switch: self.yield_now(cpu)? },
            TASK_WAIT => self.wait(cpu)?.into(),

            IPC_SEND => {
                let outcome = self.send(cpu, index(a[0]), a[1] != 0)?;
                self.ipc_result(task, outcome)
            }
            IPC_RECEIVE => {
                let outcome = self.receive(cpu, index(a[0]), a[1] != 0)?;
                self.ipc_result(task, outcome)
            }
            IPC_CALL => {
                let outcome = self.call(cpu, index(a[0]))?;
                self.ipc_result(task, outcome)
            }
            IPC_REPLY => {
                let outcome = self.reply(cpu, index(a[0]))?;
                self.ipc_result(task, outcome)
            }
            IPC_REPLY_RECEIVE => {
                let outcome = self.reply_and_receive(cpu, index(a[0]))?;
                self.ipc_result(task, outcome)
            }

            _ => return Err(Error::IllegalArgument),
        };
        Ok(handled)
    }

    /// A delivered message reports the caller's header; a parked caller gets
    /// its header when it is resumed
    fn ipc_result(&self, task: TaskId, outcome: IpcOutcome) -> Handled {
        let value = match outcome.status {
            IpcStatus::Delivered => self.task(task).map(|t| t.msg.header()).unwrap_or(0),
            IpcStatus::Blocked => 0,
        };
        Handled { value, switch: outcome.switch }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::CapType;
    use crate::testing::{Fixture, CPU0};

    #[test]
    fn numbers_are_namespaced() {
        assert_eq!(numbers::CAP_TRANSFER >> 8, numbers::NS_CAP);
        assert_eq!(numbers::CREATE_ID >> 8, numbers::NS_OBJECT);
        assert_eq!(numbers::TASK_WAIT >> 8, numbers::NS_TASK);
        assert_eq!(numbers::IPC_REPLY_RECEIVE, 0x405);
    }

    #[test]
    fn dispatch_creates_and_reports_indices() {
        let mut f = Fixture::new().unwrap();
        let dest = f.free().unwrap() as u64;
        let ret = f.kernel.dispatch(CPU0, SyscallArgs::new(numbers::CREATE_ENDPOINT, [dest, f.boot.memory as u64, 0, 0, 0, 0]));
        assert!(ret.is_ok());
        assert_eq!(ret.value, dest);
        let ty = f.kernel.dispatch(CPU0, SyscallArgs::new(numbers::CAP_TYPE, [dest, 0, 0, 0, 0, 0]));
        assert_eq!(ty.value, CapType::Endpoint as u64);
    }

    #[test]
    fn dispatch_encodes_errors() {
        let mut f = Fixture::new().unwrap();
        let unknown = f.kernel.dispatch(CPU0, SyscallArgs::new(0xdead, [0; 6]));
        assert_eq!(unknown.error(), Some(Error::IllegalArgument));

        let ep = f.endpoint().unwrap() as u64;
        let send = f.kernel.dispatch(CPU0, SyscallArgs::new(numbers::IPC_SEND, [ep, 0, 0, 0, 0, 0]));
        assert_eq!(send.error, Error::WouldBlock.code());
        assert_eq!(send.switch, None);

        let no_cpu = f.kernel.dispatch(CpuId(3), SyscallArgs::new(numbers::TASK_YIELD, [0; 6]));
        assert_eq!(no_cpu.error(), Some(Error::IllegalState));
    }

    #[test]
    fn dispatch_reports_switches() {
        let mut f = Fixture::new().unwrap();
        let (child, cap) = f.spawn().unwrap();
        let resume = f.kernel.dispatch(CPU0, SyscallArgs::new(numbers::TASK_RESUME, [cap as u64, 0, 0, 0, 0, 0]));
        assert!(resume.is_ok());

        let kill_self = f.kernel.dispatch(CPU0, SyscallArgs::new(numbers::TASK_KILL, [f.boot.task as u64, 0, 0, 0, 0, 0]));
        assert!(kill_self.is_ok());
        assert_eq!(kill_self.switch, Some(Switch { from: Some(f.root), to: Some(child) }));
    }

    #[test]
    fn dispatch_register_access() {
        let mut f = Fixture::new().unwrap();
        let (child, cap) = f.spawn().unwrap();
        let cap = cap as u64;
        let write = f.kernel.dispatch(CPU0, SyscallArgs::new(numbers::TASK_WRITE_REGISTER, [cap, 0, 0x1234, 0, 0, 0]));
        assert!(write.is_ok());
        assert_eq!(f.kernel.registers(child).unwrap().pc, 0x1234);
        let read = f.kernel.dispatch(CPU0, SyscallArgs::new(numbers::TASK_READ_REGISTER, [cap, 0, 0, 0, 0, 0]));
        assert_eq!(read.value, 0x1234);
        let bad = f.kernel.dispatch(CPU0, SyscallArgs::new(numbers::TASK_READ_REGISTER, [cap, 99, 0, 0, 0, 0]));
        assert_eq!(bad.error(), Some(Error::IllegalArgument));
    }

    #[test]
    fn argument_decoding() {
        assert_eq!(level(2), Ok(2));
        assert_eq!(level(256), Err(Error::IllegalArgument));
        assert_eq!(memory_flags(0b0110), Ok(MemoryFlags::READ | MemoryFlags::WRITE));
        assert_eq!(memory_flags(0x80), Err(Error::IllegalArgument));
    }
}
