//! Call/reply
//!
//! `call` is a blocking send that records the caller in the receiver
//! (`receiver.caller`), so exactly one later `reply` resumes it without a
//! separate reply object. The caller waits as `Blocked::Reply` until then.

use super::{IpcOutcome, Kernel};
use crate::error::{Error, Result};
use crate::lock::LockOwner;
use crate::memory::Mmu;
use crate::objects::{Blocked, CapIndex, EndpointRights, TaskState};
use crate::scheduler::CpuId;

impl<M: Mmu> Kernel<M> {
    /// Send the current task's message and wait for the reply
    pub fn call(&mut self, cpu: CpuId, index: CapIndex) -> Result<IpcOutcome> {
        let caller = self.current_task(cpu)?;
        let ep = self.resolve_endpoint(caller, index, EndpointRights::SEND)?;
        self.with_endpoint_locked(LockOwner::task(caller), ep, |k| {
            k.deliver_or_park(cpu, caller, ep, true, true)
        })
    }

    /// Deliver the current task's message to its recorded caller
    ///
    /// `index` must name an Endpoint capability; its lock serialises the
    /// reply with other operations on the endpoint the call came through.
    pub fn reply(&mut self, cpu: CpuId, index: CapIndex) -> Result<IpcOutcome> {
        let replier = self.current_task(cpu)?;
        let ep = self.resolve_endpoint(replier, index, EndpointRights::empty())?;
        let caller = self.task(replier)?.caller.ok_or(Error::IllegalState)?;
        self.with_endpoint_locked(LockOwner::task(replier), ep, |k| {
            let waiting = k.task(caller).is_ok_and(|t| {
                t.state == TaskState::Waiting && t.blocked == Some(Blocked::Reply { callee: replier })
            });
            if !waiting {
                k.task_entry(replier).caller = None;
                return Err(Error::IllegalState);
            }
            k.transfer_message(LockOwner::task(replier), caller, replier)?;
            k.task_entry(replier).caller = None;
            k.wake(caller);
            log::debug!("ipc: task {} replied to task {}", replier, caller);
            Ok(IpcOutcome::delivered(None))
        })
    }

    /// `reply` then blocking `receive` on the same endpoint
    ///
    /// A caller that is gone (killed, or never recorded) is skipped and the
    /// receive still runs, so a server loop keeps serving.
    pub fn reply_and_receive(&mut self, cpu: CpuId, index: CapIndex) -> Result<IpcOutcome> {
        match self.reply(cpu, index) {
            Ok(_) => {}
            Err(Error::IllegalState) => {
                log::debug!("ipc: reply skipped, no caller waiting");
            }
            Err(err) => return Err(err),
        }
        self.receive(cpu, index, true)
    }
}
