//! Inter-task communication over endpoints
//!
//! Synchronous rendezvous: a message changes hands only when a sender and a
//! receiver meet on an [`Endpoint`](crate::objects::Endpoint). Whoever
//! arrives first parks on the endpoint's queue.
//!
//! **Operations** (all under the endpoint's lock):
//! - `send`: deliver to a parked receiver, else park (or `WouldBlock`)
//! - `receive`: take a parked sender's message, else park (or `WouldBlock`)
//! - `call`: `send` that also makes the receiver our designated replier
//! - `reply`: deliver straight to the recorded caller
//! - `reply_and_receive`: `reply` then blocking `receive`, no return to user
//!   code in between
//!
//! ## Fast path
//!
//! When a sender finds a receiver parked and the message is short (no
//! capabilities, no out-of-line table) the CPU switches straight to the
//! receiver instead of queueing it and making a scheduling decision.
//!
//! ## Usage
//!
//! ```rust,ignore
//! kernel.set_message(client, MessageBuffer::from_data(&[1, 2, 3])?)?;
//! let out = kernel.call(cpu, ep_index)?;       // client now Waiting
//! // ... server received, computed, then:
//! kernel.reply(cpu, server_ep_index)?;          // client Ready again
//! ```

pub mod cap_transfer;
pub mod call;
pub mod message;
pub mod operations;

pub use message::MessageBuffer;

use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::memory::Mmu;
use crate::objects::{CapIndex, EndpointId, EndpointRights, TaskId};
use crate::scheduler::Switch;

/// What happened to the task that issued an IPC operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcStatus {
    /// The message changed hands; the caller did not park on the endpoint
    Delivered,
    /// The caller is now `Waiting` (parked on the endpoint or for a reply)
    Blocked,
}

/// Result of an IPC operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcOutcome {
    pub status: IpcStatus,
    /// Context change the operation caused on the issuing CPU
    pub switch: Option<Switch>,
}

impl IpcOutcome {
    pub(crate) const fn delivered(switch: Option<Switch>) -> Self {
        Self { status: IpcStatus::Delivered, switch }
    }

    pub(crate) const fn blocked(switch: Option<Switch>) -> Self {
        Self { status: IpcStatus::Blocked, switch }
    }
}

impl<M: Mmu> Kernel<M> {
    /// Resolve an Endpoint capability held by `actor` and check `rights`
    pub(crate) fn resolve_endpoint(
        &self,
        actor: TaskId,
        index: CapIndex,
        rights: EndpointRights,
    ) -> Result<EndpointId> {
        let cap = *self.capability(actor, index)?.as_endpoint()?;
        if !cap.rights().contains(rights) {
            return Err(Error::PermissionDenied);
        }
        self.endpoint(cap.endpoint())?;
        Ok(cap.endpoint())
    }

    /// Replace `task`'s message buffer (the platform copies it in from the
    /// task's IPC registers before an IPC system call)
    pub fn set_message(&mut self, task: TaskId, msg: MessageBuffer) -> Result<()> {
        self.task_mut(task)?.msg = msg;
        Ok(())
    }

    pub fn message(&self, task: TaskId) -> Result<&MessageBuffer> {
        Ok(&self.task(task)?.msg)
    }
}
