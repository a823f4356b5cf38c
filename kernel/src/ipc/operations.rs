//! IPC Operations - Send and Receive
//!
//! ## Synchronous IPC Model
//!
//! 1. If the sender arrives first, it parks on the endpoint's send queue
//! 2. If the receiver arrives first, it parks on the receive queue
//! 3. When both are present the message is transferred immediately and the
//!    parked side becomes runnable without re-entering any queue

use super::{IpcOutcome, Kernel};
use crate::error::{Error, Result};
use crate::lock::LockOwner;
use crate::memory::Mmu;
use crate::objects::{Blocked, CapIndex, EndpointId, EndpointRights, Link, TaskId, TaskState};
use crate::scheduler::CpuId;

impl<M: Mmu> Kernel<M> {
    /// Send the current task's message on the endpoint at `index`
    ///
    /// Requires SEND. Without a parked receiver a blocking send parks the
    /// sender; a non-blocking one fails with `WouldBlock`.
    pub fn send(&mut self, cpu: CpuId, index: CapIndex, blocking: bool) -> Result<IpcOutcome> {
        let sender = self.current_task(cpu)?;
        let ep = self.resolve_endpoint(sender, index, EndpointRights::SEND)?;
        self.with_endpoint_locked(LockOwner::task(sender), ep, |k| {
            k.deliver_or_park(cpu, sender, ep, blocking, false)
        })
    }

    /// Shared body of `send` and `call`; endpoint lock held
    pub(crate) fn deliver_or_park(
        &mut self,
        cpu: CpuId,
        sender: TaskId,
        ep: EndpointId,
        blocking: bool,
        call: bool,
    ) -> Result<IpcOutcome> {
        if self.is_idle(cpu, sender) {
            return Err(Error::IllegalState);
        }
        let endpoint = &self.endpoints[ep.index()];
        endpoint.check_invariant();

        let Some(receiver) = endpoint.receivers.head() else {
            if !blocking {
                return Err(Error::WouldBlock);
            }
            let switch = self.block_current(cpu, Blocked::Send { endpoint: ep, call })?;
            self.endpoints[ep.index()].senders.push_back(&mut self.tasks, Link::Wait, sender);
            log::debug!("ipc: task {} parked as sender on endpoint {}", sender, ep);
            return Ok(IpcOutcome::blocked(Some(switch)));
        };

        // Transfer first: on failure the receiver stays parked untouched.
        self.transfer_message(LockOwner::task(sender), receiver, sender)?;
        self.endpoints[ep.index()].receivers.remove(&mut self.tasks, Link::Wait, receiver);
        self.task_entry(receiver).blocked = None;
        let fast = self.task(sender)?.msg.is_short();
        log::debug!("ipc: task {} -> task {} on endpoint {} (fast: {})", sender, receiver, ep, fast);

        if call {
            self.task_entry(receiver).caller = Some(sender);
        }

        if fast {
            if call {
                let task = self.task_entry(sender);
                task.state = TaskState::Waiting;
                task.blocked = Some(Blocked::Reply { callee: receiver });
                task.ipc_error = None;
            }
            self.task_entry(receiver).state = TaskState::Ready;
            let switch = self.switch_to(cpu, receiver)?;
            return Ok(if call {
                IpcOutcome::blocked(Some(switch))
            } else {
                IpcOutcome::delivered(Some(switch))
            });
        }

        self.enqueue_ready(receiver);
        if call {
            let switch = self.block_current(cpu, Blocked::Reply { callee: receiver })?;
            return Ok(IpcOutcome::blocked(Some(switch)));
        }
        Ok(IpcOutcome::delivered(None))
    }

    /// Receive on the endpoint at `index` into the current task's buffer
    ///
    /// Requires RECEIVE. A sender that arrived through `call` stays
    /// `Waiting` and becomes our caller; any other sender is made ready. A
    /// task that still owes a reply cannot receive (`IllegalState`).
    pub fn receive(&mut self, cpu: CpuId, index: CapIndex, blocking: bool) -> Result<IpcOutcome> {
        let receiver = self.current_task(cpu)?;
        let ep = self.resolve_endpoint(receiver, index, EndpointRights::RECEIVE)?;
        if self.task(receiver)?.caller.is_some() || self.is_idle(cpu, receiver) {
            return Err(Error::IllegalState);
        }
        self.with_endpoint_locked(LockOwner::task(receiver), ep, |k| {
            let endpoint = &k.endpoints[ep.index()];
            endpoint.check_invariant();

            let Some(sender) = endpoint.senders.head() else {
                if !blocking {
                    return Err(Error::WouldBlock);
                }
                let switch = k.block_current(cpu, Blocked::Receive { endpoint: ep })?;
                k.endpoints[ep.index()].receivers.push_back(&mut k.tasks, Link::Wait, receiver);
                log::debug!("ipc: task {} parked as receiver on endpoint {}", receiver, ep);
                return Ok(IpcOutcome::blocked(Some(switch)));
            };

            k.transfer_message(LockOwner::task(receiver), receiver, sender)?;
            k.endpoints[ep.index()].senders.remove(&mut k.tasks, Link::Wait, sender);
            log::debug!("ipc: task {} <- task {} on endpoint {}", receiver, sender, ep);

            match k.task(sender)?.blocked {
                Some(Blocked::Send { call: true, .. }) => {
                    k.task_entry(sender).blocked = Some(Blocked::Reply { callee: receiver });
                    k.task_entry(receiver).caller = Some(sender);
                }
                _ => k.wake(sender),
            }
            Ok(IpcOutcome::delivered(None))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::{IpcStatus, MessageBuffer};
    use crate::scheduler::Switch;
    use crate::testing::{Fixture, CPU0};

    /// Root plus a second task holding its own copy of a fresh endpoint
    fn pair() -> (Fixture, TaskId, CapIndex, CapIndex) {
        let mut f = Fixture::new().unwrap();
        let ep = f.endpoint().unwrap();
        let (peer, _) = f.spawn().unwrap();
        let theirs = f.share(peer, ep).unwrap();
        (f, peer, ep, theirs)
    }

    fn endpoint_of(f: &Fixture, index: CapIndex) -> EndpointId {
        f.kernel.capability(f.root, index).unwrap().as_endpoint().unwrap().endpoint()
    }

    #[test]
    fn send_to_parked_receiver_hands_over_directly() {
        let (mut f, peer, ep, theirs) = pair();
        f.run(peer).unwrap();
        let parked = f.kernel.receive(CPU0, theirs, true).unwrap();
        assert_eq!(parked.status, IpcStatus::Blocked);
        assert_eq!(f.kernel.current(CPU0), Some(f.root));

        let msg = MessageBuffer::from_data(&[1, 2, 3]).unwrap();
        f.kernel.set_message(f.root, msg.clone()).unwrap();
        let out = f.kernel.send(CPU0, ep, true).unwrap();

        assert_eq!(out.status, IpcStatus::Delivered);
        assert_eq!(out.switch, Some(Switch { from: Some(f.root), to: Some(peer) }));
        assert_eq!(f.kernel.message(peer), Ok(&msg));
        assert_eq!(f.kernel.task_state(peer), Ok(TaskState::Running));
        assert_eq!(f.kernel.task(peer).unwrap().blocked(), None);
        assert_eq!(f.kernel.task_state(f.root), Ok(TaskState::Ready));
        assert!(!f.kernel.endpoint(endpoint_of(&f, ep)).unwrap().has_waiters());
    }

    #[test]
    fn parked_sender_is_released_by_receive() {
        let (mut f, peer, ep, theirs) = pair();
        f.kernel.resume(peer).unwrap();
        f.kernel.set_message(f.root, MessageBuffer::from_data(&[9]).unwrap()).unwrap();

        let out = f.kernel.send(CPU0, ep, true).unwrap();
        assert_eq!(out.status, IpcStatus::Blocked);
        assert_eq!(out.switch, Some(Switch { from: Some(f.root), to: Some(peer) }));
        let id = endpoint_of(&f, ep);
        assert_eq!(f.kernel.endpoint(id).unwrap().senders().len(), 1);
        assert!(f.kernel.endpoint(id).unwrap().receivers().is_empty());

        let got = f.kernel.receive(CPU0, theirs, true).unwrap();
        assert_eq!(got.status, IpcStatus::Delivered);
        assert_eq!(f.kernel.message(peer).unwrap().data(), &[9]);
        assert_eq!(f.kernel.task_state(f.root), Ok(TaskState::Ready));
        assert!(!f.kernel.endpoint(id).unwrap().has_waiters());
    }

    #[test]
    fn non_blocking_without_partner_would_block() {
        let (mut f, _, ep, _) = pair();
        assert_eq!(f.kernel.send(CPU0, ep, false), Err(Error::WouldBlock));
        assert_eq!(f.kernel.receive(CPU0, ep, false), Err(Error::WouldBlock));
        assert_eq!(f.kernel.task_state(f.root), Ok(TaskState::Running));
    }

    #[test]
    fn rights_are_checked() {
        let (mut f, _, ep, _) = pair();
        let recv_only = f.kernel.copy_with_rights(f.root, ep, EndpointRights::RECEIVE.bits()).unwrap();
        let send_only = f.kernel.copy_with_rights(f.root, ep, EndpointRights::SEND.bits()).unwrap();
        assert_eq!(f.kernel.send(CPU0, recv_only, false), Err(Error::PermissionDenied));
        assert_eq!(f.kernel.receive(CPU0, send_only, false), Err(Error::PermissionDenied));
        assert_eq!(f.kernel.send(CPU0, f.boot.task, false), Err(Error::TypeMismatch));
    }

    #[test]
    fn senders_are_served_in_arrival_order() {
        let (mut f, first, ep, first_ep) = pair();
        let (second, _) = f.spawn().unwrap();
        let second_ep = f.share(second, ep).unwrap();

        for (task, index, word) in [(first, first_ep, 1), (second, second_ep, 2)] {
            f.run(task).unwrap();
            f.kernel.set_message(task, MessageBuffer::from_data(&[word]).unwrap()).unwrap();
            f.kernel.send(CPU0, index, true).unwrap();
        }
        assert_eq!(f.kernel.current(CPU0), Some(f.root));

        f.kernel.receive(CPU0, ep, true).unwrap();
        assert_eq!(f.kernel.message(f.root).unwrap().data(), &[1]);
        f.kernel.receive(CPU0, ep, true).unwrap();
        assert_eq!(f.kernel.message(f.root).unwrap().data(), &[2]);
    }

    #[test]
    fn no_partner_in_the_other_queue_while_parked() {
        let (mut f, peer, ep, theirs) = pair();
        f.run(peer).unwrap();
        f.kernel.receive(CPU0, theirs, true).unwrap();
        let id = endpoint_of(&f, ep);
        let endpoint = f.kernel.endpoint(id).unwrap();
        assert!(endpoint.senders().is_empty() || endpoint.receivers().is_empty());
        assert_eq!(endpoint.receivers().head(), Some(peer));
    }
}
