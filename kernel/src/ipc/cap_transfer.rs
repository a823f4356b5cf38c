//! Capability transfer through IPC
//!
//! Each capability named in the sender's message is delegated into a fresh
//! slot of the receiver: the receiver's copy becomes a child of the sender's
//! slot, which is left `Null`. The receiver sees its own indices in place of
//! the sender's.
//!
//! The whole message moves or nothing does. Every index is resolved and
//! checked, and the receiver's free slots counted, before the first
//! capability leaves the sender.

use alloc::vec::Vec;

use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::lock::LockOwner;
use crate::memory::Mmu;
use crate::objects::{SlotRef, TaskId};

impl<M: Mmu> Kernel<M> {
    /// Copy `src`'s message into `dst`, moving any capabilities it names
    pub(crate) fn transfer_message(&mut self, owner: LockOwner, dst: TaskId, src: TaskId) -> Result<()> {
        self.with_tasks_locked(owner, dst, src, |k| {
            let msg = k.task(src)?.msg.clone();
            if msg.cap_count() == 0 {
                k.task_entry(dst).msg = msg;
                return Ok(());
            }

            let mut staged: Vec<SlotRef> = Vec::with_capacity(msg.cap_count());
            for &index in msg.cap_indices() {
                let at = k.lookup(src, index as usize)?;
                k.slot(at).cap.ensure_movable()?;
                if staged.contains(&at) {
                    return Err(Error::IllegalArgument);
                }
                staged.push(at);
            }
            if k.task(dst)?.free_count < staged.len() {
                log::warn!(
                    "ipc: task {} has {} free slots for {} capabilities",
                    dst,
                    k.task(dst)?.free_count,
                    staged.len()
                );
                return Err(Error::Exhausted);
            }

            let mut indices = Vec::with_capacity(staged.len());
            for from in staged {
                let to = k.delegate_slot(owner, dst, src, from)?;
                indices.push(k.slot_index(to)? as u64);
            }
            k.task_entry(dst).msg = msg.with_rewritten_caps(&indices);
            log::debug!("ipc: moved {} capabilities task {} -> task {}", indices.len(), src, dst);
            Ok(())
        })
    }
}
