//! Capability transfer operations
//!
//! | operation  | effect on the derivation chain                              |
//! |------------|-------------------------------------------------------------|
//! | `transfer` | destination takes the source's place, source slot is freed  |
//! | `delegate` | destination becomes a child of the now-`Null` source        |
//! | `copy`     | sibling inserted just before the source, same depth         |
//! | `revoke`   | every descendant destroyed, deepest-last-first              |
//! | `destroy`  | a leaf's object is released and its slot freed              |
//!
//! Every operation locks the tasks it names (see
//! [`Kernel::with_tasks_locked`]) and checks liveness after locking.

use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::lock::LockOwner;
use crate::memory::Mmu;
use crate::objects::{CapIndex, Capability, SlotRef, TaskId};

impl<M: Mmu> Kernel<M> {
    /// Move the capability at `src_index` of `src` into a fresh slot of `dst`
    ///
    /// The destination keeps the source's derivation links and depth; the
    /// source slot is nulled and returned to `src`'s free list.
    pub fn transfer(&mut self, dst: TaskId, src: TaskId, src_index: CapIndex) -> Result<CapIndex> {
        let owner = LockOwner::task(src);
        self.with_tasks_locked(owner, src, dst, |k| {
            let from = k.lookup(src, src_index)?;
            k.slot(from).cap.ensure_movable()?;
            let to = k.alloc_slot(dst)?;
            let cap = core::mem::take(&mut k.slot_mut(from).cap);
            k.slot_mut(to).cap = cap;
            k.replace_in_chain(from, to);
            k.release_slot(src, from);
            log::debug!("transfer {:?} task {} -> task {}", cap.cap_type(), src, dst);
            k.slot_index(to)
        })
    }

    /// Move the capability at `src_index` of `src` into `dst`, leaving the
    /// source slot in the chain as its `Null` parent
    pub fn delegate(&mut self, dst: TaskId, src: TaskId, src_index: CapIndex) -> Result<CapIndex> {
        let from = self.lookup(src, src_index)?;
        let to = self.delegate_slot(LockOwner::task(src), dst, src, from)?;
        self.slot_index(to)
    }

    /// Slot-level delegate used by IPC message transfer
    pub(crate) fn delegate_slot(
        &mut self,
        owner: LockOwner,
        dst: TaskId,
        src: TaskId,
        from: SlotRef,
    ) -> Result<SlotRef> {
        self.with_tasks_locked(owner, src, dst, |k| {
            if k.slot_owner(from) != Some(src) {
                return Err(Error::NotFound);
            }
            k.slot(from).cap.ensure_movable()?;
            if k.task(dst)?.free_head.is_none() {
                return Err(Error::Exhausted);
            }
            k.deepen_subtree(from)?;
            let to = k.alloc_slot(dst)?;
            let cap = core::mem::take(&mut k.slot_mut(from).cap);
            k.slot_mut(to).cap = cap;
            let depth = k.slot(from).depth + 1;
            k.link_after(from, to, depth);
            log::debug!("delegate {:?} task {} -> task {}", cap.cap_type(), src, dst);
            Ok(to)
        })
    }

    /// Duplicate the Task or Endpoint capability at `index` with all its
    /// rights
    pub fn copy(&mut self, task: TaskId, index: CapIndex) -> Result<CapIndex> {
        self.copy_with_rights(task, index, u8::MAX)
    }

    /// Duplicate the Task or Endpoint capability at `index`, keeping only
    /// the rights in `mask`
    ///
    /// The copy lands in the same task and sits immediately before the
    /// source in the derivation chain, at the same depth.
    pub fn copy_with_rights(&mut self, task: TaskId, index: CapIndex, mask: u8) -> Result<CapIndex> {
        self.with_tasks_locked(LockOwner::task(task), task, task, |k| {
            let from = k.lookup(task, index)?;
            let cap = k.slot(from).cap;
            cap.ensure_movable()?;
            if !cap.is_copyable() {
                return Err(Error::NotImplemented);
            }
            let copy = cap.attenuate(mask)?;
            let to = k.alloc_slot(task)?;
            k.slot_mut(to).cap = copy;
            let depth = k.slot(from).depth;
            k.link_before(from, to, depth);
            k.slot_index(to)
        })
    }

    /// Destroy every descendant of the slot at `index`
    ///
    /// Works backwards from the end of the subtree so each destroyed slot is
    /// a leaf at that moment. The slot itself is left as it was, including a
    /// Memory capability's watermark. Stops at the first destructor that
    /// fails; descendants destroyed up to that point stay destroyed.
    pub fn revoke(&mut self, task: TaskId, index: CapIndex) -> Result<()> {
        let owner = LockOwner::task(task);
        self.with_tasks_locked(owner, task, task, |k| {
            let at = k.lookup(task, index)?;
            let mut destroyed = 0usize;
            loop {
                let end = k.subtree_end(at);
                if end == at {
                    break;
                }
                k.destroy_slot(owner, end)?;
                destroyed += 1;
            }
            log::debug!("task {}: revoked {} descendants of slot {}", task, destroyed, index);
            Ok(())
        })
    }

    /// Release the object behind the leaf capability at `index` and free
    /// the slot
    pub fn destroy(&mut self, task: TaskId, index: CapIndex) -> Result<()> {
        let owner = LockOwner::task(task);
        self.with_tasks_locked(owner, task, task, |k| {
            let at = k.lookup(task, index)?;
            if k.slot(at).cap.is_null() && !k.slot(at).is_linked() {
                return Err(Error::NotFound);
            }
            k.destroy_slot(owner, at)
        })
    }

    /// Destroy a chain leaf
    ///
    /// The slot reads `Zombie` while its destructor runs and gets its
    /// capability back if the destructor fails.
    pub(crate) fn destroy_slot(&mut self, owner: LockOwner, at: SlotRef) -> Result<()> {
        if self.has_children(at) {
            return Err(Error::IllegalState);
        }
        let cap = self.slot(at).cap;
        if cap == Capability::Zombie {
            return Err(Error::IllegalState);
        }
        let last_reference = !self.has_other_reference(at);
        self.slot_mut(at).cap = Capability::Zombie;
        if let Err(err) = self.release_object(owner, &cap, last_reference) {
            self.slot_mut(at).cap = cap;
            log::warn!("destroy {:?} at {:?} failed: {}", cap.cap_type(), at, err);
            return Err(err);
        }
        self.slot_mut(at).cap = Capability::Null;
        self.unlink(at);
        if let Some(holder) = self.slot_owner(at) {
            self.release_slot(holder, at);
        }
        Ok(())
    }

    /// Per-type destructor
    ///
    /// Only the last capability naming a task or endpoint tears the object
    /// down. Page tables, pages and cap spaces have no defined teardown yet
    /// and report `NotImplemented`.
    fn release_object(&mut self, owner: LockOwner, cap: &Capability, last_reference: bool) -> Result<()> {
        match cap {
            Capability::Null | Capability::Memory(_) | Capability::Id(_) => Ok(()),
            Capability::Task(t) => {
                if last_reference && self.is_live(t.task()) {
                    self.kill_task(t.task())?;
                }
                Ok(())
            }
            Capability::Endpoint(e) => {
                if !last_reference {
                    return Ok(());
                }
                let ep = e.endpoint();
                self.with_endpoint_locked(owner, ep, |k| {
                    if k.endpoints[ep.index()].has_waiters() {
                        return Err(Error::IllegalState);
                    }
                    k.endpoints[ep.index()].live = false;
                    Ok(())
                })
            }
            Capability::PageTable(_) | Capability::VirtPage(_) | Capability::CapSpace(_) => {
                Err(Error::NotImplemented)
            }
            Capability::Zombie => Err(Error::IllegalState),
        }
    }
}
