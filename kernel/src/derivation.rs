//! Derivation chain maintenance
//!
//! The derivation tree is stored as a preorder doubly linked list through
//! [`Slot::prev`](crate::objects::Slot::prev)/`next` with a depth per slot.
//! Children are inserted directly after their parent, so a parent always
//! precedes its descendants and the subtree of `s` is the contiguous run
//! after `s` with depth greater than `depth(s)`.
//!
//! These helpers only splice links; callers own the capability contents and
//! the free list.

use alloc::vec::Vec;

use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::memory::Mmu;
use crate::objects::SlotRef;

impl<M: Mmu> Kernel<M> {
    /// Link `new` immediately after `anchor` with the given depth
    pub(crate) fn link_after(&mut self, anchor: SlotRef, new: SlotRef, depth: u16) {
        let next = self.slot(anchor).next;
        {
            let slot = self.slot_mut(new);
            debug_assert!(!slot.is_linked());
            slot.prev = Some(anchor);
            slot.next = next;
            slot.depth = depth;
        }
        if let Some(next) = next {
            self.slot_mut(next).prev = Some(new);
        }
        self.slot_mut(anchor).next = Some(new);
    }

    /// Link `new` immediately before `anchor` with the given depth
    pub(crate) fn link_before(&mut self, anchor: SlotRef, new: SlotRef, depth: u16) {
        let prev = self.slot(anchor).prev;
        {
            let slot = self.slot_mut(new);
            debug_assert!(!slot.is_linked());
            slot.prev = prev;
            slot.next = Some(anchor);
            slot.depth = depth;
        }
        if let Some(prev) = prev {
            self.slot_mut(prev).next = Some(new);
        }
        self.slot_mut(anchor).prev = Some(new);
    }

    /// Remove `at` from its chain, joining its neighbours
    pub(crate) fn unlink(&mut self, at: SlotRef) {
        let (prev, next) = {
            let slot = self.slot_mut(at);
            let links = (slot.prev, slot.next);
            slot.prev = None;
            slot.next = None;
            slot.depth = 0;
            links
        };
        if let Some(prev) = prev {
            self.slot_mut(prev).next = next;
        }
        if let Some(next) = next {
            self.slot_mut(next).prev = prev;
        }
    }

    /// Put `new` in `old`'s place in the chain, same links and depth
    pub(crate) fn replace_in_chain(&mut self, old: SlotRef, new: SlotRef) {
        let (prev, next, depth) = {
            let slot = self.slot_mut(old);
            let links = (slot.prev, slot.next, slot.depth);
            slot.prev = None;
            slot.next = None;
            slot.depth = 0;
            links
        };
        {
            let slot = self.slot_mut(new);
            slot.prev = prev;
            slot.next = next;
            slot.depth = depth;
        }
        if let Some(prev) = prev {
            self.slot_mut(prev).next = Some(new);
        }
        if let Some(next) = next {
            self.slot_mut(next).prev = Some(new);
        }
    }

    /// Whether `at` has at least one descendant
    pub(crate) fn has_children(&self, at: SlotRef) -> bool {
        let slot = self.slot(at);
        slot.next.is_some_and(|next| self.slot(next).depth > slot.depth)
    }

    /// Last slot of `at`'s subtree (`at` itself for a leaf)
    pub(crate) fn subtree_end(&self, at: SlotRef) -> SlotRef {
        let depth = self.slot(at).depth;
        let mut end = at;
        while let Some(next) = self.slot(end).next {
            if self.slot(next).depth <= depth {
                break;
            }
            end = next;
        }
        end
    }

    /// Descendants of `at` in chain order
    pub fn descendants(&self, at: SlotRef) -> Vec<SlotRef> {
        let depth = self.slot(at).depth;
        let mut out = Vec::new();
        let mut cursor = self.slot(at).next;
        while let Some(next) = cursor {
            let slot = self.slot(next);
            if slot.depth <= depth {
                break;
            }
            out.push(next);
            cursor = slot.next;
        }
        out
    }

    /// Add one level to every descendant of `at`
    ///
    /// Fails `Exhausted` without changes if any depth would overflow.
    pub(crate) fn deepen_subtree(&mut self, at: SlotRef) -> Result<()> {
        let below = self.descendants(at);
        if self.slot(at).depth == u16::MAX
            || below.iter().any(|&s| self.slot(s).depth >= u16::MAX - 1)
        {
            return Err(Error::Exhausted);
        }
        for s in below {
            self.slot_mut(s).depth += 1;
        }
        Ok(())
    }

    /// Whether another slot in `at`'s chain names the same object
    pub(crate) fn has_other_reference(&self, at: SlotRef) -> bool {
        let cap = self.slot(at).cap;
        let mut head = at;
        while let Some(prev) = self.slot(head).prev {
            head = prev;
        }
        let mut cursor = Some(head);
        while let Some(current) = cursor {
            let slot = self.slot(current);
            if current != at && slot.cap.same_object(&cap) {
                return true;
            }
            cursor = slot.next;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::MemoryFlags;
    use crate::testing::Fixture;

    /// Walk the chain through `at` checking link symmetry; returns it in order
    fn chain<M: Mmu>(k: &Kernel<M>, at: SlotRef) -> Vec<SlotRef> {
        let mut head = at;
        while let Some(prev) = k.slot(head).prev() {
            assert_eq!(k.slot(prev).next(), Some(head));
            head = prev;
        }
        let mut out = vec![head];
        while let Some(next) = k.slot(*out.last().unwrap()).next() {
            assert_eq!(k.slot(next).prev(), out.last().copied());
            out.push(next);
        }
        out
    }

    #[test]
    fn chain_stays_a_symmetric_preorder() {
        let mut f = Fixture::new().unwrap();
        let root = f.root;
        let memory = f.kernel.lookup(root, f.boot.memory).unwrap();

        let a = f.free().unwrap();
        f.kernel.create_memory_object(root, a, f.boot.memory, 1 << 14, 4096, MemoryFlags::RWX).unwrap();
        let ep = f.free().unwrap();
        f.kernel.create_endpoint_object(root, ep, a).unwrap();
        let copy = f.kernel.copy(root, ep).unwrap();
        let (child, _) = f.spawn().unwrap();
        let moved = f.kernel.delegate(child, root, copy).unwrap();
        let b = f.free().unwrap();
        f.kernel.create_memory_object(root, b, a, 4096, 4096, MemoryFlags::READ).unwrap();

        let order = chain(&f.kernel, memory);
        assert_eq!(order[0], memory);
        // Every slot after the first is deeper than the root of the tree
        for s in &order[1..] {
            assert!(f.kernel.slot(*s).depth() > f.kernel.slot(memory).depth());
        }
        // A parent precedes everything funded from it
        let pos = |s: SlotRef| order.iter().position(|&x| x == s).unwrap();
        let a_at = f.kernel.lookup(root, a).unwrap();
        let ep_at = f.kernel.lookup(root, ep).unwrap();
        let copy_at = f.kernel.lookup(root, copy).unwrap();
        let moved_at = f.kernel.lookup(child, moved).unwrap();
        let b_at = f.kernel.lookup(root, b).unwrap();
        assert!(pos(a_at) < pos(ep_at));
        assert!(pos(a_at) < pos(b_at));
        assert!(pos(copy_at) < pos(moved_at));
        assert_eq!(f.kernel.descendants(copy_at), vec![moved_at]);
        assert!(f.kernel.descendants(a_at).contains(&moved_at));
    }

    #[test]
    fn subtree_end_of_leaf_is_itself() {
        let mut f = Fixture::new().unwrap();
        let ep = f.endpoint().unwrap();
        let at = f.kernel.lookup(f.root, ep).unwrap();
        assert_eq!(f.kernel.subtree_end(at), at);
        assert!(!f.kernel.has_children(at));
        let memory = f.kernel.lookup(f.root, f.boot.memory).unwrap();
        assert_eq!(f.kernel.subtree_end(memory), at);
    }

    #[test]
    fn other_reference_tracks_copies() {
        let mut f = Fixture::new().unwrap();
        let ep = f.endpoint().unwrap();
        let at = f.kernel.lookup(f.root, ep).unwrap();
        assert!(!f.kernel.has_other_reference(at));
        f.kernel.copy(f.root, ep).unwrap();
        assert!(f.kernel.has_other_reference(at));
    }
}
