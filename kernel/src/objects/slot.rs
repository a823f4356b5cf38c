//! Capability slots
//!
//! A slot stores one [`Capability`] and its position in the derivation tree.
//! The tree is flattened into a preorder doubly linked list: every slot
//! records its `depth`, and the descendants of a slot are exactly the run of
//! slots that follow it with a greater depth.
//!
//! ```text
//! Memory(d0) -> Task(d1) -> Memory(d1) -> Endpoint(d2) -> Endpoint'(d3)
//!               \_leaf_/    \______ subtree of the second Memory ______/
//! ```
//!
//! Empty slots are threaded onto their owning task's free list through the
//! separate `free_prev`/`free_next` links, so a slot can leave the free list
//! from the middle when object creation targets a specific index.

use core::fmt;

use super::{CapSpaceId, Capability};

/// Flat capability index inside one task
pub type CapIndex = usize;

/// Location of a slot: cap space handle plus offset in that page
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotRef {
    pub space: CapSpaceId,
    pub offset: u32,
}

impl SlotRef {
    #[inline]
    #[must_use]
    pub const fn new(space: CapSpaceId, offset: u32) -> Self {
        Self { space, offset }
    }
}

impl fmt::Debug for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotRef({}:{})", self.space, self.offset)
    }
}

/// One capability plus its derivation and free-list links
#[derive(Debug, Clone, Default)]
pub struct Slot {
    pub(crate) cap: Capability,
    pub(crate) prev: Option<SlotRef>,
    pub(crate) next: Option<SlotRef>,
    pub(crate) depth: u16,
    pub(crate) free: bool,
    pub(crate) free_prev: Option<SlotRef>,
    pub(crate) free_next: Option<SlotRef>,
}

impl Slot {
    #[inline]
    pub fn cap(&self) -> &Capability {
        &self.cap
    }

    /// Previous slot in derivation order
    #[inline]
    pub fn prev(&self) -> Option<SlotRef> {
        self.prev
    }

    /// Next slot in derivation order
    #[inline]
    pub fn next(&self) -> Option<SlotRef> {
        self.next
    }

    /// Depth in the derivation tree (roots are 0)
    #[inline]
    pub fn depth(&self) -> u16 {
        self.depth
    }

    /// Whether the slot sits on its task's free list
    #[inline]
    pub fn is_free(&self) -> bool {
        self.free
    }

    /// Whether the slot participates in a derivation chain
    #[inline]
    pub fn is_linked(&self) -> bool {
        self.prev.is_some() || self.next.is_some()
    }
}
