//! Cap space pages
//!
//! One page of [`SLOTS_PER_CAP_SPACE`] slots. A cap space is created unowned
//! by object creation and becomes part of a task's flat index space when
//! inserted; it never moves afterwards.

use alloc::vec::Vec;

use super::{Slot, TaskId};
use crate::config::SLOTS_PER_CAP_SPACE;
use crate::memory::PhysAddr;

#[derive(Debug)]
pub struct CapSpace {
    phys: PhysAddr,
    pub(crate) owner: Option<TaskId>,
    /// Position of this page in the owner's numbering
    pub(crate) number: usize,
    pub(crate) slots: Vec<Slot>,
}

impl CapSpace {
    pub(crate) fn new(phys: PhysAddr) -> Self {
        let mut slots = Vec::with_capacity(SLOTS_PER_CAP_SPACE);
        slots.resize_with(SLOTS_PER_CAP_SPACE, Slot::default);
        Self { phys, owner: None, number: 0, slots }
    }

    #[inline]
    pub fn phys(&self) -> PhysAddr {
        self.phys
    }

    #[inline]
    pub fn owner(&self) -> Option<TaskId> {
        self.owner
    }

    #[inline]
    pub fn number(&self) -> usize {
        self.number
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }
}
