//! Page-table objects

use crate::memory::PhysAddr;

/// A page-table page carved from untyped memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTable {
    phys: PhysAddr,
    level: u8,
}

impl PageTable {
    pub(crate) fn new(phys: PhysAddr, level: u8) -> Self {
        Self { phys, level }
    }

    #[inline]
    pub fn phys(&self) -> PhysAddr {
        self.phys
    }

    #[inline]
    pub fn level(&self) -> u8 {
        self.level
    }
}
