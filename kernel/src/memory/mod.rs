//! Memory collaborators
//!
//! The kernel core consumes physical memory and page tables only through the
//! two traits re-exported here:
//! - [`PageAllocator`]: fixed-size page allocator used at bootstrap
//! - [`Mmu`]: map/unmap/walk over a task's page tables

pub mod address;
pub mod frame_allocator;
pub mod paging;

pub use address::{PhysAddr, VirtAddr};
pub use frame_allocator::FrameAllocator;
pub use paging::{MapFlags, Mmu, Pte, SoftMmu};

/// Source of whole physical pages
pub trait PageAllocator {
    /// A fresh page, or `None` when memory is exhausted
    fn allocate_page(&mut self) -> Option<PhysAddr>;

    /// Return a page obtained from `allocate_page`
    fn free_page(&mut self, page: PhysAddr);
}
