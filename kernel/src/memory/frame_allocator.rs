//! Physical frame allocator
//!
//! A bitmap over one contiguous region of 4 KiB frames. It backs the
//! [`PageAllocator`] collaborator used at bootstrap and the intermediate
//! tables of [`SoftMmu`](super::SoftMmu).
//!
//! # Implementation Notes
//! - Each bit represents one frame, 1 = allocated, 0 = free
//! - O(n) allocation (scan for the first free frame)

use alloc::vec;
use alloc::vec::Vec;

use super::{PageAllocator, PhysAddr};
use crate::config::PAGE_SIZE;

/// Bitmap frame allocator over `[base, base + frames * PAGE_SIZE)`
#[derive(Debug, Clone)]
pub struct FrameAllocator {
    bitmap: Vec<u64>,
    base: PhysAddr,
    total_frames: usize,
    free_frames: usize,
}

impl FrameAllocator {
    /// Manage `frames` frames starting at the page-aligned `base`
    pub fn new(base: PhysAddr, frames: usize) -> Self {
        debug_assert!(base.is_aligned(PAGE_SIZE as u64));
        Self {
            bitmap: vec![0; frames.div_ceil(64)],
            base,
            total_frames: frames,
            free_frames: frames,
        }
    }

    /// Mark a byte range as allocated (kernel image, boot data)
    pub fn reserve_region(&mut self, start: PhysAddr, size: u64) {
        let Some(first) = self.frame_of(start) else { return };
        let count = size.div_ceil(PAGE_SIZE as u64) as usize;
        for frame in first..(first + count).min(self.total_frames) {
            if self.is_free(frame) {
                self.mark_allocated(frame);
                self.free_frames -= 1;
            }
        }
    }

    pub fn free_frames(&self) -> usize {
        self.free_frames
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    fn frame_of(&self, addr: PhysAddr) -> Option<usize> {
        let offset = addr.as_u64().checked_sub(self.base.as_u64())?;
        let frame = (offset / PAGE_SIZE as u64) as usize;
        (frame < self.total_frames).then_some(frame)
    }

    #[inline]
    fn is_free(&self, frame: usize) -> bool {
        self.bitmap[frame / 64] & (1u64 << (frame % 64)) == 0
    }

    #[inline]
    fn mark_allocated(&mut self, frame: usize) {
        self.bitmap[frame / 64] |= 1u64 << (frame % 64);
    }

    #[inline]
    fn mark_free(&mut self, frame: usize) {
        self.bitmap[frame / 64] &= !(1u64 << (frame % 64));
    }
}

impl PageAllocator for FrameAllocator {
    fn allocate_page(&mut self) -> Option<PhysAddr> {
        if self.free_frames == 0 {
            return None;
        }
        for (chunk_idx, &chunk) in self.bitmap.iter().enumerate() {
            if chunk == !0 {
                continue;
            }
            let frame = chunk_idx * 64 + (!chunk).trailing_zeros() as usize;
            if frame >= self.total_frames {
                return None;
            }
            self.mark_allocated(frame);
            self.free_frames -= 1;
            return self.base.checked_add((frame * PAGE_SIZE) as u64);
        }
        None
    }

    fn free_page(&mut self, page: PhysAddr) {
        if let Some(frame) = self.frame_of(page) {
            if !self.is_free(frame) {
                self.mark_free(frame);
                self.free_frames += 1;
            }
        }
    }
}
