//! Kernel configuration
//!
//! Compile-time layout constants plus the runtime [`KernelConfig`] handed to
//! [`Kernel::new`](crate::Kernel::new) by the platform layer.

use static_assertions::const_assert;

use crate::error::{Error, Result};

/// Size of a page, cap space, task object and page-table object
pub const PAGE_SIZE: usize = 4096;

/// log2(PAGE_SIZE)
pub const PAGE_SHIFT: u32 = 12;

/// Entries per page table (Sv39-style 9-bit index per level)
pub const PT_ENTRIES: usize = 512;

/// Highest page-table level. Level 0 tables hold 4 KiB leaves, the root is
/// at this level.
pub const MAX_MAP_LEVEL: u8 = 2;

/// Slots stored in one cap space page
pub const SLOTS_PER_CAP_SPACE: usize = 64;

/// Words in the short message buffer of every task
pub const MSG_WORDS: usize = 8;

/// Virtual base of the capability window in every task's address space.
/// Each window segment spans one leaf table (2 MiB).
pub const CAP_WINDOW_BASE: u64 = 0x20_0000_0000;

/// Bytes carved out of a Memory capability for one endpoint
pub const ENDPOINT_OBJECT_SIZE: u64 = 64;

/// Bytes carved out of a Memory capability for one Id token
pub const ID_OBJECT_SIZE: u64 = 16;

/// Bytes covered by one window segment
pub const WINDOW_SEGMENT_SIZE: u64 = (PAGE_SIZE * PT_ENTRIES) as u64;

const_assert!(1 << PAGE_SHIFT == PAGE_SIZE);
const_assert!(CAP_WINDOW_BASE % WINDOW_SEGMENT_SIZE == 0);
const_assert!(SLOTS_PER_CAP_SPACE.is_power_of_two());
const_assert!(MSG_WORDS <= u8::MAX as usize);

/// Runtime kernel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Execution units, each gets its own scheduler context
    pub cpus: usize,
    /// Size of the task arena. Every entry starts `Unused`.
    pub max_tasks: usize,
    /// Cap spaces addressable through one window segment
    pub spaces_per_window: usize,
    /// How many times a task's window may be extended
    pub max_extensions: u8,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            cpus: 1,
            max_tasks: 64,
            spaces_per_window: PT_ENTRIES,
            max_extensions: 3,
        }
    }
}

impl KernelConfig {
    /// Reject configurations the kernel cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.cpus == 0 || self.max_tasks == 0 || self.max_tasks > u32::MAX as usize {
            return Err(Error::IllegalArgument);
        }
        if self.spaces_per_window == 0 || self.spaces_per_window > PT_ENTRIES {
            return Err(Error::IllegalArgument);
        }
        Ok(())
    }

    /// Cap spaces a task may hold after `extensions` window extensions
    #[inline]
    pub const fn space_limit(&self, extensions: u8) -> usize {
        self.spaces_per_window * (1 + extensions as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert_eq!(KernelConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_bad_values() {
        let base = KernelConfig::default();
        assert_eq!(KernelConfig { cpus: 0, ..base }.validate(), Err(Error::IllegalArgument));
        assert_eq!(KernelConfig { max_tasks: 0, ..base }.validate(), Err(Error::IllegalArgument));
        assert_eq!(
            KernelConfig { spaces_per_window: PT_ENTRIES + 1, ..base }.validate(),
            Err(Error::IllegalArgument)
        );
    }

    #[test]
    fn space_limit_grows_with_extensions() {
        let cfg = KernelConfig { spaces_per_window: 2, ..KernelConfig::default() };
        assert_eq!(cfg.space_limit(0), 2);
        assert_eq!(cfg.space_limit(3), 8);
    }
}
