//! Locks
//!
//! Two flavours are used by the kernel:
//!
//! - `spin::Mutex` for structures with a single short critical section
//!   (per-CPU ready queues).
//! - [`ReentrantLock`] for tasks and endpoints. It remembers its owner and a
//!   recursion depth, so an IPC path that already holds a task's lock can call
//!   into capability transfer, which takes the same lock again.
//!
//! ## Ownership encoding
//!
//! ```text
//! owner word:  0                      unlocked
//!              gen[62:32] | index+1   task owner
//!              1 << 63 | cpu          kernel context of a CPU (no current task)
//! ```

use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::objects::TaskId;
use crate::scheduler::CpuId;

const UNLOCKED: u64 = 0;
const CPU_OWNER_BIT: u64 = 1 << 63;

/// Identity of a lock holder
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockOwner(u64);

impl LockOwner {
    /// Owner identity of a task
    #[must_use]
    pub const fn task(id: TaskId) -> Self {
        let generation = (id.generation() as u64 & 0x7fff_ffff) << 32;
        Self(generation | (id.index() as u64 + 1))
    }

    /// Owner identity of a CPU running kernel code on nobody's behalf
    #[must_use]
    pub const fn cpu(cpu: CpuId) -> Self {
        Self(CPU_OWNER_BIT | cpu.0 as u64)
    }

    #[inline]
    const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 & CPU_OWNER_BIT != 0 {
            write!(f, "LockOwner(cpu {})", self.0 & !CPU_OWNER_BIT)
        } else {
            write!(f, "LockOwner(task {})", (self.0 & 0xffff_ffff) - 1)
        }
    }
}

/// Owner-aware spin lock that the holder may re-enter
pub struct ReentrantLock {
    owner: AtomicU64,
    depth: AtomicU32,
}

impl ReentrantLock {
    pub const fn new() -> Self {
        Self {
            owner: AtomicU64::new(UNLOCKED),
            depth: AtomicU32::new(0),
        }
    }

    /// Spin until `owner` holds the lock
    pub fn acquire(&self, owner: LockOwner) {
        while !self.try_acquire(owner) {
            core::hint::spin_loop();
        }
    }

    /// Take the lock if it is free or already held by `owner`
    pub fn try_acquire(&self, owner: LockOwner) -> bool {
        if self.owner.load(Ordering::Relaxed) == owner.raw() {
            // Only the holder touches `depth` while the lock is held.
            self.depth.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        match self
            .owner
            .compare_exchange(UNLOCKED, owner.raw(), Ordering::Acquire, Ordering::Relaxed)
        {
            Ok(_) => {
                self.depth.store(1, Ordering::Relaxed);
                true
            }
            Err(_) => false,
        }
    }

    /// Drop one level of recursion, unlocking at depth zero
    ///
    /// Panics if `owner` does not hold the lock: releasing someone else's lock
    /// means kernel state is already corrupt.
    pub fn release(&self, owner: LockOwner) {
        if self.owner.load(Ordering::Relaxed) != owner.raw() {
            log::error!("lock released by {:?} which does not hold it", owner);
            panic!("reentrant lock released by non-owner");
        }
        if self.depth.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.owner.store(UNLOCKED, Ordering::Release);
        }
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.owner.load(Ordering::Relaxed) != UNLOCKED
    }

    #[inline]
    pub fn is_held_by(&self, owner: LockOwner) -> bool {
        self.owner.load(Ordering::Relaxed) == owner.raw()
    }

    /// Current recursion depth (0 when unlocked)
    #[inline]
    pub fn depth(&self) -> u32 {
        if self.is_locked() {
            self.depth.load(Ordering::Relaxed)
        } else {
            0
        }
    }
}

impl Default for ReentrantLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReentrantLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrantLock")
            .field("locked", &self.is_locked())
            .field("depth", &self.depth())
            .finish()
    }
}
