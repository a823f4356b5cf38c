//! Endpoint objects
//!
//! An endpoint pairs blocked senders with blocked receivers. Both queues are
//! intrusive [`TaskList`]s threaded through each task's wait links.
//!
//! ## Invariant
//!
//! At most one queue is non-empty: an arriving sender either finds a receiver
//! or queues itself, and symmetrically for receivers. Observing both queues
//! populated means kernel state is corrupt, and [`Endpoint::check_invariant`]
//! panics.

use super::TaskList;
use crate::lock::ReentrantLock;
use crate::memory::PhysAddr;

#[derive(Debug)]
pub struct Endpoint {
    phys: PhysAddr,
    pub(crate) lock: ReentrantLock,
    pub(crate) senders: TaskList,
    pub(crate) receivers: TaskList,
    pub(crate) live: bool,
}

impl Endpoint {
    pub(crate) fn new(phys: PhysAddr) -> Self {
        Self {
            phys,
            lock: ReentrantLock::new(),
            senders: TaskList::new(),
            receivers: TaskList::new(),
            live: true,
        }
    }

    #[inline]
    pub fn phys(&self) -> PhysAddr {
        self.phys
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        self.live
    }

    #[inline]
    pub fn senders(&self) -> &TaskList {
        &self.senders
    }

    #[inline]
    pub fn receivers(&self) -> &TaskList {
        &self.receivers
    }

    /// True if any task is parked here
    #[inline]
    pub fn has_waiters(&self) -> bool {
        !self.senders.is_empty() || !self.receivers.is_empty()
    }

    pub(crate) fn check_invariant(&self) {
        if !self.senders.is_empty() && !self.receivers.is_empty() {
            log::error!(
                "endpoint {:?} has {} senders and {} receivers queued",
                self.phys,
                self.senders.len(),
                self.receivers.len()
            );
            panic!("endpoint with both queues non-empty");
        }
    }
}
