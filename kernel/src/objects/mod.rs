//! Kernel Object Model
//!
//! All kernel resources live in arenas owned by [`Kernel`](crate::Kernel) and
//! are named by typed handles. A handle is only an index: whoever holds a
//! [`Capability`] containing it may use the object, nobody else can.
//!
//! ## Object Types
//!
//! - **Memory**: untyped memory that object creation carves into objects
//! - **Task**: unit of execution and capability ownership
//! - **Endpoint**: synchronous IPC rendezvous point
//! - **PageTable** / **VirtPage**: address-space building blocks
//! - **CapSpace**: one page of capability slots
//! - **Id**: an unforgeable token compared by value
//!
//! ## Ownership
//!
//! ```text
//! Kernel ──owns──> tasks[] / cap_spaces[] / endpoints[] / page_tables[]
//! Slot.prev/next, TaskList links, Task.caller  ──refer to──> (no ownership)
//! ```

use core::fmt;

pub mod cap_space;
pub mod capability;
pub mod endpoint;
pub mod page_table;
pub mod slot;
pub mod task;
pub mod task_list;

pub use cap_space::CapSpace;
pub use capability::{
    CapSpaceCap, CapType, Capability, EndpointCap, EndpointRights, IdCap, MemoryCap, MemoryFlags,
    PageTableCap, TaskCap, TaskRights, VirtPageCap,
};
pub use endpoint::Endpoint;
pub use page_table::PageTable;
pub use slot::{CapIndex, Slot, SlotRef};
pub use task::{Blocked, Registers, Task, TaskId, TaskState};
pub use task_list::{Link, TaskList};

/// Declares an arena index handle
macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            #[inline]
            #[must_use]
            pub const fn new(index: u32) -> Self {
                Self(index)
            }

            #[inline]
            #[must_use]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

arena_id!(
    /// Handle to a cap space page
    CapSpaceId
);

arena_id!(
    /// Handle to an endpoint
    EndpointId
);

arena_id!(
    /// Handle to a page-table object
    PageTableId
);
