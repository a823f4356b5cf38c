//! Keel kernel core
//!
//! The platform-independent heart of a capability microkernel: capability
//! spaces with a derivation tree, object creation from untyped memory,
//! per-CPU cooperative scheduling and synchronous endpoint IPC. Hardware
//! sits behind two small collaborators, [`Mmu`](memory::Mmu) and
//! [`PageAllocator`](memory::PageAllocator); [`SoftMmu`](memory::SoftMmu)
//! implements the former in software for hosted use and tests.
//!
//! # Architecture
//!
//! - `objects`: capability values, slots, tasks, endpoints and their handles
//! - `kernel`: the [`Kernel`] arenas and locking helpers
//! - `cspace`, `derivation`, `transfer`, `retype`: capability management
//! - `scheduler`: ready queues, task states and [`Switch`] descriptors
//! - `ipc`: send, receive, call and reply over endpoints
//! - `syscall`: numeric system-call dispatch
//! - `boot`: root task construction
//!
//! # Example
//!
//! ```rust,ignore
//! let mut kernel = Kernel::new(KernelConfig::default(), SoftMmu::new(tables))?;
//! let boot = kernel.bootstrap(&mut frames, MemoryRegion::new(base, 24), MemoryFlags::RWX)?;
//! kernel.switch_to(CpuId(0), boot.root_task)?;
//! ```

#![no_std]

extern crate alloc;

#[cfg(test)]
#[macro_use]
extern crate std;

pub mod boot;
pub mod config;
pub mod cspace;
pub mod debug;
pub mod derivation;
pub mod error;
pub mod ipc;
pub mod kernel;
pub mod lock;
pub mod memory;
pub mod objects;
pub mod retype;
pub mod scheduler;
pub mod syscall;
pub mod task_ops;
pub mod transfer;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use boot::{BootInfo, MemoryRegion};
pub use config::KernelConfig;
pub use error::{Error, Result};
pub use ipc::{IpcOutcome, IpcStatus, MessageBuffer};
pub use kernel::{GlobalMapping, Kernel};
pub use retype::TaskArgs;
pub use scheduler::{CpuId, Switch};
pub use syscall::{SyscallArgs, SyscallReturn};
