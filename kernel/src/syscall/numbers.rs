//! System call numbers
//!
//! A number is `namespace << 8 | operation`. Arguments travel in six
//! registers; capability indices are flat indices into the calling task's
//! capability window.

pub const NS_CAP: u64 = 0x01;
pub const NS_OBJECT: u64 = 0x02;
pub const NS_TASK: u64 = 0x03;
pub const NS_IPC: u64 = 0x04;

/// Compose a system call number
pub const fn syscall(namespace: u64, op: u64) -> u64 {
    namespace << 8 | op
}

// Capability space: (args) -> value

/// (dst task cap, src index) -> index in the destination
pub const CAP_TRANSFER: u64 = syscall(NS_CAP, 0x01);
/// (dst task cap, src index) -> index in the destination
pub const CAP_DELEGATE: u64 = syscall(NS_CAP, 0x02);
/// (index, rights mask) -> index of the copy
pub const CAP_COPY: u64 = syscall(NS_CAP, 0x03);
/// (index)
pub const CAP_REVOKE: u64 = syscall(NS_CAP, 0x04);
/// (index)
pub const CAP_DESTROY: u64 = syscall(NS_CAP, 0x05);
/// (cap space cap)
pub const CAP_INSERT_SPACE: u64 = syscall(NS_CAP, 0x06);
/// (level-0 page table cap)
pub const CAP_EXTEND_WINDOW: u64 = syscall(NS_CAP, 0x07);
/// (index) -> capability type tag
pub const CAP_TYPE: u64 = syscall(NS_CAP, 0x08);

// Object creation: every call takes (dest, memory src, ...) -> dest

/// (dest, src, size, align, flags)
pub const CREATE_MEMORY: u64 = syscall(NS_OBJECT, 0x01);
/// (dest, src, cap space cap, root table cap, window table cap)
pub const CREATE_TASK: u64 = syscall(NS_OBJECT, 0x02);
/// (dest, src, level)
pub const CREATE_PAGE_TABLE: u64 = syscall(NS_OBJECT, 0x03);
/// (dest, src, level, flags)
pub const CREATE_VIRT_PAGE: u64 = syscall(NS_OBJECT, 0x04);
/// (dest, src)
pub const CREATE_CAP_SPACE: u64 = syscall(NS_OBJECT, 0x05);
/// (dest, src)
pub const CREATE_ENDPOINT: u64 = syscall(NS_OBJECT, 0x06);
/// (dest, src)
pub const CREATE_ID: u64 = syscall(NS_OBJECT, 0x07);

// Tasks

/// (task cap)
pub const TASK_KILL: u64 = syscall(NS_TASK, 0x01);
/// (task cap)
pub const TASK_SUSPEND: u64 = syscall(NS_TASK, 0x02);
/// (task cap)
pub const TASK_RESUME: u64 = syscall(NS_TASK, 0x03);
/// (task cap)
pub const TASK_SWITCH: u64 = syscall(NS_TASK, 0x04);
/// (task cap, register) -> value
pub const TASK_READ_REGISTER: u64 = syscall(NS_TASK, 0x05);
/// (task cap, register, value)
pub const TASK_WRITE_REGISTER: u64 = syscall(NS_TASK, 0x06);
/// ()
pub const TASK_YIELD: u64 = syscall(NS_TASK, 0x07);
/// ()
pub const TASK_WAIT: u64 = syscall(NS_TASK, 0x08);

// IPC: (endpoint cap, ...) -> message header of the caller afterwards

/// (endpoint cap, blocking)
pub const IPC_SEND: u64 = syscall(NS_IPC, 0x01);
/// (endpoint cap, blocking)
pub const IPC_RECEIVE: u64 = syscall(NS_IPC, 0x02);
/// (endpoint cap)
pub const IPC_CALL: u64 = syscall(NS_IPC, 0x03);
/// (endpoint cap)
pub const IPC_REPLY: u64 = syscall(NS_IPC, 0x04);
/// (endpoint cap)
pub const IPC_REPLY_RECEIVE: u64 = syscall(NS_IPC, 0x05);
