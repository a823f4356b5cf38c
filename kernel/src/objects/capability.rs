//! Capability values
//!
//! A [`Capability`] is a tagged variant. Every non-`Null` variant wraps a
//! struct whose fields are private to this crate, so code outside the kernel
//! can inspect capabilities but never mint one. Inside the kernel only object
//! creation and bootstrap call the `pub(crate)` constructors.
//!
//! ## Layout
//!
//! Typed handles replace raw object addresses. The largest payload is three
//! words, so a capability fits in four machine words including the tag:
//!
//! ```text
//! Memory    base | used | size_class, flags
//! Task      TaskId | rights
//! Endpoint  EndpointId | rights
//! PageTable PageTableId, level, mapped | phys | vbase
//! VirtPage  phys | vaddr | level, flags, mapped
//! CapSpace  CapSpaceId | phys
//! Id        a | b
//! ```

use core::mem::size_of;

use bitflags::bitflags;
use static_assertions::const_assert;

use super::{CapSpaceId, EndpointId, PageTableId, TaskId};
use crate::error::{Error, Result};
use crate::memory::{PhysAddr, VirtAddr};

bitflags! {
    /// Access flags of Memory and VirtPage capabilities
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryFlags: u8 {
        /// Device memory (MMIO), inherited by everything carved from it
        const DEVICE  = 1 << 0;
        const READ    = 1 << 1;
        const WRITE   = 1 << 2;
        const EXECUTE = 1 << 3;

        const RWX = Self::READ.bits() | Self::WRITE.bits() | Self::EXECUTE.bits();
    }
}

bitflags! {
    /// Rights carried by a Task capability
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TaskRights: u8 {
        const KILL        = 1 << 0;
        const SWITCH      = 1 << 1;
        const SUSPEND     = 1 << 2;
        const RESUME      = 1 << 3;
        const GET_REGS    = 1 << 4;
        const SET_REGS    = 1 << 5;
        const KILL_NOTIFY = 1 << 6;
    }
}

bitflags! {
    /// Rights carried by an Endpoint capability
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EndpointRights: u8 {
        const SEND    = 1 << 0;
        const RECEIVE = 1 << 1;
    }
}

/// Capability tag, stable across the system-call boundary
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapType {
    Null = 0,
    Memory = 1,
    Task = 2,
    Endpoint = 3,
    PageTable = 4,
    VirtPage = 5,
    CapSpace = 6,
    Id = 7,
    Zombie = 8,
}

/// Untyped memory region `[base, base + 2^size_class)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryCap {
    base: PhysAddr,
    used: u64,
    size_class: u8,
    flags: MemoryFlags,
}

/// Result of a successful carve, applied with [`MemoryCap::commit_carve`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Carve {
    pub start: PhysAddr,
    pub size: u64,
    pub used: u64,
    pub flags: MemoryFlags,
}

impl MemoryCap {
    /// Caller guarantees `size_class < 64`
    pub(crate) fn new(base: PhysAddr, size_class: u8, flags: MemoryFlags) -> Self {
        debug_assert!(size_class < 64);
        Self { base, used: 0, size_class, flags }
    }

    #[inline]
    pub fn base(&self) -> PhysAddr {
        self.base
    }

    #[inline]
    pub fn size_class(&self) -> u8 {
        self.size_class
    }

    #[inline]
    pub fn size(&self) -> u64 {
        1u64 << self.size_class
    }

    /// Bytes already carved out (the watermark)
    #[inline]
    pub fn used(&self) -> u64 {
        self.used
    }

    #[inline]
    pub fn remaining(&self) -> u64 {
        self.size() - self.used
    }

    #[inline]
    pub fn flags(&self) -> MemoryFlags {
        self.flags
    }

    #[inline]
    pub fn is_device(&self) -> bool {
        self.flags.contains(MemoryFlags::DEVICE)
    }

    /// Plan carving `size` bytes aligned to `align` with access `flags`
    ///
    /// Nothing changes until [`commit_carve`](Self::commit_carve). Fails with
    /// `IllegalArgument` for a size or alignment that is not a power of two,
    /// `PermissionDenied` if `flags` asks for access this region lacks, and
    /// `Exhausted` if the aligned range does not fit in the remaining space.
    pub(crate) fn plan_carve(&self, size: u64, align: u64, flags: MemoryFlags) -> Result<Carve> {
        if !size.is_power_of_two() || !align.is_power_of_two() {
            return Err(Error::IllegalArgument);
        }
        let requested = flags & MemoryFlags::RWX;
        if !self.flags.contains(requested) {
            return Err(Error::PermissionDenied);
        }
        let end_of_region = self.base.checked_add(self.size()).ok_or(Error::Exhausted)?;
        let start = self
            .base
            .checked_add(self.used)
            .and_then(|a| a.checked_align_up(align))
            .ok_or(Error::Exhausted)?;
        let end = start.checked_add(size).ok_or(Error::Exhausted)?;
        if end.as_u64() > end_of_region.as_u64() {
            return Err(Error::Exhausted);
        }
        Ok(Carve {
            start,
            size,
            used: end.as_u64() - self.base.as_u64(),
            flags: requested | (self.flags & MemoryFlags::DEVICE),
        })
    }

    pub(crate) fn commit_carve(&mut self, carve: &Carve) {
        debug_assert!(carve.used > self.used && carve.used <= self.size());
        self.used = carve.used;
    }
}

/// Task capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskCap {
    task: TaskId,
    rights: TaskRights,
}

impl TaskCap {
    pub(crate) fn new(task: TaskId, rights: TaskRights) -> Self {
        Self { task, rights }
    }

    #[inline]
    pub fn task(&self) -> TaskId {
        self.task
    }

    #[inline]
    pub fn rights(&self) -> TaskRights {
        self.rights
    }
}

/// Endpoint capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointCap {
    endpoint: EndpointId,
    rights: EndpointRights,
}

impl EndpointCap {
    pub(crate) fn new(endpoint: EndpointId, rights: EndpointRights) -> Self {
        Self { endpoint, rights }
    }

    #[inline]
    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    #[inline]
    pub fn rights(&self) -> EndpointRights {
        self.rights
    }
}

/// Page-table capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableCap {
    table: PageTableId,
    level: u8,
    mapped: bool,
    phys: PhysAddr,
    vbase: VirtAddr,
}

impl PageTableCap {
    pub(crate) fn new(table: PageTableId, phys: PhysAddr, level: u8) -> Self {
        Self { table, level, mapped: false, phys, vbase: VirtAddr::new(0) }
    }

    #[inline]
    pub fn table(&self) -> PageTableId {
        self.table
    }

    #[inline]
    pub fn level(&self) -> u8 {
        self.level
    }

    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    #[inline]
    pub fn phys(&self) -> PhysAddr {
        self.phys
    }

    /// Virtual base this table translates, meaningful once mapped
    #[inline]
    pub fn vbase(&self) -> VirtAddr {
        self.vbase
    }

    pub(crate) fn set_mapped(&mut self, vbase: VirtAddr) {
        self.mapped = true;
        self.vbase = vbase;
    }
}

/// Virtual page capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtPageCap {
    phys: PhysAddr,
    vaddr: VirtAddr,
    level: u8,
    flags: MemoryFlags,
    mapped: bool,
}

impl VirtPageCap {
    pub(crate) fn new(phys: PhysAddr, level: u8, flags: MemoryFlags) -> Self {
        Self { phys, vaddr: VirtAddr::new(0), level, flags, mapped: false }
    }

    #[inline]
    pub fn phys(&self) -> PhysAddr {
        self.phys
    }

    #[inline]
    pub fn vaddr(&self) -> VirtAddr {
        self.vaddr
    }

    #[inline]
    pub fn level(&self) -> u8 {
        self.level
    }

    #[inline]
    pub fn flags(&self) -> MemoryFlags {
        self.flags
    }

    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    /// Size of the page: 4 KiB at level 0, times 512 per level
    #[inline]
    pub fn size(&self) -> u64 {
        page_size_at(self.level)
    }
}

/// Cap space capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapSpaceCap {
    space: CapSpaceId,
    phys: PhysAddr,
}

impl CapSpaceCap {
    pub(crate) fn new(space: CapSpaceId, phys: PhysAddr) -> Self {
        Self { space, phys }
    }

    #[inline]
    pub fn space(&self) -> CapSpaceId {
        self.space
    }

    #[inline]
    pub fn phys(&self) -> PhysAddr {
        self.phys
    }
}

/// Unforgeable token. Two Id capabilities name the same token iff both
/// values match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdCap {
    a: u64,
    b: u64,
}

impl IdCap {
    pub(crate) fn new(a: u64, b: u64) -> Self {
        Self { a, b }
    }

    #[inline]
    pub fn values(&self) -> (u64, u64) {
        (self.a, self.b)
    }
}

/// Bytes mapped by a page at `level`
#[inline]
pub const fn page_size_at(level: u8) -> u64 {
    (crate::config::PAGE_SIZE as u64) << (9 * level as u64)
}

/// Capability stored in a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Capability {
    /// Empty slot
    #[default]
    Null,
    Memory(MemoryCap),
    Task(TaskCap),
    Endpoint(EndpointCap),
    PageTable(PageTableCap),
    VirtPage(VirtPageCap),
    CapSpace(CapSpaceCap),
    Id(IdCap),
    /// Slot whose object is being destroyed
    Zombie,
}

const_assert!(size_of::<Capability>() <= 4 * size_of::<u64>());

impl Capability {
    /// Read the tag
    pub const fn cap_type(&self) -> CapType {
        match self {
            Capability::Null => CapType::Null,
            Capability::Memory(_) => CapType::Memory,
            Capability::Task(_) => CapType::Task,
            Capability::Endpoint(_) => CapType::Endpoint,
            Capability::PageTable(_) => CapType::PageTable,
            Capability::VirtPage(_) => CapType::VirtPage,
            Capability::CapSpace(_) => CapType::CapSpace,
            Capability::Id(_) => CapType::Id,
            Capability::Zombie => CapType::Zombie,
        }
    }

    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Capability::Null)
    }

    /// Fails `NotFound` for an empty slot, `IllegalState` mid-destruction
    pub(crate) fn ensure_movable(&self) -> Result<()> {
        match self {
            Capability::Null => Err(Error::NotFound),
            Capability::Zombie => Err(Error::IllegalState),
            _ => Ok(()),
        }
    }

    pub fn as_memory(&self) -> Result<&MemoryCap> {
        match self {
            Capability::Memory(m) => Ok(m),
            other => Err(other.mismatch()),
        }
    }

    pub(crate) fn as_memory_mut(&mut self) -> Result<&mut MemoryCap> {
        match self {
            Capability::Memory(m) => Ok(m),
            other => Err(other.mismatch()),
        }
    }

    pub fn as_task(&self) -> Result<&TaskCap> {
        match self {
            Capability::Task(t) => Ok(t),
            other => Err(other.mismatch()),
        }
    }

    pub fn as_endpoint(&self) -> Result<&EndpointCap> {
        match self {
            Capability::Endpoint(e) => Ok(e),
            other => Err(other.mismatch()),
        }
    }

    pub fn as_page_table(&self) -> Result<&PageTableCap> {
        match self {
            Capability::PageTable(p) => Ok(p),
            other => Err(other.mismatch()),
        }
    }

    pub(crate) fn as_page_table_mut(&mut self) -> Result<&mut PageTableCap> {
        match self {
            Capability::PageTable(p) => Ok(p),
            other => Err(other.mismatch()),
        }
    }

    pub fn as_cap_space(&self) -> Result<&CapSpaceCap> {
        match self {
            Capability::CapSpace(c) => Ok(c),
            other => Err(other.mismatch()),
        }
    }

    pub fn as_id(&self) -> Result<&IdCap> {
        match self {
            Capability::Id(i) => Ok(i),
            other => Err(other.mismatch()),
        }
    }

    /// Empty slots are "not found", anything else of the wrong kind is a
    /// type mismatch
    fn mismatch(&self) -> Error {
        if self.is_null() {
            Error::NotFound
        } else {
            Error::TypeMismatch
        }
    }

    /// True if both are Id capabilities naming the same token
    pub fn same_id(&self, other: &Capability) -> bool {
        match (self, other) {
            (Capability::Id(a), Capability::Id(b)) => a == b,
            _ => false,
        }
    }

    /// True if both capabilities refer to the same kernel object
    pub fn same_object(&self, other: &Capability) -> bool {
        match (self, other) {
            (Capability::Task(a), Capability::Task(b)) => a.task == b.task,
            (Capability::Endpoint(a), Capability::Endpoint(b)) => a.endpoint == b.endpoint,
            (Capability::PageTable(a), Capability::PageTable(b)) => a.table == b.table,
            (Capability::VirtPage(a), Capability::VirtPage(b)) => a.phys == b.phys,
            (Capability::CapSpace(a), Capability::CapSpace(b)) => a.space == b.space,
            (Capability::Id(a), Capability::Id(b)) => a == b,
            _ => false,
        }
    }

    /// Whether `copy` supports this variant
    pub const fn is_copyable(&self) -> bool {
        matches!(self, Capability::Task(_) | Capability::Endpoint(_))
    }

    /// A copy of this capability keeping only the rights in `mask`
    ///
    /// Rights are interpreted per variant (`TaskRights` or `EndpointRights`
    /// bits); unknown bits are ignored. A copy never gains rights.
    pub fn attenuate(&self, mask: u8) -> Result<Capability> {
        match self {
            Capability::Task(t) => Ok(Capability::Task(TaskCap {
                task: t.task,
                rights: t.rights & TaskRights::from_bits_truncate(mask),
            })),
            Capability::Endpoint(e) => Ok(Capability::Endpoint(EndpointCap {
                endpoint: e.endpoint,
                rights: e.rights & EndpointRights::from_bits_truncate(mask),
            })),
            Capability::Null => Err(Error::NotFound),
            _ => Err(Error::TypeMismatch),
        }
    }
}
