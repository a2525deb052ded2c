// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! The GPU command boundary.
//!
//! Readback issues a small set of buffer, pixel-transfer and fence commands.  They
//! are described twice:
//!
//! * [`Backend`] is the executing side.  A backend owns the real (or simulated)
//!   device objects and runs commands in submission order through `&mut self`.
//! * [`GpuCommands`] is the issuing side.  It is what readers hold.  It is `&self`
//!   and `Sync` so that a reader and a [`crate::bindings::CachedBindBuffer`] can
//!   share it.
//!
//! Two adapters connect them: [`Deferred`] queues commands to a worker thread that
//! owns the backend, and [`Immediate`] runs each command inline under a lock.
//!
//! # Mapped memory
//!
//! Persistently mapped buffers are modeled as [`HostMemory`]: a block of host memory
//! owned by the backend that the device writes into.  A mapping hands out a
//! [`MappedRange`], which is a weak view.  Once the backend deletes the buffer the
//! view reports itself absent instead of dangling.
//!
//! Writes by the device are only guaranteed visible once a fence created after
//! them has signaled (or after [`GpuCommands::finish`]).  Reading earlier is allowed
//! by the types but returns whatever is there.

mod deferred;
mod immediate;

pub use deferred::Deferred;
pub use immediate::Immediate;

use crate::pixel_formats::ColorFormat;
use std::num::{NonZeroU32, NonZeroU64};
use std::ops::BitOr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

/// Name of a buffer object.  Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(NonZeroU32);

impl BufferHandle {
    pub const fn new(name: u32) -> Option<Self> {
        match NonZeroU32::new(name) {
            Some(n) => Some(BufferHandle(n)),
            None => None,
        }
    }
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

/// Binding point for a buffer object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    Array,
    ElementArray,
    /// Destination of pixel reads.
    PixelPack,
    /// Source of pixel uploads.
    PixelUnpack,
}

/// Number of [`BufferTarget`] variants.
pub(crate) const TARGET_COUNT: usize = 4;

impl BufferTarget {
    pub const ALL: [BufferTarget; TARGET_COUNT] = [
        BufferTarget::Array,
        BufferTarget::ElementArray,
        BufferTarget::PixelPack,
        BufferTarget::PixelUnpack,
    ];

    pub(crate) const fn index(self) -> usize {
        match self {
            BufferTarget::Array => 0,
            BufferTarget::ElementArray => 1,
            BufferTarget::PixelPack => 2,
            BufferTarget::PixelUnpack => 3,
        }
    }
}

/// Access flags for buffer storage and mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StorageFlags(u8);

impl StorageFlags {
    pub const NONE: StorageFlags = StorageFlags(0);
    pub const MAP_READ: StorageFlags = StorageFlags(1 << 0);
    pub const MAP_WRITE: StorageFlags = StorageFlags(1 << 1);
    /// The mapping stays valid while the device uses the buffer.
    pub const MAP_PERSISTENT: StorageFlags = StorageFlags(1 << 2);
    /// Device writes become visible without explicit flushes.
    pub const MAP_COHERENT: StorageFlags = StorageFlags(1 << 3);

    /// Flags used for readback slots.
    pub const PERSISTENT_READ: StorageFlags = StorageFlags(
        StorageFlags::MAP_READ.0 | StorageFlags::MAP_PERSISTENT.0 | StorageFlags::MAP_COHERENT.0,
    );

    pub const fn contains(self, other: StorageFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for StorageFlags {
    type Output = StorageFlags;
    fn bitor(self, rhs: Self) -> Self::Output {
        StorageFlags(self.0 | rhs.0)
    }
}

/// Source rectangle of a pixel read.  The origin may be negative; pixels outside
/// the color buffer are not written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReadRect {
    pub x0: i32,
    pub y0: i32,
    pub width: u32,
    pub height: u32,
}

/// Backend-side identity of a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FenceId(NonZeroU64);

impl FenceId {
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

/**
A completion token in the command stream.

Signals once every command issued before it has completed.  Fences are move-only:
they are consumed by [`GpuCommands::delete_sync`], so a fence cannot be waited on
after deletion or deleted twice.
*/
#[derive(Debug, PartialEq, Eq, Hash)]
#[must_use = "fences must be deleted with delete_sync"]
pub struct Fence {
    id: FenceId,
}

impl Fence {
    pub fn id(&self) -> FenceId {
        self.id
    }
}

/// Mints fence ids on the issuing side so creating a fence never waits on a backend.
#[derive(Debug)]
pub(crate) struct FenceIds(AtomicU64);

impl FenceIds {
    pub(crate) const fn new() -> Self {
        FenceIds(AtomicU64::new(1))
    }
    pub(crate) fn mint(&self) -> Fence {
        let raw = self.0.fetch_add(1, Ordering::Relaxed);
        //starts at 1 and would take centuries to wrap
        let id = NonZeroU64::new(raw).map(FenceId).unwrap_or(FenceId(NonZeroU64::MIN));
        Fence { id }
    }
}

/// Outcome of waiting on a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitStatus {
    /// The fence had signaled before the wait started.
    AlreadySignaled,
    /// The fence signaled during the wait.
    ConditionSatisfied,
    TimeoutExpired,
    /// The fence is unknown or the backend is gone.
    Failed,
}

impl WaitStatus {
    pub const fn is_signaled(self) -> bool {
        matches!(
            self,
            WaitStatus::AlreadySignaled | WaitStatus::ConditionSatisfied
        )
    }
}

/// Backend-owned host memory backing a persistently mapped buffer.
#[derive(Debug)]
pub struct HostMemory {
    bytes: RwLock<Box<[u8]>>,
}

impl HostMemory {
    pub fn zeroed(len: usize) -> Arc<Self> {
        Arc::new(HostMemory {
            bytes: RwLock::new(vec![0; len].into_boxed_slice()),
        })
    }

    pub fn len(&self) -> usize {
        self.read(|b| b.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Device-side write.  Bytes past the end are dropped; returns how many landed.
    pub fn write(&self, offset: usize, data: &[u8]) -> usize {
        let mut bytes = self.bytes.write().unwrap_or_else(PoisonError::into_inner);
        if offset >= bytes.len() {
            return 0;
        }
        let n = data.len().min(bytes.len() - offset);
        bytes[offset..offset + n].copy_from_slice(&data[..n]);
        n
    }

    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let bytes = self.bytes.read().unwrap_or_else(PoisonError::into_inner);
        f(&bytes)
    }

    /// Hands out a weak view of `offset..offset + len`, or `None` when out of range.
    pub fn map(self: &Arc<Self>, offset: usize, len: usize) -> Option<MappedRange> {
        let end = offset.checked_add(len)?;
        if end > self.len() {
            return None;
        }
        Some(MappedRange {
            memory: Arc::downgrade(self),
            offset,
            len,
        })
    }
}

/// A persistent mapping.  Weak: it never keeps the backing memory alive.
#[derive(Debug, Clone)]
pub struct MappedRange {
    memory: Weak<HostMemory>,
    offset: usize,
    len: usize,
}

impl MappedRange {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the backing memory still exists.
    pub fn is_live(&self) -> bool {
        self.memory.strong_count() > 0
    }

    /// Reads the mapped bytes, or `None` once the buffer has been deleted.
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let memory = self.memory.upgrade()?;
        let (offset, len) = (self.offset, self.len);
        Some(memory.read(|bytes| f(&bytes[offset..offset + len])))
    }
}

/**
Executes GPU commands in submission order.

Implementations are moved onto whichever thread executes them, see [`Deferred`].
Buffer commands act on the buffer bound to the named target, the way a GL
context does.
*/
pub trait Backend: Send + 'static {
    /// Generates `count` fresh buffer names.  Returning fewer signals failure.
    fn gen_buffers(&mut self, count: usize) -> Vec<BufferHandle>;
    fn delete_buffers(&mut self, buffers: &[BufferHandle]);
    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<BufferHandle>);
    /// Allocates immutable storage for the buffer bound to `target`.
    fn buffer_storage(&mut self, target: BufferTarget, size: usize, flags: StorageFlags) -> bool;
    fn map_buffer_range(
        &mut self,
        target: BufferTarget,
        offset: usize,
        length: usize,
        flags: StorageFlags,
    ) -> Option<MappedRange>;
    /// Reads `rect` of the color buffer into the buffer bound to
    /// [`BufferTarget::PixelPack`], rows packed at `rect.width * bytes_per_pixel`.
    fn read_pixels(&mut self, rect: ReadRect, format: ColorFormat);
    fn fence_sync(&mut self, fence: FenceId);
    fn client_wait_sync(&mut self, fence: FenceId, timeout: Duration) -> WaitStatus;
    fn delete_sync(&mut self, fence: FenceId);
    /// Blocks until every previously issued command has completed.
    fn finish(&mut self);
}

/**
Issues GPU commands.

This is the interface readers are written against.  Commands may execute later
on another thread, but they execute in the order issued.
*/
pub trait GpuCommands: Send + Sync {
    fn gen_buffers(&self, count: usize) -> Vec<BufferHandle>;
    fn delete_buffers(&self, buffers: Vec<BufferHandle>);
    fn bind_buffer(&self, target: BufferTarget, buffer: Option<BufferHandle>);
    fn buffer_storage(&self, target: BufferTarget, size: usize, flags: StorageFlags) -> bool;
    fn map_buffer_range(
        &self,
        target: BufferTarget,
        offset: usize,
        length: usize,
        flags: StorageFlags,
    ) -> Option<MappedRange>;
    fn read_pixels(&self, rect: ReadRect, format: ColorFormat);
    /// Inserts a fence after every command issued so far.  Does not block.
    fn fence_sync(&self) -> Fence;
    /// Blocks until `fence` signals or `timeout` elapses.
    fn client_wait_sync(&self, fence: &Fence, timeout: Duration) -> WaitStatus;
    fn delete_sync(&self, fence: Fence);
    /// Blocks until the device is idle.
    fn finish(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_handle_rejects_zero() {
        assert!(BufferHandle::new(0).is_none());
        assert_eq!(BufferHandle::new(7).map(BufferHandle::get), Some(7));
    }

    #[test]
    fn persistent_read_flags() {
        let flags = StorageFlags::PERSISTENT_READ;
        assert!(flags.contains(StorageFlags::MAP_READ));
        assert!(flags.contains(StorageFlags::MAP_PERSISTENT | StorageFlags::MAP_COHERENT));
        assert!(!flags.contains(StorageFlags::MAP_WRITE));
    }

    #[test]
    fn fence_ids_are_distinct() {
        let ids = FenceIds::new();
        let a = ids.mint();
        let b = ids.mint();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn mapped_range_goes_absent_with_memory() {
        let memory = HostMemory::zeroed(8);
        let range = memory.map(4, 4).unwrap();
        assert_eq!(memory.write(6, &[1, 2, 3, 4]), 2);
        assert_eq!(range.read(|b| b.to_vec()), Some(vec![0, 0, 1, 2]));
        assert!(memory.map(6, 4).is_none());
        drop(memory);
        assert!(!range.is_live());
        assert_eq!(range.read(|b| b.len()), None);
    }
}
