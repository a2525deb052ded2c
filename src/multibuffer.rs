// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Multibuffered transfer storage.

A [`TransferPool`] owns `N` pack buffers ("slots") that are mapped into host memory
once, at creation, and stay mapped until teardown.  Slots are used round-robin:

1.  A read is issued into the current slot.
2.  The cursor advances.
3.  The slot that is now current is the oldest one, so its data is the most likely
    to have landed.

The pool only manages storage and the cursor.  Whether a slot's data has actually
landed is tracked by [`crate::bindings::resource_tracking::CompletionTracker`].
*/

use crate::bindings::bind_buffer::CachedBindBuffer;
use crate::commands::{BufferHandle, BufferTarget, GpuCommands, MappedRange, StorageFlags};
use std::fmt::{Debug, Formatter};

/// One persistently mapped pack buffer.
#[derive(Debug)]
pub struct TransferSlot {
    buffer: BufferHandle,
    mapped: MappedRange,
}

impl TransferSlot {
    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    /// Host view of the slot's storage.  Absent once the buffer is deleted.
    pub fn mapped(&self) -> &MappedRange {
        &self.mapped
    }
}

/**
`N` transfer slots plus the cursor that rotates through them.

`N` must be at least 2; a single slot could never be read without waiting on the
read that was just issued into it.
*/
pub struct TransferPool<const N: usize> {
    slots: [TransferSlot; N],
    cursor: usize,
    byte_len: usize,
}

impl<const N: usize> TransferPool<N> {
    const AT_LEAST_TWO_SLOTS: () = assert!(N >= 2, "a transfer pool needs at least 2 slots");

    /**
    Generates `N` buffers, gives each `byte_len` bytes of immutable persistent storage
    and maps it.

    Leaves the pixel-pack target unbound.  On failure every generated buffer is
    deleted before the error is returned.
    */
    pub fn initialize<C: GpuCommands>(
        binder: &CachedBindBuffer<C>,
        byte_len: usize,
    ) -> Result<Self, crate::Error> {
        let () = Self::AT_LEAST_TWO_SLOTS;
        let commands = binder.commands();
        let handles = commands.gen_buffers(N);
        let result = Self::allocate(binder, &handles, byte_len);
        binder.bind(BufferTarget::PixelPack, None);
        match result {
            Ok(slots) => {
                logwise::info_sync!(
                    "transfer pool ready: {slots} slots of {bytes} bytes",
                    slots = N,
                    bytes = byte_len
                );
                Ok(TransferPool {
                    slots,
                    cursor: 0,
                    byte_len,
                })
            }
            Err(e) => {
                binder.forget(&handles);
                if !handles.is_empty() {
                    commands.delete_buffers(handles);
                }
                logwise::error_sync!(
                    "transfer pool allocation failed: {error}",
                    error = logwise::privacy::LogIt(&e)
                );
                Err(e)
            }
        }
    }

    fn allocate<C: GpuCommands>(
        binder: &CachedBindBuffer<C>,
        handles: &[BufferHandle],
        byte_len: usize,
    ) -> Result<[TransferSlot; N], crate::Error> {
        if handles.len() != N {
            return Err(crate::Error::BufferGeneration {
                requested: N,
                generated: handles.len(),
            });
        }
        let commands = binder.commands();
        let mut slots = Vec::with_capacity(N);
        for (slot, handle) in handles.iter().enumerate() {
            binder.bind(BufferTarget::PixelPack, Some(*handle));
            if !commands.buffer_storage(
                BufferTarget::PixelPack,
                byte_len,
                StorageFlags::PERSISTENT_READ,
            ) {
                return Err(crate::Error::StorageAllocation {
                    slot,
                    bytes: byte_len,
                });
            }
            let range = commands
                .map_buffer_range(
                    BufferTarget::PixelPack,
                    0,
                    byte_len,
                    StorageFlags::PERSISTENT_READ,
                )
                .ok_or(crate::Error::MapFailed { slot })?;
            slots.push(TransferSlot {
                buffer: *handle,
                mapped: range,
            });
        }
        slots
            .try_into()
            .map_err(|partial: Vec<TransferSlot>| crate::Error::BufferGeneration {
                requested: N,
                generated: partial.len(),
            })
    }

    /// Deletes every slot's buffer in one command.
    pub fn teardown<C: GpuCommands>(self, binder: &CachedBindBuffer<C>) {
        let handles: Vec<BufferHandle> = self.slots.iter().map(|s| s.buffer).collect();
        binder.forget(&handles);
        binder.commands().delete_buffers(handles);
        logwise::info_sync!("transfer pool released: {slots} slots", slots = N);
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Moves the cursor to the next slot and returns it.
    pub fn advance(&mut self) -> usize {
        self.cursor = (self.cursor + 1) % N;
        self.cursor
    }

    pub fn slot(&self, index: usize) -> &TransferSlot {
        &self.slots[index]
    }

    pub fn current(&self) -> &TransferSlot {
        &self.slots[self.cursor]
    }

    pub const fn len(&self) -> usize {
        N
    }

    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Storage size of each slot.
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }
}

impl<const N: usize> Debug for TransferPool<N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferPool")
            .field("slots", &self.slots)
            .field("cursor", &self.cursor)
            .field("byte_len", &self.byte_len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Immediate;
    use crate::imp::SoftwareGpu;
    use std::sync::Arc;

    fn binder() -> CachedBindBuffer<Immediate<SoftwareGpu>> {
        CachedBindBuffer::new(Arc::new(Immediate::new(SoftwareGpu::new(4, 4))))
    }

    #[test]
    fn slots_are_distinct_and_mapped() {
        let binder = binder();
        let pool = TransferPool::<3>::initialize(&binder, 64).unwrap();
        let mut names: Vec<u32> = (0..3).map(|i| pool.slot(i).buffer().get()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 3);
        for i in 0..3 {
            assert!(pool.slot(i).mapped().is_live());
            assert_eq!(pool.slot(i).mapped().len(), 64);
        }
        assert_eq!(binder.bound(BufferTarget::PixelPack), None);
    }

    #[test]
    fn cursor_wraps() {
        let binder = binder();
        let mut pool = TransferPool::<2>::initialize(&binder, 16).unwrap();
        assert_eq!(pool.cursor(), 0);
        assert_eq!(pool.advance(), 1);
        assert_eq!(pool.advance(), 0);
    }

    #[test]
    fn teardown_deletes_storage() {
        let binder = binder();
        let pool = TransferPool::<2>::initialize(&binder, 16).unwrap();
        let view = pool.current().mapped().clone();
        pool.teardown(&binder);
        assert!(!view.is_live());
        assert_eq!(binder.commands().with_backend(|b| b.live_buffers()), 0);
    }

    #[test]
    fn zero_bytes_fails_and_cleans_up() {
        let binder = binder();
        let err = TransferPool::<2>::initialize(&binder, 0).unwrap_err();
        assert!(matches!(err, crate::Error::StorageAllocation { slot: 0, .. }));
        assert_eq!(binder.commands().with_backend(|b| b.live_buffers()), 0);
    }
}
