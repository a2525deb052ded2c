// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use super::{
    Backend, BufferHandle, BufferTarget, Fence, FenceIds, GpuCommands, MappedRange, ReadRect,
    StorageFlags, WaitStatus,
};
use crate::pixel_formats::ColorFormat;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/**
Runs each command inline on the calling thread.

The backend sits behind a mutex, so commands from different threads still execute
one at a time and in the order they acquire it.
*/
#[derive(Debug)]
pub struct Immediate<B> {
    backend: Mutex<B>,
    fences: FenceIds,
}

impl<B: Backend> Immediate<B> {
    pub fn new(backend: B) -> Self {
        Immediate {
            backend: Mutex::new(backend),
            fences: FenceIds::new(),
        }
    }

    /// Direct access to the backend, e.g. to inspect it in tests.
    pub fn with_backend<R>(&self, f: impl FnOnce(&mut B) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn into_inner(self) -> B {
        self.backend
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> MutexGuard<'_, B> {
        self.backend.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<B: Backend> GpuCommands for Immediate<B> {
    fn gen_buffers(&self, count: usize) -> Vec<BufferHandle> {
        self.lock().gen_buffers(count)
    }

    fn delete_buffers(&self, buffers: Vec<BufferHandle>) {
        self.lock().delete_buffers(&buffers)
    }

    fn bind_buffer(&self, target: BufferTarget, buffer: Option<BufferHandle>) {
        self.lock().bind_buffer(target, buffer)
    }

    fn buffer_storage(&self, target: BufferTarget, size: usize, flags: StorageFlags) -> bool {
        self.lock().buffer_storage(target, size, flags)
    }

    fn map_buffer_range(
        &self,
        target: BufferTarget,
        offset: usize,
        length: usize,
        flags: StorageFlags,
    ) -> Option<MappedRange> {
        self.lock().map_buffer_range(target, offset, length, flags)
    }

    fn read_pixels(&self, rect: ReadRect, format: ColorFormat) {
        self.lock().read_pixels(rect, format)
    }

    fn fence_sync(&self) -> Fence {
        let fence = self.fences.mint();
        self.lock().fence_sync(fence.id());
        fence
    }

    fn client_wait_sync(&self, fence: &Fence, timeout: Duration) -> WaitStatus {
        self.lock().client_wait_sync(fence.id(), timeout)
    }

    fn delete_sync(&self, fence: Fence) {
        self.lock().delete_sync(fence.id())
    }

    fn finish(&self) {
        self.lock().finish()
    }
}
