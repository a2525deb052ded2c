// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! A recording backend for integration tests.
//!
//! [`ScriptedGpu`] runs commands on a [`SoftwareGpu`] and logs each one.  A
//! [`Script`] can make it fail allocations or keep fences from signaling.
#![allow(dead_code)]

use color_readback::commands::{
    Backend, BufferHandle, BufferTarget, FenceId, MappedRange, ReadRect, StorageFlags,
    WaitStatus,
};
use color_readback::{
    BufferStorageReader, CachedBindBuffer, ColorFormat, FramebufferFormats, Immediate,
    ReaderConfig, SoftwareFramebuffer, SoftwareGpu, TextureInfo,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    GenBuffers(usize),
    DeleteBuffers(Vec<u32>),
    BindBuffer(BufferTarget, Option<u32>),
    BufferStorage(usize, StorageFlags),
    MapBufferRange(usize, usize, StorageFlags),
    ReadPixels(ReadRect, ColorFormat),
    FenceSync(u64),
    ClientWaitSync(u64, Duration),
    DeleteSync(u64),
    Finish,
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

/// Failures to inject.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Generate one buffer fewer than asked for.
    pub generate_fewer: bool,
    /// Refuse storage for the buffer at this position in allocation order.
    pub fail_storage_for_slot: Option<usize>,
    /// Every mapping comes back empty.
    pub fail_map: bool,
    /// Waits on signaled fences report a timeout instead.
    pub hold_fences: bool,
}

#[derive(Debug)]
pub struct ScriptedGpu {
    inner: SoftwareGpu,
    script: Script,
    log: CallLog,
    storage_calls: usize,
}

impl ScriptedGpu {
    pub fn new(inner: SoftwareGpu, script: Script) -> (Self, CallLog) {
        let log = CallLog::default();
        let gpu = ScriptedGpu {
            inner,
            script,
            log: log.clone(),
            storage_calls: 0,
        };
        (gpu, log)
    }

    pub fn inner(&self) -> &SoftwareGpu {
        &self.inner
    }

    fn record(&self, call: Call) {
        self.log.lock().unwrap().push(call);
    }
}

impl Backend for ScriptedGpu {
    fn gen_buffers(&mut self, count: usize) -> Vec<BufferHandle> {
        self.record(Call::GenBuffers(count));
        let count = if self.script.generate_fewer {
            count.saturating_sub(1)
        } else {
            count
        };
        self.inner.gen_buffers(count)
    }

    fn delete_buffers(&mut self, buffers: &[BufferHandle]) {
        self.record(Call::DeleteBuffers(buffers.iter().map(|b| b.get()).collect()));
        self.inner.delete_buffers(buffers)
    }

    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<BufferHandle>) {
        self.record(Call::BindBuffer(target, buffer.map(BufferHandle::get)));
        self.inner.bind_buffer(target, buffer)
    }

    fn buffer_storage(&mut self, target: BufferTarget, size: usize, flags: StorageFlags) -> bool {
        self.record(Call::BufferStorage(size, flags));
        let call = self.storage_calls;
        self.storage_calls += 1;
        if self.script.fail_storage_for_slot == Some(call) {
            return false;
        }
        self.inner.buffer_storage(target, size, flags)
    }

    fn map_buffer_range(
        &mut self,
        target: BufferTarget,
        offset: usize,
        length: usize,
        flags: StorageFlags,
    ) -> Option<MappedRange> {
        self.record(Call::MapBufferRange(offset, length, flags));
        if self.script.fail_map {
            return None;
        }
        self.inner.map_buffer_range(target, offset, length, flags)
    }

    fn read_pixels(&mut self, rect: ReadRect, format: ColorFormat) {
        self.record(Call::ReadPixels(rect, format));
        self.inner.read_pixels(rect, format)
    }

    fn fence_sync(&mut self, fence: FenceId) {
        self.record(Call::FenceSync(fence.get()));
        self.inner.fence_sync(fence)
    }

    fn client_wait_sync(&mut self, fence: FenceId, timeout: Duration) -> WaitStatus {
        self.record(Call::ClientWaitSync(fence.get(), timeout));
        let status = self.inner.client_wait_sync(fence, timeout);
        if self.script.hold_fences && status.is_signaled() {
            WaitStatus::TimeoutExpired
        } else {
            status
        }
    }

    fn delete_sync(&mut self, fence: FenceId) {
        self.record(Call::DeleteSync(fence.get()));
        self.inner.delete_sync(fence)
    }

    fn finish(&mut self) {
        self.record(Call::Finish);
        self.inner.finish()
    }
}

pub type Commands = Immediate<ScriptedGpu>;

/// Everything a test needs to drive and observe one reader.
pub struct Harness<const N: usize> {
    pub reader: BufferStorageReader<Commands, N>,
    pub binder: Arc<CachedBindBuffer<Commands>>,
    pub framebuffer: SoftwareFramebuffer,
    pub log: CallLog,
}

impl<const N: usize> Harness<N> {
    pub fn commands(&self) -> &Arc<Commands> {
        self.binder.commands()
    }

    /// Removes and returns everything logged so far.
    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.log.lock().unwrap())
    }

    pub fn live_buffers(&self) -> usize {
        self.commands().with_backend(|b| b.inner().live_buffers())
    }

    pub fn live_fences(&self) -> usize {
        self.commands().with_backend(|b| b.inner().live_fences())
    }
}

pub fn binder(
    width: u32,
    height: u32,
    script: Script,
) -> (Arc<CachedBindBuffer<Commands>>, SoftwareFramebuffer, CallLog) {
    let gpu = SoftwareGpu::new(width, height);
    let framebuffer = gpu.framebuffer().clone();
    let (gpu, log) = ScriptedGpu::new(gpu, script);
    let binder = Arc::new(CachedBindBuffer::new(Arc::new(Immediate::new(gpu))));
    (binder, framebuffer, log)
}

pub fn harness<const N: usize>(
    texture: TextureInfo,
    formats: FramebufferFormats,
    config: ReaderConfig,
    script: Script,
) -> Harness<N> {
    let (binder, framebuffer, log) = binder(texture.real_width, texture.real_height, script);
    let reader = BufferStorageReader::new(binder.clone(), texture, formats, config)
        .expect("reader allocation");
    Harness {
        reader,
        binder,
        framebuffer,
        log,
    }
}

/// A pattern where every pixel is distinct for images up to 256 wide.
pub fn paint_coordinates(framebuffer: &SoftwareFramebuffer) {
    framebuffer.fill(|x, y| [x as u8, y as u8, (x ^ y) as u8, 255]);
}
