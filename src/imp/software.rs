// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
A CPU implementation of [`Backend`].

The color buffer is an RGBA8 image in host memory and buffer objects are plain host
allocations.  Commands run to completion as they execute, so a fence has always
signaled by the time anyone can wait on it.  This makes the software backend the
reference for what readback should produce, and the backend the test suite runs
against.
*/

use crate::commands::{
    Backend, BufferHandle, BufferTarget, FenceId, HostMemory, MappedRange, ReadRect,
    StorageFlags, TARGET_COUNT, WaitStatus,
};
use crate::pixel_formats::ColorFormat;
use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

struct FramebufferData {
    width: u32,
    height: u32,
    //row 0 is the origin row that reads count from
    rgba: Vec<u8>,
}

/// A shareable RGBA8 color buffer.
///
/// Clones refer to the same pixels, so a renderer (or a test) can keep drawing into
/// a framebuffer after handing it to a [`SoftwareGpu`].
#[derive(Clone)]
pub struct SoftwareFramebuffer {
    inner: Arc<Mutex<FramebufferData>>,
}

impl SoftwareFramebuffer {
    pub fn new(width: u32, height: u32) -> Self {
        SoftwareFramebuffer {
            inner: Arc::new(Mutex::new(FramebufferData {
                width,
                height,
                rgba: vec![0; width as usize * height as usize * 4],
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FramebufferData> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn width(&self) -> u32 {
        self.lock().width
    }

    pub fn height(&self) -> u32 {
        self.lock().height
    }

    /// Sets every pixel from `f(x, y)`.
    pub fn fill(&self, mut f: impl FnMut(u32, u32) -> [u8; 4]) {
        let mut data = self.lock();
        let width = data.width;
        for (i, pixel) in data.rgba.chunks_exact_mut(4).enumerate() {
            let x = i as u32 % width;
            let y = i as u32 / width;
            pixel.copy_from_slice(&f(x, y));
        }
    }

    /// Sets the pixel at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` is outside the framebuffer.
    pub fn put_pixel(&self, x: u32, y: u32, rgba: [u8; 4]) {
        let mut data = self.lock();
        assert!(x < data.width && y < data.height, "pixel out of bounds");
        let i = (y as usize * data.width as usize + x as usize) * 4;
        data.rgba[i..i + 4].copy_from_slice(&rgba);
    }

    /// The pixel at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` is outside the framebuffer.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let data = self.lock();
        assert!(x < data.width && y < data.height, "pixel out of bounds");
        let i = (y as usize * data.width as usize + x as usize) * 4;
        [data.rgba[i], data.rgba[i + 1], data.rgba[i + 2], data.rgba[i + 3]]
    }
}

impl Debug for SoftwareFramebuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let data = self.lock();
        f.debug_struct("SoftwareFramebuffer")
            .field("width", &data.width)
            .field("height", &data.height)
            .finish()
    }
}

#[derive(Debug, Default)]
struct SoftwareBuffer {
    //immutable once allocated
    storage: Option<(Arc<HostMemory>, StorageFlags)>,
}

/// CPU backend reading from a [`SoftwareFramebuffer`].
#[derive(Debug)]
pub struct SoftwareGpu {
    framebuffer: SoftwareFramebuffer,
    next_name: u32,
    buffers: HashMap<BufferHandle, SoftwareBuffer>,
    bound: [Option<BufferHandle>; TARGET_COUNT],
    fences: HashSet<FenceId>,
    reads_issued: usize,
}

impl SoftwareGpu {
    /// A backend with a fresh, black `width` × `height` color buffer.
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_framebuffer(SoftwareFramebuffer::new(width, height))
    }

    pub fn with_framebuffer(framebuffer: SoftwareFramebuffer) -> Self {
        SoftwareGpu {
            framebuffer,
            next_name: 1,
            buffers: HashMap::new(),
            bound: [None; TARGET_COUNT],
            fences: HashSet::new(),
            reads_issued: 0,
        }
    }

    pub fn framebuffer(&self) -> &SoftwareFramebuffer {
        &self.framebuffer
    }

    pub fn bound(&self, target: BufferTarget) -> Option<BufferHandle> {
        self.bound[target.index()]
    }

    /// Buffer names generated and not yet deleted.
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Fences created and not yet deleted.
    pub fn live_fences(&self) -> usize {
        self.fences.len()
    }

    pub fn reads_issued(&self) -> usize {
        self.reads_issued
    }

    fn bound_storage(&self, target: BufferTarget) -> Option<&(Arc<HostMemory>, StorageFlags)> {
        let handle = self.bound[target.index()]?;
        self.buffers.get(&handle)?.storage.as_ref()
    }
}

impl Backend for SoftwareGpu {
    fn gen_buffers(&mut self, count: usize) -> Vec<BufferHandle> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let Some(handle) = BufferHandle::new(self.next_name) else {
                break;
            };
            self.next_name = self.next_name.wrapping_add(1);
            self.buffers.insert(handle, SoftwareBuffer::default());
            out.push(handle);
        }
        out
    }

    fn delete_buffers(&mut self, buffers: &[BufferHandle]) {
        for handle in buffers {
            //dropping the storage invalidates every mapping of it
            self.buffers.remove(handle);
            for bound in self.bound.iter_mut() {
                if *bound == Some(*handle) {
                    *bound = None;
                }
            }
        }
    }

    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<BufferHandle>) {
        self.bound[target.index()] = buffer;
    }

    fn buffer_storage(&mut self, target: BufferTarget, size: usize, flags: StorageFlags) -> bool {
        let Some(handle) = self.bound[target.index()] else {
            return false;
        };
        let Some(buffer) = self.buffers.get_mut(&handle) else {
            return false;
        };
        if buffer.storage.is_some() || size == 0 {
            return false;
        }
        buffer.storage = Some((HostMemory::zeroed(size), flags));
        true
    }

    fn map_buffer_range(
        &mut self,
        target: BufferTarget,
        offset: usize,
        length: usize,
        flags: StorageFlags,
    ) -> Option<MappedRange> {
        let (memory, storage_flags) = self.bound_storage(target)?;
        let wants_access =
            flags.contains(StorageFlags::MAP_READ) || flags.contains(StorageFlags::MAP_WRITE);
        if !wants_access || !storage_flags.contains(flags) {
            return None;
        }
        memory.map(offset, length)
    }

    fn read_pixels(&mut self, rect: ReadRect, format: ColorFormat) {
        self.reads_issued += 1;
        let Some((memory, _)) = self.bound_storage(BufferTarget::PixelPack) else {
            logwise::trace_sync!("software read_pixels with no pack buffer bound; ignored");
            return;
        };
        let bpp = format.bytes_per_pixel() as usize;
        let row_bytes = rect.width as usize * bpp;
        let fb = self.framebuffer.lock();

        let x_start = i64::from(rect.x0).max(0);
        let x_end = (i64::from(rect.x0) + i64::from(rect.width)).min(i64::from(fb.width));
        if x_start >= x_end {
            return;
        }
        let columns = (x_end - x_start) as usize;
        let dst_column = (x_start - i64::from(rect.x0)) as usize;
        let mut encoded = vec![0u8; columns * bpp];
        for row in 0..rect.height as usize {
            let y = i64::from(rect.y0) + row as i64;
            if y < 0 || y >= i64::from(fb.height) {
                continue;
            }
            let src_start = (y as usize * fb.width as usize + x_start as usize) * 4;
            let src = &fb.rgba[src_start..src_start + columns * 4];
            format.encode_rgba8_row(src, &mut encoded);
            memory.write(row * row_bytes + dst_column * bpp, &encoded);
        }
    }

    fn fence_sync(&mut self, fence: FenceId) {
        self.fences.insert(fence);
    }

    fn client_wait_sync(&mut self, fence: FenceId, _timeout: Duration) -> WaitStatus {
        //everything before the fence already ran
        if self.fences.contains(&fence) {
            WaitStatus::AlreadySignaled
        } else {
            WaitStatus::Failed
        }
    }

    fn delete_sync(&mut self, fence: FenceId) {
        self.fences.remove(&fence);
    }

    fn finish(&mut self) {}
}
