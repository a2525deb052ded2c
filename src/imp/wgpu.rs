// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
wgpu implementation of [`Backend`].

wgpu has no persistently mapped pack buffers and no fence objects, so both are
layered on top of it:

* Buffer storage is host memory, exactly as in the software backend.
* `read_pixels` records a texture-to-buffer copy into a fresh staging buffer,
  submits it, and starts an asynchronous map of the staging buffer.
* A fence adopts every copy issued since the previous fence.  Waiting on it polls
  the device until the adopted copies (and those of older fences) have mapped, then
  lands their texels in the host storage.

Rows are read in texture order: row 0 of a read is the texture's top row.
*/

use crate::commands::{
    Backend, BufferHandle, BufferTarget, FenceId, HostMemory, MappedRange, ReadRect,
    StorageFlags, TARGET_COUNT, WaitStatus,
};
use crate::pixel_formats::ColorFormat;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use wgpu::PollType;

const MAP_PENDING: u8 = 0;
const MAP_READY: u8 = 1;
const MAP_FAILED: u8 = 2;

/// Longest sleep between polls while waiting on a fence.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// How long to sleep before the next poll, given the time left on the wait.
fn poll_pause(remaining: Duration) -> Duration {
    remaining.min(POLL_INTERVAL)
}

/// Rounds `bytes` up to wgpu's copy row alignment.
fn padded_bytes_per_row(bytes: u32) -> u32 {
    bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
}

/// Texel layout of a readable source texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceLayout {
    Rgba8,
    Bgra8,
}

impl SourceLayout {
    fn of(format: wgpu::TextureFormat) -> Option<Self> {
        match format {
            wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb => {
                Some(SourceLayout::Rgba8)
            }
            wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb => {
                Some(SourceLayout::Bgra8)
            }
            _ => None,
        }
    }
}

/// A copy that has been submitted but whose texels have not landed yet.
#[derive(Debug)]
struct PendingCopy {
    staging: wgpu::Buffer,
    map_state: Arc<AtomicU8>,
    padded_row: usize,
    columns: usize,
    rows: usize,
    //the pack buffer may be deleted before the copy lands
    destination: Weak<HostMemory>,
    dst_offset: usize,
    dst_stride: usize,
    format: ColorFormat,
}

impl PendingCopy {
    fn map_state(&self) -> u8 {
        self.map_state.load(Ordering::Acquire)
    }

    /// Converts the staged texels into the destination and unmaps.
    fn land(self, source: SourceLayout) {
        if self.map_state() != MAP_READY {
            logwise::warn_sync!("staging buffer failed to map; read dropped");
            return;
        }
        if let Some(destination) = self.destination.upgrade() {
            let bpp = self.format.bytes_per_pixel() as usize;
            let staged = self.staging.slice(..).get_mapped_range();
            let mut rgba = vec![0u8; self.columns * 4];
            let mut encoded = vec![0u8; self.columns * bpp];
            for row in 0..self.rows {
                let start = row * self.padded_row;
                rgba.copy_from_slice(&staged[start..start + self.columns * 4]);
                if source == SourceLayout::Bgra8 {
                    for px in rgba.chunks_exact_mut(4) {
                        px.swap(0, 2);
                    }
                }
                self.format.encode_rgba8_row(&rgba, &mut encoded);
                destination.write(self.dst_offset + row * self.dst_stride, &encoded);
            }
            drop(staged);
        }
        self.staging.unmap();
    }
}

#[derive(Debug)]
struct FencedCopies {
    id: FenceId,
    copies: Vec<PendingCopy>,
    deleted: bool,
}

/**
Reads back from a wgpu texture.

The texture must allow `COPY_SRC` and be one of the 8-bit RGBA or BGRA formats.
*/
#[derive(Debug)]
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    source: wgpu::Texture,
    source_layout: SourceLayout,
    next_name: u32,
    buffers: HashMap<BufferHandle, Option<(Arc<HostMemory>, StorageFlags)>>,
    bound: [Option<BufferHandle>; TARGET_COUNT],
    unfenced: Vec<PendingCopy>,
    fenced: VecDeque<FencedCopies>,
}

impl WgpuBackend {
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        source: wgpu::Texture,
    ) -> Result<Self, crate::Error> {
        let source_layout = SourceLayout::of(source.format())
            .ok_or(crate::Error::UnsupportedSource(source.format()))?;
        Ok(WgpuBackend {
            device,
            queue,
            source,
            source_layout,
            next_name: 1,
            buffers: HashMap::new(),
            bound: [None; TARGET_COUNT],
            unfenced: Vec::new(),
            fenced: VecDeque::new(),
        })
    }

    /**
    Creates a device with no surface and an RGBA8 texture of the given size to read
    from.

    Blocks the calling thread while the adapter and device are requested.
    */
    pub fn headless(width: u32, height: u32) -> Result<Self, crate::Error> {
        let descriptor = wgpu::InstanceDescriptor::from_env_or_default();
        let instance = wgpu::Instance::new(&descriptor);
        let options = wgpu::RequestAdapterOptions {
            power_preference: Default::default(),
            force_fallback_adapter: false,
            compatible_surface: None,
        };
        let adapter = test_executors::sleep_on(instance.request_adapter(&options))
            .map_err(|_| crate::Error::NoAdapter)?;
        let descriptor = wgpu::DeviceDescriptor {
            label: Some("color_readback headless"),
            required_features: Default::default(),
            required_limits: wgpu::Limits::downlevel_defaults(),
            memory_hints: Default::default(),
            trace: wgpu::Trace::Off,
        };
        let (device, queue) = test_executors::sleep_on(adapter.request_device(&descriptor))?;
        let source = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("color_readback source"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        Self::new(device, queue, source)
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn source(&self) -> &wgpu::Texture {
        &self.source
    }

    /// Replaces the source texture contents with tightly packed RGBA8 rows.
    pub fn upload_rgba8(&self, rgba: &[u8]) {
        let size = self.source.size();
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.source,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(size.width * 4),
                rows_per_image: Some(size.height),
            },
            size,
        );
    }

    fn bound_storage(&self, target: BufferTarget) -> Option<&(Arc<HostMemory>, StorageFlags)> {
        let handle = self.bound[target.index()]?;
        self.buffers.get(&handle)?.as_ref()
    }

    fn copies_through(&self, position: usize) -> impl Iterator<Item = &PendingCopy> {
        self.fenced
            .iter()
            .take(position + 1)
            .flat_map(|f| f.copies.iter())
    }

    /// Lands every copy adopted by fences up to and including `position`.
    fn land_through(&mut self, position: usize) {
        let source = self.source_layout;
        for fenced in self.fenced.iter_mut().take(position + 1) {
            for copy in fenced.copies.drain(..) {
                copy.land(source);
            }
        }
        self.fenced.retain(|f| !(f.deleted && f.copies.is_empty()));
    }
}

impl Backend for WgpuBackend {
    fn gen_buffers(&mut self, count: usize) -> Vec<BufferHandle> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let Some(handle) = BufferHandle::new(self.next_name) else {
                break;
            };
            self.next_name = self.next_name.wrapping_add(1);
            self.buffers.insert(handle, None);
            out.push(handle);
        }
        out
    }

    fn delete_buffers(&mut self, buffers: &[BufferHandle]) {
        for handle in buffers {
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
        match self.buffers.get_mut(&handle) {
            Some(storage @ None) if size > 0 => {
                *storage = Some((HostMemory::zeroed(size), flags));
                true
            }
            _ => false,
        }
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
        let Some((memory, _)) = self.bound_storage(BufferTarget::PixelPack) else {
            logwise::trace_sync!("wgpu read_pixels with no pack buffer bound; ignored");
            return;
        };
        let destination = Arc::downgrade(memory);
        let size = self.source.size();
        let x_start = i64::from(rect.x0).max(0);
        let x_end = (i64::from(rect.x0) + i64::from(rect.width)).min(i64::from(size.width));
        let y_start = i64::from(rect.y0).max(0);
        let y_end = (i64::from(rect.y0) + i64::from(rect.height)).min(i64::from(size.height));
        if x_start >= x_end || y_start >= y_end {
            return;
        }
        let columns = (x_end - x_start) as u32;
        let rows = (y_end - y_start) as u32;
        let padded_row = padded_bytes_per_row(columns * 4);

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("color_readback staging"),
            size: u64::from(padded_row) * u64::from(rows),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("color_readback copy"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.source,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: x_start as u32,
                    y: y_start as u32,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: None,
                },
            },
            wgpu::Extent3d {
                width: columns,
                height: rows,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let map_state = Arc::new(AtomicU8::new(MAP_PENDING));
        let move_state = map_state.clone();
        staging.map_async(wgpu::MapMode::Read, .., move |result| {
            let state = if result.is_ok() { MAP_READY } else { MAP_FAILED };
            move_state.store(state, Ordering::Release);
        });

        let bpp = format.bytes_per_pixel() as usize;
        let dst_stride = rect.width as usize * bpp;
        let dst_offset = (y_start - i64::from(rect.y0)) as usize * dst_stride
            + (x_start - i64::from(rect.x0)) as usize * bpp;
        self.unfenced.push(PendingCopy {
            staging,
            map_state,
            padded_row: padded_row as usize,
            columns: columns as usize,
            rows: rows as usize,
            destination,
            dst_offset,
            dst_stride,
            format,
        });
    }

    fn fence_sync(&mut self, fence: FenceId) {
        self.fenced.push_back(FencedCopies {
            id: fence,
            copies: std::mem::take(&mut self.unfenced),
            deleted: false,
        });
    }

    fn client_wait_sync(&mut self, fence: FenceId, timeout: Duration) -> WaitStatus {
        let Some(position) = self
            .fenced
            .iter()
            .position(|f| f.id == fence && !f.deleted)
        else {
            return WaitStatus::Failed;
        };
        let started = Instant::now();
        let mut polled = false;
        loop {
            if self
                .copies_through(position)
                .all(|c| c.map_state() != MAP_PENDING)
            {
                self.land_through(position);
                return if polled {
                    WaitStatus::ConditionSatisfied
                } else {
                    WaitStatus::AlreadySignaled
                };
            }
            if polled && started.elapsed() >= timeout {
                return WaitStatus::TimeoutExpired;
            }
            if let Err(e) = self.device.poll(PollType::Poll) {
                logwise::error_sync!(
                    "wgpu poll failed: {error}",
                    error = logwise::privacy::LogIt(&e)
                );
                return WaitStatus::Failed;
            }
            polled = true;
            let pause = poll_pause(timeout.saturating_sub(started.elapsed()));
            if pause.is_zero() {
                std::thread::yield_now();
            } else {
                std::thread::sleep(pause);
            }
        }
    }

    fn delete_sync(&mut self, fence: FenceId) {
        //copies adopted by a deleted fence still land on a later wait or finish
        if let Some(f) = self.fenced.iter_mut().find(|f| f.id == fence) {
            f.deleted = true;
        }
        self.fenced.retain(|f| !(f.deleted && f.copies.is_empty()));
    }

    fn finish(&mut self) {
        if let Err(e) = self.device.poll(PollType::Wait) {
            logwise::error_sync!(
                "wgpu poll failed: {error}",
                error = logwise::privacy::LogIt(&e)
            );
        }
        let source = self.source_layout;
        let unfenced = std::mem::take(&mut self.unfenced);
        let mut still_pending = Vec::new();
        let fenced_copies = self.fenced.iter_mut().flat_map(|f| f.copies.drain(..));
        for copy in fenced_copies.chain(unfenced) {
            if copy.map_state() == MAP_PENDING {
                still_pending.push(copy);
            } else {
                copy.land(source);
            }
        }
        if !still_pending.is_empty() {
            logwise::warn_sync!(
                "{count} copies still mapping after finish",
                count = still_pending.len()
            );
        }
        self.unfenced = still_pending;
        self.fenced.retain(|f| !f.deleted);
    }
}
