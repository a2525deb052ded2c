// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Reading color buffers back to the CPU.

[`BufferStorageReader`] pipelines readback through a [`TransferPool`]: each call
issues a read into the current slot, moves on, and returns whatever landed in the
slot it moved to.  With the default two slots the data returned by one call is the
data requested by the call before it.

```
use color_readback::{BufferStorageReader, CachedBindBuffer, FramebufferFormats, Immediate,
    PixelSize, ReadRequest, ReaderConfig, SoftwareGpu, TextureInfo};
use std::sync::Arc;

let gpu = SoftwareGpu::new(8, 8);
gpu.framebuffer().fill(|_, _| [255, 0, 0, 255]);
let binder = Arc::new(CachedBindBuffer::new(Arc::new(Immediate::new(gpu))));
let mut reader: BufferStorageReader<_> = BufferStorageReader::new(
    binder,
    TextureInfo::new(8, 8, 4),
    FramebufferFormats::rgba8(),
    ReaderConfig::default(),
).unwrap();

//synchronous reads return the data just requested
let request = ReadRequest::new(0, 0, 2, 1, PixelSize::Bits32).with_sync(true);
assert_eq!(reader.read_pixels(&request), Some(&[255, 0, 0, 255, 255, 0, 0, 255][..]));
reader.clean_up();
```
*/

use crate::bindings::bind_buffer::CachedBindBuffer;
use crate::bindings::resource_tracking::{CompletionTracker, SlotState};
use crate::commands::{BufferTarget, GpuCommands, ReadRect};
use crate::multibuffer::TransferPool;
use crate::pixel_formats::{FramebufferFormats, PixelSize};
use crate::texture::TextureInfo;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

/// How long a pipelined read waits for its slot before reading it anyway.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(100);

/// Reader settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Upper bound on the fence wait in pipelined mode.  A timed-out wait is not an
    /// error; the slot is read regardless.
    pub wait_timeout: Duration,
    /// Name used in log output.
    pub debug_name: String,
}

impl ReaderConfig {
    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    pub fn with_debug_name(mut self, debug_name: impl Into<String>) -> Self {
        self.debug_name = debug_name.into();
        self
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        ReaderConfig {
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            debug_name: "color_buffer_reader".to_string(),
        }
    }
}

/// A rectangle of the color buffer to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub x0: i32,
    pub y0: i32,
    pub width: u32,
    pub height: u32,
    /// Pixel depth of the buffer being emulated; selects the color or monochrome format.
    pub size: PixelSize,
    /// Flush and return this call's data instead of pipelining.
    pub sync: bool,
}

impl ReadRequest {
    pub const fn new(x0: i32, y0: i32, width: u32, height: u32, size: PixelSize) -> Self {
        ReadRequest {
            x0,
            y0,
            width,
            height,
            size,
            sync: false,
        }
    }

    pub const fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }
}

/**
Something that reads a texture's color buffer back to host memory.

The returned slice borrows the reader and holds `width * bytes_per_pixel` bytes per
row, `height` rows, packed.
*/
pub trait ColorBufferReader {
    fn read_pixels(&mut self, request: &ReadRequest) -> Option<&[u8]>;
    /// Resets the binding state the reader leaves behind.
    fn clean_up(&mut self);
    fn texture(&self) -> &TextureInfo;
}

/**
Pipelined readback through `SLOTS` persistently mapped pack buffers.

# Latency

In pipelined mode (`sync == false`) each call returns the contents of the slot the
cursor advanced to, which holds the read issued `SLOTS - 1` calls earlier.  Calls
before the pool has cycled once return the slot's initial contents (zeroes).

# Timeouts

If the fence of the slot about to be read has not signaled within
[`ReaderConfig::wait_timeout`], the slot is read anyway.  The data may be partly
stale.  This trades correctness of a single frame for never stalling the caller.
*/
pub struct BufferStorageReader<C: GpuCommands, const SLOTS: usize = 2> {
    binder: Arc<CachedBindBuffer<C>>,
    texture: TextureInfo,
    formats: FramebufferFormats,
    config: ReaderConfig,
    pool: Option<TransferPool<SLOTS>>,
    tracker: CompletionTracker<SLOTS>,
    destination: Vec<u8>,
}

impl<C: GpuCommands, const SLOTS: usize> BufferStorageReader<C, SLOTS> {
    /**
    Allocates and maps the transfer slots, each sized to the texture's byte footprint.

    # Errors

    Fails if any slot cannot be generated, allocated or mapped.  No buffers are left
    behind on failure.
    */
    pub fn new(
        binder: Arc<CachedBindBuffer<C>>,
        texture: TextureInfo,
        formats: FramebufferFormats,
        config: ReaderConfig,
    ) -> Result<Self, crate::Error> {
        let pool = TransferPool::initialize(&binder, texture.texture_bytes)?;
        logwise::info_sync!(
            "{name}: reading {width}x{height} through {slots} slots",
            name = logwise::privacy::LogIt(&config.debug_name),
            width = texture.real_width,
            height = texture.real_height,
            slots = SLOTS
        );
        Ok(BufferStorageReader {
            binder,
            texture,
            formats,
            config,
            pool: Some(pool),
            tracker: CompletionTracker::new(),
            destination: vec![0; texture.texture_bytes],
        })
    }

    /**
    Issues a read of `request` and returns the data of the slot that is current once
    the read has been issued.

    Returns `None` when the request does not fit the texture or the slots, when the
    reader has been released, or when the slot's storage is gone.  A rejected request
    issues no commands.  Zero-sized requests go through the usual issue and rotate
    steps and return an empty slice.
    */
    pub fn read_pixels(&mut self, request: &ReadRequest) -> Option<&[u8]> {
        let Some(pool) = self.pool.as_mut() else {
            logwise::warn_sync!(
                "{name}: read after release",
                name = logwise::privacy::LogIt(&self.config.debug_name)
            );
            return None;
        };
        let format = self.formats.for_size(request.size);
        let bpp = format.bytes_per_pixel() as usize;
        let real_width = self.texture.real_width;
        let src_stride = real_width as usize * bpp;
        let dst_row = request.width as usize * bpp;
        let rows = request.height as usize;
        let fits = request.width <= real_width
            && request.height <= self.texture.real_height
            && src_stride
                .checked_mul(rows)
                .is_some_and(|n| n <= pool.byte_len() && n <= self.destination.len());
        if !fits {
            logwise::warn_sync!(
                "{name}: rejected read {request}",
                name = logwise::privacy::LogIt(&self.config.debug_name),
                request = logwise::privacy::LogIt(request)
            );
            return None;
        }

        let commands: &C = self.binder.commands();
        self.binder
            .bind(BufferTarget::PixelPack, Some(pool.current().buffer()));
        //the whole row is read so the slot keeps the texture's stride
        commands.read_pixels(
            ReadRect {
                x0: request.x0,
                y0: request.y0,
                width: real_width,
                height: request.height,
            },
            format,
        );

        if request.sync {
            let _flush = logwise::perfwarn_begin!("BufferStorageReader::read_pixels sync flush");
            commands.finish();
        } else {
            self.tracker.record_completion(pool.cursor(), commands);
            let next = pool.advance();
            self.tracker
                .wait_and_clear(next, self.config.wait_timeout, commands);
        }
        logwise::trace_sync!(
            "{name}: reading slot {slot} ({rows} rows of {bytes} bytes)",
            name = logwise::privacy::LogIt(&self.config.debug_name),
            slot = pool.cursor(),
            rows = rows,
            bytes = dst_row
        );

        let destination = &mut self.destination;
        pool.current().mapped().read(|mapped| {
            for row in 0..rows {
                let src = &mapped[row * src_stride..row * src_stride + dst_row];
                destination[row * dst_row..(row + 1) * dst_row].copy_from_slice(src);
            }
        })?;
        Some(&self.destination[..dst_row * rows])
    }

    /// Unbinds the pixel-pack target.  Safe to call at any time, any number of times.
    pub fn clean_up(&mut self) {
        self.binder.bind(BufferTarget::PixelPack, None);
    }

    /**
    Deletes outstanding fences and every transfer buffer.

    Later reads return `None`.  Also runs on drop; calling it more than once does
    nothing.
    */
    pub fn release(&mut self) {
        let Some(pool) = self.pool.take() else {
            return;
        };
        self.clean_up();
        let commands: &C = self.binder.commands();
        self.tracker.clear_all(commands);
        pool.teardown(&self.binder);
        logwise::info_sync!(
            "{name}: released",
            name = logwise::privacy::LogIt(&self.config.debug_name)
        );
    }

    /// The slot the next read goes into, or `None` once released.
    pub fn cursor(&self) -> Option<usize> {
        self.pool.as_ref().map(TransferPool::cursor)
    }

    pub fn slot_state(&self, slot: usize) -> SlotState {
        self.tracker.state(slot)
    }

    pub fn texture(&self) -> &TextureInfo {
        &self.texture
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn is_released(&self) -> bool {
        self.pool.is_none()
    }
}

impl<C: GpuCommands, const SLOTS: usize> ColorBufferReader for BufferStorageReader<C, SLOTS> {
    fn read_pixels(&mut self, request: &ReadRequest) -> Option<&[u8]> {
        BufferStorageReader::read_pixels(self, request)
    }

    fn clean_up(&mut self) {
        BufferStorageReader::clean_up(self)
    }

    fn texture(&self) -> &TextureInfo {
        BufferStorageReader::texture(self)
    }
}

impl<C: GpuCommands, const SLOTS: usize> Drop for BufferStorageReader<C, SLOTS> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<C: GpuCommands, const SLOTS: usize> Debug for BufferStorageReader<C, SLOTS> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferStorageReader")
            .field("debug_name", &self.config.debug_name)
            .field("texture", &self.texture)
            .field("pool", &self.pool)
            .field("tracker", &self.tracker)
            .finish()
    }
}
