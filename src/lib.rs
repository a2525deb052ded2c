/*! color_readback reads rendered pixels back from the GPU without stalling the
renderer.

Reading a color buffer the obvious way (issue a read, wait for it, copy) forces the
CPU to wait for the GPU to drain everything queued before the read.  For emulators
and capture tools that read back every frame, that wait is most of the frame.

This crate instead reads through a small ring of persistently mapped transfer
buffers:

| Step | Pipelined (`sync == false`)                  | Synchronous (`sync == true`) |
|------|----------------------------------------------|------------------------------|
| 1    | Issue the read into the current slot         | Issue the read               |
| 2    | Fence it and advance to the next slot        | Flush the whole device       |
| 3    | Wait (bounded) for that slot's older fence   |                              |
| 4    | Copy the slot out, repacking rows            | Copy the slot out            |

Pipelined reads therefore return data one call late, and never wait longer than
[`ReaderConfig::wait_timeout`].

# Layers

* [`commands`] is the boundary to the GPU.  [`GpuCommands`] issues, a [`Backend`]
  executes, and [`Deferred`] or [`Immediate`] connect the two.
* [`multibuffer`] owns the transfer slots and the cursor.
* [`bindings`] caches buffer bindings and tracks slot fences.
* [`color_buffer_reader`] ties them together as [`BufferStorageReader`].

# Backends

[`SoftwareGpu`] runs everything on the CPU and is always available.  With the
`backend_wgpu` feature, `WgpuBackend` reads from a `wgpu::Texture`.
*/

pub mod bindings;
pub mod color_buffer_reader;
pub mod commands;
mod error;
mod imp;
pub mod multibuffer;
pub mod pixel_formats;
mod texture;

pub use bindings::{CachedBindBuffer, CompletionTracker, SlotState};
pub use color_buffer_reader::{BufferStorageReader, ColorBufferReader, ReadRequest, ReaderConfig};
pub use commands::{Backend, Deferred, GpuCommands, Immediate};
pub use error::Error;
pub use imp::{SoftwareFramebuffer, SoftwareGpu};
#[cfg(feature = "backend_wgpu")]
pub use imp::WgpuBackend;
pub use pixel_formats::{ColorFormat, DepthClass, FramebufferFormats, PixelSize};
pub use texture::TextureInfo;
