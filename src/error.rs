// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Errors surfaced while setting up readback resources.
//!
//! Only setup can fail.  Once a reader exists, per-read problems are reported as
//! "no data" (`None`) and wait timeouts are tolerated, so nothing here is produced
//! on the hot path.

/// Fatal resource errors.
///
/// These abort construction of a reader; there is no degraded mode and nothing
/// is retried.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The backend handed out fewer buffer names than requested.
    #[error("requested {requested} transfer buffers but the backend generated {generated}")]
    BufferGeneration { requested: usize, generated: usize },
    /// Immutable storage could not be allocated for a slot.
    #[error("could not allocate {bytes} bytes of persistent storage for slot {slot}")]
    StorageAllocation { slot: usize, bytes: usize },
    /// Persistent mapping of a slot returned no memory.
    #[error("could not map transfer buffer for slot {slot}")]
    MapFailed { slot: usize },
    /// The thread that executes deferred commands could not be started.
    #[error("could not start the command worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),
    /// No wgpu adapter could be found for a headless device.
    #[cfg(feature = "backend_wgpu")]
    #[error("no wgpu adapter available")]
    NoAdapter,
    #[cfg(feature = "backend_wgpu")]
    #[error(transparent)]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    /// The source texture has a format readback cannot convert from.
    #[cfg(feature = "backend_wgpu")]
    #[error("cannot read back from a {0:?} texture")]
    UnsupportedSource(wgpu::TextureFormat),
}
