// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//software is always available; wgpu behind its feature

mod software;
pub use software::{SoftwareFramebuffer, SoftwareGpu};

#[cfg(feature = "backend_wgpu")]
mod wgpu;

#[cfg(feature = "backend_wgpu")]
pub use wgpu::WgpuBackend;
