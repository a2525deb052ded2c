// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Describes the texture a color buffer reader is attached to.
*/

/// Native size and byte footprint of a render target.
///
/// Transfer slots and the reader's destination buffer are both sized to
/// `texture_bytes`, and slot rows are always laid out at `real_width`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureInfo {
    pub real_width: u32,
    pub real_height: u32,
    pub texture_bytes: usize,
}

impl TextureInfo {
    /// A texture of `real_width * real_height` pixels of `bytes_per_pixel` bytes.
    pub const fn new(real_width: u32, real_height: u32, bytes_per_pixel: u8) -> Self {
        TextureInfo {
            real_width,
            real_height,
            texture_bytes: real_width as usize * real_height as usize * bytes_per_pixel as usize,
        }
    }

    /// A texture whose byte footprint is known from elsewhere.
    pub const fn with_bytes(real_width: u32, real_height: u32, texture_bytes: usize) -> Self {
        TextureInfo {
            real_width,
            real_height,
            texture_bytes,
        }
    }
}
