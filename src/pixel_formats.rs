// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Pixel format descriptors used when reading the color buffer back.
//!
//! A readback names its output format with a [`ColorFormat`], a triple of
//! channel layout, component type and bytes per pixel.  The framebuffer offers two
//! such triples (see [`FramebufferFormats`]): one for full-color reads and one for
//! monochrome reads.  Which one a read uses depends on the depth of the image
//! being read, expressed as a [`PixelSize`].
//!
//! # Examples
//!
//! ```
//! use color_readback::pixel_formats::{DepthClass, FramebufferFormats, PixelSize};
//!
//! let formats = FramebufferFormats::rgba8();
//! assert_eq!(PixelSize::Bits16.depth_class(), DepthClass::FullColor);
//! assert_eq!(formats.for_size(PixelSize::Bits16).bytes_per_pixel(), 4);
//! assert_eq!(formats.for_size(PixelSize::Bits8).bytes_per_pixel(), 1);
//! ```

/*
Unlike the rest of the GPU stack, formats here are plain values rather than
zero-sized types.  The format is picked per read from a runtime depth, so there
is nothing for the typesystem to check.
 */
pub mod png_support;

pub use half::f16;

/// Order and number of channels in a pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelLayout {
    Rgba,
    Bgra,
    /// Only the red channel is kept.
    Red,
}

impl PixelLayout {
    pub const fn channels(self) -> u8 {
        match self {
            PixelLayout::Rgba | PixelLayout::Bgra => 4,
            PixelLayout::Red => 1,
        }
    }
}

/// Storage type of a single channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentType {
    /// 8-bit normalized.
    UnsignedByte,
    /// IEEE half float, native endian.
    HalfFloat,
    /// IEEE single float, native endian.
    Float,
}

impl ComponentType {
    pub const fn byte_len(self) -> u8 {
        match self {
            ComponentType::UnsignedByte => 1,
            ComponentType::HalfFloat => 2,
            ComponentType::Float => 4,
        }
    }
}

/// A (layout, component type, bytes per pixel) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorFormat {
    layout: PixelLayout,
    component: ComponentType,
    bytes_per_pixel: u8,
}

impl ColorFormat {
    pub const RGBA8: ColorFormat = ColorFormat::new(PixelLayout::Rgba, ComponentType::UnsignedByte);
    pub const BGRA8: ColorFormat = ColorFormat::new(PixelLayout::Bgra, ComponentType::UnsignedByte);
    pub const R8: ColorFormat = ColorFormat::new(PixelLayout::Red, ComponentType::UnsignedByte);
    pub const RGBA16F: ColorFormat = ColorFormat::new(PixelLayout::Rgba, ComponentType::HalfFloat);
    pub const R16F: ColorFormat = ColorFormat::new(PixelLayout::Red, ComponentType::HalfFloat);
    pub const RGBA32F: ColorFormat = ColorFormat::new(PixelLayout::Rgba, ComponentType::Float);
    pub const R32F: ColorFormat = ColorFormat::new(PixelLayout::Red, ComponentType::Float);

    pub const fn new(layout: PixelLayout, component: ComponentType) -> Self {
        ColorFormat {
            layout,
            component,
            bytes_per_pixel: layout.channels() * component.byte_len(),
        }
    }
    pub const fn layout(&self) -> PixelLayout {
        self.layout
    }
    pub const fn component(&self) -> ComponentType {
        self.component
    }
    pub const fn bytes_per_pixel(&self) -> u8 {
        self.bytes_per_pixel
    }

    /// Encodes one RGBA8 pixel into `dst`, which must be exactly
    /// [`Self::bytes_per_pixel`] long.
    pub fn encode_rgba8(&self, rgba: [u8; 4], dst: &mut [u8]) {
        debug_assert_eq!(dst.len(), self.bytes_per_pixel as usize);
        let mut channels = [0u8; 4];
        let used = match self.layout {
            PixelLayout::Rgba => {
                channels = rgba;
                4
            }
            PixelLayout::Bgra => {
                channels = [rgba[2], rgba[1], rgba[0], rgba[3]];
                4
            }
            PixelLayout::Red => {
                channels[0] = rgba[0];
                1
            }
        };
        let width = self.component.byte_len() as usize;
        for (c, out) in channels[..used].iter().zip(dst.chunks_exact_mut(width)) {
            match self.component {
                ComponentType::UnsignedByte => out[0] = *c,
                ComponentType::HalfFloat => {
                    out.copy_from_slice(&f16::from_f32(*c as f32 / 255.0).to_ne_bytes())
                }
                ComponentType::Float => out.copy_from_slice(&(*c as f32 / 255.0).to_ne_bytes()),
            }
        }
    }

    /// Encodes a row of RGBA8 pixels.
    ///
    /// `dst` holds as many pixels of this format as fit; extra source pixels are
    /// ignored.
    pub fn encode_rgba8_row(&self, src: &[u8], dst: &mut [u8]) {
        let bpp = self.bytes_per_pixel as usize;
        for (pixel, out) in src.chunks_exact(4).zip(dst.chunks_exact_mut(bpp)) {
            self.encode_rgba8([pixel[0], pixel[1], pixel[2], pixel[3]], out);
        }
    }
}

/// Bit depth of the image being read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PixelSize {
    Bits4,
    Bits8,
    Bits16,
    Bits32,
}

impl PixelSize {
    /// Depths deeper than 8 bits are full color; 8 bits and below are monochrome.
    pub const fn depth_class(self) -> DepthClass {
        match self {
            PixelSize::Bits4 | PixelSize::Bits8 => DepthClass::Monochrome,
            PixelSize::Bits16 | PixelSize::Bits32 => DepthClass::FullColor,
        }
    }
}

/// Whether a read uses the full-color or the monochrome format triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthClass {
    FullColor,
    Monochrome,
}

impl From<PixelSize> for DepthClass {
    fn from(size: PixelSize) -> Self {
        size.depth_class()
    }
}

/// The two format triples offered by the framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferFormats {
    pub color: ColorFormat,
    pub monochrome: ColorFormat,
}

impl FramebufferFormats {
    pub const fn new(color: ColorFormat, monochrome: ColorFormat) -> Self {
        FramebufferFormats { color, monochrome }
    }

    /// RGBA8 color with R8 monochrome, the usual pair.
    pub const fn rgba8() -> Self {
        FramebufferFormats::new(ColorFormat::RGBA8, ColorFormat::R8)
    }

    pub const fn for_class(&self, class: DepthClass) -> ColorFormat {
        match class {
            DepthClass::FullColor => self.color,
            DepthClass::Monochrome => self.monochrome,
        }
    }

    pub const fn for_size(&self, size: PixelSize) -> ColorFormat {
        self.for_class(size.depth_class())
    }
}

impl Default for FramebufferFormats {
    fn default() -> Self {
        FramebufferFormats::rgba8()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_per_pixel_follows_layout_and_component() {
        assert_eq!(ColorFormat::RGBA8.bytes_per_pixel(), 4);
        assert_eq!(ColorFormat::R8.bytes_per_pixel(), 1);
        assert_eq!(ColorFormat::RGBA16F.bytes_per_pixel(), 8);
        assert_eq!(ColorFormat::R32F.bytes_per_pixel(), 4);
        assert_eq!(ColorFormat::RGBA32F.bytes_per_pixel(), 16);
    }

    #[test]
    fn depth_boundary_is_eight_bits() {
        let formats = FramebufferFormats::new(ColorFormat::RGBA32F, ColorFormat::R16F);
        assert_eq!(formats.for_size(PixelSize::Bits4), ColorFormat::R16F);
        assert_eq!(formats.for_size(PixelSize::Bits8), ColorFormat::R16F);
        assert_eq!(formats.for_size(PixelSize::Bits16), ColorFormat::RGBA32F);
        assert_eq!(formats.for_size(PixelSize::Bits32), ColorFormat::RGBA32F);
    }

    #[test]
    fn encode_swizzles_and_narrows() {
        let src = [10, 20, 30, 40, 50, 60, 70, 80];
        let mut bgra = [0u8; 8];
        ColorFormat::BGRA8.encode_rgba8_row(&src, &mut bgra);
        assert_eq!(bgra, [30, 20, 10, 40, 70, 60, 50, 80]);

        let mut red = [0u8; 2];
        ColorFormat::R8.encode_rgba8_row(&src, &mut red);
        assert_eq!(red, [10, 50]);
    }

    #[test]
    fn encode_float_components() {
        let mut out = [0u8; 4];
        ColorFormat::R32F.encode_rgba8([255, 0, 0, 0], &mut out);
        assert_eq!(f32::from_ne_bytes(out), 1.0);

        let mut half = [0u8; 2];
        ColorFormat::R16F.encode_rgba8([0, 9, 9, 9], &mut half);
        assert_eq!(f16::from_ne_bytes(half), f16::from_f32(0.0));
    }
}
