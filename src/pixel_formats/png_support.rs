// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Dumping readbacks to PNG, mostly for debugging.
use crate::pixel_formats::{ColorFormat, ComponentType, PixelLayout};
use png::{BitDepth, ColorType};

#[derive(Debug, thiserror::Error)]
pub enum PngError {
    #[error("no PNG encoding for {0:?}")]
    UnsupportedFormat(ColorFormat),
    #[error("expected {expected} bytes of pixel data, got {actual}")]
    Size { expected: usize, actual: usize },
    #[error(transparent)]
    Encoding(#[from] png::EncodingError),
}

fn png_color_type(format: ColorFormat) -> Option<ColorType> {
    match (format.layout(), format.component()) {
        (PixelLayout::Rgba | PixelLayout::Bgra, ComponentType::UnsignedByte) => Some(ColorType::Rgba),
        (PixelLayout::Red, ComponentType::UnsignedByte) => Some(ColorType::Grayscale),
        _ => None,
    }
}

/**
Encodes packed readback rows as a PNG image.

`data` is laid out the way [`crate::ColorBufferReader::read_pixels`] returns it:
`height` rows of `width * bytes_per_pixel` bytes, no padding.  Only 8-bit formats
are supported.
*/
pub fn encode_png(
    data: &[u8],
    width: u32,
    height: u32,
    format: ColorFormat,
) -> Result<Vec<u8>, PngError> {
    let color_type = png_color_type(format).ok_or(PngError::UnsupportedFormat(format))?;
    let expected = width as usize * height as usize * format.bytes_per_pixel() as usize;
    if data.len() != expected {
        return Err(PngError::Size {
            expected,
            actual: data.len(),
        });
    }
    //png has no BGRA
    let swizzled;
    let data = if format.layout() == PixelLayout::Bgra {
        swizzled = data
            .chunks_exact(4)
            .flat_map(|p| [p[2], p[1], p[0], p[3]])
            .collect::<Vec<u8>>();
        &swizzled[..]
    } else {
        data
    };

    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, width, height);
        encoder.set_color(color_type);
        encoder.set_depth(BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(data)?;
        writer.finish()?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_rgba_with_png_signature() {
        let data = vec![255u8; 2 * 3 * 4];
        let png = encode_png(&data, 2, 3, ColorFormat::RGBA8).unwrap();
        assert_eq!(&png[..8], &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
    }

    #[test]
    fn rejects_float_and_short_data() {
        assert!(matches!(
            encode_png(&[0; 16], 1, 1, ColorFormat::RGBA32F),
            Err(PngError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            encode_png(&[0; 3], 2, 2, ColorFormat::R8),
            Err(PngError::Size {
                expected: 4,
                actual: 3
            })
        ));
    }
}
