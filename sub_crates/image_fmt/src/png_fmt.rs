use std::io::{Read, Write};

use crate::{
    error::{ReadError, WriteError},
    Image, ImageData,
};

pub fn load<R: Read>(reader: R) -> Result<Image, ReadError> {
    let mut decoder = png::Decoder::new(reader);
    // Palettes and sub-byte grayscale come out as plain 8-bit channels.
    decoder.set_transformations(png::Transformations::EXPAND);
    let mut reader = decoder.read_info()?;

    let mut pixel_data = vec![0u8; reader.output_buffer_size()];
    let info = reader.next_frame(&mut pixel_data)?;
    pixel_data.truncate(info.buffer_size());

    let dimensions = (info.width as usize, info.height as usize);

    use png::{BitDepth::*, ColorType::*};
    let channels = match info.color_type {
        Rgb => 3,
        Rgba => 4,
        Grayscale => 1,
        GrayscaleAlpha => 2,
        Indexed => return Err(ReadError::UnsupportedFeature),
    };

    // Alpha is dropped: exposures are always opaque.
    match info.bit_depth {
        Eight => Ok(Image {
            dimensions: dimensions,
            data: ImageData::Rgb8(
                pixel_data
                    .chunks_exact(channels)
                    .map(|c| if channels < 3 { [c[0]; 3] } else { [c[0], c[1], c[2]] })
                    .collect(),
            ),
        }),
        Sixteen => Ok(Image {
            dimensions: dimensions,
            data: ImageData::Rgb16(
                pixel_data
                    .chunks_exact(channels * 2)
                    .map(|c| {
                        let v = |i: usize| u16::from_be_bytes([c[i * 2], c[i * 2 + 1]]);
                        if channels < 3 {
                            [v(0); 3]
                        } else {
                            [v(0), v(1), v(2)]
                        }
                    })
                    .collect(),
            ),
        }),
        _ => Err(ReadError::UnsupportedFeature),
    }
}

/// Writes 8-bit RGB pixels as a png.
pub fn save_rgb8<W: Write>(
    writer: W,
    pixels: &[[u8; 3]],
    width: usize,
    height: usize,
) -> Result<(), WriteError> {
    assert_eq!(pixels.len(), width * height);

    let mut encoder = png::Encoder::new(writer, width as u32, height as u32);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&pixels.iter().flatten().copied().collect::<Vec<u8>>())?;
    writer.finish()?;

    Ok(())
}
