use std::io::Read;

use crate::{error::ReadError, Image, ImageData};

pub fn load<R: Read>(reader: R) -> Result<Image, ReadError> {
    let mut decoder = jpeg_decoder::Decoder::new(reader);
    let pixel_data = decoder.decode()?;

    let info = decoder.info().ok_or(ReadError::UnsupportedFeature)?;
    let dimensions = (info.width as usize, info.height as usize);
    let pixel_count = dimensions.0 * dimensions.1;

    use jpeg_decoder::PixelFormat::*;
    match info.pixel_format {
        RGB24 => {
            assert_eq!(pixel_data.len(), pixel_count * 3);
            Ok(Image {
                dimensions: dimensions,
                data: ImageData::Rgb8(
                    pixel_data
                        .chunks_exact(3)
                        .map(|c| [c[0], c[1], c[2]])
                        .collect(),
                ),
            })
        }

        L8 => {
            assert_eq!(pixel_data.len(), pixel_count);
            Ok(Image {
                dimensions: dimensions,
                data: ImageData::Rgb8(pixel_data.iter().map(|&c| [c, c, c]).collect()),
            })
        }

        L16 => {
            assert_eq!(pixel_data.len(), pixel_count * 2);
            Ok(Image {
                dimensions: dimensions,
                // jpeg-decoder's 16-bit buffers are native endian.
                data: ImageData::Rgb16(
                    pixel_data
                        .chunks_exact(2)
                        .map(|c| {
                            let v = u16::from_ne_bytes([c[0], c[1]]);
                            [v, v, v]
                        })
                        .collect(),
                ),
            })
        }

        _ => Err(ReadError::UnsupportedFeature),
    }
}
