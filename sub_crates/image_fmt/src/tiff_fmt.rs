use std::io::{Read, Seek};

use tiff::{decoder::DecodingResult, ColorType};

use crate::{error::ReadError, Image, ImageData};

pub fn load<R: Read + Seek>(reader: R) -> Result<Image, ReadError> {
    let mut decoder =
        tiff::decoder::Decoder::new(reader)?.with_limits(tiff::decoder::Limits::unlimited());

    let (width, height) = decoder.dimensions()?;
    let dimensions = (width as usize, height as usize);
    let colortype = decoder.colortype()?;

    let channels = match colortype {
        ColorType::RGB(_) => 3,
        ColorType::RGBA(_) => 4,
        ColorType::Gray(_) => 1,
        ColorType::GrayA(_) => 2,
        _ => return Err(ReadError::UnsupportedFeature),
    };

    fn to_rgb<T: Copy>(data: &[T], channels: usize) -> Vec<[T; 3]> {
        data.chunks_exact(channels)
            .map(|c| if channels < 3 { [c[0]; 3] } else { [c[0], c[1], c[2]] })
            .collect()
    }

    match decoder.read_image()? {
        DecodingResult::U8(pixel_data) => Ok(Image {
            dimensions: dimensions,
            data: ImageData::Rgb8(to_rgb(&pixel_data, channels)),
        }),
        DecodingResult::U16(pixel_data) => Ok(Image {
            dimensions: dimensions,
            data: ImageData::Rgb16(to_rgb(&pixel_data, channels)),
        }),
        _ => Err(ReadError::UnsupportedFeature),
    }
}
