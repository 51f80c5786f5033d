//! Loads the image formats that bracketed exposures typically come in,
//! producing plain RGB sample buffers.

mod error;
mod jpeg_fmt;
mod png_fmt;
mod raw_fmt;
mod tiff_fmt;

use std::io::{Read, Seek, SeekFrom};

pub use error::{ReadError, WriteError};
pub use png_fmt::save_rgb8 as save_png;

#[derive(Debug, Clone)]
pub enum ImageData {
    /// 8-bit unsigned RGB channels.
    Rgb8(Vec<[u8; 3]>),

    /// 16-bit unsigned RGB channels.
    Rgb16(Vec<[u16; 3]>),
}

#[derive(Debug, Clone)]
pub struct Image {
    pub dimensions: (usize, usize),
    pub data: ImageData,
}

impl Image {
    pub fn width(&self) -> usize {
        self.dimensions.0
    }

    pub fn height(&self) -> usize {
        self.dimensions.1
    }

    pub fn bit_depth(&self) -> usize {
        match self.data {
            ImageData::Rgb8(_) => 8,
            ImageData::Rgb16(_) => 16,
        }
    }

    /// Widens the image to 16 bits per channel.
    ///
    /// 8-bit values are spread over the full 16-bit range, so that 255
    /// maps to 65535.
    pub fn to_rgb16(self) -> Vec<[u16; 3]> {
        match self.data {
            ImageData::Rgb8(pixels) => pixels
                .iter()
                .map(|p| [p[0] as u16 * 257, p[1] as u16 * 257, p[2] as u16 * 257])
                .collect(),
            ImageData::Rgb16(pixels) => pixels,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Signature {
    Png,
    Jpeg,
    Tiff,
    Other,
}

fn sniff(header: &[u8]) -> Signature {
    if header.starts_with(b"\x89PNG\r\n\x1a\n") {
        Signature::Png
    } else if header.starts_with(&[0xff, 0xd8]) {
        Signature::Jpeg
    } else if header.starts_with(b"II*\0") || header.starts_with(b"MM\0*") {
        Signature::Tiff
    } else {
        Signature::Other
    }
}

pub fn load<R: Read + Seek>(mut reader: R) -> Result<Image, ReadError> {
    let mut header = [0u8; 8];
    let header_len = reader.read(&mut header)?;
    reader.seek(SeekFrom::Start(0))?;

    match sniff(&header[..header_len]) {
        Signature::Png => png_fmt::load(reader),
        Signature::Jpeg => jpeg_fmt::load(reader),
        Signature::Tiff => {
            // Most camera raw formats are tiff containers, and their
            // first IFD is usually just a small preview.  So give the raw
            // decoder the first shot.
            match raw_fmt::load(&mut reader) {
                Err(ReadError::UnknownFormat) => {} // Continue to plain tiff.
                r => return r,
            }
            reader.seek(SeekFrom::Start(0))?;
            tiff_fmt::load(reader)
        }
        Signature::Other => raw_fmt::load(reader),
    }
}
