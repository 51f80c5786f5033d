//! Camera raw files.
//!
//! Bayer data is demosaiced by collapsing every 2x2 block of photosites
//! into one RGB pixel, which halves the resolution but never invents
//! data.  Output is linear sensor response, black level removed and
//! white level stretched to 65535.

use std::io::Read;

use rawloader::RawImageData;

use crate::{error::ReadError, Image, ImageData};

pub fn load<R: Read>(mut reader: R) -> Result<Image, ReadError> {
    // rawloader only reports free-form strings, and failing to recognize
    // a camera is by far the common case.
    let raw = rawloader::decode(&mut reader).map_err(|_| ReadError::UnknownFormat)?;

    let top = raw.crops[0];
    let right = raw.width.saturating_sub(raw.crops[1]);
    let bottom = raw.height.saturating_sub(raw.crops[2]);
    let left = raw.crops[3];
    if right <= left || bottom <= top {
        return Err(ReadError::Corrupt("raw crop area is empty".into()));
    }

    let samples: Vec<f32> = match raw.data {
        RawImageData::Integer(ref data) => data.iter().map(|&v| v as f32).collect(),
        RawImageData::Float(ref data) => data.clone(),
    };
    let black = |c: usize| raw.blacklevels[c.min(3)] as f32;
    let white = |c: usize| (raw.whitelevels[c.min(3)] as f32).max(black(c) + 1.0);
    let normalize =
        |v: f32, c: usize| ((v - black(c)) / (white(c) - black(c)) * 65535.0).clamp(0.0, 65535.0);

    match raw.cpp {
        3 => {
            let mut pixels = Vec::with_capacity((right - left) * (bottom - top));
            for y in top..bottom {
                for x in left..right {
                    let i = (y * raw.width + x) * 3;
                    pixels.push([
                        normalize(samples[i], 0) as u16,
                        normalize(samples[i + 1], 1) as u16,
                        normalize(samples[i + 2], 2) as u16,
                    ]);
                }
            }
            Ok(Image {
                dimensions: (right - left, bottom - top),
                data: ImageData::Rgb16(pixels),
            })
        }

        1 => {
            let out_w = (right - left) / 2;
            let out_h = (bottom - top) / 2;
            let mut pixels = Vec::with_capacity(out_w * out_h);
            for by in 0..out_h {
                for bx in 0..out_w {
                    let mut sum = [0.0f32; 3];
                    let mut count = [0u32; 3];
                    for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                        let x = left + bx * 2 + dx;
                        let y = top + by * 2 + dy;
                        // Anything past blue (e.g. a second green) counts as green.
                        let color = raw.cfa.color_at(y, x);
                        let chan = if color > 2 { 1 } else { color };
                        sum[chan] += normalize(samples[y * raw.width + x], color);
                        count[chan] += 1;
                    }
                    let avg = |c: usize| {
                        if count[c] == 0 {
                            0
                        } else {
                            (sum[c] / count[c] as f32) as u16
                        }
                    };
                    pixels.push([avg(0), avg(1), avg(2)]);
                }
            }
            Ok(Image {
                dimensions: (out_w, out_h),
                data: ImageData::Rgb16(pixels),
            })
        }

        _ => Err(ReadError::UnsupportedFeature),
    }
}
