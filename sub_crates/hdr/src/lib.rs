//! Reading and writing Radiance .hdr (RGBE) image files.

pub mod rgbe;

use std::io::{BufRead, Write};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ReadError {
    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error("not a Radiance .hdr file: {0}")]
    Format(&'static str),

    #[error("unsupported .hdr feature: {0}")]
    Unsupported(&'static str),
}

/// A decoded .hdr image, stored as linear RGB in row-major order.
#[derive(Debug, Clone)]
pub struct HdrImage {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<[f32; 3]>,
}

/// Writes `image` as an uncompressed Radiance .hdr file.
///
/// Every pixel is multiplied by `exposure` before encoding.
pub fn write_hdr<W: Write>(
    out: &mut W,
    image: &[[f32; 3]],
    width: usize,
    height: usize,
    exposure: f32,
) -> std::io::Result<()> {
    assert_eq!(image.len(), width * height);

    out.write_all(b"#?RADIANCE\n")?;
    out.write_all(b"FORMAT=32-bit_rle_rgbe\n\n")?;
    out.write_all(format!("-Y {} +X {}\n", height, width).as_bytes())?;

    let mut scanline = Vec::with_capacity(width * 4);
    for row in image.chunks(width.max(1)) {
        scanline.clear();
        for pixel in row {
            scanline.extend_from_slice(&rgbe::encode([
                pixel[0] * exposure,
                pixel[1] * exposure,
                pixel[2] * exposure,
            ]));
        }
        out.write_all(&scanline)?;
    }
    out.flush()?;

    Ok(())
}

/// Reads a Radiance .hdr file with the standard `-Y H +X W` orientation.
///
/// Both flat and new-style run-length encoded scanlines are supported.
pub fn read_hdr<R: BufRead>(input: &mut R) -> Result<HdrImage, ReadError> {
    let mut line = String::new();

    // Header.
    input.read_line(&mut line)?;
    if !line.starts_with("#?") {
        return Err(ReadError::Format("missing #? signature"));
    }
    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Err(ReadError::Format("header never terminated"));
        }
        let field = line.trim_end();
        if field.is_empty() {
            break;
        }
        if let Some(format) = field.strip_prefix("FORMAT=") {
            if format != "32-bit_rle_rgbe" {
                return Err(ReadError::Unsupported("only RGBE pixel data is supported"));
            }
        }
    }

    // Resolution.
    line.clear();
    input.read_line(&mut line)?;
    let (width, height) = match line.split_whitespace().collect::<Vec<_>>()[..] {
        ["-Y", h, "+X", w] => match (w.parse::<usize>(), h.parse::<usize>()) {
            (Ok(w), Ok(h)) => (w, h),
            _ => return Err(ReadError::Format("bad resolution line")),
        },
        _ => return Err(ReadError::Unsupported("image orientation")),
    };

    // Pixels.
    let mut pixels = Vec::with_capacity(width * height);
    let mut scanline = vec![[0u8; 4]; width];
    for _ in 0..height {
        read_scanline(input, &mut scanline)?;
        pixels.extend(scanline.iter().map(|p| rgbe::decode(*p)));
    }

    Ok(HdrImage {
        width,
        height,
        pixels,
    })
}

fn read_scanline<R: BufRead>(input: &mut R, scanline: &mut [[u8; 4]]) -> Result<(), ReadError> {
    let width = scanline.len();
    if width == 0 {
        return Ok(());
    }

    let mut first = [0u8; 4];
    input.read_exact(&mut first)?;

    let is_rle = first[0] == 2
        && first[1] == 2
        && first[2] & 0x80 == 0
        && (8..0x8000).contains(&width);
    if !is_rle {
        if first[0] == 1 && first[1] == 1 && first[2] == 1 {
            return Err(ReadError::Unsupported("old-style run-length encoding"));
        }
        scanline[0] = first;
        for pixel in scanline[1..].iter_mut() {
            input.read_exact(pixel)?;
        }
        return Ok(());
    }

    if ((first[2] as usize) << 8 | first[3] as usize) != width {
        return Err(ReadError::Format("scanline length mismatch"));
    }

    // New-style RLE stores each component as its own run-length stream.
    for chan in 0..4 {
        let mut x = 0;
        while x < width {
            let mut code = [0u8; 2];
            input.read_exact(&mut code[..1])?;
            if code[0] > 128 {
                let run = (code[0] - 128) as usize;
                input.read_exact(&mut code[1..])?;
                if run == 0 || x + run > width {
                    return Err(ReadError::Format("bad scanline run"));
                }
                for pixel in &mut scanline[x..(x + run)] {
                    pixel[chan] = code[1];
                }
                x += run;
            } else {
                let count = code[0] as usize;
                if count == 0 || x + count > width {
                    return Err(ReadError::Format("bad scanline literal"));
                }
                for pixel in &mut scanline[x..(x + count)] {
                    input.read_exact(&mut code[1..])?;
                    pixel[chan] = code[1];
                }
                x += count;
            }
        }
    }

    Ok(())
}
