//! The shared-exponent pixel encoding used by Radiance .hdr files.
//!
//! Each pixel is four bytes: one 8-bit mantissa per channel followed by
//! a single exponent byte, biased by 128.  The mantissas are scaled so
//! that the largest channel lands in [128, 255].

const EXP_BIAS: i32 = 128;

/// Exact 2^exp for exponents in [-126, 127].
#[inline(always)]
fn exp2i(exp: i32) -> f32 {
    f32::from_bits(((exp + 127) as u32) << 23)
}

/// floor(log2(n)) read straight out of the IEEE exponent field.
///
/// Subnormals come back as -127, infinity and NaN as 128.
#[inline(always)]
fn floor_log2(n: f32) -> i32 {
    ((n.to_bits() >> 23) & 0xff) as i32 - 127
}

/// Packs a linear RGB triple.
///
/// Negative and NaN channels are not representable; they are caught by a
/// debug assertion.  Values too small to represent encode as black.
#[inline]
pub fn encode(rgb: [f32; 3]) -> [u8; 4] {
    debug_assert!(
        rgb.iter().all(|c| *c >= 0.0 && !c.is_nan()),
        "rgbe::encode(): channels must be non-negative and not NaN, got {:?}",
        rgb
    );

    let largest = rgb[0].max(rgb[1]).max(rgb[2]);
    if largest <= 1.0e-32 {
        return [0; 4];
    }

    let e = floor_log2(largest).clamp(-EXP_BIAS, 255 - EXP_BIAS);
    let scale = exp2i(7 - e);
    let m = |c: f32| (c * scale).min(255.0) as u8;

    [m(rgb[0]), m(rgb[1]), m(rgb[2]), (e + EXP_BIAS) as u8]
}

/// Unpacks an RGBE pixel.  Lossless with respect to what `encode` kept.
#[inline]
pub fn decode(rgbe: [u8; 4]) -> [f32; 3] {
    if rgbe[3] == 0 {
        return [0.0; 3];
    }
    let scale = 2.0f32.powi(rgbe[3] as i32 - EXP_BIAS - 7);
    [
        rgbe[0] as f32 * scale,
        rgbe[1] as f32 * scale,
        rgbe[2] as f32 * scale,
    ]
}
