use std::{fs::File, io::BufReader, path::Path};

use crate::{error::LoadError, ExposureLayer, ImageInfo};

/// Loads an image file as an exposure layer, along with whatever exposure
/// metadata its Exif data has.
pub fn load_image(path: &Path) -> Result<ExposureLayer, LoadError> {
    let io_err = |e: std::io::Error| LoadError::IO {
        path: path.to_path_buf(),
        source: e,
    };

    // Load image.
    let img = image_fmt::load(BufReader::new(File::open(path).map_err(io_err)?)).map_err(|e| {
        LoadError::Image {
            path: path.to_path_buf(),
            source: e,
        }
    })?;
    let (width, height) = img.dimensions;

    // Get exposure metadata from EXIF data.
    let (exposure_time, fstop, sensitivity) = {
        let mut exposure_time = None;
        let mut fstop = None;
        let mut sensitivity = None;

        let mut file = BufReader::new(File::open(path).map_err(io_err)?);
        if let Ok(img_exif) = exif::Reader::new().read_from_container(&mut file) {
            if let Some(&exif::Value::Rational(ref n)) = img_exif
                .get_field(exif::Tag::ExposureTime, exif::In::PRIMARY)
                .map(|n| &n.value)
            {
                if !n.is_empty() && n[0].num != 0 && n[0].denom != 0 {
                    exposure_time = Some(n[0]);
                }
            }
            if let Some(&exif::Value::Rational(ref n)) = img_exif
                .get_field(exif::Tag::FNumber, exif::In::PRIMARY)
                .map(|n| &n.value)
            {
                if !n.is_empty() && n[0].num != 0 && n[0].denom != 0 {
                    fstop = Some(n[0]);
                }
            }
            if let Some(Some(n)) = img_exif
                .get_field(exif::Tag::PhotographicSensitivity, exif::In::PRIMARY)
                .map(|n| n.value.get_uint(0))
            {
                if n != 0 {
                    sensitivity = Some(n);
                }
            }
        }

        (exposure_time, fstop, sensitivity)
    };

    let total_exposure = total_exposure(
        exposure_time.map(|n| n.to_f64()),
        fstop.map(|n| n.to_f64()),
        sensitivity,
    );

    let info = ImageInfo {
        filename: path
            .file_name()
            .map(|p| p.to_string_lossy().into())
            .unwrap_or_else(|| "".into()),
        full_filepath: path.to_string_lossy().into(),

        width: width,
        height: height,
        exposure: total_exposure,

        exposure_time: exposure_time.map(|n| (n.num, n.denom)),
        fstop: fstop.map(|n| (n.num, n.denom)),
        iso: sensitivity,
    };

    tracing::info!(
        "loaded \"{}\": {}x{}, {}-bit, exposure {:?}",
        info.filename,
        width,
        height,
        img.bit_depth(),
        total_exposure
    );

    Ok(ExposureLayer::new(img.to_rgb16(), width, height).with_info(info))
}

/// Over-all exposure from shutter time, f-number, and ISO.
///
/// Missing f-number or ISO are simply left out, but without a shutter
/// time there's nothing to go on.
pub fn total_exposure(
    exposure_time: Option<f64>,
    fstop: Option<f64>,
    sensitivity: Option<u32>,
) -> Option<f32> {
    match (exposure_time, fstop, sensitivity) {
        (Some(exp), Some(fst), Some(sns)) => Some((sns as f64 * exp / (fst * fst)) as f32),
        (Some(exp), None, Some(sns)) => Some((sns as f64 * exp) as f32),
        (Some(exp), Some(fst), None) => Some((exp / (fst * fst)) as f32),
        (Some(exp), None, None) => Some(exp as f32),
        _ => None,
    }
}
