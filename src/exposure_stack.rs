//! The bracketed exposure stack and the per-pixel merge.

use std::{
    io::{BufWriter, Write},
    path::Path,
};

use rayon::prelude::*;

use crate::{error::ExportError, error::LoadError, ExposureLayer};

/// Pairs of samples darker than this are too noisy to compare when
/// estimating exposure ratios from the image data.
const NOISE_FLOOR: u16 = 64;

/// An ordered stack of pixel-aligned exposures.
///
/// Layer order is merge priority: at each pixel the first layer that is a
/// candidate supplies the result.  `sort()` puts the brightest exposure
/// first, so the best signal-to-noise data wins and the darkest layer is
/// the fallback when everything is clipped.
#[derive(Debug, Clone)]
pub struct ExposureStack {
    layers: Vec<ExposureLayer>,
    width: usize,
    height: usize,
    scale: usize,
}

impl Default for ExposureStack {
    fn default() -> ExposureStack {
        ExposureStack::new()
    }
}

impl ExposureStack {
    pub fn new() -> ExposureStack {
        ExposureStack {
            layers: Vec::new(),
            width: 0,
            height: 0,
            scale: 1,
        }
    }

    /// Appends a layer at the lowest priority.
    ///
    /// The first layer fixes the stack's resolution, and every later
    /// layer must match it.
    pub fn push(&mut self, layer: ExposureLayer) -> Result<(), LoadError> {
        if self.layers.is_empty() {
            self.width = layer.width();
            self.height = layer.height();
        } else if layer.dimensions() != (self.width, self.height) {
            return Err(LoadError::DimensionMismatch {
                expected: (self.width, self.height),
                found: layer.dimensions(),
            });
        }
        self.layers.push(layer);
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> ExposureLayer {
        let layer = self.layers.remove(index);
        if self.layers.is_empty() {
            self.width = 0;
            self.height = 0;
        }
        layer
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layers(&self) -> &[ExposureLayer] {
        &self.layers
    }

    pub fn layer(&self, index: usize) -> &ExposureLayer {
        &self.layers[index]
    }

    pub fn layer_mut(&mut self, index: usize) -> &mut ExposureLayer {
        &mut self.layers[index]
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn set_threshold(&mut self, index: usize, threshold: u16) {
        self.layers[index].set_threshold(threshold);
    }

    pub fn set_relative_exposure(&mut self, index: usize, relative_exposure: f32) {
        self.layers[index].set_relative_exposure(relative_exposure);
    }

    pub fn include_pixels(&mut self, index: usize, x: usize, y: usize, radius: usize) {
        self.layers[index].mask_include(x, y, radius);
    }

    pub fn exclude_pixels(&mut self, index: usize, x: usize, y: usize, radius: usize) {
        self.layers[index].mask_exclude(x, y, radius);
    }

    //----------------------------------------------------------------
    // Display scale.

    pub fn scale(&self) -> usize {
        self.scale
    }

    /// Sets how many source pixels (per axis) make up one display pixel
    /// for `rgb()` queries.
    pub fn set_scale(&mut self, scale: usize) {
        assert!(scale >= 1, "display scale must be at least 1");
        self.scale = scale;
    }

    pub fn scaled_width(&self) -> usize {
        (self.width + self.scale - 1) / self.scale
    }

    pub fn scaled_height(&self) -> usize {
        (self.height + self.scale - 1) / self.scale
    }

    //----------------------------------------------------------------
    // Merging.

    /// The merged linear RGB value of source pixel `(x, y)`.
    ///
    /// Querying an empty stack or a pixel outside the image is a bug in
    /// the caller.
    #[inline]
    pub fn merged_pixel(&self, x: usize, y: usize) -> [f32; 3] {
        debug_assert!(
            x < self.width && y < self.height,
            "pixel ({}, {}) is outside the {}x{} stack",
            x,
            y,
            self.width,
            self.height
        );
        for layer in &self.layers {
            if layer.is_candidate(x, y) {
                return layer.scaled(x, y);
            }
        }
        // Everything is clipped: accept the clipping of the darkest layer.
        self.layers
            .last()
            .expect("merge query on an empty exposure stack")
            .scaled(x, y)
    }

    /// The merged value of display pixel `(x, y)` at the current scale.
    ///
    /// Each display pixel is the box average of the source pixels it
    /// covers, clipped at the image edges.
    pub fn rgb(&self, x: usize, y: usize) -> [f32; 3] {
        if self.scale == 1 {
            return self.merged_pixel(x, y);
        }

        let x0 = x * self.scale;
        let y0 = y * self.scale;
        let x1 = (x0 + self.scale).min(self.width);
        let y1 = (y0 + self.scale).min(self.height);
        debug_assert!(x0 < x1 && y0 < y1);

        let mut sum = [0.0f32; 3];
        for sy in y0..y1 {
            for sx in x0..x1 {
                let p = self.merged_pixel(sx, sy);
                sum[0] += p[0];
                sum[1] += p[1];
                sum[2] += p[2];
            }
        }
        let inv_count = 1.0 / ((x1 - x0) * (y1 - y0)) as f32;
        [sum[0] * inv_count, sum[1] * inv_count, sum[2] * inv_count]
    }

    /// Merges the whole image at full resolution, ignoring the display
    /// scale.
    pub fn merged_image(&self) -> Vec<[f32; 3]> {
        assert!(!self.layers.is_empty(), "merging an empty exposure stack");
        let mut pixels = vec![[0.0f32; 3]; self.width * self.height];
        if pixels.is_empty() {
            return pixels;
        }
        pixels
            .par_chunks_mut(self.width)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, pixel) in row.iter_mut().enumerate() {
                    *pixel = self.merged_pixel(x, y);
                }
            });
        pixels
    }

    /// Writes the full-resolution merge as a Radiance .hdr file.
    ///
    /// The file is written next to `path` under a temporary name and
    /// only moved into place once complete, so a failed export never
    /// leaves a partial file behind.
    pub fn save_hdr(&self, path: &Path) -> Result<(), ExportError> {
        if self.layers.is_empty() {
            return Err(ExportError::EmptyStack);
        }

        let pixels = self.merged_image();

        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            hdr::write_hdr(&mut writer, &pixels, self.width, self.height, 1.0)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;

        tracing::info!(
            "wrote {}x{} merge of {} exposures to \"{}\"",
            self.width,
            self.height,
            self.layers.len(),
            path.display()
        );
        Ok(())
    }

    //----------------------------------------------------------------
    // Ordering.

    /// Puts the layers in merge priority order, brightest first, and
    /// normalizes their relative exposures to the darkest layer.
    ///
    /// Exif exposure values are used when every layer has them.
    /// Otherwise the ordering and the ratios are estimated from the
    /// pixel data.
    pub fn sort(&mut self) {
        if self.layers.is_empty() {
            return;
        }

        if self.layers.iter().all(|l| l.info.exposure.is_some()) {
            self.layers.sort_by(|a, b| {
                let a = a.info.exposure.unwrap_or(0.0);
                let b = b.info.exposure.unwrap_or(0.0);
                b.total_cmp(&a)
            });
            let darkest = self.layers.last().and_then(|l| l.info.exposure).unwrap_or(1.0);
            for layer in self.layers.iter_mut() {
                let exposure = layer.info.exposure.unwrap_or(darkest);
                layer.set_relative_exposure(if exposure > 0.0 {
                    darkest / exposure
                } else {
                    1.0
                });
            }
        } else {
            let mut keyed: Vec<_> = self
                .layers
                .drain(..)
                .map(|l| (l.mean_brightness(), l))
                .collect();
            keyed.sort_by(|a, b| b.0.total_cmp(&a.0));
            self.layers = keyed.into_iter().map(|(_, l)| l).collect();

            let mut relative = 1.0f32;
            let last = self.layers.len() - 1;
            self.layers[last].set_relative_exposure(relative);
            for i in (0..last).rev() {
                relative *= estimate_exposure_ratio(&self.layers[i + 1], &self.layers[i]);
                self.layers[i].set_relative_exposure(relative);
            }
        }

        for (i, layer) in self.layers.iter().enumerate() {
            tracing::debug!(
                "layer {}: \"{}\", relative exposure {:.4}",
                i,
                layer.info.filename,
                layer.relative_exposure()
            );
        }
    }
}

/// Estimates the factor that brings `bright`'s samples onto `dark`'s
/// scale, from the pixels that are well exposed in both.
fn estimate_exposure_ratio(dark: &ExposureLayer, bright: &ExposureLayer) -> f32 {
    let max = |s: &[u16; 3]| s[0].max(s[1]).max(s[2]);

    let mut dark_sum = 0u64;
    let mut bright_sum = 0u64;
    for (d, b) in dark.samples().iter().zip(bright.samples().iter()) {
        let (d, b) = (max(d), max(b));
        if d >= NOISE_FLOOR && b >= NOISE_FLOOR && d < dark.threshold() && b < bright.threshold() {
            dark_sum += d as u64;
            bright_sum += b as u64;
        }
    }

    if dark_sum > 0 && bright_sum > 0 {
        (dark_sum as f64 / bright_sum as f64) as f32
    } else {
        // No overlap to measure; fall back to the overall brightness.
        let (d, b) = (dark.mean_brightness(), bright.mean_brightness());
        if d > 0.0 && b > 0.0 {
            (d / b) as f32
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ImageInfo;

    fn flat_layer(value: u16, width: usize, height: usize) -> ExposureLayer {
        ExposureLayer::new(vec![[value; 3]; width * height], width, height)
    }

    /// Layer A: short exposure, all 100.  Layer B: long exposure, all
    /// 60000 at a tenth of A's scale.  Both clip at 50000.
    fn two_layer_stack(width: usize, height: usize) -> ExposureStack {
        let mut a = flat_layer(100, width, height);
        a.set_threshold(50000);
        let mut b = flat_layer(60000, width, height);
        b.set_threshold(50000);
        b.set_relative_exposure(0.1);

        let mut stack = ExposureStack::new();
        stack.push(a).unwrap();
        stack.push(b).unwrap();
        stack
    }

    fn assert_all(stack: &ExposureStack, value: f32) {
        for y in 0..stack.height() {
            for x in 0..stack.width() {
                assert_eq!(stack.merged_pixel(x, y), [value; 3], "at ({}, {})", x, y);
            }
        }
    }

    #[test]
    fn first_unclipped_layer_wins() {
        let stack = two_layer_stack(4, 4);
        assert_all(&stack, 100.0);
    }

    #[test]
    fn clipped_layer_falls_through() {
        let mut stack = two_layer_stack(4, 4);
        stack.set_threshold(0, 50);
        assert_all(&stack, 6000.0);
    }

    #[test]
    fn include_mask_restores_clipped_layer() {
        let mut stack = two_layer_stack(4, 4);
        stack.set_threshold(0, 50);
        stack.include_pixels(0, 1, 1, 0);
        for y in 0..4 {
            for x in 0..4 {
                let expected = if (x, y) == (1, 1) { 100.0 } else { 6000.0 };
                assert_eq!(stack.merged_pixel(x, y), [expected; 3]);
            }
        }
    }

    #[test]
    fn exclude_mask_skips_layer() {
        let mut stack = two_layer_stack(4, 4);
        stack.exclude_pixels(0, 3, 3, 0);
        assert_eq!(stack.merged_pixel(3, 3), [6000.0; 3]);
        assert_eq!(stack.merged_pixel(2, 3), [100.0; 3]);

        // Re-including wins over the earlier exclusion.
        stack.include_pixels(0, 3, 3, 0);
        assert_eq!(stack.merged_pixel(3, 3), [100.0; 3]);
    }

    #[test]
    fn all_clipped_falls_back_to_last_layer() {
        let mut stack = two_layer_stack(2, 2);
        stack.set_threshold(0, 50);
        stack.set_threshold(1, 50);
        assert_all(&stack, 6000.0);

        // Even if the last layer is explicitly excluded.
        stack.exclude_pixels(1, 0, 0, 0);
        assert_eq!(stack.merged_pixel(0, 0), [6000.0; 3]);
    }

    #[test]
    fn no_clipping_selects_highest_priority_layer() {
        let mut stack = ExposureStack::new();
        let mut values = Vec::new();
        for i in 0..6u16 {
            values.push([i * 10, i * 20 + 1, i * 30 + 2]);
        }
        stack.push(ExposureLayer::new(values.clone(), 3, 2)).unwrap();
        let mut second = ExposureLayer::new(vec![[7, 7, 7]; 6], 3, 2);
        second.set_relative_exposure(3.0);
        stack.push(second).unwrap();

        for y in 0..2 {
            for x in 0..3 {
                let v = values[y * 3 + x];
                assert_eq!(
                    stack.merged_pixel(x, y),
                    [v[0] as f32, v[1] as f32, v[2] as f32]
                );
            }
        }
    }

    #[test]
    fn mismatched_dimensions_are_refused() {
        let mut stack = ExposureStack::new();
        stack.push(flat_layer(1, 4, 4)).unwrap();
        match stack.push(flat_layer(1, 4, 3)) {
            Err(LoadError::DimensionMismatch { expected, found }) => {
                assert_eq!(expected, (4, 4));
                assert_eq!(found, (4, 3));
            }
            r => panic!("expected a dimension mismatch, got {:?}", r),
        }
        assert_eq!(stack.len(), 1);

        stack.remove(0);
        assert!(stack.is_empty());
        stack.push(flat_layer(1, 4, 3)).unwrap();
        assert_eq!((stack.width(), stack.height()), (4, 3));
    }

    #[test]
    fn scaled_queries_box_average() {
        let mut samples = Vec::new();
        for y in 0..3u16 {
            for x in 0..3u16 {
                samples.push([x + y * 3; 3]);
            }
        }
        let mut stack = ExposureStack::new();
        stack.push(ExposureLayer::new(samples, 3, 3)).unwrap();

        stack.set_scale(2);
        assert_eq!((stack.scaled_width(), stack.scaled_height()), (2, 2));
        // (0 + 1 + 3 + 4) / 4
        assert_eq!(stack.rgb(0, 0), [2.0; 3]);
        // Edge blocks only cover what's inside the image: (2 + 5) / 2
        assert_eq!(stack.rgb(1, 0), [3.5; 3]);
        assert_eq!(stack.rgb(1, 1), [8.0; 3]);

        stack.set_scale(1);
        assert_eq!(stack.rgb(1, 1), stack.merged_pixel(1, 1));
    }

    #[test]
    #[should_panic]
    fn empty_stack_query_panics() {
        let stack = ExposureStack::new();
        stack.merged_pixel(0, 0);
    }

    #[test]
    fn merged_image_ignores_scale() {
        let mut stack = two_layer_stack(3, 2);
        stack.set_scale(2);
        let pixels = stack.merged_image();
        assert_eq!(pixels.len(), 6);
        assert!(pixels.iter().all(|p| *p == [100.0; 3]));
    }

    #[test]
    fn sort_by_exif_exposure() {
        let mut stack = ExposureStack::new();
        for (value, exposure) in [(100u16, 1.0f32), (900, 8.0), (400, 2.0)] {
            let info = ImageInfo {
                exposure: Some(exposure),
                ..ImageInfo::with_dimensions(2, 2)
            };
            stack.push(flat_layer(value, 2, 2).with_info(info)).unwrap();
        }
        stack.sort();

        let exposures: Vec<_> = stack.layers().iter().map(|l| l.info.exposure).collect();
        assert_eq!(exposures, vec![Some(8.0), Some(2.0), Some(1.0)]);
        let relative: Vec<_> = stack.layers().iter().map(|l| l.relative_exposure()).collect();
        assert_eq!(relative, vec![0.125, 0.5, 1.0]);
    }

    #[test]
    fn sort_estimates_from_pixels_without_exif() {
        // Same scene, the bright layer exposed 4x longer, with its right
        // half clipped.
        let width = 4;
        let dark: Vec<_> = (0..16).map(|i| [1000 + i * 10; 3]).collect();
        let bright: Vec<_> = dark
            .iter()
            .enumerate()
            .map(|(i, d)| if i % width >= 2 { [65535; 3] } else { [d[0] * 4; 3] })
            .collect();

        let mut stack = ExposureStack::new();
        stack.push(ExposureLayer::new(dark, 4, 4)).unwrap();
        stack.push(ExposureLayer::new(bright, 4, 4)).unwrap();
        stack.sort();

        assert_eq!(stack.layer(0).samples()[0], [4000; 3]);
        assert_eq!(stack.layer(1).relative_exposure(), 1.0);
        assert!((stack.layer(0).relative_exposure() - 0.25).abs() < 1.0e-6);

        // The merge now agrees across the clipping boundary.
        assert_eq!(stack.merged_pixel(0, 0), [1000.0; 3]);
        assert_eq!(stack.merged_pixel(3, 0), [1030.0; 3]);
    }

    #[test]
    fn export_single_pixel_is_linear() {
        let mut a = flat_layer(100, 1, 1);
        a.set_threshold(50000);
        let mut b = flat_layer(60000, 1, 1);
        b.set_threshold(50000);
        let mut stack = ExposureStack::new();
        stack.push(a).unwrap();
        stack.push(b).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.hdr");
        stack.save_hdr(&path).unwrap();

        let file = std::fs::File::open(&path).unwrap();
        let img = hdr::read_hdr(&mut std::io::BufReader::new(file)).unwrap();
        assert_eq!((img.width, img.height), (1, 1));
        assert_eq!(img.pixels, vec![[100.0; 3]]);
    }

    #[test]
    fn failed_export_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let missing_dir = dir.path().join("missing");
        let path = missing_dir.join("out.hdr");

        let stack = two_layer_stack(2, 2);
        assert!(matches!(stack.save_hdr(&path), Err(ExportError::IO(_))));
        assert!(!path.exists());

        let empty = ExposureStack::new();
        let path = dir.path().join("empty.hdr");
        assert!(matches!(empty.save_hdr(&path), Err(ExportError::EmptyStack)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
