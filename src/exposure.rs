//! A single exposure of the bracketed stack.

use std::{collections::HashMap, sync::Arc};

use crate::ImageInfo;

/// A ghost-removal override for one pixel of one layer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MaskState {
    /// Use this layer at the pixel even if it's clipped.
    Include,
    /// Never use this layer at the pixel.
    Exclude,
}

/// Sparse per-pixel overrides, keyed by pixel coordinate.
///
/// Edits are brush strokes, so even a heavily edited mask touches a
/// small fraction of a large image.
#[derive(Debug, Clone, Default)]
pub struct GhostMask {
    pixels: HashMap<(usize, usize), MaskState>,
}

impl GhostMask {
    pub fn new() -> GhostMask {
        GhostMask::default()
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Option<MaskState> {
        if self.pixels.is_empty() {
            return None;
        }
        self.pixels.get(&(x, y)).copied()
    }

    /// Sets every pixel in the disk of `radius` around `(x, y)` to
    /// `state`.  The disk is clipped to `width` x `height`.
    pub fn paint_disk(
        &mut self,
        x: usize,
        y: usize,
        radius: usize,
        state: MaskState,
        width: usize,
        height: usize,
    ) {
        if width == 0 || height == 0 {
            return;
        }
        let r2 = radius as u128 * radius as u128;
        let x_range = x.saturating_sub(radius)..=x.saturating_add(radius).min(width - 1);
        let y_range = y.saturating_sub(radius)..=y.saturating_add(radius).min(height - 1);
        for py in y_range {
            let dy = py.abs_diff(y) as u128;
            for px in x_range.clone() {
                let dx = px.abs_diff(x) as u128;
                if (dx * dx).saturating_add(dy * dy) <= r2 {
                    self.pixels.insert((px, py), state);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn clear(&mut self) {
        self.pixels.clear();
    }
}

/// One input exposure: its samples plus the per-layer merge parameters.
///
/// The sample data is shared and never modified, so cloning a layer is
/// cheap apart from its mask.
#[derive(Debug, Clone)]
pub struct ExposureLayer {
    samples: Arc<[[u16; 3]]>,
    width: usize,
    height: usize,

    /// Samples whose largest channel is at or above this are clipped.
    threshold: u16,
    relative_exposure: f32,
    mask: GhostMask,

    pub info: ImageInfo,
}

impl ExposureLayer {
    pub fn new(samples: Vec<[u16; 3]>, width: usize, height: usize) -> ExposureLayer {
        assert_eq!(samples.len(), width * height);
        ExposureLayer {
            samples: samples.into(),
            width: width,
            height: height,
            threshold: u16::MAX,
            relative_exposure: 1.0,
            mask: GhostMask::new(),
            info: ImageInfo::with_dimensions(width, height),
        }
    }

    pub fn with_info(mut self, info: ImageInfo) -> ExposureLayer {
        self.info = info;
        self
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn threshold(&self) -> u16 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: u16) {
        self.threshold = threshold;
    }

    pub fn relative_exposure(&self) -> f32 {
        self.relative_exposure
    }

    pub fn set_relative_exposure(&mut self, relative_exposure: f32) {
        debug_assert!(relative_exposure.is_finite() && relative_exposure >= 0.0);
        self.relative_exposure = relative_exposure;
    }

    pub fn mask(&self) -> &GhostMask {
        &self.mask
    }

    pub fn mask_include(&mut self, x: usize, y: usize, radius: usize) {
        self.mask
            .paint_disk(x, y, radius, MaskState::Include, self.width, self.height);
    }

    pub fn mask_exclude(&mut self, x: usize, y: usize, radius: usize) {
        self.mask
            .paint_disk(x, y, radius, MaskState::Exclude, self.width, self.height);
    }

    pub fn samples(&self) -> &[[u16; 3]] {
        &self.samples
    }

    #[inline]
    pub fn sample(&self, x: usize, y: usize) -> [u16; 3] {
        debug_assert!(x < self.width && y < self.height);
        self.samples[y * self.width + x]
    }

    /// Whether this layer may supply the merged value at `(x, y)`.
    #[inline]
    pub fn is_candidate(&self, x: usize, y: usize) -> bool {
        match self.mask.get(x, y) {
            Some(MaskState::Exclude) => false,
            Some(MaskState::Include) => true,
            None => {
                let s = self.sample(x, y);
                s[0].max(s[1]).max(s[2]) < self.threshold
            }
        }
    }

    /// The sample at `(x, y)` on the stack's common linear scale.
    #[inline]
    pub fn scaled(&self, x: usize, y: usize) -> [f32; 3] {
        let s = self.sample(x, y);
        [
            s[0] as f32 * self.relative_exposure,
            s[1] as f32 * self.relative_exposure,
            s[2] as f32 * self.relative_exposure,
        ]
    }

    /// Mean of the largest channel over the whole layer.
    pub fn mean_brightness(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: u64 = self
            .samples
            .iter()
            .map(|s| s[0].max(s[1]).max(s[2]) as u64)
            .sum();
        sum as f64 / self.samples.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_layer(value: u16, width: usize, height: usize) -> ExposureLayer {
        ExposureLayer::new(vec![[value; 3]; width * height], width, height)
    }

    #[test]
    fn threshold_excludes_boundary_sample() {
        let mut layer = flat_layer(1000, 2, 2);
        layer.set_threshold(1001);
        assert!(layer.is_candidate(0, 0));
        layer.set_threshold(1000);
        assert!(!layer.is_candidate(0, 0));
    }

    #[test]
    fn clipping_uses_largest_channel() {
        let mut layer = ExposureLayer::new(vec![[10, 5000, 20]], 1, 1);
        layer.set_threshold(4000);
        assert!(!layer.is_candidate(0, 0));
    }

    #[test]
    fn relative_exposure_scales_all_channels() {
        let mut layer = ExposureLayer::new(vec![[100, 200, 400]], 1, 1);
        layer.set_relative_exposure(0.5);
        assert_eq!(layer.scaled(0, 0), [50.0, 100.0, 200.0]);
    }

    #[test]
    fn mask_overrides_threshold() {
        let mut layer = flat_layer(60000, 4, 4);
        layer.set_threshold(50000);
        assert!(!layer.is_candidate(1, 1));

        layer.mask_include(1, 1, 0);
        assert!(layer.is_candidate(1, 1));
        assert!(!layer.is_candidate(2, 1));

        let mut dark = flat_layer(100, 4, 4);
        dark.mask_exclude(0, 0, 0);
        assert!(!dark.is_candidate(0, 0));
        assert!(dark.is_candidate(1, 0));
    }

    #[test]
    fn last_mask_edit_wins() {
        let mut layer = flat_layer(100, 4, 4);
        layer.mask_include(2, 2, 1);
        layer.mask_exclude(2, 2, 0);
        assert_eq!(layer.mask().get(2, 2), Some(MaskState::Exclude));
        assert_eq!(layer.mask().get(2, 1), Some(MaskState::Include));

        layer.mask_exclude(1, 1, 0);
        layer.mask_include(1, 1, 0);
        assert_eq!(layer.mask().get(1, 1), Some(MaskState::Include));
    }

    #[test]
    fn disk_shape_and_clipping() {
        let mut mask = GhostMask::new();
        mask.paint_disk(0, 0, 2, MaskState::Include, 10, 10);
        // Quarter disk of radius 2: (0,0) (1,0) (2,0) (0,1) (1,1) (0,2).
        assert_eq!(mask.len(), 6);
        assert_eq!(mask.get(2, 0), Some(MaskState::Include));
        assert_eq!(mask.get(2, 2), None);

        let mut mask = GhostMask::new();
        mask.paint_disk(5, 5, 1, MaskState::Exclude, 10, 10);
        assert_eq!(mask.len(), 5);

        mask.clear();
        assert!(mask.is_empty());
    }

    #[test]
    fn huge_radius_covers_image() {
        let mut layer = ExposureLayer::new(vec![[0; 3]; 16], 4, 4);
        layer.mask_include(1, 1, 20000);
        assert_eq!(layer.mask().len(), 16);

        layer.mask_exclude(3, 0, usize::MAX);
        assert_eq!(layer.mask().len(), 16);
        assert_eq!(layer.mask().get(0, 3), Some(MaskState::Exclude));
    }

    #[test]
    fn disk_centered_outside_image() {
        let mut mask = GhostMask::new();
        mask.paint_disk(5, 1, 2, MaskState::Include, 4, 4);
        // Only (3, 1) is within 2 of (5, 1).
        assert_eq!(mask.len(), 1);
        assert_eq!(mask.get(3, 1), Some(MaskState::Include));

        mask.paint_disk(0, 0, 3, MaskState::Include, 0, 0);
        assert_eq!(mask.len(), 1);
    }

    #[test]
    fn mean_brightness() {
        let layer = ExposureLayer::new(vec![[0, 10, 0], [30, 0, 0]], 2, 1);
        assert_eq!(layer.mean_brightness(), 20.0);
    }
}
