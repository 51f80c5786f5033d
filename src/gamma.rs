//! 16-bit linear to 8-bit display mapping.

pub const TABLE_SIZE: usize = 1 << 16;

/// A precomputed gamma curve over the whole 16-bit sample range.
///
/// The table is only ever rebuilt in full, so anyone holding a shared
/// reference always sees one complete curve.
#[derive(Clone)]
pub struct GammaLut {
    table: Box<[u8]>,
    gamma: f32,
}

impl GammaLut {
    pub fn new(gamma: f32) -> GammaLut {
        let mut lut = GammaLut {
            table: vec![0u8; TABLE_SIZE].into_boxed_slice(),
            gamma: gamma,
        };
        lut.regenerate(gamma);
        lut
    }

    /// Rebuilds every entry for a new gamma exponent.
    ///
    /// Entry `i` is `floor(65536 * (i / 65536)^(1 / gamma)) >> 8`.
    pub fn regenerate(&mut self, gamma: f32) {
        assert!(
            gamma.is_finite() && gamma > 0.0,
            "gamma exponent must be positive and finite, got {}",
            gamma
        );

        let inv_gamma = 1.0 / gamma as f64;
        let mut prev = 0u8;
        for (i, entry) in self.table.iter_mut().enumerate() {
            let n = (TABLE_SIZE as f64 * (i as f64 / TABLE_SIZE as f64).powf(inv_gamma)).floor();
            let v = ((n as u32) >> 8).min(255) as u8;
            // Rounding in powf must never make the curve step backwards.
            prev = prev.max(v);
            *entry = prev;
        }
        self.gamma = gamma;
    }

    pub fn gamma(&self) -> f32 {
        self.gamma
    }

    #[inline(always)]
    pub fn map(&self, n: u16) -> u8 {
        self.table[n as usize]
    }

    /// Maps a linear merged value, truncating to an integer sample first.
    /// Values outside the 16-bit range saturate.
    #[inline(always)]
    pub fn map_linear(&self, n: f32) -> u8 {
        self.map(n.max(0.0).min(65535.0) as u16)
    }

    pub fn map_rgb(&self, rgb: [f32; 3]) -> [u8; 3] {
        [
            self.map_linear(rgb[0]),
            self.map_linear(rgb[1]),
            self.map_linear(rgb[2]),
        ]
    }
}

impl std::fmt::Debug for GammaLut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GammaLut").field("gamma", &self.gamma).finish()
    }
}
