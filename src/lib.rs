pub mod error;
pub mod exposure;
pub mod exposure_stack;
pub mod gamma;
pub mod job_helpers;
pub mod render_thread;
pub mod session;

pub use error::{ExportError, LoadError, RenderError};
pub use exposure::{ExposureLayer, GhostMask, MaskState};
pub use exposure_stack::ExposureStack;
pub use gamma::GammaLut;
pub use render_thread::{
    PresentationSink, RenderEvent, RenderMode, RenderThread, Tile, Viewport, WorkerState,
};
pub use session::{RenderConfig, Session};

/// Where an exposure came from, and what its metadata says about it.
#[derive(Debug, Clone, Default)]
pub struct ImageInfo {
    pub filename: String,
    pub full_filepath: String,

    pub width: usize,
    pub height: usize,
    pub exposure: Option<f32>,

    pub exposure_time: Option<(u32, u32)>, // Ratio.
    pub fstop: Option<(u32, u32)>,         // Ratio.
    pub iso: Option<u32>,
}

impl ImageInfo {
    pub fn with_dimensions(width: usize, height: usize) -> ImageInfo {
        ImageInfo {
            width: width,
            height: height,
            ..ImageInfo::default()
        }
    }
}
