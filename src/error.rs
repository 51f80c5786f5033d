use std::path::PathBuf;

/// Failure to bring an exposure into the stack.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LoadError {
    #[error("unable to access \"{}\": {source}", .path.display())]
    IO {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to decode \"{}\": {source}", .path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image_fmt::ReadError,
    },

    #[error(
        "image has a different resolution ({}x{}) than the rest of the stack ({}x{}).  Note: all images must have the same resolution.",
        .found.0, .found.1, .expected.0, .expected.1
    )]
    DimensionMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },
}

/// Failure to write the merged result.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ExportError {
    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error("there are no exposures to merge")]
    EmptyStack,
}

/// Failure of a single render attempt.  The render thread itself keeps
/// running.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum RenderError {
    #[error("unable to allocate a {width}x{height} tile")]
    OutOfMemory { width: usize, height: usize },
}
