#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ReadError {
    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error("UnknownFormat: could not determine the image file format.")]
    UnknownFormat,

    #[error("UnsupportedFeature: the image file uses a feature that is currently unsupported such that image loading isn't possible.")]
    UnsupportedFeature,

    #[error("Corrupt: {0}")]
    Corrupt(String),
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WriteError {
    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error("Encoding: {0}")]
    Encoding(String),
}

//-------------------------------------------------------------
// From impls.

impl From<tiff::TiffError> for ReadError {
    fn from(other: tiff::TiffError) -> Self {
        use tiff::TiffError::*;
        match other {
            IoError(e) => Self::IO(e),
            FormatError(e) => Self::Corrupt(e.to_string()),
            _ => Self::UnsupportedFeature,
        }
    }
}

impl From<png::DecodingError> for ReadError {
    fn from(other: png::DecodingError) -> Self {
        use png::DecodingError::*;
        match other {
            IoError(e) => Self::IO(e),
            Format(e) => Self::Corrupt(e.to_string()),
            _ => Self::UnsupportedFeature,
        }
    }
}

impl From<jpeg_decoder::Error> for ReadError {
    fn from(other: jpeg_decoder::Error) -> Self {
        use jpeg_decoder::Error::*;
        match other {
            Io(e) => Self::IO(e),
            Format(e) => Self::Corrupt(e),
            Unsupported(_) => Self::UnsupportedFeature,
            e => Self::Corrupt(e.to_string()),
        }
    }
}

impl From<png::EncodingError> for WriteError {
    fn from(other: png::EncodingError) -> Self {
        match other {
            png::EncodingError::IoError(e) => Self::IO(e),
            e => Self::Encoding(e.to_string()),
        }
    }
}
