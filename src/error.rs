use std::path::{Path, PathBuf};

/// Errors surfaced by the pipeline stages.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode image {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to encode image {path:?}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("npy error on {path:?}: {source}")]
    Npy {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error(transparent)]
    Index(#[from] csv::Error),
    #[error("row index does not match the features: {0}")]
    IndexMismatch(String),
    #[error("shape mismatch in {context}: expected {expected}, found {found}")]
    ShapeMismatch {
        context: String,
        expected: usize,
        found: usize,
    },
    #[error("fit failed: {0}")]
    Fit(String),
    #[error(transparent)]
    Model(#[from] ort::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Error + '_ {
        move |source| Error::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Reading an image can fail on the file itself or on its contents
    pub(crate) fn image(path: &Path) -> impl FnOnce(image::ImageError) -> Error + '_ {
        move |source| match source {
            image::ImageError::IoError(source) => Error::Io {
                path: path.to_path_buf(),
                source,
            },
            source => Error::Decode {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    pub(crate) fn npy<E>(path: &Path) -> impl FnOnce(E) -> Error + '_
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        move |source| Error::Npy {
            path: path.to_path_buf(),
            source: Box::new(source),
        }
    }

    pub(crate) fn shape(context: impl Into<String>, expected: usize, found: usize) -> Error {
        Error::ShapeMismatch {
            context: context.into(),
            expected,
            found,
        }
    }
}
