use std::path::PathBuf;
use thiserror::Error;

/// Domain errors the library reports by kind. I/O and parser failures travel as
/// `anyhow::Error` with context instead.
#[derive(Error, Debug)]
pub enum GeotagError {
    #[error("{}: marked modified but {reason}", file.display())]
    Precondition { file: PathBuf, reason: &'static str },

    #[error("{}: existing EXIF could not be parsed, refusing to overwrite it", .0.display())]
    UnparseableExif(PathBuf),

    #[error("{}: unsupported image format", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("invalid favorite key {0:?}: expected one letter or digit")]
    InvalidFavoriteKey(String),

    #[error("no favorite named {name:?} under key {key:?}")]
    FavoriteNotFound { key: String, name: String },
}
