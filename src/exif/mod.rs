//! Geotag reading and writing.
//!
//! - [`read_geotag`] / [`ExifGeotagReader`]: position, destination, camera
//!   model and capture time from any container kamadak-exif understands
//! - [`ExifGeotagWriter`]: merges a [`GpsTags`] set into the file's EXIF
//!   without touching its OS timestamps
//!
//! The catalog and commit engine only see the [`GeotagReader`] and
//! [`GeotagWriter`] traits.

mod reader;
mod writer;

pub use reader::{ExifGeotagReader, Geotag, GeotagReader, read_geotag};
pub use writer::{ExifGeotagWriter, GeotagWriter, GpsTags};
