//! # geotagger
//!
//! Assign and correct the GPS coordinates of photos, including the point each
//! photo is facing, and write them back to EXIF together with the derived
//! `GPSImgDirection` bearing.
//!
//! ## Quick Start
//!
//! The [`session`] module ties the pieces together the way an interactive
//! front end uses them:
//!
//! ```rust,no_run
//! use geotagger::catalog::EditMode;
//! use geotagger::commit::{FailureAction, FailurePolicy};
//! use geotagger::config::Config;
//! use geotagger::exif::{ExifGeotagReader, ExifGeotagWriter};
//! use geotagger::favorites::Favorites;
//! use geotagger::session::Session;
//! use std::collections::HashSet;
//! use std::path::Path;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load(Some("config.json".as_ref()))?;
//!     let favorites = Favorites::open(Box::new(config.favorites.store()?))?;
//!
//!     let mut session = Session::new(config, favorites);
//!     session.open_folder(Path::new("./photos"), &ExifGeotagReader)?;
//!
//!     // Where the photo was taken...
//!     let selected: HashSet<String> = ["IMG_0001.jpg".to_string()].into();
//!     session.on_marker_moved(&selected, 55.7539, 37.6208);
//!
//!     // ...and what it is looking at.
//!     session.set_mode(EditMode::Destination);
//!     session.on_marker_moved(&selected, 55.7525, 37.6231);
//!
//!     let mut writer = ExifGeotagWriter::new(false);
//!     let summary = session.save(&mut writer, &mut FailurePolicy(FailureAction::Ignore));
//!     println!("{}", summary.message);
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Formats
//!
//! | Format | Write Strategy |
//! |--------|---------------|
//! | JPEG (`.jpg`, `.jpeg`) | GPS IFD appended to the APP1 TIFF block, other segments untouched |
//! | PNG (`.png`) | `eXIf` chunk |
//! | WebP (`.webp`) | `EXIF` RIFF chunk |
//! | TIFF (`.tif`, `.tiff`) | GPS IFD and IFD0 copy appended, header repointed |
//!
//! ## Modules
//!
//! - [`catalog`]: Folder scan, photo records, pending edits, filter and progress
//! - [`commit`]: Writing pending edits with retry/ignore/cancel on failure
//! - [`config`]: Configuration types and loading/saving
//! - [`error`]: Typed domain errors
//! - [`exif`]: GPS tag reading and writing
//! - [`favorites`]: Hotkey-addressable saved locations
//! - [`geo`]: Decimal/DMS conversion and bearing
//! - [`session`]: Editing state for front ends

pub mod catalog;
pub mod commit;
pub mod config;
pub mod error;
pub mod exif;
pub mod favorites;
pub mod geo;
pub mod session;
