use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::exif::{Geotag, GeotagReader};
use crate::geo::Coordinate;

/// Image extensions the catalog picks up (matched case-insensitively).
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "tif", "tiff"];

/// The write strategy for a given image file, determined by its format.
///
/// JPEG gets its APP1 segment spliced in place, PNG and WebP their EXIF
/// chunk; a TIFF file is its own EXIF block.
///
/// ```rust
/// use geotagger::catalog::ImageKind;
/// use std::path::Path;
///
/// assert_eq!(ImageKind::from_path(Path::new("IMG_0001.JPG")), Some(ImageKind::Jpeg));
/// assert_eq!(ImageKind::from_path(Path::new("notes.txt")), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    WebP,
    Tiff,
}

impl ImageKind {
    /// Determine the image kind from a file path extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::WebP),
            "tif" | "tiff" => Some(Self::Tiff),
            _ => None,
        }
    }
}

/// Check if a file has a supported image extension.
fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// List the image files directly inside `dir`, sorted by file name.
///
/// Subdirectories are not entered.
pub fn list_image_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        anyhow::bail!("Not a directory: {}", dir.display());
    }

    let mut images = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
        let p = entry.path();
        if entry.file_type().is_file() && is_supported_image(p) {
            images.push(p.to_path_buf());
        }
    }
    Ok(images)
}

/// Which point a map click edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum EditMode {
    /// Where the photo was taken.
    #[default]
    Primary,
    /// The point the photo is facing.
    Destination,
}

/// Coordinates entered by the user and not yet written to the file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PendingEdit {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub dest_lat: Option<f64>,
    pub dest_lon: Option<f64>,
}

impl PendingEdit {
    pub fn is_empty(&self) -> bool {
        self.lat.is_none() && self.lon.is_none() && self.dest_lat.is_none() && self.dest_lon.is_none()
    }

    pub fn primary(&self) -> Option<Coordinate> {
        Some(Coordinate::new(self.lat?, self.lon?))
    }

    pub fn destination(&self) -> Option<Coordinate> {
        Some(Coordinate::new(self.dest_lat?, self.dest_lon?))
    }
}

/// One discovered image file: what is on disk plus what the user has changed.
#[derive(Debug, Clone, Serialize)]
pub struct PhotoRecord {
    pub file_path: PathBuf,
    pub file_name: String,
    pub file_modified_at: DateTime<Local>,
    pub source_coordinate: Option<Coordinate>,
    pub source_destination: Option<Coordinate>,
    pub model: Option<String>,
    pub date_time_original: Option<String>,
    pub pending: PendingEdit,
    pub is_modified: bool,
}

impl PhotoRecord {
    /// A record with no metadata, as produced when the geotag cannot be read.
    pub fn new(file_path: PathBuf, file_modified_at: DateTime<Local>) -> Self {
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            file_path,
            file_name,
            file_modified_at,
            source_coordinate: None,
            source_destination: None,
            model: None,
            date_time_original: None,
            pending: PendingEdit::default(),
            is_modified: false,
        }
    }

    pub fn with_geotag(mut self, geotag: Geotag) -> Self {
        self.source_coordinate = geotag.position;
        self.source_destination = geotag.destination;
        self.model = geotag.model;
        self.date_time_original = geotag.date_time_original;
        self
    }

    /// Pending primary coordinate if set, else the one read from the file.
    pub fn effective_coordinate(&self) -> Option<Coordinate> {
        self.pending.primary().or(self.source_coordinate)
    }

    /// Pending destination if set, else the one read from the file.
    pub fn effective_destination(&self) -> Option<Coordinate> {
        self.pending.destination().or(self.source_destination)
    }

    pub fn set_pending(&mut self, mode: EditMode, lat: f64, lon: f64) {
        match mode {
            EditMode::Primary => {
                self.pending.lat = Some(lat);
                self.pending.lon = Some(lon);
            }
            EditMode::Destination => {
                self.pending.dest_lat = Some(lat);
                self.pending.dest_lon = Some(lon);
            }
        }
        self.is_modified = true;
    }

    /// Fold committed pending values into the source coordinates and clear the overlay.
    pub fn resolve_pending(&mut self) {
        if let Some(primary) = self.pending.primary() {
            self.source_coordinate = Some(primary);
        }
        if let Some(destination) = self.pending.destination() {
            self.source_destination = Some(destination);
        }
        self.pending = PendingEdit::default();
        self.is_modified = false;
    }

    /// Modification date as shown in the file table.
    pub fn modified_display(&self) -> String {
        self.file_modified_at.format("%Y-%m-%d %H:%M:%S").to_string()
    }

    pub fn row(&self) -> Row {
        Row {
            file_name: self.file_name.clone(),
            date_time_original: self.date_time_original.clone(),
            modified: self.modified_display(),
            latitude: Cell::new(self.pending.lat, self.source_coordinate.map(|c| c.latitude)),
            longitude: Cell::new(self.pending.lon, self.source_coordinate.map(|c| c.longitude)),
            dest_latitude: Cell::new(
                self.pending.dest_lat,
                self.source_destination.map(|c| c.latitude),
            ),
            dest_longitude: Cell::new(
                self.pending.dest_lon,
                self.source_destination.map(|c| c.longitude),
            ),
        }
    }
}

/// A coordinate column of the file table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Cell {
    Empty,
    Stored(f64),
    Pending(f64),
}

impl Cell {
    fn new(pending: Option<f64>, stored: Option<f64>) -> Self {
        match (pending, stored) {
            (Some(v), _) => Self::Pending(v),
            (None, Some(v)) => Self::Stored(v),
            (None, None) => Self::Empty,
        }
    }
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Stored(v) => write!(f, "{v:.6}"),
            Self::Pending(v) => write!(f, "Pending {v:.6}"),
        }
    }
}

/// One line of the file table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub file_name: String,
    pub date_time_original: Option<String>,
    pub modified: String,
    pub latitude: Cell,
    pub longitude: Cell,
    pub dest_latitude: Cell,
    pub dest_longitude: Cell,
}

/// Records whose on-disk coordinate is missing, when `hide_if_has_coordinate` is set.
///
/// Pending edits do not count: a record keeps showing until its coordinate is
/// actually on disk.
pub fn apply_filter(
    records: &[PhotoRecord],
    hide_if_has_coordinate: bool,
) -> impl Iterator<Item = &PhotoRecord> {
    records
        .iter()
        .filter(move |r| !hide_if_has_coordinate || r.source_coordinate.is_none())
}

/// Set the pending primary or destination coordinate of every selected record.
///
/// Returns how many records were updated.
pub fn set_pending_edit(
    records: &mut [PhotoRecord],
    selected: &HashSet<String>,
    mode: EditMode,
    lat: f64,
    lon: f64,
) -> usize {
    let mut updated = 0;
    for record in records.iter_mut().filter(|r| selected.contains(&r.file_name)) {
        record.set_pending(mode, lat, lon);
        updated += 1;
        log::debug!("{mode:?} coordinate {lat} {lon} pending for {}", record.file_name);
    }
    updated
}

/// Percentage of records with a primary coordinate, on disk or pending.
pub fn coordinate_progress(records: &[PhotoRecord]) -> u8 {
    let total = records.len();
    if total == 0 {
        return 0;
    }
    let with_coordinate = records
        .iter()
        .filter(|r| r.effective_coordinate().is_some())
        .count();
    (100.0 * with_coordinate as f64 / total as f64).round() as u8
}

/// The photos of one folder, in display order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    folder: Option<PathBuf>,
    records: Vec<PhotoRecord>,
}

impl Catalog {
    /// Build a catalog from already materialized records, sorting them for display.
    pub fn from_records(folder: Option<PathBuf>, mut records: Vec<PhotoRecord>) -> Self {
        // stable: ties keep file-name order
        records.sort_by(|a, b| a.date_time_original.cmp(&b.date_time_original));
        Self { folder, records }
    }

    /// Scan the image files directly inside `dir`.
    ///
    /// A file whose geotag cannot be read is still cataloged, with empty
    /// coordinates; only failing to list the directory is an error.
    pub fn scan(dir: &Path, reader: &dyn GeotagReader) -> Result<Self> {
        let paths = list_image_files(dir)?;
        log::info!("Found {} image(s) in {}", paths.len(), dir.display());

        let records = paths
            .into_iter()
            .map(|path| {
                let modified = std::fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .map(DateTime::<Local>::from)
                    .unwrap_or_else(|e| {
                        log::warn!("Failed to stat {}: {e}", path.display());
                        DateTime::<Local>::from(std::time::UNIX_EPOCH)
                    });
                let record = PhotoRecord::new(path, modified);
                match reader.read_geotag(&record.file_path) {
                    Ok(geotag) => record.with_geotag(geotag),
                    Err(e) => {
                        log::warn!("Failed to read EXIF from {}: {e:#}", record.file_path.display());
                        record
                    }
                }
            })
            .collect();

        Ok(Self::from_records(Some(dir.to_path_buf()), records))
    }

    pub fn folder(&self) -> Option<&Path> {
        self.folder.as_deref()
    }

    pub fn records(&self) -> &[PhotoRecord] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [PhotoRecord] {
        &mut self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, file_name: &str) -> Option<&PhotoRecord> {
        self.records.iter().find(|r| r.file_name == file_name)
    }

    pub fn visible(&self, hide_if_has_coordinate: bool) -> impl Iterator<Item = &PhotoRecord> {
        apply_filter(&self.records, hide_if_has_coordinate)
    }

    pub fn rows(&self, hide_if_has_coordinate: bool) -> Vec<Row> {
        self.visible(hide_if_has_coordinate).map(PhotoRecord::row).collect()
    }

    pub fn set_pending_edit(
        &mut self,
        selected: &HashSet<String>,
        mode: EditMode,
        lat: f64,
        lon: f64,
    ) -> usize {
        set_pending_edit(&mut self.records, selected, mode, lat, lon)
    }

    pub fn modified_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_modified).count()
    }

    pub fn coordinate_progress(&self) -> u8 {
        coordinate_progress(&self.records)
    }
}
