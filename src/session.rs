//! Editing state shared by the front ends.
//!
//! A [`Session`] owns the catalog of the open folder, the favorites list and
//! the bits of view state that decide what an edit means: the current
//! [`EditMode`], the coordinate filter, the map center and the last position
//! the marker was dropped at.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

use crate::catalog::{Catalog, EditMode, Row};
use crate::commit::{CommitEngine, CommitReport, FailureHandler};
use crate::config::Config;
use crate::exif::{GeotagReader, GeotagWriter};
use crate::favorites::{Favorites, JumpTarget};
use crate::geo::Coordinate;

/// Markers to draw for the current photo.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MarkerView {
    /// The draggable marker: the coordinate being edited in the current mode.
    pub movable: Coordinate,
    /// In destination mode, the photo's own position, drawn but not draggable.
    pub fixed: Option<Coordinate>,
}

/// Result of [`Session::save`].
#[derive(Debug, Clone, Serialize)]
pub struct SaveSummary {
    pub report: CommitReport,
    pub message: String,
    /// Coordinate progress after the save.
    pub progress: u8,
}

#[derive(Debug)]
pub struct Session {
    config: Config,
    catalog: Catalog,
    favorites: Favorites,
    mode: EditMode,
    hide_with_coordinates: bool,
    map_center: Coordinate,
    last_marker: Option<Coordinate>,
}

impl Session {
    pub fn new(config: Config, favorites: Favorites) -> Self {
        Self {
            hide_with_coordinates: config.catalog.hide_with_coordinates,
            map_center: config.map.initial_center,
            config,
            catalog: Catalog::default(),
            favorites,
            mode: EditMode::default(),
            last_marker: None,
        }
    }

    /// Replace the catalog with a fresh scan of `dir`. Unsaved edits are dropped.
    pub fn open_folder(&mut self, dir: &Path, reader: &dyn GeotagReader) -> Result<()> {
        let unsaved = self.catalog.modified_count();
        if unsaved > 0 {
            log::warn!("Discarding {unsaved} unsaved edit(s)");
        }
        self.catalog = Catalog::scan(dir, reader)?;
        self.last_marker = None;
        Ok(())
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn favorites(&self) -> &Favorites {
        &self.favorites
    }

    pub fn favorites_mut(&mut self) -> &mut Favorites {
        &mut self.favorites
    }

    pub fn mode(&self) -> EditMode {
        self.mode
    }

    pub fn filter_enabled(&self) -> bool {
        self.hide_with_coordinates
    }

    pub fn map_center(&self) -> Coordinate {
        self.map_center
    }

    pub fn last_marker(&self) -> Option<Coordinate> {
        self.last_marker
    }

    /// Flip "hide photos with coordinates". Returns the new state.
    pub fn toggle_filter(&mut self) -> bool {
        self.hide_with_coordinates = !self.hide_with_coordinates;
        self.hide_with_coordinates
    }

    /// Switch between editing positions and destinations.
    ///
    /// Destinations are usually set on photos that already have a position,
    /// which the filter would hide, so entering destination mode clears it.
    pub fn set_mode(&mut self, mode: EditMode) {
        if mode == EditMode::Destination {
            self.hide_with_coordinates = false;
        }
        self.mode = mode;
    }

    /// Rows currently visible in the file table.
    pub fn rows(&self) -> Vec<Row> {
        self.catalog.rows(self.hide_with_coordinates)
    }

    /// The marker was dropped at `(lat, lon)` with `selected` files highlighted.
    ///
    /// Returns how many records got a pending edit.
    pub fn on_marker_moved(&mut self, selected: &HashSet<String>, lat: f64, lon: f64) -> usize {
        self.last_marker = Some(Coordinate::new(lat, lon));
        self.catalog.set_pending_edit(selected, self.mode, lat, lon)
    }

    /// Markers for `file_name`, or `None` if it is not in the catalog.
    pub fn markers_for(&self, file_name: &str) -> Option<MarkerView> {
        let record = self.catalog.get(file_name)?;
        let view = match self.mode {
            EditMode::Primary => MarkerView {
                movable: record.effective_coordinate().unwrap_or(self.map_center),
                fixed: None,
            },
            EditMode::Destination => MarkerView {
                movable: record.effective_destination().unwrap_or(self.map_center),
                fixed: record.effective_coordinate(),
            },
        };
        Some(view)
    }

    /// Store the last marker position (or the map center) as a favorite.
    pub fn add_favorite_here(&mut self, key: &str, name: &str) -> Result<Coordinate> {
        let here = self.last_marker.unwrap_or(self.map_center);
        self.favorites.add(key, name, here)?;
        log::info!("Added favorite {name:?} at {here}");
        Ok(here)
    }

    /// Center the map on the favorite bound to `key`.
    pub fn jump_to_favorite(&mut self, key: char) -> Option<JumpTarget> {
        let target = self.favorites.jump_target(key, self.config.map.favorite_zoom)?;
        self.map_center = target.coordinate;
        Some(target)
    }

    /// Write every pending edit to disk.
    pub fn save(
        &mut self,
        writer: &mut dyn GeotagWriter,
        on_failure: &mut dyn FailureHandler,
    ) -> SaveSummary {
        let engine = CommitEngine::new(self.config.commit.dry_run);
        let report = engine.commit(self.catalog.records_mut(), writer, on_failure);
        SaveSummary {
            message: report.status_message(),
            progress: self.catalog.coordinate_progress(),
            report,
        }
    }

    pub fn progress(&self) -> u8 {
        self.catalog.coordinate_progress()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::{CommitOutcome, FailureAction, FailurePolicy};
    use crate::exif::{Geotag, GpsTags};
    use crate::favorites::MemoryFavoritesStore;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct MapReader(HashMap<String, Geotag>);

    impl GeotagReader for MapReader {
        fn read_geotag(&self, path: &Path) -> Result<Geotag> {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            match self.0.get(&name) {
                Some(tag) => Ok(tag.clone()),
                None => anyhow::bail!("no EXIF"),
            }
        }
    }

    #[derive(Default)]
    struct RecordingWriter {
        written: Vec<(PathBuf, GpsTags)>,
    }

    impl GeotagWriter for RecordingWriter {
        fn write_tags(&mut self, path: &Path, tags: &GpsTags) -> Result<()> {
            self.written.push((path.to_path_buf(), tags.clone()));
            Ok(())
        }
    }

    fn selected(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    /// `a.jpg` has a position, `b.jpg` has nothing.
    fn open_session(config: Config) -> (TempDir, Session, MemoryFavoritesStore) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"a").unwrap();
        std::fs::write(dir.path().join("b.jpg"), b"b").unwrap();

        let reader = MapReader(HashMap::from([(
            "a.jpg".to_string(),
            Geotag {
                position: Some(Coordinate::new(10.0, 20.0)),
                ..Default::default()
            },
        )]));

        let store = MemoryFavoritesStore::default();
        let favorites = Favorites::open(Box::new(store.clone())).unwrap();
        let mut session = Session::new(config, favorites);
        session.open_folder(dir.path(), &reader).unwrap();
        (dir, session, store)
    }

    #[test]
    fn open_folder_keeps_unreadable_files() {
        let (_dir, session, _) = open_session(Config::default());
        assert_eq!(session.catalog().len(), 2);
        assert_eq!(session.progress(), 50);
    }

    #[test]
    fn filter_hides_photos_with_coordinates() {
        let (_dir, mut session, _) = open_session(Config::default());
        assert_eq!(session.rows().len(), 2);
        assert!(session.toggle_filter());
        let rows = session.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].file_name, "b.jpg");
    }

    #[test]
    fn destination_mode_turns_filter_off() {
        let mut config = Config::default();
        config.catalog.hide_with_coordinates = true;
        let (_dir, mut session, _) = open_session(config);
        assert!(session.filter_enabled());

        session.set_mode(EditMode::Primary);
        assert!(session.filter_enabled());

        session.set_mode(EditMode::Destination);
        assert!(!session.filter_enabled());
        assert_eq!(session.rows().len(), 2);
    }

    #[test]
    fn marker_move_sets_pending_for_selection_only() {
        let (_dir, mut session, _) = open_session(Config::default());
        let updated = session.on_marker_moved(&selected(&["b.jpg"]), 1.5, 2.5);

        assert_eq!(updated, 1);
        assert_eq!(session.last_marker(), Some(Coordinate::new(1.5, 2.5)));
        assert!(session.catalog().get("b.jpg").unwrap().is_modified);
        assert!(!session.catalog().get("a.jpg").unwrap().is_modified);
        assert_eq!(session.progress(), 100);
    }

    #[test]
    fn markers_follow_mode() {
        let (_dir, mut session, _) = open_session(Config::default());
        let center = session.map_center();

        let a = session.markers_for("a.jpg").unwrap();
        assert_eq!(a.movable, Coordinate::new(10.0, 20.0));
        assert_eq!(a.fixed, None);
        assert_eq!(session.markers_for("b.jpg").unwrap().movable, center);

        session.set_mode(EditMode::Destination);
        let a = session.markers_for("a.jpg").unwrap();
        assert_eq!(a.movable, center);
        assert_eq!(a.fixed, Some(Coordinate::new(10.0, 20.0)));

        session.on_marker_moved(&selected(&["a.jpg"]), 11.0, 21.0);
        assert_eq!(
            session.markers_for("a.jpg").unwrap().movable,
            Coordinate::new(11.0, 21.0)
        );
        assert!(session.markers_for("missing.jpg").is_none());
    }

    #[test]
    fn favorite_from_last_marker_and_jump() {
        let (_dir, mut session, store) = open_session(Config::default());
        session.on_marker_moved(&HashSet::new(), 48.85, 2.35);
        let here = session.add_favorite_here("p", "Paris").unwrap();

        assert_eq!(here, Coordinate::new(48.85, 2.35));
        assert_eq!(store.saved().len(), 1);

        let target = session.jump_to_favorite('P').unwrap();
        assert_eq!(target.zoom, 16);
        assert_eq!(session.map_center(), here);
        assert!(session.jump_to_favorite('q').is_none());
    }

    #[test]
    fn save_writes_and_reports() {
        let (_dir, mut session, _) = open_session(Config::default());
        session.on_marker_moved(&selected(&["b.jpg"]), 3.0, 4.0);

        let mut writer = RecordingWriter::default();
        let summary = session.save(&mut writer, &mut FailurePolicy(FailureAction::Cancel));

        assert_eq!(writer.written.len(), 1);
        assert!(writer.written[0].0.ends_with("b.jpg"));
        assert_eq!(summary.report.committed_count, 1);
        assert_eq!(summary.progress, 100);
        assert_eq!(summary.message, "Coordinates saved to EXIF: 1 of 1 file(s)");
        assert_eq!(session.catalog().modified_count(), 0);
    }

    #[test]
    fn dry_run_keeps_edits_pending() {
        let mut config = Config::default();
        config.commit.dry_run = true;
        let (_dir, mut session, _) = open_session(config);
        session.on_marker_moved(&selected(&["b.jpg"]), 3.0, 4.0);

        let mut writer = RecordingWriter::default();
        let summary = session.save(&mut writer, &mut FailurePolicy(FailureAction::Ignore));

        assert!(writer.written.is_empty());
        assert_eq!(summary.report.count(CommitOutcome::Previewed), 1);
        assert_eq!(session.catalog().modified_count(), 1);
    }
}
