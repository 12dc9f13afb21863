//! Persisting pending edits.
//!
//! [`CommitEngine::commit`] walks every modified record, turns its pending
//! overlay into a [`GpsTags`] set (adding `GPSImgDirection` when both ends of
//! the view are known), hands it to a [`GeotagWriter`] and asks a
//! [`FailureHandler`] what to do whenever a write fails.

use anyhow::Error;
use serde::Serialize;
use std::path::PathBuf;

use crate::catalog::PhotoRecord;
use crate::error::GeotagError;
use crate::exif::{GeotagWriter, GpsTags};
use crate::geo::{Axis, Dms, bearing};

/// What to do about a file whose write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Try the same file again.
    Retry,
    /// Leave the file modified and move on to the next one.
    Ignore,
    /// Stop the batch; files after this one are not attempted.
    Cancel,
}

/// Decides, per failed write, whether to retry, ignore or cancel.
pub trait FailureHandler {
    fn on_failure(&mut self, record: &PhotoRecord, error: &Error) -> FailureAction;
}

impl<F> FailureHandler for F
where
    F: FnMut(&PhotoRecord, &Error) -> FailureAction,
{
    fn on_failure(&mut self, record: &PhotoRecord, error: &Error) -> FailureAction {
        self(record, error)
    }
}

/// A fixed answer for every failure, for non-interactive callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy(pub FailureAction);

impl FailureHandler for FailurePolicy {
    fn on_failure(&mut self, _record: &PhotoRecord, _error: &Error) -> FailureAction {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommitOutcome {
    Committed,
    Failed,
    Ignored,
    /// Dry run: tags were built but nothing was written.
    Previewed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitEntry {
    pub file_path: PathBuf,
    pub outcome: CommitOutcome,
    pub error: Option<String>,
    /// The tags that were (or would have been) written.
    pub tags: GpsTags,
    /// Write attempts made, retries included.
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CommitReport {
    pub entries: Vec<CommitEntry>,
    pub committed_count: usize,
    pub total_modified: usize,
    /// The handler cancelled the batch before every record was attempted.
    pub cancelled: bool,
}

impl CommitReport {
    /// `round(100 * committed / total)`, `0` for an empty batch.
    pub fn percent(&self) -> u8 {
        if self.total_modified == 0 {
            return 0;
        }
        (100.0 * self.committed_count as f64 / self.total_modified as f64).round() as u8
    }

    pub fn count(&self, outcome: CommitOutcome) -> usize {
        self.entries.iter().filter(|e| e.outcome == outcome).count()
    }

    pub fn entry(&self, file_name: &str) -> Option<&CommitEntry> {
        self.entries
            .iter()
            .find(|e| e.file_path.file_name().is_some_and(|n| n == file_name))
    }

    /// One-line summary for a status bar.
    pub fn status_message(&self) -> String {
        let mut msg = format!(
            "Coordinates saved to EXIF: {} of {} file(s)",
            self.committed_count, self.total_modified
        );
        let failed = self.count(CommitOutcome::Failed);
        let ignored = self.count(CommitOutcome::Ignored);
        let previewed = self.count(CommitOutcome::Previewed);
        if failed > 0 {
            msg.push_str(&format!(", {failed} failed"));
        }
        if ignored > 0 {
            msg.push_str(&format!(", {ignored} ignored"));
        }
        if previewed > 0 {
            msg.push_str(&format!(", {previewed} previewed (dry run)"));
        }
        if self.cancelled {
            msg.push_str(", cancelled");
        }
        msg
    }
}

/// Build the tag set for one modified record.
///
/// `GPSImgDirection` is computed from the effective position (pending, else
/// on disk) toward the effective destination (pending, else on disk), and only
/// when the record has both. It is omitted rather than written as zero.
pub fn build_tags(record: &PhotoRecord) -> Result<GpsTags, GeotagError> {
    let pending = &record.pending;
    let violation = |reason| GeotagError::Precondition {
        file: record.file_path.clone(),
        reason,
    };

    if pending.is_empty() {
        return Err(violation("has no pending coordinates"));
    }
    if pending.lat.is_some() != pending.lon.is_some() {
        return Err(violation("its pending latitude/longitude pair is incomplete"));
    }
    if pending.dest_lat.is_some() != pending.dest_lon.is_some() {
        return Err(violation("its pending destination pair is incomplete"));
    }
    let in_range = |lat: Option<f64>, lon: Option<f64>| {
        lat.is_none_or(|v| (-90.0..=90.0).contains(&v))
            && lon.is_none_or(|v| (-180.0..=180.0).contains(&v))
    };
    if !in_range(pending.lat, pending.lon) || !in_range(pending.dest_lat, pending.dest_lon) {
        return Err(violation("a pending coordinate is out of range"));
    }

    let mut tags = GpsTags {
        latitude: pending.lat.map(|v| Dms::from_decimal(v, Axis::Latitude)),
        longitude: pending.lon.map(|v| Dms::from_decimal(v, Axis::Longitude)),
        dest_latitude: pending.dest_lat.map(|v| Dms::from_decimal(v, Axis::Latitude)),
        dest_longitude: pending.dest_lon.map(|v| Dms::from_decimal(v, Axis::Longitude)),
        img_direction: None,
    };

    if let (Some(from), Some(to)) = (record.effective_coordinate(), record.effective_destination()) {
        tags.img_direction = Some(bearing(from, to));
    }

    Ok(tags)
}

/// Writes pending edits back to the files.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitEngine {
    /// Build and report tags without calling the writer.
    pub dry_run: bool,
}

impl CommitEngine {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    /// Commit every modified record.
    ///
    /// Successful records have their pending overlay folded into the source
    /// coordinates. Failed and ignored records stay modified. Records whose
    /// overlay is malformed are reported as failed without calling the writer
    /// or the handler.
    pub fn commit(
        &self,
        records: &mut [PhotoRecord],
        writer: &mut dyn GeotagWriter,
        handler: &mut dyn FailureHandler,
    ) -> CommitReport {
        let mut report = CommitReport {
            total_modified: records.iter().filter(|r| r.is_modified).count(),
            ..Default::default()
        };
        log::info!("Committing {} modified file(s)", report.total_modified);

        for record in records.iter_mut().filter(|r| r.is_modified) {
            let tags = match build_tags(record) {
                Ok(tags) => tags,
                Err(e) => {
                    log::error!("{e}");
                    report.entries.push(CommitEntry {
                        file_path: record.file_path.clone(),
                        outcome: CommitOutcome::Failed,
                        error: Some(e.to_string()),
                        tags: GpsTags::default(),
                        attempts: 0,
                    });
                    continue;
                }
            };

            if self.dry_run {
                log::info!(
                    "[dry run] {}: {}",
                    record.file_name,
                    tags.tag_names().join(", ")
                );
                report.entries.push(CommitEntry {
                    file_path: record.file_path.clone(),
                    outcome: CommitOutcome::Previewed,
                    error: None,
                    tags,
                    attempts: 0,
                });
                continue;
            }

            let mut attempts = 0;
            let (outcome, error) = loop {
                attempts += 1;
                match writer.write_tags(&record.file_path, &tags) {
                    Ok(()) => break (CommitOutcome::Committed, None),
                    Err(e) => {
                        log::warn!("Failed to save EXIF to {}: {e:#}", record.file_name);
                        match handler.on_failure(record, &e) {
                            FailureAction::Retry => continue,
                            FailureAction::Ignore => break (CommitOutcome::Ignored, Some(e)),
                            FailureAction::Cancel => {
                                report.cancelled = true;
                                break (CommitOutcome::Failed, Some(e));
                            }
                        }
                    }
                }
            };

            if outcome == CommitOutcome::Committed {
                record.resolve_pending();
                report.committed_count += 1;
                log::debug!("Saved {}", record.file_name);
            }
            report.entries.push(CommitEntry {
                file_path: record.file_path.clone(),
                outcome,
                error: error.map(|e| format!("{e:#}")),
                tags,
                attempts,
            });

            if report.cancelled {
                log::info!("Commit cancelled at {}", record.file_name);
                break;
            }
        }

        log::info!("{}", report.status_message());
        report
    }
}
