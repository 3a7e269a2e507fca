//! Regeneration of scheduled export files.
//!
//! Each schedule owns one file, `<label>.<ext>`, in the schedules directory.
//! A file is rebuilt when it is missing or when its age exceeds the schedule's
//! frequency. Schedules run one after the other and a failure never stops the
//! batch.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use gnexport_core::{
    Export, ExportError, ExportFormat, ExportSchedule, PageRequest, QueryResult, Result,
};
use gnexport_output::{write_atomic, writer_for};
use gnexport_search::RequestParams;
use tracing::{error, info, instrument};

use crate::pipeline::{ensure_transformable, run_query, sanitize_filename};
use crate::state::AppState;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    UpToDate,
    GeneratedOk,
    GeneratedFailed,
}

/// Counts of one scheduler run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub up_to_date: usize,
    pub generated: usize,
    pub failed: usize,
}

impl ScheduleReport {
    fn record(&mut self, outcome: ScheduleOutcome) {
        match outcome {
            ScheduleOutcome::UpToDate => self.up_to_date += 1,
            ScheduleOutcome::GeneratedOk => self.generated += 1,
            ScheduleOutcome::GeneratedFailed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.up_to_date + self.generated + self.failed
    }
}

/// `true` when `path` is missing or `mtime + frequency_days < now`.
pub fn needs_generation(path: &Path, frequency_days: u32, now: SystemTime) -> bool {
    let Ok(modified) = path.metadata().and_then(|m| m.modified()) else {
        return true;
    };
    let expires = modified + DAY * frequency_days;
    expires < now
}

/// Output file of a schedule.
pub fn schedule_path(dir: &Path, label: &str, format: ExportFormat) -> PathBuf {
    dir.join(format!("{}.{}", sanitize_filename(label), format.extension()))
}

/// Process every schedule once.
pub async fn run_schedules(state: &AppState) -> Result<ScheduleReport> {
    let started = Instant::now();
    info!("START schedule export task");

    let schedules = state.catalog.schedules().await?;
    let dir = state.config.exports.schedules_dir();
    std::fs::create_dir_all(&dir)?;

    let mut report = ScheduleReport::default();
    for schedule in &schedules {
        let outcome = match run_one(state, &dir, schedule).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(
                    schedule_id = schedule.id,
                    export_id = schedule.id_export,
                    error = %err.detail(),
                    "scheduled export failed"
                );
                ScheduleOutcome::GeneratedFailed
            }
        };
        report.record(outcome);
    }

    info!(
        up_to_date = report.up_to_date,
        generated = report.generated,
        failed = report.failed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "END schedule export task"
    );
    Ok(report)
}

#[instrument(skip_all, fields(schedule_id = schedule.id, export_id = schedule.id_export))]
async fn run_one(state: &AppState, dir: &Path, schedule: &ExportSchedule) -> Result<ScheduleOutcome> {
    let format = ExportFormat::parse(&schedule.format).ok_or_else(|| {
        ExportError::invalid_export(format!("unknown schedule format '{}'", schedule.format))
    })?;
    let export = state.catalog.get(schedule.id_export).await?;
    let path = schedule_path(dir, &export.label, format);

    let _guard = state.locks.lock(&path).await;
    if !needs_generation(&path, schedule.frequency_days, SystemTime::now()) {
        return Ok(ScheduleOutcome::UpToDate);
    }

    ensure_transformable(&export, format)?;
    let result = query_all(state, &export).await?;

    let prj = match (format, export.geometry_srid) {
        (ExportFormat::Shapefile, Some(srid)) => state.datasets.spatial_reference_wkt(srid).await?,
        _ => None,
    };
    let writer = writer_for(format, &state.scratch, &sanitize_filename(&export.label), prj);
    if format == ExportFormat::Shapefile {
        state.scratch.ensure()?;
    }

    let target = path.clone();
    tokio::task::spawn_blocking(move || write_atomic(&target, |out| writer.write(&result, out)))
        .await
        .map_err(|e| ExportError::with_source("schedule task failed", e))??;

    info!(
        label = %export.label,
        frequency_days = schedule.frequency_days,
        path = %path.display(),
        "scheduled export done"
    );
    Ok(ScheduleOutcome::GeneratedOk)
}

/// Every row of the export, fetched `max_limit` rows at a time.
async fn query_all(state: &AppState, export: &Export) -> Result<QueryResult> {
    let mut params =
        RequestParams::from_pairs(std::iter::empty(), state.config.exports.file_limits());
    params.page = PageRequest::new(state.config.exports.max_limit.max(1), 0);

    let mut result = run_query(state, export, None, params.clone()).await?;
    while (result.rows.len() as u64) < result.total_filtered {
        params.page.page += 1;
        let next = run_query(state, export, None, params.clone()).await?;
        if next.rows.is_empty() {
            break;
        }
        result.rows.extend(next.rows);
    }
    result.limit = result.rows.len();
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_needs_generation() {
        let dir = tempfile::tempdir().unwrap();
        assert!(needs_generation(&dir.path().join("absent.csv"), 1, SystemTime::now()));
    }

    #[test]
    fn staleness_follows_frequency() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("synthese.csv");
        std::fs::write(&path, "id\n").unwrap();

        let now = SystemTime::now();
        assert!(!needs_generation(&path, 1, now));
        assert!(needs_generation(&path, 1, now + DAY * 2));
        assert!(!needs_generation(&path, 7, now + DAY * 2));
    }

    #[test]
    fn schedule_file_is_named_after_label() {
        let path = schedule_path(Path::new("/data/schedules"), "Synthèse faune", ExportFormat::Shapefile);
        assert_eq!(path, PathBuf::from("/data/schedules/Synthese faune.zip"));
    }
}
