//! Daily semantic export of occurrence records.
//!
//! The records of the configured view are fed to an [`OccurrenceStore`] and
//! the serialized store is published to `etalab.output_path`. The file is
//! rebuilt on request when it is missing or older than today's midnight.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use gnexport_core::{DatasetQuery, Export, ExportError, RowScope};
use gnexport_output::write_atomic;
use serde_json::{Map, Value};
use tracing::{info, instrument};

use crate::config::EtalabSettings;
use crate::error::ApiError;
use crate::state::AppState;

pub const CONTENT_TYPE: &str = "application/n-triples";

/// Sink turning flat records into a serialized graph.
pub trait OccurrenceStore: Send {
    fn add_record(&mut self, record: &Map<String, Value>);

    fn save(&self, out: &mut dyn Write) -> io::Result<()>;
}

/// N-Triples store with one subject per record and one literal per
/// non-null column.
#[derive(Debug)]
pub struct NTriplesStore {
    base_uri: String,
    id_column: Option<String>,
    lines: Vec<String>,
    records: usize,
}

impl NTriplesStore {
    pub fn new(base_uri: impl Into<String>, id_column: Option<String>) -> Self {
        Self {
            base_uri: base_uri.into(),
            id_column,
            lines: Vec::new(),
            records: 0,
        }
    }

    fn subject(&self, record: &Map<String, Value>) -> String {
        let id = self
            .id_column
            .as_deref()
            .and_then(|c| record.get(c))
            .filter(|v| !v.is_null())
            .map(literal_text)
            .unwrap_or_else(|| self.records.to_string());
        format!("<{}{}>", self.base_uri, iri_segment(&id))
    }
}

impl OccurrenceStore for NTriplesStore {
    fn add_record(&mut self, record: &Map<String, Value>) {
        self.records += 1;
        let subject = self.subject(record);
        self.lines.push(format!(
            "{subject} <http://www.w3.org/1999/02/22-rdf-syntax-ns#type> <{}Occurrence> .",
            self.base_uri
        ));
        for (column, value) in record {
            if value.is_null() {
                continue;
            }
            self.lines.push(format!(
                "{subject} <{}{}> \"{}\" .",
                self.base_uri,
                iri_segment(column),
                escape_literal(&literal_text(value))
            ));
        }
    }

    fn save(&self, out: &mut dyn Write) -> io::Result<()> {
        for line in &self.lines {
            writeln!(out, "{line}")?;
        }
        Ok(())
    }
}

fn literal_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn escape_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

/// Characters allowed unescaped in our IRIs; everything else becomes `_`.
fn iri_segment(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || "-_.~".contains(c) { c } else { '_' })
        .collect()
}

/// Missing, or last written before today's local midnight.
pub fn is_stale(path: &Path, now: DateTime<Local>) -> bool {
    let Ok(modified) = path.metadata().and_then(|m| m.modified()) else {
        return true;
    };
    let midnight = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|m| m.and_local_timezone(Local).earliest())
        .unwrap_or(now);
    modified < SystemTime::from(midnight)
}

/// Path of the Etalab file, regenerated first when stale.
#[instrument(skip_all)]
pub async fn refresh(state: &AppState) -> Result<PathBuf, ApiError> {
    let settings = &state.config.etalab;
    let path = match settings.output_path.as_deref() {
        Some(p) if settings.enabled && !p.is_empty() => PathBuf::from(p),
        _ => return Err(ApiError::EtalabDisabled),
    };

    let _guard = state.locks.lock(&path).await;
    if !is_stale(&path, Local::now()) {
        return Ok(path);
    }

    let mut store = NTriplesStore::new(&settings.base_uri, settings.id_column.clone());
    let records = collect(state, settings, &mut store)
        .await
        .map_err(|e| ApiError::export(e, state.debug()))?;

    let target = path.clone();
    let written = tokio::task::spawn_blocking(move || {
        write_atomic(&target, |out| store.save(out).map_err(Into::into))
    })
    .await
    .map_err(|e| ApiError::export(ExportError::with_source("etalab task failed", e), state.debug()))?;

    match written {
        Ok(()) => {
            info!(path = %path.display(), records, "etalab export regenerated");
            Ok(path)
        }
        Err(gnexport_output::Error::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
            Err(ApiError::FileNotFound(path.display().to_string()))
        }
        Err(err) => Err(ApiError::export(err.into(), state.debug())),
    }
}

/// Feed every row of the Etalab view to `store`, page by page.
async fn collect(
    state: &AppState,
    settings: &EtalabSettings,
    store: &mut dyn OccurrenceStore,
) -> gnexport_core::Result<usize> {
    let view = Export::new(0, "etalab", &settings.schema, &settings.view);
    let columns = state.datasets.columns(&view).await?;
    if columns.is_empty() {
        return Err(ExportError::empty_dataset(format!(
            "View {} has no columns",
            view.qualified_view()
        )));
    }

    let page_size = state.config.exports.max_limit;
    let mut query = DatasetQuery::all(RowScope::All, page_size);
    let mut count = 0;
    loop {
        let result = state.datasets.fetch(&view, &columns, &query).await?;
        for row in &result.rows {
            let record: Map<String, Value> = result
                .columns
                .iter()
                .zip(row)
                .map(|(c, v)| (c.name.clone(), v.clone()))
                .collect();
            store.add_record(&record);
            count += 1;
        }
        if result.rows.len() < page_size {
            break;
        }
        query.page.page += 1;
    }
    Ok(count)
}
