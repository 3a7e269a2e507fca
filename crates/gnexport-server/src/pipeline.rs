//! Query and render steps shared by the HTTP handlers and the scheduler.

use std::io::Write;
use std::time::Duration;

use chrono::NaiveDateTime;
use gnexport_core::{
    DatasetQuery, Export, ExportError, ExportFormat, QueryResult, Result, RoleInfo, RowScope,
};
use gnexport_output::{ScratchDir, writer_for};
use gnexport_search::{RequestParams, resolve_order, resolve_predicates};
use tracing::{debug, warn};

use crate::state::AppState;

/// Encoded export ready to be sent as an attachment.
#[derive(Debug)]
pub struct Rendered {
    pub body: Vec<u8>,
    pub content_type: &'static str,
    pub file_name: String,
}

/// Export id from its path segment. Anything but a positive integer is an
/// `InvalidExport`.
pub fn parse_export_id(raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id >= 1)
        .ok_or_else(|| ExportError::invalid_export(format!("invalid export id '{raw}'")))
}

/// Validate the path parameters of a file export before anything is queried.
pub fn check_export_request(
    state: &AppState,
    id_export: &str,
    format: &str,
) -> Result<(i64, ExportFormat)> {
    let id_export = parse_export_id(id_export)?;
    let format = state
        .config
        .exports
        .format(format)
        .ok_or_else(|| ExportError::invalid_export(format!("format '{format}' is not enabled")))?;
    Ok((id_export, format))
}

/// Rejects geometry-only formats for exports without a geometry field.
pub fn ensure_transformable(export: &Export, format: ExportFormat) -> Result<()> {
    if format.requires_geometry() && !export.has_geometry() {
        return Err(ExportError::non_transformable(format!(
            "Export {} has no geometry and cannot be exported as {format}",
            export.id
        )));
    }
    Ok(())
}

/// Run one export query. `role` of `None` means every row is visible.
pub async fn run_query(
    state: &AppState,
    export: &Export,
    role: Option<&RoleInfo>,
    params: RequestParams,
) -> Result<QueryResult> {
    let columns = state.datasets.columns(export).await?;
    if columns.is_empty() {
        return Err(ExportError::empty_dataset(format!(
            "View {} has no columns",
            export.qualified_view()
        )));
    }

    let permissions = &state.config.permissions;
    let row_scope = role
        .map(|r| {
            r.row_scope(
                permissions.owner_column.as_deref(),
                permissions.organism_column.as_deref(),
                &columns,
            )
        })
        .unwrap_or(RowScope::All);

    let predicates = resolve_predicates(
        params.predicates,
        &columns,
        state.config.exports.strict_filters,
    )?;
    let order_by = resolve_order(params.orderby.as_deref(), params.order, &columns);

    let query = DatasetQuery {
        row_scope,
        predicates,
        page: params.page,
        order_by,
    };
    let result = state.datasets.fetch(export, &columns, &query).await?;
    if result.total == 0 {
        return Err(ExportError::empty_dataset(format!(
            "Empty dataset for export {}",
            export.id
        )));
    }
    Ok(result)
}

/// Encode `result` on the blocking pool.
pub async fn render(
    state: &AppState,
    export: &Export,
    format: ExportFormat,
    result: QueryResult,
    stem: String,
) -> Result<Rendered> {
    let prj = match (format, export.geometry_srid) {
        (ExportFormat::Shapefile, Some(srid)) => state.datasets.spatial_reference_wkt(srid).await?,
        _ => None,
    };
    let scratch = state.scratch.clone();
    let retention = state.config.exports.shapefile_retention();

    tokio::task::spawn_blocking(move || encode(format, &scratch, &stem, prj, &result, retention))
        .await
        .map_err(|e| ExportError::with_source("encoding task failed", e))?
}

fn encode(
    format: ExportFormat,
    scratch: &ScratchDir,
    stem: &str,
    prj: Option<String>,
    result: &QueryResult,
    retention: Duration,
) -> Result<Rendered> {
    let writer = writer_for(format, scratch, stem, prj);
    let file_name = format!("{stem}.{}", writer.file_extension());

    let (file_name, body) = match format {
        ExportFormat::Shapefile => {
            scratch.ensure()?;
            match scratch.sweep(retention) {
                Ok(removed) if removed > 0 => debug!(removed, "removed stale shapefile archives"),
                Ok(_) => {}
                Err(err) => warn!(error = %err, "failed to sweep shapefile directory"),
            }
            // Respond with this run's bytes, never with the published file.
            let mut body = Vec::new();
            writer.write(result, &mut body)?;
            let archive = format!("export_{file_name}");
            scratch.publish(&archive, |out| Ok(out.write_all(&body)?))?;
            (archive, body)
        }
        ExportFormat::Json | ExportFormat::Csv => {
            let mut body = Vec::new();
            writer.write(result, &mut body)?;
            (file_name, body)
        }
    };

    Ok(Rendered {
        body,
        content_type: writer.content_type(),
        file_name,
    })
}

/// `<label>_<YYYY_MM_DD_HHhMMmSS>`, restricted to safe file name characters.
pub fn export_filename(label: &str, now: NaiveDateTime) -> String {
    format!(
        "{}_{}",
        sanitize_filename(label),
        now.format("%Y_%m_%d_%Hh%Mm%S")
    )
}

/// Keep ASCII letters, digits and `-_.() `. Common Latin accents are folded
/// to their base letter first; anything else is dropped.
pub fn sanitize_filename(label: &str) -> String {
    label
        .chars()
        .filter_map(|c| {
            let c = fold_accent(c);
            (c.is_ascii_alphanumeric() || "-_.() ".contains(c)).then_some(c)
        })
        .collect()
}

fn fold_accent(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'A',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'È' | 'É' | 'Ê' | 'Ë' => 'E',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'Ì' | 'Í' | 'Î' | 'Ï' => 'I',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'Ù' | 'Ú' | 'Û' | 'Ü' => 'U',
        'ç' => 'c',
        'Ç' => 'C',
        'ñ' => 'n',
        'Ñ' => 'N',
        'ÿ' => 'y',
        other => other,
    }
}
