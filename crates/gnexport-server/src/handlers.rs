use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use chrono::Local;
use gnexport_core::{Action, Export};
use gnexport_search::RequestParams;
use serde_json::{Value, json};
use tracing::info;

use crate::error::ApiError;
use crate::etalab;
use crate::extract::CallerRole;
use crate::pipeline::{self, Rendered};
use crate::state::AppState;

type QueryPairs = Query<Vec<(String, String)>>;

fn params_from(pairs: &[(String, String)], limits: gnexport_search::PageLimits) -> RequestParams {
    RequestParams::from_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())), limits)
}

pub async fn healthz() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// `GET /`: exports the caller may read.
pub async fn list_exports(
    State(state): State<AppState>,
    CallerRole(id_role): CallerRole,
) -> Result<Json<Vec<Export>>, ApiError> {
    let debug = state.debug();
    state
        .permissions
        .resolve(id_role, Action::Read)
        .await
        .map_err(|e| ApiError::export(e, debug))?;
    let exports = state
        .catalog
        .allowed_exports(id_role)
        .await
        .map_err(|e| ApiError::export(e, debug))?;
    Ok(Json(exports))
}

/// `GET /api/{id_export}`: one page of rows as JSON.
pub async fn export_api(
    State(state): State<AppState>,
    CallerRole(id_role): CallerRole,
    Path(id_export): Path<String>,
    Query(pairs): QueryPairs,
) -> Result<Json<Value>, ApiError> {
    let debug = state.debug();
    let outcome = async {
        let id_export = pipeline::parse_export_id(&id_export)?;
        let role = state.permissions.resolve(id_role, Action::Read).await?;
        let export = state.catalog.resolve_one(id_role, id_export).await?;
        let params = params_from(&pairs, state.config.exports.api_limits());
        pipeline::run_query(&state, &export, Some(&role), params).await
    }
    .await;

    let result = outcome.map_err(|e| ApiError::export(e, debug))?;
    Ok(Json(result.to_api_response()))
}

/// `GET /{id_export}/{format}`: the export as a file attachment.
pub async fn export_file(
    State(state): State<AppState>,
    CallerRole(id_role): CallerRole,
    Path((id_export, format)): Path<(String, String)>,
    Query(pairs): QueryPairs,
) -> Result<Response, ApiError> {
    let debug = state.debug();
    let outcome = async {
        let (id_export, format) = pipeline::check_export_request(&state, &id_export, &format)?;
        let role = state.permissions.resolve(id_role, Action::Export).await?;
        let export = state.catalog.resolve_one(id_role, id_export).await?;
        pipeline::ensure_transformable(&export, format)?;

        let params = params_from(&pairs, state.config.exports.file_limits());
        let result = pipeline::run_query(&state, &export, Some(&role), params).await?;
        let rows = result.rows.len();
        let stem = pipeline::export_filename(&export.label, Local::now().naive_local());
        let rendered = pipeline::render(&state, &export, format, result, stem).await?;

        info!(
            export_id = export.id,
            format = %format,
            rows,
            bytes = rendered.body.len(),
            "export file generated"
        );
        Ok::<_, gnexport_core::ExportError>(rendered)
    }
    .await;

    let rendered = outcome.map_err(|e| ApiError::export(e, debug))?;
    Ok(attachment(rendered))
}

/// `GET /etalab`: the daily semantic export, rebuilt when stale.
pub async fn etalab_export(State(state): State<AppState>) -> Result<Response, ApiError> {
    let path = etalab::refresh(&state).await?;
    let body = tokio::fs::read(&path)
        .await
        .map_err(|e| ApiError::export(e.into(), state.debug()))?;
    Ok((
        [(header::CONTENT_TYPE, HeaderValue::from_static(etalab::CONTENT_TYPE))],
        body,
    )
        .into_response())
}

fn attachment(rendered: Rendered) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", rendered.file_name);
    let mut response = Response::new(Body::from(rendered.body));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(rendered.content_type),
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}
