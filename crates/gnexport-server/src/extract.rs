use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::ApiError;
use crate::state::AppState;

/// Role id of the caller, read from the configured gateway header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerRole(pub i64);

impl FromRequestParts<AppState> for CallerRole {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = state.config.exports.role_header.as_str();
        let value = parts
            .headers
            .get(header)
            .ok_or_else(|| ApiError::unauthorized(format!("missing {header} header")))?;
        value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(CallerRole)
            .ok_or_else(|| ApiError::unauthorized(format!("invalid {header} header")))
    }
}
