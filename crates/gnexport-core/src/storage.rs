//! Storage traits implemented by the PostgreSQL and in-memory backends.

use async_trait::async_trait;

use crate::column::ColumnInfo;
use crate::error::Result;
use crate::model::{Action, Export, ExportSchedule, RoleInfo};
use crate::query::DatasetQuery;
use crate::result::QueryResult;

/// Read access to the export catalog and its role grants.
///
/// Implementations must be thread-safe (`Send + Sync`).
///
/// # Example
///
/// ```ignore
/// use gnexport_core::{ExportCatalog, Result};
///
/// async fn labels(catalog: &dyn ExportCatalog, id_role: i64) -> Result<Vec<String>> {
///     let exports = catalog.allowed_exports(id_role).await?;
///     Ok(exports.into_iter().map(|e| e.label).collect())
/// }
/// ```
#[async_trait]
pub trait ExportCatalog: Send + Sync {
    /// Exports the role may see: public ones plus those granted to the role
    /// or to one of its groups, ordered by id.
    ///
    /// A role without grants gets an empty list, never an error.
    async fn allowed_exports(&self, id_role: i64) -> Result<Vec<Export>>;

    /// One export the role may see.
    ///
    /// # Errors
    ///
    /// `NoResultFound` if no export has this id, `InsufficientRights` if it
    /// exists but is neither public nor granted to the role.
    async fn resolve_one(&self, id_role: i64, id_export: i64) -> Result<Export>;

    /// One export regardless of grants.
    ///
    /// # Errors
    ///
    /// `NoResultFound` if no export has this id.
    async fn get(&self, id_export: i64) -> Result<Export>;

    /// Every configured regeneration schedule, ordered by id.
    async fn schedules(&self) -> Result<Vec<ExportSchedule>>;
}

/// Resolves the caller's scope on the exports module.
#[async_trait]
pub trait PermissionResolver: Send + Sync {
    /// # Errors
    ///
    /// `InsufficientRights` when the role holds no scope for `action`.
    async fn resolve(&self, id_role: i64, action: Action) -> Result<RoleInfo>;
}

/// Runs queries against the view behind an export.
#[async_trait]
pub trait DatasetSource: Send + Sync {
    /// Columns of the view in declaration order. Empty when the view does not
    /// exist or exposes nothing.
    async fn columns(&self, export: &Export) -> Result<Vec<ColumnInfo>>;

    /// Run one page of `query`. `columns` is the output of [`columns`](Self::columns).
    async fn fetch(
        &self,
        export: &Export,
        columns: &[ColumnInfo],
        query: &DatasetQuery,
    ) -> Result<QueryResult>;

    /// WKT of the spatial reference system, for `.prj` files.
    async fn spatial_reference_wkt(&self, srid: i32) -> Result<Option<String>>;
}
