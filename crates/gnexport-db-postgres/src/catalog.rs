//! Export catalog backed by the `gn_exports` schema.
//!
//! A role reaches an export when the export is public or when
//! `cor_exports_roles` grants it to the role itself or to one of the groups
//! listed for it in `utilisateurs.cor_roles`.

use async_trait::async_trait;
use gnexport_core::{Export, ExportCatalog, ExportError, ExportSchedule, Result};
use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use sqlx_postgres::PgPool;
use tracing::{debug, warn};

use crate::error::PostgresError;

const EXPORT_COLUMNS: &str = r#"e.id::bigint, e.label, e."desc", e.schema_name, e.view_name,
    e.geometry_field, e.geometry_srid::int4, COALESCE(e.public, FALSE)"#;

const ROLE_HAS_GRANT: &str = r#"EXISTS (
    SELECT 1 FROM gn_exports.cor_exports_roles cer
    WHERE cer.id_export = e.id
      AND (cer.id_role = $1
           OR cer.id_role IN (
               SELECT cr.id_role_groupe FROM utilisateurs.cor_roles cr
               WHERE cr.id_role_utilisateur = $1)))"#;

type ExportRow = (
    i64,
    String,
    Option<String>,
    String,
    String,
    Option<String>,
    Option<i32>,
    bool,
);

fn export_from_row(row: ExportRow) -> Export {
    let (id, label, description, schema_name, view_name, geometry_field, geometry_srid, public) =
        row;
    Export {
        id,
        label,
        description,
        schema_name,
        view_name,
        geometry_field: geometry_field.filter(|g| !g.is_empty()),
        geometry_srid,
        public,
    }
}

/// [`ExportCatalog`] over a GeoNature database.
#[derive(Debug, Clone)]
pub struct PgExportCatalog {
    pool: PgPool,
}

impl PgExportCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn role_has_grant(&self, id_role: i64, id_export: i64) -> Result<bool> {
        let sql = format!(
            "SELECT {ROLE_HAS_GRANT} FROM gn_exports.t_exports e WHERE e.id = $2"
        );
        let granted: Option<bool> = query_scalar(&sql)
            .bind(id_role)
            .bind(id_export)
            .fetch_optional(&self.pool)
            .await
            .map_err(PostgresError::from)?;
        Ok(granted.unwrap_or(false))
    }
}

#[async_trait]
impl ExportCatalog for PgExportCatalog {
    async fn allowed_exports(&self, id_role: i64) -> Result<Vec<Export>> {
        let sql = format!(
            "SELECT {EXPORT_COLUMNS} FROM gn_exports.t_exports e \
             WHERE COALESCE(e.public, FALSE) OR {ROLE_HAS_GRANT} \
             ORDER BY e.id"
        );
        let rows: Vec<ExportRow> = query_as(&sql)
            .bind(id_role)
            .fetch_all(&self.pool)
            .await
            .map_err(PostgresError::from)?;

        debug!(id_role, count = rows.len(), "resolved allowed exports");
        Ok(rows.into_iter().map(export_from_row).collect())
    }

    async fn resolve_one(&self, id_role: i64, id_export: i64) -> Result<Export> {
        let export = self.get(id_export).await?;
        if export.public || self.role_has_grant(id_role, id_export).await? {
            return Ok(export);
        }
        Err(ExportError::insufficient_rights(format!(
            "role {id_role} has no access to export {id_export}"
        )))
    }

    async fn get(&self, id_export: i64) -> Result<Export> {
        let sql = format!("SELECT {EXPORT_COLUMNS} FROM gn_exports.t_exports e WHERE e.id = $1");
        let row: Option<ExportRow> = query_as(&sql)
            .bind(id_export)
            .fetch_optional(&self.pool)
            .await
            .map_err(PostgresError::from)?;

        row.map(export_from_row).ok_or_else(|| {
            ExportError::no_result_found(format!("Export {id_export} not found"))
        })
    }

    async fn schedules(&self) -> Result<Vec<ExportSchedule>> {
        let rows: Vec<(i64, i64, String, i32)> = query_as(
            "SELECT id_export_schedule::bigint, id_export::bigint, format, frequency::int4 \
             FROM gn_exports.t_export_schedules ORDER BY id_export_schedule",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(PostgresError::from)?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, id_export, format, frequency)| {
                if frequency <= 0 {
                    warn!(schedule_id = id, frequency, "ignoring schedule with non-positive frequency");
                    return None;
                }
                Some(ExportSchedule {
                    id,
                    id_export,
                    format,
                    frequency_days: frequency as u32,
                })
            })
            .collect())
    }
}
