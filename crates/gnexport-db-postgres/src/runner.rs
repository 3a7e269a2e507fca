//! Query execution against export views.
//!
//! Column types come from `information_schema.columns`; the SQL itself is
//! produced by [`ViewQueryBuilder`] and executed here with its bind values.

use std::time::Duration;

use async_trait::async_trait;
use gnexport_core::{
    ColumnInfo, ColumnType, DatasetQuery, DatasetSource, Export, QueryResult, Result,
};
use gnexport_search::{BuiltQuery, SqlValue, ViewQueryBuilder};
use serde_json::Value;
use sqlx_core::query::{Query, query};
use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use sqlx_core::row::Row;
use sqlx_postgres::{PgArguments, PgPool, PgRow, Postgres};
use tracing::{debug, instrument};

use crate::error::{PostgresError, is_undefined_table};

/// [`DatasetSource`] over PostgreSQL views.
#[derive(Debug, Clone)]
pub struct PgDatasetSource {
    pool: PgPool,
    query_timeout: Duration,
}

impl PgDatasetSource {
    pub fn new(pool: PgPool, query_timeout: Duration) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn count(&self, built: &BuiltQuery) -> std::result::Result<u64, PostgresError> {
        let row = bind_all(query(&built.sql), &built.params)
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = row.try_get(0)?;
        Ok(total.max(0) as u64)
    }

    async fn run(
        &self,
        export: &Export,
        columns: &[ColumnInfo],
        dataset_query: &DatasetQuery,
    ) -> std::result::Result<QueryResult, PostgresError> {
        let builder = ViewQueryBuilder::new(&export.schema_name, &export.view_name, columns)
            .row_scope(dataset_query.row_scope.clone())
            .predicates(dataset_query.predicates.clone())
            .order_by(dataset_query.order_by.clone())
            .paginate(dataset_query.page);

        let total_query = builder.build_count(false)?;
        let filtered_query = builder.build_count(true)?;
        let page_query = builder.build()?;

        debug!(sql = %page_query, params = page_query.params.len(), "executing export query");

        let total = self.count(&total_query).await?;
        let total_filtered = if dataset_query.predicates.is_empty() {
            total
        } else {
            self.count(&filtered_query).await?
        };

        let past_end = dataset_query.page.row_offset() as u64 >= total_filtered;
        let rows = if dataset_query.page.limit == 0 || past_end {
            Vec::new()
        } else {
            bind_all(query(&page_query.sql), &page_query.params)
                .fetch_all(&self.pool)
                .await?
        };

        let rows = rows
            .iter()
            .map(|row| extract_row_values(row, columns))
            .collect();

        Ok(QueryResult {
            columns: columns.to_vec(),
            rows,
            total,
            total_filtered,
            page: dataset_query.page.page,
            limit: dataset_query.page.limit,
            geometry_column: geometry_column(export, columns),
        })
    }
}

fn bind_all<'q>(
    mut q: Query<'q, Postgres, PgArguments>,
    params: &[SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        q = match param {
            SqlValue::Text(s) => q.bind(s.clone()),
            SqlValue::BigIntArray(values) => q.bind(values.clone()),
        };
    }
    q
}

/// The export's geometry column, when the view actually exposes it.
fn geometry_column(export: &Export, columns: &[ColumnInfo]) -> Option<String> {
    let name = export.geometry_field.as_deref()?;
    columns
        .iter()
        .find(|c| c.name == name && c.col_type.is_geometry())
        .map(|c| c.name.clone())
}

/// Extract values from a row based on column definitions.
fn extract_row_values(row: &PgRow, columns: &[ColumnInfo]) -> Vec<Value> {
    columns
        .iter()
        .enumerate()
        .map(|(i, col)| extract_column_value(row, i, col.col_type))
        .collect()
}

/// Extract a single column value from a row, following the select casts.
fn extract_column_value(row: &PgRow, index: usize, col_type: ColumnType) -> Value {
    match col_type {
        ColumnType::Integer => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Number(v.into()))
            .unwrap_or(Value::Null),

        ColumnType::Decimal => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .and_then(|v| serde_json::Number::from_f64(v).map(Value::Number))
            .unwrap_or(Value::Null),

        ColumnType::Boolean => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),

        ColumnType::Json | ColumnType::Array | ColumnType::Geometry => row
            .try_get::<Option<Value>, _>(index)
            .ok()
            .flatten()
            .unwrap_or(Value::Null),

        ColumnType::Text
        | ColumnType::Date
        | ColumnType::DateTime
        | ColumnType::Time
        | ColumnType::Uuid => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

#[async_trait]
impl DatasetSource for PgDatasetSource {
    async fn columns(&self, export: &Export) -> Result<Vec<ColumnInfo>> {
        let rows: Vec<(String, String, String, bool)> = query_as(
            "SELECT column_name::text, data_type::text, udt_name::text, is_nullable = 'YES' \
             FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 \
             ORDER BY ordinal_position",
        )
        .bind(&export.schema_name)
        .bind(&export.view_name)
        .fetch_all(&self.pool)
        .await
        .map_err(PostgresError::from)?;

        Ok(rows
            .into_iter()
            .map(|(name, data_type, udt_name, nullable)| {
                ColumnInfo::new(name, ColumnType::from_pg_type(&data_type, &udt_name))
                    .with_nullable(nullable)
            })
            .collect())
    }

    #[instrument(skip_all, fields(export_id = export.id, view = %export.qualified_view()))]
    async fn fetch(
        &self,
        export: &Export,
        columns: &[ColumnInfo],
        dataset_query: &DatasetQuery,
    ) -> Result<QueryResult> {
        let started = std::time::Instant::now();
        let outcome =
            tokio::time::timeout(self.query_timeout, self.run(export, columns, dataset_query))
                .await
                .map_err(|_| PostgresError::Timeout(self.query_timeout))?;

        let result = match outcome {
            Err(PostgresError::Connection(err)) if is_undefined_table(&err) => {
                return Err(gnexport_core::ExportError::empty_dataset(format!(
                    "View {} does not exist",
                    export.qualified_view()
                )));
            }
            other => other?,
        };

        debug!(
            total = result.total,
            total_filtered = result.total_filtered,
            rows = result.rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "export query complete"
        );
        Ok(result)
    }

    async fn spatial_reference_wkt(&self, srid: i32) -> Result<Option<String>> {
        let wkt = query_scalar::<_, Option<String>>(
            "SELECT srtext::text FROM public.spatial_ref_sys WHERE srid = $1",
        )
        .bind(srid)
        .fetch_optional(&self.pool)
        .await;

        match wkt {
            Ok(wkt) => Ok(wkt.flatten().filter(|w| !w.is_empty())),
            Err(err) if is_undefined_table(&err) => Ok(None),
            Err(err) => Err(PostgresError::from(err).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_column_requires_geometry_type() {
        let export = gnexport_core::Export::new(1, "Synthese", "gn_exports", "v_synthese")
            .with_geometry("geom", 2154);
        let with_geom = vec![
            ColumnInfo::new("id", ColumnType::Integer),
            ColumnInfo::new("geom", ColumnType::Geometry),
        ];
        assert_eq!(geometry_column(&export, &with_geom).as_deref(), Some("geom"));

        let text_geom = vec![ColumnInfo::new("geom", ColumnType::Text)];
        assert_eq!(geometry_column(&export, &text_geom), None);

        let no_field = gnexport_core::Export::new(2, "Flat", "gn_exports", "v_flat");
        assert_eq!(geometry_column(&no_field, &with_geom), None);
    }
}
