//! Dataset evaluation over in-memory tables.
//!
//! Mirrors the SQL the PostgreSQL backend generates: equality compares the
//! text form of a cell, `Contains` is a case-insensitive substring match, date
//! predicates compare calendar days and numeric predicates compare as `f64`.
//! NULL never matches a predicate and sorts after every other value.

use std::cmp::Ordering;

use async_trait::async_trait;
use dashmap::DashMap;
use gnexport_core::{
    ColumnInfo, ColumnType, DatasetQuery, DatasetSource, Export, ExportError, FilterPredicate,
    OrderBy, PredicateKind, QueryResult, Result, RowScope, SortOrder,
};
use gnexport_search::filter::parse_date;
use serde_json::Value;

/// Rows of one view, aligned with `columns`.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<ColumnInfo>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn with_rows(mut self, rows: Vec<Vec<Value>>) -> Self {
        self.rows = rows;
        self
    }

    fn index_of(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == column)
    }
}

/// [`DatasetSource`] over [`Table`]s keyed by `schema.view`.
#[derive(Debug, Default)]
pub struct InMemoryDatasetSource {
    tables: DashMap<String, Table>,
    spatial_refs: DashMap<i32, String>,
}

impl InMemoryDatasetSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_table(&self, schema: &str, view: &str, table: Table) {
        self.tables.insert(format!("{schema}.{view}"), table);
    }

    pub fn insert_spatial_ref(&self, srid: i32, wkt: impl Into<String>) {
        self.spatial_refs.insert(srid, wkt.into());
    }
}

#[async_trait]
impl DatasetSource for InMemoryDatasetSource {
    async fn columns(&self, export: &Export) -> Result<Vec<ColumnInfo>> {
        Ok(self
            .tables
            .get(&export.qualified_view())
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    async fn fetch(
        &self,
        export: &Export,
        columns: &[ColumnInfo],
        query: &DatasetQuery,
    ) -> Result<QueryResult> {
        let table = self.tables.get(&export.qualified_view()).ok_or_else(|| {
            ExportError::empty_dataset(format!("View {} does not exist", export.qualified_view()))
        })?;
        if columns.is_empty() {
            return Err(ExportError::empty_dataset("Empty dataset"));
        }

        let projection: Vec<Option<usize>> =
            columns.iter().map(|c| table.index_of(&c.name)).collect();

        let scoped: Vec<&Vec<Value>> = table
            .rows
            .iter()
            .filter(|row| in_scope(&table, row, &query.row_scope))
            .collect();
        let total = scoped.len() as u64;

        let mut filtered: Vec<&Vec<Value>> = scoped
            .into_iter()
            .filter(|row| {
                query
                    .predicates
                    .iter()
                    .all(|p| matches_predicate(&table, row, p))
            })
            .collect();
        let total_filtered = filtered.len() as u64;

        let order = query
            .order_by
            .clone()
            .or_else(|| columns.first().map(|c| OrderBy::new(&c.name, SortOrder::Asc)));
        if let Some((order, idx)) =
            order.and_then(|o| table.index_of(&o.column).map(|idx| (o, idx)))
        {
            // Remaining sortable columns break ties, as the SQL backend does.
            let tie_breakers: Vec<usize> = columns
                .iter()
                .filter(|c| c.name != order.column && is_sort_key(c.col_type))
                .filter_map(|c| table.index_of(&c.name))
                .collect();
            filtered.sort_by(|a, b| {
                let ord = compare_values(cell(a, idx), cell(b, idx));
                let ord = match order.order {
                    SortOrder::Asc => ord,
                    SortOrder::Desc => ord.reverse(),
                };
                tie_breakers.iter().fold(ord, |ord, &i| {
                    ord.then_with(|| compare_values(cell(a, i), cell(b, i)))
                })
            });
        }

        let rows = filtered
            .into_iter()
            .skip(query.page.row_offset())
            .take(query.page.limit)
            .map(|row| {
                projection
                    .iter()
                    .map(|idx| idx.and_then(|i| row.get(i).cloned()).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Ok(QueryResult {
            columns: columns.to_vec(),
            rows,
            total,
            total_filtered,
            page: query.page.page,
            limit: query.page.limit,
            geometry_column: geometry_column(export, columns),
        })
    }

    async fn spatial_reference_wkt(&self, srid: i32) -> Result<Option<String>> {
        Ok(self.spatial_refs.get(&srid).map(|w| w.clone()))
    }
}

fn geometry_column(export: &Export, columns: &[ColumnInfo]) -> Option<String> {
    let name = export.geometry_field.as_deref()?;
    columns
        .iter()
        .find(|c| c.name == name && c.col_type.is_geometry())
        .map(|c| c.name.clone())
}

static NULL: Value = Value::Null;

/// Short rows read as null past their end.
fn cell(row: &[Value], idx: usize) -> &Value {
    row.get(idx).unwrap_or(&NULL)
}

fn is_sort_key(col_type: ColumnType) -> bool {
    !matches!(
        col_type,
        ColumnType::Geometry | ColumnType::Json | ColumnType::Array
    )
}

fn in_scope(table: &Table, row: &[Value], scope: &RowScope) -> bool {
    match scope {
        RowScope::All => true,
        RowScope::Nothing => false,
        RowScope::Restricted { column, values } => table
            .index_of(column)
            .and_then(|i| row.get(i))
            .and_then(as_i64)
            .is_some_and(|v| values.contains(&v)),
    }
}

fn matches_predicate(table: &Table, row: &[Value], predicate: &FilterPredicate) -> bool {
    let Some(cell) = table.index_of(&predicate.column).and_then(|i| row.get(i)) else {
        return false;
    };
    if cell.is_null() {
        return false;
    }
    match predicate.kind {
        PredicateKind::Equals => text_of(cell) == predicate.value,
        PredicateKind::Contains => text_of(cell)
            .to_lowercase()
            .contains(&predicate.value.to_lowercase()),
        PredicateKind::DateGe | PredicateKind::DateLe | PredicateKind::DateEq => {
            let (Some(actual), Some(wanted)) = (
                cell.as_str().and_then(parse_date),
                parse_date(&predicate.value),
            ) else {
                return false;
            };
            match predicate.kind {
                PredicateKind::DateGe => actual >= wanted,
                PredicateKind::DateLe => actual <= wanted,
                _ => actual == wanted,
            }
        }
        PredicateKind::NumGe | PredicateKind::NumLe => {
            let (Some(actual), Ok(wanted)) =
                (cell.as_f64(), predicate.value.trim().parse::<f64>())
            else {
                return false;
            };
            if predicate.kind == PredicateKind::NumGe {
                actual >= wanted
            } else {
                actual <= wanted
            }
        }
    }
}

/// Text form of a cell, as `col::text` renders it.
fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => text_of(a).cmp(&text_of(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gnexport_core::{ColumnType, PageRequest};
    use serde_json::json;

    fn source() -> (InMemoryDatasetSource, Export) {
        let export = Export::new(1, "Synthese", "gn_exports", "v_synthese");
        let table = Table::new(vec![
            ColumnInfo::new("id_synthese", ColumnType::Integer),
            ColumnInfo::new("nom_cite", ColumnType::Text),
            ColumnInfo::new("date_min", ColumnType::Date),
            ColumnInfo::new("altitude", ColumnType::Decimal),
            ColumnInfo::new("id_digitiser", ColumnType::Integer),
        ])
        .with_rows(vec![
            vec![json!(3), json!("Lynx lynx"), json!("2021-06-01"), json!(1200.5), json!(10)],
            vec![json!(1), json!("Vulpes vulpes"), json!("2019-03-15"), json!(300.0), json!(11)],
            vec![json!(2), json!("Lynx pardinus"), json!("2020-01-20"), Value::Null, json!(10)],
        ]);
        let source = InMemoryDatasetSource::new();
        source.insert_table("gn_exports", "v_synthese", table);
        (source, export)
    }

    fn ids(result: &QueryResult) -> Vec<i64> {
        result.rows.iter().filter_map(|r| r[0].as_i64()).collect()
    }

    #[tokio::test]
    async fn default_order_is_first_column() {
        let (source, export) = source();
        let columns = source.columns(&export).await.unwrap();
        let result = source
            .fetch(&export, &columns, &DatasetQuery::all(RowScope::All, 10))
            .await
            .unwrap();
        assert_eq!(ids(&result), vec![1, 2, 3]);
        assert_eq!(result.total, 3);
        assert_eq!(result.total_filtered, 3);
    }

    #[tokio::test]
    async fn predicates_and_scope_narrow_counts() {
        let (source, export) = source();
        let columns = source.columns(&export).await.unwrap();
        let mut query = DatasetQuery::all(
            RowScope::Restricted {
                column: "id_digitiser".into(),
                values: vec![10],
            },
            10,
        );
        query.predicates = vec![
            FilterPredicate::new("nom_cite", PredicateKind::Contains, "LYNX"),
            FilterPredicate::new("date_min", PredicateKind::DateGe, "2021-01-01"),
        ];
        let result = source.fetch(&export, &columns, &query).await.unwrap();
        assert_eq!(result.total, 2);
        assert_eq!(result.total_filtered, 1);
        assert_eq!(ids(&result), vec![3]);
    }

    #[tokio::test]
    async fn null_never_matches_numeric_filters() {
        let (source, export) = source();
        let columns = source.columns(&export).await.unwrap();
        let mut query = DatasetQuery::all(RowScope::All, 10);
        query.predicates = vec![FilterPredicate::new("altitude", PredicateKind::NumLe, "5000")];
        let result = source.fetch(&export, &columns, &query).await.unwrap();
        assert_eq!(ids(&result), vec![1, 3]);
    }

    #[tokio::test]
    async fn paging_beyond_the_end_is_empty() {
        let (source, export) = source();
        let columns = source.columns(&export).await.unwrap();
        let mut query = DatasetQuery::all(RowScope::All, 2);
        query.page = PageRequest::new(2, 5);
        let result = source.fetch(&export, &columns, &query).await.unwrap();
        assert!(result.rows.is_empty());
        assert_eq!(result.total, 3);

        query.page = PageRequest::new(0, 0);
        let result = source.fetch(&export, &columns, &query).await.unwrap();
        assert!(result.rows.is_empty());
        assert_eq!(result.total_filtered, 3);
    }

    #[tokio::test]
    async fn descending_order_puts_nulls_first() {
        let (source, export) = source();
        let columns = source.columns(&export).await.unwrap();
        let mut query = DatasetQuery::all(RowScope::All, 10);
        query.order_by = Some(OrderBy::new("altitude", SortOrder::Desc));
        let result = source.fetch(&export, &columns, &query).await.unwrap();
        assert_eq!(ids(&result), vec![2, 3, 1]);
    }

    #[tokio::test]
    async fn short_rows_sort_as_null() {
        let export = Export::new(2, "Partial", "gn_exports", "v_partial");
        let source = InMemoryDatasetSource::new();
        source.insert_table(
            "gn_exports",
            "v_partial",
            Table::new(vec![
                ColumnInfo::new("id", ColumnType::Integer),
                ColumnInfo::new("nom", ColumnType::Text),
            ])
            .with_rows(vec![vec![json!(1), json!("a")], vec![json!(2)]]),
        );
        let columns = source.columns(&export).await.unwrap();
        let mut query = DatasetQuery::all(RowScope::All, 10);
        query.order_by = Some(OrderBy::new("nom", SortOrder::Asc));

        let result = source.fetch(&export, &columns, &query).await.unwrap();
        assert_eq!(ids(&result), vec![1, 2]);
        assert_eq!(result.rows[1], vec![json!(2), Value::Null]);
    }

    #[tokio::test]
    async fn ties_are_broken_by_the_other_columns() {
        let export = Export::new(3, "Ties", "gn_exports", "v_ties");
        let source = InMemoryDatasetSource::new();
        source.insert_table(
            "gn_exports",
            "v_ties",
            Table::new(vec![
                ColumnInfo::new("nom", ColumnType::Text),
                ColumnInfo::new("id", ColumnType::Integer),
            ])
            .with_rows(vec![
                vec![json!("Lynx"), json!(3)],
                vec![json!("Lynx"), json!(1)],
                vec![json!("Abies"), json!(2)],
            ]),
        );
        let columns = source.columns(&export).await.unwrap();
        let result = source
            .fetch(&export, &columns, &DatasetQuery::all(RowScope::All, 10))
            .await
            .unwrap();
        let ids: Vec<i64> = result.rows.iter().filter_map(|r| r[1].as_i64()).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[tokio::test]
    async fn nothing_scope_hides_all_rows() {
        let (source, export) = source();
        let columns = source.columns(&export).await.unwrap();
        let result = source
            .fetch(&export, &columns, &DatasetQuery::all(RowScope::Nothing, 10))
            .await
            .unwrap();
        assert_eq!(result.total, 0);
        assert!(result.rows.is_empty());
    }

    #[tokio::test]
    async fn unknown_view_has_no_columns() {
        let source = InMemoryDatasetSource::new();
        let export = Export::new(9, "Missing", "gn_exports", "v_missing");
        assert!(source.columns(&export).await.unwrap().is_empty());
        let err = source
            .fetch(&export, &[], &DatasetQuery::all(RowScope::All, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::EmptyDataSet(_)));
    }
}
