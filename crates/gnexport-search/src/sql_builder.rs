//! SQL builder for queries against export views.
//!
//! Identifiers (schema, view, columns) are validated and double-quoted; every
//! request-supplied value travels as a bind parameter. One builder yields the
//! page query and both counts, so all three agree on the row scope.

use std::fmt;

use gnexport_core::{
    ColumnInfo, ColumnType, ExportError, FilterPredicate, OrderBy, PageRequest, PredicateKind,
    RowScope,
};
use thiserror::Error;

/// Errors that can occur during SQL building.
#[derive(Debug, Error)]
pub enum SqlBuilderError {
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("View has no columns")]
    NoColumns,
}

impl From<SqlBuilderError> for ExportError {
    fn from(err: SqlBuilderError) -> Self {
        match err {
            SqlBuilderError::NoColumns => ExportError::empty_dataset("Empty dataset"),
            other => ExportError::with_source("Cannot build view query", other),
        }
    }
}

/// Validate an identifier (schema, view or column name).
///
/// Only ASCII alphanumerics and underscores are accepted.
fn validate_identifier(name: &str) -> Result<(), SqlBuilderError> {
    if name.is_empty() {
        return Err(SqlBuilderError::InvalidIdentifier(
            "Empty identifier".to_string(),
        ));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(SqlBuilderError::InvalidIdentifier(name.to_string()));
    }

    Ok(())
}

/// Escape a PostgreSQL identifier.
pub fn escape_identifier(name: &str) -> Result<String, SqlBuilderError> {
    validate_identifier(name)?;
    Ok(format!("\"{name}\""))
}

/// SQL value types for parameterized queries.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    /// Bound as `bigint[]`, used for row-scope membership.
    BigIntArray(Vec<i64>),
}

impl SqlValue {
    /// Get the value as a string for display/debugging.
    pub fn as_display_str(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::BigIntArray(values) => format!("{values:?}"),
        }
    }
}

/// A built SQL query with parameters.
#[derive(Debug, Clone)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl fmt::Display for BuiltQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)
    }
}

/// Builder for the page and count queries of one view.
///
/// # Example
///
/// ```ignore
/// let query = ViewQueryBuilder::new("gn_exports", "v_synthese", &columns)
///     .row_scope(RowScope::All)
///     .predicates(vec![FilterPredicate::new("nom_cite", PredicateKind::Contains, "lynx")])
///     .paginate(PageRequest::new(50, 2))
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct ViewQueryBuilder<'a> {
    schema: &'a str,
    view: &'a str,
    columns: &'a [ColumnInfo],
    row_scope: RowScope,
    predicates: Vec<FilterPredicate>,
    order_by: Option<OrderBy>,
    page: PageRequest,
}

impl<'a> ViewQueryBuilder<'a> {
    pub fn new(schema: &'a str, view: &'a str, columns: &'a [ColumnInfo]) -> Self {
        Self {
            schema,
            view,
            columns,
            row_scope: RowScope::All,
            predicates: Vec::new(),
            order_by: None,
            page: PageRequest::new(1000, 0),
        }
    }

    pub fn row_scope(mut self, scope: RowScope) -> Self {
        self.row_scope = scope;
        self
    }

    /// Predicates must already be resolved against `columns`.
    pub fn predicates(mut self, predicates: Vec<FilterPredicate>) -> Self {
        self.predicates = predicates;
        self
    }

    pub fn order_by(mut self, order_by: Option<OrderBy>) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn paginate(mut self, page: PageRequest) -> Self {
        self.page = page;
        self
    }

    fn table(&self) -> Result<String, SqlBuilderError> {
        Ok(format!(
            "{}.{}",
            escape_identifier(self.schema)?,
            escape_identifier(self.view)?
        ))
    }

    /// Build the page query.
    pub fn build(&self) -> Result<BuiltQuery, SqlBuilderError> {
        let first = self.columns.first().ok_or(SqlBuilderError::NoColumns)?;

        let select = self
            .columns
            .iter()
            .map(select_expression)
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");

        let mut params = Vec::new();
        let where_clause = self.build_where_clause(true, &mut params)?;

        let (lead, lead_order) = match &self.order_by {
            Some(order) => (order.column.as_str(), order.order.as_sql()),
            None => (first.name.as_str(), "ASC"),
        };
        let mut order_keys = vec![format!("{} {lead_order}", escape_identifier(lead)?)];
        for column in self.columns.iter().filter(|c| c.name != lead && is_sort_key(c)) {
            order_keys.push(format!("{} ASC", escape_identifier(&column.name)?));
        }
        let order_clause = order_keys.join(", ");

        let mut sql = format!("SELECT {select} FROM {}", self.table()?);
        if let Some(where_sql) = where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&order_clause);
        sql.push_str(&format!(
            " LIMIT {} OFFSET {}",
            bigint(self.page.limit),
            bigint(self.page.row_offset())
        ));

        Ok(BuiltQuery { sql, params })
    }

    /// COUNT query. With `filtered` false only the row scope applies.
    pub fn build_count(&self, filtered: bool) -> Result<BuiltQuery, SqlBuilderError> {
        let mut params = Vec::new();
        let where_clause = self.build_where_clause(filtered, &mut params)?;

        let mut sql = format!("SELECT COUNT(*) AS total FROM {}", self.table()?);
        if let Some(where_sql) = where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }

        Ok(BuiltQuery { sql, params })
    }

    fn build_where_clause(
        &self,
        with_predicates: bool,
        params: &mut Vec<SqlValue>,
    ) -> Result<Option<String>, SqlBuilderError> {
        let mut conditions = Vec::new();

        match &self.row_scope {
            RowScope::All => {}
            RowScope::Nothing => conditions.push("FALSE".to_string()),
            RowScope::Restricted { column, values } => {
                params.push(SqlValue::BigIntArray(values.clone()));
                conditions.push(format!(
                    "{} = ANY(${}::bigint[])",
                    escape_identifier(column)?,
                    params.len()
                ));
            }
        }

        if with_predicates {
            for predicate in &self.predicates {
                conditions.push(predicate_condition(predicate, params)?);
            }
        }

        if conditions.is_empty() {
            Ok(None)
        } else {
            Ok(Some(conditions.join(" AND ")))
        }
    }
}

/// Tie-breakers after the requested order, so pages never overlap.
fn is_sort_key(column: &ColumnInfo) -> bool {
    !matches!(
        column.col_type,
        ColumnType::Geometry | ColumnType::Json | ColumnType::Array
    )
}

/// LIMIT and OFFSET are bigint in PostgreSQL.
fn bigint(n: usize) -> u64 {
    (n as u64).min(i64::MAX as u64)
}

fn select_expression(column: &ColumnInfo) -> Result<String, SqlBuilderError> {
    let ident = escape_identifier(&column.name)?;
    Ok(match column.col_type {
        ColumnType::Geometry => format!("ST_AsGeoJSON({ident})::jsonb AS {ident}"),
        ColumnType::Array => format!("to_jsonb({ident}) AS {ident}"),
        other => match other.select_cast() {
            Some(cast) => format!("{ident}::{cast} AS {ident}"),
            None => ident,
        },
    })
}

fn predicate_condition(
    predicate: &FilterPredicate,
    params: &mut Vec<SqlValue>,
) -> Result<String, SqlBuilderError> {
    let ident = escape_identifier(&predicate.column)?;
    let value = match predicate.kind {
        PredicateKind::Contains => format!("%{}%", predicate.value),
        _ => predicate.value.trim().to_string(),
    };
    params.push(SqlValue::Text(value));
    let n = params.len();

    Ok(match predicate.kind {
        PredicateKind::Equals => format!("{ident}::text = ${n}"),
        PredicateKind::Contains => format!("{ident}::text ILIKE ${n}"),
        PredicateKind::DateGe => format!("{ident}::date >= ${n}::date"),
        PredicateKind::DateLe => format!("{ident}::date <= ${n}::date"),
        PredicateKind::DateEq => format!("{ident}::date = ${n}::date"),
        PredicateKind::NumGe => format!("{ident} >= ${n}::numeric"),
        PredicateKind::NumLe => format!("{ident} <= ${n}::numeric"),
    })
}
