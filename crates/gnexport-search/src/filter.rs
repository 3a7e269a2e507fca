//! Naming-convention filters.
//!
//! A parameter name selects both the filter kind and the target column:
//!
//! | name               | kind       |
//! |--------------------|------------|
//! | `<col>`            | `Equals`   |
//! | `ilike<col>`       | `Contains` |
//! | `filter_d_up_<col>`| `DateGe`   |
//! | `filter_d_lo_<col>`| `DateLe`   |
//! | `filter_d_eq_<col>`| `DateEq`   |
//! | `filter_n_up_<col>`| `NumGe`    |
//! | `filter_n_lo_<col>`| `NumLe`    |

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use gnexport_core::{ColumnInfo, ExportError, FilterPredicate, PredicateKind, Result};

/// Parameters that control paging and ordering, never filters.
pub const RESERVED_PARAMS: [&str; 4] = ["limit", "offset", "orderby", "order"];

// Longest prefixes first: `ilike` must not shadow anything else.
const PREFIXES: [(&str, PredicateKind); 6] = [
    ("filter_d_up_", PredicateKind::DateGe),
    ("filter_d_lo_", PredicateKind::DateLe),
    ("filter_d_eq_", PredicateKind::DateEq),
    ("filter_n_up_", PredicateKind::NumGe),
    ("filter_n_lo_", PredicateKind::NumLe),
    ("ilike", PredicateKind::Contains),
];

pub fn is_reserved(name: &str) -> bool {
    RESERVED_PARAMS.contains(&name)
}

/// Classify one parameter. `None` when the derived column name is empty.
pub fn parse_param(name: &str, value: &str) -> Option<FilterPredicate> {
    let (kind, column) = PREFIXES
        .iter()
        .find_map(|(prefix, kind)| name.strip_prefix(prefix).map(|rest| (*kind, rest)))
        .unwrap_or((PredicateKind::Equals, name));

    if column.is_empty() {
        return None;
    }
    Some(FilterPredicate::new(column, kind, value))
}

/// Classify every non-reserved parameter, keeping input order.
pub fn parse_params<'a, I>(pairs: I) -> Vec<FilterPredicate>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    pairs
        .into_iter()
        .filter(|(name, _)| !is_reserved(name))
        .filter_map(|(name, value)| parse_param(name, value))
        .collect()
}

/// Keep the predicates the view can evaluate.
///
/// A predicate survives when its column exists, the kind suits the column
/// type, and the value parses for date and numeric kinds. Others are dropped,
/// or rejected with `InvalidFilter` when `strict` is set.
pub fn resolve_predicates(
    predicates: Vec<FilterPredicate>,
    columns: &[ColumnInfo],
    strict: bool,
) -> Result<Vec<FilterPredicate>> {
    let mut kept = Vec::with_capacity(predicates.len());
    for predicate in predicates {
        match check(&predicate, columns) {
            Ok(()) => kept.push(predicate),
            Err(reason) if strict => return Err(ExportError::invalid_filter(reason)),
            Err(reason) => {
                tracing::debug!(column = %predicate.column, kind = %predicate.kind, %reason, "dropping filter");
            }
        }
    }
    Ok(kept)
}

fn check(predicate: &FilterPredicate, columns: &[ColumnInfo]) -> std::result::Result<(), String> {
    let column = columns
        .iter()
        .find(|c| c.name == predicate.column)
        .ok_or_else(|| format!("unknown column '{}'", predicate.column))?;

    if !predicate.kind.accepts(column.col_type) {
        return Err(format!(
            "'{}' filter not applicable to {} column '{}'",
            predicate.kind, column.col_type, column.name
        ));
    }

    match predicate.kind {
        PredicateKind::DateGe | PredicateKind::DateLe | PredicateKind::DateEq => {
            parse_date(&predicate.value)
                .map(|_| ())
                .ok_or_else(|| format!("'{}' is not a date", predicate.value))
        }
        PredicateKind::NumGe | PredicateKind::NumLe => predicate
            .value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(|_| ())
            .ok_or_else(|| format!("'{}' is not a number", predicate.value)),
        PredicateKind::Equals | PredicateKind::Contains => Ok(()),
    }
}

/// Calendar date of a filter value: `YYYY-MM-DD`, optionally followed by a time.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S"))
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| DateTime::parse_from_rfc3339(value).ok().map(|dt| dt.date_naive()))
}
