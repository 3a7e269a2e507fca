//! Reserved paging and ordering parameters.

use gnexport_core::{ColumnInfo, FilterPredicate, OrderBy, PageRequest, SortOrder};

use crate::filter::parse_params;

/// Bounds applied to the `limit` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_limit: 1000,
            max_limit: 100_000,
        }
    }
}

/// Query string split into paging, ordering and raw filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestParams {
    pub page: PageRequest,
    pub orderby: Option<String>,
    pub order: SortOrder,
    /// Classified but not yet checked against the view.
    pub predicates: Vec<FilterPredicate>,
}

impl RequestParams {
    /// Malformed `limit` or `offset` values fall back to their defaults. The
    /// first occurrence of a reserved parameter wins.
    pub fn from_pairs<'a, I>(pairs: I, limits: PageLimits) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let pairs: Vec<(&str, &str)> = pairs.into_iter().collect();
        let first = |key: &str| {
            pairs
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.trim())
        };

        let limit = first("limit")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(limits.default_limit)
            .min(limits.max_limit);
        let page = first("offset")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        let orderby = first("orderby")
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let order = first("order").map(SortOrder::parse).unwrap_or_default();

        Self {
            page: PageRequest::new(limit, page),
            orderby,
            order,
            predicates: parse_params(pairs.iter().copied()),
        }
    }
}

/// Ordering against the view's columns. Unknown or geometry columns are ignored.
pub fn resolve_order(
    orderby: Option<&str>,
    order: SortOrder,
    columns: &[ColumnInfo],
) -> Option<OrderBy> {
    let name = orderby?;
    let column = columns.iter().find(|c| c.name == name)?;
    if column.col_type.is_geometry() {
        tracing::debug!(column = name, "ignoring order on geometry column");
        return None;
    }
    Some(OrderBy::new(name, order))
}
