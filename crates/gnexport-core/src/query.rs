//! The shape of one query against a view, independent of how it is executed.

use serde::{Deserialize, Serialize};

use crate::column::ColumnType;
use crate::model::RowScope;

/// Filter kinds recognised from request parameter prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PredicateKind {
    Equals,
    /// Case-insensitive substring match.
    Contains,
    DateGe,
    DateLe,
    DateEq,
    NumGe,
    NumLe,
}

impl PredicateKind {
    /// Whether a column of type `col_type` can be filtered with this kind.
    pub fn accepts(self, col_type: ColumnType) -> bool {
        match self {
            Self::Equals => !col_type.is_geometry(),
            Self::Contains => col_type.is_text(),
            Self::DateGe | Self::DateLe | Self::DateEq => col_type.is_temporal(),
            Self::NumGe | Self::NumLe => col_type.is_numeric(),
        }
    }
}

impl std::fmt::Display for PredicateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Equals => "equals",
            Self::Contains => "contains",
            Self::DateGe => "date >=",
            Self::DateLe => "date <=",
            Self::DateEq => "date =",
            Self::NumGe => "number >=",
            Self::NumLe => "number <=",
        };
        f.write_str(name)
    }
}

/// One column condition. Predicates of a query are ANDed in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterPredicate {
    pub column: String,
    pub kind: PredicateKind,
    pub value: String,
}

impl FilterPredicate {
    pub fn new(column: impl Into<String>, kind: PredicateKind, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            kind,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    /// Case-insensitive; anything but `desc` is ascending.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("desc") {
            Self::Desc
        } else {
            Self::Asc
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub order: SortOrder,
}

impl OrderBy {
    pub fn new(column: impl Into<String>, order: SortOrder) -> Self {
        Self {
            column: column.into(),
            order,
        }
    }
}

/// Page window. `page` is a page index, not a row offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: usize,
    pub page: usize,
}

impl PageRequest {
    pub fn new(limit: usize, page: usize) -> Self {
        Self { limit, page }
    }

    /// Row offset of the first row on this page.
    pub fn row_offset(&self) -> usize {
        self.page.saturating_mul(self.limit)
    }
}

/// Everything a [`DatasetSource`](crate::DatasetSource) needs to run one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetQuery {
    pub row_scope: RowScope,
    pub predicates: Vec<FilterPredicate>,
    pub page: PageRequest,
    /// `None` orders by the view's first column.
    pub order_by: Option<OrderBy>,
}

impl DatasetQuery {
    /// Unfiltered query over every row the scope allows.
    pub fn all(row_scope: RowScope, limit: usize) -> Self {
        Self {
            row_scope,
            predicates: Vec::new(),
            page: PageRequest::new(limit, 0),
            order_by: None,
        }
    }
}
