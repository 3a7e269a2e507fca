//! Core types for the gnexport data-export service.
//!
//! This crate holds everything the other crates agree on:
//!
//! - [`Export`], [`ExportSchedule`], [`RoleInfo`] and the other catalog models
//! - [`ColumnInfo`] / [`ColumnType`] describing the columns of a backing view
//! - [`FilterPredicate`] and the query shape handed to a [`DatasetSource`]
//! - [`QueryResult`], the outcome of running a query against a view
//! - [`ExportError`] and its stable [`ErrorKind`]
//! - the storage traits implemented by the PostgreSQL and in-memory backends

mod column;
mod error;
mod model;
mod query;
mod result;
mod storage;

pub use column::{ColumnInfo, ColumnType};
pub use error::{ErrorKind, ExportError, Result};
pub use model::{
    Action, Export, ExportFormat, ExportSchedule, RoleExportGrant, RoleInfo, RowScope, Scope,
};
pub use query::{DatasetQuery, FilterPredicate, OrderBy, PageRequest, PredicateKind, SortOrder};
pub use result::QueryResult;
pub use storage::{DatasetSource, ExportCatalog, PermissionResolver};
