//! Turning request parameters into queries against export views.
//!
//! - [`filter`] classifies `name=value` pairs into [`FilterPredicate`]s by
//!   naming convention and checks them against the view's columns
//! - [`params`] extracts the reserved paging and ordering parameters
//! - [`sql_builder`] renders a [`DatasetQuery`] as parameterized PostgreSQL
//!
//! [`FilterPredicate`]: gnexport_core::FilterPredicate
//! [`DatasetQuery`]: gnexport_core::DatasetQuery

pub mod filter;
pub mod params;
pub mod sql_builder;

pub use filter::{RESERVED_PARAMS, parse_param, parse_params, resolve_predicates};
pub use params::{PageLimits, RequestParams, resolve_order};
pub use sql_builder::{BuiltQuery, SqlBuilderError, SqlValue, ViewQueryBuilder};
