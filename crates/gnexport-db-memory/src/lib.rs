//! In-memory backend for gnexport.
//!
//! Implements the same storage traits as the PostgreSQL backend, evaluating
//! row scopes, filters, ordering and paging over rows held in memory. Used by
//! the test suites and for running the server without a database, optionally
//! seeded from a JSON [`Fixture`].

mod catalog;
mod dataset;
mod fixture;
mod permissions;

pub use catalog::InMemoryCatalog;
pub use dataset::{InMemoryDatasetSource, Table};
pub use fixture::{Fixture, FixtureError, MemoryBackend};
pub use permissions::StaticPermissions;
