//! GeoNature export service.
//!
//! Serves configured database views as JSON, CSV or zipped Shapefile files,
//! filtered by request parameters and restricted by the caller's permission
//! scope, and regenerates scheduled export files.

pub mod config;
pub mod error;
pub mod etalab;
pub mod extract;
pub mod handlers;
pub mod locks;
pub mod observability;
pub mod pipeline;
pub mod scheduler;
pub mod server;
pub mod state;

pub use config::AppConfig;
pub use error::ApiError;
pub use scheduler::{ScheduleReport, run_schedules};
pub use server::{ExportServer, ServerBuilder, build_app, build_state};
pub use state::AppState;
