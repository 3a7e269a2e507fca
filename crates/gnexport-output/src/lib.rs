//! Encoders turning a [`QueryResult`] into export files.
//!
//! # Components
//!
//! - [`JsonWriter`] - items pretty-printed with four-space indentation
//! - [`CsvWriter`] - flat rows, geometry flattened to GeoJSON text
//! - [`ShapefileWriter`] - one shapefile per geometry family, zipped
//! - [`scratch`] - temporary build directories, atomic publication and
//!   retention of produced archives
//!
//! # Example
//!
//! ```ignore
//! use gnexport_output::{OutputWriter, writer_for};
//!
//! let writer = writer_for(ExportFormat::Csv, &scratch, "occtax_2024_05_01_10h00m00", None);
//! let mut body = Vec::new();
//! writer.write(&result, &mut body)?;
//! ```

mod csv;
mod json;
pub mod scratch;
mod shp;

pub use self::csv::CsvWriter;
pub use json::JsonWriter;
pub use scratch::{ScratchDir, write_atomic};
pub use shp::ShapefileWriter;

use std::io::Write;

use gnexport_core::{ExportError, ExportFormat, QueryResult};
use thiserror::Error;

/// Errors that can occur while encoding results.
#[derive(Debug, Error)]
pub enum Error {
    /// The result cannot be expressed in the requested format.
    #[error("{0}")]
    NonTransformable(String),

    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Shapefile error: {0}")]
    Shapefile(String),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<Error> for ExportError {
    fn from(err: Error) -> Self {
        match err {
            Error::NonTransformable(msg) => ExportError::non_transformable(msg),
            other => ExportError::with_source("Export encoding failed", other),
        }
    }
}

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Trait for writing query results to an output format.
pub trait OutputWriter: Send + Sync {
    /// Get the MIME content type for this format.
    fn content_type(&self) -> &'static str;

    /// Get the file extension for this format.
    fn file_extension(&self) -> &'static str;

    /// Write the query result to the output.
    fn write(&self, result: &QueryResult, output: &mut dyn Write) -> Result<()>;
}

/// Writer for `format`. `file_stem` names the shapefile layers and `prj` is
/// the WKT written next to them; both are ignored by the other formats.
pub fn writer_for(
    format: ExportFormat,
    scratch: &ScratchDir,
    file_stem: &str,
    prj: Option<String>,
) -> Box<dyn OutputWriter> {
    match format {
        ExportFormat::Json => Box::new(JsonWriter::new()),
        ExportFormat::Csv => Box::new(CsvWriter::new()),
        ExportFormat::Shapefile => Box::new(
            ShapefileWriter::new(scratch.clone(), file_stem).with_prj(prj),
        ),
    }
}
