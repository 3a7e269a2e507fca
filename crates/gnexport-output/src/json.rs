//! JSON output writer for query results.

use std::io::Write;

use gnexport_core::QueryResult;
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};

use super::OutputWriter;
use crate::Result;

/// Writes the result items, a `FeatureCollection` when the export has a
/// geometry column and an array of objects otherwise.
#[derive(Debug, Clone)]
pub struct JsonWriter {
    indent: usize,
}

impl Default for JsonWriter {
    fn default() -> Self {
        Self { indent: 4 }
    }
}

impl JsonWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indentation width in spaces; 0 writes compact JSON.
    pub fn with_indent(mut self, indent: usize) -> Self {
        self.indent = indent;
        self
    }
}

impl OutputWriter for JsonWriter {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn file_extension(&self) -> &'static str {
        "json"
    }

    fn write(&self, result: &QueryResult, output: &mut dyn Write) -> Result<()> {
        let items = result.items();
        if self.indent == 0 {
            serde_json::to_writer(&mut *output, &items)?;
        } else {
            let indent = " ".repeat(self.indent);
            let formatter = PrettyFormatter::with_indent(indent.as_bytes());
            let mut serializer = Serializer::with_formatter(&mut *output, formatter);
            items.serialize(&mut serializer)?;
        }
        output.flush()?;
        Ok(())
    }
}
