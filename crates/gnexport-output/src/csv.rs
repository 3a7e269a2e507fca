//! CSV output writer for query results.

use std::io::Write;

use gnexport_core::QueryResult;
use serde_json::Value;

use super::OutputWriter;
use crate::Result;

/// CSV output writer configuration.
#[derive(Debug, Clone)]
pub struct CsvWriter {
    /// Whether to include a header row.
    pub include_header: bool,

    /// Field delimiter (default: comma).
    pub delimiter: u8,
}

impl Default for CsvWriter {
    fn default() -> Self {
        Self {
            include_header: true,
            delimiter: b',',
        }
    }
}

impl CsvWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, include: bool) -> Self {
        self.include_header = include;
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }
}

/// Convert a JSON value to a CSV-appropriate string.
///
/// Arrays are joined with `;`, objects (including GeoJSON geometries) are
/// written as compact JSON.
pub(crate) fn json_value_to_csv_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(arr) => arr
            .iter()
            .map(json_value_to_csv_string)
            .collect::<Vec<_>>()
            .join(";"),
        Value::Object(_) => value.to_string(),
    }
}

impl OutputWriter for CsvWriter {
    fn content_type(&self) -> &'static str {
        "text/csv; charset=utf-8"
    }

    fn file_extension(&self) -> &'static str {
        "csv"
    }

    fn write(&self, result: &QueryResult, output: &mut dyn Write) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(false)
            .from_writer(output);

        if self.include_header {
            writer.write_record(result.columns.iter().map(|c| c.name.as_str()))?;
        }

        for row in &result.rows {
            writer.write_record(row.iter().map(json_value_to_csv_string))?;
        }

        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gnexport_core::{ColumnInfo, ColumnType};
    use serde_json::json;

    fn result() -> QueryResult {
        QueryResult {
            columns: vec![
                ColumnInfo::new("id", ColumnType::Integer),
                ColumnInfo::new("nom", ColumnType::Text),
                ColumnInfo::new("observers", ColumnType::Array),
                ColumnInfo::new("geom", ColumnType::Geometry),
            ],
            rows: vec![
                vec![
                    json!(1),
                    json!("Lynx, boréal"),
                    json!(["A", "B"]),
                    json!({"type": "Point", "coordinates": [6.5, 45.1]}),
                ],
                vec![json!(2), Value::Null, json!([]), Value::Null],
            ],
            total: 2,
            total_filtered: 2,
            page: 0,
            limit: 1000,
            geometry_column: Some("geom".into()),
        }
    }

    #[test]
    fn test_csv_output() {
        let mut out = Vec::new();
        CsvWriter::new().write(&result(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "id,nom,observers,geom");
        assert_eq!(
            lines[1],
            r#"1,"Lynx, boréal",A;B,"{""type"":""Point"",""coordinates"":[6.5,45.1]}""#
        );
        assert_eq!(lines[2], "2,,,");
    }

    #[test]
    fn test_csv_without_header() {
        let mut out = Vec::new();
        CsvWriter::new()
            .with_header(false)
            .with_delimiter(b';')
            .write(&result(), &mut out)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with("1;"));
    }
}
