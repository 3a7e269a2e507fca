//! Zipped ESRI Shapefile output.
//!
//! A shapefile holds a single geometry type, so features are split into up
//! to three layers named `<stem>_POINT`, `<stem>_POLYLINE` and
//! `<stem>_POLYGON`, each created on first use. Multipoints are exploded into
//! points and geometry collections into their members, every part carrying
//! the attributes of its row. The layers, their `.prj` and `.cpg` companions
//! are built in a private directory and zipped together.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

use ::shapefile::dbase::{FieldName, FieldValue, Record, TableWriterBuilder};
use ::shapefile::{Point, Polygon, PolygonRing, Polyline, Writer};
use gnexport_core::{ColumnType, QueryResult};
use serde_json::Value;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use super::OutputWriter;
use crate::csv::json_value_to_csv_string;
use crate::scratch::ScratchDir;
use crate::{Error, Result};

const MAX_FIELD_NAME: usize = 10;
const CHARACTER_LENGTH: u8 = 254;
// numeric(18, 0) and numeric(18, 6)
const INTEGER_LIMIT: f64 = 1e17;
const DECIMAL_LIMIT: f64 = 1e10;

/// Shapefile writer for one export run.
#[derive(Debug, Clone)]
pub struct ShapefileWriter {
    scratch: ScratchDir,
    stem: String,
    prj: Option<String>,
}

impl ShapefileWriter {
    pub fn new(scratch: ScratchDir, stem: impl Into<String>) -> Self {
        Self {
            scratch,
            stem: stem.into(),
            prj: None,
        }
    }

    /// WKT of the layers' spatial reference, written as `.prj`.
    pub fn with_prj(mut self, prj: Option<String>) -> Self {
        self.prj = prj;
        self
    }
}

impl OutputWriter for ShapefileWriter {
    fn content_type(&self) -> &'static str {
        "application/zip"
    }

    fn file_extension(&self) -> &'static str {
        "zip"
    }

    fn write(&self, result: &QueryResult, output: &mut dyn Write) -> Result<()> {
        let geom_idx = result.geometry_index().ok_or_else(|| {
            Error::NonTransformable("This export doesn't have any geometry".to_string())
        })?;

        let fields = field_specs(result);
        let build = self.scratch.build_dir()?;

        {
            let mut layers = Layers::new(build.path(), &self.stem, &fields);
            for row in &result.rows {
                let geometry = row.get(geom_idx).unwrap_or(&Value::Null);
                let shapes = match to_shapes(geometry) {
                    Some(shapes) => shapes,
                    None => {
                        if !geometry.is_null() {
                            tracing::warn!(geometry = %geometry, "skipping unsupported geometry");
                        }
                        continue;
                    }
                };
                let record = record_for(&fields, row);
                for shape in shapes {
                    layers.write(shape, &record)?;
                }
            }
            // Writers finalize their headers when dropped.
        }

        let written: Vec<String> = fs::read_dir(build.path())?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "shp"))
            .filter_map(|entry| {
                entry
                    .path()
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
            })
            .collect();
        for layer in &written {
            if let Some(prj) = &self.prj {
                fs::write(build.path().join(format!("{layer}.prj")), prj)?;
            }
            fs::write(build.path().join(format!("{layer}.cpg")), "UTF-8")?;
        }
        if written.is_empty() {
            tracing::debug!(stem = %self.stem, "no feature written, archive is empty");
        }

        let archive = zip_directory(build.path())?;
        output.write_all(&archive)?;
        output.flush()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Character,
    Integer,
    Decimal,
    Logical,
}

#[derive(Debug, Clone)]
struct FieldSpec {
    column_index: usize,
    name: String,
    kind: FieldKind,
}

/// dBase schema for the non-geometry columns. Names are reduced to
/// `[A-Za-z0-9_]`, cut to 10 characters and made unique with a `_<n>` suffix.
fn field_specs(result: &QueryResult) -> Vec<FieldSpec> {
    let mut used = HashSet::new();
    let mut specs = Vec::new();

    for (column_index, column) in result.property_columns() {
        let name = unique_field_name(&column.name, &mut used);
        let kind = match column.col_type {
            ColumnType::Integer => FieldKind::Integer,
            ColumnType::Decimal => FieldKind::Decimal,
            ColumnType::Boolean => FieldKind::Logical,
            _ => FieldKind::Character,
        };
        specs.push(FieldSpec {
            column_index,
            name,
            kind,
        });
    }
    specs
}

fn unique_field_name(column: &str, used: &mut HashSet<String>) -> String {
    let mut base: String = column
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .take(MAX_FIELD_NAME)
        .collect();
    if base.is_empty() {
        base.push_str("field");
    }

    let mut candidate = base.clone();
    let mut n = 1;
    while used.contains(&candidate.to_ascii_lowercase()) {
        let suffix = format!("_{n}");
        let keep = MAX_FIELD_NAME.saturating_sub(suffix.len()).min(base.len());
        candidate = format!("{}{suffix}", &base[..keep]);
        n += 1;
    }
    used.insert(candidate.to_ascii_lowercase());
    candidate
}

fn table_builder(fields: &[FieldSpec]) -> Result<TableWriterBuilder> {
    let mut builder = TableWriterBuilder::new();
    for field in fields {
        let name = FieldName::try_from(field.name.as_str())
            .map_err(|e| Error::Shapefile(format!("invalid field name '{}': {e:?}", field.name)))?;
        builder = match field.kind {
            FieldKind::Character => builder.add_character_field(name, CHARACTER_LENGTH),
            FieldKind::Integer => builder.add_numeric_field(name, 18, 0),
            FieldKind::Decimal => builder.add_numeric_field(name, 18, 6),
            FieldKind::Logical => builder.add_logical_field(name),
        };
    }
    Ok(builder)
}

fn record_for(fields: &[FieldSpec], row: &[Value]) -> Record {
    let mut record = Record::default();
    for field in fields {
        let value = row.get(field.column_index).unwrap_or(&Value::Null);
        let field_value = match field.kind {
            FieldKind::Character => FieldValue::Character(
                (!value.is_null()).then(|| truncate_bytes(json_value_to_csv_string(value))),
            ),
            FieldKind::Integer => {
                FieldValue::Numeric(value.as_f64().filter(|v| v.abs() < INTEGER_LIMIT))
            }
            FieldKind::Decimal => {
                FieldValue::Numeric(value.as_f64().filter(|v| v.abs() < DECIMAL_LIMIT))
            }
            FieldKind::Logical => FieldValue::Logical(value.as_bool()),
        };
        record.insert(field.name.clone(), field_value);
    }
    record
}

fn truncate_bytes(mut s: String) -> String {
    let max = CHARACTER_LENGTH as usize;
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
    s
}

enum Shape {
    Point(Point),
    Polyline(Polyline),
    Polygon(Polygon),
}

/// Shapes of one GeoJSON geometry. `None` for null or unusable geometries.
fn to_shapes(geometry: &Value) -> Option<Vec<Shape>> {
    let kind = geometry.get("type")?.as_str()?;
    if kind == "GeometryCollection" {
        let shapes: Vec<Shape> = geometry
            .get("geometries")?
            .as_array()?
            .iter()
            .filter_map(to_shapes)
            .flatten()
            .collect();
        return (!shapes.is_empty()).then_some(shapes);
    }

    let coords = geometry.get("coordinates")?;
    let shapes = match kind {
        "Point" => vec![Shape::Point(point(coords)?)],
        "MultiPoint" => coords
            .as_array()?
            .iter()
            .filter_map(point)
            .map(Shape::Point)
            .collect(),
        "LineString" => {
            let part = line(coords)?;
            vec![Shape::Polyline(Polyline::new(part))]
        }
        "MultiLineString" => {
            let parts: Vec<Vec<Point>> = coords.as_array()?.iter().filter_map(line).collect();
            if parts.is_empty() {
                return None;
            }
            vec![Shape::Polyline(Polyline::with_parts(parts))]
        }
        "Polygon" => vec![Shape::Polygon(Polygon::with_rings(rings(coords)?))],
        "MultiPolygon" => {
            let rings: Vec<PolygonRing<Point>> = coords
                .as_array()?
                .iter()
                .filter_map(rings)
                .flatten()
                .collect();
            if rings.is_empty() {
                return None;
            }
            vec![Shape::Polygon(Polygon::with_rings(rings))]
        }
        _ => return None,
    };
    (!shapes.is_empty()).then_some(shapes)
}

fn point(coords: &Value) -> Option<Point> {
    let xy = coords.as_array()?;
    Some(Point::new(xy.first()?.as_f64()?, xy.get(1)?.as_f64()?))
}

/// At least two points, as a polyline part requires.
fn line(coords: &Value) -> Option<Vec<Point>> {
    let points: Vec<Point> = coords.as_array()?.iter().filter_map(point).collect();
    (points.len() >= 2).then_some(points)
}

/// First ring is the shell, the others holes. Degenerate rings are dropped.
fn rings(coords: &Value) -> Option<Vec<PolygonRing<Point>>> {
    let mut rings = Vec::new();
    for (idx, ring) in coords.as_array()?.iter().enumerate() {
        let points: Vec<Point> = ring.as_array()?.iter().filter_map(point).collect();
        if points.len() < 4 {
            if idx == 0 {
                return None;
            }
            continue;
        }
        rings.push(if idx == 0 {
            PolygonRing::Outer(points)
        } else {
            PolygonRing::Inner(points)
        });
    }
    (!rings.is_empty()).then_some(rings)
}

type LayerWriter = Writer<BufWriter<File>>;

/// Lazily created per-family writers.
struct Layers<'a> {
    dir: &'a Path,
    stem: &'a str,
    fields: &'a [FieldSpec],
    points: Option<LayerWriter>,
    polylines: Option<LayerWriter>,
    polygons: Option<LayerWriter>,
}

impl<'a> Layers<'a> {
    fn new(dir: &'a Path, stem: &'a str, fields: &'a [FieldSpec]) -> Self {
        Self {
            dir,
            stem,
            fields,
            points: None,
            polylines: None,
            polygons: None,
        }
    }

    fn write(&mut self, shape: Shape, record: &Record) -> Result<()> {
        let (dir, stem, fields) = (self.dir, self.stem, self.fields);
        let open = |slot: &mut Option<LayerWriter>, suffix: &str| -> Result<()> {
            if slot.is_none() {
                let path = dir.join(format!("{stem}_{suffix}.shp"));
                let writer = Writer::from_path(&path, table_builder(fields)?)
                    .map_err(|e| Error::Shapefile(e.to_string()))?;
                *slot = Some(writer);
            }
            Ok(())
        };

        let outcome = match shape {
            Shape::Point(point) => {
                open(&mut self.points, "POINT")?;
                self.points
                    .as_mut()
                    .map(|w| w.write_shape_and_record(&point, record))
            }
            Shape::Polyline(line) => {
                open(&mut self.polylines, "POLYLINE")?;
                self.polylines
                    .as_mut()
                    .map(|w| w.write_shape_and_record(&line, record))
            }
            Shape::Polygon(polygon) => {
                open(&mut self.polygons, "POLYGON")?;
                self.polygons
                    .as_mut()
                    .map(|w| w.write_shape_and_record(&polygon, record))
            }
        };

        match outcome {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(Error::Shapefile(e.to_string())),
            None => Err(Error::Shapefile("layer writer unavailable".to_string())),
        }
    }
}

/// Every regular file of `dir`, deflated, in name order.
fn zip_directory(dir: &Path) -> Result<Vec<u8>> {
    let mut files: Vec<_> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    let mut buf = Cursor::new(Vec::new());
    {
        let mut zip = ZipWriter::new(&mut buf);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        for path in files {
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            zip.start_file(name, options)?;
            let data = fs::read(&path)?;
            zip.write_all(&data)?;
        }

        zip.finish()?;
    }

    Ok(buf.into_inner())
}
