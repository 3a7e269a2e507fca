//! Column descriptions of a backing view.
//!
//! Types come from `information_schema.columns` and drive three things: which
//! filter kinds a column accepts, how the column is cast when selected, and how
//! the encoders lay it out (dBase field kind, CSV flattening).

use serde::{Deserialize, Serialize};

/// Information about a column in a view result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// The column name.
    pub name: String,

    /// The column's data type.
    pub col_type: ColumnType,

    /// Whether this column can contain null values.
    pub nullable: bool,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, col_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            col_type,
            nullable: true,
        }
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

/// Column type tags, grouped the way filters and encoders care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// text, varchar, char and anything unrecognized.
    #[default]
    Text,

    /// smallint, integer, bigint.
    Integer,

    /// numeric, real, double precision.
    Decimal,

    Boolean,

    Date,

    /// timestamp with or without time zone.
    DateTime,

    Time,

    Uuid,

    /// json and jsonb.
    Json,

    /// PostgreSQL arrays (`data_type = 'ARRAY'`).
    Array,

    /// PostGIS geometry or geography.
    Geometry,
}

impl ColumnType {
    /// Map `information_schema.columns` (`data_type`, `udt_name`) to a tag.
    pub fn from_pg_type(data_type: &str, udt_name: &str) -> Self {
        match data_type.to_lowercase().as_str() {
            "smallint" | "integer" | "bigint" => Self::Integer,
            "numeric" | "real" | "double precision" => Self::Decimal,
            "boolean" => Self::Boolean,
            "date" => Self::Date,
            "timestamp without time zone" | "timestamp with time zone" => Self::DateTime,
            "time without time zone" | "time with time zone" => Self::Time,
            "uuid" => Self::Uuid,
            "json" | "jsonb" => Self::Json,
            "array" => Self::Array,
            "user-defined" => match udt_name {
                "geometry" | "geography" => Self::Geometry,
                _ => Self::Text,
            },
            _ => Self::Text,
        }
    }

    pub fn is_text(self) -> bool {
        matches!(self, Self::Text)
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Decimal)
    }

    pub fn is_temporal(self) -> bool {
        matches!(self, Self::Date | Self::DateTime)
    }

    pub fn is_geometry(self) -> bool {
        matches!(self, Self::Geometry)
    }

    /// Cast applied when selecting the column so that decoding is uniform.
    pub fn select_cast(self) -> Option<&'static str> {
        match self {
            Self::Integer => Some("bigint"),
            Self::Decimal => Some("float8"),
            Self::Text | Self::Date | Self::DateTime | Self::Time | Self::Uuid => Some("text"),
            Self::Json => Some("jsonb"),
            Self::Boolean | Self::Array | Self::Geometry => None,
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Time => "time",
            Self::Uuid => "uuid",
            Self::Json => "json",
            Self::Array => "array",
            Self::Geometry => "geometry",
        };
        f.write_str(name)
    }
}
