//! Catalog models: exports, grants, schedules and the caller's permissions.

use serde::{Deserialize, Serialize};

use crate::column::ColumnInfo;
use crate::error::{ExportError, Result};

/// One exportable dataset backed by a database view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Export {
    pub id: i64,
    pub label: String,
    #[serde(rename = "desc")]
    pub description: Option<String>,
    pub schema_name: String,
    pub view_name: String,
    pub geometry_field: Option<String>,
    pub geometry_srid: Option<i32>,
    /// Public exports are visible to every role holding the module scope.
    #[serde(default)]
    pub public: bool,
}

impl Export {
    pub fn new(
        id: i64,
        label: impl Into<String>,
        schema_name: impl Into<String>,
        view_name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            label: label.into(),
            description: None,
            schema_name: schema_name.into(),
            view_name: view_name.into(),
            geometry_field: None,
            geometry_srid: None,
            public: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_geometry(mut self, field: impl Into<String>, srid: i32) -> Self {
        self.geometry_field = Some(field.into());
        self.geometry_srid = Some(srid);
        self
    }

    pub fn with_public(mut self, public: bool) -> Self {
        self.public = public;
        self
    }

    pub fn has_geometry(&self) -> bool {
        self.geometry_field
            .as_deref()
            .is_some_and(|field| !field.is_empty())
    }

    /// `schema.view`, for log fields.
    pub fn qualified_view(&self) -> String {
        format!("{}.{}", self.schema_name, self.view_name)
    }
}

/// Association between a role (user or group) and an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleExportGrant {
    pub id_export: i64,
    pub id_role: i64,
}

/// Automatic regeneration policy for one export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSchedule {
    pub id: i64,
    pub id_export: i64,
    pub format: String,
    pub frequency_days: u32,
}

/// Output formats understood by the encoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
    #[serde(rename = "shp")]
    Shapefile,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 3] = [Self::Json, Self::Csv, Self::Shapefile];

    /// Parse the path segment used in `/{id}/{format}`. Matching is exact.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "json" => Some(Self::Json),
            "csv" => Some(Self::Csv),
            "shp" => Some(Self::Shapefile),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Shapefile => "shp",
        }
    }

    /// Extension of the produced file (Shapefiles ship zipped).
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Shapefile => "zip",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv; charset=utf-8",
            Self::Shapefile => "application/zip",
        }
    }

    pub fn requires_geometry(self) -> bool {
        matches!(self, Self::Shapefile)
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permission actions checked on the exports module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// `R`: list exports and query them through the JSON API.
    Read,
    /// `E`: download export files.
    Export,
}

impl Action {
    pub fn code(self) -> &'static str {
        match self {
            Self::Read => "R",
            Self::Export => "E",
        }
    }
}

/// CRUVED scope level granted to a role for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scope {
    None,
    Own,
    Organism,
    All,
}

impl Scope {
    pub fn from_level(level: i32) -> Self {
        match level {
            i32::MIN..=0 => Self::None,
            1 => Self::Own,
            2 => Self::Organism,
            _ => Self::All,
        }
    }

    pub fn level(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Own => 1,
            Self::Organism => 2,
            Self::All => 3,
        }
    }
}

/// Resolved permissions of the calling role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleInfo {
    pub id_role: i64,
    pub id_organism: Option<i64>,
    pub scope: Scope,
}

impl RoleInfo {
    pub fn new(id_role: i64, scope: Scope) -> Self {
        Self {
            id_role,
            id_organism: None,
            scope,
        }
    }

    pub fn with_organism(mut self, id_organism: i64) -> Self {
        self.id_organism = Some(id_organism);
        self
    }

    /// Fail with `InsufficientRights` when the scope grants nothing.
    pub fn ensure_allowed(&self, action: Action) -> Result<()> {
        if self.scope == Scope::None {
            return Err(ExportError::insufficient_rights(format!(
                "role {} has no '{}' scope on the exports module",
                self.id_role,
                action.code()
            )));
        }
        Ok(())
    }

    /// Derive the row restriction for a view.
    ///
    /// Without a configured ownership column the scope cannot be enforced at row
    /// level and every row is visible. A configured column that the view lacks
    /// hides every row.
    pub fn row_scope(
        &self,
        owner_column: Option<&str>,
        organism_column: Option<&str>,
        view_columns: &[ColumnInfo],
    ) -> RowScope {
        let restrict = |column: Option<&str>, value: Option<i64>| match column {
            None => RowScope::All,
            Some(column) => {
                if !view_columns.iter().any(|c| c.name == column) {
                    return RowScope::Nothing;
                }
                match value {
                    Some(value) => RowScope::Restricted {
                        column: column.to_string(),
                        values: vec![value],
                    },
                    None => RowScope::Nothing,
                }
            }
        };

        match self.scope {
            Scope::All => RowScope::All,
            Scope::Organism => restrict(organism_column, self.id_organism),
            Scope::Own => restrict(owner_column, Some(self.id_role)),
            Scope::None => RowScope::Nothing,
        }
    }
}

/// Row-set condition applied to every query on a view.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RowScope {
    #[default]
    All,
    /// Only rows whose `column` is one of `values`.
    Restricted { column: String, values: Vec<i64> },
    Nothing,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnType;

    fn columns() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::new("id_synthese", ColumnType::Integer),
            ColumnInfo::new("id_digitiser", ColumnType::Integer),
        ]
    }

    #[test]
    fn format_parse_is_exact() {
        assert_eq!(ExportFormat::parse("json"), Some(ExportFormat::Json));
        assert_eq!(ExportFormat::parse("csv"), Some(ExportFormat::Csv));
        assert_eq!(ExportFormat::parse("shp"), Some(ExportFormat::Shapefile));
        assert_eq!(ExportFormat::parse("SHP"), None);
        assert_eq!(ExportFormat::parse("xlsx"), None);
        assert_eq!(ExportFormat::Shapefile.extension(), "zip");
        assert!(ExportFormat::Shapefile.requires_geometry());
        assert!(!ExportFormat::Csv.requires_geometry());
    }

    #[test]
    fn scope_levels() {
        assert_eq!(Scope::from_level(0), Scope::None);
        assert_eq!(Scope::from_level(-4), Scope::None);
        assert_eq!(Scope::from_level(1), Scope::Own);
        assert_eq!(Scope::from_level(2), Scope::Organism);
        assert_eq!(Scope::from_level(3), Scope::All);
        assert_eq!(Scope::Organism.level(), 2);
    }

    #[test]
    fn row_scope_from_role() {
        let cols = columns();
        let own = RoleInfo::new(7, Scope::Own);
        assert_eq!(
            own.row_scope(Some("id_digitiser"), None, &cols),
            RowScope::Restricted {
                column: "id_digitiser".into(),
                values: vec![7]
            }
        );
        assert_eq!(own.row_scope(None, None, &cols), RowScope::All);
        assert_eq!(
            own.row_scope(Some("id_observer"), None, &cols),
            RowScope::Nothing
        );

        let org = RoleInfo::new(7, Scope::Organism);
        assert_eq!(
            org.row_scope(None, Some("id_digitiser"), &cols),
            RowScope::Nothing
        );

        let all = RoleInfo::new(7, Scope::All);
        assert_eq!(
            all.row_scope(Some("id_digitiser"), None, &cols),
            RowScope::All
        );
    }

    #[test]
    fn scope_none_is_rejected() {
        let role = RoleInfo::new(3, Scope::None);
        let err = role.ensure_allowed(Action::Export).unwrap_err();
        assert!(matches!(err, ExportError::InsufficientRights(_)));
    }

    #[test]
    fn export_serializes_desc_key() {
        let export = Export::new(5, "Occtax", "gn_exports", "v_occtax").with_description("all");
        let value = serde_json::to_value(&export).unwrap();
        assert_eq!(value["desc"], "all");
        assert_eq!(value["view_name"], "v_occtax");
        assert!(!export.has_geometry());
    }
}
