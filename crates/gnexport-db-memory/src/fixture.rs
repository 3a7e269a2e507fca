//! JSON seed data for the in-memory backend.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use gnexport_core::{ColumnInfo, ColumnType, Export, ExportSchedule, RoleExportGrant, Scope};
use serde::Deserialize;
use serde_json::Value;

use crate::{InMemoryCatalog, InMemoryDatasetSource, StaticPermissions, Table};

#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error("failed to read fixture {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid fixture: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Fixture {
    pub exports: Vec<Export>,
    pub grants: Vec<RoleExportGrant>,
    pub groups: Vec<GroupMembership>,
    pub schedules: Vec<ExportSchedule>,
    pub permissions: Vec<RolePermission>,
    pub tables: Vec<FixtureTable>,
    pub spatial_refs: HashMap<i32, String>,
}

#[derive(Debug, Deserialize)]
pub struct GroupMembership {
    pub id_role: i64,
    pub id_group: i64,
}

/// Scope level (0-3) of one role, applied to both actions.
#[derive(Debug, Deserialize)]
pub struct RolePermission {
    pub id_role: i64,
    pub scope: i32,
    #[serde(default)]
    pub id_organism: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct FixtureTable {
    pub schema: String,
    pub view: String,
    pub columns: Vec<FixtureColumn>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
pub struct FixtureColumn {
    pub name: String,
    #[serde(rename = "type", default)]
    pub col_type: ColumnType,
}

impl Fixture {
    pub fn from_json(json: &str) -> Result<Self, FixtureError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, FixtureError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| FixtureError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }
}

/// The three in-memory stores, shared behind `Arc`s.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    pub catalog: Arc<InMemoryCatalog>,
    pub permissions: Arc<StaticPermissions>,
    pub datasets: Arc<InMemoryDatasetSource>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: Fixture) -> Self {
        let backend = Self::new();

        for export in fixture.exports {
            backend.catalog.insert_export(export);
        }
        for grant in fixture.grants {
            backend.catalog.grant(grant);
        }
        for membership in fixture.groups {
            backend
                .catalog
                .add_to_group(membership.id_role, membership.id_group);
        }
        for schedule in fixture.schedules {
            backend.catalog.add_schedule(schedule);
        }
        for permission in fixture.permissions {
            backend
                .permissions
                .set(permission.id_role, Scope::from_level(permission.scope));
            if let Some(id_organism) = permission.id_organism {
                backend.permissions.set_organism(permission.id_role, id_organism);
            }
        }
        for table in fixture.tables {
            let columns = table
                .columns
                .into_iter()
                .map(|c| ColumnInfo::new(c.name, c.col_type))
                .collect();
            backend.datasets.insert_table(
                &table.schema,
                &table.view,
                Table::new(columns).with_rows(table.rows),
            );
        }
        for (srid, wkt) in fixture.spatial_refs {
            backend.datasets.insert_spatial_ref(srid, wkt);
        }

        backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gnexport_core::{Action, DatasetSource, ExportCatalog, PermissionResolver};

    const FIXTURE: &str = r#"{
        "exports": [
            {"id": 1, "label": "Synthese", "desc": "All observations",
             "schema_name": "gn_exports", "view_name": "v_synthese",
             "geometry_field": "geom", "geometry_srid": 4326}
        ],
        "grants": [{"id_export": 1, "id_role": 5}],
        "groups": [{"id_role": 6, "id_group": 5}],
        "schedules": [{"id": 1, "id_export": 1, "format": "csv", "frequency_days": 1}],
        "permissions": [{"id_role": 6, "scope": 2, "id_organism": 3}],
        "tables": [{
            "schema": "gn_exports", "view": "v_synthese",
            "columns": [{"name": "id", "type": "integer"}, {"name": "geom", "type": "geometry"}],
            "rows": [[1, {"type": "Point", "coordinates": [5.1, 45.2]}]]
        }],
        "spatial_refs": {"4326": "GEOGCS[\"WGS 84\"]"}
    }"#;

    #[tokio::test]
    async fn fixture_seeds_every_store() {
        let backend = MemoryBackend::from_fixture(Fixture::from_json(FIXTURE).unwrap());

        let export = backend.catalog.resolve_one(6, 1).await.unwrap();
        assert_eq!(export.description.as_deref(), Some("All observations"));
        assert_eq!(backend.catalog.schedules().await.unwrap().len(), 1);

        let role = backend.permissions.resolve(6, Action::Export).await.unwrap();
        assert_eq!(role.scope, Scope::Organism);
        assert_eq!(role.id_organism, Some(3));

        let columns = backend.datasets.columns(&export).await.unwrap();
        assert_eq!(columns[1].col_type, ColumnType::Geometry);
        assert!(backend.datasets.spatial_reference_wkt(4326).await.unwrap().is_some());
    }

    #[test]
    fn missing_file_is_reported_with_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let err = Fixture::from_path(&path).unwrap_err();
        assert!(err.to_string().contains("absent.json"));
    }
}
