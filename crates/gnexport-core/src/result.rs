//! Query outcome and its projection into response items.

use serde_json::{Map, Value, json};

use crate::column::ColumnInfo;

/// Rows of one page plus the counts around it.
///
/// Each row holds one value per entry of `columns`, in the same order. The
/// geometry column, when present, carries parsed GeoJSON.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<Value>>,
    /// Rows visible under the row scope, before filters.
    pub total: u64,
    /// Rows left after filters.
    pub total_filtered: u64,
    pub page: usize,
    pub limit: usize,
    pub geometry_column: Option<String>,
}

impl QueryResult {
    pub fn geometry_index(&self) -> Option<usize> {
        let name = self.geometry_column.as_deref()?;
        self.columns.iter().position(|c| c.name == name)
    }

    /// Non-geometry columns with their index in each row.
    pub fn property_columns(&self) -> impl Iterator<Item = (usize, &ColumnInfo)> {
        let geom = self.geometry_index();
        self.columns
            .iter()
            .enumerate()
            .filter(move |(idx, _)| Some(*idx) != geom)
    }

    fn properties(&self, row: &[Value]) -> Map<String, Value> {
        self.property_columns()
            .map(|(idx, col)| {
                (
                    col.name.clone(),
                    row.get(idx).cloned().unwrap_or(Value::Null),
                )
            })
            .collect()
    }

    /// Items as a GeoJSON `FeatureCollection` when a geometry column is
    /// present, otherwise as an array of flat objects.
    pub fn items(&self) -> Value {
        match self.geometry_index() {
            Some(geom) => {
                let features: Vec<Value> = self
                    .rows
                    .iter()
                    .map(|row| {
                        json!({
                            "type": "Feature",
                            "geometry": row.get(geom).cloned().unwrap_or(Value::Null),
                            "properties": Value::Object(self.properties(row)),
                        })
                    })
                    .collect();
                json!({ "type": "FeatureCollection", "features": features })
            }
            None => Value::Array(
                self.rows
                    .iter()
                    .map(|row| {
                        Value::Object(
                            self.columns
                                .iter()
                                .enumerate()
                                .map(|(idx, col)| {
                                    (
                                        col.name.clone(),
                                        row.get(idx).cloned().unwrap_or(Value::Null),
                                    )
                                })
                                .collect(),
                        )
                    })
                    .collect(),
            ),
        }
    }

    /// Body of `GET /api/{id}`.
    pub fn to_api_response(&self) -> Value {
        json!({
            "total": self.total,
            "total_filtered": self.total_filtered,
            "page": self.page,
            "limit": self.limit,
            "items": self.items(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnType;

    fn result(geometry: bool) -> QueryResult {
        let mut columns = vec![
            ColumnInfo::new("id", ColumnType::Integer),
            ColumnInfo::new("nom", ColumnType::Text),
        ];
        let mut row = vec![json!(1), json!("Lynx")];
        if geometry {
            columns.push(ColumnInfo::new("geom", ColumnType::Geometry));
            row.push(json!({"type": "Point", "coordinates": [6.0, 45.0]}));
        }
        QueryResult {
            columns,
            rows: vec![row],
            total: 4,
            total_filtered: 1,
            page: 0,
            limit: 1000,
            geometry_column: geometry.then(|| "geom".to_string()),
        }
    }

    #[test]
    fn items_without_geometry_are_flat_objects() {
        let items = result(false).items();
        assert_eq!(items, json!([{"id": 1, "nom": "Lynx"}]));
    }

    #[test]
    fn items_with_geometry_form_a_feature_collection() {
        let items = result(true).items();
        assert_eq!(items["type"], "FeatureCollection");
        let feature = &items["features"][0];
        assert_eq!(feature["geometry"]["type"], "Point");
        assert_eq!(feature["properties"], json!({"id": 1, "nom": "Lynx"}));
    }

    #[test]
    fn api_response_carries_counts() {
        let body = result(false).to_api_response();
        assert_eq!(body["total"], 4);
        assert_eq!(body["total_filtered"], 1);
        assert_eq!(body["page"], 0);
        assert_eq!(body["limit"], 1000);
    }

    #[test]
    fn object_keys_follow_column_order() {
        let items = result(false).items();
        let keys: Vec<&String> = items[0].as_object().unwrap().keys().collect();
        assert_eq!(keys, ["id", "nom"]);
    }
}
