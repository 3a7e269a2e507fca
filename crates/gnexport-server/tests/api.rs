use std::io::Cursor;

use gnexport_core::{ColumnInfo, ColumnType, Export, RoleExportGrant, Scope};
use gnexport_db_memory::{MemoryBackend, Table};
use gnexport_server::{AppConfig, AppState, build_app};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::task::JoinHandle;

const ROLE_HEADER: &str = "x-gn-role-id";
const ADMIN: i64 = 1;
const NO_GRANTS: i64 = 2;
const NO_PERMISSION: i64 = 3;
const OBSERVER: i64 = 4;

fn backend() -> MemoryBackend {
    let backend = MemoryBackend::new();
    let catalog = &backend.catalog;
    catalog.insert_export(Export::new(5, "Synthese", "gn_exports", "v_synthese"));
    catalog.insert_export(
        Export::new(6, "Points", "gn_exports", "v_points").with_geometry("geom", 4326),
    );
    catalog.insert_export(Export::new(7, "Restricted", "gn_exports", "v_synthese"));
    for (id_export, id_role) in [(5, ADMIN), (6, ADMIN), (5, OBSERVER)] {
        catalog.grant(RoleExportGrant { id_export, id_role });
    }

    backend.permissions.set(ADMIN, Scope::All);
    backend.permissions.set(NO_GRANTS, Scope::All);
    backend.permissions.set(OBSERVER, Scope::Own);

    let rows = (1..=10)
        .map(|i: i64| {
            vec![
                json!(i),
                json!(if i % 2 == 1 { "Lynx lynx" } else { "Vulpes vulpes" }),
                json!(format!("2020-01-{i:02}")),
                json!(i as f64 * 100.0),
                json!(if i <= 3 { OBSERVER } else { ADMIN }),
            ]
        })
        .collect();
    backend.datasets.insert_table(
        "gn_exports",
        "v_synthese",
        Table::new(vec![
            ColumnInfo::new("id_synthese", ColumnType::Integer),
            ColumnInfo::new("nom_cite", ColumnType::Text),
            ColumnInfo::new("date_min", ColumnType::Date),
            ColumnInfo::new("altitude", ColumnType::Decimal),
            ColumnInfo::new("id_digitiser", ColumnType::Integer),
        ])
        .with_rows(rows),
    );

    backend.datasets.insert_table(
        "gn_exports",
        "v_points",
        Table::new(vec![
            ColumnInfo::new("id", ColumnType::Integer),
            ColumnInfo::new("nom", ColumnType::Text),
            ColumnInfo::new("geom", ColumnType::Geometry),
        ])
        .with_rows(vec![
            vec![json!(1), json!("Lynx"), json!({"type": "Point", "coordinates": [6.1, 45.2]})],
            vec![json!(2), json!("Fox"), json!({"type": "Point", "coordinates": [6.3, 45.4]})],
        ]),
    );
    backend
        .datasets
        .insert_spatial_ref(4326, "GEOGCS[\"WGS 84\",DATUM[\"WGS_1984\"]]");
    backend
}

fn config(root: &TempDir) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.exports.static_root = root.path().to_string_lossy().into_owned();
    cfg.permissions.owner_column = Some("id_digitiser".into());
    cfg
}

async fn start_server(cfg: AppConfig) -> (String, tokio::sync::oneshot::Sender<()>, JoinHandle<()>) {
    std::fs::create_dir_all(cfg.exports.shapefiles_dir()).expect("scratch dir");
    let app = build_app(AppState::with_memory(cfg, backend()));

    // Bind to an ephemeral port
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    (format!("http://{addr}"), tx, server)
}

async fn get(base: &str, path: &str, role: Option<i64>) -> reqwest::Response {
    let mut req = reqwest::Client::new().get(format!("{base}{path}"));
    if let Some(role) = role {
        req = req.header(ROLE_HEADER, role.to_string());
    }
    req.send().await.unwrap()
}

async fn get_json(base: &str, path: &str, role: Option<i64>) -> (u16, Value) {
    let resp = get(base, path, role).await;
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

#[tokio::test]
async fn health_and_authentication() {
    let root = TempDir::new().unwrap();
    let (base, shutdown_tx, handle) = start_server(config(&root)).await;

    let (status, body) = get_json(&base, "/healthz", None).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");

    let (status, body) = get_json(&base, "/", None).await;
    assert_eq!(status, 401);
    assert_eq!(body, json!({"api_error": "Unauthorized"}));

    let resp = reqwest::Client::new()
        .get(format!("{base}/"))
        .header(ROLE_HEADER, "not-a-number")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn list_exports_per_role() {
    let root = TempDir::new().unwrap();
    let (base, shutdown_tx, handle) = start_server(config(&root)).await;

    let (status, body) = get_json(&base, "/", Some(ADMIN)).await;
    assert_eq!(status, 200);
    let ids: Vec<i64> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![5, 6]);
    assert_eq!(body[1]["geometry_field"], "geom");
    assert_eq!(body[0]["view_name"], "v_synthese");

    // A role without grants gets an empty list, not an error.
    let (status, body) = get_json(&base, "/", Some(NO_GRANTS)).await;
    assert_eq!(status, 200);
    assert_eq!(body, json!([]));

    let (status, body) = get_json(&base, "/", Some(NO_PERMISSION)).await;
    assert_eq!(status, 403);
    assert_eq!(body["api_error"], "InsufficientRightsError");

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn csv_export_respects_limit() {
    let root = TempDir::new().unwrap();
    let (base, shutdown_tx, handle) = start_server(config(&root)).await;

    let resp = get(&base, "/5/csv?limit=2&offset=0", Some(ADMIN)).await;
    assert_eq!(resp.status().as_u16(), 200);
    let disposition = resp
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment; filename=\"Synthese_"));
    assert!(disposition.ends_with(".csv\""));
    assert!(
        resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/csv")
    );

    let body = resp.text().await.unwrap();
    let mut reader = csv::Reader::from_reader(body.as_bytes());
    let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    assert_eq!(
        headers,
        vec!["id_synthese", "nom_cite", "date_min", "altitude", "id_digitiser"]
    );
    let records: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(records.len(), 2);
    assert_eq!(&records[0][0], "1");
    assert_eq!(&records[1][0], "2");

    // Same query through the API reports the unfiltered total.
    let (status, body) = get_json(&base, "/api/5?limit=2&offset=0", Some(ADMIN)).await;
    assert_eq!(status, 200);
    assert_eq!(body["total"], 10);
    assert_eq!(body["total_filtered"], 10);
    assert_eq!(body["limit"], 2);
    assert_eq!(body["page"], 0);
    assert_eq!(body["items"].as_array().unwrap().len(), 2);

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn json_file_matches_filtered_count() {
    let root = TempDir::new().unwrap();
    let (base, shutdown_tx, handle) = start_server(config(&root)).await;

    let resp = get(&base, "/5/json?ilikenom_cite=LYNX", Some(ADMIN)).await;
    assert_eq!(resp.status().as_u16(), 200);
    let items: Value = serde_json::from_str(&resp.text().await.unwrap()).unwrap();
    let items = items.as_array().unwrap();

    let (_, api) = get_json(&base, "/api/5?ilikenom_cite=LYNX", Some(ADMIN)).await;
    assert_eq!(items.len() as u64, api["total_filtered"].as_u64().unwrap());
    assert_eq!(items.len(), 5);
    let columns: Vec<&String> = items[0].as_object().unwrap().keys().collect();
    assert_eq!(
        columns,
        vec!["id_synthese", "nom_cite", "date_min", "altitude", "id_digitiser"]
    );

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn api_filters_paging_and_ordering() {
    let root = TempDir::new().unwrap();
    let (base, shutdown_tx, handle) = start_server(config(&root)).await;

    // Substring and numeric filters are ANDed; unknown columns are ignored.
    let (status, body) = get_json(
        &base,
        "/api/5?ilikenom_cite=lynx&filter_n_up_altitude=500&unknown=1",
        Some(ADMIN),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["total"], 10);
    assert_eq!(body["total_filtered"], 3);
    let ids: Vec<i64> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["id_synthese"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![5, 7, 9]);

    let (_, body) = get_json(
        &base,
        "/api/5?filter_d_lo_date_min=2020-01-03&filter_d_up_date_min=2020-01-02",
        Some(ADMIN),
    )
    .await;
    assert_eq!(body["total_filtered"], 2);

    let (_, body) = get_json(&base, "/api/5?orderby=altitude&order=DESC&limit=1", Some(ADMIN)).await;
    assert_eq!(body["items"][0]["id_synthese"], 10);

    // offset is a page index
    let (_, body) = get_json(&base, "/api/5?limit=3&offset=1", Some(ADMIN)).await;
    assert_eq!(body["items"][0]["id_synthese"], 4);
    assert_eq!(body["page"], 1);

    let (status, body) = get_json(&base, "/api/5?limit=5&offset=7", Some(ADMIN)).await;
    assert_eq!(status, 200);
    assert_eq!(body["items"], json!([]));
    assert_eq!(body["total"], 10);

    let (status, body) = get_json(&base, "/api/5?limit=0", Some(ADMIN)).await;
    assert_eq!(status, 200);
    assert_eq!(body["items"], json!([]));
    assert_eq!(body["total"], 10);
    assert_eq!(body["total_filtered"], 10);

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn own_scope_restricts_rows() {
    let root = TempDir::new().unwrap();
    let (base, shutdown_tx, handle) = start_server(config(&root)).await;

    let (status, body) = get_json(&base, "/api/5", Some(OBSERVER)).await;
    assert_eq!(status, 200);
    assert_eq!(body["total"], 3);
    assert_eq!(body["items"].as_array().unwrap().len(), 3);

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn export_errors_map_to_statuses() {
    let root = TempDir::new().unwrap();
    let (base, shutdown_tx, handle) = start_server(config(&root)).await;

    let (status, body) = get_json(&base, "/5/shp", Some(ADMIN)).await;
    assert_eq!(status, 404);
    assert_eq!(body["api_error"], "NonTransformableError");

    let (status, body) = get_json(&base, "/5/xml", Some(ADMIN)).await;
    assert_eq!(status, 404);
    assert_eq!(body, json!({"api_error": "InvalidExport"}));

    let (status, body) = get_json(&base, "/0/csv", Some(ADMIN)).await;
    assert_eq!(status, 404);
    assert_eq!(body["api_error"], "InvalidExport");

    let (status, body) = get_json(&base, "/99/csv", Some(ADMIN)).await;
    assert_eq!(status, 404);
    assert_eq!(body["api_error"], "NoResultFound");
    assert!(body["message"].as_str().unwrap().contains("99"));

    let (status, body) = get_json(&base, "/7/csv", Some(ADMIN)).await;
    assert_eq!(status, 403);
    assert_eq!(body, json!({"api_error": "InsufficientRightsError"}));

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn strict_filters_reject_unknown_columns() {
    let root = TempDir::new().unwrap();
    let mut cfg = config(&root);
    cfg.exports.strict_filters = true;
    let (base, shutdown_tx, handle) = start_server(cfg).await;

    let (status, body) = get_json(&base, "/api/5?nom_valide=Lynx", Some(ADMIN)).await;
    assert_eq!(status, 400);
    assert_eq!(body["api_error"], "InvalidFilter");
    assert!(body["message"].as_str().unwrap().contains("nom_valide"));

    let (status, _) = get_json(&base, "/api/5?nom_cite=Lynx%20lynx", Some(ADMIN)).await;
    assert_eq!(status, 200);

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn shapefile_export_is_a_zip_of_layers() {
    let root = TempDir::new().unwrap();
    let cfg = config(&root);
    let scratch = cfg.exports.shapefiles_dir();
    let (base, shutdown_tx, handle) = start_server(cfg).await;

    let resp = get(&base, "/6/shp", Some(ADMIN)).await;
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.headers()["content-type"], "application/zip");
    let disposition = resp.headers()["content-disposition"].to_str().unwrap().to_string();
    assert!(disposition.contains("filename=\"export_Points_"));

    let bytes = resp.bytes().await.unwrap();
    let archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    let names: Vec<String> = archive.file_names().map(String::from).collect();
    for ext in ["shp", "shx", "dbf", "prj", "cpg"] {
        assert!(
            names.iter().any(|n| n.ends_with(&format!("_POINT.{ext}"))),
            "missing .{ext} in {names:?}"
        );
    }

    // The archive is published in the scratch root and no build directory is left.
    let entries: Vec<String> = std::fs::read_dir(&scratch)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(entries.iter().any(|n| n.starts_with("export_Points_") && n.ends_with(".zip")));
    assert!(!entries.iter().any(|n| n.starts_with(".build-")));

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn geometry_export_api_returns_features() {
    let root = TempDir::new().unwrap();
    let (base, shutdown_tx, handle) = start_server(config(&root)).await;

    let (status, body) = get_json(&base, "/api/6", Some(ADMIN)).await;
    assert_eq!(status, 200);
    assert_eq!(body["items"]["type"], "FeatureCollection");
    let feature = &body["items"]["features"][0];
    assert_eq!(feature["geometry"]["type"], "Point");
    assert_eq!(feature["properties"], json!({"id": 1, "nom": "Lynx"}));

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn etalab_endpoint() {
    let root = TempDir::new().unwrap();
    let (base, shutdown_tx, handle) = start_server(config(&root)).await;
    let (status, body) = get_json(&base, "/etalab", None).await;
    assert_eq!(status, 501);
    assert_eq!(body["api_error"], "EtalabDisabled");
    let _ = shutdown_tx.send(());
    let _ = handle.await;

    let mut cfg = config(&root);
    cfg.etalab.enabled = true;
    cfg.etalab.schema = "gn_exports".into();
    cfg.etalab.view = "v_synthese".into();
    cfg.etalab.id_column = Some("id_synthese".into());
    cfg.etalab.output_path = Some(root.path().join("etalab.nt").to_string_lossy().into_owned());
    let (base, shutdown_tx, handle) = start_server(cfg.clone()).await;

    let resp = get(&base, "/etalab", None).await;
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.headers()["content-type"], "application/n-triples");
    let text = resp.text().await.unwrap();
    assert!(text.contains("<http://geonature.fr/occurrence/10> "));
    assert!(root.path().join("etalab.nt").exists());
    let _ = shutdown_tx.send(());
    let _ = handle.await;

    cfg.etalab.output_path = Some(
        root.path()
            .join("missing")
            .join("etalab.nt")
            .to_string_lossy()
            .into_owned(),
    );
    let (base, shutdown_tx, handle) = start_server(cfg).await;
    let (status, body) = get_json(&base, "/etalab", None).await;
    assert_eq!(status, 500);
    assert_eq!(body["api_error"], "FileNotFoundError");
    assert!(body["message"].as_str().unwrap().starts_with("FileNotFoundError : "));
    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

fn archived_points(body: &[u8]) -> u64 {
    let mut archive = zip::ZipArchive::new(Cursor::new(body)).unwrap();
    let name = archive
        .file_names()
        .find(|n| n.ends_with("_POINT.shx"))
        .map(String::from)
        .unwrap();
    // 100-byte header, then 8 bytes per record
    (archive.by_name(&name).unwrap().size() - 100) / 8
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_shapefile_requests_get_their_own_rows() {
    let root = TempDir::new().unwrap();
    let (base, shutdown_tx, handle) = start_server(config(&root)).await;

    let requests: Vec<_> = (0..8)
        .map(|i| {
            let base = base.clone();
            let (path, expected) = if i % 2 == 0 {
                ("/6/shp?nom=Lynx", 1)
            } else {
                ("/6/shp", 2)
            };
            tokio::spawn(async move {
                let resp = get(&base, path, Some(ADMIN)).await;
                assert_eq!(resp.status().as_u16(), 200);
                let body = resp.bytes().await.unwrap();
                (expected, archived_points(&body))
            })
        })
        .collect();
    for request in requests {
        let (expected, received) = request.await.unwrap();
        assert_eq!(expected, received);
    }

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn huge_offsets_return_an_empty_page() {
    let root = TempDir::new().unwrap();
    let (base, shutdown_tx, handle) = start_server(config(&root)).await;

    let (status, body) = get_json(
        &base,
        "/api/5?limit=1000&offset=10000000000000000000",
        Some(ADMIN),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["items"], json!([]));
    assert_eq!(body["total"], 10);

    let resp = get(&base, "/5/csv?offset=18446744073709551615", Some(ADMIN)).await;
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(
        resp.text().await.unwrap().trim_end(),
        "id_synthese,nom_cite,date_min,altitude,id_digitiser"
    );

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn non_numeric_ids_are_invalid_exports() {
    let root = TempDir::new().unwrap();
    let (base, shutdown_tx, handle) = start_server(config(&root)).await;

    for path in ["/abc/csv", "/api/abc", "/api/0"] {
        let (status, body) = get_json(&base, path, Some(ADMIN)).await;
        assert_eq!(status, 404, "{path}");
        assert_eq!(body, json!({"api_error": "InvalidExport"}), "{path}");
    }

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}
