use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use gnexport_core::ExportFormat;
use gnexport_db_postgres::PostgresConfig;
use gnexport_search::PageLimits;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Export endpoints, limits and output directories
    #[serde(default)]
    pub exports: ExportsSettings,
    /// How CRUVED scopes map onto view rows
    #[serde(default)]
    pub permissions: PermissionsSettings,
    #[serde(default)]
    pub etalab: EtalabSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.request_timeout_ms == 0 {
            return Err("server.request_timeout_ms must be > 0".into());
        }
        // Limits
        let exports = &self.exports;
        if exports.default_limit == 0 || exports.file_limit == 0 {
            return Err("exports.default_limit and exports.file_limit must be > 0".into());
        }
        if exports.max_limit == 0 {
            return Err("exports.max_limit must be > 0".into());
        }
        if exports.default_limit > exports.max_limit || exports.file_limit > exports.max_limit {
            return Err("exports.default_limit and exports.file_limit must be <= exports.max_limit".into());
        }
        // Formats
        if exports.formats.is_empty() {
            return Err("exports.formats must not be empty".into());
        }
        for format in &exports.formats {
            if ExportFormat::parse(format).is_none() {
                return Err(format!(
                    "exports.formats: unknown format '{format}' (expected json, csv or shp)"
                ));
            }
        }
        if exports.role_header.trim().is_empty() {
            return Err("exports.role_header must not be empty".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Storage validation
        match self.storage.backend {
            StorageBackend::Postgres => {
                if self.storage.postgres.url.is_empty() {
                    return Err("storage.postgres.url must not be empty".into());
                }
                if self.storage.postgres.pool_size == 0 {
                    return Err("storage.postgres.pool_size must be > 0".into());
                }
                if self.storage.postgres.query_timeout_ms == 0 {
                    return Err("storage.postgres.query_timeout_ms must be > 0".into());
                }
            }
            StorageBackend::Memory => {}
        }
        // Etalab
        if self.etalab.enabled && self.etalab.output_path.as_deref().unwrap_or("").is_empty() {
            return Err("etalab.enabled=true requires etalab.output_path".into());
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound for one HTTP request, including file generation.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout_ms() -> u64 {
    300_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    /// In-memory stores, optionally seeded from `storage.memory.fixture`.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub postgres: PostgresConfig,
    #[serde(default)]
    pub memory: MemorySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemorySettings {
    /// JSON fixture loaded at startup.
    #[serde(default)]
    pub fixture: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportsSettings {
    /// Formats accepted by `/{id}/{format}` and schedules
    #[serde(default = "default_formats")]
    pub formats: Vec<String>,
    /// Page size of `/api/{id}` when `limit` is absent
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// Row count of file exports when `limit` is absent
    #[serde(default = "default_file_limit")]
    pub file_limit: usize,
    /// Hard cap on any requested `limit`; also the row count of scheduled files
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
    /// Reject unknown or mistyped filter columns instead of ignoring them
    #[serde(default)]
    pub strict_filters: bool,
    /// Return internal error detail to callers
    #[serde(default)]
    pub debug: bool,
    /// Header carrying the caller's role id, set by the authenticating gateway
    #[serde(default = "default_role_header")]
    pub role_header: String,
    #[serde(default = "default_static_root")]
    pub static_root: String,
    /// Defaults to `<static_root>/shapefiles`
    #[serde(default)]
    pub shapefiles_dir: Option<String>,
    /// Defaults to `<static_root>/exports/schedules`
    #[serde(default)]
    pub schedules_dir: Option<String>,
    /// Published shapefile archives older than this are removed
    #[serde(default = "default_shapefile_retention_minutes")]
    pub shapefile_retention_minutes: u64,
}

fn default_formats() -> Vec<String> {
    ExportFormat::ALL
        .iter()
        .map(|f| f.as_str().to_string())
        .collect()
}
fn default_limit() -> usize {
    1000
}
fn default_file_limit() -> usize {
    10_000
}
fn default_max_limit() -> usize {
    100_000
}
fn default_role_header() -> String {
    "x-gn-role-id".into()
}
fn default_static_root() -> String {
    "static".into()
}
fn default_shapefile_retention_minutes() -> u64 {
    60
}

impl Default for ExportsSettings {
    fn default() -> Self {
        Self {
            formats: default_formats(),
            default_limit: default_limit(),
            file_limit: default_file_limit(),
            max_limit: default_max_limit(),
            strict_filters: false,
            debug: false,
            role_header: default_role_header(),
            static_root: default_static_root(),
            shapefiles_dir: None,
            schedules_dir: None,
            shapefile_retention_minutes: default_shapefile_retention_minutes(),
        }
    }
}

impl ExportsSettings {
    /// Enabled formats, in configuration order. Unknown names are skipped.
    pub fn enabled_formats(&self) -> Vec<ExportFormat> {
        self.formats
            .iter()
            .filter_map(|f| ExportFormat::parse(f))
            .collect()
    }

    /// Parses `name` and checks it is enabled.
    pub fn format(&self, name: &str) -> Option<ExportFormat> {
        ExportFormat::parse(name).filter(|f| self.enabled_formats().contains(f))
    }

    pub fn api_limits(&self) -> PageLimits {
        PageLimits {
            default_limit: self.default_limit,
            max_limit: self.max_limit,
        }
    }

    pub fn file_limits(&self) -> PageLimits {
        PageLimits {
            default_limit: self.file_limit,
            max_limit: self.max_limit,
        }
    }

    pub fn shapefile_retention(&self) -> Duration {
        Duration::from_secs(self.shapefile_retention_minutes.saturating_mul(60))
    }

    pub fn exports_dir(&self) -> PathBuf {
        Path::new(&self.static_root).join("exports")
    }

    pub fn shapefiles_dir(&self) -> PathBuf {
        self.shapefiles_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| Path::new(&self.static_root).join("shapefiles"))
    }

    pub fn schedules_dir(&self) -> PathBuf {
        self.schedules_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.exports_dir().join("schedules"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsSettings {
    #[serde(default = "default_module_code")]
    pub module_code: String,
    /// Consulted when the module itself grants nothing
    #[serde(default = "default_parent_module_code")]
    pub parent_module_code: Option<String>,
    /// Column matched against the role id for scope 1
    #[serde(default)]
    pub owner_column: Option<String>,
    /// Column matched against the role's organism for scope 2
    #[serde(default)]
    pub organism_column: Option<String>,
}

fn default_module_code() -> String {
    "EXPORTS".into()
}
fn default_parent_module_code() -> Option<String> {
    Some("GEONATURE".into())
}

impl Default for PermissionsSettings {
    fn default() -> Self {
        Self {
            module_code: default_module_code(),
            parent_module_code: default_parent_module_code(),
            owner_column: None,
            organism_column: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtalabSettings {
    #[serde(default)]
    pub enabled: bool,
    /// File served by `/etalab`; regenerated once a day
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default = "default_etalab_schema")]
    pub schema: String,
    #[serde(default = "default_etalab_view")]
    pub view: String,
    /// Prefix of every subject and predicate IRI
    #[serde(default = "default_etalab_base_uri")]
    pub base_uri: String,
    /// Column used as the record identifier; the row number otherwise
    #[serde(default)]
    pub id_column: Option<String>,
}

fn default_etalab_schema() -> String {
    "pr_occtax".into()
}
fn default_etalab_view() -> String {
    "export_occtax_sinp".into()
}
fn default_etalab_base_uri() -> String {
    "http://geonature.fr/occurrence/".into()
}

impl Default for EtalabSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            output_path: None,
            schema: default_etalab_schema(),
            view: default_etalab_view(),
            base_uri: default_etalab_base_uri(),
            id_column: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_PATH: &str = "gnexport.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., GNEXPORT__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("GNEXPORT")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("exports.formats")
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
