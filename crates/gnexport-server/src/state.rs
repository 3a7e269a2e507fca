use std::sync::Arc;

use gnexport_core::{DatasetSource, ExportCatalog, PermissionResolver};
use gnexport_db_memory::MemoryBackend;
use gnexport_output::ScratchDir;

use crate::config::AppConfig;
use crate::locks::PathLocks;

/// Shared handles of the running service.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub catalog: Arc<dyn ExportCatalog>,
    pub permissions: Arc<dyn PermissionResolver>,
    pub datasets: Arc<dyn DatasetSource>,
    /// Root of per-request shapefile builds and published archives
    pub scratch: ScratchDir,
    pub locks: PathLocks,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        catalog: Arc<dyn ExportCatalog>,
        permissions: Arc<dyn PermissionResolver>,
        datasets: Arc<dyn DatasetSource>,
    ) -> Self {
        let scratch = ScratchDir::new(config.exports.shapefiles_dir());
        Self {
            config: Arc::new(config),
            catalog,
            permissions,
            datasets,
            scratch,
            locks: PathLocks::new(),
        }
    }

    /// State over the in-memory stores.
    pub fn with_memory(config: AppConfig, backend: MemoryBackend) -> Self {
        Self::new(config, backend.catalog, backend.permissions, backend.datasets)
    }

    pub fn debug(&self) -> bool {
        self.config.exports.debug
    }
}
