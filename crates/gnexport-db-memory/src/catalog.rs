use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;
use gnexport_core::{Export, ExportCatalog, ExportError, ExportSchedule, Result, RoleExportGrant};

/// In-memory export catalog.
///
/// Holds exports, role grants, group memberships and schedules in concurrent
/// maps. Access follows the same rule as the database catalog: an export is
/// reachable when it is public or granted to the role or to one of its groups.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    exports: DashMap<i64, Export>,
    /// id_export -> roles (users or groups) holding a grant
    grants: DashMap<i64, HashSet<i64>>,
    /// user role -> groups it belongs to
    groups: DashMap<i64, HashSet<i64>>,
    schedules: DashMap<i64, ExportSchedule>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_export(&self, export: Export) {
        self.exports.insert(export.id, export);
    }

    pub fn grant(&self, grant: RoleExportGrant) {
        self.grants
            .entry(grant.id_export)
            .or_default()
            .insert(grant.id_role);
    }

    pub fn add_to_group(&self, id_role: i64, id_group: i64) {
        self.groups.entry(id_role).or_default().insert(id_group);
    }

    /// Registers a schedule. Non-positive frequencies are rejected, as the
    /// database loader does.
    pub fn add_schedule(&self, schedule: ExportSchedule) -> bool {
        if schedule.frequency_days == 0 {
            return false;
        }
        self.schedules.insert(schedule.id, schedule);
        true
    }

    fn role_has_grant(&self, id_role: i64, id_export: i64) -> bool {
        let Some(holders) = self.grants.get(&id_export) else {
            return false;
        };
        if holders.contains(&id_role) {
            return true;
        }
        self.groups
            .get(&id_role)
            .is_some_and(|groups| groups.iter().any(|g| holders.contains(g)))
    }
}

#[async_trait]
impl ExportCatalog for InMemoryCatalog {
    async fn allowed_exports(&self, id_role: i64) -> Result<Vec<Export>> {
        let mut allowed: Vec<Export> = self
            .exports
            .iter()
            .filter(|e| e.public || self.role_has_grant(id_role, e.id))
            .map(|e| e.value().clone())
            .collect();
        allowed.sort_by_key(|e| e.id);
        Ok(allowed)
    }

    async fn resolve_one(&self, id_role: i64, id_export: i64) -> Result<Export> {
        let export = self.get(id_export).await?;
        if export.public || self.role_has_grant(id_role, id_export) {
            return Ok(export);
        }
        Err(ExportError::insufficient_rights(format!(
            "role {id_role} has no access to export {id_export}"
        )))
    }

    async fn get(&self, id_export: i64) -> Result<Export> {
        self.exports
            .get(&id_export)
            .map(|e| e.value().clone())
            .ok_or_else(|| ExportError::no_result_found(format!("Export {id_export} not found")))
    }

    async fn schedules(&self) -> Result<Vec<ExportSchedule>> {
        let mut schedules: Vec<ExportSchedule> =
            self.schedules.iter().map(|s| s.value().clone()).collect();
        schedules.sort_by_key(|s| s.id);
        Ok(schedules)
    }
}
