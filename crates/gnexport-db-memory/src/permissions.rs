use async_trait::async_trait;
use dashmap::DashMap;
use gnexport_core::{Action, PermissionResolver, Result, RoleInfo, Scope};

/// Fixed per-role scopes, for tests and database-less runs.
///
/// Roles without an entry for the action get `default_scope`, which is
/// [`Scope::None`] unless configured otherwise.
#[derive(Debug)]
pub struct StaticPermissions {
    scopes: DashMap<(i64, Action), Scope>,
    organisms: DashMap<i64, i64>,
    default_scope: Scope,
}

impl Default for StaticPermissions {
    fn default() -> Self {
        Self {
            scopes: DashMap::new(),
            organisms: DashMap::new(),
            default_scope: Scope::None,
        }
    }
}

impl StaticPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_scope(mut self, scope: Scope) -> Self {
        self.default_scope = scope;
        self
    }

    /// Grants `scope` to the role for both actions.
    pub fn set(&self, id_role: i64, scope: Scope) {
        self.set_for(id_role, Action::Read, scope);
        self.set_for(id_role, Action::Export, scope);
    }

    pub fn set_for(&self, id_role: i64, action: Action, scope: Scope) {
        self.scopes.insert((id_role, action), scope);
    }

    pub fn set_organism(&self, id_role: i64, id_organism: i64) {
        self.organisms.insert(id_role, id_organism);
    }
}

#[async_trait]
impl PermissionResolver for StaticPermissions {
    async fn resolve(&self, id_role: i64, action: Action) -> Result<RoleInfo> {
        let scope = self
            .scopes
            .get(&(id_role, action))
            .map(|s| *s)
            .unwrap_or(self.default_scope);
        let role = RoleInfo {
            id_role,
            id_organism: self.organisms.get(&id_role).map(|o| *o),
            scope,
        };
        role.ensure_allowed(action)?;
        Ok(role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gnexport_core::ExportError;

    #[tokio::test]
    async fn unknown_role_is_refused() {
        let permissions = StaticPermissions::new();
        let err = permissions.resolve(7, Action::Read).await.unwrap_err();
        assert!(matches!(err, ExportError::InsufficientRights(_)));
    }

    #[tokio::test]
    async fn scopes_are_per_action() {
        let permissions = StaticPermissions::new();
        permissions.set_for(7, Action::Read, Scope::All);
        permissions.set_organism(7, 4);

        let role = permissions.resolve(7, Action::Read).await.unwrap();
        assert_eq!(role.scope, Scope::All);
        assert_eq!(role.id_organism, Some(4));
        assert!(permissions.resolve(7, Action::Export).await.is_err());
    }

    #[tokio::test]
    async fn default_scope_applies_to_unlisted_roles() {
        let permissions = StaticPermissions::new().with_default_scope(Scope::Own);
        let role = permissions.resolve(99, Action::Export).await.unwrap();
        assert_eq!(role.scope, Scope::Own);
        assert_eq!(role.id_organism, None);
    }
}
