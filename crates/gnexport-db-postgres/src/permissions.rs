//! CRUVED scope resolution from `gn_permissions.v_roles_permissions`.
//!
//! The view already folds group permissions into each role. The highest
//! `SCOPE` filter wins. When the module itself grants nothing for the action,
//! the parent module (usually `GEONATURE`) is consulted.

use async_trait::async_trait;
use gnexport_core::{Action, PermissionResolver, Result, RoleInfo, Scope};
use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use sqlx_postgres::PgPool;
use tracing::debug;

use crate::error::PostgresError;

#[derive(Debug, Clone)]
pub struct PgPermissionResolver {
    pool: PgPool,
    module_code: String,
    parent_module_code: Option<String>,
}

impl PgPermissionResolver {
    pub fn new(pool: PgPool, module_code: impl Into<String>) -> Self {
        Self {
            pool,
            module_code: module_code.into(),
            parent_module_code: None,
        }
    }

    pub fn with_parent_module(mut self, code: Option<String>) -> Self {
        self.parent_module_code = code;
        self
    }

    fn module_codes(&self) -> Vec<String> {
        let mut codes = vec![self.module_code.clone()];
        codes.extend(self.parent_module_code.iter().cloned());
        codes
    }
}

/// Scope of the first module in `codes` that has one.
pub(crate) fn pick_scope(codes: &[String], levels: &[(String, i32)]) -> Scope {
    codes
        .iter()
        .find_map(|code| {
            levels
                .iter()
                .find(|(module, _)| module == code)
                .map(|(_, level)| Scope::from_level(*level))
        })
        .unwrap_or(Scope::None)
}

#[async_trait]
impl PermissionResolver for PgPermissionResolver {
    async fn resolve(&self, id_role: i64, action: Action) -> Result<RoleInfo> {
        let codes = self.module_codes();
        let levels: Vec<(String, i32)> = query_as(
            "SELECT module_code::text, COALESCE(MAX(value_filter::int4), 0) \
             FROM gn_permissions.v_roles_permissions \
             WHERE id_role = $1 AND code_action = $2 AND code_filter_type = 'SCOPE' \
               AND module_code = ANY($3) \
             GROUP BY module_code",
        )
        .bind(id_role)
        .bind(action.code())
        .bind(&codes)
        .fetch_all(&self.pool)
        .await
        .map_err(PostgresError::from)?;

        let scope = pick_scope(&codes, &levels);

        let id_organism: Option<i64> = query_scalar::<_, Option<i64>>(
            "SELECT id_organisme::bigint FROM utilisateurs.t_roles WHERE id_role = $1",
        )
        .bind(id_role)
        .fetch_optional(&self.pool)
        .await
        .map_err(PostgresError::from)?
        .flatten();

        debug!(id_role, action = action.code(), ?scope, "resolved permission scope");

        let role = RoleInfo {
            id_role,
            id_organism,
            scope,
        };
        role.ensure_allowed(action)?;
        Ok(role)
    }
}
