//! Role-based grants: access through a cross-cutting role rather than a
//! direct relation to the record.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::application::authz::GrantContext;
use crate::application::hooks::{ExtensionRegistry, Filter, HookError, HookEvent, HookName};
use crate::application::repos::RepoError;
use crate::cache::{rw_read, rw_write};
use crate::domain::types::{ActorId, Capability};

const SOURCE: &str = "modules::roles";

/// Answers whether an actor holds a capability on an entity type through
/// any of its roles.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    async fn holds(
        &self,
        actor: ActorId,
        entity: &str,
        capability: Capability,
    ) -> Result<bool, RepoError>;
}

#[derive(Default)]
struct RoleTables {
    capabilities: HashMap<String, BTreeSet<(String, Capability)>>,
    assignments: HashMap<ActorId, BTreeSet<String>>,
}

/// Process-local role table.
#[derive(Default)]
pub struct MemoryRoleDirectory {
    tables: RwLock<RoleTables>,
}

impl MemoryRoleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(&self, role: &str, entity: &str, capability: Capability) {
        rw_write(&self.tables, SOURCE, "allow")
            .capabilities
            .entry(role.to_string())
            .or_default()
            .insert((entity.to_string(), capability));
    }

    pub fn assign(&self, actor: ActorId, role: &str) {
        rw_write(&self.tables, SOURCE, "assign")
            .assignments
            .entry(actor)
            .or_default()
            .insert(role.to_string());
    }

    pub fn revoke(&self, actor: ActorId, role: &str) -> bool {
        rw_write(&self.tables, SOURCE, "revoke")
            .assignments
            .get_mut(&actor)
            .is_some_and(|roles| roles.remove(role))
    }
}

#[async_trait]
impl RoleDirectory for MemoryRoleDirectory {
    async fn holds(
        &self,
        actor: ActorId,
        entity: &str,
        capability: Capability,
    ) -> Result<bool, RepoError> {
        let tables = rw_read(&self.tables, SOURCE, "holds");
        let Some(roles) = tables.assignments.get(&actor) else {
            return Ok(false);
        };
        let wanted = (entity.to_string(), capability);
        Ok(roles.iter().any(|role| {
            tables
                .capabilities
                .get(role)
                .is_some_and(|granted| granted.contains(&wanted))
        }))
    }
}

/// `<entity>.can*` subscriber granting through the role directory.
pub struct RoleGrant {
    directory: Arc<dyn RoleDirectory>,
}

impl RoleGrant {
    pub const NAME: &'static str = "roles.grant";

    pub fn new(directory: Arc<dyn RoleDirectory>) -> Self {
        Self { directory }
    }

    /// Subscribes one grant per capability of each entity.
    pub fn install(hooks: &ExtensionRegistry, directory: Arc<dyn RoleDirectory>, entities: &[&str]) {
        let grant = Arc::new(Self::new(directory));
        for entity in entities {
            for capability in Capability::ALL {
                hooks.grants.add_filter(
                    HookName::new(entity, HookEvent::Can(capability)),
                    Arc::clone(&grant) as Arc<dyn Filter<bool, GrantContext>>,
                );
            }
        }
    }
}

#[async_trait]
impl Filter<bool, GrantContext> for RoleGrant {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn apply(&self, granted: bool, context: &GrantContext) -> Result<bool, HookError> {
        if granted {
            return Ok(true);
        }
        self.directory
            .holds(context.actor, context.entity, context.capability)
            .await
            .map_err(|err| HookError::failed(Self::NAME, err))
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::types::Relation;

    use super::*;

    fn context(actor: i64, capability: Capability) -> GrantContext {
        GrantContext {
            entity: "customer",
            capability,
            actor: ActorId::new(actor),
            entity_id: 1,
            relation: Relation::None,
        }
    }

    #[tokio::test]
    async fn grants_only_matching_capability() {
        let directory = Arc::new(MemoryRoleDirectory::new());
        directory.allow("support", "customer", Capability::View);
        directory.assign(ActorId::new(7), "support");
        let grant = RoleGrant::new(directory.clone());

        assert!(grant.apply(false, &context(7, Capability::View)).await.expect("apply"));
        assert!(!grant.apply(false, &context(7, Capability::Delete)).await.expect("apply"));
        assert!(!grant.apply(false, &context(8, Capability::View)).await.expect("apply"));
    }

    #[tokio::test]
    async fn passes_existing_grant_through() {
        let grant = RoleGrant::new(Arc::new(MemoryRoleDirectory::new()));
        assert!(grant.apply(true, &context(1, Capability::Edit)).await.expect("apply"));
    }

    #[tokio::test]
    async fn revoked_role_no_longer_grants() {
        let directory = MemoryRoleDirectory::new();
        directory.allow("auditor", "customer", Capability::View);
        directory.assign(ActorId::new(3), "auditor");
        assert!(directory.revoke(ActorId::new(3), "auditor"));
        assert!(
            !directory
                .holds(ActorId::new(3), "customer", Capability::View)
                .await
                .expect("holds")
        );
    }
}
