//! Built-in entity modules and the wiring that assembles them.

pub mod actors;
pub mod customers;
pub mod fixtures;
pub mod organizations;
pub mod provisioning;
pub mod roles;
pub mod staff;
pub mod units;

use std::sync::Arc;

use crate::application::authz::{
    Anonymous, Authorizer, CurrentActor, DECISION_CACHE, DecisionInvalidation,
    DescriptorRelations, FixedActor,
};
use crate::application::hooks::{ExtensionRegistry, HookEvent, HookName};
use crate::application::identity::{IdentityAssigner, IdentityError, LinkedCreated};
use crate::application::repos::RelationalStore;
use crate::application::store::{EntityModel, EntityStore};
use crate::cache::{CacheBackend, CacheConfig, CacheManager, MemoryCacheBackend};
use crate::domain::descriptor::EntityDescriptor;
use crate::domain::entities::Record;
use crate::domain::types::ActorId;
use crate::infra::memory::MemoryStore;

use self::actors::Actors;
use self::customers::Customers;
use self::fixtures::FixtureIdentities;
use self::organizations::Organizations;
use self::provisioning::DefaultUnitProvisioner;
use self::roles::{RoleDirectory, RoleGrant};
use self::staff::Staff;
use self::units::Units;

/// Every built-in entity type.
pub fn descriptors() -> [&'static EntityDescriptor; 5] {
    [
        &actors::DESCRIPTOR,
        &organizations::DESCRIPTOR,
        &units::DESCRIPTOR,
        &staff::DESCRIPTOR,
        &customers::DESCRIPTOR,
    ]
}

/// The entity stores of every built-in module, sharing one relational store,
/// one cache backend and one extension registry.
pub struct Platform {
    hooks: Arc<ExtensionRegistry>,
    identity: Arc<IdentityAssigner>,
    authorizer: Authorizer,
    pub actors: Arc<EntityStore<Actors>>,
    pub organizations: Arc<EntityStore<Organizations>>,
    pub units: Arc<EntityStore<Units>>,
    pub staff: Arc<EntityStore<Staff>>,
    pub customers: Arc<EntityStore<Customers>>,
}

impl Platform {
    pub fn new(
        db: Arc<dyn RelationalStore>,
        backend: Arc<dyn CacheBackend>,
        config: CacheConfig,
        actor: Arc<dyn CurrentActor>,
    ) -> Self {
        let hooks = Arc::new(ExtensionRegistry::new());
        let identity = Arc::new(IdentityAssigner::new(Arc::clone(&db)));
        let wiring = Wiring {
            db: &db,
            backend: &backend,
            config: &config,
            hooks: &hooks,
            identity: &identity,
        };

        let actors = wiring.store(Actors);
        let organizations = wiring.store(Organizations);
        let units = wiring.store(Units);
        let staff = wiring.store(Staff);
        let customers = wiring.store(Customers);

        let decisions = Arc::new(CacheManager::new(
            DECISION_CACHE,
            config.clone(),
            Arc::clone(&backend),
        ));
        let authorizer = Authorizer::new(
            Arc::clone(&decisions),
            Arc::new(DescriptorRelations::new(Arc::clone(&db))),
            Arc::clone(&hooks),
            actor,
        );

        let invalidation = Arc::new(DecisionInvalidation::new(decisions));
        for descriptor in descriptors() {
            for event in [HookEvent::Created, HookEvent::Updated, HookEvent::Deleted] {
                hooks.events.add_listener(
                    HookName::new(descriptor.name, event),
                    Arc::clone(&invalidation) as _,
                );
            }
        }
        hooks.events.add_listener(
            HookName::new(organizations::NAME, HookEvent::Created),
            Arc::new(DefaultUnitProvisioner::new(&units)),
        );

        Self {
            hooks,
            identity,
            authorizer,
            actors,
            organizations,
            units,
            staff,
            customers,
        }
    }

    /// Memory-backed platform with the default cache configuration and an
    /// anonymous ambient actor.
    pub fn in_memory() -> Self {
        Self::in_memory_with(CacheConfig::default())
    }

    pub fn in_memory_with(config: CacheConfig) -> Self {
        let backend = Arc::new(MemoryCacheBackend::new(&config));
        Self::new(
            Arc::new(MemoryStore::new()),
            backend,
            config,
            Arc::new(Anonymous),
        )
    }

    pub fn hooks(&self) -> &Arc<ExtensionRegistry> {
        &self.hooks
    }

    pub fn identity(&self) -> &Arc<IdentityAssigner> {
        &self.identity
    }

    pub fn authorizer(&self) -> &Authorizer {
        &self.authorizer
    }

    /// Resolver for a fixed actor, sharing the platform's decision cache.
    pub fn authorizer_for(&self, actor: ActorId) -> Authorizer {
        self.authorizer.with_actor(Arc::new(FixedActor(actor)))
    }

    pub fn install_roles(&self, directory: Arc<dyn RoleDirectory>) {
        let names = descriptors().map(|descriptor| descriptor.name);
        RoleGrant::install(&self.hooks, directory, &names);
    }

    /// Lets organizations and units be created with caller-chosen keys.
    pub fn install_fixture_identities(&self) {
        FixtureIdentities::install(
            &self.hooks,
            &[&organizations::DESCRIPTOR, &units::DESCRIPTOR],
        );
    }

    pub async fn create_staff(
        &self,
        actor: &Record,
        staff: &Record,
        requested: Option<i64>,
    ) -> Result<LinkedCreated, IdentityError> {
        self.identity
            .create_linked(&self.actors, &self.staff, actor, staff, requested)
            .await
    }

    pub async fn create_customer(
        &self,
        actor: &Record,
        customer: &Record,
        requested: Option<i64>,
    ) -> Result<LinkedCreated, IdentityError> {
        self.identity
            .create_linked(&self.actors, &self.customers, actor, customer, requested)
            .await
    }
}

struct Wiring<'a> {
    db: &'a Arc<dyn RelationalStore>,
    backend: &'a Arc<dyn CacheBackend>,
    config: &'a CacheConfig,
    hooks: &'a Arc<ExtensionRegistry>,
    identity: &'a Arc<IdentityAssigner>,
}

impl Wiring<'_> {
    fn store<M: EntityModel>(&self, model: M) -> Arc<EntityStore<M>> {
        let cache = CacheManager::new(
            model.descriptor().cache,
            self.config.clone(),
            Arc::clone(self.backend),
        );
        Arc::new(EntityStore::new(
            model,
            Arc::clone(self.db),
            Arc::new(cache),
            Arc::clone(self.hooks),
            Arc::clone(self.identity),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_namespaces_are_distinct() {
        let names = descriptors().map(|descriptor| descriptor.name);
        for (index, name) in names.iter().enumerate() {
            assert!(!names[index + 1..].contains(name), "duplicate entity `{name}`");
        }
    }

    #[test]
    fn cache_namespaces_are_distinct() {
        let namespaces = descriptors().map(|descriptor| descriptor.cache.namespace);
        for (index, namespace) in namespaces.iter().enumerate() {
            assert!(!namespaces[index + 1..].contains(namespace));
            assert_ne!(*namespace, DECISION_CACHE.namespace);
        }
    }

    #[test]
    fn actor_dependents_cover_linked_entities() {
        for descriptor in [&staff::DESCRIPTOR, &customers::DESCRIPTOR] {
            let link = descriptor.actor_link.expect("actor link");
            assert!(
                actors::DESCRIPTOR
                    .dependents
                    .iter()
                    .any(|fk| fk.table == descriptor.table && fk.column == link.field)
            );
        }
    }
}
