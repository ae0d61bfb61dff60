//! Authorization resolver.
//!
//! A decision is made in one pass: the module-local relation first, then the
//! `<entity>.can*` filter chain seeded with `false`. Subscribers may only
//! upgrade a decision; a downgrade is ignored and logged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{CacheManager, KEY_TYPE_GRANT, KEY_TYPE_RELATION, KeyComponent};
use crate::domain::descriptor::{CacheProfile, EntityDescriptor, Membership};
use crate::domain::entities::Record;
use crate::domain::types::{ActorId, Capability, Relation};

use super::hooks::{EntityEvent, ExtensionRegistry, HookError, HookEvent, HookName, Listener};
use super::repos::{RelationalStore, RepoError};

pub(crate) const METRIC_GRANT_DECISION: &str = "tenantry_grant_decision_total";

/// Namespace holding relation and grant decisions for every entity type.
pub const DECISION_CACHE: CacheProfile = CacheProfile {
    namespace: "authz",
    label: "Authorization",
    default_ttl: Duration::from_secs(60),
    key_types: &[
        (KEY_TYPE_RELATION, "authz_relation"),
        (KEY_TYPE_GRANT, "authz_grant"),
    ],
    known_prefixes: &["authz_relation", "authz_grant"],
};

/// Context handed to every `<entity>.can*` subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrantContext {
    pub entity: &'static str,
    pub capability: Capability,
    pub actor: ActorId,
    pub entity_id: i64,
    /// Relation computed before the chain ran; never grants on its own here.
    pub relation: Relation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "relation")]
pub enum GrantSource {
    Relation(Relation),
    External,
    Denied,
}

impl GrantSource {
    fn as_str(self) -> &'static str {
        match self {
            GrantSource::Relation(_) => "relation",
            GrantSource::External => "external",
            GrantSource::Denied => "denied",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantDecision {
    pub granted: bool,
    pub source: GrantSource,
}

impl GrantDecision {
    pub const DENIED: GrantDecision = GrantDecision {
        granted: false,
        source: GrantSource::Denied,
    };

    fn from_chain(granted: bool) -> Self {
        if granted {
            Self {
                granted,
                source: GrantSource::External,
            }
        } else {
            Self::DENIED
        }
    }
}

/// Ambient accessor for the actor of the current request.
pub trait CurrentActor: Send + Sync {
    fn current(&self) -> Option<ActorId>;
}

#[derive(Debug, Clone, Copy)]
pub struct FixedActor(pub ActorId);

impl CurrentActor for FixedActor {
    fn current(&self) -> Option<ActorId> {
        Some(self.0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl CurrentActor for Anonymous {
    fn current(&self) -> Option<ActorId> {
        None
    }
}

/// Computes the module-local relation of an actor to one record.
#[async_trait]
pub trait RelationSource: Send + Sync {
    async fn relation(
        &self,
        entity: &'static EntityDescriptor,
        actor: ActorId,
        entity_id: i64,
    ) -> Result<Relation, RepoError>;
}

/// Reads the relation from the descriptor's [`RelationRules`].
///
/// [`RelationRules`]: crate::domain::descriptor::RelationRules
pub struct DescriptorRelations {
    db: Arc<dyn RelationalStore>,
}

impl DescriptorRelations {
    pub fn new(db: Arc<dyn RelationalStore>) -> Self {
        Self { db }
    }

    async fn is_member(
        &self,
        membership: &Membership,
        key: i64,
        actor: ActorId,
    ) -> Result<bool, RepoError> {
        let mut conditions = Record::new()
            .with(membership.entity_field, key)
            .with(membership.actor_field, actor.get());
        if let Some(flag) = membership.flag_field {
            conditions.insert(flag, Value::Bool(true));
        }
        let rows = self
            .db
            .select_where(membership.source, &conditions, Some(1))
            .await?;
        Ok(!rows.is_empty())
    }
}

#[async_trait]
impl RelationSource for DescriptorRelations {
    async fn relation(
        &self,
        entity: &'static EntityDescriptor,
        actor: ActorId,
        entity_id: i64,
    ) -> Result<Relation, RepoError> {
        let rules = entity.relations;
        let Some(record) = self.db.select_by_id(entity, entity_id).await? else {
            return Ok(Relation::None);
        };

        if let Some(owner) = rules.owner_field
            && record.get_i64(owner) == Some(actor.get())
        {
            return Ok(Relation::Owner);
        }

        if let (Some(unit_field), Some(admins)) = (rules.unit_field, rules.unit_admins)
            && let Some(unit) = record.get_i64(unit_field)
            && self.is_member(&admins, unit, actor).await?
        {
            return Ok(Relation::Administrator);
        }

        if let Some(members) = rules.members
            && self.is_member(&members, entity_id, actor).await?
        {
            return Ok(Relation::Member);
        }

        Ok(Relation::None)
    }
}

pub struct Authorizer {
    cache: Arc<CacheManager>,
    relations: Arc<dyn RelationSource>,
    hooks: Arc<ExtensionRegistry>,
    actor: Arc<dyn CurrentActor>,
}

impl Authorizer {
    pub fn new(
        cache: Arc<CacheManager>,
        relations: Arc<dyn RelationSource>,
        hooks: Arc<ExtensionRegistry>,
        actor: Arc<dyn CurrentActor>,
    ) -> Self {
        Self {
            cache,
            relations,
            hooks,
            actor,
        }
    }

    /// Same resolver with a different ambient actor; caches are shared.
    pub fn with_actor(&self, actor: Arc<dyn CurrentActor>) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            relations: Arc::clone(&self.relations),
            hooks: Arc::clone(&self.hooks),
            actor,
        }
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub async fn can(
        &self,
        entity: &'static EntityDescriptor,
        capability: Capability,
        entity_id: i64,
    ) -> bool {
        self.decide(entity, capability, entity_id).await.granted
    }

    /// Decision for the current actor; anonymous callers are denied outright.
    pub async fn decide(
        &self,
        entity: &'static EntityDescriptor,
        capability: Capability,
        entity_id: i64,
    ) -> GrantDecision {
        let decision = match self.actor.current() {
            Some(actor) => self.resolve(actor, entity, capability, entity_id).await,
            None => GrantDecision::DENIED,
        };
        counter!(METRIC_GRANT_DECISION, "source" => decision.source.as_str()).increment(1);
        decision
    }

    async fn resolve(
        &self,
        actor: ActorId,
        entity: &'static EntityDescriptor,
        capability: Capability,
        entity_id: i64,
    ) -> GrantDecision {
        let relation = self.relation(actor, entity, entity_id).await;
        if relation.grants(capability) {
            return GrantDecision {
                granted: true,
                source: GrantSource::Relation(relation),
            };
        }

        let key = [
            KeyComponent::from(actor),
            KeyComponent::from(entity.name),
            KeyComponent::from(capability),
            KeyComponent::from(entity_id),
        ];
        if let Some(granted) = self.cache.get::<bool>(KEY_TYPE_GRANT, &key).await {
            return GrantDecision::from_chain(granted);
        }

        let context = GrantContext {
            entity: entity.name,
            capability,
            actor,
            entity_id,
            relation,
        };
        let hook = HookName::new(entity.name, HookEvent::Can(capability));
        let granted = self
            .hooks
            .grants
            .publish_with(&hook, false, &context, |subscriber, previous, next| {
                if previous && !next {
                    warn!(
                        hook = %hook,
                        subscriber,
                        actor = %actor,
                        entity_id,
                        result = "downgrade_ignored",
                        "Grant subscriber tried to revoke access"
                    );
                    return previous;
                }
                next
            })
            .await;

        self.cache
            .set(KEY_TYPE_GRANT, &granted, Some(self.cache.config().grant_ttl()), &key)
            .await;
        debug!(hook = %hook, actor = %actor, entity_id, granted, "Resolved external grant");
        GrantDecision::from_chain(granted)
    }

    async fn relation(
        &self,
        actor: ActorId,
        entity: &'static EntityDescriptor,
        entity_id: i64,
    ) -> Relation {
        let key = [
            KeyComponent::from(actor),
            KeyComponent::from(entity.name),
            KeyComponent::from(entity_id),
        ];
        if let Some(relation) = self.cache.get::<Relation>(KEY_TYPE_RELATION, &key).await {
            return relation;
        }

        match self.relations.relation(entity, actor, entity_id).await {
            Ok(relation) => {
                self.cache
                    .set(
                        KEY_TYPE_RELATION,
                        &relation,
                        Some(self.cache.config().relation_ttl()),
                        &key,
                    )
                    .await;
                relation
            }
            Err(err) => {
                warn!(
                    entity = entity.name,
                    actor = %actor,
                    entity_id,
                    error = %err,
                    result = "no_contribution",
                    "Relation lookup failed"
                );
                Relation::None
            }
        }
    }

    /// Drops every cached relation and grant for `actor`.
    pub async fn invalidate_actor(&self, actor: ActorId) -> bool {
        let leading = [KeyComponent::from(actor)];
        let grants = self.cache.invalidate_prefix(KEY_TYPE_GRANT, &leading).await;
        let relations = self
            .cache
            .invalidate_prefix(KEY_TYPE_RELATION, &leading)
            .await;
        grants && relations
    }

    pub async fn invalidate_all(&self) -> bool {
        clear_decisions(&self.cache).await
    }
}

/// Clears both decision caches held in `cache`.
pub async fn clear_decisions(cache: &CacheManager) -> bool {
    let grants = cache.clear(Some(KEY_TYPE_GRANT)).await;
    let relations = cache.clear(Some(KEY_TYPE_RELATION)).await;
    grants && relations
}

/// Drops cached decisions whenever a record that relations are computed
/// from changes.
pub struct DecisionInvalidation {
    cache: Arc<CacheManager>,
}

impl DecisionInvalidation {
    pub fn new(cache: Arc<CacheManager>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Listener<EntityEvent> for DecisionInvalidation {
    fn name(&self) -> &str {
        "authz.decision_invalidation"
    }

    async fn notify(&self, event: &EntityEvent) -> Result<(), HookError> {
        if clear_decisions(&self.cache).await {
            Ok(())
        } else {
            Err(HookError::failed(
                self.name(),
                format!("decision cache not fully cleared after `{}` {}", event.entity, event.id),
            ))
        }
    }
}
