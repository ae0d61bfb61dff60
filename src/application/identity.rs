//! Deterministic identity assignment.
//!
//! Rewrites a freshly created record (and everything referencing it) to a
//! caller-chosen primary key. Intended for fixture and seed loading only:
//! assignments through one assigner are serialized, but concurrent assigners
//! in other processes must be serialized by the caller.

use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::descriptor::EntityDescriptor;
use crate::domain::entities::Record;

use super::repos::{KeyReassignment, RelationalStore, RepoError};
use super::store::{Created, EntityModel, EntityStore};

pub(crate) const METRIC_IDENTITY_CONFLICT: &str = "tenantry_identity_conflict_total";

/// Result of asking for a specific primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IdentityOutcome {
    /// The store-assigned key was kept because no other key was requested,
    /// or the requested key equals it.
    Unchanged { id: i64 },
    Reassigned { from: i64, to: i64 },
    /// The requested key is occupied; the record keeps `kept`.
    Conflict { requested: i64, kept: i64 },
}

impl IdentityOutcome {
    /// Key the record carries after the assignment.
    pub fn id(&self) -> i64 {
        match *self {
            IdentityOutcome::Unchanged { id } => id,
            IdentityOutcome::Reassigned { to, .. } => to,
            IdentityOutcome::Conflict { kept, .. } => kept,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, IdentityOutcome::Conflict { .. })
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("entity `{entity}` has no actor link")]
    MissingActorLink { entity: &'static str },
}

/// An actor and the entity record linked to it.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedCreated {
    pub actor: IdentityOutcome,
    pub entity: Created,
}

impl LinkedCreated {
    pub fn actor_id(&self) -> i64 {
        self.actor.id()
    }
}

pub struct IdentityAssigner {
    db: Arc<dyn RelationalStore>,
    serial: Mutex<()>,
}

impl IdentityAssigner {
    pub fn new(db: Arc<dyn RelationalStore>) -> Self {
        Self {
            db,
            serial: Mutex::new(()),
        }
    }

    /// Moves `table` row `from` to `requested`, rewriting every dependent
    /// foreign key in the same unit of work. An occupied target is reported
    /// as a conflict and leaves the row untouched.
    pub async fn reassign(
        &self,
        table: &EntityDescriptor,
        from: i64,
        requested: i64,
    ) -> Result<IdentityOutcome, RepoError> {
        if from == requested {
            return Ok(IdentityOutcome::Unchanged { id: from });
        }

        let _serial = self.serial.lock().await;

        if self.db.exists(table, requested).await? {
            return Ok(conflict(table, requested, from));
        }

        let change = KeyReassignment {
            table,
            from,
            to: requested,
            dependents: table.dependents,
        };
        match self.db.reassign_key(&change).await {
            Ok(rewritten) => {
                info!(
                    table = table.table,
                    from,
                    to = requested,
                    dependents_rewritten = rewritten,
                    "Reassigned primary key"
                );
                Ok(IdentityOutcome::Reassigned {
                    from,
                    to: requested,
                })
            }
            Err(RepoError::Duplicate { .. }) => Ok(conflict(table, requested, from)),
            Err(err) => Err(err),
        }
    }

    /// Creates an actor, moves it to `requested` when asked, then creates the
    /// entity record linked to the actor's effective key.
    ///
    /// A conflicting request keeps the store-assigned actor key; the entity is
    /// still created and linked to it, and the conflict is reported in
    /// `LinkedCreated::actor`. When the entity cannot be created the actor is
    /// removed again, so a failed call leaves no rows behind.
    pub async fn create_linked<A, M>(
        &self,
        actors: &EntityStore<A>,
        entities: &EntityStore<M>,
        actor_data: &Record,
        entity_data: &Record,
        requested: Option<i64>,
    ) -> Result<LinkedCreated, IdentityError>
    where
        A: EntityModel,
        M: EntityModel,
    {
        let descriptor = entities.descriptor();
        let link = descriptor
            .actor_link
            .ok_or(IdentityError::MissingActorLink {
                entity: descriptor.name,
            })?;

        let created = actors.create(actor_data).await?;
        let actor = match requested {
            Some(target) => match actors.reassign_identity(created.id, target).await {
                Ok(actor) => actor,
                Err(err) => {
                    actors.discard(created.id).await;
                    return Err(err.into());
                }
            },
            None => created.identity,
        };

        let mut data = entity_data.clone();
        data.insert(link.field, actor.id());
        let entity = match entities.create(&data).await {
            Ok(entity) => entity,
            Err(err) => {
                actors.discard(actor.id()).await;
                return Err(err.into());
            }
        };

        Ok(LinkedCreated { actor, entity })
    }
}

fn conflict(table: &EntityDescriptor, requested: i64, kept: i64) -> IdentityOutcome {
    counter!(METRIC_IDENTITY_CONFLICT, "table" => table.table).increment(1);
    warn!(
        table = table.table,
        requested,
        kept,
        result = "conflict",
        "Requested primary key is occupied; keeping store-assigned key"
    );
    IdentityOutcome::Conflict { requested, kept }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_id_follows_outcome() {
        assert_eq!(IdentityOutcome::Unchanged { id: 3 }.id(), 3);
        assert_eq!(IdentityOutcome::Reassigned { from: 3, to: 500 }.id(), 500);
        let conflict = IdentityOutcome::Conflict {
            requested: 500,
            kept: 3,
        };
        assert_eq!(conflict.id(), 3);
        assert!(conflict.is_conflict());
    }
}
