//! Descriptor-driven entity store.
//!
//! One implementation serves every entity type: the model only supplies its
//! descriptor. Reads are cache-first; every mutation invalidates the affected
//! cache entries before it returns and then notifies subscribers.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{CacheManager, KEY_TYPE_LIST, KEY_TYPE_RECORD, KeyComponent, PagedQuery};
use crate::domain::descriptor::EntityDescriptor;
use crate::domain::entities::{FieldFormat, Record};
use crate::domain::types::{AccessScope, SortDirection};

use super::hooks::{EntityEvent, ExtensionRegistry, HookEvent, HookName, InsertContext};
use super::identity::{IdentityAssigner, IdentityOutcome};
use super::repos::{RelationalStore, RepoError, RowFilter, RowQuery};

pub const DEFAULT_PAGE_LIMIT: u64 = 20;
pub const MAX_PAGE_LIMIT: u64 = 200;

/// An entity type known to the store.
pub trait EntityModel: Send + Sync + 'static {
    fn descriptor(&self) -> &'static EntityDescriptor;

    fn name(&self) -> &'static str {
        self.descriptor().name
    }

    fn hook(&self, event: HookEvent) -> HookName {
        HookName::new(self.name(), event)
    }
}

/// Outcome of a successful create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Created {
    /// Effective primary key, after any identity assignment.
    pub id: i64,
    pub identity: IdentityOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub scope: AccessScope,
    pub offset: u64,
    pub limit: Option<u64>,
    pub search: Option<String>,
    pub sort_column: Option<String>,
    pub sort_direction: SortDirection,
    /// Equality filters on declared columns.
    pub filters: Record,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub records: Vec<Record>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

pub struct EntityStore<M: EntityModel> {
    model: M,
    db: Arc<dyn RelationalStore>,
    cache: Arc<CacheManager>,
    hooks: Arc<ExtensionRegistry>,
    identity: Arc<IdentityAssigner>,
}

impl<M: EntityModel> EntityStore<M> {
    pub fn new(
        model: M,
        db: Arc<dyn RelationalStore>,
        cache: Arc<CacheManager>,
        hooks: Arc<ExtensionRegistry>,
        identity: Arc<IdentityAssigner>,
    ) -> Self {
        Self {
            model,
            db,
            cache,
            hooks,
            identity,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn descriptor(&self) -> &'static EntityDescriptor {
        self.model.descriptor()
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    /// Cache-first lookup by primary key.
    pub async fn find(&self, id: i64) -> Result<Option<Record>, RepoError> {
        let key = [KeyComponent::from(id)];
        if let Some(record) = self.cache.get::<Record>(KEY_TYPE_RECORD, &key).await {
            return Ok(Some(record));
        }

        let record = self.db.select_by_id(self.descriptor(), id).await?;
        if let Some(record) = &record {
            self.cache.set(KEY_TYPE_RECORD, record, None, &key).await;
        }
        Ok(record)
    }

    /// Lookup by a unique declared field such as an external identifier.
    pub async fn find_by(
        &self,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<Option<Record>, RepoError> {
        let descriptor = self.descriptor();
        if field != descriptor.primary_key && !descriptor.field(field).is_some_and(|f| f.unique) {
            return Err(RepoError::invalid_input(format!(
                "`{field}` is not a unique field of `{}`",
                descriptor.name
            )));
        }
        let value = descriptor.lookup_value(field, value.into())?;
        let conditions = Record::new().with(field, value);
        let record = self
            .db
            .select_where(descriptor, &conditions, Some(1))
            .await?
            .into_iter()
            .next();

        if let Some(record) = &record
            && let Some(id) = record.get_i64(descriptor.primary_key)
        {
            self.cache
                .set(KEY_TYPE_RECORD, record, None, &[id.into()])
                .await;
        }
        Ok(record)
    }

    /// Paginated listing, cached per query shape with the short paged TTL.
    pub async fn list(&self, query: &ListQuery) -> Result<Page, RepoError> {
        let descriptor = self.descriptor();
        let limit = query
            .limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT);

        if let Some(column) = query.sort_column.as_deref()
            && !descriptor.is_sortable(column)
        {
            return Err(RepoError::invalid_input(format!(
                "cannot sort `{}` by `{column}`",
                descriptor.name
            )));
        }

        let filter = self.scoped_filter(query.scope, &query.filters, query.search.clone())?;
        let paged = PagedQuery {
            access_scope: query.scope,
            offset: query.offset,
            limit,
            search: filter.search_term().map(str::to_string),
            sort_column: query.sort_column.clone(),
            sort_direction: query.sort_direction,
            extra: query
                .filters
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect::<BTreeMap<_, _>>(),
        };

        if let Some(page) = self
            .cache
            .get_paged_result::<Page>(descriptor.name, &paged)
            .await
        {
            return Ok(page);
        }

        let total = self.db.count_where(descriptor, &filter).await?;
        let rows = RowQuery {
            filter,
            sort_column: query.sort_column.clone(),
            sort_direction: query.sort_direction,
            offset: query.offset,
            limit,
        };
        let records = self.db.select_page(descriptor, &rows).await?;
        let page = Page {
            records,
            total,
            offset: query.offset,
            limit,
        };

        self.cache
            .set_paged_result(descriptor.name, &paged, &page)
            .await;
        Ok(page)
    }

    /// Number of rows matching `filters`, cached under the list key type.
    pub async fn count(&self, filters: &Record) -> Result<u64, RepoError> {
        let descriptor = self.descriptor();
        let filter = self.scoped_filter(AccessScope::All, filters, None)?;
        let key = [
            KeyComponent::from("count"),
            KeyComponent::Json(Value::Object(filters.clone().into_inner())),
        ];
        if let Some(count) = self.cache.get::<u64>(KEY_TYPE_LIST, &key).await {
            return Ok(count);
        }
        let count = self.db.count_where(descriptor, &filter).await?;
        self.cache.set(KEY_TYPE_LIST, &count, None, &key).await;
        Ok(count)
    }

    /// Creates a record from `data`.
    ///
    /// The payload is restricted to create-writable fields and passed through
    /// `<entity>.beforeInsert`. A primary key injected by a subscriber is
    /// removed before the insert and applied afterwards through identity
    /// assignment; a conflicting request keeps the store-assigned key and is
    /// reported in `Created::identity`.
    pub async fn create(&self, data: &Record) -> Result<Created, RepoError> {
        let descriptor = self.descriptor();
        let payload = descriptor.insert_payload(data)?;
        let context = InsertContext {
            entity: descriptor.name,
            data: data.clone(),
        };
        let mut payload = self
            .hooks
            .payloads
            .publish(&self.model.hook(HookEvent::BeforeInsert), payload, &context)
            .await;

        let requested = match payload.remove(descriptor.primary_key) {
            Some(value) => FieldFormat::Integer
                .coerce(descriptor.primary_key, value)?
                .as_i64(),
            None => None,
        };

        let id = self.db.insert(descriptor, &payload).await?;
        let identity = match requested {
            Some(target) => match self.identity.reassign(descriptor, id, target).await {
                Ok(identity) => identity,
                Err(err) => {
                    self.discard(id).await;
                    return Err(err);
                }
            },
            None => IdentityOutcome::Unchanged { id },
        };
        let effective = identity.id();

        self.invalidate(&[id, effective]).await;

        payload.insert(descriptor.primary_key, effective);
        self.notify(HookEvent::Created, effective, payload).await;

        debug!(entity = descriptor.name, id = effective, "Created record");
        Ok(Created {
            id: effective,
            identity,
        })
    }

    /// Writes the mutable fields present in `data`.
    pub async fn update(&self, id: i64, data: &Record) -> Result<(), RepoError> {
        let descriptor = self.descriptor();
        let payload = descriptor.update_payload(data)?;
        if payload.is_empty() {
            return Err(RepoError::invalid_input(format!(
                "no mutable fields of `{}` supplied",
                descriptor.name
            )));
        }

        let affected = self.db.update(descriptor, id, &payload).await?;
        self.invalidate(&[id]).await;
        if affected == 0 {
            return Err(RepoError::NotFound);
        }

        self.notify(HookEvent::Updated, id, payload).await;
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> Result<(), RepoError> {
        let descriptor = self.descriptor();
        let affected = self.db.delete(descriptor, id).await?;
        self.invalidate(&[id]).await;
        if affected == 0 {
            return Err(RepoError::NotFound);
        }

        let record = Record::new().with(descriptor.primary_key, id);
        self.notify(HookEvent::Deleted, id, record).await;
        Ok(())
    }

    /// Moves an existing record to `requested`, see [`IdentityAssigner::reassign`].
    pub async fn reassign_identity(
        &self,
        from: i64,
        requested: i64,
    ) -> Result<IdentityOutcome, RepoError> {
        let outcome = self
            .identity
            .reassign(self.descriptor(), from, requested)
            .await?;
        self.invalidate(&[from, requested]).await;

        // Anything derived from the old key, cached relations included, is stale.
        if let IdentityOutcome::Reassigned { to, .. } = outcome {
            let record = Record::new().with(self.descriptor().primary_key, to);
            self.notify(HookEvent::Updated, to, record).await;
        }
        Ok(outcome)
    }

    /// Removes a row whose create did not complete.
    pub(crate) async fn discard(&self, id: i64) {
        let descriptor = self.descriptor();
        if let Err(err) = self.db.delete(descriptor, id).await {
            warn!(
                entity = descriptor.name,
                id,
                error = %err,
                result = "orphaned",
                "Failed to remove partially created record"
            );
        }
        self.invalidate(&[id]).await;
    }

    /// Drops every cache entry a mutation of `ids` could have made stale.
    pub async fn invalidate(&self, ids: &[i64]) {
        for id in ids {
            self.cache.delete(KEY_TYPE_RECORD, &[(*id).into()]).await;
        }
        self.cache.clear(Some(KEY_TYPE_LIST)).await;
        self.cache
            .invalidate_paged_result(self.descriptor().name, None)
            .await;
    }

    async fn notify(&self, event: HookEvent, id: i64, record: Record) {
        let event_payload = EntityEvent {
            entity: self.descriptor().name,
            id,
            record,
        };
        self.hooks
            .events
            .publish(&self.model.hook(event), &event_payload)
            .await;
    }

    fn scoped_filter(
        &self,
        scope: AccessScope,
        filters: &Record,
        search: Option<String>,
    ) -> Result<RowFilter, RepoError> {
        let descriptor = self.descriptor();
        let mut conditions = Record::new();
        for (name, value) in filters.iter() {
            conditions.insert(name.clone(), descriptor.lookup_value(name, value.clone())?);
        }

        let scoped = match scope {
            AccessScope::All => None,
            AccessScope::Owner(actor) => Some((descriptor.relations.owner_field, actor.get())),
            AccessScope::Unit(unit) => Some((descriptor.relations.unit_field, unit)),
        };
        if let Some((field, value)) = scoped {
            let field = field.ok_or_else(|| {
                RepoError::invalid_input(format!(
                    "`{}` cannot be scoped by {}",
                    descriptor.name,
                    scope.as_component()
                ))
            })?;
            conditions.insert(field, value);
        }

        Ok(RowFilter { conditions, search })
    }
}
