//! `<entity>.beforeInsert` subscriber honouring caller-requested keys.
//!
//! The insert payload never carries a primary key; this subscriber copies
//! the key from the caller's data back into the payload so the store applies
//! it through identity assignment. Install it only for fixture loading.

use std::sync::Arc;

use async_trait::async_trait;

use crate::application::hooks::{
    ExtensionRegistry, Filter, HookError, HookEvent, HookName, InsertContext,
};
use crate::domain::descriptor::EntityDescriptor;
use crate::domain::entities::Record;

pub struct FixtureIdentities {
    primary_key: &'static str,
}

impl FixtureIdentities {
    pub const NAME: &'static str = "fixtures.requested_identity";

    pub fn new(primary_key: &'static str) -> Self {
        Self { primary_key }
    }

    pub fn install(hooks: &ExtensionRegistry, entities: &[&'static EntityDescriptor]) {
        for entity in entities {
            hooks.payloads.add_filter(
                HookName::new(entity.name, HookEvent::BeforeInsert),
                Arc::new(Self::new(entity.primary_key)),
            );
        }
    }
}

#[async_trait]
impl Filter<Record, InsertContext> for FixtureIdentities {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn apply(&self, mut payload: Record, context: &InsertContext) -> Result<Record, HookError> {
        if let Some(requested) = context.data.get(self.primary_key)
            && !requested.is_null()
        {
            payload.insert(self.primary_key, requested.clone());
        }
        Ok(payload)
    }
}
