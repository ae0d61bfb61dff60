//! Shared actor records; staff and customers link to one actor each.

use std::time::Duration;

use crate::application::store::EntityModel;
use crate::cache::{KEY_TYPE_LIST, KEY_TYPE_PAGED, KEY_TYPE_RECORD};
use crate::domain::descriptor::{
    CacheProfile, EntityDescriptor, FieldSpec, ForeignKey, RelationRules,
};
use crate::domain::entities::FieldFormat;

pub const NAME: &str = "actor";

pub static DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    name: NAME,
    table: "actors",
    primary_key: "id",
    fields: &[
        FieldSpec::mutable("display_name", FieldFormat::Text).searchable(),
        FieldSpec::create_only("kind", FieldFormat::Text),
        FieldSpec::mutable("active", FieldFormat::Boolean),
    ],
    created_at: Some("created_at"),
    updated_at: Some("updated_at"),
    cache: CacheProfile {
        namespace: "actors",
        label: "Actor",
        default_ttl: Duration::ZERO,
        key_types: &[
            (KEY_TYPE_RECORD, "actor"),
            (KEY_TYPE_LIST, "actor_list"),
            (KEY_TYPE_PAGED, "actor_paged"),
        ],
        known_prefixes: &["actor", "actor_list", "actor_paged"],
    },
    actor_link: None,
    dependents: &[
        ForeignKey::new("organizations", "owner_id"),
        ForeignKey::new("staff", "actor_id"),
        ForeignKey::new("customers", "actor_id"),
    ],
    relations: RelationRules {
        owner_field: Some("id"),
        ..RelationRules::NONE
    },
};

#[derive(Debug, Clone, Copy, Default)]
pub struct Actors;

impl EntityModel for Actors {
    fn descriptor(&self) -> &'static EntityDescriptor {
        &DESCRIPTOR
    }
}
