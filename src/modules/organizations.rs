//! Tenants. Creating one provisions its default unit.

use std::time::Duration;

use crate::application::store::EntityModel;
use crate::cache::{KEY_TYPE_LIST, KEY_TYPE_PAGED, KEY_TYPE_RECORD};
use crate::domain::descriptor::{
    CacheProfile, EntityDescriptor, FieldSpec, ForeignKey, RelationRules,
};
use crate::domain::entities::FieldFormat;

pub const NAME: &str = "organization";

pub static DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    name: NAME,
    table: "organizations",
    primary_key: "id",
    fields: &[
        FieldSpec::mutable("name", FieldFormat::Text).searchable(),
        FieldSpec::create_only("external_ref", FieldFormat::Text).unique(),
        FieldSpec::mutable("owner_id", FieldFormat::Integer),
        FieldSpec::mutable("settings", FieldFormat::Json),
    ],
    created_at: Some("created_at"),
    updated_at: Some("updated_at"),
    cache: CacheProfile {
        namespace: "organizations",
        label: "Organization",
        default_ttl: Duration::ZERO,
        key_types: &[
            (KEY_TYPE_RECORD, "organization"),
            (KEY_TYPE_LIST, "organization_list"),
            (KEY_TYPE_PAGED, "organization_paged"),
        ],
        known_prefixes: &["organization", "organization_list", "organization_paged"],
    },
    actor_link: None,
    dependents: &[ForeignKey::new("units", "organization_id")],
    relations: RelationRules {
        owner_field: Some("owner_id"),
        ..RelationRules::NONE
    },
};

#[derive(Debug, Clone, Copy, Default)]
pub struct Organizations;

impl EntityModel for Organizations {
    fn descriptor(&self) -> &'static EntityDescriptor {
        &DESCRIPTOR
    }
}
