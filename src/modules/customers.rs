//! Customers served by a unit. Each customer record links to one actor.

use std::time::Duration;

use crate::application::store::EntityModel;
use crate::cache::{KEY_TYPE_LIST, KEY_TYPE_PAGED, KEY_TYPE_RECORD};
use crate::domain::descriptor::{
    ActorLink, CacheProfile, EntityDescriptor, FieldSpec, RelationRules,
};
use crate::domain::entities::FieldFormat;

use super::staff;

pub const NAME: &str = "customer";

pub static DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    name: NAME,
    table: "customers",
    primary_key: "id",
    fields: &[
        FieldSpec::create_only("actor_id", FieldFormat::Integer).unique(),
        FieldSpec::mutable("unit_id", FieldFormat::Integer),
        FieldSpec::mutable("name", FieldFormat::Text).searchable(),
        FieldSpec::mutable("email", FieldFormat::Text)
            .unique()
            .searchable(),
        FieldSpec::mutable("notes", FieldFormat::Text),
    ],
    created_at: Some("created_at"),
    updated_at: Some("updated_at"),
    cache: CacheProfile {
        namespace: "customers",
        label: "Customer",
        default_ttl: Duration::ZERO,
        key_types: &[
            (KEY_TYPE_RECORD, "customer"),
            (KEY_TYPE_LIST, "customer_list"),
            (KEY_TYPE_PAGED, "customer_paged"),
        ],
        known_prefixes: &["customer", "customer_list", "customer_paged"],
    },
    actor_link: Some(ActorLink { field: "actor_id" }),
    dependents: &[],
    relations: RelationRules {
        owner_field: Some("actor_id"),
        unit_field: Some("unit_id"),
        unit_admins: Some(staff::UNIT_ADMINS),
        members: None,
    },
};

#[derive(Debug, Clone, Copy, Default)]
pub struct Customers;

impl EntityModel for Customers {
    fn descriptor(&self) -> &'static EntityDescriptor {
        &DESCRIPTOR
    }
}
