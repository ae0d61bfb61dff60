//! Employees of a unit. Each staff record links to exactly one actor.

use std::time::Duration;

use crate::application::store::EntityModel;
use crate::cache::{KEY_TYPE_LIST, KEY_TYPE_PAGED, KEY_TYPE_RECORD};
use crate::domain::descriptor::{
    ActorLink, CacheProfile, EntityDescriptor, FieldSpec, Membership, RelationRules,
};
use crate::domain::entities::FieldFormat;

pub const NAME: &str = "staff";

/// Staff flagged as administrators of their unit.
pub const UNIT_ADMINS: Membership =
    Membership::new(&DESCRIPTOR, "unit_id", "actor_id").flagged("is_admin");

pub static DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    name: NAME,
    table: "staff",
    primary_key: "id",
    fields: &[
        FieldSpec::create_only("actor_id", FieldFormat::Integer).unique(),
        FieldSpec::mutable("unit_id", FieldFormat::Integer),
        FieldSpec::mutable("title", FieldFormat::Text).searchable(),
        FieldSpec::mutable("is_admin", FieldFormat::Boolean),
    ],
    created_at: Some("created_at"),
    updated_at: Some("updated_at"),
    cache: CacheProfile {
        namespace: "staff",
        label: "Staff member",
        default_ttl: Duration::ZERO,
        key_types: &[
            (KEY_TYPE_RECORD, "staff"),
            (KEY_TYPE_LIST, "staff_list"),
            (KEY_TYPE_PAGED, "staff_paged"),
        ],
        known_prefixes: &["staff", "staff_list", "staff_paged"],
    },
    actor_link: Some(ActorLink { field: "actor_id" }),
    dependents: &[],
    relations: RelationRules {
        owner_field: Some("actor_id"),
        unit_field: Some("unit_id"),
        unit_admins: Some(
            Membership::new(&DESCRIPTOR, "unit_id", "actor_id").flagged("is_admin"),
        ),
        members: None,
    },
};

#[derive(Debug, Clone, Copy, Default)]
pub struct Staff;

impl EntityModel for Staff {
    fn descriptor(&self) -> &'static EntityDescriptor {
        &DESCRIPTOR
    }
}
