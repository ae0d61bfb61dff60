//! Sub-units of an organization; staff and customers belong to one.

use std::time::Duration;

use crate::application::store::EntityModel;
use crate::cache::{KEY_TYPE_LIST, KEY_TYPE_PAGED, KEY_TYPE_RECORD};
use crate::domain::descriptor::{
    CacheProfile, EntityDescriptor, FieldSpec, ForeignKey, Membership, RelationRules,
};
use crate::domain::entities::FieldFormat;

use super::staff;

pub const NAME: &str = "unit";

/// Name given to the unit provisioned with every organization.
pub const DEFAULT_UNIT_NAME: &str = "Main";

pub static DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    name: NAME,
    table: "units",
    primary_key: "id",
    fields: &[
        FieldSpec::create_only("organization_id", FieldFormat::Integer),
        FieldSpec::mutable("name", FieldFormat::Text).searchable(),
        FieldSpec::create_only("is_default", FieldFormat::Boolean),
    ],
    created_at: Some("created_at"),
    updated_at: Some("updated_at"),
    cache: CacheProfile {
        namespace: "units",
        label: "Unit",
        default_ttl: Duration::ZERO,
        key_types: &[
            (KEY_TYPE_RECORD, "unit"),
            (KEY_TYPE_LIST, "unit_list"),
            (KEY_TYPE_PAGED, "unit_paged"),
        ],
        known_prefixes: &["unit", "unit_list", "unit_paged"],
    },
    actor_link: None,
    dependents: &[
        ForeignKey::new("staff", "unit_id"),
        ForeignKey::new("customers", "unit_id"),
    ],
    relations: RelationRules {
        owner_field: None,
        unit_field: Some("id"),
        unit_admins: Some(staff::UNIT_ADMINS),
        members: Some(Membership::new(&staff::DESCRIPTOR, "unit_id", "actor_id")),
    },
};

#[derive(Debug, Clone, Copy, Default)]
pub struct Units;

impl EntityModel for Units {
    fn descriptor(&self) -> &'static EntityDescriptor {
        &DESCRIPTOR
    }
}
