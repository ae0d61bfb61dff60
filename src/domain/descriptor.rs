//! Declarative entity descriptors.
//!
//! A descriptor is the single source of truth for one entity type: where it
//! is stored, which columns callers may write, how values are formatted, how
//! it is cached and how actors relate to it.

use std::time::Duration;

use serde_json::Value;

use super::entities::{FieldFormat, Record, now_timestamp};
use super::error::DomainError;

/// Who may write a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldAccess {
    /// Writable on create and update.
    Mutable,
    /// Writable on create only (external identifiers, actor links).
    CreateOnly,
    /// Maintained by the store.
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub format: FieldFormat,
    pub access: FieldAccess,
    pub unique: bool,
    pub searchable: bool,
}

impl FieldSpec {
    pub const fn mutable(name: &'static str, format: FieldFormat) -> Self {
        Self {
            name,
            format,
            access: FieldAccess::Mutable,
            unique: false,
            searchable: false,
        }
    }

    pub const fn create_only(name: &'static str, format: FieldFormat) -> Self {
        Self {
            name,
            format,
            access: FieldAccess::CreateOnly,
            unique: false,
            searchable: false,
        }
    }

    pub const fn system(name: &'static str, format: FieldFormat) -> Self {
        Self {
            name,
            format,
            access: FieldAccess::System,
            unique: false,
            searchable: false,
        }
    }

    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub const fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }

    pub fn writable_on_create(&self) -> bool {
        matches!(self.access, FieldAccess::Mutable | FieldAccess::CreateOnly)
    }

    pub fn writable_on_update(&self) -> bool {
        self.access == FieldAccess::Mutable
    }
}

/// A column in another table that stores this entity's primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: &'static str,
    pub column: &'static str,
}

impl ForeignKey {
    pub const fn new(table: &'static str, column: &'static str) -> Self {
        Self { table, column }
    }
}

/// The unique 1:1 reference from an entity record to its actor record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorLink {
    pub field: &'static str,
}

/// Rows of another entity listing which actors belong to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Membership {
    pub source: &'static EntityDescriptor,
    pub entity_field: &'static str,
    pub actor_field: &'static str,
    /// Extra boolean column that must be true for the row to count.
    pub flag_field: Option<&'static str>,
}

impl Membership {
    pub const fn new(
        source: &'static EntityDescriptor,
        entity_field: &'static str,
        actor_field: &'static str,
    ) -> Self {
        Self {
            source,
            entity_field,
            actor_field,
            flag_field: None,
        }
    }

    pub const fn flagged(mut self, flag_field: &'static str) -> Self {
        self.flag_field = Some(flag_field);
        self
    }
}

/// How the module-local relation of an actor to a record is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelationRules {
    /// Column holding the owning actor.
    pub owner_field: Option<&'static str>,
    /// Column holding the owning unit, consulted together with `unit_admins`.
    pub unit_field: Option<&'static str>,
    /// Administrators of the owning unit, keyed by unit id.
    pub unit_admins: Option<Membership>,
    /// Members of the record itself, keyed by record id.
    pub members: Option<Membership>,
}

impl RelationRules {
    pub const NONE: RelationRules = RelationRules {
        owner_field: None,
        unit_field: None,
        unit_admins: None,
        members: None,
    };
}

/// Per-entity cache configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheProfile {
    pub namespace: &'static str,
    /// Entity label used in diagnostics.
    pub label: &'static str,
    pub default_ttl: Duration,
    /// Logical key type to key prefix.
    pub key_types: &'static [(&'static str, &'static str)],
    /// Prefixes swept when the backend cannot clear a namespace wholesale.
    pub known_prefixes: &'static [&'static str],
}

impl CacheProfile {
    pub fn prefix<'a>(&self, key_type: &'a str) -> &'a str {
        self.key_types
            .iter()
            .find(|(logical, _)| *logical == key_type)
            .map(|(_, prefix)| *prefix)
            .unwrap_or(key_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDescriptor {
    /// Entity name used for hook names and diagnostics.
    pub name: &'static str,
    pub table: &'static str,
    pub primary_key: &'static str,
    pub fields: &'static [FieldSpec],
    pub created_at: Option<&'static str>,
    pub updated_at: Option<&'static str>,
    pub cache: CacheProfile,
    pub actor_link: Option<ActorLink>,
    /// Columns elsewhere that reference this entity's primary key.
    pub dependents: &'static [ForeignKey],
    pub relations: RelationRules,
}

impl EntityDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Storage format of any column, including the key and timestamps.
    pub fn column_format(&self, name: &str) -> Option<FieldFormat> {
        if name == self.primary_key {
            return Some(FieldFormat::Integer);
        }
        if self.created_at == Some(name) || self.updated_at == Some(name) {
            return Some(FieldFormat::Timestamp);
        }
        self.field(name).map(|field| field.format)
    }

    pub fn columns(&self) -> Vec<&'static str> {
        let mut columns = vec![self.primary_key];
        columns.extend(self.fields.iter().map(|field| field.name));
        columns.extend(self.created_at);
        columns.extend(self.updated_at);
        columns
    }

    pub fn mutable_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields
            .iter()
            .filter(|field| field.writable_on_update())
            .map(|field| field.name)
    }

    pub fn searchable_fields(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|field| field.searchable)
            .map(|field| field.name)
            .collect()
    }

    pub fn is_sortable(&self, column: &str) -> bool {
        self.column_format(column).is_some_and(|format| format != FieldFormat::Json)
    }

    /// Restricts caller data to create-writable fields, coerces values and
    /// stamps the timestamp columns. Unknown and system fields are dropped.
    pub fn insert_payload(&self, data: &Record) -> Result<Record, DomainError> {
        let mut payload = Record::new();
        for (name, value) in data.iter() {
            let Some(field) = self.field(name) else {
                continue;
            };
            if !field.writable_on_create() {
                continue;
            }
            payload.insert(field.name, field.format.coerce(field.name, value.clone())?);
        }
        if self.created_at.is_some() || self.updated_at.is_some() {
            let now = now_timestamp()?;
            for column in self.created_at.into_iter().chain(self.updated_at) {
                payload.insert(column, Value::String(now.clone()));
            }
        }
        Ok(payload)
    }

    /// Restricts caller data to mutable fields present in `data`.
    pub fn update_payload(&self, data: &Record) -> Result<Record, DomainError> {
        let mut payload = Record::new();
        for (name, value) in data.iter() {
            let Some(field) = self.field(name) else {
                continue;
            };
            if !field.writable_on_update() {
                continue;
            }
            payload.insert(field.name, field.format.coerce(field.name, value.clone())?);
        }
        if !payload.is_empty()
            && let Some(column) = self.updated_at
        {
            payload.insert(column, Value::String(now_timestamp()?));
        }
        Ok(payload)
    }

    /// Coerces a lookup value for `column`, rejecting undeclared columns.
    pub fn lookup_value(&self, column: &str, value: Value) -> Result<Value, DomainError> {
        let format = self
            .column_format(column)
            .ok_or_else(|| DomainError::unknown_field(self.name, column))?;
        format.coerce(column, value)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const FIELDS: &[FieldSpec] = &[
        FieldSpec::mutable("name", FieldFormat::Text).searchable(),
        FieldSpec::create_only("external_ref", FieldFormat::Text).unique(),
        FieldSpec::system("archived", FieldFormat::Boolean),
        FieldSpec::mutable("settings", FieldFormat::Json),
    ];

    const DESCRIPTOR: EntityDescriptor = EntityDescriptor {
        name: "widget",
        table: "widgets",
        primary_key: "id",
        fields: FIELDS,
        created_at: Some("created_at"),
        updated_at: Some("updated_at"),
        cache: CacheProfile {
            namespace: "widgets",
            label: "Widget",
            default_ttl: Duration::from_secs(60),
            key_types: &[("record", "widget"), ("list", "widget_list")],
            known_prefixes: &["widget", "widget_list"],
        },
        actor_link: None,
        dependents: &[],
        relations: RelationRules::NONE,
    };

    #[test]
    fn insert_payload_drops_unknown_and_system_fields() {
        let data = Record::new()
            .with("name", "Acme")
            .with("external_ref", "ext-1")
            .with("archived", true)
            .with("id", 99)
            .with("bogus", 1);
        let payload = DESCRIPTOR.insert_payload(&data).expect("payload");

        assert_eq!(payload.get_str("name"), Some("Acme"));
        assert_eq!(payload.get_str("external_ref"), Some("ext-1"));
        assert!(!payload.contains("archived"));
        assert!(!payload.contains("id"));
        assert!(!payload.contains("bogus"));
        assert!(payload.contains("created_at"));
        assert!(payload.contains("updated_at"));
    }

    #[test]
    fn update_payload_keeps_only_mutable_fields() {
        let data = Record::new().with("name", "Renamed").with("external_ref", "ext-2");
        let payload = DESCRIPTOR.update_payload(&data).expect("payload");
        assert_eq!(payload.get_str("name"), Some("Renamed"));
        assert!(!payload.contains("external_ref"));
        assert!(payload.contains("updated_at"));
    }

    #[test]
    fn update_payload_without_mutable_fields_is_empty() {
        let payload = DESCRIPTOR
            .update_payload(&Record::new().with("external_ref", "x"))
            .expect("payload");
        assert!(payload.is_empty());
    }

    #[test]
    fn sortable_columns_exclude_json_and_unknown() {
        assert!(DESCRIPTOR.is_sortable("id"));
        assert!(DESCRIPTOR.is_sortable("name"));
        assert!(DESCRIPTOR.is_sortable("created_at"));
        assert!(!DESCRIPTOR.is_sortable("settings"));
        assert!(!DESCRIPTOR.is_sortable("name; DROP TABLE widgets"));
    }

    #[test]
    fn prefix_falls_back_to_key_type() {
        assert_eq!(DESCRIPTOR.cache.prefix("list"), "widget_list");
        assert_eq!(DESCRIPTOR.cache.prefix("grant"), "grant");
    }

    #[test]
    fn lookup_value_rejects_undeclared_columns() {
        assert!(DESCRIPTOR.lookup_value("id", json!("12")).is_ok());
        assert!(DESCRIPTOR.lookup_value("password", json!("x")).is_err());
    }
}
