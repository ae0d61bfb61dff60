//! Shared domain enumerations and identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a login principal shared by every entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(i64);

impl ActorId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ActorId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Operation an actor asks to perform on one entity instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    View,
    Edit,
    Delete,
}

impl Capability {
    pub const ALL: [Capability; 3] = [Capability::View, Capability::Edit, Capability::Delete];

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::View => "view",
            Capability::Edit => "edit",
            Capability::Delete => "delete",
        }
    }

    /// Suffix used when naming the grant filter chain for this capability.
    pub fn hook_suffix(self) -> &'static str {
        match self {
            Capability::View => "canView",
            Capability::Edit => "canEdit",
            Capability::Delete => "canDelete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "view" => Some(Capability::View),
            "edit" => Some(Capability::Edit),
            "delete" => Some(Capability::Delete),
            _ => None,
        }
    }
}

/// Module-local relation between an actor and an entity instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Owner,
    Administrator,
    Member,
    None,
}

impl Relation {
    /// Owners and unit administrators hold every capability; members may only view.
    pub fn grants(self, capability: Capability) -> bool {
        match self {
            Relation::Owner | Relation::Administrator => true,
            Relation::Member => capability == Capability::View,
            Relation::None => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Relation::Owner => "owner",
            Relation::Administrator => "administrator",
            Relation::Member => "member",
            Relation::None => "none",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Visibility applied to list views; part of every paged cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessScope {
    #[default]
    All,
    Owner(ActorId),
    Unit(i64),
}

impl AccessScope {
    pub fn as_component(self) -> String {
        match self {
            AccessScope::All => "all".to_string(),
            AccessScope::Owner(actor) => format!("owner-{actor}"),
            AccessScope::Unit(unit) => format!("unit-{unit}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn members_only_view() {
        assert!(Relation::Member.grants(Capability::View));
        assert!(!Relation::Member.grants(Capability::Edit));
        assert!(!Relation::Member.grants(Capability::Delete));
        assert!(Relation::Administrator.grants(Capability::Delete));
        assert!(!Relation::None.grants(Capability::View));
    }

    #[test]
    fn capability_parse_matches_as_str() {
        for capability in Capability::ALL {
            assert_eq!(Capability::parse(capability.as_str()), Some(capability));
        }
        assert_eq!(Capability::parse("publish"), None);
    }

    #[test]
    fn access_scope_components_are_distinct() {
        assert_ne!(
            AccessScope::Owner(ActorId::new(7)).as_component(),
            AccessScope::Unit(7).as_component()
        );
        assert_eq!(AccessScope::All.as_component(), "all");
    }
}
