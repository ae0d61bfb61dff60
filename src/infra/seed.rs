//! Fixture seeding from TOML.
//!
//! ```toml
//! [[organizations]]
//! id = 10
//! name = "Acme"
//! owner = 500
//!
//! [[units]]
//! id = 20
//! organization_id = 10
//! name = "Support"
//!
//! [[staff]]
//! actor_id = 500
//! display_name = "Ada"
//! unit_id = 20
//! is_admin = true
//!
//! [[customers]]
//! actor_id = 900
//! display_name = "Bob"
//! unit_id = 20
//! email = "bob@example.com"
//! ```
//!
//! Organizations and units are created first, then staff and customers with
//! their actors; organization owners are attached last. Requested keys that
//! are already taken are reported per record, never silently replaced.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::application::identity::{IdentityError, IdentityOutcome};
use crate::application::repos::RepoError;
use crate::application::store::{Created, EntityModel, EntityStore};
use crate::domain::entities::Record;
use crate::modules::{Platform, actors, customers, organizations, staff, units};

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("failed to read fixtures `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse fixtures `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to seed {entity} #{index}: {source}")]
    Record {
        entity: &'static str,
        index: usize,
        #[source]
        source: IdentityError,
    },
}

impl SeedError {
    fn record(entity: &'static str, index: usize, source: impl Into<IdentityError>) -> Self {
        Self::Record {
            entity,
            index,
            source: source.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Fixtures {
    pub organizations: Vec<OrganizationFixture>,
    pub units: Vec<RecordFixture>,
    pub staff: Vec<LinkedFixture>,
    pub customers: Vec<LinkedFixture>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordFixture {
    pub id: Option<i64>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrganizationFixture {
    /// Actor that owns the organization, attached once actors exist.
    pub owner: Option<i64>,
    #[serde(flatten)]
    pub record: RecordFixture,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkedFixture {
    pub actor_id: Option<i64>,
    pub display_name: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Outcome of one seeded record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeedEntry {
    pub entity: &'static str,
    pub requested: Option<i64>,
    pub outcome: IdentityOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeedReport {
    pub entries: Vec<SeedEntry>,
}

impl SeedReport {
    pub fn conflicts(&self) -> impl Iterator<Item = &SeedEntry> {
        self.entries.iter().filter(|entry| entry.outcome.is_conflict())
    }

    pub fn conflict_count(&self) -> usize {
        self.conflicts().count()
    }

    fn push(&mut self, entity: &'static str, requested: Option<i64>, outcome: IdentityOutcome) {
        if outcome.is_conflict() {
            warn!(entity, requested, kept = outcome.id(), "Fixture key conflict");
        }
        self.entries.push(SeedEntry {
            entity,
            requested,
            outcome,
        });
    }
}

impl Fixtures {
    pub fn from_toml(path: &Path, contents: &str) -> Result<Self, SeedError> {
        toml::from_str(contents).map_err(|source| SeedError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub async fn load(path: &Path) -> Result<Self, SeedError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SeedError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml(path, &contents)
    }
}

/// Seeds `fixtures` through the platform's stores.
///
/// Must not run concurrently with other writers of the same tables.
pub async fn seed(platform: &Platform, fixtures: &Fixtures) -> Result<SeedReport, SeedError> {
    platform.install_fixture_identities();
    let mut report = SeedReport::default();

    let mut owners = Vec::new();
    for (index, fixture) in fixtures.organizations.iter().enumerate() {
        let created = create_record(&platform.organizations, &fixture.record)
            .await
            .map_err(|err| SeedError::record(organizations::NAME, index, err))?;
        report.push(organizations::NAME, fixture.record.id, created.identity);
        if let Some(owner) = fixture.owner {
            owners.push((index, created.id, owner));
        }
    }

    for (index, fixture) in fixtures.units.iter().enumerate() {
        let created = create_record(&platform.units, fixture)
            .await
            .map_err(|err| SeedError::record(units::NAME, index, err))?;
        report.push(units::NAME, fixture.id, created.identity);
    }

    for (index, fixture) in fixtures.staff.iter().enumerate() {
        let linked = platform
            .create_staff(
                &actor_record(fixture, staff::NAME),
                &fixture_record(&fixture.fields),
                fixture.actor_id,
            )
            .await
            .map_err(|err| SeedError::record(staff::NAME, index, err))?;
        report.push(actors::NAME, fixture.actor_id, linked.actor);
        report.push(staff::NAME, None, linked.entity.identity);
    }

    for (index, fixture) in fixtures.customers.iter().enumerate() {
        let linked = platform
            .create_customer(
                &actor_record(fixture, customers::NAME),
                &fixture_record(&fixture.fields),
                fixture.actor_id,
            )
            .await
            .map_err(|err| SeedError::record(customers::NAME, index, err))?;
        report.push(actors::NAME, fixture.actor_id, linked.actor);
        report.push(customers::NAME, None, linked.entity.identity);
    }

    for (index, organization, owner) in owners {
        platform
            .organizations
            .update(organization, &Record::new().with("owner_id", owner))
            .await
            .map_err(|err| SeedError::record(organizations::NAME, index, err))?;
    }

    info!(
        records = report.entries.len(),
        conflicts = report.conflict_count(),
        "Seeded fixtures"
    );
    Ok(report)
}

async fn create_record<M: EntityModel>(
    store: &EntityStore<M>,
    fixture: &RecordFixture,
) -> Result<Created, RepoError> {
    let mut data = fixture_record(&fixture.fields);
    if let Some(id) = fixture.id {
        data.insert(store.descriptor().primary_key, id);
    }
    store.create(&data).await
}

fn fixture_record(fields: &Map<String, Value>) -> Record {
    Record::from(fields.clone())
}

fn actor_record(fixture: &LinkedFixture, kind: &str) -> Record {
    Record::new()
        .with("display_name", fixture.display_name.as_str())
        .with("kind", kind)
        .with("active", true)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURES: &str = r#"
[[organizations]]
id = 10
name = "Acme"
owner = 500

[[units]]
id = 20
organization_id = 10
name = "Support"

[[staff]]
actor_id = 500
display_name = "Ada"
unit_id = 20
is_admin = true

[[customers]]
display_name = "Bob"
unit_id = 20
email = "bob@example.com"
"#;

    #[test]
    fn parses_fixture_sections() {
        let fixtures = Fixtures::from_toml(Path::new("fixtures.toml"), FIXTURES).expect("parse");
        assert_eq!(fixtures.organizations[0].record.id, Some(10));
        assert_eq!(fixtures.organizations[0].owner, Some(500));
        assert_eq!(fixtures.units[0].fields.get("name"), Some(&Value::from("Support")));
        assert_eq!(fixtures.staff[0].actor_id, Some(500));
        assert_eq!(fixtures.customers[0].actor_id, None);
        assert!(!fixtures.customers[0].fields.contains_key("display_name"));
    }

    #[test]
    fn malformed_fixtures_report_path() {
        let err = Fixtures::from_toml(Path::new("bad.toml"), "[[units]\n").expect_err("invalid");
        assert!(err.to_string().contains("bad.toml"));
    }
}
