//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::descriptor::{EntityDescriptor, ForeignKey};
use crate::domain::entities::Record;
use crate::domain::error::DomainError;
use crate::domain::types::SortDirection;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn duplicate(constraint: impl Into<String>) -> Self {
        Self::Duplicate {
            constraint: constraint.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Expected write outcomes callers branch on: duplicates, stale ids and
    /// integrity violations.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            RepoError::Duplicate { .. } | RepoError::NotFound | RepoError::Integrity { .. }
        )
    }
}

impl From<DomainError> for RepoError {
    fn from(err: DomainError) -> Self {
        Self::invalid_input(err.to_string())
    }
}

/// Equality conditions plus an optional free-text search over the
/// descriptor's searchable fields.
#[derive(Debug, Clone, Default)]
pub struct RowFilter {
    pub conditions: Record,
    pub search: Option<String>,
}

impl RowFilter {
    pub fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
    }
}

/// One page of rows. `sort_column` must already be validated against the
/// descriptor; adapters still refuse undeclared columns.
#[derive(Debug, Clone, Default)]
pub struct RowQuery {
    pub filter: RowFilter,
    pub sort_column: Option<String>,
    pub sort_direction: SortDirection,
    pub offset: u64,
    pub limit: u64,
}

/// Rewrite of one primary key and every foreign key that stores it.
#[derive(Debug, Clone, Copy)]
pub struct KeyReassignment<'a> {
    pub table: &'a EntityDescriptor,
    pub from: i64,
    pub to: i64,
    pub dependents: &'a [ForeignKey],
}

#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Inserts `values` and returns the store-assigned primary key.
    async fn insert(&self, table: &EntityDescriptor, values: &Record) -> Result<i64, RepoError>;

    async fn select_by_id(
        &self,
        table: &EntityDescriptor,
        id: i64,
    ) -> Result<Option<Record>, RepoError>;

    async fn select_where(
        &self,
        table: &EntityDescriptor,
        conditions: &Record,
        limit: Option<u64>,
    ) -> Result<Vec<Record>, RepoError>;

    async fn count_where(&self, table: &EntityDescriptor, filter: &RowFilter)
    -> Result<u64, RepoError>;

    async fn select_page(
        &self,
        table: &EntityDescriptor,
        query: &RowQuery,
    ) -> Result<Vec<Record>, RepoError>;

    /// Writes the present fields; returns affected rows.
    async fn update(
        &self,
        table: &EntityDescriptor,
        id: i64,
        values: &Record,
    ) -> Result<u64, RepoError>;

    async fn delete(&self, table: &EntityDescriptor, id: i64) -> Result<u64, RepoError>;

    async fn exists(&self, table: &EntityDescriptor, id: i64) -> Result<bool, RepoError>;

    /// Moves a row from `from` to `to` and rewrites its dependents as one unit
    /// of work with foreign-key enforcement deferred. Returns the number of
    /// dependent rows rewritten. Fails with `Duplicate` when `to` is taken and
    /// `NotFound` when `from` is missing; nothing is changed on failure.
    async fn reassign_key(&self, change: &KeyReassignment<'_>) -> Result<u64, RepoError>;
}
