//! In-process relational store.
//!
//! Enforces primary-key and unique-field constraints; foreign keys are not
//! checked. Every statement runs under one write lock, which makes
//! `reassign_key` a single unit of work.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use crate::application::repos::{KeyReassignment, RelationalStore, RepoError, RowFilter, RowQuery};
use crate::cache::{rw_read, rw_write};
use crate::domain::descriptor::EntityDescriptor;
use crate::domain::entities::Record;
use crate::domain::types::SortDirection;

const SOURCE: &str = "infra::memory::MemoryStore";

#[derive(Debug)]
struct Table {
    rows: BTreeMap<i64, Record>,
    next_id: i64,
}

impl Default for Table {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl Table {
    fn unique_conflict(
        &self,
        descriptor: &EntityDescriptor,
        values: &Record,
        except: Option<i64>,
    ) -> Option<String> {
        descriptor
            .fields
            .iter()
            .filter(|field| field.unique)
            .find_map(|field| {
                let value = values.get(field.name).filter(|value| !value.is_null())?;
                self.rows
                    .iter()
                    .filter(|(id, _)| Some(**id) != except)
                    .any(|(_, row)| row.get(field.name) == Some(value))
                    .then(|| format!("{}_{}_key", descriptor.table, field.name))
            })
    }

    fn matching<'a>(
        &'a self,
        descriptor: &'a EntityDescriptor,
        filter: &'a RowFilter,
    ) -> impl Iterator<Item = &'a Record> + 'a {
        let searchable = descriptor.searchable_fields();
        let term = filter.search_term().map(str::to_lowercase);
        self.rows.values().filter(move |row| {
            matches_conditions(row, &filter.conditions)
                && term.as_deref().is_none_or(|term| {
                    searchable.iter().any(|field| {
                        row.get_str(field)
                            .is_some_and(|value| value.to_lowercase().contains(term))
                    })
                })
        })
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<&'static str, Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows whose `column` equals `value`, across one table.
    pub fn count_references(&self, table: &str, column: &str, value: i64) -> usize {
        rw_read(&self.tables, SOURCE, "count_references")
            .get(table)
            .map_or(0, |table| {
                table
                    .rows
                    .values()
                    .filter(|row| row.get_i64(column) == Some(value))
                    .count()
            })
    }
}

fn matches_conditions(row: &Record, conditions: &Record) -> bool {
    conditions.iter().all(|(column, expected)| {
        let actual = row.get(column).unwrap_or(&Value::Null);
        values_equal(actual, expected)
    })
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

/// Nulls first, then booleans, numbers and strings in natural order.
fn compare_values(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (left, right) {
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        _ => rank(left).cmp(&rank(right)),
    }
}

#[async_trait]
impl RelationalStore for MemoryStore {
    async fn insert(&self, table: &EntityDescriptor, values: &Record) -> Result<i64, RepoError> {
        let mut tables = rw_write(&self.tables, SOURCE, "insert");
        let state = tables.entry(table.table).or_default();
        if let Some(constraint) = state.unique_conflict(table, values, None) {
            return Err(RepoError::duplicate(constraint));
        }

        let id = state.next_id;
        if state.rows.contains_key(&id) {
            return Err(RepoError::from_persistence(format!(
                "key sequence of `{}` is exhausted",
                table.table
            )));
        }
        state.next_id = id.saturating_add(1);
        let mut row = values.clone();
        row.insert(table.primary_key, id);
        state.rows.insert(id, row);
        Ok(id)
    }

    async fn select_by_id(
        &self,
        table: &EntityDescriptor,
        id: i64,
    ) -> Result<Option<Record>, RepoError> {
        Ok(rw_read(&self.tables, SOURCE, "select_by_id")
            .get(table.table)
            .and_then(|state| state.rows.get(&id).cloned()))
    }

    async fn select_where(
        &self,
        table: &EntityDescriptor,
        conditions: &Record,
        limit: Option<u64>,
    ) -> Result<Vec<Record>, RepoError> {
        let tables = rw_read(&self.tables, SOURCE, "select_where");
        let Some(state) = tables.get(table.table) else {
            return Ok(Vec::new());
        };
        let limit = limit.map_or(usize::MAX, |limit| limit as usize);
        Ok(state
            .rows
            .values()
            .filter(|row| matches_conditions(row, conditions))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count_where(
        &self,
        table: &EntityDescriptor,
        filter: &RowFilter,
    ) -> Result<u64, RepoError> {
        let tables = rw_read(&self.tables, SOURCE, "count_where");
        Ok(tables
            .get(table.table)
            .map_or(0, |state| state.matching(table, filter).count() as u64))
    }

    async fn select_page(
        &self,
        table: &EntityDescriptor,
        query: &RowQuery,
    ) -> Result<Vec<Record>, RepoError> {
        if let Some(column) = query.sort_column.as_deref()
            && !table.is_sortable(column)
        {
            return Err(RepoError::invalid_input(format!(
                "cannot sort `{}` by `{column}`",
                table.name
            )));
        }

        let tables = rw_read(&self.tables, SOURCE, "select_page");
        let Some(state) = tables.get(table.table) else {
            return Ok(Vec::new());
        };

        let mut rows: Vec<&Record> = state.matching(table, &query.filter).collect();
        if let Some(column) = query.sort_column.as_deref() {
            rows.sort_by(|a, b| {
                let ordering = compare_values(a.get(column), b.get(column));
                match query.sort_direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            });
        }

        Ok(rows
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn update(
        &self,
        table: &EntityDescriptor,
        id: i64,
        values: &Record,
    ) -> Result<u64, RepoError> {
        let mut tables = rw_write(&self.tables, SOURCE, "update");
        let Some(state) = tables.get_mut(table.table) else {
            return Ok(0);
        };
        if !state.rows.contains_key(&id) {
            return Ok(0);
        }
        if let Some(constraint) = state.unique_conflict(table, values, Some(id)) {
            return Err(RepoError::duplicate(constraint));
        }
        if let Some(row) = state.rows.get_mut(&id) {
            for (column, value) in values.iter() {
                row.insert(column.clone(), value.clone());
            }
        }
        Ok(1)
    }

    async fn delete(&self, table: &EntityDescriptor, id: i64) -> Result<u64, RepoError> {
        let mut tables = rw_write(&self.tables, SOURCE, "delete");
        let removed = tables
            .get_mut(table.table)
            .and_then(|state| state.rows.remove(&id));
        Ok(u64::from(removed.is_some()))
    }

    async fn exists(&self, table: &EntityDescriptor, id: i64) -> Result<bool, RepoError> {
        Ok(rw_read(&self.tables, SOURCE, "exists")
            .get(table.table)
            .is_some_and(|state| state.rows.contains_key(&id)))
    }

    async fn reassign_key(&self, change: &KeyReassignment<'_>) -> Result<u64, RepoError> {
        let descriptor = change.table;
        let mut tables = rw_write(&self.tables, SOURCE, "reassign_key");

        let state = tables.entry(descriptor.table).or_default();
        if state.rows.contains_key(&change.to) {
            return Err(RepoError::duplicate(format!("{}_pkey", descriptor.table)));
        }
        let Some(mut row) = state.rows.remove(&change.from) else {
            return Err(RepoError::NotFound);
        };
        row.insert(descriptor.primary_key, change.to);
        state.rows.insert(change.to, row);
        state.next_id = state.next_id.max(change.to.saturating_add(1));

        let mut rewritten = 0;
        for dependent in change.dependents {
            let Some(state) = tables.get_mut(dependent.table) else {
                continue;
            };
            for row in state.rows.values_mut() {
                if row.get_i64(dependent.column) == Some(change.from) {
                    row.insert(dependent.column, change.to);
                    rewritten += 1;
                }
            }
        }
        Ok(rewritten)
    }
}
