//! Postgres-backed relational store.
//!
//! Statements are built with `QueryBuilder` from descriptor metadata only:
//! identifiers come from the descriptor and are quoted, values are bound.

mod util;

pub use util::map_sqlx_error;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{
    Postgres, QueryBuilder, Row,
    migrate::MigrateError,
    postgres::{PgPool, PgPoolOptions},
    query,
    types::Json,
};
use tracing::debug;

use crate::application::repos::{KeyReassignment, RelationalStore, RepoError, RowFilter, RowQuery};
use crate::domain::descriptor::EntityDescriptor;
use crate::domain::entities::{FieldFormat, Record};

#[derive(Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrateError> {
        sqlx::migrate!("./migrations").run(pool).await
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }

    fn convert_count(value: i64) -> Result<u64, RepoError> {
        value
            .try_into()
            .map_err(|_| RepoError::from_persistence("count exceeds supported range"))
    }

    fn column_format(table: &EntityDescriptor, column: &str) -> Result<FieldFormat, RepoError> {
        table.column_format(column).ok_or_else(|| {
            RepoError::invalid_input(format!("`{column}` is not a column of `{}`", table.name))
        })
    }

    fn push_select(qb: &mut QueryBuilder<'_, Postgres>, table: &EntityDescriptor) {
        qb.push("SELECT to_jsonb(t) AS record FROM ");
        qb.push(quote_ident(table.table));
        qb.push(" AS t WHERE TRUE");
    }

    fn push_conditions(
        qb: &mut QueryBuilder<'_, Postgres>,
        table: &EntityDescriptor,
        conditions: &Record,
    ) -> Result<(), RepoError> {
        for (column, value) in conditions.iter() {
            let format = Self::column_format(table, column)?;
            qb.push(" AND t.");
            qb.push(quote_ident(column));
            if value.is_null() {
                qb.push(" IS NULL");
            } else {
                qb.push(" = ");
                push_value(qb, format, value);
            }
        }
        Ok(())
    }

    fn push_filter(
        qb: &mut QueryBuilder<'_, Postgres>,
        table: &EntityDescriptor,
        filter: &RowFilter,
    ) -> Result<(), RepoError> {
        Self::push_conditions(qb, table, &filter.conditions)?;

        let searchable = table.searchable_fields();
        if let Some(term) = filter.search_term()
            && !searchable.is_empty()
        {
            let pattern = format!("%{}%", escape_like(term));
            qb.push(" AND (");
            for (index, column) in searchable.iter().enumerate() {
                if index > 0 {
                    qb.push(" OR ");
                }
                qb.push("t.");
                qb.push(quote_ident(column));
                qb.push(" ILIKE ");
                qb.push_bind(pattern.clone());
            }
            qb.push(")");
        }
        Ok(())
    }

    fn decode_records(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<Record>, RepoError> {
        rows.into_iter()
            .map(|row| {
                row.try_get::<Json<Map<String, Value>>, _>("record")
                    .map(|Json(map)| Record::from(map))
                    .map_err(map_sqlx_error)
            })
            .collect()
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Binds `value` with the Postgres type of `format`. Values were coerced by
/// the descriptor, so a mismatch binds NULL.
fn push_value(qb: &mut QueryBuilder<'_, Postgres>, format: FieldFormat, value: &Value) {
    match format {
        FieldFormat::Integer => {
            qb.push_bind(value.as_i64());
        }
        FieldFormat::Float => {
            qb.push_bind(value.as_f64());
        }
        FieldFormat::Text => {
            qb.push_bind(value.as_str().map(str::to_owned));
        }
        FieldFormat::Boolean => {
            qb.push_bind(value.as_bool());
        }
        FieldFormat::Timestamp => {
            qb.push_bind(value.as_str().map(str::to_owned));
            qb.push("::timestamptz");
        }
        FieldFormat::Json => {
            qb.push_bind(Json(value.clone()));
        }
    }
}

#[async_trait]
impl RelationalStore for PostgresStore {
    async fn insert(&self, table: &EntityDescriptor, values: &Record) -> Result<i64, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new("INSERT INTO ");
        qb.push(quote_ident(table.table));

        if values.is_empty() {
            qb.push(" DEFAULT VALUES");
        } else {
            let mut formats = Vec::with_capacity(values.len());
            qb.push(" (");
            for (index, (column, value)) in values.iter().enumerate() {
                formats.push((Self::column_format(table, column)?, value));
                if index > 0 {
                    qb.push(", ");
                }
                qb.push(quote_ident(column));
            }
            qb.push(") VALUES (");
            for (index, (format, value)) in formats.into_iter().enumerate() {
                if index > 0 {
                    qb.push(", ");
                }
                push_value(&mut qb, format, value);
            }
            qb.push(")");
        }
        qb.push(" RETURNING ");
        qb.push(quote_ident(table.primary_key));

        let row = qb
            .build()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        row.try_get::<i64, _>(0).map_err(map_sqlx_error)
    }

    async fn select_by_id(
        &self,
        table: &EntityDescriptor,
        id: i64,
    ) -> Result<Option<Record>, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new("");
        Self::push_select(&mut qb, table);
        qb.push(" AND t.");
        qb.push(quote_ident(table.primary_key));
        qb.push(" = ");
        qb.push_bind(id);

        let rows = qb
            .build()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self::decode_records(rows)?.into_iter().next())
    }

    async fn select_where(
        &self,
        table: &EntityDescriptor,
        conditions: &Record,
        limit: Option<u64>,
    ) -> Result<Vec<Record>, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new("");
        Self::push_select(&mut qb, table);
        Self::push_conditions(&mut qb, table, conditions)?;
        qb.push(" ORDER BY t.");
        qb.push(quote_ident(table.primary_key));
        if let Some(limit) = limit {
            qb.push(" LIMIT ");
            qb.push_bind(limit as i64);
        }

        let rows = qb
            .build()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Self::decode_records(rows)
    }

    async fn count_where(
        &self,
        table: &EntityDescriptor,
        filter: &RowFilter,
    ) -> Result<u64, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM ");
        qb.push(quote_ident(table.table));
        qb.push(" AS t WHERE TRUE");
        Self::push_filter(&mut qb, table, filter)?;

        let count: i64 = qb
            .build_query_scalar()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Self::convert_count(count)
    }

    async fn select_page(
        &self,
        table: &EntityDescriptor,
        query: &RowQuery,
    ) -> Result<Vec<Record>, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new("");
        Self::push_select(&mut qb, table);
        Self::push_filter(&mut qb, table, &query.filter)?;

        qb.push(" ORDER BY ");
        if let Some(column) = query.sort_column.as_deref() {
            if !table.is_sortable(column) {
                return Err(RepoError::invalid_input(format!(
                    "cannot sort `{}` by `{column}`",
                    table.name
                )));
            }
            qb.push("t.");
            qb.push(quote_ident(column));
            qb.push(" ");
            qb.push(query.sort_direction.as_sql());
            qb.push(", ");
        }
        qb.push("t.");
        qb.push(quote_ident(table.primary_key));
        qb.push(" ASC LIMIT ");
        qb.push_bind(query.limit as i64);
        qb.push(" OFFSET ");
        qb.push_bind(query.offset as i64);

        let rows = qb
            .build()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Self::decode_records(rows)
    }

    async fn update(
        &self,
        table: &EntityDescriptor,
        id: i64,
        values: &Record,
    ) -> Result<u64, RepoError> {
        if values.is_empty() {
            return Ok(0);
        }

        let mut qb = QueryBuilder::<Postgres>::new("UPDATE ");
        qb.push(quote_ident(table.table));
        qb.push(" SET ");
        for (index, (column, value)) in values.iter().enumerate() {
            let format = Self::column_format(table, column)?;
            if index > 0 {
                qb.push(", ");
            }
            qb.push(quote_ident(column));
            qb.push(" = ");
            push_value(&mut qb, format, value);
        }
        qb.push(" WHERE ");
        qb.push(quote_ident(table.primary_key));
        qb.push(" = ");
        qb.push_bind(id);

        let result = qb
            .build()
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, table: &EntityDescriptor, id: i64) -> Result<u64, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new("DELETE FROM ");
        qb.push(quote_ident(table.table));
        qb.push(" WHERE ");
        qb.push(quote_ident(table.primary_key));
        qb.push(" = ");
        qb.push_bind(id);

        let result = qb
            .build()
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn exists(&self, table: &EntityDescriptor, id: i64) -> Result<bool, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT EXISTS (SELECT 1 FROM ");
        qb.push(quote_ident(table.table));
        qb.push(" WHERE ");
        qb.push(quote_ident(table.primary_key));
        qb.push(" = ");
        qb.push_bind(id);
        qb.push(")");

        qb.build_query_scalar()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn reassign_key(&self, change: &KeyReassignment<'_>) -> Result<u64, RepoError> {
        let table = change.table;
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        query("SET CONSTRAINTS ALL DEFERRED")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let mut qb = QueryBuilder::<Postgres>::new("UPDATE ");
        qb.push(quote_ident(table.table));
        qb.push(" SET ");
        qb.push(quote_ident(table.primary_key));
        qb.push(" = ");
        qb.push_bind(change.to);
        qb.push(" WHERE ");
        qb.push(quote_ident(table.primary_key));
        qb.push(" = ");
        qb.push_bind(change.from);
        let moved = qb
            .build()
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();
        if moved == 0 {
            return Err(RepoError::NotFound);
        }

        let mut rewritten = 0;
        for dependent in change.dependents {
            let mut qb = QueryBuilder::<Postgres>::new("UPDATE ");
            qb.push(quote_ident(dependent.table));
            qb.push(" SET ");
            qb.push(quote_ident(dependent.column));
            qb.push(" = ");
            qb.push_bind(change.to);
            qb.push(" WHERE ");
            qb.push(quote_ident(dependent.column));
            qb.push(" = ");
            qb.push_bind(change.from);
            rewritten += qb
                .build()
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?
                .rows_affected();
        }

        // Keep the serial sequence ahead of explicitly assigned keys.
        let mut qb = QueryBuilder::<Postgres>::new("SELECT setval(pg_get_serial_sequence(");
        qb.push_bind(table.table);
        qb.push(", ");
        qb.push_bind(table.primary_key);
        qb.push("), GREATEST((SELECT MAX(");
        qb.push(quote_ident(table.primary_key));
        qb.push(") FROM ");
        qb.push(quote_ident(table.table));
        qb.push("), 1))");
        qb.build()
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(
            table = table.table,
            from = change.from,
            to = change.to,
            rewritten,
            "Committed key reassignment"
        );
        Ok(rewritten)
    }
}
