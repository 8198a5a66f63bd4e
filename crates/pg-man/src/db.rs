//! Database connection handle.
//!
//! The engine only needs a handful of capabilities from a connection, so they
//! are collected in [`Connection`]. The PostgreSQL implementation is the one
//! used in production; transactions are driven by the caller through
//! [`sqlx::Transaction`], which dereferences to the same connection type.

use std::path::Path;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection as _;
use tracing::debug;

use crate::error::Result;
use crate::history::{RevisionRow, RevisionsTable};

/// Operations the engine performs against a database.
///
/// Implementations never commit or roll back on their own.
#[async_trait]
pub trait Connection: Send {
    /// Runs a (possibly multi-statement) SQL script.
    async fn execute(&mut self, sql: &str) -> Result<()>;

    /// Returns whether `schema` exists.
    async fn has_schema(&mut self, schema: &str) -> Result<bool>;

    /// Returns whether `schema.table` exists.
    async fn has_table(&mut self, schema: &str, table: &str) -> Result<bool>;

    /// Reads the row with the highest index, locking it for the rest of the
    /// transaction.
    async fn latest_revision_row(
        &mut self,
        table: &RevisionsTable,
    ) -> Result<Option<RevisionRow>>;

    /// Records an applied revision.
    async fn insert_revision_row(
        &mut self,
        table: &RevisionsTable,
        row: &RevisionRow,
    ) -> Result<()>;
}

#[async_trait]
impl Connection for PgConnection {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        if sql.trim().is_empty() {
            return Ok(());
        }

        debug!(sql = %sql, "Executing SQL");
        sqlx::Executor::execute(&mut *self, sqlx::raw_sql(sql)).await?;
        Ok(())
    }

    async fn has_schema(&mut self, schema: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_namespace WHERE nspname = $1)",
        )
        .bind(schema)
        .fetch_one(&mut *self)
        .await?;
        Ok(exists)
    }

    async fn has_table(&mut self, schema: &str, table: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_tables \
             WHERE schemaname = $1 AND tablename = $2)",
        )
        .bind(schema)
        .bind(table)
        .fetch_one(&mut *self)
        .await?;
        Ok(exists)
    }

    async fn latest_revision_row(
        &mut self,
        table: &RevisionsTable,
    ) -> Result<Option<RevisionRow>> {
        let sql = table.select_latest_sql();
        let row: Option<(i32, String, String)> = sqlx::query_as(&sql)
            .fetch_optional(&mut *self)
            .await?;

        Ok(row.map(|(index, uid, name)| RevisionRow { index, uid, name }))
    }

    async fn insert_revision_row(
        &mut self,
        table: &RevisionsTable,
        row: &RevisionRow,
    ) -> Result<()> {
        let sql = table.insert_sql();
        sqlx::query(&sql)
            .bind(row.index)
            .bind(&row.uid)
            .bind(&row.name)
            .execute(&mut *self)
            .await?;
        Ok(())
    }
}

/// Opens a single connection from a `postgresql://` URL.
pub async fn connect(url: &str) -> Result<PgConnection> {
    Ok(PgConnection::connect(url).await?)
}

/// Opens a single connection through a Unix socket directory.
pub async fn connect_socket(
    socket_dir: &Path,
    user: &str,
    database: &str,
) -> Result<PgConnection> {
    let options = PgConnectOptions::new()
        .socket(socket_dir)
        .username(user)
        .database(database);
    Ok(PgConnection::connect_with(&options).await?)
}
