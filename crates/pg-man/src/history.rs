//! Persisted revision state.
//!
//! Applied revisions are recorded in `<schema>.current_revision`, one row per
//! revision. The current revision is the row with the highest index.

use tracing::info;

use crate::db::Connection;
use crate::error::Result;

/// Name of the revisions table inside the state schema.
pub const REVISIONS_TABLE_NAME: &str = "current_revision";

/// A row of the revisions table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionRow {
    /// Revision index.
    pub index: i32,
    /// Revision uid.
    pub uid: String,
    /// Revision name.
    pub name: String,
}

/// The revisions table of one state schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionsTable {
    schema: String,
}

impl RevisionsTable {
    /// Describes the revisions table living in `schema`.
    #[must_use]
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
        }
    }

    /// Returns the state schema.
    #[must_use]
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Returns the unqualified table name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        REVISIONS_TABLE_NAME
    }

    /// Returns the quoted, schema-qualified table name.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.schema),
            quote_identifier(REVISIONS_TABLE_NAME)
        )
    }

    /// SQL creating the table.
    #[must_use]
    pub fn create_sql(&self) -> String {
        format!(
            r#"CREATE TABLE IF NOT EXISTS {} (
    "index" INTEGER NOT NULL PRIMARY KEY,
    uid TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL
)"#,
            self.qualified_name()
        )
    }

    /// SQL selecting the current revision under a row lock.
    #[must_use]
    pub fn select_latest_sql(&self) -> String {
        format!(
            r#"SELECT "index", uid, name FROM {} ORDER BY "index" DESC LIMIT 1 FOR UPDATE"#,
            self.qualified_name()
        )
    }

    /// SQL recording an applied revision (`$1` index, `$2` uid, `$3` name).
    #[must_use]
    pub fn insert_sql(&self) -> String {
        format!(
            r#"INSERT INTO {} ("index", uid, name) VALUES ($1, $2, $3)"#,
            self.qualified_name()
        )
    }
}

/// Quotes an identifier for PostgreSQL.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Returns the revisions table of `schema` if it has been created.
pub async fn get_revisions_table<C>(conn: &mut C, schema: &str) -> Result<Option<RevisionsTable>>
where
    C: Connection + ?Sized,
{
    let table = RevisionsTable::new(schema);
    if conn.has_table(table.schema(), table.name()).await? {
        Ok(Some(table))
    } else {
        Ok(None)
    }
}

/// Creates the state schema (if absent) and the revisions table.
///
/// Safe to call on a database that is already initialized.
pub async fn init_revisions_table<C>(conn: &mut C, schema: &str) -> Result<RevisionsTable>
where
    C: Connection + ?Sized,
{
    let table = RevisionsTable::new(schema);

    if !conn.has_schema(schema).await? {
        conn.execute(&format!("CREATE SCHEMA {}", quote_identifier(schema)))
            .await?;
        info!(schema = %schema, "Created revisions schema");
    }

    conn.execute(&table.create_sql()).await?;
    info!(table = %table.qualified_name(), "Created revisions table");

    Ok(table)
}
