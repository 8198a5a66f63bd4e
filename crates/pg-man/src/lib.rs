//! Revision-based schema migrations for PostgreSQL.
//!
//! `pg-man` keeps two views of a database schema side by side:
//! - **Revisions** - an ordered chain of SQL scripts (`NNNN_UID_name.sql`),
//!   each applied at most once and recorded in a state table
//! - **DDL files** - a declarative description of the current schema, with
//!   dependencies declared in YAML front matter
//!
//! New revisions are generated by rendering the DDL files into a throwaway
//! PostgreSQL server and diffing its schema against the target database.
//!
//! # Architecture
//!
//! - **Sort** - Dependency ordering shared by the DDL repository
//! - **DDL** - Loads DDL files and applies them in dependency order
//! - **Revisions** - Loads, creates and applies revision scripts
//! - **History** - The table recording applied revisions
//! - **Pg** - Disposable PostgreSQL server and temporary databases
//! - **Autogenerate** - Diffs the target against the rendered DDL
//!
//! # Example
//!
//! ```rust,ignore
//! use pg_man::prelude::*;
//! use sqlx::Connection as _;
//!
//! let repo = RevisionRepo::new("schema/revisions", "dbman")?;
//! let mut conn = pg_man::db::connect("postgresql://localhost/app").await?;
//!
//! let mut tx = conn.begin().await?;
//! repo.upgrade_db(&mut *tx).await?;
//! tx.commit().await?;
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Create the revisions table
//! pg-man init
//!
//! # Apply pending revisions
//! pg-man upgrade
//!
//! # Generate a revision from the DDL files
//! pg-man revision add_accounts
//!
//! # Show current and pending revisions
//! pg-man status
//! ```

pub mod autogenerate;
pub mod config;
pub mod db;
pub mod ddl;
pub mod error;
pub mod front_matter;
pub mod history;
pub mod pg;
pub mod revisions;
pub mod sort;
pub mod uid;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::autogenerate::generate_revision;
    pub use crate::config::Settings;
    pub use crate::db::Connection;
    pub use crate::ddl::{DdlFile, DdlFileConfig, DdlRepo};
    pub use crate::error::{PgManError, Result};
    pub use crate::history::{init_revisions_table, RevisionRow, RevisionsTable};
    pub use crate::pg::{PostgresProcess, TemporaryDatabase};
    pub use crate::revisions::{same_revision, Revision, RevisionRepo};
}
