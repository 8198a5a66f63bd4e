//! Runtime settings.
//!
//! Built once by the binary (from flags or environment) and handed to each
//! component by reference.

use std::path::PathBuf;

use clap::Args;

/// Default location of the PostgreSQL installation.
pub const DEFAULT_POSTGRES_PATH: &str = "/usr/lib/postgresql/16";

/// Settings shared by all commands.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Target database URL.
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub db_url: Option<String>,

    /// Directory holding `ddl/` and `revisions/`.
    #[arg(long, env = "DBMAN_WORKDIR", default_value = "schema", global = true)]
    pub workdir: PathBuf,

    /// Schema holding the revisions table.
    #[arg(long, env = "DBMAN_SCHEMA", default_value = "dbman", global = true)]
    pub dbman_schema: String,

    /// PostgreSQL installation providing `bin/initdb`, `bin/postgres`,
    /// `bin/pg_isready` and `bin/pg_dump`.
    #[arg(long, env = "DBMAN_POSTGRES_PATH", default_value = DEFAULT_POSTGRES_PATH, global = true)]
    pub postgres_path: PathBuf,

    /// Java runtime used to run apgdiff.
    #[arg(long, env = "DBMAN_JAVA", default_value = "java", global = true)]
    pub java: PathBuf,

    /// Path to the apgdiff jar.
    #[arg(long, env = "DBMAN_APGDIFF_JAR", default_value = "apgdiff-2.7.0.jar", global = true)]
    pub apgdiff_jar: PathBuf,

    /// Directory for schema dumps and the ephemeral server (system temporary
    /// directory when unset).
    #[arg(long, env = "DBMAN_TEMP_DIR", global = true)]
    pub temp_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_url: None,
            workdir: PathBuf::from("schema"),
            dbman_schema: "dbman".to_string(),
            postgres_path: PathBuf::from(DEFAULT_POSTGRES_PATH),
            java: PathBuf::from("java"),
            apgdiff_jar: PathBuf::from("apgdiff-2.7.0.jar"),
            temp_dir: None,
        }
    }
}

impl Settings {
    /// Directory of declarative DDL files.
    #[must_use]
    pub fn ddl_dir(&self) -> PathBuf {
        self.workdir.join("ddl")
    }

    /// Directory of revision scripts.
    #[must_use]
    pub fn revision_dir(&self) -> PathBuf {
        self.workdir.join("revisions")
    }

    /// Path of a PostgreSQL binary.
    #[must_use]
    pub fn pg_bin(&self, name: &str) -> PathBuf {
        self.postgres_path.join("bin").join(name)
    }
}
