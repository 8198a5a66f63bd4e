#![allow(dead_code)]

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pg_man::db::Connection;
use pg_man::error::{PgManError, Result};
use pg_man::history::{RevisionRow, RevisionsTable};

/// In-memory connection recording every script it is asked to run.
#[derive(Debug, Default)]
pub struct RecordingConnection {
    pub executed: Vec<String>,
    pub schemas: HashSet<String>,
    pub tables: HashSet<(String, String)>,
    pub rows: Vec<RevisionRow>,
    pub locking_reads: usize,
    /// Scripts containing this text fail.
    pub fail_on: Option<String>,
}

impl RecordingConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts that are not state-table bookkeeping.
    pub fn user_scripts(&self) -> Vec<&str> {
        self.executed
            .iter()
            .map(String::as_str)
            .filter(|sql| {
                !sql.starts_with("CREATE SCHEMA") && !sql.starts_with("CREATE TABLE IF NOT EXISTS")
            })
            .collect()
    }

    pub fn current_index(&self) -> Option<i32> {
        self.rows.iter().map(|r| r.index).max()
    }
}

fn unquote(ident: &str) -> String {
    ident.trim().trim_matches('"').replace("\"\"", "\"")
}

#[async_trait]
impl Connection for RecordingConnection {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        if let Some(needle) = &self.fail_on {
            if sql.contains(needle.as_str()) {
                return Err(PgManError::Database(sqlx::Error::Protocol(format!(
                    "refusing to run: {needle}"
                ))));
            }
        }

        if let Some(schema) = sql.strip_prefix("CREATE SCHEMA ") {
            self.schemas.insert(unquote(schema));
        } else if let Some(rest) = sql.strip_prefix("CREATE TABLE IF NOT EXISTS ") {
            let name = rest.split(" (").next().unwrap_or_default();
            let (schema, table) = name.split_once('.').expect("qualified table name");
            self.tables.insert((unquote(schema), unquote(table)));
        }

        self.executed.push(sql.to_string());
        Ok(())
    }

    async fn has_schema(&mut self, schema: &str) -> Result<bool> {
        Ok(self.schemas.contains(schema))
    }

    async fn has_table(&mut self, schema: &str, table: &str) -> Result<bool> {
        Ok(self.tables.contains(&(schema.to_string(), table.to_string())))
    }

    async fn latest_revision_row(
        &mut self,
        _table: &RevisionsTable,
    ) -> Result<Option<RevisionRow>> {
        self.locking_reads += 1;
        Ok(self.rows.iter().max_by_key(|r| r.index).cloned())
    }

    async fn insert_revision_row(
        &mut self,
        _table: &RevisionsTable,
        row: &RevisionRow,
    ) -> Result<()> {
        if self.rows.iter().any(|r| r.index == row.index || r.uid == row.uid) {
            return Err(PgManError::Database(sqlx::Error::Protocol(format!(
                "duplicate revision row {row:?}"
            ))));
        }
        self.rows.push(row.clone());
        Ok(())
    }
}

/// Writes `content` to `root/rel`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, content: &str) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    path
}

/// Front matter declaring `deps`.
pub fn depends_on(deps: &[&str]) -> String {
    let list: String = deps.iter().map(|d| format!("  - {d}\n")).collect();
    format!("/*\n---\ndepends_on:\n{list}---\n*/\n")
}

/// Shell scripts standing in for a PostgreSQL installation.
pub struct FakePostgres {
    pub initdb: String,
    pub postgres: String,
    pub pg_isready: String,
}

impl Default for FakePostgres {
    fn default() -> Self {
        Self {
            initdb: r#"mkdir -p "$2""#.to_string(),
            postgres: "exec sleep 30".to_string(),
            pg_isready: "exit 0".to_string(),
        }
    }
}

impl FakePostgres {
    /// Creates `<root>/bin/{initdb,postgres,pg_isready}` and returns `root`.
    #[cfg(unix)]
    pub fn install(&self, root: &Path) -> PathBuf {
        let bin = root.join("bin");
        for (name, body) in [
            ("initdb", &self.initdb),
            ("postgres", &self.postgres),
            ("pg_isready", &self.pg_isready),
        ] {
            install_script(&bin, name, body);
        }
        root.to_path_buf()
    }
}

/// Writes an executable `/bin/sh` script `dir/name` running `body`.
#[cfg(unix)]
pub fn install_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Lists the entries of a directory.
pub fn entries(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect()
}
