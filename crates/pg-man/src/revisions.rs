//! Ordered revision scripts and the upgrade algorithm.
//!
//! Revisions live in a flat directory as `NNNN_UID_name.sql`. The index is
//! sequential from zero; the uid is a random 8-character tag that keeps two
//! revisions created on different branches with the same index apart.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use crate::db::Connection;
use crate::error::{PgManError, Result};
use crate::history::{get_revisions_table, init_revisions_table, RevisionRow};
use crate::uid::{short_uid, REVISION_UID_LEN};

static FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}|[1-9]\d{4,})_([a-z0-9]{8})_([^/\\]+)\.sql$")
        .expect("valid filename regex")
});

/// Formats the filename of a revision.
#[must_use]
pub fn format_filename(index: u32, uid: &str, name: &str) -> String {
    format!("{index:04}_{uid}_{name}.sql")
}

/// Parses `NNNN_UID_name.sql` into `(index, uid, name)`.
///
/// Only names that [`format_filename`] would produce are accepted, so an
/// index is never padded beyond four digits.
#[must_use]
pub fn parse_filename(filename: &str) -> Option<(u32, String, String)> {
    let caps = FILENAME.captures(filename)?;
    let index = caps[1].parse().ok()?;
    Some((index, caps[2].to_string(), caps[3].to_string()))
}

/// A migration script on disk.
///
/// Identity and ordering are defined by [`Revision::key`]; `name` and `path`
/// do not take part.
#[derive(Debug, Clone)]
pub struct Revision {
    /// Position in the revision chain, starting at 0.
    pub index: u32,
    /// Random tag.
    pub uid: String,
    /// Human-supplied label.
    pub name: String,
    /// Canonical path of the SQL file.
    pub path: PathBuf,
}

impl Revision {
    /// Ordering and identity key.
    #[must_use]
    pub fn key(&self) -> (u32, &str) {
        (self.index, self.uid.as_str())
    }

    /// Compares two revisions by key.
    #[must_use]
    pub fn cmp_key(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }

    /// Returns the filename this revision is stored under.
    #[must_use]
    pub fn filename(&self) -> String {
        format_filename(self.index, &self.uid, &self.name)
    }

    /// Reads the SQL text of the revision.
    pub async fn content(&self) -> Result<String> {
        Ok(tokio::fs::read_to_string(&self.path).await?)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}_{}_{}", self.index, self.uid, self.name)
    }
}

/// Returns whether two optional revisions have the same key.
#[must_use]
pub fn same_revision(a: Option<&Revision>, b: Option<&Revision>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.key() == b.key(),
        (None, None) => true,
        _ => false,
    }
}

/// The revisions of one directory.
#[derive(Debug)]
pub struct RevisionRepo {
    root: PathBuf,
    state_schema: String,
    revisions: Vec<Revision>,
    by_name: HashMap<String, usize>,
}

impl RevisionRepo {
    /// Creates a repository over `root`, recording state in `state_schema`.
    pub fn new(root: impl Into<PathBuf>, state_schema: impl Into<String>) -> Result<Self> {
        let mut repo = Self {
            root: root.into(),
            state_schema: state_schema.into(),
            revisions: Vec::new(),
            by_name: HashMap::new(),
        };
        repo.load()?;
        Ok(repo)
    }

    /// Returns the revisions directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the schema holding the revisions table.
    #[must_use]
    pub fn state_schema(&self) -> &str {
        &self.state_schema
    }

    /// Returns the loaded revisions, sorted by key.
    #[must_use]
    pub fn revisions(&self) -> &[Revision] {
        &self.revisions
    }

    /// Looks up a revision by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&Revision> {
        self.by_name.get(name).and_then(|i| self.revisions.get(*i))
    }

    /// Returns the last revision, if any.
    #[must_use]
    pub fn head(&self) -> Option<&Revision> {
        self.revisions.last()
    }

    /// Rescans the directory, replacing what was loaded before.
    ///
    /// A missing directory is an empty repository. Any `*.sql` file whose
    /// name does not parse fails the whole load.
    pub fn load(&mut self) -> Result<()> {
        let mut revisions = Vec::new();

        if self.root.is_dir() {
            for entry in fs::read_dir(&self.root)? {
                let path = entry?.path();
                if !path.is_file() || path.extension().is_none_or(|ext| ext != "sql") {
                    continue;
                }

                let parsed = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(parse_filename);
                let Some((index, uid, name)) = parsed else {
                    return Err(PgManError::InvalidRevisionFilename { path });
                };

                revisions.push(Revision {
                    index,
                    uid,
                    name,
                    path: path.canonicalize()?,
                });
            }
        }

        revisions.sort_by(Revision::cmp_key);
        let by_name = revisions
            .iter()
            .enumerate()
            .map(|(i, rev)| (rev.name.clone(), i))
            .collect();

        debug!(root = %self.root.display(), count = revisions.len(), "Loaded revisions");
        self.revisions = revisions;
        self.by_name = by_name;
        Ok(())
    }

    /// Writes a new revision after the current head and returns it.
    pub fn add(&mut self, name: &str, content: &str) -> Result<Revision> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(PgManError::InvalidRevisionName(name.to_string()));
        }

        self.load()?;

        let index = u32::try_from(self.revisions.len())
            .map_err(|_| PgManError::InvalidRevisionName(name.to_string()))?;
        let uid = short_uid(REVISION_UID_LEN);

        fs::create_dir_all(&self.root)?;
        let path = self.root.join(format_filename(index, &uid, name));
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?
            .write_all(content.as_bytes())?;

        self.load()?;

        self.revisions
            .iter()
            .find(|rev| rev.index == index && rev.uid == uid)
            .cloned()
            .ok_or(PgManError::InvalidRevisionFilename { path })
    }

    /// Reads the revision the database is at.
    ///
    /// Takes a row lock on the state table. Returns `None` when the table is
    /// missing or empty.
    pub async fn get_current_revision<C>(&self, conn: &mut C) -> Result<Option<Revision>>
    where
        C: Connection + ?Sized,
    {
        let Some(table) = get_revisions_table(conn, &self.state_schema).await? else {
            return Ok(None);
        };
        let Some(row) = conn.latest_revision_row(&table).await? else {
            return Ok(None);
        };

        self.revision_for_row(&row).map(Some)
    }

    /// Revisions after the one the database is at.
    pub async fn pending<C>(&self, conn: &mut C) -> Result<&[Revision]>
    where
        C: Connection + ?Sized,
    {
        let start = match self.get_current_revision(conn).await? {
            Some(current) => current.index as usize + 1,
            None => 0,
        };
        Ok(self.revisions.get(start..).unwrap_or_default())
    }

    /// Applies every pending revision and records each one.
    ///
    /// Must run inside a transaction owned by the caller; this method never
    /// commits, so the batch is applied or rolled back as a whole.
    pub async fn upgrade_db<C>(&self, conn: &mut C) -> Result<Vec<Revision>>
    where
        C: Connection + ?Sized,
    {
        let table = match get_revisions_table(conn, &self.state_schema).await? {
            Some(table) => table,
            None => init_revisions_table(conn, &self.state_schema).await?,
        };

        let pending = self.pending(conn).await?;
        for rev in pending {
            let sql = rev.content().await?;
            conn.execute(&sql).await?;

            let row = RevisionRow {
                index: i32::try_from(rev.index).map_err(|_| {
                    PgManError::InvalidRevisionFilename {
                        path: rev.path.clone(),
                    }
                })?,
                uid: rev.uid.clone(),
                name: rev.name.clone(),
            };
            conn.insert_revision_row(&table, &row).await?;
            info!(revision = %rev.filename(), "Applied revision");
        }

        Ok(pending.to_vec())
    }

    fn revision_for_row(&self, row: &RevisionRow) -> Result<Revision> {
        let mismatch = || PgManError::RevisionStateMismatch {
            index: row.index,
            uid: row.uid.clone(),
            name: row.name.clone(),
            path: self.root.join(format!("{:04}_{}_{}.sql", row.index, row.uid, row.name)),
        };

        let index = usize::try_from(row.index).map_err(|_| mismatch())?;
        self.revisions
            .get(index)
            .filter(|rev| rev.uid == row.uid && rev.path.is_file())
            .cloned()
            .ok_or_else(mismatch)
    }
}
