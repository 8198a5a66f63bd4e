//! Declarative DDL files and their dependency order.
//!
//! Every `*.sql` file below the DDL root describes part of the desired schema.
//! A file may declare what it needs in its front matter:
//!
//! ```sql
//! /*
//! ---
//! depends_on:
//!   - /types          # relative to the DDL root
//!   - ../people.sql   # relative to this file
//! ---
//! */
//! ```
//!
//! A dependency naming a directory expands to every `*.sql` file inside it,
//! recursively.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::db::Connection;
use crate::error::{PgManError, Result};
use crate::front_matter::FrontMatter;
use crate::sort::topological_sort;

/// Handle to a file loaded into a [`DdlRepo`].
pub type DdlFileId = usize;

/// Configuration block of a DDL file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DdlFileConfig {
    /// Files or directories this file must be applied after.
    #[serde(default)]
    pub depends_on: BTreeSet<PathBuf>,

    /// Keys the engine does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// A loaded DDL file.
#[derive(Debug, Clone)]
pub struct DdlFile {
    /// Canonical path.
    pub path: PathBuf,
    /// Parsed front matter.
    pub config: DdlFileConfig,
    /// Documentation text from the front matter.
    pub doc: String,
    /// Resolved dependencies.
    pub depends_on: Vec<DdlFileId>,
}

impl DdlFile {
    /// Reads the SQL text of the file.
    pub async fn content(&self) -> Result<String> {
        Ok(tokio::fs::read_to_string(&self.path).await?)
    }
}

impl PartialEq for DdlFile {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for DdlFile {}

impl Hash for DdlFile {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

/// All DDL files below a root directory.
#[derive(Debug)]
pub struct DdlRepo {
    root: PathBuf,
    files: Vec<DdlFile>,
    by_path: HashMap<PathBuf, DdlFileId>,
    /// Bumped whenever files are loaded.
    version: u64,
    order: Vec<DdlFileId>,
    order_version: u64,
}

impl DdlRepo {
    /// Loads every `*.sql` file below `root` together with its dependencies.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().canonicalize()?;
        let mut repo = Self {
            root,
            files: Vec::new(),
            by_path: HashMap::new(),
            version: 1,
            order: Vec::new(),
            order_version: 0,
        };

        for path in discover_sql_files(&repo.root)? {
            repo.load_file(&path)?;
        }

        info!(root = %repo.root.display(), files = repo.files.len(), "Loaded DDL files");
        Ok(repo)
    }

    /// Returns the canonical root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns all loaded files in load order.
    #[must_use]
    pub fn files(&self) -> &[DdlFile] {
        &self.files
    }

    /// Looks up a loaded file by path.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&DdlFile> {
        let real = path.canonicalize().ok()?;
        self.by_path.get(&real).and_then(|id| self.files.get(*id))
    }

    /// Returns the dependencies of a loaded file.
    pub fn dependencies<'a>(&'a self, file: &'a DdlFile) -> impl Iterator<Item = &'a DdlFile> + 'a {
        file.depends_on.iter().filter_map(|id| self.files.get(*id))
    }

    /// Loads one file and everything it depends on.
    ///
    /// Files are memoized by canonical path. Nothing is added to the
    /// repository if any file in the batch fails to load.
    pub fn load_file(&mut self, path: &Path) -> Result<DdlFileId> {
        let real = path.canonicalize()?;
        if let Some(id) = self.by_path.get(&real) {
            return Ok(*id);
        }

        let mut pending = vec![real.clone()];
        let mut seen: HashSet<PathBuf> = HashSet::from([real.clone()]);
        let mut batch = Vec::new();

        while let Some(current) = pending.pop() {
            let (config, doc) = read_config(&current)?;
            let deps = self.resolve_dependencies(&current, &config)?;

            for dep in &deps {
                if !self.by_path.contains_key(dep) && seen.insert(dep.clone()) {
                    pending.push(dep.clone());
                }
            }

            debug!(path = %current.display(), deps = deps.len(), "Parsed DDL file");
            batch.push((current, config, doc, deps));
        }

        let base = self.files.len();
        for (offset, (path, ..)) in batch.iter().enumerate() {
            self.by_path.insert(path.clone(), base + offset);
        }

        for (path, config, doc, deps) in batch {
            let depends_on = deps
                .iter()
                .filter_map(|dep| self.by_path.get(dep).copied())
                .collect();
            self.files.push(DdlFile {
                path,
                config,
                doc,
                depends_on,
            });
        }

        self.version += 1;
        Ok(base)
    }

    /// Returns the files ordered so that each one follows its dependencies.
    ///
    /// The order is cached until another file is loaded.
    pub fn topological_order(&mut self) -> Result<Vec<&DdlFile>> {
        if self.order_version != self.version {
            let files = &self.files;
            self.order = topological_sort(0..files.len(), |id: &DdlFileId| {
                files.get(*id).map(|f| f.depends_on.clone())
            })
            .map_err(|e| PgManError::Cycle {
                path: files
                    .get(e.node)
                    .map(|f| f.path.clone())
                    .unwrap_or_default(),
            })?;
            self.order_version = self.version;
        }

        Ok(self
            .order
            .iter()
            .filter_map(|id| self.files.get(*id))
            .collect())
    }

    /// Executes every file, in dependency order, on `conn`.
    ///
    /// Stops at the first failure; atomicity is up to the caller's
    /// transaction.
    pub async fn apply<C>(&mut self, conn: &mut C) -> Result<()>
    where
        C: Connection + ?Sized,
    {
        for file in self.topological_order()? {
            debug!(path = %file.path.display(), "Applying DDL file");
            let sql = file.content().await?;
            conn.execute(&sql).await?;
        }
        Ok(())
    }

    fn resolve_dependencies(
        &self,
        file: &Path,
        config: &DdlFileConfig,
    ) -> Result<BTreeSet<PathBuf>> {
        let mut resolved = BTreeSet::new();

        for dep in &config.depends_on {
            let target = if dep.is_absolute() {
                let relative: PathBuf = dep
                    .components()
                    .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
                    .collect();
                self.root.join(relative)
            } else {
                file.parent().unwrap_or(&self.root).join(dep)
            };

            if target.is_file() {
                resolved.insert(target.canonicalize()?);
            } else if target.is_dir() {
                resolved.extend(discover_sql_files(&target)?);
            } else {
                return Err(PgManError::MissingDependency {
                    file: file.to_path_buf(),
                    dependency: target,
                });
            }
        }

        Ok(resolved)
    }
}

fn read_config(path: &Path) -> Result<(DdlFileConfig, String)> {
    let sql = std::fs::read_to_string(path)?;
    let invalid = |message: String| PgManError::InvalidFrontMatter {
        path: path.to_path_buf(),
        message,
    };

    let (front_matter, _) = FrontMatter::parse(&sql).map_err(|e| invalid(e.to_string()))?;
    let Some(front_matter) = front_matter else {
        return Ok((DdlFileConfig::default(), String::new()));
    };

    let config = serde_yaml::from_value(serde_yaml::Value::Mapping(front_matter.data))
        .map_err(|e| invalid(e.to_string()))?;
    Ok((config, front_matter.doc))
}

/// Lists the canonical paths of all `*.sql` files below `dir`, sorted.
fn discover_sql_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut dirs = vec![dir.to_path_buf()];

    while let Some(current) = dirs.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                dirs.push(path);
            } else if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
                found.push(path.canonicalize()?);
            }
        }
    }

    found.sort();
    found.dedup();
    Ok(found)
}
