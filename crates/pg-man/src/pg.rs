//! Disposable PostgreSQL server.
//!
//! [`PostgresProcess`] bootstraps a fresh cluster in a private temporary
//! directory, runs the server with TCP disabled and its socket inside that
//! directory, and removes everything again on [`PostgresProcess::stop`].
//! Dropping a running instance kills the server and removes the directory as
//! well, so no exit path leaves a server behind.
//!
//! [`TemporaryDatabase`] is the lighter sibling: a database created on an
//! existing server and dropped again when the caller is done with it.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use sqlx::postgres::PgConnection;
use sqlx::Connection as _;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::db::{self, Connection as _};
use crate::error::{PgManError, Result};
use crate::history::quote_identifier;
use crate::uid::short_uid;

/// Number of readiness checks before giving up.
pub const READY_ATTEMPTS: u32 = 5;

/// Pause between readiness checks.
pub const READY_DELAY: Duration = Duration::from_millis(500);

/// How long `stop` waits for the killed server to exit.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

const LOG_FILE: &str = "postgres.log";

/// Runs `command` to completion and fails unless it exits successfully.
pub(crate) async fn run_tool(command: &mut Command, tool: &str) -> Result<Output> {
    debug!(command = ?command.as_std(), "Running {tool}");

    let output = command
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| PgManError::Spawn {
            program: tool.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(PgManError::ToolFailed {
            tool: tool.to_string(),
            status: output.status,
            output: combined_output(&output),
        });
    }

    Ok(output)
}

fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}

struct Running {
    child: Child,
    dir: TempDir,
}

/// A private PostgreSQL server living for one autogeneration run.
pub struct PostgresProcess {
    postgres_path: PathBuf,
    user: String,
    temp_root: Option<PathBuf>,
    running: Option<Running>,
}

impl PostgresProcess {
    /// Uses the binaries found in `<postgres_path>/bin`.
    pub fn new(postgres_path: impl Into<PathBuf>) -> Self {
        Self {
            postgres_path: postgres_path.into(),
            user: "postgres".to_string(),
            temp_root: None,
            running: None,
        }
    }

    /// Sets the superuser created by `initdb`.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Creates the private directory under `root` instead of the system
    /// temporary directory.
    #[must_use]
    pub fn temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    /// Returns whether the server has been started and not stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Returns the private directory, which is also the socket directory.
    pub fn host(&self) -> Result<&Path> {
        self.running
            .as_ref()
            .map(|r| r.dir.path())
            .ok_or(PgManError::NotStarted)
    }

    /// Returns a URL reaching the `postgres` database through the socket.
    ///
    /// Understood by both libpq tools and [`db::connect`].
    pub fn url(&self) -> Result<String> {
        Ok(format!(
            "postgresql:///postgres?host={}&user={}",
            self.host()?.display(),
            self.user
        ))
    }

    /// Returns the OS process id of the server.
    pub fn pid(&self) -> Result<Option<u32>> {
        Ok(self
            .running
            .as_ref()
            .ok_or(PgManError::NotStarted)?
            .child
            .id())
    }

    /// Opens a connection to the `postgres` database.
    pub async fn connect(&self) -> Result<PgConnection> {
        db::connect_socket(self.host()?, &self.user, "postgres").await
    }

    fn bin(&self, name: &str) -> PathBuf {
        self.postgres_path.join("bin").join(name)
    }

    /// Bootstraps a cluster, launches the server and waits until it accepts
    /// connections.
    ///
    /// On failure everything created so far is torn down before returning.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(PgManError::AlreadyStarted);
        }

        let mut builder = tempfile::Builder::new();
        builder.prefix("pg-man-");
        let dir = match &self.temp_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        let data_dir = dir.path().join("data");

        run_tool(
            Command::new(self.bin("initdb"))
                .arg("-D")
                .arg(&data_dir)
                .args(["--username", self.user.as_str(), "--auth-local", "trust"]),
            "initdb",
        )
        .await?;

        let log = File::create(dir.path().join(LOG_FILE))?;
        let log_err = log.try_clone()?;
        let child = Command::new(self.bin("postgres"))
            .arg("-k")
            .arg(dir.path())
            .arg("-D")
            .arg(&data_dir)
            .args(["-c", "listen_addresses="])
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PgManError::Spawn {
                program: "postgres".to_string(),
                source,
            })?;

        debug!(pid = ?child.id(), dir = %dir.path().display(), "Spawned postgres");
        self.running = Some(Running { child, dir });

        match self.wait_ready().await {
            Ok(()) => {
                info!(host = %self.host()?.display(), "Ephemeral postgres ready");
                Ok(())
            }
            Err(e) => {
                if let Err(stop_err) = self.stop().await {
                    warn!(error = %stop_err, "Failed to clean up after startup failure");
                }
                Err(e)
            }
        }
    }

    async fn wait_ready(&mut self) -> Result<()> {
        for attempt in 1..=READY_ATTEMPTS {
            if self.is_ready().await? {
                return Ok(());
            }

            let running = self.running.as_mut().ok_or(PgManError::NotStarted)?;
            if let Some(status) = running.child.try_wait()? {
                return Err(PgManError::ServerStartup {
                    message: format!("server exited with {status}"),
                    output: read_log(running.dir.path()),
                });
            }

            debug!(attempt, "Postgres not ready yet");
            if attempt < READY_ATTEMPTS {
                tokio::time::sleep(READY_DELAY).await;
            }
        }

        Err(PgManError::ServerStartup {
            message: format!("server not ready after {READY_ATTEMPTS} attempts"),
            output: read_log(self.host()?),
        })
    }

    async fn is_ready(&self) -> Result<bool> {
        let status = Command::new(self.bin("pg_isready"))
            .args(["--username", self.user.as_str(), "--dbname", "postgres", "-t", "1", "-h"])
            .arg(self.host()?)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|source| PgManError::Spawn {
                program: "pg_isready".to_string(),
                source,
            })?;
        Ok(status.success())
    }

    /// Kills the server and removes its directory. Does nothing when not
    /// running.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(Running { mut child, dir }) = self.running.take() else {
            return Ok(());
        };

        if let Err(e) = child.start_kill() {
            debug!(error = %e, "Postgres already exited");
        }
        match tokio::time::timeout(STOP_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "Postgres exited"),
            Ok(Err(e)) => warn!(error = %e, "Failed to wait for postgres"),
            Err(_) => warn!("Postgres did not exit within {STOP_TIMEOUT:?}"),
        }

        let path = dir.path().to_path_buf();
        dir.close()?;
        info!(dir = %path.display(), "Ephemeral postgres stopped");
        Ok(())
    }
}

impl Drop for PostgresProcess {
    fn drop(&mut self) {
        if let Some(mut running) = self.running.take() {
            warn!("Ephemeral postgres dropped while running, killing it");
            if let Err(e) = running.child.start_kill() {
                debug!(error = %e, "Postgres already exited");
            }
        }
    }
}

fn read_log(dir: &Path) -> String {
    std::fs::read_to_string(dir.join(LOG_FILE)).unwrap_or_default()
}

/// A database created on an existing server for one run.
///
/// `create` and `destroy` are explicit; dropping a database that was created
/// but never destroyed only logs a warning, since dropping it needs a
/// connection.
pub struct TemporaryDatabase {
    base_url: String,
    name: String,
    template: Option<String>,
    created: bool,
}

impl TemporaryDatabase {
    /// Uses the server `base_url` points at, with a random database name.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            name: format!("tempdb_{}", short_uid(32)),
            template: None,
            created: false,
        }
    }

    /// Overrides the generated database name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Copies the new database from `template`.
    #[must_use]
    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Returns the database name.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.name
    }

    /// Returns whether `create` succeeded and `destroy` has not run.
    #[must_use]
    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Returns `base_url` pointing at this database.
    #[must_use]
    pub fn url(&self) -> String {
        with_database(&self.base_url, &self.name)
    }

    /// Opens a connection to this database.
    pub async fn connect(&self) -> Result<PgConnection> {
        db::connect(&self.url()).await
    }

    /// Issues `CREATE DATABASE`. Does nothing when already created.
    pub async fn create(&mut self) -> Result<()> {
        if self.created {
            return Ok(());
        }

        let mut sql = format!("CREATE DATABASE {}", quote_identifier(&self.name));
        if let Some(template) = &self.template {
            sql.push_str(" TEMPLATE ");
            sql.push_str(&quote_identifier(template));
        }

        let mut conn = db::connect(&self.base_url).await?;
        conn.execute(&sql).await?;
        conn.close().await?;

        self.created = true;
        info!(database = %self.name, "Created temporary database");
        Ok(())
    }

    /// Disconnects every other session and drops the database. Does nothing
    /// when not created.
    pub async fn destroy(&mut self) -> Result<()> {
        if !self.created {
            return Ok(());
        }

        let mut conn = db::connect(&self.base_url).await?;
        sqlx::query(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
             WHERE datname = $1 AND pid <> pg_backend_pid()",
        )
        .bind(&self.name)
        .execute(&mut conn)
        .await?;
        conn.execute(&format!("DROP DATABASE {}", quote_identifier(&self.name)))
            .await?;
        conn.close().await?;

        self.created = false;
        info!(database = %self.name, "Dropped temporary database");
        Ok(())
    }
}

impl Drop for TemporaryDatabase {
    fn drop(&mut self) {
        if self.created {
            warn!(
                database = %self.name,
                "Temporary database dropped without destroy, leaving it behind"
            );
        }
    }
}

/// Replaces the database path of a `postgresql://` URL, keeping the query.
fn with_database(url: &str, database: &str) -> String {
    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (url, None),
    };
    let authority = base.find("://").map_or(0, |i| i + 3);
    let path = base[authority..]
        .find('/')
        .map_or(base.len(), |i| authority + i);

    let mut out = format!("{}/{database}", &base[..path]);
    if let Some(query) = query {
        out.push('?');
        out.push_str(query);
    }
    out
}
