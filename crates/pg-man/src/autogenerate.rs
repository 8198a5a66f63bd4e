//! Revision autogeneration.
//!
//! Renders the DDL set into an ephemeral server, dumps the schema of both that
//! server and the target database, and lets apgdiff compute the SQL that takes
//! the target to the rendered schema.

use std::path::Path;

use sqlx::Connection as _;
use tokio::process::Command;
use tracing::info;

use crate::config::Settings;
use crate::db::Connection;
use crate::ddl::DdlRepo;
use crate::error::{PgManError, Result};
use crate::pg::{run_tool, PostgresProcess};
use crate::revisions::{same_revision, Revision, RevisionRepo};

/// Produces the SQL of a new revision.
///
/// `target` must be at the repository head; otherwise this fails before any
/// server is started. `target_url` is handed to `pg_dump`.
pub async fn generate_revision<C>(
    settings: &Settings,
    target: &mut C,
    target_url: &str,
    ddl: &mut DdlRepo,
    revisions: &RevisionRepo,
) -> Result<String>
where
    C: Connection + ?Sized,
{
    let current = revisions.get_current_revision(target).await?;
    if !same_revision(current.as_ref(), revisions.head()) {
        return Err(PgManError::DatabaseNotUpToDate {
            current: describe(current.as_ref()),
            head: describe(revisions.head()),
        });
    }

    let mut builder = tempfile::Builder::new();
    builder.prefix("pg-man-diff-");
    let scratch = match &settings.temp_dir {
        Some(root) => builder.tempdir_in(root)?,
        None => builder.tempdir()?,
    };

    let mut pg = PostgresProcess::new(&settings.postgres_path);
    if let Some(root) = &settings.temp_dir {
        pg = pg.temp_root(root);
    }
    if let Err(e) = pg.start().await {
        scratch.close()?;
        return Err(e);
    }

    let diff = render_and_diff(settings, &pg, ddl, target_url, scratch.path()).await;
    let stopped = pg.stop().await;
    let cleaned = scratch.close();

    let diff = diff?;
    stopped?;
    cleaned?;

    info!(bytes = diff.len(), "Generated revision content");
    Ok(diff)
}

async fn render_and_diff(
    settings: &Settings,
    pg: &PostgresProcess,
    ddl: &mut DdlRepo,
    target_url: &str,
    scratch: &Path,
) -> Result<String> {
    let mut conn = pg.connect().await?;
    let mut tx = conn.begin().await?;
    ddl.apply(&mut *tx).await?;
    tx.commit().await?;
    conn.close().await?;

    let current_path = scratch.join("current.sql");
    let upgrade_path = scratch.join("upgrade.sql");
    dump_schema(settings, target_url, &current_path).await?;
    dump_schema(settings, &pg.url()?, &upgrade_path).await?;

    diff_schemas(settings, &current_path, &upgrade_path).await
}

/// Writes a schema-only dump of `url`, without the state schema, to `out`.
pub async fn dump_schema(settings: &Settings, url: &str, out: &Path) -> Result<()> {
    run_tool(
        Command::new(settings.pg_bin("pg_dump"))
            .args(["--no-owner", "--schema-only", "--exclude-schema"])
            .arg(&settings.dbman_schema)
            .arg("--file")
            .arg(out)
            .arg(url),
        "pg_dump",
    )
    .await?;
    Ok(())
}

/// Runs apgdiff over two dumps and returns the SQL it prints.
pub async fn diff_schemas(settings: &Settings, current: &Path, target: &Path) -> Result<String> {
    let output = run_tool(
        Command::new(&settings.java)
            .arg("-jar")
            .arg(&settings.apgdiff_jar)
            .arg(current)
            .arg(target),
        "apgdiff",
    )
    .await?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn describe(revision: Option<&Revision>) -> String {
    revision.map_or_else(|| "none".to_string(), ToString::to_string)
}
