//! pg-man CLI
//!
//! Command-line tool for managing PostgreSQL schema revisions.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use sqlx::Connection as _;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use pg_man::prelude::*;
use pg_man::db;

/// Revision-based PostgreSQL schema migrations.
#[derive(Parser)]
#[command(name = "pg-man")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the revisions schema and table.
    Init,

    /// Apply pending revisions in a single transaction.
    Upgrade,

    /// Create a new revision.
    Revision {
        /// Revision name.
        name: String,

        /// Create an empty revision instead of diffing against the DDL files.
        #[arg(long)]
        empty: bool,
    },

    /// Show the current and head revisions and what is pending.
    Status,

    /// Print the DDL files in the order they are applied.
    DdlOrder,
}

fn db_url(settings: &Settings) -> anyhow::Result<&str> {
    settings
        .db_url
        .as_deref()
        .context("No database URL configured (use --db-url or DATABASE_URL)")
}

fn describe(revision: Option<&Revision>) -> String {
    revision.map_or_else(|| "<none>".to_string(), ToString::to_string)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let settings = &cli.settings;

    match cli.command {
        Commands::Init => {
            let mut conn = db::connect(db_url(settings)?).await?;
            let mut tx = conn.begin().await?;
            init_revisions_table(&mut *tx, &settings.dbman_schema).await?;
            tx.commit().await?;
            info!("Revisions table ready.");
        }

        Commands::Upgrade => {
            let repo = RevisionRepo::new(settings.revision_dir(), &settings.dbman_schema)?;
            if repo.revisions().is_empty() {
                info!("No revision files in directory '{}'", repo.root().display());
            }

            let mut conn = db::connect(db_url(settings)?).await?;
            let mut tx = conn.begin().await?;
            let applied = repo.upgrade_db(&mut *tx).await?;
            tx.commit().await?;

            if applied.is_empty() {
                info!("Database already up to date.");
            } else {
                info!("Applied {} revision(s).", applied.len());
            }
        }

        Commands::Revision { name, empty } => {
            let mut repo = RevisionRepo::new(settings.revision_dir(), &settings.dbman_schema)?;
            let url = db_url(settings)?;
            let mut conn = db::connect(url).await?;

            let current = repo.get_current_revision(&mut conn).await?;
            if !same_revision(current.as_ref(), repo.head()) {
                bail!("Database is not up to date");
            }

            let content = if empty {
                String::new()
            } else {
                let mut ddl = DdlRepo::new(settings.ddl_dir())?;
                generate_revision(settings, &mut conn, url, &mut ddl, &repo).await?
            };

            let revision = repo.add(&name, &content)?;
            println!("Created new revision {}", revision.path.display());
        }

        Commands::Status => {
            let repo = RevisionRepo::new(settings.revision_dir(), &settings.dbman_schema)?;
            let mut conn = db::connect(db_url(settings)?).await?;

            let current = repo.get_current_revision(&mut conn).await?;
            println!("Current: {}", describe(current.as_ref()));
            println!("Head:    {}", describe(repo.head()));

            let pending = repo.pending(&mut conn).await?;
            if pending.is_empty() {
                println!("\nDatabase is up to date.");
            } else {
                println!("\nPending revisions:");
                println!("{:-<60}", "");
                for revision in pending {
                    println!(" [ ] {revision}");
                }
                println!();
            }
        }

        Commands::DdlOrder => {
            let mut ddl = DdlRepo::new(settings.ddl_dir())?;
            let root = ddl.root().to_path_buf();
            for file in ddl.topological_order()? {
                let path = file.path.strip_prefix(&root).unwrap_or(&file.path);
                println!("{}", path.display());
            }
        }
    }

    Ok(())
}
