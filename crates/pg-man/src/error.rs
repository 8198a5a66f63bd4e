//! Error types for the migration engine.

use std::path::PathBuf;
use std::process::ExitStatus;

/// Errors that can occur while loading, applying or generating revisions.
#[derive(Debug, thiserror::Error)]
pub enum PgManError {
    /// A file in the revisions directory does not follow `NNNN_UID_name.sql`.
    #[error("Invalid revision filename: {}", path.display())]
    InvalidRevisionFilename {
        /// Offending file.
        path: PathBuf,
    },

    /// A revision name that cannot be embedded in a filename.
    #[error("Invalid revision name: '{0}'")]
    InvalidRevisionName(String),

    /// The front matter of a DDL file could not be parsed or validated.
    #[error("Invalid front matter in '{}': {message}", path.display())]
    InvalidFrontMatter {
        /// DDL file carrying the block.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// A `depends_on` entry points at nothing on disk.
    #[error("DDL file '{}' depends on '{}' which doesn't exist", file.display(), dependency.display())]
    MissingDependency {
        /// The file declaring the dependency.
        file: PathBuf,
        /// The resolved dependency path.
        dependency: PathBuf,
    },

    /// A DDL file lists itself as a dependency.
    #[error("DDL file '{}' depends on itself", path.display())]
    Cycle {
        /// The self-referencing file.
        path: PathBuf,
    },

    /// The target database has not been upgraded to the repository head.
    #[error("Database not up to date (current: {current}, head: {head})")]
    DatabaseNotUpToDate {
        /// Current revision applied to the database.
        current: String,
        /// Head revision on disk.
        head: String,
    },

    /// The persisted current revision has no matching file on disk.
    #[error("Can't locate head revision {index:04}_{uid}_{name}: {}", path.display())]
    RevisionStateMismatch {
        /// Persisted index.
        index: i32,
        /// Persisted uid.
        uid: String,
        /// Persisted name.
        name: String,
        /// Where the revision file was expected.
        path: PathBuf,
    },

    /// `start()` was called on a server that is already running.
    #[error("Postgres process already started")]
    AlreadyStarted,

    /// The server was used before `start()`.
    #[error("Postgres process not started")]
    NotStarted,

    /// The ephemeral server did not come up.
    #[error("Failed to start postgres: {message}\n{output}")]
    ServerStartup {
        /// What went wrong.
        message: String,
        /// Captured server output.
        output: String,
    },

    /// An external program could not be launched.
    #[error("Failed to run '{program}': {source}")]
    Spawn {
        /// Program that failed to launch.
        program: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// An external program exited unsuccessfully.
    #[error("'{tool}' failed ({status}):\n{output}")]
    ToolFailed {
        /// Program name.
        tool: String,
        /// Exit status.
        status: ExitStatus,
        /// Captured output.
        output: String,
    },

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error (reading/writing revision and DDL files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, PgManError>;
