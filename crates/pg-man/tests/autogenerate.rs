//! Revision autogeneration.
//!
//! External tools are replaced by shell scripts. The live test needs a
//! PostgreSQL installation and apgdiff; it is skipped unless
//! `PG_MAN_TEST_POSTGRES_PATH` and `PG_MAN_TEST_APGDIFF_JAR` are set.

mod common;

use std::env;
use std::fs;
use std::path::PathBuf;

use common::{write_file, RecordingConnection};
use pg_man::autogenerate::generate_revision;
use pg_man::config::Settings;
use pg_man::ddl::DdlRepo;
use pg_man::error::PgManError;
use pg_man::history::{init_revisions_table, RevisionRow};
use pg_man::pg::{PostgresProcess, TemporaryDatabase};
use pg_man::revisions::RevisionRepo;
use tempfile::TempDir;

#[cfg(unix)]
#[tokio::test]
async fn test_stale_database_starts_no_server() {
    use common::FakePostgres;

    let work = TempDir::new().unwrap();
    let install = TempDir::new().unwrap();
    let marker = install.path().join("initdb-ran");
    let postgres_path = FakePostgres {
        initdb: format!("touch '{}'; mkdir -p \"$2\"", marker.display()),
        ..FakePostgres::default()
    }
    .install(install.path());

    let settings = Settings {
        workdir: work.path().to_path_buf(),
        postgres_path,
        ..Settings::default()
    };
    write_file(&settings.ddl_dir(), "person.sql", "CREATE TABLE person (id int);");
    let mut ddl = DdlRepo::new(settings.ddl_dir()).unwrap();
    let mut revisions = RevisionRepo::new(settings.revision_dir(), "dbman").unwrap();
    revisions.add("init", "-- init").unwrap();
    revisions.add("second", "-- second").unwrap();

    let mut conn = RecordingConnection::new();
    init_revisions_table(&mut conn, "dbman").await.unwrap();
    let first = &revisions.revisions()[0];
    conn.rows.push(RevisionRow {
        index: 0,
        uid: first.uid.clone(),
        name: first.name.clone(),
    });

    let err = generate_revision(&settings, &mut conn, "postgresql://unused", &mut ddl, &revisions)
        .await
        .unwrap_err();

    match err {
        PgManError::DatabaseNotUpToDate { current, head } => {
            assert_eq!(current, revisions.revisions()[0].to_string());
            assert_eq!(head, revisions.revisions()[1].to_string());
        }
        other => panic!("expected stale database, got {other:?}"),
    }
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_stale_database_without_state() {
    let work = TempDir::new().unwrap();
    let settings = Settings {
        workdir: work.path().to_path_buf(),
        postgres_path: PathBuf::from("/nonexistent"),
        ..Settings::default()
    };
    let mut ddl = DdlRepo::new(work.path()).unwrap();
    let mut revisions = RevisionRepo::new(settings.revision_dir(), "dbman").unwrap();
    revisions.add("init", "-- init").unwrap();

    let mut conn = RecordingConnection::new();
    let err = generate_revision(&settings, &mut conn, "postgresql://unused", &mut ddl, &revisions)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PgManError::DatabaseNotUpToDate { ref current, .. } if current == "none"
    ));
}

#[cfg(unix)]
mod tools {
    use super::*;

    use super::common::{entries, install_script, FakePostgres};
    use pg_man::autogenerate::{diff_schemas, dump_schema};

    fn settings_in(dir: &TempDir) -> Settings {
        Settings {
            workdir: dir.path().join("schema"),
            postgres_path: dir.path().join("pg"),
            java: dir.path().join("java"),
            apgdiff_jar: PathBuf::from("apgdiff.jar"),
            temp_dir: Some(dir.path().join("tmp")),
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn test_dump_schema_arguments() {
        let dir = TempDir::new().unwrap();
        let settings = settings_in(&dir);
        let args = dir.path().join("args");
        install_script(
            &settings.postgres_path.join("bin"),
            "pg_dump",
            &format!(
                "printf '%s\\n' \"$@\" > '{}'; echo 'CREATE TABLE t ();' > \"$6\"",
                args.display()
            ),
        );
        let out = dir.path().join("dump.sql");

        dump_schema(&settings, "postgresql://db/app", &out).await.unwrap();

        assert_eq!(fs::read_to_string(&out).unwrap(), "CREATE TABLE t ();\n");
        let args = fs::read_to_string(&args).unwrap();
        let args: Vec<&str> = args.lines().collect();
        assert_eq!(
            args,
            [
                "--no-owner",
                "--schema-only",
                "--exclude-schema",
                "dbman",
                "--file",
                out.to_str().unwrap(),
                "postgresql://db/app",
            ]
        );
    }

    #[tokio::test]
    async fn test_dump_failure_carries_output() {
        let dir = TempDir::new().unwrap();
        let settings = settings_in(&dir);
        install_script(
            &settings.postgres_path.join("bin"),
            "pg_dump",
            "echo 'pg_dump: error: connection refused' >&2; exit 1",
        );

        let err = dump_schema(&settings, "postgresql://db/app", &dir.path().join("dump.sql"))
            .await
            .unwrap_err();

        match err {
            PgManError::ToolFailed { tool, output, status } => {
                assert_eq!(tool, "pg_dump");
                assert!(output.contains("connection refused"), "{output}");
                assert_eq!(status.code(), Some(1));
            }
            other => panic!("expected pg_dump failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_diff_schemas_returns_stdout() {
        let dir = TempDir::new().unwrap();
        let settings = settings_in(&dir);
        install_script(
            dir.path(),
            "java",
            "[ \"$1\" = -jar ] || exit 9; echo \"-- $2\"; cat \"$4\"; echo 'noise' >&2",
        );
        let current = write_file(dir.path(), "current.sql", "");
        let target = write_file(dir.path(), "target.sql", "CREATE TABLE person ();\n");

        let sql = diff_schemas(&settings, &current, &target).await.unwrap();

        assert_eq!(sql, "-- apgdiff.jar\nCREATE TABLE person ();\n");
    }

    #[tokio::test]
    async fn test_diff_failure_carries_output() {
        let dir = TempDir::new().unwrap();
        let settings = settings_in(&dir);
        install_script(
            dir.path(),
            "java",
            "echo 'Error: Unable to access jarfile' >&2; exit 1",
        );
        let current = write_file(dir.path(), "current.sql", "");

        match diff_schemas(&settings, &current, &current).await {
            Err(PgManError::ToolFailed { tool, output, .. }) => {
                assert_eq!(tool, "apgdiff");
                assert!(output.contains("Unable to access jarfile"));
            }
            other => panic!("expected apgdiff failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_java() {
        let dir = TempDir::new().unwrap();
        let settings = settings_in(&dir);
        let current = write_file(dir.path(), "current.sql", "");

        assert!(matches!(
            diff_schemas(&settings, &current, &current).await,
            Err(PgManError::Spawn { ref program, .. }) if program == "apgdiff"
        ));
    }

    #[tokio::test]
    async fn test_scratch_removed_when_server_fails() {
        let dir = TempDir::new().unwrap();
        let settings = settings_in(&dir);
        FakePostgres {
            initdb: "echo 'initdb: cannot be run as root' >&2; exit 1".to_string(),
            ..FakePostgres::default()
        }
        .install(&settings.postgres_path);
        fs::create_dir_all(settings.temp_dir.as_ref().unwrap()).unwrap();
        fs::create_dir_all(settings.ddl_dir()).unwrap();
        let mut ddl = DdlRepo::new(settings.ddl_dir()).unwrap();
        let revisions = RevisionRepo::new(settings.revision_dir(), "dbman").unwrap();
        let mut conn = RecordingConnection::new();

        let err =
            generate_revision(&settings, &mut conn, "postgresql://db/app", &mut ddl, &revisions)
                .await
                .unwrap_err();

        assert!(matches!(err, PgManError::ToolFailed { ref tool, .. } if tool == "initdb"));
        assert!(entries(settings.temp_dir.as_ref().unwrap()).is_empty());
    }

    #[tokio::test]
    async fn test_scratch_removed_when_render_fails() {
        let dir = TempDir::new().unwrap();
        let settings = settings_in(&dir);
        // Reports ready but never opens a socket, so connecting fails.
        FakePostgres::default().install(&settings.postgres_path);
        fs::create_dir_all(settings.temp_dir.as_ref().unwrap()).unwrap();
        fs::create_dir_all(settings.ddl_dir()).unwrap();
        let mut ddl = DdlRepo::new(settings.ddl_dir()).unwrap();
        let revisions = RevisionRepo::new(settings.revision_dir(), "dbman").unwrap();
        let mut conn = RecordingConnection::new();

        let result =
            generate_revision(&settings, &mut conn, "postgresql://db/app", &mut ddl, &revisions)
                .await;

        assert!(matches!(result, Err(PgManError::Database(_))), "{result:?}");
        assert!(entries(settings.temp_dir.as_ref().unwrap()).is_empty());
    }
}

#[tokio::test]
async fn test_generate_against_live_server() {
    let (Ok(postgres_path), Ok(apgdiff_jar)) = (
        env::var("PG_MAN_TEST_POSTGRES_PATH"),
        env::var("PG_MAN_TEST_APGDIFF_JAR"),
    ) else {
        return;
    };

    let work = TempDir::new().unwrap();
    let settings = Settings {
        workdir: work.path().to_path_buf(),
        postgres_path: postgres_path.into(),
        apgdiff_jar: apgdiff_jar.into(),
        ..Settings::default()
    };
    write_file(&settings.ddl_dir(), "person.sql", "CREATE TABLE person (id integer);");
    let mut ddl = DdlRepo::new(settings.ddl_dir()).unwrap();
    let revisions = RevisionRepo::new(settings.revision_dir(), &settings.dbman_schema).unwrap();

    let mut server = PostgresProcess::new(&settings.postgres_path);
    server.start().await.unwrap();
    let mut target = TemporaryDatabase::new(server.url().unwrap());
    target.create().await.unwrap();
    let mut conn = target.connect().await.unwrap();

    let sql = generate_revision(&settings, &mut conn, &target.url(), &mut ddl, &revisions)
        .await
        .unwrap();

    assert!(sql.contains("CREATE TABLE person"), "{sql}");
    drop(conn);
    target.destroy().await.unwrap();
    server.stop().await.unwrap();
}
