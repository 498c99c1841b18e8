use std::sync::Arc;

use serde_json::json;
use tabula::{MigrationEvent, Migrator, ObjectKind, RecordingObserver, SchemaDiff};
use tracing_test::traced_test;

mod common;

use crate::common::{catalog, connect, exec};

const LIVE: &str = "
    CREATE TABLE t(id INTEGER PRIMARY KEY, name TEXT);
    CREATE INDEX t_name ON t(name);
    CREATE TABLE legacy(id INTEGER PRIMARY KEY);
    INSERT INTO t (id, name) VALUES (1, 'a');
";

const TARGET: &str = "
    CREATE TABLE t(id INTEGER PRIMARY KEY, name TEXT, email TEXT);
    CREATE INDEX t_name ON t(name);
    CREATE TABLE u(id INTEGER PRIMARY KEY);
";

#[tokio::test]
async fn one_event_per_structural_operation() -> anyhow::Result<()> {
    let mut conn = connect().await?;
    exec(&mut conn, LIVE).await?;

    let observer = Arc::new(RecordingObserver::new());
    Migrator::default()
        .observer(observer.clone())
        .migrate(&mut conn, TARGET)
        .await?;

    let mut events = observer.take();
    let finished = events.pop();

    assert_eq!(
        events,
        vec![
            MigrationEvent::Dropped {
                kind: ObjectKind::Table,
                name: "legacy".to_owned(),
            },
            MigrationEvent::Created {
                kind: ObjectKind::Table,
                name: "u".to_owned(),
            },
            MigrationEvent::Rebuilt {
                name: "t".to_owned(),
                columns: vec!["id".to_owned(), "name".to_owned()],
            },
            MigrationEvent::Created {
                kind: ObjectKind::Index,
                name: "t_name".to_owned(),
            },
        ]
    );

    assert!(matches!(
        finished,
        Some(MigrationEvent::Finished {
            changes: 4,
            dry_run: false,
            ..
        })
    ));
    assert!(observer.events().is_empty());

    Ok(())
}

#[tokio::test]
async fn events_serialize_with_a_tag() -> anyhow::Result<()> {
    let event = MigrationEvent::Rebuilt {
        name: "t".to_owned(),
        columns: vec!["id".to_owned()],
    };

    assert_eq!(
        serde_json::to_value(&event)?,
        json!({ "event": "rebuilt", "name": "t", "columns": ["id"] })
    );

    let event = MigrationEvent::Dropped {
        kind: ObjectKind::Trigger,
        name: "guard".to_owned(),
    };

    assert_eq!(
        serde_json::to_value(&event)?,
        json!({ "event": "dropped", "kind": "trigger", "name": "guard" })
    );

    Ok(())
}

#[tokio::test]
async fn dry_run_reports_without_applying() -> anyhow::Result<()> {
    let mut conn = connect().await?;
    exec(&mut conn, LIVE).await?;
    let before = catalog(&mut conn).await?;

    let observer = Arc::new(RecordingObserver::new());
    let migrator = Migrator::default().observer(observer.clone());

    let planned = migrator.plan(&mut conn, TARGET).await?;

    assert_eq!(catalog(&mut conn).await?, before);
    assert_eq!(
        planned.tables.iter().map(SchemaDiff::name).collect::<Vec<_>>(),
        vec!["legacy", "u", "t"]
    );
    assert!(matches!(
        observer.take().last(),
        Some(MigrationEvent::Finished { dry_run: true, .. })
    ));

    let applied = migrator.migrate(&mut conn, TARGET).await?;
    assert_eq!(applied, planned);

    assert_eq!(
        serde_json::to_value(&applied)?["indexes"],
        json!([{ "change": "created", "name": "t_name", "sql": "CREATE INDEX t_name ON t(name)" }])
    );

    Ok(())
}

#[tokio::test]
async fn failed_run_ends_with_a_failed_event() -> anyhow::Result<()> {
    let mut conn = connect().await?;
    exec(&mut conn, LIVE).await?;

    let observer = Arc::new(RecordingObserver::new());
    let err = Migrator::default()
        .observer(observer.clone())
        .migrate(
            &mut conn,
            "CREATE TABLE t(id INTEGER PRIMARY KEY, name TEXT, email TEXT NOT NULL);",
        )
        .await
        .unwrap_err();

    let events = observer.take();
    assert!(!events
        .iter()
        .any(|e| matches!(e, MigrationEvent::Finished { .. })));

    let Some(MigrationEvent::Failed { error, dry_run, .. }) = events.last() else {
        panic!("expected a failed event last, got {events:?}");
    };
    assert_eq!(error, &err.to_string());
    assert!(!dry_run);

    assert_eq!(
        serde_json::to_value(events.last())?["event"],
        json!("failed")
    );

    Ok(())
}

#[tokio::test]
#[traced_test]
async fn default_observer_logs_through_tracing() -> anyhow::Result<()> {
    let mut conn = connect().await?;
    exec(&mut conn, LIVE).await?;

    tabula::migrate(&mut conn, TARGET).await?;

    assert!(logs_contain("rebuilt"));
    assert!(logs_contain("migration finished"));

    let failed = tabula::migrate(&mut conn, "CREATE TABLE t(email TEXT NOT NULL);").await;
    assert!(failed.is_err());
    assert!(logs_contain("migration failed"));

    Ok(())
}
