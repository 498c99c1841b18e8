use std::future::{pending, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use sqlx::{Connection, Sqlite, SqliteConnection, Transaction};

use crate::catalog::{Catalog, ObjectKind, TargetCatalog};
use crate::config::MigrateConfig;
use crate::diff::MigrationPlan;
use crate::error::{ForeignKeyViolation, MigrateError, Result};
use crate::guard::{restore_or_abort, ConnectionSettings};
use crate::observer::{MigrationEvent, Observer, TracingObserver};
use crate::reconcile::Reconciler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Apply,
    DryRun,
}

/// Brings a live database to the shape described by a schema script.
///
/// # Example
///
/// ```rust,ignore
/// use sqlx::{Connection, SqliteConnection};
///
/// let mut conn = SqliteConnection::connect("sqlite:app.db").await?;
/// let plan = tabula::Migrator::default()
///     .migrate(&mut conn, include_str!("schema.sql"))
///     .await?;
///
/// println!("{plan}");
/// ```
///
/// # Sequence
///
/// 1. Materialize the script in an ephemeral database attached to `conn`
/// 2. Turn foreign key enforcement off
/// 3. In one transaction: reconcile tables, views, indexes, then triggers, and
///    run `PRAGMA foreign_key_check`
/// 4. Commit, or roll back on the first error
/// 5. Put foreign key enforcement back as it was, detach the target
///
/// If step 5 cannot restore enforcement the process is aborted.
#[derive(Clone)]
pub struct Migrator {
    config: MigrateConfig,
    observer: Arc<dyn Observer>,
}

impl Default for Migrator {
    fn default() -> Self {
        Self::new(MigrateConfig::default())
    }
}

impl Migrator {
    pub fn new(config: MigrateConfig) -> Self {
        Self {
            config,
            observer: Arc::new(TracingObserver),
        }
    }

    /// Replace the default [`TracingObserver`].
    pub fn observer(mut self, observer: impl Observer + 'static) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    pub fn config(&self) -> &MigrateConfig {
        &self.config
    }

    /// Reconcile the schema of `conn` with `schema` and commit the result.
    pub async fn migrate(
        &self,
        conn: &mut SqliteConnection,
        schema: &str,
    ) -> Result<MigrationPlan> {
        self.run(conn, schema, pending(), Mode::Apply).await
    }

    /// Same as [`Migrator::migrate`], rolling back with
    /// [`MigrateError::Cancelled`] if `cancel` completes before the
    /// reconciliation does.
    pub async fn migrate_until(
        &self,
        conn: &mut SqliteConnection,
        schema: &str,
        cancel: impl Future<Output = ()>,
    ) -> Result<MigrationPlan> {
        self.run(conn, schema, cancel, Mode::Apply).await
    }

    /// Dry run: apply everything inside a transaction that is always rolled
    /// back, and report what was done.
    pub async fn plan(
        &self,
        conn: &mut SqliteConnection,
        schema: &str,
    ) -> Result<MigrationPlan> {
        self.run(conn, schema, pending(), Mode::DryRun).await
    }

    async fn run(
        &self,
        conn: &mut SqliteConnection,
        schema: &str,
        cancel: impl Future<Output = ()>,
        mode: Mode,
    ) -> Result<MigrationPlan> {
        let started = Instant::now();
        let dry_run = mode == Mode::DryRun;

        let outcome = self.run_inner(conn, schema, cancel, mode).await;

        let event = match &outcome {
            Ok(plan) => MigrationEvent::Finished {
                elapsed: started.elapsed(),
                changes: plan.len(),
                dry_run,
            },
            Err(err) => MigrationEvent::Failed {
                elapsed: started.elapsed(),
                error: err.to_string(),
                dry_run,
            },
        };
        self.observer.observe(&event);

        outcome
    }

    async fn run_inner(
        &self,
        conn: &mut SqliteConnection,
        schema: &str,
        cancel: impl Future<Output = ()>,
        mode: Mode,
    ) -> Result<MigrationPlan> {
        self.config.validate()?;
        tokio::pin!(cancel);

        let target = TargetCatalog::attach(conn, schema, &self.config).await?;
        let outcome = self.run_attached(conn, &target, cancel, mode).await;
        target.release(conn).await;

        outcome
    }

    async fn run_attached<F: Future<Output = ()>>(
        &self,
        conn: &mut SqliteConnection,
        target: &TargetCatalog,
        cancel: Pin<&mut F>,
        mode: Mode,
    ) -> Result<MigrationPlan> {
        let catalog = Catalog::load(conn, target.alias(), &self.config).await?;
        let settings = ConnectionSettings::read(conn).await?;

        if let Err(err) = ConnectionSettings::enter_structural(conn).await {
            restore_or_abort(conn, &settings).await;
            return Err(err);
        }

        let outcome = self.transaction(conn, &catalog, cancel, mode).await;

        restore_or_abort(conn, &settings).await;

        outcome
    }

    async fn transaction<F: Future<Output = ()>>(
        &self,
        conn: &mut SqliteConnection,
        target: &Catalog,
        cancel: Pin<&mut F>,
        mode: Mode,
    ) -> Result<MigrationPlan> {
        let mut tx = conn.begin().await.map_err(MigrateError::Transaction)?;

        let reconciled = tokio::select! {
            biased;

            _ = cancel => Err(MigrateError::Cancelled),
            plan = self.reconcile(&mut tx, target) => plan,
        };

        match (reconciled, mode) {
            (Ok(plan), Mode::Apply) => {
                tx.commit().await.map_err(MigrateError::Commit)?;
                Ok(plan)
            }
            (Ok(plan), Mode::DryRun) => {
                rollback(tx).await;
                Ok(plan)
            }
            (Err(err), _) => {
                tracing::warn!(error = %err, "migration failed, rolling back");
                rollback(tx).await;
                Err(err)
            }
        }
    }

    async fn reconcile(
        &self,
        conn: &mut SqliteConnection,
        target: &Catalog,
    ) -> Result<MigrationPlan> {
        let reconciler = Reconciler {
            config: &self.config,
            target,
            observer: self.observer.as_ref(),
        };

        let mut plan = MigrationPlan::default();
        plan.set(ObjectKind::Table, reconciler.tables(conn).await?);

        for kind in [ObjectKind::View, ObjectKind::Index, ObjectKind::Trigger] {
            plan.set(kind, reconciler.objects(conn, kind).await?);
        }

        check_foreign_keys(conn).await?;

        Ok(plan)
    }
}

/// Fail with every dangling reference left in the live schema.
async fn check_foreign_keys(conn: &mut SqliteConnection) -> Result<()> {
    let violations = sqlx::query_as::<_, ForeignKeyViolation>("PRAGMA main.foreign_key_check")
        .persistent(false)
        .fetch_all(&mut *conn)
        .await
        .map_err(MigrateError::catalog("main"))?;

    if violations.is_empty() {
        return Ok(());
    }

    Err(MigrateError::IntegrityViolation(violations))
}

/// Roll back, tolerating a transaction sqlite already ended on its own.
async fn rollback(tx: Transaction<'_, Sqlite>) {
    if let Err(err) = tx.rollback().await {
        tracing::warn!(error = %err, "rollback failed, transaction already finished");
    }
}

/// Reconcile `conn` with `schema` using the default configuration.
pub async fn migrate(conn: &mut SqliteConnection, schema: &str) -> Result<MigrationPlan> {
    Migrator::default().migrate(conn, schema).await
}
