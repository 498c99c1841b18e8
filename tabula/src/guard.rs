//! Connection settings that bracket the structural phase, and the fail-fast
//! policy applied when they cannot be put back.
//!
//! Neither `foreign_keys` nor `legacy_alter_table` is transactional, and
//! `foreign_keys` is silently ignored while a transaction is open, so every
//! write is read back before it is trusted.

use sqlx::SqliteConnection;

use crate::error::{MigrateError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ConnectionSettings {
    pub foreign_keys: bool,
    pub legacy_alter_table: bool,
}

impl ConnectionSettings {
    /// Snapshot the settings the caller's connection currently runs with.
    pub async fn read(conn: &mut SqliteConnection) -> Result<Self> {
        Ok(Self {
            foreign_keys: read_flag(conn, "foreign_keys").await?,
            legacy_alter_table: read_flag(conn, "legacy_alter_table").await?,
        })
    }

    /// Turn foreign key enforcement off and legacy rename semantics on.
    ///
    /// Legacy renames leave views and triggers alone, which is what lets a
    /// rebuilt table take back its name while something still refers to it.
    pub async fn enter_structural(conn: &mut SqliteConnection) -> Result<()> {
        write_flag(conn, "foreign_keys", false).await?;
        write_flag(conn, "legacy_alter_table", true).await?;

        if read_flag(conn, "foreign_keys").await? {
            return Err(MigrateError::ForeignKeysStillEnabled);
        }

        Ok(())
    }

    /// Put back the snapshot taken by [`ConnectionSettings::read`].
    pub async fn restore(&self, conn: &mut SqliteConnection) -> Result<()> {
        let restore = async {
            write_flag(conn, "legacy_alter_table", self.legacy_alter_table).await?;
            write_flag(conn, "foreign_keys", self.foreign_keys).await?;
            read_flag(conn, "foreign_keys").await
        };

        match restore.await {
            Ok(actual) if actual == self.foreign_keys => Ok(()),
            Ok(actual) => Err(MigrateError::ForeignKeysNotRestored(format!(
                "foreign_keys reads {actual} after being set to {}",
                self.foreign_keys
            ))),
            Err(err) => Err(MigrateError::ForeignKeysNotRestored(err.to_string())),
        }
    }
}

/// Restore `settings` or take the process down.
///
/// Once a migration has committed there is nothing left to roll back, and a
/// connection that keeps running with enforcement off would accept dangling
/// references for the rest of its life. A supervisor restarting the process
/// re-runs the migration, which is then a no-op.
pub(crate) async fn restore_or_abort(conn: &mut SqliteConnection, settings: &ConnectionSettings) {
    if let Err(err) = settings.restore(conn).await {
        fail_fast(&err);
    }
}

pub(crate) fn fail_fast(err: &MigrateError) -> ! {
    tracing::error!(error = %err, "unrecoverable migration state, aborting");
    std::process::abort()
}

async fn read_flag(conn: &mut SqliteConnection, name: &'static str) -> Result<bool> {
    let sql = format!("PRAGMA {name}");

    sqlx::query_scalar::<_, i64>(&sql)
        .fetch_one(&mut *conn)
        .await
        .map(|value| value != 0)
        .map_err(|source| MigrateError::Pragma { name, source })
}

async fn write_flag(conn: &mut SqliteConnection, name: &'static str, value: bool) -> Result<()> {
    let sql = format!("PRAGMA {name} = {}", if value { "ON" } else { "OFF" });

    sqlx::raw_sql(&sql)
        .execute(&mut *conn)
        .await
        .map(|_| ())
        .map_err(|source| MigrateError::Pragma { name, source })
}
