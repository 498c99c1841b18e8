use sqlx::SqliteConnection;

use crate::catalog::{Catalog, ObjectKind};
use crate::columns::{column_list, common_columns, quote_ident, table_columns};
use crate::config::MigrateConfig;
use crate::definition::{is_virtual_table, rename_definition};
use crate::diff::{diff, SchemaDiff};
use crate::error::{MigrateError, Operation, Result};
use crate::observer::{MigrationEvent, Observer};

/// Applies the diff between the live schema and an attached target, one kind
/// of object at a time.
pub(crate) struct Reconciler<'a> {
    pub config: &'a MigrateConfig,
    pub target: &'a Catalog,
    pub observer: &'a dyn Observer,
}

impl Reconciler<'_> {
    /// Drop removed tables, create new ones, rebuild changed ones.
    ///
    /// Virtual tables cannot be rebuilt through a copy; a changed one is
    /// dropped and created again, along with its shadow tables.
    pub async fn tables(&self, conn: &mut SqliteConnection) -> Result<Vec<SchemaDiff>> {
        let diffs = self.diff(conn, ObjectKind::Table).await?;

        for change in &diffs {
            match change {
                SchemaDiff::Deleted { name } => {
                    self.drop_object(conn, ObjectKind::Table, name).await?
                }
                SchemaDiff::Created { name, sql } => {
                    self.create_object(conn, ObjectKind::Table, name, sql).await?
                }
                SchemaDiff::Changed {
                    name, target_sql, ..
                } if is_virtual_table(target_sql) => {
                    self.replace(conn, ObjectKind::Table, name, target_sql)
                        .await?
                }
                SchemaDiff::Changed {
                    name, target_sql, ..
                } => self.rebuild(conn, name, target_sql).await?,
            }
        }

        Ok(diffs)
    }

    /// Reconcile views, indexes or triggers. Changed objects are dropped and
    /// created again; sqlite cannot alter them in place.
    pub async fn objects(
        &self,
        conn: &mut SqliteConnection,
        kind: ObjectKind,
    ) -> Result<Vec<SchemaDiff>> {
        debug_assert_ne!(kind, ObjectKind::Table);

        let diffs = self.diff(conn, kind).await?;

        for change in &diffs {
            match change {
                SchemaDiff::Deleted { name } => self.drop_object(conn, kind, name).await?,
                SchemaDiff::Created { name, sql } => {
                    self.create_object(conn, kind, name, sql).await?
                }
                SchemaDiff::Changed {
                    name, target_sql, ..
                } => self.replace(conn, kind, name, target_sql).await?,
            }
        }

        Ok(diffs)
    }

    async fn diff(
        &self,
        conn: &mut SqliteConnection,
        kind: ObjectKind,
    ) -> Result<Vec<SchemaDiff>> {
        let live = Catalog::load(conn, "main", self.config).await?;

        Ok(diff(&live, self.target, kind))
    }

    async fn replace(
        &self,
        conn: &mut SqliteConnection,
        kind: ObjectKind,
        name: &str,
        sql: &str,
    ) -> Result<()> {
        exec(conn, &drop_sql(kind, name), Operation::Drop, kind, name).await?;
        exec(conn, sql, Operation::Create, kind, name).await?;

        self.observer.observe(&MigrationEvent::Replaced {
            kind,
            name: name.to_owned(),
        });

        Ok(())
    }

    async fn drop_object(
        &self,
        conn: &mut SqliteConnection,
        kind: ObjectKind,
        name: &str,
    ) -> Result<()> {
        exec(conn, &drop_sql(kind, name), Operation::Drop, kind, name).await?;

        self.observer.observe(&MigrationEvent::Dropped {
            kind,
            name: name.to_owned(),
        });

        Ok(())
    }

    async fn create_object(
        &self,
        conn: &mut SqliteConnection,
        kind: ObjectKind,
        name: &str,
        sql: &str,
    ) -> Result<()> {
        exec(conn, sql, Operation::Create, kind, name).await?;

        self.observer.observe(&MigrationEvent::Created {
            kind,
            name: name.to_owned(),
        });

        Ok(())
    }

    /// Move `name` to its new definition: create it under a temporary name,
    /// copy the columns both shapes share, drop the old table and rename the
    /// new one into place.
    async fn rebuild(
        &self,
        conn: &mut SqliteConnection,
        name: &str,
        target_sql: &str,
    ) -> Result<()> {
        let kind = ObjectKind::Table;
        let temp = format!("{}{}", self.config.temp_prefix, name);

        let create = rename_definition(target_sql, &temp).ok_or_else(|| {
            MigrateError::structural(Operation::Create, kind, &temp, target_sql)(
                sqlx::Error::Protocol(format!("no table name found in definition of `{name}`")),
            )
        })?;
        exec(conn, &create, Operation::Create, kind, &temp).await?;

        let old = table_columns(conn, "main", name).await?;
        let new = table_columns(conn, &self.config.target_alias, name).await?;
        let columns = common_columns(&old, &new);

        if !columns.is_empty() {
            let list = column_list(&columns);
            let copy = format!(
                "INSERT INTO main.{} ({list}) SELECT {list} FROM main.{}",
                quote_ident(&temp),
                quote_ident(name)
            );
            exec(conn, &copy, Operation::Copy, kind, &temp).await?;
        }

        exec(conn, &drop_sql(kind, name), Operation::Drop, kind, name).await?;

        let rename = format!(
            "ALTER TABLE main.{} RENAME TO {}",
            quote_ident(&temp),
            quote_ident(name)
        );
        exec(conn, &rename, Operation::Rename, kind, name).await?;

        self.observer.observe(&MigrationEvent::Rebuilt {
            name: name.to_owned(),
            columns,
        });

        Ok(())
    }
}

async fn exec(
    conn: &mut SqliteConnection,
    sql: &str,
    op: Operation,
    kind: ObjectKind,
    name: &str,
) -> Result<()> {
    tracing::debug!(%kind, %name, %sql, "exec");

    sqlx::raw_sql(sql)
        .execute(&mut *conn)
        .await
        .map(|_| ())
        .map_err(MigrateError::structural(op, kind, name, sql))
}

fn drop_sql(kind: ObjectKind, name: &str) -> String {
    format!("DROP {} main.{}", kind.keyword(), quote_ident(name))
}
