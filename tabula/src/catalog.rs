//! Schema catalogs.
//!
//! A [`Catalog`] is the list of user objects found in one schema of a
//! connection: `main` for the live database, or the alias the ephemeral target
//! database is attached under. [`TargetCatalog`] owns that ephemeral database.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{Connection, SqliteConnection};
use uuid::Uuid;

use crate::columns::quote_ident;
use crate::config::MigrateConfig;
use crate::definition::rename_definition;
use crate::error::{MigrateError, Result};

/// Kind of a schema object, as stored in the `type` column of `sqlite_master`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Table,
    View,
    Index,
    Trigger,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Table => "table",
            ObjectKind::View => "view",
            ObjectKind::Index => "index",
            ObjectKind::Trigger => "trigger",
        }
    }

    /// Keyword used in `CREATE`/`DROP` statements for this kind.
    pub fn keyword(&self) -> &'static str {
        match self {
            ObjectKind::Table => "TABLE",
            ObjectKind::View => "VIEW",
            ObjectKind::Index => "INDEX",
            ObjectKind::Trigger => "TRIGGER",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "table" => Some(ObjectKind::Table),
            "view" => Some(ObjectKind::View),
            "index" => Some(ObjectKind::Index),
            "trigger" => Some(ObjectKind::Trigger),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A table, view, index or trigger definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaObject {
    pub kind: ObjectKind,
    pub name: String,
    /// Table the object belongs to; equal to `name` for tables and views.
    pub table: String,
    /// Defining `CREATE` statement, as normalized by sqlite.
    pub sql: String,
}

impl SchemaObject {
    /// Definition with double quotes removed and, for tables, the name token
    /// written the same way however it was quoted.
    ///
    /// Renaming a table makes sqlite rewrite its name as a quoted identifier,
    /// so a rebuilt `[t]` reads back as `CREATE TABLE "t" (...)`.
    pub fn normalized_sql(&self) -> String {
        let sql = match self.kind {
            ObjectKind::Table => rename_definition(&self.sql, &self.name),
            _ => None,
        };

        sql.as_deref().unwrap_or(&self.sql).replace('"', "")
    }
}

#[derive(sqlx::FromRow)]
struct TableListRow {
    name: String,
    #[sqlx(rename = "type")]
    kind: String,
}

#[derive(sqlx::FromRow)]
struct CatalogRow {
    kind: String,
    name: String,
    owner: String,
    sql: String,
}

/// User objects of one schema, in catalog order.
///
/// For a freshly materialized target this is the order of the statements in
/// the schema script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    objects: Vec<SchemaObject>,
}

impl Catalog {
    /// Read the catalog of `schema` (`main` or an attached alias).
    ///
    /// Objects without a definition (automatic indexes), shadow tables owned
    /// by virtual tables and objects matching [`MigrateConfig::is_ignored`]
    /// are skipped.
    pub async fn load(
        conn: &mut SqliteConnection,
        schema: &str,
        config: &MigrateConfig,
    ) -> Result<Self> {
        let sql = format!(
            "SELECT type AS kind, name, tbl_name AS owner, sql FROM {}.sqlite_master \
             WHERE sql IS NOT NULL ORDER BY rowid",
            quote_ident(schema)
        );

        let rows = sqlx::query_as::<_, CatalogRow>(&sql)
            .persistent(false)
            .fetch_all(&mut *conn)
            .await
            .map_err(MigrateError::catalog(schema))?;

        let shadows = shadow_tables(conn, schema).await?;

        let objects = rows
            .into_iter()
            .filter(|row| !config.is_ignored(&row.name) && !shadows.contains(&row.owner))
            .filter_map(|row| {
                Some(SchemaObject {
                    kind: ObjectKind::parse(&row.kind)?,
                    name: row.name,
                    table: row.owner,
                    sql: row.sql,
                })
            })
            .collect();

        Ok(Self { objects })
    }

    pub fn iter(&self) -> impl Iterator<Item = &SchemaObject> {
        self.objects.iter()
    }

    pub fn of_kind(&self, kind: ObjectKind) -> impl Iterator<Item = &SchemaObject> {
        self.objects.iter().filter(move |o| o.kind == kind)
    }

    pub fn get(&self, kind: ObjectKind, name: &str) -> Option<&SchemaObject> {
        self.objects
            .iter()
            .find(|o| o.kind == kind && o.name == name)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Tables sqlite maintains on behalf of a virtual table, such as the
/// `_data` and `_idx` tables of an fts5 index.
async fn shadow_tables(conn: &mut SqliteConnection, schema: &str) -> Result<HashSet<String>> {
    let sql = format!("PRAGMA {}.table_list", quote_ident(schema));

    let rows = sqlx::query_as::<_, TableListRow>(&sql)
        .persistent(false)
        .fetch_all(&mut *conn)
        .await
        .map_err(MigrateError::catalog(schema))?;

    Ok(rows
        .into_iter()
        .filter(|row| row.kind == "shadow")
        .map(|row| row.name)
        .collect())
}

impl FromIterator<SchemaObject> for Catalog {
    fn from_iter<I: IntoIterator<Item = SchemaObject>>(iter: I) -> Self {
        Self {
            objects: iter.into_iter().collect(),
        }
    }
}

/// The desired schema, materialized in a throwaway database file and attached
/// to the live connection.
///
/// Call [`TargetCatalog::release`] once done; dropping without releasing
/// still deletes the file but leaves the alias attached.
#[derive(Debug)]
pub struct TargetCatalog {
    alias: String,
    path: PathBuf,
    attached: bool,
}

impl TargetCatalog {
    /// Run `script` in a new database file and attach it to `conn`.
    ///
    /// Nothing in the live database is touched, so every failure here leaves
    /// it as it was.
    pub async fn attach(
        conn: &mut SqliteConnection,
        script: &str,
        config: &MigrateConfig,
    ) -> Result<Self> {
        let dir = config
            .target_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);

        let mut target = Self {
            alias: config.target_alias.to_owned(),
            path: dir.join(format!("tabula-target-{}.db", Uuid::new_v4().simple())),
            attached: false,
        };

        let options = SqliteConnectOptions::new()
            .filename(&target.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Delete);

        let mut scratch = SqliteConnection::connect_with(&options)
            .await
            .map_err(|source| MigrateError::Setup {
                step: "create",
                source,
            })?;

        let applied = async {
            if !script.trim().is_empty() {
                sqlx::raw_sql(script).execute(&mut scratch).await?;
            }

            object_count(&mut scratch, "main").await
        }
        .await;

        let closed = scratch.close().await;

        let expected = applied.map_err(|source| MigrateError::Setup {
            step: "apply",
            source,
        })?;

        closed.map_err(|source| MigrateError::Setup {
            step: "close",
            source,
        })?;

        let attach = format!("ATTACH DATABASE ?1 AS {}", quote_ident(&target.alias));
        sqlx::query(&attach)
            .bind(file_uri(&target.path))
            .persistent(false)
            .execute(&mut *conn)
            .await
            .map_err(|source| MigrateError::Setup {
                step: "attach",
                source,
            })?;

        target.attached = true;

        // An attached plain path inherits the open flags of `conn`, which for
        // an in-memory connection means an empty in-memory database.
        let found = object_count(conn, &target.alias).await;
        if !matches!(found, Ok(count) if count == expected) {
            let source = match found {
                Err(err) => err,
                Ok(count) => sqlx::Error::Protocol(format!(
                    "attached target holds {count} object(s), the script created {expected}"
                )),
            };
            target.release(conn).await;

            return Err(MigrateError::Setup {
                step: "verify",
                source,
            });
        }

        tracing::debug!(
            alias = %target.alias,
            path = %target.path.display(),
            "target schema attached"
        );

        Ok(target)
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Detach the target database and delete its file.
    ///
    /// Failures are logged, never returned: by the time this runs the outcome
    /// of the migration is already decided.
    pub async fn release(self, conn: &mut SqliteConnection) {
        if !self.attached {
            return;
        }

        let detach = format!("DETACH DATABASE {}", quote_ident(&self.alias));

        if let Err(err) = sqlx::raw_sql(&detach).execute(&mut *conn).await {
            tracing::warn!(
                alias = %self.alias,
                error = %err,
                "failed to detach target schema"
            );
        }
    }

    fn remove_files(&self) {
        for suffix in ["", "-journal", "-wal", "-shm"] {
            let mut path = self.path.clone().into_os_string();
            path.push(suffix);

            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => tracing::warn!(
                    path = ?path,
                    error = %err,
                    "failed to remove target schema file"
                ),
            }
        }
    }
}

async fn object_count(conn: &mut SqliteConnection, schema: &str) -> sqlx::Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}.sqlite_master", quote_ident(schema));

    sqlx::query_scalar::<_, i64>(&sql)
        .persistent(false)
        .fetch_one(&mut *conn)
        .await
}

/// Read-only `file:` URI for `path`, so the attached database is opened from
/// disk whatever mode the live connection was opened in.
fn file_uri(path: &Path) -> String {
    let mut uri = String::from("file:");

    for c in path.to_string_lossy().chars() {
        match c {
            '%' => uri.push_str("%25"),
            '?' => uri.push_str("%3f"),
            '#' => uri.push_str("%23"),
            c => uri.push(c),
        }
    }

    uri.push_str("?mode=ro");
    uri
}

impl Drop for TargetCatalog {
    fn drop(&mut self) {
        self.remove_files();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(kind: ObjectKind, name: &str, sql: &str) -> SchemaObject {
        SchemaObject {
            kind,
            name: name.to_owned(),
            table: name.to_owned(),
            sql: sql.to_owned(),
        }
    }

    #[test]
    fn normalization_ignores_double_quotes() {
        let renamed = object(ObjectKind::Table, "t", r#"CREATE TABLE "t" (id INTEGER)"#);
        let declared = object(ObjectKind::Table, "t", "CREATE TABLE t (id INTEGER)");

        assert_eq!(renamed.normalized_sql(), declared.normalized_sql());
    }

    #[test]
    fn normalization_ignores_how_the_table_name_is_quoted() {
        let rebuilt = object(ObjectKind::Table, "t", r#"CREATE TABLE "t" (id INTEGER)"#);

        for declared in [
            "CREATE TABLE [t] (id INTEGER)",
            "CREATE TABLE `t` (id INTEGER)",
            "CREATE TABLE 't' (id INTEGER)",
        ] {
            let declared = object(ObjectKind::Table, "t", declared);
            assert_eq!(rebuilt.normalized_sql(), declared.normalized_sql());
        }

        let other = object(ObjectKind::Table, "t", "CREATE TABLE [t] (id TEXT)");
        assert_ne!(rebuilt.normalized_sql(), other.normalized_sql());
    }

    #[test]
    fn file_uri_escapes_query_characters() {
        assert_eq!(
            file_uri(Path::new("/tmp/a?b#c%d.db")),
            "file:/tmp/a%3fb%23c%25d.db?mode=ro"
        );
    }

    #[test]
    fn lookup_is_by_kind_and_name() {
        let catalog: Catalog = vec![
            object(ObjectKind::Table, "t", "CREATE TABLE t (id INTEGER)"),
            object(ObjectKind::Index, "t_id", "CREATE INDEX t_id ON t(id)"),
        ]
        .into_iter()
        .collect();

        assert!(catalog.get(ObjectKind::Table, "t").is_some());
        assert!(catalog.get(ObjectKind::Index, "t").is_none());
        assert_eq!(catalog.of_kind(ObjectKind::Index).count(), 1);
        assert_eq!(catalog.len(), 2);
    }
}
