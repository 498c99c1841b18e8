#![allow(dead_code)]

use std::str::FromStr;

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection, SqliteConnection};
use tabula::{Catalog, MigrateConfig};

async fn connect_with(foreign_keys: bool) -> anyhow::Result<SqliteConnection> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(foreign_keys);

    Ok(SqliteConnection::connect_with(&options).await?)
}

/// In-memory connection without foreign key enforcement.
pub async fn connect() -> anyhow::Result<SqliteConnection> {
    connect_with(false).await
}

/// In-memory connection with foreign key enforcement on, as applications
/// usually run.
pub async fn connect_enforcing() -> anyhow::Result<SqliteConnection> {
    connect_with(true).await
}

pub async fn exec(conn: &mut SqliteConnection, sql: &str) -> anyhow::Result<()> {
    sqlx::raw_sql(sql).execute(&mut *conn).await?;

    Ok(())
}

pub async fn catalog(conn: &mut SqliteConnection) -> anyhow::Result<Catalog> {
    Ok(Catalog::load(conn, "main", &MigrateConfig::default()).await?)
}

/// `(kind, name)` of every user object, in catalog order.
pub async fn objects(conn: &mut SqliteConnection) -> anyhow::Result<Vec<(String, String)>> {
    Ok(catalog(conn)
        .await?
        .iter()
        .map(|o| (o.kind.to_string(), o.name.to_owned()))
        .collect())
}

pub async fn foreign_keys(conn: &mut SqliteConnection) -> anyhow::Result<bool> {
    let value = sqlx::query_scalar::<_, i64>("PRAGMA foreign_keys")
        .fetch_one(&mut *conn)
        .await?;

    Ok(value != 0)
}

/// Names of the databases attached to `conn`, `main` included.
pub async fn databases(conn: &mut SqliteConnection) -> anyhow::Result<Vec<String>> {
    Ok(
        sqlx::query_scalar::<_, String>("SELECT name FROM pragma_database_list ORDER BY seq")
            .fetch_all(&mut *conn)
            .await?,
    )
}

pub async fn count(conn: &mut SqliteConnection, table: &str) -> anyhow::Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", tabula::quote_ident(table));

    Ok(sqlx::query_scalar::<_, i64>(&sql)
        .fetch_one(&mut *conn)
        .await?)
}
