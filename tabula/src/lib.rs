//! Declarative schema reconciliation for SQLite.
//!
//! Instead of a chain of numbered migrations, an application ships one script
//! describing the schema it wants. On startup tabula compares that script with
//! the live database and issues whatever `CREATE`, `DROP` and table rebuilds
//! it takes to make the two match:
//!
//! - tables missing from the script are dropped, new ones are created, and a
//!   table whose definition changed is rebuilt, keeping the rows of every
//!   column both definitions share
//! - views, indexes and triggers are dropped, created, or replaced
//! - the whole structural phase runs in one transaction with foreign key
//!   enforcement off, and `PRAGMA foreign_key_check` must come back clean
//!   before it commits
//!
//! ```rust,ignore
//! use sqlx::{Connection, SqliteConnection};
//!
//! const SCHEMA: &str = r#"
//!     CREATE TABLE user (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
//!     CREATE INDEX user_name ON user(name);
//! "#;
//!
//! let mut conn = SqliteConnection::connect("sqlite:app.db?mode=rwc").await?;
//! tabula::migrate(&mut conn, SCHEMA).await?;
//! ```
//!
//! Definitions are compared as text, ignoring how names are quoted. Reformatting a
//! `CREATE TABLE` statement is therefore enough to trigger a rebuild, and a
//! renamed column is seen as one column dropped and another added.

#![forbid(unsafe_code)]

mod catalog;
mod columns;
mod config;
mod definition;
mod diff;
mod error;
mod guard;
mod migrator;
mod observer;
mod reconcile;

pub use catalog::{Catalog, ObjectKind, SchemaObject, TargetCatalog};
pub use columns::{common_columns, quote_ident, table_columns, ColumnDescriptor};
pub use config::*;
pub use diff::{diff, MigrationPlan, SchemaDiff};
pub use error::*;
pub use migrator::{migrate, Migrator};
pub use observer::{MigrationEvent, Observer, RecordingObserver, TracingObserver};
