use std::fmt;

use crate::catalog::ObjectKind;

/// Structural statement kinds, used to say which step of a reconciliation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Drop,
    Copy,
    Rename,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Create => "create",
            Operation::Drop => "drop",
            Operation::Copy => "copy rows into",
            Operation::Rename => "rename",
        };

        f.write_str(name)
    }
}

/// A row reported by `PRAGMA foreign_key_check`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ForeignKeyViolation {
    /// Table holding the dangling reference.
    pub table: String,
    /// Offending row, `None` for `WITHOUT ROWID` tables.
    pub rowid: Option<i64>,
    /// Table the reference points at.
    pub parent: String,
    /// Index of the foreign key within the child table.
    pub fkid: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    #[error("failed to {step} target schema: {source}")]
    Setup {
        step: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to read `{schema}` catalog: {source}")]
    Catalog {
        schema: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to {op} {kind} `{name}`: {source}\n  statement: {sql}")]
    Structural {
        op: Operation,
        kind: ObjectKind,
        name: String,
        sql: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("foreign key check failed on {}", violated_tables(.0))]
    IntegrityViolation(Vec<ForeignKeyViolation>),

    #[error("failed to commit migration: {0}")]
    Commit(#[source] sqlx::Error),

    #[error("failed to begin migration transaction: {0}")]
    Transaction(#[source] sqlx::Error),

    #[error("failed to set `PRAGMA {name}`: {source}")]
    Pragma {
        name: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("foreign key enforcement could not be disabled; is a transaction already open?")]
    ForeignKeysStillEnabled,

    #[error("foreign key enforcement could not be restored: {0}")]
    ForeignKeysNotRestored(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("migration cancelled")]
    Cancelled,
}

impl MigrateError {
    pub(crate) fn structural(
        op: Operation,
        kind: ObjectKind,
        name: impl Into<String>,
        sql: impl Into<String>,
    ) -> impl FnOnce(sqlx::Error) -> Self {
        let name = name.into();
        let sql = sql.into();

        move |source| MigrateError::Structural {
            op,
            kind,
            name,
            sql,
            source,
        }
    }

    pub(crate) fn catalog(schema: impl Into<String>) -> impl FnOnce(sqlx::Error) -> Self {
        let schema = schema.into();

        move |source| MigrateError::Catalog { schema, source }
    }
}

fn violated_tables(violations: &[ForeignKeyViolation]) -> String {
    let mut tables = violations
        .iter()
        .map(|v| format!("`{}` -> `{}`", v.table, v.parent))
        .collect::<Vec<_>>();
    tables.dedup();

    format!("{} ({} row(s))", tables.join(", "), violations.len())
}

pub type Result<T> = std::result::Result<T, MigrateError>;
