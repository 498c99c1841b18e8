//! Catalog diffing.
//!
//! Two catalogs are joined on `(kind, name)`: objects only in the live catalog
//! are [`SchemaDiff::Deleted`], objects only in the target are
//! [`SchemaDiff::Created`], and objects in both whose definitions differ once
//! double quotes are ignored are [`SchemaDiff::Changed`]. The text comparison is
//! the only change detector.

use std::fmt;

use serde::Serialize;

use crate::catalog::{Catalog, ObjectKind};
use crate::definition::is_virtual_table;

/// One difference between the live and the target catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum SchemaDiff {
    Deleted {
        name: String,
    },
    Created {
        name: String,
        sql: String,
    },
    Changed {
        name: String,
        live_sql: String,
        target_sql: String,
    },
}

impl SchemaDiff {
    pub fn name(&self) -> &str {
        match self {
            SchemaDiff::Deleted { name }
            | SchemaDiff::Created { name, .. }
            | SchemaDiff::Changed { name, .. } => name,
        }
    }
}

/// Differences of one kind of object: deletions in live order, then creations
/// and changes in target order.
pub fn diff(live: &Catalog, target: &Catalog, kind: ObjectKind) -> Vec<SchemaDiff> {
    let deleted = live
        .of_kind(kind)
        .filter(|l| target.get(kind, &l.name).is_none())
        .map(|l| SchemaDiff::Deleted {
            name: l.name.to_owned(),
        });

    let created = target
        .of_kind(kind)
        .filter(|t| live.get(kind, &t.name).is_none())
        .map(|t| SchemaDiff::Created {
            name: t.name.to_owned(),
            sql: t.sql.to_owned(),
        });

    let changed = target.of_kind(kind).filter_map(|t| {
        let l = live.get(kind, &t.name)?;

        (l.normalized_sql() != t.normalized_sql()).then(|| SchemaDiff::Changed {
            name: t.name.to_owned(),
            live_sql: l.sql.to_owned(),
            target_sql: t.sql.to_owned(),
        })
    });

    deleted.chain(created).chain(changed).collect()
}

/// What a reconciliation did, or would do on a dry run.
///
/// Each list is computed when its phase starts, against the live catalog as
/// left by the previous phases; indexes of a rebuilt table, for instance, show
/// up as created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationPlan {
    pub tables: Vec<SchemaDiff>,
    pub views: Vec<SchemaDiff>,
    pub indexes: Vec<SchemaDiff>,
    pub triggers: Vec<SchemaDiff>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of structural changes.
    pub fn len(&self) -> usize {
        self.tables.len() + self.views.len() + self.indexes.len() + self.triggers.len()
    }

    pub fn diffs(&self, kind: ObjectKind) -> &[SchemaDiff] {
        match kind {
            ObjectKind::Table => &self.tables,
            ObjectKind::View => &self.views,
            ObjectKind::Index => &self.indexes,
            ObjectKind::Trigger => &self.triggers,
        }
    }

    pub(crate) fn set(&mut self, kind: ObjectKind, diffs: Vec<SchemaDiff>) {
        match kind {
            ObjectKind::Table => self.tables = diffs,
            ObjectKind::View => self.views = diffs,
            ObjectKind::Index => self.indexes = diffs,
            ObjectKind::Trigger => self.triggers = diffs,
        }
    }

    /// Changes in application order, paired with their kind.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectKind, &SchemaDiff)> {
        [
            ObjectKind::Table,
            ObjectKind::View,
            ObjectKind::Index,
            ObjectKind::Trigger,
        ]
        .into_iter()
        .flat_map(move |kind| self.diffs(kind).iter().map(move |d| (kind, d)))
    }
}

impl fmt::Display for MigrationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "schema is up to date");
        }

        for (kind, diff) in self.iter() {
            match diff {
                SchemaDiff::Deleted { name } => writeln!(f, "- {kind} {name}")?,
                SchemaDiff::Created { name, .. } => writeln!(f, "+ {kind} {name}")?,
                SchemaDiff::Changed {
                    name, target_sql, ..
                } if kind == ObjectKind::Table && !is_virtual_table(target_sql) => {
                    writeln!(f, "~ {kind} {name} (rebuild)")?
                }
                SchemaDiff::Changed { name, .. } => writeln!(f, "~ {kind} {name} (replace)")?,
            }
        }

        Ok(())
    }
}
