//! Progress events emitted while a migration runs.
//!
//! The engine reports every structural operation to an [`Observer`] and never
//! looks at what the observer does with it. The default, [`TracingObserver`],
//! turns each event into a `tracing` record.
//!
//! Structural events are reported as the statements run, before the
//! transaction commits. Every run ends with exactly one [`MigrationEvent::Finished`]
//! or [`MigrationEvent::Failed`]; after a `Failed` none of the earlier events
//! took effect.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::catalog::ObjectKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MigrationEvent {
    /// An object from the target schema was created.
    Created { kind: ObjectKind, name: String },
    /// An object absent from the target schema was dropped.
    Dropped { kind: ObjectKind, name: String },
    /// A view, index, trigger or virtual table was dropped and created again
    /// with its new definition.
    Replaced { kind: ObjectKind, name: String },
    /// A table was rebuilt; `columns` are the ones whose data was carried over.
    Rebuilt { name: String, columns: Vec<String> },
    /// The run is over. `dry_run` runs were rolled back.
    Finished {
        elapsed: Duration,
        changes: usize,
        dry_run: bool,
    },
    /// The run stopped with `error` and the live database was left as it was.
    Failed {
        elapsed: Duration,
        error: String,
        dry_run: bool,
    },
}

pub trait Observer: Send + Sync {
    fn observe(&self, event: &MigrationEvent);
}

impl<O: Observer + ?Sized> Observer for Arc<O> {
    fn observe(&self, event: &MigrationEvent) {
        (**self).observe(event)
    }
}

/// Logs every event at `info` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn observe(&self, event: &MigrationEvent) {
        match event {
            MigrationEvent::Created { kind, name } => {
                tracing::info!(%kind, %name, "created");
            }
            MigrationEvent::Dropped { kind, name } => {
                tracing::info!(%kind, %name, "dropped");
            }
            MigrationEvent::Replaced { kind, name } => {
                tracing::info!(%kind, %name, "replaced");
            }
            MigrationEvent::Rebuilt { name, columns } => {
                tracing::info!(kind = "table", %name, columns = ?columns, "rebuilt");
            }
            MigrationEvent::Finished {
                elapsed,
                changes,
                dry_run,
            } => {
                tracing::info!(?elapsed, changes, dry_run, "migration finished");
            }
            MigrationEvent::Failed {
                elapsed,
                error,
                dry_run,
            } => {
                tracing::warn!(?elapsed, %error, dry_run, "migration failed");
            }
        }
    }
}

/// Keeps every event in memory, in order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<MigrationEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MigrationEvent> {
        self.events.lock().clone()
    }

    /// Remove and return the recorded events.
    pub fn take(&self) -> Vec<MigrationEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl Observer for RecordingObserver {
    fn observe(&self, event: &MigrationEvent) {
        self.events.lock().push(event.clone());
    }
}
