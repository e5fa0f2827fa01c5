// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Client-side run registry.
//!
//! An injectable, cheaply cloneable store mapping a key (a run id, or a
//! caller-chosen label such as a template id) to the last known
//! [`RunRecord`]. The poller and stream subscriber are the only writers;
//! rendering code reads snapshots or subscribes to change events.
//!
//! Writes are last-writer-wins per key, except that a record's status never
//! moves backwards.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;

#[cfg(feature = "telemetry")]
use tracing::{debug, trace};

use crate::types::{RunRecord, RunUpdate};

/// Capacity of the change-event channel. Slow subscribers see `Lagged`.
const EVENT_CAPACITY: usize = 256;

/// Change notification published by the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    Updated { key: String, record: RunRecord },
    Removed { key: String },
    Cleared,
}

/// Result of a write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// No previous entry existed.
    Inserted,
    /// The entry was updated.
    Updated,
    /// The write would have regressed status, or lacked enough data to
    /// create an entry, and was ignored.
    Rejected,
}

impl Applied {
    pub fn is_applied(&self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

/// In-memory map of last known run state.
#[derive(Clone)]
pub struct RunRegistry {
    inner: Arc<RwLock<HashMap<String, RunRecord>>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RunRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunRegistry").field("len", &self.len()).finish()
    }
}

impl RunRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// Last known record for `key`.
    pub fn get(&self, key: &str) -> Option<RunRecord> {
        self.read(|map| map.get(key).cloned())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read(|map| map.contains_key(key))
    }

    pub fn len(&self) -> usize {
        self.read(HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every entry.
    pub fn snapshot(&self) -> HashMap<String, RunRecord> {
        self.read(HashMap::clone)
    }

    /// Store a full record under `key`.
    ///
    /// Replaces the previous record unless it belongs to the same run and
    /// the new status would move backwards. A record for a different run
    /// always replaces the old one.
    pub fn upsert(&self, key: &str, record: RunRecord) -> Applied {
        let applied = self.write(|map| {
            let applied = match map.get(key) {
                Some(existing)
                    if existing.run_id == record.run_id
                        && !existing.status.can_advance_to(record.status) =>
                {
                    return Applied::Rejected;
                }
                Some(_) => Applied::Updated,
                None => Applied::Inserted,
            };
            map.insert(key.to_string(), record.clone());
            applied
        });
        self.publish(key, applied, record);
        applied
    }

    /// Merge a partial update into the entry for `key`.
    ///
    /// `default_run_id` fills in a missing run id. When no entry exists for
    /// that run the update must carry a status.
    pub fn merge_update(&self, key: &str, default_run_id: &str, update: RunUpdate) -> Applied {
        let target = update
            .run_id
            .clone()
            .unwrap_or_else(|| default_run_id.to_string());
        let (applied, record) = self.write(|map| {
            let owner = map.get(key).map(|existing| existing.run_id == target);
            match owner {
                Some(true) => match map.get_mut(key) {
                    Some(existing) => {
                        if existing.merge(update) {
                            (Applied::Updated, Some(existing.clone()))
                        } else {
                            (Applied::Rejected, None)
                        }
                    }
                    None => (Applied::Rejected, None),
                },
                // `Some(false)`: a different run now owns this key.
                _ => match update.into_record(&target) {
                    Some(record) => {
                        map.insert(key.to_string(), record.clone());
                        let applied = if owner.is_some() {
                            Applied::Updated
                        } else {
                            Applied::Inserted
                        };
                        (applied, Some(record))
                    }
                    None => (Applied::Rejected, None),
                },
            }
        });
        if let Some(record) = record {
            self.publish(key, applied, record);
        } else {
            #[cfg(feature = "telemetry")]
            debug!(key, "Ignored run update");
        }
        applied
    }

    /// Drop the entry for `key`, e.g. when the owning view goes away.
    pub fn remove(&self, key: &str) -> Option<RunRecord> {
        let removed = self.write(|map| map.remove(key));
        if removed.is_some() {
            self.notify(RegistryEvent::Removed {
                key: key.to_string(),
            });
        }
        removed
    }

    pub fn clear(&self) {
        self.write(HashMap::clear);
        self.notify(RegistryEvent::Cleared);
    }

    /// Receive change events from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn publish(&self, key: &str, applied: Applied, record: RunRecord) {
        if applied.is_applied() {
            #[cfg(feature = "telemetry")]
            trace!(key, run_id = %record.run_id, status = %record.status, "Registry updated");
            self.notify(RegistryEvent::Updated {
                key: key.to_string(),
                record,
            });
        }
    }

    /// Best-effort: having no subscribers is not an error.
    fn notify(&self, event: RegistryEvent) {
        let _ = self.events.send(event);
    }

    // A panic while holding the lock cannot leave a half-written record, so a
    // poisoned lock is still safe to use.
    fn read<T>(&self, f: impl FnOnce(&HashMap<String, RunRecord>) -> T) -> T {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write<T>(&self, f: impl FnOnce(&mut HashMap<String, RunRecord>) -> T) -> T {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}
