//! Change-feed events for the public tables.
//!
//! Subscribers receive one [`TableEvent`] per row-level change, carrying the
//! old and/or new row as applicable. A fresh subscription first receives an
//! [`RowEvent::Insert`] for every existing row.

use serde::{Deserialize, Serialize};

use crate::rows::{Entity, Transform};

/// A single row-level change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RowEvent<T> {
    /// A row was inserted.
    Insert(T),
    /// A row was overwritten.
    Update {
        /// Row before the write.
        old: T,
        /// Row after the write.
        new: T,
    },
    /// A row was deleted.
    Delete(T),
}

impl<T> RowEvent<T> {
    /// The row as it exists after the change, or `None` for deletes.
    pub fn current(&self) -> Option<&T> {
        match self {
            RowEvent::Insert(row) | RowEvent::Update { new: row, .. } => Some(row),
            RowEvent::Delete(_) => None,
        }
    }
}

/// A change to one of the public tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TableEvent {
    /// Change to the `entity` table.
    Entity(RowEvent<Entity>),
    /// Change to the `transform` table.
    Transform(RowEvent<Transform>),
}

impl TableEvent {
    /// Entity id the change refers to.
    pub fn entity_id(&self) -> u32 {
        match self {
            TableEvent::Entity(RowEvent::Insert(e) | RowEvent::Delete(e)) => e.id,
            TableEvent::Entity(RowEvent::Update { new, .. }) => new.id,
            TableEvent::Transform(RowEvent::Insert(t) | RowEvent::Delete(t)) => t.entity_id,
            TableEvent::Transform(RowEvent::Update { new, .. }) => new.entity_id,
        }
    }
}
