use crate::entity::{Entity, EntityId};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Update,
    AssignRelated,
    RemoveRelated,
    MarkAsRead,
    Delete,
}

impl Operation {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Operation::Update => "update",
            Operation::AssignRelated => "assign_related",
            Operation::RemoveRelated => "remove_related",
            Operation::MarkAsRead => "mark_as_read",
            Operation::Delete => "delete",
        }
    }

    /// Deletes are never applied optimistically. The entity leaves the cache
    /// only once the server has confirmed.
    pub const fn removes_on_confirm(&self) -> bool {
        matches!(self, Operation::Delete)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a mutation record. `Confirmed` and `RolledBack` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordState {
    Pending,
    Confirmed,
    RolledBack,
}

/// A dispatched mutation awaiting reconciliation.
///
/// Holds the snapshot of every entity the optimistic change touched so the
/// change can be undone if the server rejects it.
#[derive(Clone, Debug)]
pub struct MutationRecord<E: Entity> {
    pub id: u64,
    pub operation: Operation,
    pub target: EntityId,
    pub payload: Option<Value>,
    pub state: RecordState,
    pub(crate) previous: Vec<(EntityId, E)>,
}

impl<E: Entity> MutationRecord<E> {
    /// Every entity this record holds a snapshot of, target included.
    pub fn scope(&self) -> BTreeSet<EntityId> {
        let mut scope: BTreeSet<EntityId> =
            self.previous.iter().map(|(id, _)| id.clone()).collect();
        scope.insert(self.target.clone());
        scope
    }

    pub(crate) fn resolve(&mut self, state: RecordState) {
        debug_assert_eq!(self.state, RecordState::Pending);
        self.state = state;
    }
}

/// Mutable access to the cache that snapshots each entity on first write.
pub struct LocalEdit<'a, E: Entity> {
    entities: &'a mut IndexMap<EntityId, E>,
    previous: Vec<(EntityId, E)>,
}

impl<'a, E: Entity> LocalEdit<'a, E> {
    pub(crate) fn new(entities: &'a mut IndexMap<EntityId, E>) -> Self {
        LocalEdit {
            entities,
            previous: Vec::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&E> {
        self.entities.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut E> {
        if !self.previous.iter().any(|(snapshotted, _)| snapshotted == id)
            && let Some(entity) = self.entities.get(id)
        {
            self.previous.push((id.to_string(), entity.clone()));
        }
        self.entities.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.entities.values()
    }

    /// Ids of the entities matching `predicate`, in cache order.
    pub fn ids_where<P>(&self, predicate: P) -> Vec<EntityId>
    where
        P: Fn(&E) -> bool,
    {
        self.entities
            .iter()
            .filter(|(_, entity)| predicate(entity))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub(crate) fn into_previous(self) -> Vec<(EntityId, E)> {
        self.previous
    }
}
