use crate::entity::{Entity, EntityId, ViewFilter};
use crate::errors::{Result, SyncError};
use crate::metrics_defs::{JOIN_FAILURES, LOAD_DURATION, LOADS_SUPERSEDED};
use crate::outcome::{LoadOutcome, LoadReport, Notice};
use crate::record::{LocalEdit, MutationRecord, Operation, RecordState};
use crate::selection::SelectionSet;
use crate::source::CollectionSource;
use gateway::GatewayError;
use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use shared::{counter, histogram};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

/// Everything a screen knows, guarded by a single lock.
///
/// All methods are synchronous. Callers never hold the lock across an
/// `.await`, so every change made here is atomic from the point of view of
/// any other intent.
#[derive(Debug)]
pub struct CacheState<E: Entity> {
    entities: IndexMap<EntityId, E>,
    filter: ViewFilter,
    selection: SelectionSet,
    records: BTreeMap<u64, MutationRecord<E>>,
    next_record: u64,
    join_failures: HashMap<EntityId, GatewayError>,
    last_error: Option<GatewayError>,
    notices: Vec<Notice>,
    // Sequence number of the most recently dispatched load
    dispatched_seq: u64,
    // Sequence number of the load whose result is currently in the cache
    applied_seq: u64,
    // Bumped whenever the cache instance is replaced or the screen closes.
    // In-flight work from an older epoch is orphaned.
    epoch: u64,
    closed: bool,
}

impl<E: Entity> Default for CacheState<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> CacheState<E> {
    pub fn new() -> Self {
        CacheState {
            entities: IndexMap::new(),
            filter: ViewFilter::default(),
            selection: SelectionSet::new(),
            records: BTreeMap::new(),
            next_record: 1,
            join_failures: HashMap::new(),
            last_error: None,
            notices: Vec::new(),
            dispatched_seq: 0,
            applied_seq: 0,
            epoch: 0,
            closed: false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&E> {
        self.entities.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entities(&self) -> impl Iterator<Item = &E> {
        self.entities.values()
    }

    pub fn filter(&self) -> &ViewFilter {
        &self.filter
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_loaded(&self) -> bool {
        self.applied_seq > 0
    }

    pub fn visible(&self) -> Vec<&E> {
        self.filter.visible(self.entities.values())
    }

    pub fn visible_ids(&self) -> Vec<EntityId> {
        self.visible().iter().map(|e| e.id().to_string()).collect()
    }

    /// Transforms one entity in place and returns its previous value.
    pub fn apply_local<F>(&mut self, id: &str, mutator: F) -> Option<E>
    where
        F: FnOnce(&mut E),
    {
        let entity = self.entities.get_mut(id)?;
        let previous = entity.clone();
        mutator(entity);
        self.prune_selection();
        Some(previous)
    }

    /// Runs a mutator that may touch several entities. Returns the snapshot
    /// of every entity it wrote to.
    pub fn edit<F>(&mut self, mutator: F) -> Vec<(EntityId, E)>
    where
        F: FnOnce(&mut LocalEdit<'_, E>),
    {
        let ((), previous) = self.edit_entities(mutator);
        self.prune_selection();
        previous
    }

    /// Puts snapshots back. Entities that have since left the cache stay gone.
    pub fn restore(&mut self, previous: Vec<(EntityId, E)>) {
        self.restore_entities(previous);
        self.prune_selection();
    }

    // Selection is left alone by the two raw helpers below. Callers prune once
    // they know the edit is kept.
    pub(crate) fn edit_entities<T, F>(&mut self, mutator: F) -> (T, Vec<(EntityId, E)>)
    where
        F: FnOnce(&mut LocalEdit<'_, E>) -> T,
    {
        let mut edit = LocalEdit::new(&mut self.entities);
        let result = mutator(&mut edit);
        (result, edit.into_previous())
    }

    pub(crate) fn restore_entities(&mut self, previous: Vec<(EntityId, E)>) {
        for (id, entity) in previous {
            if let Some(slot) = self.entities.get_mut(&id) {
                *slot = entity;
            }
        }
    }

    /// Ids a mutator would write to, found by running it and undoing it.
    pub(crate) fn touched_by<F>(&mut self, mutator: F) -> Result<BTreeSet<EntityId>>
    where
        F: FnOnce(&mut LocalEdit<'_, E>) -> Result<()>,
    {
        let (result, previous) = self.edit_entities(mutator);
        let touched = previous.iter().map(|(id, _)| id.clone()).collect();
        self.restore_entities(previous);
        result.map(|()| touched)
    }

    /// Overwrites local state with the server's representation.
    pub fn replace(&mut self, id: &str, server_entity: E) -> bool {
        match self.entities.get_mut(id) {
            Some(slot) => {
                *slot = server_entity;
                self.prune_selection();
                true
            }
            None => false,
        }
    }

    /// Adds a server-confirmed entity at the front of the collection.
    pub fn insert(&mut self, entity: E) {
        let id = entity.id().to_string();
        self.entities.shift_insert(0, id, entity);
        self.prune_selection();
    }

    /// Removes an entity and its selection membership in one step.
    pub fn remove(&mut self, id: &str) -> Option<E> {
        let removed = self.entities.shift_remove(id);
        self.selection.remove(id);
        self.join_failures.remove(id);
        self.prune_selection();
        removed
    }

    pub fn set_filter(&mut self, filter: ViewFilter) {
        self.filter = filter;
        self.prune_selection();
    }

    /// Toggles selection of a visible entity. Ids outside the visible view
    /// are ignored.
    pub fn toggle(&mut self, id: &str) -> bool {
        let visible = self.visible().iter().any(|e| e.id() == id);
        if !visible {
            return false;
        }
        self.selection.toggle(id)
    }

    pub fn select_all(&mut self) {
        let visible = self.visible_ids();
        self.selection.select_all(visible.iter().map(String::as_str));
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub(crate) fn prune_selection(&mut self) {
        if self.selection.is_empty() {
            return;
        }
        let visible: HashSet<&str> = self
            .filter
            .visible(self.entities.values())
            .into_iter()
            .map(|e| e.id())
            .collect();
        let dropped = self.selection.retain_visible(&visible);
        if dropped > 0 {
            tracing::debug!(dropped, "Dropped selected ids that left the view");
        }
    }

    pub fn notify(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn records(&self) -> impl Iterator<Item = &MutationRecord<E>> {
        self.records.values()
    }

    pub fn pending_ids(&self) -> BTreeSet<EntityId> {
        self.records.values().flat_map(|r| r.scope()).collect()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.records.values().any(|r| r.scope().contains(id))
    }

    pub fn join_failures(&self) -> &HashMap<EntityId, GatewayError> {
        &self.join_failures
    }

    pub fn last_error(&self) -> Option<&GatewayError> {
        self.last_error.as_ref()
    }

    pub(crate) fn open_record(
        &mut self,
        operation: Operation,
        target: &str,
        payload: Option<Value>,
        previous: Vec<(EntityId, E)>,
    ) -> u64 {
        let id = self.next_record;
        self.next_record += 1;
        self.records.insert(
            id,
            MutationRecord {
                id,
                operation,
                target: target.to_string(),
                payload,
                state: RecordState::Pending,
                previous,
            },
        );
        id
    }

    pub(crate) fn take_record(&mut self, id: u64) -> Option<MutationRecord<E>> {
        self.records.remove(&id)
    }

    fn begin_load(&mut self) -> Result<u64> {
        if self.closed {
            return Err(SyncError::Closed);
        }
        self.dispatched_seq += 1;
        Ok(self.dispatched_seq)
    }

    fn is_current_load(&self, seq: u64) -> bool {
        !self.closed && seq == self.dispatched_seq
    }

    fn apply_load(
        &mut self,
        seq: u64,
        entities: Vec<E>,
        join_failures: HashMap<EntityId, GatewayError>,
        filter: ViewFilter,
    ) -> LoadReport {
        self.entities = entities
            .into_iter()
            .map(|e| (e.id().to_string(), e))
            .collect();
        self.join_failures = join_failures;
        self.filter = filter;
        self.last_error = None;
        self.applied_seq = seq;
        self.epoch += 1;
        // Records of in-flight mutations belong to the replaced cache
        self.records.clear();
        self.prune_selection();

        let mut join_failures: Vec<EntityId> = self.join_failures.keys().cloned().collect();
        join_failures.sort();
        LoadReport {
            seq,
            entities: self.entities.len(),
            join_failures,
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.epoch += 1;
        self.records.clear();
        self.selection.clear();
    }
}

/// Read-only snapshot handed to the presentation layer.
#[derive(Clone, Debug, PartialEq)]
pub struct View<E: Entity> {
    /// Visible entities, filtered and paginated, in cache order.
    pub entities: Vec<E>,
    /// Number of entities in the cache, ignoring the filter.
    pub total: usize,
    pub selected: Vec<EntityId>,
    pub pending: BTreeSet<EntityId>,
    pub join_failures: BTreeMap<EntityId, GatewayError>,
    pub last_error: Option<GatewayError>,
    pub loaded: bool,
}

impl<E: Entity> View<E> {
    pub fn ids(&self) -> Vec<&str> {
        self.entities.iter().map(|e| e.id()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&E> {
        self.entities.iter().find(|e| e.id() == id)
    }
}

/// A primary collection with eagerly joined related items.
///
/// Owned by one screen. Clones share the same state.
#[derive(Clone)]
pub struct RelationshipCache<E: Entity> {
    state: Arc<Mutex<CacheState<E>>>,
    source: Arc<dyn CollectionSource<E>>,
}

impl<E: Entity> RelationshipCache<E> {
    pub fn new(source: Arc<dyn CollectionSource<E>>) -> Self {
        RelationshipCache {
            state: Arc::new(Mutex::new(CacheState::new())),
            source,
        }
    }

    pub fn name(&self) -> &'static str {
        self.source.name()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CacheState<E>> {
        self.state.lock()
    }

    /// Runs `f` against the current state.
    pub fn read<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&CacheState<E>) -> T,
    {
        f(&self.state.lock())
    }

    pub fn get(&self, id: &str) -> Option<E> {
        self.state.lock().get(id).cloned()
    }

    pub fn view(&self) -> View<E> {
        let state = self.state.lock();
        View {
            entities: state.visible().into_iter().cloned().collect(),
            total: state.len(),
            selected: state.selection.ids(),
            pending: state.pending_ids(),
            join_failures: state
                .join_failures
                .iter()
                .map(|(id, err)| (id.clone(), err.clone()))
                .collect(),
            last_error: state.last_error.clone(),
            loaded: state.is_loaded(),
        }
    }

    pub fn toggle(&self, id: &str) -> bool {
        self.state.lock().toggle(id)
    }

    pub fn select_all(&self) {
        self.state.lock().select_all();
    }

    pub fn clear_selection(&self) {
        self.state.lock().clear_selection();
    }

    /// Changes the client-side view without reloading.
    pub fn set_filter(&self, filter: ViewFilter) {
        self.state.lock().set_filter(filter);
    }

    pub fn take_notices(&self) -> Vec<Notice> {
        self.state.lock().take_notices()
    }

    pub fn notify(&self, notice: Notice) {
        self.state.lock().notify(notice);
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().is_closed()
    }

    /// Navigating away. In-flight loads and mutations become no-ops.
    pub fn close(&self) {
        self.state.lock().close();
    }

    fn is_current_load(&self, seq: u64) -> bool {
        self.state.lock().is_current_load(seq)
    }

    /// Fetches the primary list, joins related items, and replaces the cache.
    ///
    /// A load that is overtaken by a newer one returns
    /// [`LoadOutcome::Superseded`] and leaves the cache alone, whatever order
    /// the responses arrive in.
    pub async fn load(&self, filter: ViewFilter) -> Result<LoadOutcome> {
        let seq = self.state.lock().begin_load()?;
        let started = Instant::now();
        let name = self.source.name();

        let mut entities = match self.source.list(&filter).await {
            Ok(entities) => entities,
            Err(err) => {
                let mut state = self.state.lock();
                if !state.is_current_load(seq) {
                    counter!(LOADS_SUPERSEDED, "resource" => name).increment(1);
                    return Ok(LoadOutcome::Superseded);
                }
                tracing::warn!(resource = name, error = %err, "Failed to load collection");
                state.last_error = Some(err.clone());
                state.notify(Notice::error(format!("Failed to fetch {name}")));
                return Err(SyncError::Gateway(err));
            }
        };

        if !self.is_current_load(seq) {
            counter!(LOADS_SUPERSEDED, "resource" => name).increment(1);
            return Ok(LoadOutcome::Superseded);
        }

        let mut join_failures = HashMap::new();
        if self.source.joins() {
            let mut join_set = JoinSet::new();
            let mut task_index = HashMap::new();

            for (index, entity) in entities.iter().enumerate() {
                let source = self.source.clone();
                let id = entity.id().to_string();
                let abort_handle = join_set.spawn(async move { source.related(&id).await });
                task_index.insert(abort_handle.id(), index);
            }

            while let Some(joined) = join_set.join_next_with_id().await {
                if !self.is_current_load(seq) {
                    tracing::debug!(
                        resource = name,
                        remaining = join_set.len(),
                        "Load superseded, aborting joins"
                    );
                    join_set.abort_all();
                    counter!(LOADS_SUPERSEDED, "resource" => name).increment(1);
                    return Ok(LoadOutcome::Superseded);
                }

                let (task_id, result) = match joined {
                    Ok((task_id, result)) => (task_id, result),
                    Err(e) => {
                        tracing::error!("Join task failed: {e}");
                        (e.id(), Err(GatewayError::Network(e.to_string())))
                    }
                };
                let Some(index) = task_index.remove(&task_id) else {
                    continue;
                };
                let entity = &mut entities[index];

                match result {
                    Ok(related) => entity.set_related(related),
                    Err(err) => {
                        tracing::warn!(
                            resource = name,
                            entity = entity.id(),
                            error = %err,
                            "Failed to fetch related items"
                        );
                        counter!(JOIN_FAILURES, "resource" => name).increment(1);
                        entity.set_related(E::Related::default());
                        join_failures.insert(entity.id().to_string(), err);
                    }
                }
            }
        }

        let mut state = self.state.lock();
        if !state.is_current_load(seq) {
            counter!(LOADS_SUPERSEDED, "resource" => name).increment(1);
            return Ok(LoadOutcome::Superseded);
        }
        let report = state.apply_load(seq, entities, join_failures, filter);
        drop(state);

        histogram!(LOAD_DURATION, "resource" => name).record(started.elapsed().as_secs_f64());
        tracing::debug!(
            resource = name,
            seq,
            entities = report.entities,
            join_failures = report.join_failures.len(),
            "Load applied"
        );
        Ok(LoadOutcome::Applied(report))
    }
}
