use crate::cache::{CacheState, RelationshipCache};
use crate::entity::{Entity, EntityId, ViewFilter};
use crate::errors::{Result, SyncError};
use crate::metrics_defs::{BATCH_SIZE, MUTATION_OUTCOME, MUTATION_QUEUED};
use crate::outcome::{BatchSummary, MutationOutcome, Notice};
use crate::record::{LocalEdit, Operation, RecordState};
use futures::future::join_all;
use gateway::GatewayError;
use parking_lot::Mutex;
use serde_json::Value;
use shared::{counter, histogram};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// How a confirmed mutation's response is folded back into the cache.
#[derive(Clone, Debug, PartialEq)]
pub enum Confirmation<E: Entity> {
    /// No server representation. The optimistic value stands.
    Keep,
    /// The server's full representation.
    Replace(E),
    /// The server's representation without the joined part. Related items
    /// are carried over from the cache.
    ReplaceFields(E),
    /// Authoritative related items for the target.
    Related(E::Related),
}

/// A single mutation as dispatched by a screen.
#[derive(Clone, Debug, PartialEq)]
pub struct Intent {
    pub operation: Operation,
    pub target: EntityId,
    pub payload: Option<Value>,
    /// Notice pushed on confirmation.
    pub success: Option<String>,
    /// Notice pushed on rollback when the server sent no message.
    pub failure: String,
}

impl Intent {
    pub fn new<S: Into<EntityId>>(operation: Operation, target: S) -> Self {
        Intent {
            operation,
            target: target.into(),
            payload: None,
            success: None,
            failure: "Request failed".to_string(),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn on_success<S: Into<String>>(mut self, message: S) -> Self {
        self.success = Some(message.into());
        self
    }

    pub fn on_failure<S: Into<String>>(mut self, message: S) -> Self {
        self.failure = message.into();
        self
    }
}

/// Per-entity FIFO locks. An entity with a pending mutation is locked until
/// that mutation has been reconciled.
#[derive(Default)]
struct EntityLocks {
    locks: Mutex<HashMap<EntityId, Arc<tokio::sync::Mutex<()>>>>,
}

struct HeldLocks {
    guards: Vec<OwnedMutexGuard<()>>,
    locks: Arc<EntityLocks>,
}

impl Drop for HeldLocks {
    fn drop(&mut self) {
        self.guards.clear();
        self.locks
            .locks
            .lock()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

impl EntityLocks {
    /// Locks every id in `ids` in sorted order. Returns whether any of them
    /// had to be waited for.
    async fn acquire(self: &Arc<Self>, ids: &BTreeSet<EntityId>) -> (HeldLocks, bool) {
        let handles: Vec<_> = {
            let mut locks = self.locks.lock();
            ids.iter()
                .map(|id| locks.entry(id.clone()).or_default().clone())
                .collect()
        };

        let mut held = HeldLocks {
            guards: Vec::with_capacity(handles.len()),
            locks: self.clone(),
        };
        let mut queued = false;
        for handle in handles {
            let guard = match handle.clone().try_lock_owned() {
                Ok(guard) => guard,
                Err(_) => {
                    queued = true;
                    handle.lock_owned().await
                }
            };
            held.guards.push(guard);
        }
        (held, queued)
    }
}

enum Applied {
    Dispatched { record: u64, epoch: u64 },
    Replan(BTreeSet<EntityId>),
}

/// Applies intents to a screen's cache optimistically and reconciles them
/// with the gateway's answer.
#[derive(Clone)]
pub struct MutationEngine<E: Entity> {
    cache: RelationshipCache<E>,
    locks: Arc<EntityLocks>,
}

impl<E: Entity> MutationEngine<E> {
    pub fn new(cache: RelationshipCache<E>) -> Self {
        MutationEngine {
            cache,
            locks: Arc::new(EntityLocks::default()),
        }
    }

    pub fn cache(&self) -> &RelationshipCache<E> {
        &self.cache
    }

    /// Single-item mutation.
    ///
    /// `mutator` is applied to the cache before `remote` is called. It may
    /// touch entities other than the target (moving a related item between
    /// two primaries); every entity it touches is snapshotted and locked, and
    /// all of them roll back together. `mutator` may run more than once and
    /// must be deterministic.
    pub async fn mutate<M, R, Fut>(
        &self,
        intent: Intent,
        mutator: M,
        remote: R,
    ) -> Result<MutationOutcome>
    where
        M: Fn(&mut LocalEdit<'_, E>) -> Result<()>,
        R: FnOnce() -> Fut,
        Fut: Future<Output = Result<Confirmation<E>, GatewayError>>,
    {
        self.run(intent, mutator, remote, true).await
    }

    /// Confirm-then-remove. Nothing changes locally until the server agrees.
    pub async fn delete<R, Fut>(&self, intent: Intent, remote: R) -> Result<MutationOutcome>
    where
        R: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), GatewayError>>,
    {
        let intent = Intent {
            operation: Operation::Delete,
            ..intent
        };
        self.run(
            intent,
            |_| Ok(()),
            move || async move { remote().await.map(|()| Confirmation::Keep) },
            true,
        )
        .await
    }

    /// Bulk fan-out: one independent mutation per id, all dispatched at once.
    ///
    /// Waits for every call to settle and pushes one aggregate notice, unless
    /// some of the work was orphaned by a reload or close.
    pub async fn mutate_many<M, R, Fut>(
        &self,
        operation: Operation,
        ids: Vec<EntityId>,
        mutator: M,
        remote: R,
    ) -> Result<BatchSummary>
    where
        M: Fn(&str, &mut LocalEdit<'_, E>) -> Result<()>,
        R: Fn(EntityId) -> Fut,
        Fut: Future<Output = Result<Confirmation<E>, GatewayError>>,
    {
        if self.cache.is_closed() {
            return Err(SyncError::Closed);
        }
        if ids.is_empty() {
            return Ok(BatchSummary::default());
        }
        histogram!(BATCH_SIZE, "operation" => operation.as_str()).record(ids.len() as f64);

        let mutator = &mutator;
        let remote = &remote;
        let results = join_all(ids.into_iter().map(|id| async move {
            let outcome = self
                .run(
                    Intent::new(operation, id.clone()),
                    |edit| mutator(&id, edit),
                    || remote(id.clone()),
                    false,
                )
                .await;
            (id, outcome)
        }))
        .await;

        Ok(self.summarize(operation, results))
    }

    /// Bulk fan-out over the current selection.
    pub async fn mutate_selected<M, R, Fut>(
        &self,
        operation: Operation,
        mutator: M,
        remote: R,
    ) -> Result<BatchSummary>
    where
        M: Fn(&str, &mut LocalEdit<'_, E>) -> Result<()>,
        R: Fn(EntityId) -> Fut,
        Fut: Future<Output = Result<Confirmation<E>, GatewayError>>,
    {
        let ids = self.cache.read(|state| state.selection().ids());
        self.mutate_many(operation, ids, mutator, remote).await
    }

    pub async fn delete_many<R, Fut>(&self, ids: Vec<EntityId>, remote: R) -> Result<BatchSummary>
    where
        R: Fn(EntityId) -> Fut,
        Fut: Future<Output = Result<(), GatewayError>>,
    {
        self.mutate_many(
            Operation::Delete,
            ids,
            |_, _| Ok(()),
            |id| {
                let call = remote(id);
                async move { call.await.map(|()| Confirmation::Keep) }
            },
        )
        .await
    }

    pub async fn delete_selected<R, Fut>(&self, remote: R) -> Result<BatchSummary>
    where
        R: Fn(EntityId) -> Fut,
        Fut: Future<Output = Result<(), GatewayError>>,
    {
        let ids = self.cache.read(|state| state.selection().ids());
        self.delete_many(ids, remote).await
    }

    /// Creates a new entity. It enters the cache only once the server has
    /// returned it, and only if `insert_when` accepts the filter displayed at
    /// that moment.
    pub async fn create<R, Fut, P>(
        &self,
        success: &str,
        failure: &str,
        insert_when: P,
        remote: R,
    ) -> Result<E>
    where
        R: FnOnce() -> Fut,
        Fut: Future<Output = Result<E, GatewayError>>,
        P: FnOnce(&ViewFilter) -> bool,
    {
        if self.cache.is_closed() {
            return Err(SyncError::Closed);
        }

        let result = remote().await;
        let mut state = self.cache.lock();
        match result {
            Ok(entity) => {
                if !state.is_closed() {
                    if insert_when(state.filter()) && !state.contains(entity.id()) {
                        state.insert(entity.clone());
                    }
                    state.notify(Notice::success(success));
                }
                Ok(entity)
            }
            Err(err) => {
                tracing::warn!(resource = self.cache.name(), error = %err, "Create failed");
                if !state.is_closed() {
                    state.notify(Notice::error(err.user_message(failure)));
                }
                Err(err.into())
            }
        }
    }

    /// A remote action on an entity with no local effect.
    pub async fn perform<R, Fut>(&self, target: &str, success: &str, failure: &str, remote: R) -> Result<()>
    where
        R: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), GatewayError>>,
    {
        {
            let state = self.cache.lock();
            if state.is_closed() {
                return Err(SyncError::Closed);
            }
            if !state.contains(target) {
                return Err(SyncError::NotFound(target.to_string()));
            }
        }

        let result = remote().await;
        let mut state = self.cache.lock();
        match result {
            Ok(()) => {
                if !state.is_closed() {
                    state.notify(Notice::success(success));
                }
                Ok(())
            }
            Err(err) => {
                tracing::warn!(entity = target, error = %err, "Action failed");
                if !state.is_closed() {
                    state.notify(Notice::error(err.user_message(failure)));
                }
                Err(err.into())
            }
        }
    }

    async fn run<M, R, Fut>(
        &self,
        intent: Intent,
        mutator: M,
        remote: R,
        notify: bool,
    ) -> Result<MutationOutcome>
    where
        M: Fn(&mut LocalEdit<'_, E>) -> Result<()>,
        R: FnOnce() -> Fut,
        Fut: Future<Output = Result<Confirmation<E>, GatewayError>>,
    {
        let mut scope = self.plan(&intent, &mutator)?;

        let (held, record, epoch) = loop {
            let (held, queued) = self.locks.acquire(&scope).await;
            if queued {
                counter!(MUTATION_QUEUED, "operation" => intent.operation.as_str()).increment(1);
            }
            match self.apply(&intent, &mutator, &scope)? {
                Applied::Dispatched { record, epoch } => break (held, record, epoch),
                Applied::Replan(touched) => {
                    tracing::debug!(
                        operation = %intent.operation,
                        entity = %intent.target,
                        "Mutation reached past its planned scope, replanning"
                    );
                    scope.extend(touched);
                }
            }
        };

        let result = remote().await;
        let outcome = self.reconcile(&intent, record, epoch, result, notify);
        drop(held);
        Ok(outcome)
    }

    fn plan<M>(&self, intent: &Intent, mutator: &M) -> Result<BTreeSet<EntityId>>
    where
        M: Fn(&mut LocalEdit<'_, E>) -> Result<()>,
    {
        let mut state = self.cache.lock();
        check_target(&state, &intent.target)?;
        let mut scope = if intent.operation.removes_on_confirm() {
            BTreeSet::new()
        } else {
            state.touched_by(|edit| mutator(edit))?
        };
        scope.insert(intent.target.clone());
        Ok(scope)
    }

    fn apply<M>(&self, intent: &Intent, mutator: &M, scope: &BTreeSet<EntityId>) -> Result<Applied>
    where
        M: Fn(&mut LocalEdit<'_, E>) -> Result<()>,
    {
        let mut state = self.cache.lock();
        check_target(&state, &intent.target)?;

        let previous = if intent.operation.removes_on_confirm() {
            Vec::new()
        } else {
            let (result, previous) = state.edit_entities(|edit| mutator(edit));
            if let Err(e) = result {
                state.restore_entities(previous);
                return Err(e);
            }
            let touched: BTreeSet<EntityId> = previous.iter().map(|(id, _)| id.clone()).collect();
            if !touched.is_subset(scope) {
                state.restore_entities(previous);
                return Ok(Applied::Replan(touched));
            }
            state.prune_selection();
            previous
        };

        let record = state.open_record(
            intent.operation,
            &intent.target,
            intent.payload.clone(),
            previous,
        );
        Ok(Applied::Dispatched {
            record,
            epoch: state.epoch(),
        })
    }

    fn reconcile(
        &self,
        intent: &Intent,
        record_id: u64,
        epoch: u64,
        result: Result<Confirmation<E>, GatewayError>,
        notify: bool,
    ) -> MutationOutcome {
        let mut state = self.cache.lock();
        let record = if state.is_closed() || state.epoch() != epoch {
            None
        } else {
            state.take_record(record_id)
        };

        let outcome = match (record, result) {
            (None, _) => {
                tracing::debug!(
                    operation = %intent.operation,
                    entity = %intent.target,
                    "Dropping result for a replaced cache"
                );
                MutationOutcome::Orphaned
            }
            (Some(mut record), Ok(confirmation)) => {
                record.resolve(RecordState::Confirmed);
                if intent.operation.removes_on_confirm() {
                    state.remove(&intent.target);
                } else {
                    confirm(&mut state, &intent.target, confirmation);
                }
                if notify && let Some(message) = &intent.success {
                    state.notify(Notice::success(message.as_str()));
                }
                MutationOutcome::Confirmed
            }
            (Some(mut record), Err(err)) => {
                record.resolve(RecordState::RolledBack);
                tracing::warn!(
                    operation = %intent.operation,
                    entity = %intent.target,
                    error = %err,
                    "Mutation rolled back"
                );
                state.restore(std::mem::take(&mut record.previous));
                if notify {
                    state.notify(Notice::error(err.user_message(&intent.failure)));
                }
                MutationOutcome::RolledBack(err)
            }
        };

        let label = match outcome {
            MutationOutcome::Confirmed => "confirmed",
            MutationOutcome::RolledBack(_) => "rolled_back",
            MutationOutcome::Orphaned => "orphaned",
        };
        counter!(MUTATION_OUTCOME, "operation" => intent.operation.as_str(), "outcome" => label)
            .increment(1);
        outcome
    }

    fn summarize(
        &self,
        operation: Operation,
        results: Vec<(EntityId, Result<MutationOutcome>)>,
    ) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for (id, outcome) in results {
            match outcome {
                Ok(MutationOutcome::Confirmed) => summary.succeeded.push(id),
                Ok(MutationOutcome::RolledBack(err)) => {
                    summary.failed.push((id, SyncError::Gateway(err)))
                }
                Ok(MutationOutcome::Orphaned) | Err(SyncError::Closed) => summary.orphaned += 1,
                Err(err) => summary.failed.push((id, err)),
            }
        }

        tracing::info!(
            operation = %operation,
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            orphaned = summary.orphaned,
            "Bulk operation settled"
        );

        if summary.orphaned == 0 {
            let notice = if summary.is_partial_failure() {
                Notice::error(summary.message())
            } else {
                Notice::success(summary.message())
            };
            self.cache.notify(notice);
        }
        summary
    }
}

fn check_target<E: Entity>(state: &CacheState<E>, target: &str) -> Result<()> {
    if state.is_closed() {
        return Err(SyncError::Closed);
    }
    if !state.contains(target) {
        return Err(SyncError::NotFound(target.to_string()));
    }
    Ok(())
}

fn confirm<E: Entity>(state: &mut CacheState<E>, target: &str, confirmation: Confirmation<E>) {
    match confirmation {
        Confirmation::Keep => {}
        Confirmation::Replace(entity) => {
            state.replace(target, entity);
        }
        Confirmation::ReplaceFields(mut entity) => {
            if let Some(current) = state.get(target) {
                entity.set_related(current.related().clone());
            }
            state.replace(target, entity);
        }
        Confirmation::Related(related) => {
            state.apply_local(target, |entity| entity.set_related(related));
        }
    }
}
