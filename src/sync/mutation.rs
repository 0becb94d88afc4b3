//! Mutation coordinator
//!
//! Each create/update/delete attempt moves through
//! `Idle → OptimisticApplied (optional) → Pending → Committed | RolledBack`.
//! Every state is its own type and every transition consumes it, so an
//! attempt cannot be committed twice or rolled back after committing.
//!
//! - Validation runs before the attempt exists; a rejected mutation never
//!   touches the cache or the network.
//! - The optimistic patch is applied synchronously, before the request is
//!   issued. A rollback takes back only this attempt's own patch: entries
//!   nobody else wrote since are restored exactly, otherwise just the
//!   targeted record is reverted.
//! - On commit the server record replaces the placeholder, dependent keys are
//!   invalidated and a view event is published.

use super::invalidation::{Invalidation, InvalidationBroadcaster, InvalidationScope};
use crate::backend::{Backend, BackendError};
use crate::cache::{CacheKey, EntityCacheStore, PatchUndo};
use crate::events::{CrudAction, EventEmitter, ViewEvent};
use crate::models::{record_id, record_project_id, EntityKind};
use crate::validation::{validate, ValidationError};
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Prefix of placeholder ids given to optimistically created records
pub const TEMP_ID_PREFIX: &str = "temp-";

/// A requested change to one entity collection
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Create { kind: EntityKind, record: Value },
    Update { kind: EntityKind, id: String, changes: Value },
    Delete { kind: EntityKind, id: String },
}

impl Mutation {
    pub fn create(kind: EntityKind, record: Value) -> Self {
        Mutation::Create { kind, record }
    }

    pub fn update(kind: EntityKind, id: impl Into<String>, changes: Value) -> Self {
        Mutation::Update {
            kind,
            id: id.into(),
            changes,
        }
    }

    pub fn delete(kind: EntityKind, id: impl Into<String>) -> Self {
        Mutation::Delete {
            kind,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Mutation::Create { kind, .. }
            | Mutation::Update { kind, .. }
            | Mutation::Delete { kind, .. } => *kind,
        }
    }

    pub fn action(&self) -> CrudAction {
        match self {
            Mutation::Create { .. } => CrudAction::Created,
            Mutation::Update { .. } => CrudAction::Updated,
            Mutation::Delete { .. } => CrudAction::Deleted,
        }
    }

    /// Id of the targeted record; `None` for creates
    pub fn target_id(&self) -> Option<&str> {
        match self {
            Mutation::Create { .. } => None,
            Mutation::Update { id, .. } | Mutation::Delete { id, .. } => Some(id),
        }
    }
}

/// Where an attempt currently is, for logging and inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    Idle,
    OptimisticApplied,
    Pending,
    Committed,
    RolledBack,
}

impl fmt::Display for MutationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MutationPhase::Idle => "idle",
            MutationPhase::OptimisticApplied => "optimistic_applied",
            MutationPhase::Pending => "pending",
            MutationPhase::Committed => "committed",
            MutationPhase::RolledBack => "rolled_back",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MutationError {
    /// Rejected before any cache or network activity
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The request failed; optimistic changes were rolled back
    #[error("backend rejected mutation: {0}")]
    Backend(BackendError),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: EntityKind, id: String },
}

impl From<BackendError> for MutationError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::NotFound { kind, id } => MutationError::NotFound { kind, id },
            other => MutationError::Backend(other),
        }
    }
}

/// Per-call overrides
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationOptions {
    /// Overrides the configured optimistic mode
    pub optimistic: Option<bool>,
}

impl MutationOptions {
    pub fn optimistic(enabled: bool) -> Self {
        Self {
            optimistic: Some(enabled),
        }
    }
}

/// What a committed mutation produced
#[derive(Debug)]
pub struct MutationOutcome {
    /// Authoritative server record; `None` for deletes
    pub record: Option<Value>,
    pub invalidation: Invalidation,
}

#[derive(Clone)]
pub struct MutationCoordinator {
    store: Arc<EntityCacheStore>,
    backend: Arc<dyn Backend>,
    broadcaster: InvalidationBroadcaster,
    emitter: Arc<dyn EventEmitter>,
    optimistic: bool,
}

impl MutationCoordinator {
    pub fn new(
        store: Arc<EntityCacheStore>,
        backend: Arc<dyn Backend>,
        broadcaster: InvalidationBroadcaster,
        emitter: Arc<dyn EventEmitter>,
        optimistic: bool,
    ) -> Self {
        Self {
            store,
            backend,
            broadcaster,
            emitter,
            optimistic,
        }
    }

    /// Validate `mutation` and start an attempt
    pub fn begin(&self, mutation: Mutation) -> Result<IdleMutation<'_>, MutationError> {
        self.begin_on(mutation, chrono::Local::now().date_naive())
    }

    /// Like [`begin`](Self::begin) with an explicit date for the future-date rules
    pub fn begin_on(
        &self,
        mutation: Mutation,
        today: NaiveDate,
    ) -> Result<IdleMutation<'_>, MutationError> {
        if let Err(e) = validate(&mutation, &self.store, today) {
            debug!(
                entity_type = %mutation.kind(),
                error = %e,
                "Mutation rejected by validation"
            );
            return Err(e.into());
        }
        Ok(IdleMutation {
            attempt: Attempt {
                coordinator: self,
                id: Uuid::new_v4(),
                placeholder_id: None,
                previous: mutation
                    .target_id()
                    .and_then(|id| self.cached_record(mutation.kind(), id)),
                mutation,
            },
        })
    }

    /// Run a mutation through the whole state machine
    pub async fn execute(
        &self,
        mutation: Mutation,
        options: MutationOptions,
    ) -> Result<MutationOutcome, MutationError> {
        let idle = self.begin(mutation)?;
        let pending = if options.optimistic.unwrap_or(self.optimistic) {
            idle.apply_optimistic().submit()
        } else {
            idle.submit()
        };
        match pending.settle().await {
            Ok(committed) => Ok(committed.into_outcome()),
            Err(rolled_back) => Err(rolled_back.into_error()),
        }
    }

    pub async fn create(&self, kind: EntityKind, record: Value) -> Result<MutationOutcome, MutationError> {
        self.execute(Mutation::create(kind, record), MutationOptions::default())
            .await
    }

    pub async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        changes: Value,
    ) -> Result<MutationOutcome, MutationError> {
        self.execute(Mutation::update(kind, id, changes), MutationOptions::default())
            .await
    }

    pub async fn delete(&self, kind: EntityKind, id: &str) -> Result<MutationOutcome, MutationError> {
        self.execute(Mutation::delete(kind, id), MutationOptions::default())
            .await
    }

    fn cached_record(&self, kind: EntityKind, id: &str) -> Option<Value> {
        self.store
            .data(&CacheKey::Collection(kind))
            .iter()
            .find(|record| record_id(record).as_deref() == Some(id))
            .cloned()
    }
}

// ============================================================================
// States
// ============================================================================

/// Shared data of one attempt
struct Attempt<'a> {
    coordinator: &'a MutationCoordinator,
    id: Uuid,
    mutation: Mutation,
    /// Temporary id of an optimistically created record
    placeholder_id: Option<String>,
    /// Cached record targeted by an update or delete, before the mutation
    previous: Option<Value>,
}

impl Attempt<'_> {
    fn collection_key(&self) -> CacheKey {
        CacheKey::Collection(self.mutation.kind())
    }

    /// Keys an optimistic patch touches
    fn affected_keys(&self) -> Vec<CacheKey> {
        let mut keys = vec![self.collection_key()];
        if let (EntityKind::Project, Some(id)) = (self.mutation.kind(), self.mutation.target_id()) {
            let detail = CacheKey::project_detail(id);
            if self.coordinator.store.contains(&detail) {
                keys.push(detail);
            }
        }
        keys
    }

    /// Record id an optimistic patch touched: the placeholder or the target
    fn patched_id(&self) -> Option<&str> {
        self.placeholder_id
            .as_deref()
            .or_else(|| self.mutation.target_id())
    }

    fn revert(&self, undo: Vec<PatchUndo>) {
        let Some(id) = self.patched_id() else {
            return;
        };
        // Newest patch first
        for patch in undo.into_iter().rev() {
            self.coordinator.store.revert(patch, id);
        }
    }

    fn log_phase(&self, phase: MutationPhase) {
        debug!(
            mutation_id = %self.id,
            entity_type = %self.mutation.kind(),
            action = ?self.mutation.action(),
            phase = %phase,
            "Mutation phase"
        );
    }
}

/// Validated, nothing applied yet
pub struct IdleMutation<'a> {
    attempt: Attempt<'a>,
}

impl<'a> IdleMutation<'a> {
    pub fn phase(&self) -> MutationPhase {
        MutationPhase::Idle
    }

    pub fn mutation(&self) -> &Mutation {
        &self.attempt.mutation
    }

    /// Patch the cache as if the server had already accepted the mutation
    pub fn apply_optimistic(mut self) -> OptimisticMutation<'a> {
        let keys = self.attempt.affected_keys();
        let store = &self.attempt.coordinator.store;

        let undo = match &self.attempt.mutation {
            Mutation::Create { record, .. } => {
                let mut placeholder = record.clone();
                let placeholder_id = match record_id(record) {
                    Some(id) => id,
                    None => {
                        let id = format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4());
                        if let Value::Object(map) = &mut placeholder {
                            map.insert("id".into(), Value::String(id.clone()));
                        }
                        id
                    }
                };
                let undo = store.patch_undoable(self.attempt.collection_key(), |records| {
                    let mut next = records.to_vec();
                    next.push(placeholder);
                    next
                });
                self.attempt.placeholder_id = Some(placeholder_id);
                vec![undo]
            }
            Mutation::Update { id, changes, .. } => keys
                .into_iter()
                .map(|key| store.patch_undoable(key, |records| merge_into(records, id, changes)))
                .collect(),
            Mutation::Delete { id, .. } => keys
                .into_iter()
                .map(|key| store.patch_undoable(key, |records| without(records, id)))
                .collect(),
        };

        self.attempt.log_phase(MutationPhase::OptimisticApplied);
        OptimisticMutation {
            attempt: self.attempt,
            undo,
        }
    }

    /// Issue the request without touching the cache first
    pub fn submit(self) -> PendingMutation<'a> {
        self.attempt.log_phase(MutationPhase::Pending);
        PendingMutation {
            attempt: self.attempt,
            undo: Vec::new(),
        }
    }
}

/// The cache shows the mutation; the request has not been issued
pub struct OptimisticMutation<'a> {
    attempt: Attempt<'a>,
    undo: Vec<PatchUndo>,
}

impl<'a> OptimisticMutation<'a> {
    pub fn phase(&self) -> MutationPhase {
        MutationPhase::OptimisticApplied
    }

    /// Temporary id of the optimistically created record
    pub fn placeholder_id(&self) -> Option<&str> {
        self.attempt.placeholder_id.as_deref()
    }

    pub fn submit(self) -> PendingMutation<'a> {
        self.attempt.log_phase(MutationPhase::Pending);
        PendingMutation {
            attempt: self.attempt,
            undo: self.undo,
        }
    }

    /// Undo the optimistic patch without sending anything
    pub fn cancel(self) {
        self.attempt.revert(self.undo);
        self.attempt.log_phase(MutationPhase::RolledBack);
    }
}

/// Waiting for the server
pub struct PendingMutation<'a> {
    attempt: Attempt<'a>,
    /// Empty when no optimistic patch was applied
    undo: Vec<PatchUndo>,
}

impl<'a> PendingMutation<'a> {
    pub fn phase(&self) -> MutationPhase {
        MutationPhase::Pending
    }

    /// Send the request and commit or roll back on its response
    pub async fn settle(self) -> Result<CommittedMutation, RolledBackMutation> {
        let backend = &self.attempt.coordinator.backend;
        let response = match &self.attempt.mutation {
            Mutation::Create { kind, record } => {
                backend.create(*kind, &server_payload(record)).await.map(Some)
            }
            Mutation::Update { kind, id, changes } => {
                backend.update(*kind, id, changes).await.map(Some)
            }
            Mutation::Delete { kind, id } => backend.delete(*kind, id).await.map(|()| None),
        };
        match response {
            Ok(record) => Ok(self.commit(record)),
            Err(error) => Err(self.roll_back(error.into())),
        }
    }

    /// Reconcile the cache with the server's answer, invalidate dependents
    /// and publish the view event
    pub fn commit(self, server_record: Option<Value>) -> CommittedMutation {
        let attempt = self.attempt;
        let coordinator = attempt.coordinator;
        let kind = attempt.mutation.kind();
        let key = attempt.collection_key();

        match (&attempt.mutation, &server_record) {
            (Mutation::Create { .. }, Some(record)) => {
                let placeholder = attempt.placeholder_id.clone();
                coordinator.store.reconcile(&key, |records| {
                    replace_or_upsert(records, placeholder.as_deref(), record)
                });
            }
            (Mutation::Update { id, .. }, Some(record)) => {
                coordinator
                    .store
                    .reconcile(&key, |records| replace_or_upsert(records, Some(id), record));
                if kind == EntityKind::Project {
                    coordinator
                        .store
                        .reconcile(&CacheKey::project_detail(id.as_str()), |_| vec![record.clone()]);
                }
            }
            (Mutation::Delete { id, .. }, _) => {
                coordinator.store.reconcile(&key, |records| without(records, id));
            }
            (_, None) => {}
        }

        let scope = invalidation_scope(
            kind,
            server_record.as_ref(),
            attempt.previous.as_ref(),
            attempt.mutation.target_id(),
        );
        let invalidation = coordinator.broadcaster.invalidate(kind, &scope);

        let entity = match (&attempt.mutation, &server_record) {
            (_, Some(record)) => record.clone(),
            (mutation, None) => json!({ "id": mutation.target_id() }),
        };
        coordinator.emitter.emit(ViewEvent::for_entity(
            kind,
            attempt.mutation.action(),
            entity,
        ));

        attempt.log_phase(MutationPhase::Committed);
        info!(
            mutation_id = %attempt.id,
            entity_type = %kind,
            action = ?attempt.mutation.action(),
            "Mutation committed"
        );
        CommittedMutation {
            record: server_record,
            invalidation,
        }
    }

    /// Take back this attempt's optimistic patch and hand back the error
    pub fn roll_back(self, error: MutationError) -> RolledBackMutation {
        let restored = !self.undo.is_empty();
        self.attempt.revert(self.undo);
        self.attempt.log_phase(MutationPhase::RolledBack);
        warn!(
            mutation_id = %self.attempt.id,
            entity_type = %self.attempt.mutation.kind(),
            action = ?self.attempt.mutation.action(),
            restored,
            error = %error,
            "Mutation rolled back"
        );
        RolledBackMutation { error }
    }
}

#[derive(Debug)]
pub struct CommittedMutation {
    record: Option<Value>,
    invalidation: Invalidation,
}

impl CommittedMutation {
    pub fn phase(&self) -> MutationPhase {
        MutationPhase::Committed
    }

    pub fn record(&self) -> Option<&Value> {
        self.record.as_ref()
    }

    pub fn into_outcome(self) -> MutationOutcome {
        MutationOutcome {
            record: self.record,
            invalidation: self.invalidation,
        }
    }
}

#[derive(Debug)]
pub struct RolledBackMutation {
    error: MutationError,
}

impl RolledBackMutation {
    pub fn phase(&self) -> MutationPhase {
        MutationPhase::RolledBack
    }

    pub fn error(&self) -> &MutationError {
        &self.error
    }

    pub fn into_error(self) -> MutationError {
        self.error
    }
}

// ============================================================================
// Collection transforms
// ============================================================================

fn has_id(record: &Value, id: &str) -> bool {
    record_id(record).as_deref() == Some(id)
}

/// Shallow-merge `changes` into the record with `id`
fn merge_into(records: &[Value], id: &str, changes: &Value) -> Vec<Value> {
    records
        .iter()
        .map(|record| {
            let mut record = record.clone();
            if has_id(&record, id) {
                if let (Value::Object(target), Value::Object(changes)) = (&mut record, changes) {
                    for (field, value) in changes {
                        if field != "id" {
                            target.insert(field.clone(), value.clone());
                        }
                    }
                }
            }
            record
        })
        .collect()
}

fn without(records: &[Value], id: &str) -> Vec<Value> {
    records.iter().filter(|r| !has_id(r, id)).cloned().collect()
}

/// Swap the placeholder for the server record, or upsert it by its id
fn replace_or_upsert(records: &[Value], placeholder: Option<&str>, server: &Value) -> Vec<Value> {
    let server_id = record_id(server);
    let mut next: Vec<Value> = Vec::with_capacity(records.len() + 1);
    let mut placed = false;
    for record in records {
        let id = record_id(record);
        let matches = id.is_some() && (id.as_deref() == placeholder || id == server_id);
        if matches {
            if !placed {
                next.push(server.clone());
                placed = true;
            }
        } else {
            next.push(record.clone());
        }
    }
    if !placed {
        next.push(server.clone());
    }
    next
}

/// Strip a placeholder id before sending a create
fn server_payload(record: &Value) -> Value {
    let mut payload = record.clone();
    if let Value::Object(map) = &mut payload {
        let temporary = map
            .get("id")
            .and_then(Value::as_str)
            .is_some_and(|id| id.starts_with(TEMP_ID_PREFIX));
        if temporary {
            map.remove("id");
        }
    }
    payload
}

/// Projects whose detail keys a committed mutation affects: the owner after
/// the mutation and, if it moved, the owner before it
fn invalidation_scope(
    kind: EntityKind,
    server_record: Option<&Value>,
    previous: Option<&Value>,
    target_id: Option<&str>,
) -> InvalidationScope {
    let mut scope = InvalidationScope::none();
    let owners = [
        server_record.and_then(|r| record_project_id(kind, r)),
        previous.and_then(|r| record_project_id(kind, r)),
        (kind == EntityKind::Project)
            .then(|| target_id.map(str::to_string))
            .flatten(),
    ];
    for owner in owners.into_iter().flatten() {
        scope = scope.and_project(owner);
    }
    scope
}
