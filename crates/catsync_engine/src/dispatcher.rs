//! Two-phase event dispatch.
//!
//! The host emits every lifecycle event twice: once before the mutation is
//! committed (filter phase) and once after (action phase). Filter handlers
//! see the pending payload and may stash state in the operation's
//! [`OperationContext`]; action handlers receive the same context after
//! commit. Contexts are keyed by the request's [`CorrelationId`], so
//! concurrent operations never see each other's captures.
//!
//! Action handlers run on spawned tasks. [`EventDispatcher::action`]
//! returns as soon as they are spawned.

use crate::error::{SyncError, SyncResult};
use crate::state::{OperationState, Outcome};
use async_trait::async_trait;
use catsync_protocol::{
    CorrelationId, EventName, Operation, Record, RecordId, RecordPatch, ReferenceId,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info_span, warn, Instrument};

/// Payload seen by filter handlers, before commit.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterPayload {
    /// Fields of a record about to be created.
    Create(RecordPatch),
    /// Records about to be updated, and the change.
    Update {
        /// Keys of the affected records.
        keys: Vec<RecordId>,
        /// The pending change.
        patch: RecordPatch,
    },
    /// Records about to be deleted.
    Delete {
        /// Keys of the affected records.
        keys: Vec<RecordId>,
    },
}

impl FilterPayload {
    /// The operation this payload belongs to.
    pub fn operation(&self) -> Operation {
        match self {
            FilterPayload::Create(_) => Operation::Create,
            FilterPayload::Update { .. } => Operation::Update,
            FilterPayload::Delete { .. } => Operation::Delete,
        }
    }
}

/// What the host reports after commit.
#[derive(Debug, Clone, PartialEq)]
pub enum Committed {
    /// The record that was created.
    Created(Record),
    /// Keys of updated records.
    Updated {
        /// Keys of the affected records.
        keys: Vec<RecordId>,
    },
    /// Keys of deleted records.
    Deleted {
        /// Keys of the affected records.
        keys: Vec<RecordId>,
    },
}

impl Committed {
    /// The operation this commit belongs to.
    pub fn operation(&self) -> Operation {
        match self {
            Committed::Created(_) => Operation::Create,
            Committed::Updated { .. } => Operation::Update,
            Committed::Deleted { .. } => Operation::Delete,
        }
    }
}

/// Per-record event handed to action handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionEvent {
    /// A record was created.
    Created {
        /// The committed record.
        record: Record,
    },
    /// A record was updated.
    Updated {
        /// Key of the record.
        id: RecordId,
    },
    /// A record was deleted. It can no longer be read.
    Deleted {
        /// Key of the deleted record.
        id: RecordId,
        /// Reference id captured during the filter phase.
        captured_reference_id: Option<ReferenceId>,
    },
}

impl ActionEvent {
    /// The operation this event belongs to.
    pub fn operation(&self) -> Operation {
        match self {
            ActionEvent::Created { .. } => Operation::Create,
            ActionEvent::Updated { .. } => Operation::Update,
            ActionEvent::Deleted { .. } => Operation::Delete,
        }
    }

    /// The Source record concerned.
    pub fn record_id(&self) -> &RecordId {
        match self {
            ActionEvent::Created { record } => &record.id,
            ActionEvent::Updated { id } | ActionEvent::Deleted { id, .. } => id,
        }
    }
}

/// State carried from the filter phase to the action phase of one operation.
#[derive(Debug)]
pub struct OperationContext {
    correlation_id: CorrelationId,
    event: EventName,
    state: Mutex<OperationState>,
    captured: Mutex<HashMap<RecordId, Option<ReferenceId>>>,
}

impl OperationContext {
    /// Creates a pending context.
    pub fn new(correlation_id: CorrelationId, event: EventName) -> Self {
        Self {
            correlation_id,
            event,
            state: Mutex::new(OperationState::Pending),
            captured: Mutex::new(HashMap::new()),
        }
    }

    /// The request's correlation id.
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// The event this operation was raised for.
    pub fn event(&self) -> &EventName {
        &self.event
    }

    /// Current lifecycle state.
    pub fn state(&self) -> OperationState {
        *self.state.lock()
    }

    /// Stashes what a record's reference id was before the mutation.
    ///
    /// `None` records that the record was looked up and had no reference.
    pub fn capture_reference(&self, record_id: RecordId, reference_id: Option<ReferenceId>) {
        self.captured.lock().insert(record_id, reference_id);
    }

    /// The reference id captured for a record, if any.
    pub fn captured_reference(&self, record_id: &RecordId) -> Option<ReferenceId> {
        self.captured.lock().get(record_id).cloned().flatten()
    }

    /// Returns true if the filter phase looked at this record.
    pub fn was_captured(&self, record_id: &RecordId) -> bool {
        self.captured.lock().contains_key(record_id)
    }

    fn advance(&self, next: OperationState) {
        let mut state = self.state.lock();
        if state.can_transition_to(next) {
            *state = next;
        } else if *state != next {
            let current = *state;
            warn!(
                correlation_id = %self.correlation_id,
                from = %current,
                to = %next,
                "ignoring illegal operation state transition"
            );
        }
    }

    /// Folds a per-record result into the operation's state.
    ///
    /// A failure anywhere fails the operation; otherwise any reconciled
    /// record makes it reconciled.
    fn settle(&self, outcome: OperationState) {
        let mut state = self.state.lock();
        *state = match (*state, outcome) {
            (OperationState::Committed, next) => next,
            (_, OperationState::Failed) => OperationState::Failed,
            (OperationState::Skipped, OperationState::Reconciled) => OperationState::Reconciled,
            (current, _) => current,
        };
    }
}

/// Runs before commit. Must return a payload of the same kind it received.
#[async_trait]
pub trait FilterHandler: Send + Sync {
    /// Inspects or transforms a pending payload.
    async fn filter(&self, ctx: &OperationContext, payload: FilterPayload) -> FilterPayload;
}

/// Runs after commit, once per affected record.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Reacts to a committed change.
    async fn act(&self, ctx: &OperationContext, event: ActionEvent) -> Outcome;
}

/// Handle to the action-phase tasks of one operation.
///
/// Dropping it leaves the tasks running.
#[derive(Debug)]
pub struct ActionTicket {
    context: Arc<OperationContext>,
    handles: Vec<JoinHandle<Outcome>>,
}

impl ActionTicket {
    /// The operation's correlation id.
    pub fn correlation_id(&self) -> CorrelationId {
        self.context.correlation_id()
    }

    /// The operation's context.
    pub fn context(&self) -> Arc<OperationContext> {
        Arc::clone(&self.context)
    }

    /// Number of spawned tasks.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns true if no handler was registered for the event.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every task and collects their outcomes.
    pub async fn wait(self) -> Vec<Outcome> {
        let mut outcomes = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(
                    correlation_id = %self.context.correlation_id,
                    error = %e,
                    "action task did not complete"
                ),
            }
        }
        outcomes
    }
}

type FilterTable = HashMap<EventName, Vec<Arc<dyn FilterHandler>>>;
type ActionTable = HashMap<EventName, Vec<Arc<dyn ActionHandler>>>;

/// Routes host events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    filters: RwLock<FilterTable>,
    actions: RwLock<ActionTable>,
    in_flight: Mutex<HashMap<CorrelationId, Arc<OperationContext>>>,
}

impl EventDispatcher {
    /// Creates a dispatcher with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a filter handler for `event` (e.g. `products.items.delete`).
    pub fn on_filter(&self, event: &str, handler: Arc<dyn FilterHandler>) -> SyncResult<()> {
        let name: EventName = event.parse()?;
        debug!(event = %name, "registered filter handler");
        self.filters.write().entry(name).or_default().push(handler);
        Ok(())
    }

    /// Registers an action handler for `event`.
    ///
    /// Action handlers run concurrently as separate tasks, so they must not
    /// depend on each other's effects. Only their outcomes keep registration
    /// order in [`ActionTicket::wait`].
    pub fn on_action(&self, event: &str, handler: Arc<dyn ActionHandler>) -> SyncResult<()> {
        let name: EventName = event.parse()?;
        debug!(event = %name, "registered action handler");
        self.actions.write().entry(name).or_default().push(handler);
        Ok(())
    }

    /// Runs the filter phase of an operation.
    ///
    /// Handlers run in registration order, each seeing the previous one's
    /// output. The returned payload is what the host should commit.
    pub async fn filter(
        &self,
        correlation_id: CorrelationId,
        event: &str,
        payload: FilterPayload,
    ) -> SyncResult<FilterPayload> {
        let name: EventName = event.parse()?;
        check_shape(&name, payload.operation())?;

        let ctx = Arc::clone(
            self.in_flight
                .lock()
                .entry(correlation_id)
                .or_insert_with(|| Arc::new(OperationContext::new(correlation_id, name.clone()))),
        );
        let handlers = self.filters.read().get(&name).cloned().unwrap_or_default();

        let span = info_span!("filter", %correlation_id, event = %name);
        let result = async {
            let mut payload = payload;
            for handler in handlers {
                payload = handler.filter(&ctx, payload).await;
                check_shape(&name, payload.operation())?;
            }
            Ok::<_, SyncError>(payload)
        }
        .instrument(span)
        .await;

        match result {
            Ok(payload) => {
                ctx.advance(OperationState::Filtered);
                Ok(payload)
            }
            Err(e) => {
                self.in_flight.lock().remove(&correlation_id);
                Err(e)
            }
        }
    }

    /// Runs the action phase of an operation.
    ///
    /// Consumes the context created by [`filter`](Self::filter) for the same
    /// correlation id, spawns one task per handler and affected record, and
    /// returns without waiting for them. Must be called inside a Tokio
    /// runtime.
    pub fn action(
        &self,
        correlation_id: CorrelationId,
        event: &str,
        committed: Committed,
    ) -> SyncResult<ActionTicket> {
        let name: EventName = event.parse()?;
        check_shape(&name, committed.operation())?;

        let ctx = match self.in_flight.lock().remove(&correlation_id) {
            Some(ctx) => ctx,
            None => {
                debug!(%correlation_id, event = %name, "no filter phase recorded for operation");
                Arc::new(OperationContext::new(correlation_id, name.clone()))
            }
        };
        ctx.advance(OperationState::Committed);

        let events = expand(&ctx, committed);
        let handlers = self.actions.read().get(&name).cloned().unwrap_or_default();

        let mut handles = Vec::with_capacity(handlers.len() * events.len());
        for handler in &handlers {
            for event in &events {
                let handler = Arc::clone(handler);
                let task_ctx = Arc::clone(&ctx);
                let event = event.clone();
                let span = info_span!(
                    "action",
                    %correlation_id,
                    event = %name,
                    record_id = %event.record_id()
                );
                handles.push(tokio::spawn(
                    async move {
                        let outcome = handler.act(&task_ctx, event).await;
                        task_ctx.settle(outcome.state());
                        outcome
                    }
                    .instrument(span),
                ));
            }
        }

        Ok(ActionTicket {
            context: ctx,
            handles,
        })
    }

    /// Drops the context of an operation the host aborted before commit.
    pub fn discard(&self, correlation_id: CorrelationId) -> bool {
        self.in_flight.lock().remove(&correlation_id).is_some()
    }

    /// Number of operations between filter and action phase.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }
}

fn check_shape(name: &EventName, actual: Operation) -> SyncResult<()> {
    if name.operation() == actual {
        Ok(())
    } else {
        Err(SyncError::PayloadShapeChanged {
            event: name.to_string(),
            expected: name.operation(),
            actual,
        })
    }
}

fn expand(ctx: &OperationContext, committed: Committed) -> Vec<ActionEvent> {
    match committed {
        Committed::Created(record) => vec![ActionEvent::Created { record }],
        Committed::Updated { keys } => keys
            .into_iter()
            .map(|id| ActionEvent::Updated { id })
            .collect(),
        Committed::Deleted { keys } => keys
            .into_iter()
            .map(|id| ActionEvent::Deleted {
                captured_reference_id: ctx.captured_reference(&id),
                id,
            })
            .collect(),
    }
}
