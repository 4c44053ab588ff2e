//! An in-process host driving the mirror.
//!
//! [`MirrorHarness`] wires a [`Reconciler`] to in-memory stores and a
//! manual clock, and plays the host's part of every lifecycle event:
//! filter phase, commit, action phase.

use crate::fixtures::{base_time, target_stamp};
use catsync_engine::{
    ActionTicket, Clock, Committed, EventDispatcher, FilterPayload, ManualClock,
    MemoryRemoteStore, MemorySourceStore, MirrorConfig, Outcome, Reconciler, RetryConfig,
    SyncResult,
};
use catsync_protocol::{CorrelationId, EventName, Operation, Record, RecordId, RecordPatch};
use std::sync::Arc;

/// Host simulation around a registered reconciler.
pub struct MirrorHarness {
    /// Source side.
    pub source: Arc<MemorySourceStore>,
    /// Target side.
    pub remote: Arc<MemoryRemoteStore>,
    /// Clock shared by the reconciler and the harness.
    pub clock: Arc<ManualClock>,
    /// The reconciler under test.
    pub reconciler: Arc<Reconciler>,
    /// The dispatcher the reconciler is registered on.
    pub dispatcher: EventDispatcher,
    resource: String,
}

impl MirrorHarness {
    /// Creates a harness with retries disabled, starting at the fixture epoch.
    pub fn new() -> Self {
        Self::with_config(MirrorConfig::default().with_retry(RetryConfig::no_retry()))
    }

    /// Creates a harness from a configuration.
    ///
    /// Panics if the configured collection is not a valid resource name.
    pub fn with_config(config: MirrorConfig) -> Self {
        let source = Arc::new(MemorySourceStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let clock = Arc::new(ManualClock::new(base_time()));
        let reconciler = Arc::new(Reconciler::new(
            &config,
            source.clone(),
            remote.clone(),
            clock.clone(),
        ));
        let dispatcher = EventDispatcher::new();
        reconciler
            .register(&dispatcher, &config.source_collection)
            .expect("register reconciler");

        Self {
            source,
            remote,
            clock,
            reconciler,
            dispatcher,
            resource: config.source_collection,
        }
    }

    /// Event name for `operation` on the harness resource.
    pub fn event(&self, operation: Operation) -> String {
        EventName::new(self.resource.as_str(), operation).to_string()
    }

    /// Creates `record` through both phases and returns without waiting.
    pub async fn start_create(&self, record: Record) -> SyncResult<ActionTicket> {
        let cid = CorrelationId::new();
        let event = self.event(Operation::Create);
        let filtered = self
            .dispatcher
            .filter(cid, &event, FilterPayload::Create(patch_of(&record)))
            .await?;

        let mut committed = record;
        if let FilterPayload::Create(patch) = filtered {
            patch.apply_to(&mut committed);
        }
        self.source.insert(committed.clone());

        self.dispatcher
            .action(cid, &event, Committed::Created(committed))
    }

    /// Creates `record` and waits for reconciliation.
    pub async fn create(&self, record: Record) -> SyncResult<Vec<Outcome>> {
        Ok(self.start_create(record).await?.wait().await)
    }

    /// Updates `keys` through both phases and returns without waiting.
    pub async fn start_update(
        &self,
        keys: &[RecordId],
        patch: RecordPatch,
    ) -> SyncResult<ActionTicket> {
        let cid = CorrelationId::new();
        let event = self.event(Operation::Update);
        let filtered = self
            .dispatcher
            .filter(
                cid,
                &event,
                FilterPayload::Update {
                    keys: keys.to_vec(),
                    patch,
                },
            )
            .await?;

        if let FilterPayload::Update { keys, patch } = &filtered {
            for key in keys {
                self.source.apply(key, patch);
            }
        }

        self.dispatcher.action(
            cid,
            &event,
            Committed::Updated {
                keys: keys.to_vec(),
            },
        )
    }

    /// Updates `keys` and waits for reconciliation.
    pub async fn update(&self, keys: &[RecordId], patch: RecordPatch) -> SyncResult<Vec<Outcome>> {
        Ok(self.start_update(keys, patch).await?.wait().await)
    }

    /// Deletes `keys` through both phases and returns without waiting.
    pub async fn start_delete(&self, keys: &[RecordId]) -> SyncResult<ActionTicket> {
        let cid = CorrelationId::new();
        let event = self.event(Operation::Delete);
        self.dispatcher
            .filter(
                cid,
                &event,
                FilterPayload::Delete {
                    keys: keys.to_vec(),
                },
            )
            .await?;

        for key in keys {
            self.source.remove(key);
        }

        self.dispatcher.action(
            cid,
            &event,
            Committed::Deleted {
                keys: keys.to_vec(),
            },
        )
    }

    /// Deletes `keys` and waits for reconciliation.
    pub async fn delete(&self, keys: &[RecordId]) -> SyncResult<Vec<Outcome>> {
        Ok(self.start_delete(keys).await?.wait().await)
    }

    /// Simulates the Target pushing a change into the Source.
    ///
    /// The record is patched and stamped `syncSource = target` at the
    /// current clock time, without going through the dispatcher.
    pub fn target_push(&self, id: &RecordId, patch: &RecordPatch) -> bool {
        self.source.apply(id, patch)
            && self
                .source
                .set_metadata(id, Some(target_stamp(self.clock.now())))
    }
}

impl Default for MirrorHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// The fields of `record` as a create payload.
pub fn patch_of(record: &Record) -> RecordPatch {
    RecordPatch {
        name: Some(record.name.clone()),
        description: record.description.clone(),
        slug: Some(record.slug.clone()),
        price: record.price,
        category: record.category.clone(),
        is_available: Some(record.is_available),
        sku: record.sku.clone(),
    }
}
