//! Mirroring of Source changes into the Target.
//!
//! For every committed create/update/delete the reconciler asks the
//! [`EchoGuard`] whether the change is its own echo, maps the record onto
//! the Target schema, calls the [`RemoteStore`], and stamps the Source
//! record with fresh [`SyncMetadata`].
//!
//! ## Failure handling
//!
//! Nothing here is reported to whoever made the edit. Store calls are
//! retried per [`RetryConfig`] when the error is retryable; once the budget
//! is spent the reconciliation ends as [`Outcome::Failed`] and the error
//! is logged. There is no rollback: a create whose write-back fails leaves
//! a Target product the Source does not know about, and a failed delete
//! leaves the Target product in place.

use crate::clock::{Clock, SystemClock};
use crate::config::{MirrorConfig, RetryConfig};
use crate::dispatcher::{
    ActionEvent, ActionHandler, EventDispatcher, FilterHandler, FilterPayload, OperationContext,
};
use crate::echo::EchoGuard;
use crate::error::{SyncError, SyncResult};
use crate::state::{Outcome, ReconcilerStats};
use crate::store::{RemoteStore, SourceStore, WriteBack};
use async_trait::async_trait;
use catsync_protocol::{
    CreateProduct, EventName, Operation, ProductOption, Record, RecordId, ReferenceId,
    SyncMetadata, SyncSource, UpdateProduct,
};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Mirrors Source lifecycle events into the Target.
pub struct Reconciler {
    source: Arc<dyn SourceStore>,
    remote: Arc<dyn RemoteStore>,
    guard: EchoGuard,
    clock: Arc<dyn Clock>,
    options: Vec<ProductOption>,
    retry: RetryConfig,
    stats: RwLock<ReconcilerStats>,
}

impl Reconciler {
    /// Creates a reconciler.
    pub fn new(
        config: &MirrorConfig,
        source: Arc<dyn SourceStore>,
        remote: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let guard = EchoGuard::new(
            Arc::clone(&source),
            Arc::clone(&clock),
            config.echo_threshold,
        );
        Self {
            source,
            remote,
            guard,
            clock,
            options: config.default_options.clone(),
            retry: config.retry.clone(),
            stats: RwLock::new(ReconcilerStats::default()),
        }
    }

    /// Creates a reconciler on the system clock.
    pub fn with_system_clock(
        config: &MirrorConfig,
        source: Arc<dyn SourceStore>,
        remote: Arc<dyn RemoteStore>,
    ) -> Self {
        Self::new(config, source, remote, Arc::new(SystemClock))
    }

    /// The echo guard in use.
    pub fn guard(&self) -> &EchoGuard {
        &self.guard
    }

    /// Current counters.
    pub fn stats(&self) -> ReconcilerStats {
        self.stats.read().clone()
    }

    /// Registers filter and action handlers for all three operations on `resource`.
    pub fn register(self: &Arc<Self>, dispatcher: &EventDispatcher, resource: &str) -> SyncResult<()> {
        for operation in Operation::ALL {
            let event = EventName::new(resource, operation).to_string();
            dispatcher.on_filter(&event, Arc::clone(self) as Arc<dyn FilterHandler>)?;
            dispatcher.on_action(&event, Arc::clone(self) as Arc<dyn ActionHandler>)?;
        }
        info!(resource, "reconciler registered");
        Ok(())
    }

    /// Mirrors a newly created record.
    pub async fn reconcile_create(&self, record: &Record) -> Outcome {
        let record_id = record.id.clone();

        let verdict = self.guard.classify(&record_id).await;
        if verdict.is_echo() {
            return self.finish(Outcome::Skipped {
                operation: Operation::Create,
                record_id,
                verdict,
            });
        }

        let metadata = SyncMetadata::stamp(
            SyncSource::Source,
            self.clock.now(),
            record.metadata.as_ref(),
        );
        let payload = CreateProduct::from_record(record, self.options.clone(), metadata.clone());

        let created = match self
            .with_retry(&record_id, Operation::Create, || self.remote.create(&payload))
            .await
        {
            Ok(created) => created,
            Err(error) => return self.fail(Operation::Create, record_id, error),
        };

        let write = WriteBack {
            reference_id: Some(created.id.clone()),
            metadata,
        };
        if let Err(error) = self.write_back(&record_id, Operation::Create, &write).await {
            // the Target product exists but nothing on our side points at it
            error!(
                record_id = %record_id,
                reference_id = %created.id,
                "target product created but source was not linked"
            );
            return self.fail(Operation::Create, record_id, error);
        }

        self.finish(Outcome::Reconciled {
            operation: Operation::Create,
            record_id,
            reference_id: created.id,
        })
    }

    /// Mirrors an update of an existing record.
    pub async fn reconcile_update(&self, record_id: &RecordId) -> Outcome {
        let verdict = self.guard.classify(record_id).await;
        if verdict.is_echo() {
            return self.finish(Outcome::Skipped {
                operation: Operation::Update,
                record_id: record_id.clone(),
                verdict,
            });
        }

        let record = match self
            .with_retry(record_id, Operation::Update, || self.source.fetch(record_id))
            .await
        {
            Ok(Some(record)) => record,
            Ok(None) => {
                let error = SyncError::not_found(record_id.clone(), "record no longer exists");
                return self.fail(Operation::Update, record_id.clone(), error);
            }
            Err(error) => return self.fail(Operation::Update, record_id.clone(), error),
        };
        let Some(reference_id) = record.reference_id.clone() else {
            let error = SyncError::not_found(record_id.clone(), "record has no reference id");
            return self.fail(Operation::Update, record_id.clone(), error);
        };

        let metadata = SyncMetadata::stamp(
            SyncSource::Source,
            self.clock.now(),
            record.metadata.as_ref(),
        );
        let payload = UpdateProduct::from_record(&record, metadata.clone());

        if let Err(error) = self
            .with_retry(record_id, Operation::Update, || {
                self.remote.update(&reference_id, &payload)
            })
            .await
        {
            return self.fail(Operation::Update, record_id.clone(), error);
        }

        let write = WriteBack {
            reference_id: None,
            metadata,
        };
        if let Err(error) = self.write_back(record_id, Operation::Update, &write).await {
            return self.fail(Operation::Update, record_id.clone(), error);
        }

        self.finish(Outcome::Reconciled {
            operation: Operation::Update,
            record_id: record_id.clone(),
            reference_id,
        })
    }

    /// Removes the Target counterpart of a deleted record.
    ///
    /// The record is already gone, so the reference id must have been
    /// captured before the deletion.
    pub async fn reconcile_delete(
        &self,
        record_id: &RecordId,
        captured_reference_id: Option<ReferenceId>,
    ) -> Outcome {
        let Some(reference_id) = captured_reference_id else {
            let error = SyncError::not_found(
                record_id.clone(),
                "no reference id was captured before deletion",
            );
            return self.fail(Operation::Delete, record_id.clone(), error);
        };

        if let Err(error) = self
            .with_retry(record_id, Operation::Delete, || {
                self.remote.delete(&reference_id)
            })
            .await
        {
            warn!(
                record_id = %record_id,
                reference_id = %reference_id,
                "target product may be left orphaned"
            );
            return self.fail(Operation::Delete, record_id.clone(), error);
        }

        self.finish(Outcome::Reconciled {
            operation: Operation::Delete,
            record_id: record_id.clone(),
            reference_id,
        })
    }

    /// Looks up and stashes the reference id of every record about to be deleted.
    ///
    /// Runs on the host's request path, so each lookup is tried once.
    pub async fn capture_references(&self, ctx: &OperationContext, keys: &[RecordId]) {
        for key in keys {
            match self.source.fetch(key).await {
                Ok(Some(record)) => {
                    debug!(
                        record_id = %key,
                        reference_id = ?record.reference_id,
                        "captured reference before delete"
                    );
                    ctx.capture_reference(key.clone(), record.reference_id);
                }
                Ok(None) => {
                    warn!(record_id = %key, "record to be deleted does not exist");
                    ctx.capture_reference(key.clone(), None);
                }
                Err(e) => {
                    error!(record_id = %key, error = %e, "failed to read record before delete");
                }
            }
        }
    }

    async fn write_back(
        &self,
        record_id: &RecordId,
        operation: Operation,
        write: &WriteBack,
    ) -> SyncResult<()> {
        self.with_retry(record_id, operation, || {
            self.source.write_back(record_id, write)
        })
        .await
        .map_err(|e| match e {
            SyncError::WriteBack { .. } => e,
            other => SyncError::WriteBack {
                record_id: record_id.clone(),
                retryable: other.is_retryable(),
                message: other.to_string(),
            },
        })
    }

    async fn with_retry<T, F, Fut>(
        &self,
        record_id: &RecordId,
        operation: Operation,
        mut call: F,
    ) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
                self.stats.write().retries += 1;
            }

            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                    warn!(
                        record_id = %record_id,
                        %operation,
                        attempt = attempt + 1,
                        max_attempts,
                        error = %e,
                        "store call failed, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn fail(&self, operation: Operation, record_id: RecordId, error: SyncError) -> Outcome {
        self.finish(Outcome::Failed {
            operation,
            record_id,
            error,
        })
    }

    fn finish(&self, outcome: Outcome) -> Outcome {
        let mut stats = self.stats.write();
        match &outcome {
            Outcome::Reconciled {
                operation,
                record_id,
                reference_id,
            } => {
                stats.reconciled += 1;
                stats.last_reconciled_at = Some(self.clock.now());
                info!(%operation, record_id = %record_id, reference_id = %reference_id, "mirrored to target");
            }
            Outcome::Skipped {
                operation,
                record_id,
                verdict,
            } => {
                stats.skipped += 1;
                info!(%operation, record_id = %record_id, %verdict, "skipping echo of mirrored write");
            }
            Outcome::Failed {
                operation,
                record_id,
                error,
            } => {
                stats.failed += 1;
                stats.last_error = Some(error.to_string());
                error!(%operation, record_id = %record_id, error = %error, "reconciliation failed");
            }
        }
        outcome
    }
}

#[async_trait]
impl FilterHandler for Reconciler {
    async fn filter(&self, ctx: &OperationContext, payload: FilterPayload) -> FilterPayload {
        match &payload {
            FilterPayload::Delete { keys } => self.capture_references(ctx, keys).await,
            other => debug!(operation = %other.operation(), "pending payload passed through"),
        }
        payload
    }
}

#[async_trait]
impl ActionHandler for Reconciler {
    async fn act(&self, _ctx: &OperationContext, event: ActionEvent) -> Outcome {
        match event {
            ActionEvent::Created { record } => self.reconcile_create(&record).await,
            ActionEvent::Updated { id } => self.reconcile_update(&id).await,
            ActionEvent::Deleted {
                id,
                captured_reference_id,
            } => self.reconcile_delete(&id, captured_reference_id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{MemoryRemoteStore, MemorySourceStore, RemoteCall};
    use catsync_protocol::SyncId;
    use chrono::TimeDelta;

    struct Fixture {
        source: Arc<MemorySourceStore>,
        remote: Arc<MemoryRemoteStore>,
        clock: Arc<ManualClock>,
        reconciler: Reconciler,
    }

    fn fixture(retry: RetryConfig) -> Fixture {
        let source = Arc::new(MemorySourceStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        let config = MirrorConfig::default().with_retry(retry);
        let reconciler = Reconciler::new(&config, source.clone(), remote.clone(), clock.clone());
        Fixture {
            source,
            remote,
            clock,
            reconciler,
        }
    }

    fn no_delay_retry(attempts: u32) -> RetryConfig {
        RetryConfig::new(attempts)
            .with_initial_delay(std::time::Duration::ZERO)
            .without_jitter()
    }

    #[tokio::test]
    async fn create_links_source_record() {
        let f = fixture(RetryConfig::no_retry());
        let record = Record::new("1", "T-Shirt").with_slug("t-shirt").with_description("d");
        f.source.insert(record.clone());

        let outcome = f.reconciler.reconcile_create(&record).await;
        assert!(matches!(outcome, Outcome::Reconciled { ref reference_id, .. } if reference_id.as_str() == "tgt-1"));

        let stored = f.source.get(&record.id).unwrap();
        assert_eq!(stored.reference_id, Some(ReferenceId::new("tgt-1")));
        let meta = stored.metadata.unwrap();
        assert_eq!(meta.sync_source, SyncSource::Source);
        assert_eq!(meta.last_synced_at, f.clock.now());

        // the stamp sent to the Target and the one written back are the same
        match &f.remote.calls()[0] {
            RemoteCall::Create(payload) => assert_eq!(payload.metadata.sync_id, meta.sync_id),
            other => panic!("unexpected call {other:?}"),
        }
        assert_eq!(f.reconciler.stats().reconciled, 1);
    }

    #[tokio::test]
    async fn create_failure_leaves_record_unlinked() {
        let f = fixture(RetryConfig::no_retry());
        let record = Record::new("1", "Mug");
        f.source.insert(record.clone());
        f.remote
            .fail_next(SyncError::remote_fatal(Operation::Create, "422 invalid handle"));

        let outcome = f.reconciler.reconcile_create(&record).await;
        assert!(matches!(outcome, Outcome::Failed { error: SyncError::RemoteCall { .. }, .. }));
        assert_eq!(f.source.get(&record.id).unwrap().reference_id, None);
        assert_eq!(f.source.write_back_count(), 0);
        assert_eq!(f.reconciler.stats().failed, 1);
    }

    #[tokio::test]
    async fn create_write_back_failure_is_reported() {
        let f = fixture(RetryConfig::no_retry());
        let record = Record::new("1", "Mug");
        f.source.insert(record.clone());
        f.source.fail_next_write_back(SyncError::Source {
            message: "permission denied".into(),
            retryable: false,
        });

        let outcome = f.reconciler.reconcile_create(&record).await;
        assert!(matches!(outcome, Outcome::Failed { error: SyncError::WriteBack { .. }, .. }));
        // the Target side did happen
        assert_eq!(f.remote.len(), 1);
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn create_write_back_retry_is_logged_as_create() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let f = fixture(no_delay_retry(2));
        let record = Record::new("1", "Mug");
        f.source.insert(record.clone());
        f.source.fail_next_write_back(SyncError::Source {
            message: "503".into(),
            retryable: true,
        });

        let outcome = f.reconciler.reconcile_create(&record).await;
        assert_eq!(outcome.state(), crate::state::OperationState::Reconciled);
        assert_eq!(f.source.write_back_count(), 2);
        assert_eq!(f.reconciler.stats().retries, 1);

        let printed = String::from_utf8(logs.0.lock().clone()).unwrap();
        assert!(printed.contains("store call failed, retrying"), "{printed}");
        assert!(printed.contains("operation=create"), "{printed}");
        assert!(!printed.contains("operation=update"), "{printed}");
    }

    #[tokio::test]
    async fn retryable_failure_is_retried() {
        let f = fixture(no_delay_retry(3));
        let record = Record::new("1", "Mug");
        f.source.insert(record.clone());
        f.remote
            .fail_next(SyncError::remote_retryable(Operation::Create, "503"));

        let outcome = f.reconciler.reconcile_create(&record).await;
        assert_eq!(outcome.state(), crate::state::OperationState::Reconciled);
        assert_eq!(f.remote.call_count(), 2);
        assert_eq!(f.reconciler.stats().retries, 1);
    }

    #[tokio::test]
    async fn fatal_failure_is_not_retried() {
        let f = fixture(no_delay_retry(3));
        let record = Record::new("1", "Mug");
        f.source.insert(record.clone());
        f.remote
            .fail_next(SyncError::remote_fatal(Operation::Create, "400"));

        let outcome = f.reconciler.reconcile_create(&record).await;
        assert_eq!(outcome.state(), crate::state::OperationState::Failed);
        assert_eq!(f.remote.call_count(), 1);
        assert_eq!(f.reconciler.stats().retries, 0);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let f = fixture(no_delay_retry(2));
        let record = Record::new("1", "Mug");
        f.source.insert(record.clone());
        for _ in 0..5 {
            f.remote
                .fail_next(SyncError::remote_retryable(Operation::Create, "503"));
        }

        let outcome = f.reconciler.reconcile_create(&record).await;
        assert_eq!(outcome.state(), crate::state::OperationState::Failed);
        assert_eq!(f.remote.call_count(), 2);
    }

    #[tokio::test]
    async fn update_skips_echo() {
        let f = fixture(RetryConfig::no_retry());
        let stamp = SyncMetadata::new(f.clock.now(), SyncSource::Target, SyncId::new("t"));
        f.source.insert(
            Record::new("1", "Mug")
                .with_reference_id("tgt-5")
                .with_metadata(stamp),
        );
        f.clock.advance(TimeDelta::seconds(3));

        let outcome = f.reconciler.reconcile_update(&RecordId::new("1")).await;
        assert!(matches!(outcome, Outcome::Skipped { .. }));
        assert_eq!(f.remote.call_count(), 0);
        assert_eq!(f.reconciler.stats().skipped, 1);
    }

    #[tokio::test]
    async fn update_of_vanished_record_fails() {
        let f = fixture(RetryConfig::no_retry());
        let outcome = f.reconciler.reconcile_update(&RecordId::new("ghost")).await;
        assert!(matches!(
            outcome,
            Outcome::Failed { error: SyncError::RecordNotFound { .. }, .. }
        ));
        assert_eq!(f.remote.call_count(), 0);
    }

    #[tokio::test]
    async fn stamps_never_move_backwards() {
        let f = fixture(RetryConfig::no_retry());
        f.remote.insert(
            "tgt-5",
            crate::store::StoredProduct {
                title: "Mug".into(),
                description: None,
                handle: "mug".into(),
                metadata: SyncMetadata::new(f.clock.now(), SyncSource::Source, SyncId::new("s")),
            },
        );
        let ahead = f.clock.now() + TimeDelta::minutes(5);
        f.source.insert(
            Record::new("1", "Mug")
                .with_reference_id("tgt-5")
                .with_metadata(SyncMetadata::new(ahead, SyncSource::Source, SyncId::new("s"))),
        );

        let outcome = f.reconciler.reconcile_update(&RecordId::new("1")).await;
        assert_eq!(outcome.state(), crate::state::OperationState::Reconciled);
        let meta = f.source.get(&RecordId::new("1")).unwrap().metadata.unwrap();
        assert_eq!(meta.last_synced_at, ahead);
    }

    #[tokio::test]
    async fn delete_without_capture_fails_before_remote_call() {
        let f = fixture(RetryConfig::no_retry());
        let outcome = f
            .reconciler
            .reconcile_delete(&RecordId::new("1"), None)
            .await;
        assert!(matches!(
            outcome,
            Outcome::Failed { error: SyncError::RecordNotFound { .. }, .. }
        ));
        assert_eq!(f.remote.call_count(), 0);
    }

    #[tokio::test]
    async fn delete_failure_is_logged_only() {
        let f = fixture(RetryConfig::no_retry());
        let outcome = f
            .reconciler
            .reconcile_delete(&RecordId::new("1"), Some(ReferenceId::new("tgt-missing")))
            .await;
        assert!(matches!(
            outcome,
            Outcome::Failed { error: SyncError::RemoteCall { .. }, .. }
        ));
        assert_eq!(f.remote.call_count(), 1);
    }
}
