//! Replay command implementation.
//!
//! Plays a scripted sequence of host events through a registered
//! reconciler backed by in-memory stores and a manual clock, and reports
//! the outcome of every step.
//!
//! ```json
//! {
//!   "start": "2024-05-01T10:00:00.000Z",
//!   "steps": [
//!     { "op": "create", "id": "1", "record": { "name": "T-Shirt", "slug": "t-shirt" } },
//!     { "op": "advance", "ms": 2000 },
//!     { "op": "target_push", "id": "1", "patch": { "name": "T-Shirt v2" } },
//!     { "op": "update", "ids": ["1"] },
//!     { "op": "delete", "ids": ["1"] }
//!   ]
//! }
//! ```

use catsync_engine::{
    Clock, Committed, EventDispatcher, FilterPayload, ManualClock, MemoryRemoteStore,
    MemorySourceStore, MirrorConfig, Outcome, Reconciler, ReconcilerStats, RetryConfig,
    SyncError,
};
use catsync_protocol::{
    wire, CorrelationId, EventName, Operation, ProtocolError, RecordId, RecordPatch, SyncId,
    SyncMetadata, SyncSource,
};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that abort a replay.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The script could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// Script path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The script is malformed.
    #[error("invalid script: {0}")]
    Script(#[from] ProtocolError),

    /// The dispatcher rejected a step.
    #[error("step {step} rejected: {source}")]
    Dispatch {
        /// 1-based step number.
        step: usize,
        /// Underlying error.
        source: SyncError,
    },

    /// A clock step left the representable time range.
    #[error("step {step}: advancing the clock by {ms} ms is out of range")]
    ClockRange {
        /// 1-based step number.
        step: usize,
        /// Requested offset.
        ms: i64,
    },

    /// Unsupported output format.
    #[error("unknown format {0:?}, expected text or json")]
    Format(String),
}

/// A replay script.
#[derive(Debug, Deserialize)]
pub struct Script {
    /// Initial clock time, defaults to now.
    #[serde(default)]
    pub start: Option<String>,
    /// Echo window override in milliseconds.
    #[serde(default)]
    pub echo_threshold_ms: Option<u64>,
    /// Attempts per store call, defaults to 1.
    #[serde(default)]
    pub retry_attempts: Option<u32>,
    /// Steps, in order.
    pub steps: Vec<Step>,
}

/// One scripted step.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// The host creates a record.
    Create {
        /// New record id.
        id: RecordId,
        /// Field values.
        #[serde(default)]
        record: RecordPatch,
    },
    /// The host updates records.
    Update {
        /// Affected ids.
        ids: Vec<RecordId>,
        /// Field changes.
        #[serde(default)]
        patch: RecordPatch,
    },
    /// The host deletes records.
    Delete {
        /// Affected ids.
        ids: Vec<RecordId>,
    },
    /// The Target writes into the Source, stamping it.
    TargetPush {
        /// Affected id.
        id: RecordId,
        /// Field changes.
        #[serde(default)]
        patch: RecordPatch,
    },
    /// The clock moves.
    Advance {
        /// Milliseconds, may be negative.
        ms: i64,
    },
    /// The next Target call fails.
    FailNext {
        /// Operation named in the error, defaults to create.
        #[serde(default)]
        operation: Option<Operation>,
        /// Whether the failure is retryable.
        #[serde(default)]
        retryable: bool,
        /// Error message.
        #[serde(default = "default_failure")]
        message: String,
    },
}

fn default_failure() -> String {
    "scripted failure".to_string()
}

impl Step {
    fn label(&self) -> &'static str {
        match self {
            Step::Create { .. } => "create",
            Step::Update { .. } => "update",
            Step::Delete { .. } => "delete",
            Step::TargetPush { .. } => "target_push",
            Step::Advance { .. } => "advance",
            Step::FailNext { .. } => "fail_next",
        }
    }
}

/// What happened at one step.
#[derive(Debug, Serialize)]
pub struct StepReport {
    /// 1-based step number.
    pub step: usize,
    /// Step kind.
    pub op: &'static str,
    /// Clock time when the step ran.
    #[serde(with = "wire::timestamp")]
    pub at: DateTime<Utc>,
    /// One line per reconciliation outcome, or a note for non-event steps.
    pub results: Vec<String>,
}

/// Final counters.
#[derive(Debug, Serialize)]
pub struct StatsReport {
    /// Reconciliations that completed.
    pub reconciled: u64,
    /// Events suppressed as echoes.
    pub skipped: u64,
    /// Reconciliations that gave up.
    pub failed: u64,
    /// Retried store calls.
    pub retries: u64,
    /// Products left in the Target.
    pub target_products: usize,
}

impl StatsReport {
    fn new(stats: &ReconcilerStats, target_products: usize) -> Self {
        Self {
            reconciled: stats.reconciled,
            skipped: stats.skipped,
            failed: stats.failed,
            retries: stats.retries,
            target_products,
        }
    }
}

/// Full replay result.
#[derive(Debug, Serialize)]
pub struct ReplayReport {
    /// Per-step reports.
    pub steps: Vec<StepReport>,
    /// Final counters.
    pub stats: StatsReport,
}

const RESOURCE: &str = "products";

struct Host {
    source: Arc<MemorySourceStore>,
    remote: Arc<MemoryRemoteStore>,
    clock: Arc<ManualClock>,
    reconciler: Arc<Reconciler>,
    dispatcher: EventDispatcher,
}

impl Host {
    fn new(script: &Script, start: DateTime<Utc>) -> Result<Self, SyncError> {
        let mut config = MirrorConfig::default()
            .with_retry(
                RetryConfig::new(script.retry_attempts.unwrap_or(1).max(1))
                    .with_initial_delay(Duration::ZERO)
                    .without_jitter(),
            );
        if let Some(ms) = script.echo_threshold_ms {
            config = config.with_echo_threshold(Duration::from_millis(ms));
        }

        let source = Arc::new(MemorySourceStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let clock = Arc::new(ManualClock::new(start));
        let reconciler = Arc::new(Reconciler::new(
            &config,
            source.clone(),
            remote.clone(),
            clock.clone(),
        ));
        let dispatcher = EventDispatcher::new();
        reconciler.register(&dispatcher, RESOURCE)?;

        Ok(Self {
            source,
            remote,
            clock,
            reconciler,
            dispatcher,
        })
    }

    async fn dispatch(
        &self,
        operation: Operation,
        payload: FilterPayload,
        commit: impl FnOnce(FilterPayload) -> Committed,
    ) -> Result<Vec<Outcome>, SyncError> {
        let cid = CorrelationId::new();
        let event = EventName::new(RESOURCE, operation).to_string();
        let filtered = self.dispatcher.filter(cid, &event, payload).await?;
        let committed = commit(filtered);
        Ok(self.dispatcher.action(cid, &event, committed)?.wait().await)
    }

    async fn step(&self, number: usize, step: Step) -> Result<Vec<String>, ReplayError> {
        let rejected = |source| ReplayError::Dispatch {
            step: number,
            source,
        };
        let outcomes = match step {
            Step::Create { id, record } => {
                self.dispatch(Operation::Create, FilterPayload::Create(record), |filtered| {
                    let patch = match filtered {
                        FilterPayload::Create(patch) => patch,
                        _ => RecordPatch::default(),
                    };
                    let record = patch.into_record(id);
                    self.source.insert(record.clone());
                    Committed::Created(record)
                })
                .await
                .map_err(rejected)?
            }
            Step::Update { ids, patch } => {
                let payload = FilterPayload::Update {
                    keys: ids.clone(),
                    patch,
                };
                self.dispatch(Operation::Update, payload, |filtered| {
                    if let FilterPayload::Update { keys, patch } = &filtered {
                        for key in keys {
                            self.source.apply(key, patch);
                        }
                    }
                    Committed::Updated { keys: ids }
                })
                .await
                .map_err(rejected)?
            }
            Step::Delete { ids } => {
                let payload = FilterPayload::Delete { keys: ids.clone() };
                self.dispatch(Operation::Delete, payload, |_| {
                    for key in &ids {
                        self.source.remove(key);
                    }
                    Committed::Deleted { keys: ids }
                })
                .await
                .map_err(rejected)?
            }
            Step::TargetPush { id, patch } => {
                let stamp = SyncMetadata::new(self.clock.now(), SyncSource::Target, SyncId::generate());
                let found = self.source.apply(&id, &patch) && self.source.set_metadata(&id, Some(stamp));
                let note = if found {
                    format!("{id}: stamped by target")
                } else {
                    format!("{id}: no such record")
                };
                return Ok(vec![note]);
            }
            Step::Advance { ms } => {
                let moved = TimeDelta::try_milliseconds(ms)
                    .is_some_and(|delta| self.clock.advance(delta));
                if !moved {
                    return Err(ReplayError::ClockRange { step: number, ms });
                }
                return Ok(vec![format!("clock at {}", wire::format_timestamp(&self.clock.now()))]);
            }
            Step::FailNext {
                operation,
                retryable,
                message,
            } => {
                let operation = operation.unwrap_or(Operation::Create);
                let error = if retryable {
                    SyncError::remote_retryable(operation, message)
                } else {
                    SyncError::remote_fatal(operation, message)
                };
                self.remote.fail_next(error);
                return Ok(vec!["next target call will fail".to_string()]);
            }
        };
        Ok(outcomes.iter().map(ToString::to_string).collect())
    }
}

/// Replays `script` and returns the report.
pub async fn replay(script: Script) -> Result<ReplayReport, ReplayError> {
    let start = match &script.start {
        Some(text) => wire::parse_timestamp(text)?,
        None => Utc::now(),
    };
    let host = Host::new(&script, start).map_err(|source| ReplayError::Dispatch { step: 0, source })?;

    let mut steps = Vec::with_capacity(script.steps.len());
    for (index, step) in script.steps.into_iter().enumerate() {
        let number = index + 1;
        let op = step.label();
        let at = host.clock.now();
        let results = host.step(number, step).await?;
        info!(step = number, op, results = results.len(), "replayed step");
        for line in &results {
            debug!(step = number, "{line}");
        }
        steps.push(StepReport {
            step: number,
            op,
            at,
            results,
        });
    }

    let stats = StatsReport::new(&host.reconciler.stats(), host.remote.len());
    Ok(ReplayReport { steps, stats })
}

/// Runs the replay command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if format != "text" && format != "json" {
        return Err(ReplayError::Format(format.to_string()).into());
    }
    let bytes = std::fs::read(path).map_err(|source| ReplayError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let script: Script = wire::from_json(&bytes).map_err(ReplayError::from)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(replay(script))?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_text(&report);
    }
    Ok(())
}

fn print_text(report: &ReplayReport) {
    for step in &report.steps {
        println!(
            "[{:>3}] {} {}",
            step.step,
            wire::format_timestamp(&step.at),
            step.op
        );
        for line in &step.results {
            println!("      {line}");
        }
    }
    println!();
    println!("Reconciled: {}", report.stats.reconciled);
    println!("Skipped:    {}", report.stats.skipped);
    println!("Failed:     {}", report.stats.failed);
    println!("Retries:    {}", report.stats.retries);
    println!("Target:     {} product(s)", report.stats.target_products);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn script(json: serde_json::Value) -> Script {
        serde_json::from_value(json).unwrap()
    }

    #[tokio::test]
    async fn echo_is_skipped_in_replay() {
        let report = replay(script(serde_json::json!({
            "start": "2024-05-01T10:00:00.000Z",
            "steps": [
                { "op": "create", "id": "1", "record": { "name": "T-Shirt", "slug": "t-shirt" } },
                { "op": "advance", "ms": 60000 },
                { "op": "target_push", "id": "1", "patch": { "name": "T-Shirt v2" } },
                { "op": "advance", "ms": 2000 },
                { "op": "update", "ids": ["1"] },
                { "op": "advance", "ms": 20000 },
                { "op": "update", "ids": ["1"], "patch": { "name": "T-Shirt v3" } },
                { "op": "delete", "ids": ["1"] }
            ]
        })))
        .await
        .unwrap();

        assert_eq!(report.steps.len(), 8);
        assert!(report.steps[0].results[0].contains("reconciled as tgt-1"));
        assert!(report.steps[4].results[0].contains("skipped"));
        assert!(report.steps[6].results[0].contains("reconciled"));
        assert_eq!(report.stats.reconciled, 3);
        assert_eq!(report.stats.skipped, 1);
        assert_eq!(report.stats.target_products, 0);
    }

    #[tokio::test]
    async fn scripted_failures_and_retries() {
        let report = replay(script(serde_json::json!({
            "start": "2024-05-01T10:00:00.000Z",
            "retry_attempts": 2,
            "steps": [
                { "op": "fail_next", "retryable": true },
                { "op": "create", "id": "1", "record": { "name": "Mug" } },
                { "op": "fail_next" },
                { "op": "create", "id": "2", "record": { "name": "Cup" } }
            ]
        })))
        .await
        .unwrap();

        assert_eq!(report.stats.reconciled, 1);
        assert_eq!(report.stats.failed, 1);
        assert_eq!(report.stats.retries, 1);
        assert!(report.steps[3].results[0].contains("failed"));
    }

    #[tokio::test]
    async fn scripted_failure_names_its_operation() {
        let report = replay(script(serde_json::json!({
            "start": "2024-05-01T10:00:00.000Z",
            "steps": [
                { "op": "create", "id": "1", "record": { "name": "Mug" } },
                { "op": "fail_next", "operation": "delete", "message": "gone" },
                { "op": "delete", "ids": ["1"] }
            ]
        })))
        .await
        .unwrap();

        let line = &report.steps[2].results[0];
        assert!(line.contains("remote delete failed: gone"), "{line}");
        assert!(!line.contains("create"), "{line}");
    }

    #[tokio::test]
    async fn out_of_range_advance_is_an_error() {
        let err = replay(script(serde_json::json!({
            "start": "2024-05-01T10:00:00.000Z",
            "steps": [
                { "op": "advance", "ms": 1000 },
                { "op": "advance", "ms": 9_000_000_000_000_000_i64 }
            ]
        })))
        .await
        .unwrap_err();
        assert!(matches!(err, ReplayError::ClockRange { step: 2, .. }), "{err}");

        let err = replay(script(serde_json::json!({
            "steps": [{ "op": "advance", "ms": i64::MIN }]
        })))
        .await
        .unwrap_err();
        assert!(matches!(err, ReplayError::ClockRange { step: 1, .. }), "{err}");
    }

    #[tokio::test]
    async fn invalid_start_is_rejected() {
        let err = replay(script(serde_json::json!({ "start": "soon", "steps": [] })))
            .await
            .unwrap_err();
        assert!(matches!(err, ReplayError::Script(_)));
    }

    #[test]
    fn run_reads_script_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"steps":[{{"op":"create","id":"1","record":{{"name":"Mug"}}}}]}}"#
        )
        .unwrap();

        run(file.path(), "json").unwrap();
        assert!(run(file.path(), "yaml").is_err());
    }

    #[test]
    fn run_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(&dir.path().join("absent.json"), "text").unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }
}
