//! Echo detection.
//!
//! A write that arrives in the Source because the Target pushed it there
//! carries a stamp with `syncSource = target`. If such a write shows up as
//! a fresh lifecycle event within the threshold, mirroring it back would
//! start a loop, so the guard reports it as an echo.
//!
//! The check is a wall-clock heuristic: a genuine edit made inside the
//! window right after a Target-originated stamp is suppressed as well.

use crate::clock::Clock;
use crate::error::SyncError;
use crate::store::SourceStore;
use catsync_protocol::{RecordId, SyncMetadata, SyncSource};
use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Why the guard reached its decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EchoVerdict {
    /// The record carries no stamp.
    NeverSynced,
    /// The record does not exist in the Source.
    Missing,
    /// The last stamp was produced by this side.
    LocalStamp,
    /// A Target stamp, but older than the threshold.
    Stale {
        /// Time since the stamp.
        elapsed: TimeDelta,
    },
    /// A fresh Target stamp: the event is an echo.
    Echo {
        /// Time since the stamp.
        elapsed: TimeDelta,
    },
    /// The stamp could not be read; treated as non-echo.
    FetchFailed {
        /// Error message.
        message: String,
    },
}

impl EchoVerdict {
    /// Returns true if the event must be suppressed.
    pub fn is_echo(&self) -> bool {
        matches!(self, EchoVerdict::Echo { .. })
    }
}

impl fmt::Display for EchoVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EchoVerdict::NeverSynced => f.write_str("not an echo: never synced"),
            EchoVerdict::Missing => f.write_str("not an echo: record missing"),
            EchoVerdict::LocalStamp => f.write_str("not an echo: last write was ours"),
            EchoVerdict::Stale { elapsed } => write!(
                f,
                "not an echo: target stamp is {}ms old",
                elapsed.num_milliseconds()
            ),
            EchoVerdict::Echo { elapsed } => write!(
                f,
                "echo: target stamp is {}ms old",
                elapsed.num_milliseconds()
            ),
            EchoVerdict::FetchFailed { message } => {
                write!(f, "not an echo: metadata fetch failed ({message})")
            }
        }
    }
}

/// Decides whether a record's latest write came from the mirror.
pub struct EchoGuard {
    source: Arc<dyn SourceStore>,
    clock: Arc<dyn Clock>,
    threshold: Duration,
}

impl EchoGuard {
    /// Creates a guard reading stamps from `source`.
    pub fn new(source: Arc<dyn SourceStore>, clock: Arc<dyn Clock>, threshold: Duration) -> Self {
        Self {
            source,
            clock,
            threshold,
        }
    }

    /// The echo window.
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Returns true if the latest write to `id` is an echo of a mirrored write.
    pub async fn is_echo(&self, id: &RecordId) -> bool {
        self.classify(id).await.is_echo()
    }

    /// Fetches the record's stamp and classifies it.
    ///
    /// Fails open: if the stamp cannot be read the event is treated as a
    /// genuine edit.
    pub async fn classify(&self, id: &RecordId) -> EchoVerdict {
        let verdict = match self.source.fetch(id).await {
            Ok(Some(record)) => {
                Self::judge(record.metadata.as_ref(), self.clock.now(), self.threshold)
            }
            Ok(None) => EchoVerdict::Missing,
            Err(err) => {
                let err = SyncError::MetadataFetch {
                    record_id: id.clone(),
                    message: err.to_string(),
                };
                error!(record_id = %id, error = %err, "treating as non-echo");
                EchoVerdict::FetchFailed {
                    message: err.to_string(),
                }
            }
        };
        debug!(record_id = %id, %verdict, "echo check");
        verdict
    }

    /// Classifies a stamp without touching any store.
    ///
    /// The window is half-open: a stamp exactly `threshold` old is no
    /// longer an echo.
    pub fn judge(
        metadata: Option<&SyncMetadata>,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> EchoVerdict {
        let Some(metadata) = metadata else {
            return EchoVerdict::NeverSynced;
        };
        if metadata.sync_source != SyncSource::Target {
            return EchoVerdict::LocalStamp;
        }

        let elapsed = metadata.elapsed(now);
        // negative elapsed (stamp ahead of our clock) does not convert
        let inside = elapsed.to_std().map_or(true, |e| e < threshold);
        if inside {
            EchoVerdict::Echo { elapsed }
        } else {
            EchoVerdict::Stale { elapsed }
        }
    }
}
