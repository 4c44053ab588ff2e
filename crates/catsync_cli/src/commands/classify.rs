//! Classify command implementation.

use catsync_engine::{EchoGuard, EchoVerdict, MirrorConfig};
use catsync_protocol::{wire, SyncMetadata};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Classifies `metadata` as of `now` (RFC 3339, default: current time).
pub fn classify(
    metadata: &str,
    now: Option<&str>,
    threshold: Duration,
) -> Result<EchoVerdict, Box<dyn std::error::Error>> {
    let value: serde_json::Value = serde_json::from_str(metadata)?;
    let stamp = SyncMetadata::from_stored(&value);
    let now: DateTime<Utc> = match now {
        Some(text) => wire::parse_timestamp(text)?,
        None => Utc::now(),
    };
    Ok(EchoGuard::judge(stamp.as_ref(), now, threshold))
}

/// Runs the classify command.
pub fn run(
    metadata: &str,
    now: Option<&str>,
    threshold_ms: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let threshold = match threshold_ms {
        Some(ms) => Duration::from_millis(ms),
        None => MirrorConfig::from_env()?.echo_threshold,
    };
    let verdict = classify(metadata, now, threshold)?;
    println!("{verdict}");
    Ok(())
}
