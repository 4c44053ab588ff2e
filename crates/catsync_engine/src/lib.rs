//! # catsync engine
//!
//! Echo-suppressing mirror of catalog records from a Source system into a
//! Target system.
//!
//! This crate provides:
//! - Two-phase event dispatch (filter before commit, action after commit)
//! - Echo detection based on provenance stamps
//! - Reconciliation of create/update/delete into the Target
//! - Retry with exponential backoff
//! - Store traits with in-memory and HTTP implementations
//!
//! ## Architecture
//!
//! The host reports every lifecycle event twice. The filter phase runs
//! before the mutation commits and is where the reconciler captures what
//! will be gone afterwards (the Target id of a record about to be
//! deleted). The action phase runs after commit and spawns one
//! reconciliation per affected record; the host never waits for it.
//!
//! Every mirrored write carries a [`SyncMetadata`](catsync_protocol::SyncMetadata)
//! stamp naming the side that produced it. A Source event whose record
//! carries a fresh Target stamp is an echo of the Target's own push and
//! is skipped.
//!
//! ## Key Invariants
//!
//! - An echo is never mirrored back
//! - Every mirrored write stamps both sides with the same `syncId`
//! - Per-operation context never leaks between correlation ids
//! - Reconciliation errors are logged, never surfaced to the editor

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod dispatcher;
mod echo;
mod error;
mod http;
mod reconciler;
mod state;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{env, MirrorConfig, RetryConfig, DEFAULT_ECHO_THRESHOLD};
pub use dispatcher::{
    ActionEvent, ActionHandler, ActionTicket, Committed, EventDispatcher, FilterHandler,
    FilterPayload, OperationContext,
};
pub use echo::{EchoGuard, EchoVerdict};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpRemoteStore, HttpRequest, HttpResponse, HttpSourceStore, Method};
pub use reconciler::Reconciler;
pub use state::{OperationState, Outcome, ReconcilerStats};
pub use store::{
    MemoryRemoteStore, MemorySourceStore, RemoteCall, RemoteStore, SourceStore, StoredProduct,
    WriteBack,
};
