//! # catsync Protocol
//!
//! Data types shared by every catsync crate.
//!
//! This crate provides:
//! - `Record`, the catalog entity owned by the Source system
//! - `SyncMetadata`, the provenance stamp used for echo detection
//! - Target payloads (`CreateProduct`, `UpdateProduct`)
//! - `EventName` / `Operation` for the host's lifecycle events
//! - JSON helpers for the wire format
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod event;
mod ids;
mod metadata;
mod product;
mod record;
pub mod wire;

pub use error::{ProtocolError, ProtocolResult};
pub use event::{EventName, Operation};
pub use ids::{CorrelationId, RecordId, ReferenceId, SyncId};
pub use metadata::{SyncMetadata, SyncSource};
pub use product::{CreateProduct, CreatedProduct, ProductOption, UpdateProduct};
pub use record::{Record, RecordPatch};
