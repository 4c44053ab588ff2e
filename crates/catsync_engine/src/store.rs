//! Store abstractions for both ends of the mirror.
//!
//! [`SourceStore`] reads records and receives provenance write-backs;
//! [`RemoteStore`] is the Target's create/update/delete surface. Both are
//! async and object-safe so the engine can hold them as `Arc<dyn _>`.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use catsync_protocol::{
    CreateProduct, CreatedProduct, Operation, Record, RecordId, RecordPatch, ReferenceId,
    SyncMetadata, UpdateProduct,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Fields written back onto a Source record after a mirrored write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteBack {
    /// Target id, only set after a create.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<ReferenceId>,
    /// The stamp describing the mirrored write.
    pub metadata: SyncMetadata,
}

/// Read/write access to the Source system.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Fetches a record, `None` if it does not exist.
    async fn fetch(&self, id: &RecordId) -> SyncResult<Option<Record>>;

    /// Writes provenance (and optionally the reference id) onto a record.
    async fn write_back(&self, id: &RecordId, write: &WriteBack) -> SyncResult<()>;
}

/// The Target system's product API.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Creates a product and returns its id.
    async fn create(&self, payload: &CreateProduct) -> SyncResult<CreatedProduct>;

    /// Updates a product. Fails if the id is unknown.
    async fn update(&self, id: &ReferenceId, payload: &UpdateProduct) -> SyncResult<()>;

    /// Deletes a product. Fails if the id is unknown.
    async fn delete(&self, id: &ReferenceId) -> SyncResult<()>;
}

/// An in-memory Source store.
///
/// Also plays the host's part in tests and replays: records can be
/// inserted, patched and removed directly.
#[derive(Debug, Default)]
pub struct MemorySourceStore {
    records: RwLock<BTreeMap<RecordId, Record>>,
    fetch_failures: Mutex<VecDeque<SyncError>>,
    write_failures: Mutex<VecDeque<SyncError>>,
    fetches: AtomicU64,
    write_backs: AtomicU64,
}

impl MemorySourceStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a record.
    pub fn insert(&self, record: Record) {
        self.records.write().insert(record.id.clone(), record);
    }

    /// Returns a copy of a record.
    pub fn get(&self, id: &RecordId) -> Option<Record> {
        self.records.read().get(id).cloned()
    }

    /// Applies a patch to a stored record. Returns false if it does not exist.
    pub fn apply(&self, id: &RecordId, patch: &RecordPatch) -> bool {
        match self.records.write().get_mut(id) {
            Some(record) => {
                patch.apply_to(record);
                true
            }
            None => false,
        }
    }

    /// Removes a record.
    pub fn remove(&self, id: &RecordId) -> Option<Record> {
        self.records.write().remove(id)
    }

    /// Overwrites a record's provenance, as a write from another channel would.
    pub fn set_metadata(&self, id: &RecordId, metadata: Option<SyncMetadata>) -> bool {
        match self.records.write().get_mut(id) {
            Some(record) => {
                record.metadata = metadata;
                true
            }
            None => false,
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Makes the next fetch fail with `error`.
    pub fn fail_next_fetch(&self, error: SyncError) {
        self.fetch_failures.lock().push_back(error);
    }

    /// Makes the next write-back fail with `error`.
    pub fn fail_next_write_back(&self, error: SyncError) {
        self.write_failures.lock().push_back(error);
    }

    /// Number of fetch calls served.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of write-back calls served.
    pub fn write_back_count(&self) -> u64 {
        self.write_backs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceStore for MemorySourceStore {
    async fn fetch(&self, id: &RecordId) -> SyncResult<Option<Record>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fetch_failures.lock().pop_front() {
            return Err(err);
        }
        Ok(self.get(id))
    }

    async fn write_back(&self, id: &RecordId, write: &WriteBack) -> SyncResult<()> {
        self.write_backs.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.write_failures.lock().pop_front() {
            return Err(err);
        }

        let mut records = self.records.write();
        let record = records.get_mut(id).ok_or_else(|| SyncError::WriteBack {
            record_id: id.clone(),
            message: "record no longer exists".into(),
            retryable: false,
        })?;
        if let Some(reference_id) = &write.reference_id {
            record.reference_id = Some(reference_id.clone());
        }
        record.metadata = Some(write.metadata.clone());
        Ok(())
    }
}

/// A call observed by [`MemoryRemoteStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    /// `create(payload)`.
    Create(CreateProduct),
    /// `update(id, payload)`.
    Update(ReferenceId, UpdateProduct),
    /// `delete(id)`.
    Delete(ReferenceId),
}

impl RemoteCall {
    /// The operation this call performs.
    pub fn operation(&self) -> Operation {
        match self {
            RemoteCall::Create(_) => Operation::Create,
            RemoteCall::Update(..) => Operation::Update,
            RemoteCall::Delete(_) => Operation::Delete,
        }
    }
}

/// A product held by [`MemoryRemoteStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredProduct {
    /// Title.
    pub title: String,
    /// Description.
    pub description: Option<String>,
    /// Handle.
    pub handle: String,
    /// Provenance of the last write.
    pub metadata: SyncMetadata,
}

/// An in-memory Target store that records every call.
#[derive(Debug)]
pub struct MemoryRemoteStore {
    products: RwLock<HashMap<ReferenceId, StoredProduct>>,
    calls: Mutex<Vec<RemoteCall>>,
    failures: Mutex<VecDeque<SyncError>>,
    latency: Mutex<Option<Duration>>,
    next_id: AtomicU64,
    id_prefix: String,
}

impl MemoryRemoteStore {
    /// Creates an empty store handing out ids `tgt-1`, `tgt-2`, ...
    pub fn new() -> Self {
        Self::with_id_prefix("tgt-")
    }

    /// Creates an empty store with a custom id prefix.
    pub fn with_id_prefix(prefix: impl Into<String>) -> Self {
        Self {
            products: RwLock::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            latency: Mutex::new(None),
            next_id: AtomicU64::new(1),
            id_prefix: prefix.into(),
        }
    }

    /// Seeds a product under a fixed id.
    pub fn insert(&self, id: impl Into<ReferenceId>, product: StoredProduct) {
        self.products.write().insert(id.into(), product);
    }

    /// Returns a copy of a product.
    pub fn get(&self, id: &ReferenceId) -> Option<StoredProduct> {
        self.products.read().get(id).cloned()
    }

    /// Returns true if a product exists.
    pub fn contains(&self, id: &ReferenceId) -> bool {
        self.products.read().contains_key(id)
    }

    /// Number of stored products.
    pub fn len(&self) -> usize {
        self.products.read().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.products.read().is_empty()
    }

    /// Every call made so far, in arrival order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Makes the next call fail with `error`. Queued failures are consumed in order.
    pub fn fail_next(&self, error: SyncError) {
        self.failures.lock().push_back(error);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    async fn enter(&self, call: RemoteCall) -> SyncResult<()> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.calls.lock().push(call);
        match self.failures.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn create(&self, payload: &CreateProduct) -> SyncResult<CreatedProduct> {
        self.enter(RemoteCall::Create(payload.clone())).await?;

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = ReferenceId::new(format!("{}{n}", self.id_prefix));
        self.products.write().insert(
            id.clone(),
            StoredProduct {
                title: payload.title.clone(),
                description: payload.description.clone(),
                handle: payload.handle.clone(),
                metadata: payload.metadata.clone(),
            },
        );
        Ok(CreatedProduct { id })
    }

    async fn update(&self, id: &ReferenceId, payload: &UpdateProduct) -> SyncResult<()> {
        self.enter(RemoteCall::Update(id.clone(), payload.clone()))
            .await?;

        let mut products = self.products.write();
        let product = products.get_mut(id).ok_or_else(|| {
            SyncError::remote_fatal(Operation::Update, format!("unknown product {id}"))
        })?;
        product.title = payload.title.clone();
        product.description = payload.description.clone();
        product.handle = payload.handle.clone();
        product.metadata = payload.metadata.clone();
        Ok(())
    }

    async fn delete(&self, id: &ReferenceId) -> SyncResult<()> {
        self.enter(RemoteCall::Delete(id.clone())).await?;

        self.products
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SyncError::remote_fatal(Operation::Delete, format!("unknown product {id}")))
    }
}
