//! Collection persistence
//!
//! Everything the relay records lives in named collections, each an ordered
//! list of JSON records. The [`CollectionStore`] trait is the only storage
//! seam; [`Collection`] layers typed access and per-collection write
//! serialization on top of it.

pub mod json_file;
pub mod memory;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use relay_common::{
    CaptureRule, CapturedRequest, CapturedResponse, InterceptRule, InterceptedRequest,
    ModifiedResponse, ResponseRule,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::StoreError;

pub const REQUESTS: &str = "requests";
pub const RESPONSES: &str = "responses";
pub const MODIFIED_RESPONSES: &str = "modified_responses";
pub const CAPTURE_RULES: &str = "capture_rules";
pub const RESPONSE_RULES: &str = "response_rules";
pub const INTERCEPT_RULES: &str = "intercept_rules";
pub const INTERCEPTED_REQUESTS: &str = "intercepted_requests";

pub const ALL_COLLECTIONS: [&str; 7] = [
    REQUESTS,
    RESPONSES,
    MODIFIED_RESPONSES,
    CAPTURE_RULES,
    RESPONSE_RULES,
    INTERCEPT_RULES,
    INTERCEPTED_REQUESTS,
];

/// Where a collection lives and how large it is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStatus {
    pub collection: String,
    pub location: Option<String>,
    pub exists: bool,
    pub size_bytes: u64,
}

/// Storage backend for named JSON collections.
///
/// Implementations are not expected to serialize concurrent writers; the
/// [`Collection`] wrapper does that.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// All records of a collection. A collection that was never written is empty.
    async fn read_all(&self, collection: &str) -> Result<Vec<Value>, StoreError>;

    async fn append(&self, collection: &str, record: Value) -> Result<(), StoreError>;

    /// Replace the whole content of a collection.
    async fn replace_all(&self, collection: &str, records: Vec<Value>) -> Result<(), StoreError>;

    async fn status(&self, collection: &str) -> CollectionStatus;
}

/// Typed handle on one collection.
///
/// Clones share the same write lock, so every read-modify-write on a
/// collection is serialized no matter which component issues it.
pub struct Collection<T> {
    name: &'static str,
    store: Arc<dyn CollectionStore>,
    lock: Arc<Mutex<()>>,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            store: Arc::clone(&self.store),
            lock: Arc::clone(&self.lock),
            _record: PhantomData,
        }
    }
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(name: &'static str, store: Arc<dyn CollectionStore>) -> Self {
        Self {
            name,
            store,
            lock: Arc::new(Mutex::new(())),
            _record: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Decoded records in insertion order. Undecodable records are skipped.
    pub async fn read_all(&self) -> Result<Vec<T>, StoreError> {
        let raw = self.store.read_all(self.name).await?;
        Ok(decode_records::<T>(self.name, raw).0)
    }

    pub async fn find<P>(&self, predicate: P) -> Result<Option<T>, StoreError>
    where
        P: Fn(&T) -> bool,
    {
        Ok(self.read_all().await?.into_iter().find(|record| predicate(record)))
    }

    pub async fn append(&self, record: &T) -> Result<(), StoreError> {
        let value =
            serde_json::to_value(record).map_err(|e| StoreError::serialization(self.name, e))?;
        let _guard = self.lock.lock().await;
        self.store.append(self.name, value).await
    }

    /// Read-modify-write under the collection lock.
    ///
    /// Records that fail to decode are written back untouched after the
    /// mutated ones.
    pub async fn update<F, R>(&self, mutate: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Vec<T>) -> R + Send,
        R: Send,
    {
        let _guard = self.lock.lock().await;
        let raw = self.store.read_all(self.name).await?;
        let (mut records, undecodable) = decode_records::<T>(self.name, raw);

        let result = mutate(&mut records);

        let mut values = records
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::serialization(self.name, e))?;
        values.extend(undecodable);

        self.store.replace_all(self.name, values).await?;
        Ok(result)
    }

    /// Drop every record. Returns how many records were removed.
    pub async fn clear(&self) -> Result<usize, StoreError> {
        let _guard = self.lock.lock().await;
        let removed = self.store.read_all(self.name).await?.len();
        self.store.replace_all(self.name, Vec::new()).await?;
        Ok(removed)
    }

    pub async fn status(&self) -> CollectionStatus {
        self.store.status(self.name).await
    }
}

fn decode_records<T: DeserializeOwned>(collection: &str, raw: Vec<Value>) -> (Vec<T>, Vec<Value>) {
    let mut decoded = Vec::with_capacity(raw.len());
    let mut undecodable = Vec::new();
    for value in raw {
        match serde_json::from_value::<T>(value.clone()) {
            Ok(record) => decoded.push(record),
            Err(e) => {
                warn!(collection, error = %e, "Skipping undecodable record");
                undecodable.push(value);
            }
        }
    }
    (decoded, undecodable)
}

/// Typed handles on every collection the relay uses, sharing one backend.
#[derive(Clone)]
pub struct Collections {
    pub requests: Collection<CapturedRequest>,
    pub responses: Collection<CapturedResponse>,
    pub modified_responses: Collection<ModifiedResponse>,
    pub capture_rules: Collection<CaptureRule>,
    pub response_rules: Collection<ResponseRule>,
    pub intercept_rules: Collection<InterceptRule>,
    pub intercepted: Collection<InterceptedRequest>,
    store: Arc<dyn CollectionStore>,
}

impl Collections {
    pub fn new(store: Arc<dyn CollectionStore>) -> Self {
        Self {
            requests: Collection::new(REQUESTS, Arc::clone(&store)),
            responses: Collection::new(RESPONSES, Arc::clone(&store)),
            modified_responses: Collection::new(MODIFIED_RESPONSES, Arc::clone(&store)),
            capture_rules: Collection::new(CAPTURE_RULES, Arc::clone(&store)),
            response_rules: Collection::new(RESPONSE_RULES, Arc::clone(&store)),
            intercept_rules: Collection::new(INTERCEPT_RULES, Arc::clone(&store)),
            intercepted: Collection::new(INTERCEPTED_REQUESTS, Arc::clone(&store)),
            store,
        }
    }

    pub async fn status(&self) -> Vec<CollectionStatus> {
        let mut statuses = Vec::with_capacity(ALL_COLLECTIONS.len());
        for name in ALL_COLLECTIONS {
            statuses.push(self.store.status(name).await);
        }
        statuses
    }
}
