//! HTTP-backed store adapters.
//!
//! The actual HTTP client is abstracted via [`HttpClient`] so any library
//! (reqwest, hyper, ...) or an in-process fake can carry the requests.
//! Bodies are JSON.

use crate::config::MirrorConfig;
use crate::error::{SyncError, SyncResult};
use crate::store::{RemoteStore, SourceStore, WriteBack};
use async_trait::async_trait;
use catsync_protocol::{
    CreateProduct, CreatedProduct, Operation, Record, RecordId, ReferenceId, UpdateProduct,
};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl Method {
    /// Upper-case method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// JSON body.
    pub body: Option<Vec<u8>>,
    /// Bearer token for the `Authorization` header.
    pub bearer: Option<String>,
}

impl HttpRequest {
    /// Creates a request without body or credentials.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            bearer: None,
        }
    }

    /// Attaches a JSON body.
    pub fn with_json<T: Serialize>(mut self, body: &T) -> SyncResult<Self> {
        let bytes = serde_json::to_vec(body).map_err(|e| SyncError::Codec(e.to_string()))?;
        self.body = Some(bytes);
        Ok(self)
    }

    /// Sets the bearer token, if any.
    pub fn with_bearer(mut self, token: Option<&str>) -> Self {
        self.bearer = token.map(str::to_owned);
        self
    }
}

/// A received response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Raw body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns true for 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> SyncResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| SyncError::Codec(e.to_string()))
    }

    fn snippet(&self) -> String {
        let text = String::from_utf8_lossy(&self.body);
        text.chars().take(200).collect()
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. An `Err`
/// means no response was received at all.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request and returns the response.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String>;
}

#[async_trait]
impl<C: HttpClient + ?Sized> HttpClient for Arc<C> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        (**self).send(request).await
    }
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: Option<T>,
}

#[derive(Deserialize)]
struct ProductEnvelope {
    product: CreatedProduct,
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

/// Source store speaking the Source's REST items API.
///
/// `GET`/`PATCH {base}/items/{collection}/{id}`, responses wrapped in `{data}`.
pub struct HttpSourceStore<C: HttpClient> {
    base_url: String,
    collection: String,
    token: Option<String>,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpSourceStore<C> {
    /// Creates a store for `collection` under `base_url`.
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>, client: C) -> Self {
        Self {
            base_url: trim_base(base_url.into()),
            collection: collection.into(),
            token: None,
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Creates a store from the Source half of `config`.
    pub fn from_config(config: &MirrorConfig, client: C) -> Self {
        let store = Self::new(&*config.source_url, &*config.source_collection, client);
        match &config.source_token {
            Some(token) => store.with_token(token),
            None => store,
        }
    }

    /// Sets the bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last transport error.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn item_url(&self, id: &RecordId) -> String {
        format!(
            "{}/items/{}/{}",
            self.base_url,
            urlencoding::encode(&self.collection),
            urlencoding::encode(id.as_str())
        )
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        let result = self.client.send(request).await;
        match &result {
            Ok(_) => *self.last_error.write() = None,
            Err(e) => *self.last_error.write() = Some(e.clone()),
        }
        result
    }
}

#[async_trait]
impl<C: HttpClient> SourceStore for HttpSourceStore<C> {
    async fn fetch(&self, id: &RecordId) -> SyncResult<Option<Record>> {
        let url = self.item_url(id);
        let request = HttpRequest::new(Method::Get, &*url).with_bearer(self.token.as_deref());
        let response = self.send(request).await.map_err(|e| SyncError::Source {
            message: format!("GET {url}: {e}"),
            retryable: true,
        })?;

        match response.status {
            // the Source answers 403 for items the token may not see, including missing ones
            404 | 403 => {
                debug!(record_id = %id, status = response.status, "source record not visible");
                Ok(None)
            }
            _ if response.is_success() => {
                let envelope: DataEnvelope<Record> = response.json()?;
                Ok(envelope.data)
            }
            status => Err(SyncError::Source {
                message: format!("GET {url} returned {status}: {}", response.snippet()),
                retryable: status >= 500,
            }),
        }
    }

    async fn write_back(&self, id: &RecordId, write: &WriteBack) -> SyncResult<()> {
        let url = self.item_url(id);
        let request = HttpRequest::new(Method::Patch, &*url)
            .with_bearer(self.token.as_deref())
            .with_json(write)?;
        let response = self.send(request).await.map_err(|e| SyncError::WriteBack {
            record_id: id.clone(),
            message: format!("PATCH {url}: {e}"),
            retryable: true,
        })?;

        if response.is_success() {
            return Ok(());
        }
        Err(SyncError::WriteBack {
            record_id: id.clone(),
            message: format!("PATCH {url} returned {}: {}", response.status, response.snippet()),
            retryable: response.status >= 500,
        })
    }
}

/// Remote store speaking the Target's admin products API.
pub struct HttpRemoteStore<C: HttpClient> {
    base_url: String,
    api_key: Option<String>,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpRemoteStore<C> {
    /// Creates a store under `base_url`.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: trim_base(base_url.into()),
            api_key: None,
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Creates a store from the Target half of `config`.
    pub fn from_config(config: &MirrorConfig, client: C) -> Self {
        let store = Self::new(&*config.target_url, client);
        match &config.target_api_key {
            Some(key) => store.with_api_key(key),
            None => store,
        }
    }

    /// Sets the API key sent as bearer token.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last transport error.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    async fn call(&self, operation: Operation, request: HttpRequest) -> SyncResult<HttpResponse> {
        let label = format!("{} {}", request.method, request.url);
        let response = match self.client.send(request).await {
            Ok(response) => {
                *self.last_error.write() = None;
                response
            }
            Err(e) => {
                *self.last_error.write() = Some(e.clone());
                return Err(SyncError::remote_retryable(operation, format!("{label}: {e}")));
            }
        };

        if response.is_success() {
            return Ok(response);
        }
        let message = format!("{label} returned {}: {}", response.status, response.snippet());
        if response.status >= 500 {
            Err(SyncError::remote_retryable(operation, message))
        } else {
            Err(SyncError::remote_fatal(operation, message))
        }
    }

    fn product_url(&self, id: &ReferenceId) -> String {
        format!(
            "{}/admin/products/{}",
            self.base_url,
            urlencoding::encode(id.as_str())
        )
    }

    fn request(&self, method: Method, url: String) -> HttpRequest {
        HttpRequest::new(method, url).with_bearer(self.api_key.as_deref())
    }
}

#[async_trait]
impl<C: HttpClient> RemoteStore for HttpRemoteStore<C> {
    async fn create(&self, payload: &CreateProduct) -> SyncResult<CreatedProduct> {
        let request = self
            .request(Method::Post, format!("{}/admin/products", self.base_url))
            .with_json(payload)?;
        let response = self.call(Operation::Create, request).await?;
        let envelope: ProductEnvelope = response.json()?;
        Ok(envelope.product)
    }

    async fn update(&self, id: &ReferenceId, payload: &UpdateProduct) -> SyncResult<()> {
        let request = self
            .request(Method::Post, self.product_url(id))
            .with_json(payload)?;
        self.call(Operation::Update, request).await.map(|_| ())
    }

    async fn delete(&self, id: &ReferenceId) -> SyncResult<()> {
        let request = self.request(Method::Delete, self.product_url(id));
        self.call(Operation::Delete, request).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catsync_protocol::{ProductOption, SyncId, SyncMetadata, SyncSource};
    use chrono::DateTime;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct ScriptedClient {
        responses: Mutex<VecDeque<Result<HttpResponse, String>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedClient {
        fn reply(&self, status: u16, body: &str) {
            self.responses
                .lock()
                .push_back(Ok(HttpResponse::new(status, body.as_bytes().to_vec())));
        }

        fn drop_connection(&self) {
            self.responses
                .lock()
                .push_back(Err("connection reset".to_string()));
        }

        fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedClient {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
            self.requests.lock().push(request);
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err("no response scripted".into()))
        }
    }

    fn stamp() -> SyncMetadata {
        SyncMetadata::new(
            DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
            SyncSource::Source,
            SyncId::new("abc1234"),
        )
    }

    fn source() -> (Arc<ScriptedClient>, HttpSourceStore<Arc<ScriptedClient>>) {
        let client = Arc::new(ScriptedClient::default());
        let store = HttpSourceStore::new("http://source.test/", "products", client.clone())
            .with_token("secret");
        (client, store)
    }

    fn remote() -> (Arc<ScriptedClient>, HttpRemoteStore<Arc<ScriptedClient>>) {
        let client = Arc::new(ScriptedClient::default());
        let store = HttpRemoteStore::new("http://target.test", client.clone());
        (client, store)
    }

    #[tokio::test]
    async fn source_fetch_unwraps_data() {
        let (client, store) = source();
        client.reply(
            200,
            r#"{"data":{"id":7,"name":"Mug","slug":"mug","reference_id":"tgt-1",
                "metadata":{"lastSyncedAt":"2023-11-14T22:13:20.000Z","syncSource":"medusa","syncId":"x"}}}"#,
        );

        let record = store.fetch(&RecordId::new("7")).await.unwrap().unwrap();
        assert_eq!(record.id.as_str(), "7");
        assert_eq!(record.reference_id, Some(ReferenceId::new("tgt-1")));
        assert_eq!(record.metadata.unwrap().sync_source, SyncSource::Target);

        let sent = &client.requests()[0];
        assert_eq!(sent.method, Method::Get);
        assert_eq!(sent.url, "http://source.test/items/products/7");
        assert_eq!(sent.bearer.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn source_fetch_hidden_is_none() {
        let (client, store) = source();
        client.reply(404, "");
        client.reply(403, r#"{"errors":[]}"#);
        assert!(store.fetch(&RecordId::new("1")).await.unwrap().is_none());
        assert!(store.fetch(&RecordId::new("1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn source_fetch_errors() {
        let (client, store) = source();
        client.reply(502, "bad gateway");
        client.reply(400, "bad request");
        client.drop_connection();

        let err = store.fetch(&RecordId::new("1")).await.unwrap_err();
        assert!(err.is_retryable());
        let err = store.fetch(&RecordId::new("1")).await.unwrap_err();
        assert!(!err.is_retryable());
        let err = store.fetch(&RecordId::new("1")).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.last_error().as_deref(), Some("connection reset"));
    }

    #[tokio::test]
    async fn source_write_back_patches() {
        let (client, store) = source();
        client.reply(200, r#"{"data":{}}"#);
        client.reply(404, "");

        let write = WriteBack {
            reference_id: Some(ReferenceId::new("tgt-9")),
            metadata: stamp(),
        };
        store.write_back(&RecordId::new("3"), &write).await.unwrap();

        let sent = &client.requests()[0];
        assert_eq!(sent.method, Method::Patch);
        let body: serde_json::Value = serde_json::from_slice(sent.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["reference_id"], "tgt-9");
        assert_eq!(body["metadata"]["syncSource"], "source");
        assert_eq!(body["metadata"]["lastSyncedAt"], "2023-11-14T22:13:20.000Z");

        let err = store.write_back(&RecordId::new("3"), &write).await.unwrap_err();
        assert!(matches!(err, SyncError::WriteBack { retryable: false, .. }));
    }

    #[tokio::test]
    async fn remote_create_returns_product_id() {
        let (client, store) = remote();
        client.reply(200, r#"{"product":{"id":"prod_01","title":"Mug"}}"#);

        let payload = CreateProduct {
            title: "Mug".into(),
            description: None,
            handle: "mug".into(),
            options: ProductOption::default_set(),
            metadata: stamp(),
        };
        let created = store.create(&payload).await.unwrap();
        assert_eq!(created.id, ReferenceId::new("prod_01"));

        let sent = &client.requests()[0];
        assert_eq!(sent.url, "http://target.test/admin/products");
        let body: serde_json::Value = serde_json::from_slice(sent.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["options"][0]["title"], "Default Option");
        assert!(body.get("description").is_none());
    }

    #[tokio::test]
    async fn remote_status_mapping() {
        let (client, store) = remote();
        client.reply(404, "not found");
        client.reply(503, "unavailable");
        client.drop_connection();

        let id = ReferenceId::new("prod_01");
        let err = store.delete(&id).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::RemoteCall { operation: Operation::Delete, retryable: false, .. }
        ));
        assert!(store.delete(&id).await.unwrap_err().is_retryable());
        assert!(store.delete(&id).await.unwrap_err().is_retryable());

        let sent = client.requests();
        assert_eq!(sent[0].method, Method::Delete);
        assert_eq!(sent[0].url, "http://target.test/admin/products/prod_01");
    }

    #[tokio::test]
    async fn remote_update_posts_to_product() {
        let (client, store) = remote();
        client.reply(200, r#"{"product":{"id":"prod_01"}}"#);
        let payload = UpdateProduct {
            title: "Mug".into(),
            description: Some("blue".into()),
            handle: "mug".into(),
            metadata: stamp(),
        };
        store
            .update(&ReferenceId::new("prod_01"), &payload)
            .await
            .unwrap();
        let sent = &client.requests()[0];
        assert_eq!(sent.method, Method::Post);
        assert_eq!(sent.url, "http://target.test/admin/products/prod_01");
    }

    #[tokio::test]
    async fn ids_are_encoded_as_one_path_segment() {
        let (client, store) = source();
        client.reply(404, "");
        assert!(store.fetch(&RecordId::new("a/b?c")).await.unwrap().is_none());
        assert_eq!(
            client.requests()[0].url,
            "http://source.test/items/products/a%2Fb%3Fc"
        );

        let (client, store) = remote();
        client.reply(200, "");
        store.delete(&ReferenceId::new("../orders#1")).await.unwrap();
        assert_eq!(
            client.requests()[0].url,
            "http://target.test/admin/products/..%2Forders%231"
        );
    }

    #[test]
    fn from_config_carries_credentials() {
        let config = MirrorConfig::new("http://s.test", "http://t.test")
            .with_source_token("tok")
            .with_target_api_key("key");
        let source = HttpSourceStore::from_config(&config, ScriptedClient::default());
        let remote = HttpRemoteStore::from_config(&config, ScriptedClient::default());
        assert_eq!(source.base_url(), "http://s.test");
        assert_eq!(source.token.as_deref(), Some("tok"));
        assert_eq!(remote.api_key.as_deref(), Some("key"));
    }
}
