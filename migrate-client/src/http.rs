//! REST implementation of the client traits

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::connection::{ArangoClient, ArangoDatabase, CollectionInfo, Document, OverwriteMode, QueryOptions};
use crate::errors::{ClientError, ClientResult};

const SYSTEM_DATABASE: &str = "_system";
const TRANSACTION_HEADER: &str = "x-arango-trx-id";

/// Shared by the client and every database handle it binds
struct Inner {
    http: Client,
    config: ClientConfig,
    endpoint: String,
    gate: Semaphore,
    closed: AtomicBool,
}

impl Inner {
    fn url(&self, database: &str, path: &str) -> String {
        format!("{}/_db/{}{}", self.endpoint, urlencoding::encode(database), path)
    }

    /// Send one request through the in-flight gate and decode the JSON answer
    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        headers: &[(&str, &str)],
    ) -> ClientResult<Value> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed);
        }
        let _permit = self.gate.acquire().await.map_err(|_| ClientError::Closed)?;

        debug!("{} {}", method, url);
        let mut request = self.http.request(method, url);

        if let Some(credentials) = &self.config.credentials {
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            let err = ClientError::from_response(status.as_u16(), &bytes);
            debug!("Request failed: {}", err);
            return Err(err);
        }

        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// ArangoDB client speaking the REST API over reqwest
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("endpoint", &self.inner.endpoint)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl HttpClient {
    /// Create a client with specific configuration
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;

        debug!(
            "Creating ArangoDB client for {} with timeout: {}s",
            config.endpoint,
            config.timeout.as_secs()
        );
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .pool_max_idle_per_host(config.conn_limit as usize)
            .build()?;

        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        let gate = Semaphore::new(config.conn_limit as usize);

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                config,
                endpoint,
                gate,
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    fn bind(&self, name: &str) -> HttpDatabase {
        HttpDatabase {
            inner: self.inner.clone(),
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl ArangoClient for HttpClient {
    fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    async fn database_exists(&self, name: &str) -> ClientResult<bool> {
        let url = self.inner.url(name, "/_api/database/current");
        match self.inner.send(Method::GET, &url, None, &[]).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn create_database(&self, name: &str) -> ClientResult<()> {
        let url = self.inner.url(SYSTEM_DATABASE, "/_api/database");
        self.inner
            .send(Method::POST, &url, Some(&json!({ "name": name })), &[])
            .await?;
        info!("Created database '{}'", name);
        Ok(())
    }

    async fn database(&self, name: &str) -> ClientResult<Arc<dyn ArangoDatabase>> {
        let url = self.inner.url(name, "/_api/database/current");
        self.inner.send(Method::GET, &url, None, &[]).await?;
        Ok(Arc::new(self.bind(name)))
    }

    async fn shutdown(&self) -> ClientResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        info!("Shutting down ArangoDB client for {}", self.inner.endpoint);
        let timeout = self.inner.config.shutdown_timeout;

        // Holding every permit means nothing is in flight
        let drained = tokio::time::timeout(
            timeout,
            self.inner.gate.acquire_many(self.inner.config.conn_limit),
        )
        .await;
        self.inner.gate.close();

        match drained {
            Ok(Ok(permits)) => {
                permits.forget();
                info!("ArangoDB client shut down");
                Ok(())
            }
            Ok(Err(_)) => Ok(()),
            Err(_) => {
                warn!("Shutdown timed out after {:?} with requests in flight", timeout);
                Err(ClientError::ShutdownTimeout(timeout))
            }
        }
    }
}

/// Database handle bound by [`HttpClient::database`]
pub struct HttpDatabase {
    inner: Arc<Inner>,
    name: String,
}

#[derive(Debug, Deserialize)]
struct CollectionList {
    #[serde(default)]
    result: Vec<CollectionInfo>,
}

#[derive(Debug, Deserialize)]
struct DocumentMeta {
    #[serde(rename = "_rev")]
    rev: String,
}

#[derive(Debug, Deserialize)]
struct CursorPage {
    #[serde(default)]
    result: Vec<Value>,

    #[serde(rename = "hasMore", default)]
    has_more: bool,

    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionStatus {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TransactionEnvelope {
    result: TransactionStatus,
}

impl HttpDatabase {
    fn url(&self, path: &str) -> String {
        self.inner.url(&self.name, path)
    }

    fn document_url(&self, collection: &str, key: &str) -> String {
        self.url(&format!(
            "/_api/document/{}/{}",
            urlencoding::encode(collection),
            urlencoding::encode(key)
        ))
    }
}

#[async_trait]
impl ArangoDatabase for HttpDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collections(&self) -> ClientResult<Vec<CollectionInfo>> {
        let url = self.url("/_api/collection?excludeSystem=false");
        let response = self.inner.send(Method::GET, &url, None, &[]).await?;
        let list: CollectionList = serde_json::from_value(response)?;
        Ok(list.result)
    }

    async fn create_collection(&self, name: &str) -> ClientResult<()> {
        let url = self.url("/_api/collection");
        self.inner
            .send(Method::POST, &url, Some(&json!({ "name": name })), &[])
            .await?;
        debug!("Created collection '{}' in '{}'", name, self.name);
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> ClientResult<()> {
        let url = self.url(&format!("/_api/collection/{}", urlencoding::encode(name)));
        self.inner.send(Method::DELETE, &url, None, &[]).await?;
        debug!("Dropped collection '{}' in '{}'", name, self.name);
        Ok(())
    }

    async fn read_document(&self, collection: &str, key: &str) -> ClientResult<Option<Document>> {
        let url = self.document_url(collection, key);
        match self.inner.send(Method::GET, &url, None, &[]).await {
            Ok(body) => {
                let meta: DocumentMeta = serde_json::from_value(body.clone())?;
                Ok(Some(Document {
                    key: key.to_string(),
                    rev: meta.rev,
                    body,
                }))
            }
            Err(err) if err.is_document_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn insert_document(
        &self,
        collection: &str,
        body: &Value,
        overwrite: OverwriteMode,
    ) -> ClientResult<String> {
        let url = self.url(&format!(
            "/_api/document/{}?overwriteMode={}",
            urlencoding::encode(collection),
            overwrite.as_str()
        ));
        let response = self.inner.send(Method::POST, &url, Some(body), &[]).await?;
        let meta: DocumentMeta = serde_json::from_value(response)?;
        Ok(meta.rev)
    }

    async fn replace_document(
        &self,
        collection: &str,
        key: &str,
        body: &Value,
        if_match: &str,
    ) -> ClientResult<String> {
        let url = self.document_url(collection, key);
        let response = self
            .inner
            .send(Method::PUT, &url, Some(body), &[("if-match", if_match)])
            .await?;
        let meta: DocumentMeta = serde_json::from_value(response)?;
        Ok(meta.rev)
    }

    async fn remove_document(
        &self,
        collection: &str,
        key: &str,
        if_match: Option<&str>,
    ) -> ClientResult<bool> {
        let url = self.document_url(collection, key);
        let headers: Vec<(&str, &str)> = if_match.map(|rev| ("if-match", rev)).into_iter().collect();

        match self.inner.send(Method::DELETE, &url, None, &headers).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_document_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn query(&self, aql: &str, options: &QueryOptions) -> ClientResult<Vec<Value>> {
        let mut payload = json!({ "query": aql });
        if let Some(max_runtime) = options.max_runtime {
            payload["options"] = json!({ "maxRuntime": max_runtime.as_secs_f64() });
        }

        let headers: Vec<(&str, &str)> = options
            .transaction_id
            .as_deref()
            .map(|id| (TRANSACTION_HEADER, id))
            .into_iter()
            .collect();

        let url = self.url("/_api/cursor");
        let first = self.inner.send(Method::POST, &url, Some(&payload), &headers).await?;
        let mut page: CursorPage = serde_json::from_value(first)?;
        let mut results = std::mem::take(&mut page.result);

        while page.has_more {
            let id = page.id.take().ok_or_else(|| {
                ClientError::ConfigError("cursor has more results but no id".to_string())
            })?;
            let url = self.url(&format!("/_api/cursor/{}", urlencoding::encode(&id)));
            let next = self.inner.send(Method::PUT, &url, None, &headers).await?;
            page = serde_json::from_value(next)?;
            results.append(&mut page.result);
            if page.id.is_none() {
                page.id = Some(id);
            }
        }

        Ok(results)
    }

    async fn begin_transaction(&self, write_collections: &[String]) -> ClientResult<String> {
        let url = self.url("/_api/transaction/begin");
        let payload = json!({ "collections": { "write": write_collections } });
        let response = self.inner.send(Method::POST, &url, Some(&payload), &[]).await?;
        let envelope: TransactionEnvelope = serde_json::from_value(response)?;
        debug!("Began stream transaction {} in '{}'", envelope.result.id, self.name);
        Ok(envelope.result.id)
    }

    async fn commit_transaction(&self, id: &str) -> ClientResult<()> {
        let url = self.url(&format!("/_api/transaction/{}", urlencoding::encode(id)));
        self.inner.send(Method::PUT, &url, None, &[]).await?;
        Ok(())
    }

    async fn abort_transaction(&self, id: &str) -> ClientResult<()> {
        let url = self.url(&format!("/_api/transaction/{}", urlencoding::encode(id)));
        self.inner.send(Method::DELETE, &url, None, &[]).await?;
        Ok(())
    }
}
