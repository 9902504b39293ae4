//! Authenticated HTTP client for the App Seba REST API.
//!
//! The bearer token is resolved from persisted storage on every request: the
//! impersonation overlay when present, otherwise the primary token. Clearing the
//! overlay therefore restores the original credentials with no extra bookkeeping.
//! Failures are classified into `AppError`; failures of authenticated calls are also
//! handed to the shared `Notifier`.

use std::sync::Arc;
use std::time::Instant;

use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, CallMode};
use crate::storage::{SessionStorage, SharedStorage, KEY_IMPERSONATION, KEY_TOKEN};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Receives failures of authenticated calls, e.g. to show a global toast.
pub trait Notifier: Send + Sync {
    fn notify(&self, method: &Method, path: &str, err: &AppError);
}

/// Default notifier: a warning in the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, method: &Method, path: &str, err: &AppError) {
        warn!(target: "http", code = err.code_str(), status = err.http_status(), "{} {} failed: {}", method, path, err.message());
    }
}

/// Token to attach to the next request, if any.
pub fn bearer_token(storage: &dyn SessionStorage) -> Option<String> {
    storage
        .get(KEY_IMPERSONATION)
        .filter(|t| !t.is_empty())
        .or_else(|| storage.get(KEY_TOKEN).filter(|t| !t.is_empty()))
}

#[derive(Clone)]
pub struct ApiClient {
    base: Url,
    http: reqwest::Client,
    storage: SharedStorage,
    notifier: Arc<dyn Notifier>,
}

impl ApiClient {
    pub fn new(cfg: &Config, storage: SharedStorage) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.http_timeout)
            .build()
            .map_err(|e| AppError::config("http_client".to_string(), e.to_string()))?;
        Ok(Self { base: cfg.api_url.clone(), http, storage, notifier: Arc::new(LogNotifier) })
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn base(&self) -> &Url { &self.base }

    pub fn storage(&self) -> &SharedStorage { &self.storage }

    pub fn bearer(&self) -> Option<String> { bearer_token(self.storage.as_ref()) }

    /// Append `path` to the base URL's path (`Url::join` would drop a base path like `/api`).
    pub fn url(&self, path: &str) -> AppResult<Url> {
        let joined = format!("{}/{}", self.base.as_str().trim_end_matches('/'), path.trim_start_matches('/'));
        Url::parse(&joined).map_err(|e| AppError::config("invalid_url".to_string(), format!("{}: {}", joined, e)))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> AppResult<T> {
        self.send(Method::GET, path, &[], None, CallMode::Authenticated).await
    }

    pub async fn get_query<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> AppResult<T> {
        self.send(Method::GET, path, query, None, CallMode::Authenticated).await
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> AppResult<T> {
        let body = serde_json::to_value(body)?;
        self.send(Method::POST, path, &[], Some(body), CallMode::Authenticated).await
    }

    pub async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> AppResult<T> {
        let body = serde_json::to_value(body)?;
        self.send(Method::PUT, path, &[], Some(body), CallMode::Authenticated).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> AppResult<T> {
        self.send(Method::DELETE, path, &[], None, CallMode::Authenticated).await
    }

    /// POST whose failures belong to the caller's form (login, register, password flows).
    pub async fn post_inline<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> AppResult<T> {
        let body = serde_json::to_value(body)?;
        self.send(Method::POST, path, &[], Some(body), CallMode::Inline).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
        mode: CallMode,
    ) -> AppResult<T> {
        let result = self.exchange(method.clone(), path, query, body, mode).await;
        match result {
            Ok(v) => serde_json::from_value(v).map_err(|e| AppError::decode("decode_error".to_string(), format!("{} {}: {}", method, path, e))),
            Err(e) => {
                if mode == CallMode::Authenticated {
                    self.notifier.notify(&method, path, &e);
                }
                Err(e)
            }
        }
    }

    async fn exchange(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
        mode: CallMode,
    ) -> AppResult<Value> {
        let url = self.url(path)?;
        let request_id = uuid::Uuid::new_v4().to_string();
        let mut req = self.http.request(method.clone(), url).header(ACCEPT, HeaderValue::from_static("application/json")).header(REQUEST_ID_HEADER, request_id.as_str());
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(token) = self.bearer() {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| AppError::storage("bad_token".to_string(), "persisted token is not a valid header value".to_string()))?;
            req = req.header(AUTHORIZATION, value);
        }
        if let Some(b) = body {
            req = req.json(&b);
        }

        let started = Instant::now();
        let resp = req.send().await.map_err(|e| AppError::network("network_unavailable".to_string(), e.to_string()))?;
        let status = resp.status();
        let bytes = resp.bytes().await.map_err(|e| AppError::network("network_unavailable".to_string(), e.to_string()))?;
        debug!(target: "http", request_id = %request_id, method = %method, path, status = status.as_u16(), elapsed_ms = started.elapsed().as_millis() as u64, "request");

        let json: Option<Value> = if bytes.is_empty() { None } else { serde_json::from_slice(&bytes).ok() };
        if !status.is_success() {
            return Err(AppError::from_status(status.as_u16(), json.as_ref(), mode));
        }
        match json {
            Some(v) => Ok(v),
            None if bytes.is_empty() => Ok(Value::Null),
            None => Err(AppError::decode("decode_error".to_string(), format!("{} {}: response is not JSON", method, path))),
        }
    }
}
