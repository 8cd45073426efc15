use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::operation::Operation;
use crate::{NetworkError, Result};

/// Protocol version sent with every OneBusAway request.
const API_VERSION: &str = "2";

// ─── ClientOptions ────────────────────────────────────────────────────────

/// Settings shared by every request an [`ApiClient`] issues.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub api_key: String,
    /// Stable per-install identifier, sent as `app_uid`.
    pub app_uid: String,
    pub app_version: String,
    /// Transport-level timeout; an expiry surfaces as a transport error.
    pub timeout: Duration,
    /// Upper bound on requests in flight at once across all operations.
    pub max_concurrent_requests: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            app_uid: String::new(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            timeout: Duration::from_secs(30),
            max_concurrent_requests: 4,
        }
    }
}

// ─── ApiClient ────────────────────────────────────────────────────────────

/// HTTP client bound to one backend base URL.
///
/// Cloning is cheap; clones share the connection pool and the request lanes.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    default_query: Vec<(String, String)>,
    lanes: Arc<Semaphore>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

impl ApiClient {
    pub fn new(base_url: &str, opts: &ClientOptions) -> Result<Self> {
        let base_url =
            Url::parse(base_url).map_err(|e| NetworkError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(NetworkError::InvalidUrl(base_url.to_string()));
        }

        let http = reqwest::Client::builder()
            .timeout(opts.timeout)
            .user_agent(format!("oba-rs/{}", opts.app_version))
            .build()
            .map_err(|e| NetworkError::Client(e.to_string()))?;

        let default_query = vec![
            ("key".to_string(), opts.api_key.clone()),
            ("app_uid".to_string(), opts.app_uid.clone()),
            ("app_ver".to_string(), opts.app_version.clone()),
            ("version".to_string(), API_VERSION.to_string()),
        ];

        Ok(Self {
            http,
            base_url,
            default_query,
            lanes: Arc::new(Semaphore::new(opts.max_concurrent_requests.max(1))),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build a request URL from path segments and call-specific query items.
    ///
    /// Each segment is escaped on its own, so a `/` inside a path variable
    /// becomes `%2F` instead of introducing a new path level.
    pub fn build_url(&self, segments: &[&str], params: &[(&str, String)]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| NetworkError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        {
            let mut query = url.query_pairs_mut();
            for (k, v) in &self.default_query {
                query.append_pair(k, v);
            }
            for (k, v) in params {
                query.append_pair(k, v);
            }
        }
        Ok(url)
    }

    /// Issue a GET for `url` as a started [`Operation`].
    ///
    /// The body is parsed as `W` and handed to `map`, whose error (if any)
    /// becomes the operation's result.
    pub fn get_json<W, T, F>(&self, label: &'static str, url: Url, map: F) -> Operation<T>
    where
        W: DeserializeOwned + Send + 'static,
        T: Send + Sync + 'static,
        F: FnOnce(W, &str) -> Result<T> + Send + 'static,
    {
        let client = self.clone();
        Operation::spawn(label, async move {
            let wire: W = client.fetch_json(&url).await?;
            map(wire, &display_url(&url))
        })
    }

    /// Perform one GET on a request lane and parse the JSON body.
    pub(crate) async fn fetch_json<W: DeserializeOwned>(&self, url: &Url) -> Result<W> {
        let shown = display_url(url);
        let _lane = self
            .lanes
            .acquire()
            .await
            .map_err(|e| NetworkError::Transport {
                url: shown.clone(),
                message: e.to_string(),
                timeout: false,
            })?;

        debug!(url = %shown, "GET");
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| NetworkError::transport(&shown, e))?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %shown, status = status.as_u16(), "non-success status");
            return Err(NetworkError::Status {
                url: shown,
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| NetworkError::transport(&shown, e))?;
        serde_json::from_slice(&body).map_err(|e| NetworkError::parse(&shown, e.to_string()))
    }
}

/// The URL without its query string, so API keys stay out of logs and errors.
pub(crate) fn display_url(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

// ─── Tests ────────────────────────────────────────────────────────────────
