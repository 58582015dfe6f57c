//! Forwarding entry requests to a peer site.
//!
//! The peer runs the same service. A session is opened there, the entry
//! content is requested, and the session status is polled with a growing
//! pause until it completes, fails or the wait ceiling is reached. The
//! finished report is then downloaded to the local report path.

use crate::config::ProxyConfig;
use crate::types::ExtractionError;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Polling schedule: the pause before poll `n` is `n² × base_pause`, and no
/// poll is made whose pause would exceed `max_wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_pause: Duration,
    pub max_wait: Duration,
}

impl RetryPolicy {
    pub fn new(base_pause: Duration, max_wait: Duration) -> Self {
        Self {
            base_pause,
            max_wait,
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(config.base_pause(), config.max_wait())
    }

    /// Pause before the `attempt`-th poll (1-based)
    pub fn pause_for(&self, attempt: u32) -> Duration {
        self.base_pause.saturating_mul(attempt.saturating_mul(attempt))
    }

    /// Number of polls before giving up; at least one
    pub fn max_attempts(&self) -> u32 {
        if self.base_pause.is_zero() {
            return 1;
        }
        // Largest n with n² <= max_wait / base_pause
        let ratio = self.max_wait.as_nanos() / self.base_pause.as_nanos();
        let mut n = (ratio as f64).sqrt() as u128;
        while n * n > ratio {
            n -= 1;
        }
        while (n + 1) * (n + 1) <= ratio {
            n += 1;
        }
        u32::try_from(n).unwrap_or(u32::MAX).max(1)
    }

    /// Every pause, in order
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_attempts()).map(|n| self.pause_for(n)).collect()
    }

    /// Total time spent pausing if every poll is used
    pub fn total_wait(&self) -> Duration {
        self.schedule().into_iter().sum()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ProxyConfig::default())
    }
}

/// Status of the remote session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    Pending(String),
    Completed,
    Failed,
}

impl RemoteStatus {
    pub fn from_reply(reply: &Value) -> Self {
        let flagged = reply
            .get("onedep_error_flag")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        match reply.get("status").and_then(Value::as_str) {
            _ if flagged => RemoteStatus::Failed,
            Some("completed") => RemoteStatus::Completed,
            Some("failed") => RemoteStatus::Failed,
            Some(other) => RemoteStatus::Pending(other.to_string()),
            None => RemoteStatus::Pending(String::new()),
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, RemoteStatus::Pending(_))
    }
}

/// Client side of the peer content service
pub trait RemoteContentClient {
    /// Open a session and return its id
    fn create_session(&mut self) -> Result<String, ExtractionError>;

    fn request_entry_content(
        &mut self,
        dataset_id: &str,
        content_type: &str,
        format_type: &str,
    ) -> Result<(), ExtractionError>;

    fn status(&mut self) -> Result<RemoteStatus, ExtractionError>;

    /// Write the finished report to `destination`
    fn download(
        &mut self,
        content_type: &str,
        format_type: &str,
        destination: &Path,
    ) -> Result<(), ExtractionError>;
}

/// HTTP client for a peer's content service
pub struct HttpContentClient {
    http: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    session_id: Option<String>,
}

impl HttpContentClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, ExtractionError> {
        let http = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
            session_id: None,
        })
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/contentws/{}", self.base_url, name)
    }

    fn session_id(&self) -> Result<&str, ExtractionError> {
        self.session_id
            .as_deref()
            .ok_or_else(|| ExtractionError::Remote("no remote session".to_string()))
    }

    fn post(&self, name: &str, body: Value) -> Result<reqwest::blocking::Response, ExtractionError> {
        let response = self
            .http
            .post(self.endpoint(name))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()?
            .error_for_status()?;
        Ok(response)
    }

    fn post_json(&self, name: &str, body: Value) -> Result<Value, ExtractionError> {
        let reply: Value = self.post(name, body)?.json()?;
        if reply
            .get("onedep_error_flag")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            let text = reply
                .get("onedep_status_text")
                .and_then(Value::as_str)
                .unwrap_or("no detail");
            return Err(ExtractionError::Remote(format!("{} failed: {}", name, text)));
        }
        Ok(reply)
    }
}

impl RemoteContentClient for HttpContentClient {
    fn create_session(&mut self) -> Result<String, ExtractionError> {
        let reply = self.post_json("session", json!({}))?;
        let session_id = reply
            .get("session_id")
            .and_then(Value::as_str)
            .ok_or_else(|| ExtractionError::Remote("session reply without session_id".to_string()))?
            .to_string();
        self.session_id = Some(session_id.clone());
        Ok(session_id)
    }

    fn request_entry_content(
        &mut self,
        dataset_id: &str,
        content_type: &str,
        format_type: &str,
    ) -> Result<(), ExtractionError> {
        let body = json!({
            "session_id": self.session_id()?,
            "request_dataset_id": dataset_id,
            "request_content_type": content_type,
            "request_format_type": format_type,
        });
        self.post_json("entry_content", body).map(|_| ())
    }

    fn status(&mut self) -> Result<RemoteStatus, ExtractionError> {
        let reply: Value = self
            .post("session_status", json!({ "session_id": self.session_id()? }))?
            .json()?;
        Ok(RemoteStatus::from_reply(&reply))
    }

    fn download(
        &mut self,
        content_type: &str,
        format_type: &str,
        destination: &Path,
    ) -> Result<(), ExtractionError> {
        let body = json!({
            "session_id": self.session_id()?,
            "request_content_type": content_type,
            "request_format_type": format_type,
        });
        let bytes = self.post("download", body)?.bytes()?;
        std::fs::write(destination, &bytes)?;
        Ok(())
    }
}

type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;

/// Runs the remote proxy path for entry reports
pub struct ProxyReportFetcher {
    policy: RetryPolicy,
    api_key_path: Option<PathBuf>,
    request_timeout: Duration,
    sleep: Sleeper,
}

impl ProxyReportFetcher {
    pub fn new(config: &ProxyConfig) -> Self {
        Self {
            policy: RetryPolicy::from_config(config),
            api_key_path: config.api_key_path.clone(),
            request_timeout: config.request_timeout(),
            sleep: Arc::new(std::thread::sleep),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleep(mut self, sleep: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleep = Arc::new(sleep);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn read_api_key(&self) -> Result<String, ExtractionError> {
        let path = self
            .api_key_path
            .as_ref()
            .ok_or_else(|| ExtractionError::Remote("no API key file configured".to_string()))?;
        let key = std::fs::read_to_string(path)?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ExtractionError::Remote(format!("API key file {:?} is empty", path)));
        }
        Ok(key.to_string())
    }

    /// Retrieve an entry report from the peer at `api_url` into
    /// `report_path`. Returns false on any failure or timeout.
    pub fn retrieve_proxy_report(
        &self,
        dataset_id: &str,
        api_url: &str,
        content_type: &str,
        format_type: &str,
        report_path: &Path,
    ) -> bool {
        let mut client = match self
            .read_api_key()
            .and_then(|key| HttpContentClient::new(api_url, &key, self.request_timeout))
        {
            Ok(client) => client,
            Err(e) => {
                error!("Cannot reach proxy {}: {}", api_url, e);
                return false;
            }
        };
        self.retrieve_with(&mut client, dataset_id, content_type, format_type, report_path)
    }

    /// Same as [`Self::retrieve_proxy_report`] against any client
    pub fn retrieve_with(
        &self,
        client: &mut dyn RemoteContentClient,
        dataset_id: &str,
        content_type: &str,
        format_type: &str,
        report_path: &Path,
    ) -> bool {
        let start = Instant::now();
        match self.try_retrieve(client, dataset_id, content_type, format_type, report_path) {
            Ok(()) => {
                info!(
                    "Proxy report {} for {} retrieved in {:.2}s",
                    content_type,
                    dataset_id,
                    start.elapsed().as_secs_f64()
                );
                true
            }
            Err(e) => {
                error!(
                    "Proxy report {} for {} failed after {:.2}s: {}",
                    content_type,
                    dataset_id,
                    start.elapsed().as_secs_f64(),
                    e
                );
                false
            }
        }
    }

    fn try_retrieve(
        &self,
        client: &mut dyn RemoteContentClient,
        dataset_id: &str,
        content_type: &str,
        format_type: &str,
        report_path: &Path,
    ) -> Result<(), ExtractionError> {
        let session_id = client.create_session()?;
        debug!("Remote session {}", session_id);

        client.request_entry_content(dataset_id, content_type, format_type)?;

        let mut waited = Duration::ZERO;
        let mut finished = None;
        for attempt in 1..=self.policy.max_attempts() {
            let pause = self.policy.pause_for(attempt);
            (self.sleep)(pause);
            waited += pause;

            let status = client.status()?;
            debug!("[{:4}] remote status {:?} after {:?}", attempt, status, waited);
            if status.is_finished() {
                finished = Some(status);
                break;
            }
        }

        match finished {
            Some(RemoteStatus::Completed) => {}
            Some(_) => return Err(ExtractionError::Remote("remote request failed".to_string())),
            None => {
                return Err(ExtractionError::Remote(format!(
                    "no response from remote service in {:?}",
                    waited
                )))
            }
        }

        client.download(content_type, format_type, report_path)
    }
}
