//! Unix socket worker consuming queued content requests

use crate::payload::{RequestPayload, WorkerResponse};
use crate::request::ContentRequest;
use content_extraction::{Config, ContentRouter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{error, info, warn};

/// Worker server configuration
pub struct ServerConfig {
    /// Path to the Unix socket
    pub socket_path: PathBuf,
    /// Queue this worker consumes, for logging
    pub queue_name: String,
}

impl ServerConfig {
    pub fn from_config(config: &Config) -> Self {
        let site_id = &config.site.site_id;
        Self {
            socket_path: config.queue.socket_path(site_id),
            queue_name: config.queue.queue_name(site_id),
        }
    }
}

/// Worker that listens on a Unix socket for line-delimited request payloads
pub struct WorkerServer {
    config: ServerConfig,
    router: Arc<ContentRouter>,
}

impl WorkerServer {
    pub fn new(config: ServerConfig, router: Arc<ContentRouter>) -> Self {
        Self { config, router }
    }

    /// Build the router and socket settings from configuration
    pub fn from_config(config: Config) -> Self {
        let server_config = ServerConfig::from_config(&config);
        Self::new(server_config, Arc::new(ContentRouter::new(config)))
    }

    /// Start the server and listen for connections
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        // Remove existing socket file if present
        if self.config.socket_path.exists() {
            std::fs::remove_file(&self.config.socket_path)?;
        }

        let listener = UnixListener::bind(&self.config.socket_path)?;
        info!(
            "Worker for {} listening on {:?} (exchange {}, routing key {})",
            self.config.queue_name,
            self.config.socket_path,
            self.router.config().queue.exchange_name,
            self.router.config().queue.routing_key
        );

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let router = Arc::clone(&self.router);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, router).await {
                            error!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }

    /// Get the socket path
    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Process a single payload (for direct integration without socket)
    pub async fn process(&self, payload: RequestPayload) -> WorkerResponse {
        run_blocking(Arc::clone(&self.router), payload).await
    }
}

/// Handle a single client connection, one message at a time
async fn handle_connection(
    stream: UnixStream,
    router: Arc<ContentRouter>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        if line.trim().is_empty() {
            line.clear();
            continue;
        }

        let response = match serde_json::from_str::<RequestPayload>(&line) {
            Ok(payload) => {
                info!(
                    "Received: {} {} (session {})",
                    payload.request_content_type, payload.request_dataset_id, payload.session_id
                );
                run_blocking(Arc::clone(&router), payload).await
            }
            Err(e) => {
                warn!("Discarding malformed payload: {}", e);
                WorkerResponse::rejected(&format!("Parse error: {}", e))
            }
        };

        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        line.clear();
    }

    Ok(())
}

async fn run_blocking(router: Arc<ContentRouter>, payload: RequestPayload) -> WorkerResponse {
    let session_id = payload.session_id.clone();
    match tokio::task::spawn_blocking(move || process_payload(router, payload)).await {
        Ok(response) => response,
        Err(e) => {
            error!("Worker task for session {} aborted: {}", session_id, e);
            WorkerResponse::failed(&session_id, "worker task aborted")
        }
    }
}

/// Run one request to completion
fn process_payload(router: Arc<ContentRouter>, payload: RequestPayload) -> WorkerResponse {
    let session_id = payload.session_id.clone();
    let mut request = match ContentRequest::setup(router, payload) {
        Ok(request) => request,
        Err(e) => {
            error!("Session {} setup failed: {}", session_id, e);
            return WorkerResponse::failed(&session_id, &format!("Setup failed: {}", e));
        }
    };

    if request.run() {
        WorkerResponse::completed(&session_id)
    } else {
        WorkerResponse::failed(&session_id, "content request failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Outcome;
    use content_extraction::Definitions;
    use serde_json::json;

    fn server(dir: &Path) -> WorkerServer {
        let mut config = Config::default();
        config.definitions.path = dir.join("defs.json");
        config.definitions.lock_dir = dir.join("locks");
        config.queue.socket_path = Some(dir.join("worker.sock"));

        let server = WorkerServer::from_config(config);
        let defs: Definitions = serde_json::from_value(json!({
            "report-entry-example-test": {"content": {"struct": ["title"]}, "conditions": {}, "type": "entry"}
        }))
        .unwrap();
        assert!(server.router.registry().write_definitions(&defs, false));
        server
    }

    fn payload(dir: &Path, content_type: &str) -> serde_json::Value {
        let pdbx = dir.join("model.cif");
        std::fs::write(&pdbx, "data_D_1\n_struct.title 'T'\n").unwrap();
        json!({
            "request_content_type": content_type,
            "request_dataset_id": "D_1",
            "report_file": "report.json",
            "report_path": dir.join("report.json"),
            "session_path": dir.join("session"),
            "session_store_prefix": "contentws",
            "session_history_path": dir.join("history"),
            "session_id": "s1",
            "session_pdbx_file_path": pdbx
        })
    }

    #[tokio::test]
    async fn test_process_direct() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(dir.path());

        let known = serde_json::from_value(payload(dir.path(), "report-entry-example-test")).unwrap();
        let response = server.process(known).await;
        assert_eq!(response.outcome, Outcome::Completed);

        let unknown = serde_json::from_value(payload(dir.path(), "report-other")).unwrap();
        let response = server.process(unknown).await;
        assert_eq!(response.outcome, Outcome::Failed);
    }

    #[tokio::test]
    async fn test_socket_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let server = Arc::new(server(dir.path()));
        let socket = server.socket_path().to_path_buf();

        let running = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            let _ = running.run().await;
        });

        let mut stream = None;
        for _ in 0..50 {
            if let Ok(s) = UnixStream::connect(&socket).await {
                stream = Some(s);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        let (reader, mut writer) = stream.expect("worker socket").into_split();
        let mut reader = BufReader::new(reader);

        writer.write_all(b"{not json}\n").await.unwrap();
        let line = serde_json::to_string(&payload(dir.path(), "report-entry-example-test")).unwrap();
        writer.write_all(line.as_bytes()).await.unwrap();
        writer.write_all(b"\n").await.unwrap();

        let mut first = String::new();
        reader.read_line(&mut first).await.unwrap();
        let first: WorkerResponse = serde_json::from_str(&first).unwrap();
        assert_eq!(first.outcome, Outcome::Rejected);

        let mut second = String::new();
        reader.read_line(&mut second).await.unwrap();
        let second: WorkerResponse = serde_json::from_str(&second).unwrap();
        assert_eq!(second.outcome, Outcome::Completed);
        assert_eq!(second.session_id.as_deref(), Some("s1"));

        handle.abort();
    }
}
