//! Per-request orchestration.
//!
//! A request moves `received -> dispatched -> completed | failed`. Whatever
//! the outcome, the session store and activity history are updated
//! afterwards; failures there are logged and never change the outcome.

use crate::payload::RequestPayload;
use crate::session::{ActivityHistory, FileSessionStore, ServiceHistory, SessionError, SessionStore};
use content_extraction::ContentRouter;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Malformed request payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    Dispatched,
    Completed,
    Failed,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Received => "received",
            RequestState::Dispatched => "dispatched",
            RequestState::Completed => "completed",
            RequestState::Failed => "failed",
        }
    }
}

type Sleeper = Box<dyn Fn(Duration) + Send>;

/// One content request bound to its session
pub struct ContentRequest {
    router: Arc<ContentRouter>,
    payload: RequestPayload,
    store: Box<dyn SessionStore>,
    history: Option<Box<dyn ActivityHistory>>,
    state: RequestState,
    sleep: Sleeper,
}

impl ContentRequest {
    /// Open the session store named by the payload and mark it running
    pub fn setup(router: Arc<ContentRouter>, payload: RequestPayload) -> Result<Self, ServiceError> {
        let store = FileSessionStore::open(&payload.session_path, &payload.session_store_prefix)?;
        Self::with_store(router, payload, Box::new(store))
    }

    pub fn with_store(
        router: Arc<ContentRouter>,
        payload: RequestPayload,
        mut store: Box<dyn SessionStore>,
    ) -> Result<Self, ServiceError> {
        store.set("status", json!("running"))?;
        info!(
            "Session {} received {} for {}",
            payload.session_id, payload.request_content_type, payload.request_dataset_id
        );

        Ok(Self {
            router,
            payload,
            store,
            history: None,
            state: RequestState::Received,
            sleep: Box::new(std::thread::sleep),
        })
    }

    /// Use `history` instead of opening the payload's history path
    pub fn with_history(mut self, history: Box<dyn ActivityHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_sleep(mut self, sleep: impl Fn(Duration) + Send + 'static) -> Self {
        self.sleep = Box::new(sleep);
        self
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn payload(&self) -> &RequestPayload {
        &self.payload
    }

    /// Execute the request and record its outcome
    pub fn run(&mut self) -> bool {
        let start = Instant::now();

        let ok = if self.payload.worker_test_mode {
            self.run_test_mode()
        } else {
            let ok = self.dispatch();
            self.confirm_report(ok)
        };

        self.complete(ok);
        info!(
            "Session {} {} in {:.2}s",
            self.payload.session_id,
            self.state.as_str(),
            start.elapsed().as_secs_f64()
        );
        ok
    }

    fn run_test_mode(&mut self) -> bool {
        info!(
            "Running in test mode for {} seconds",
            self.payload.worker_test_duration
        );
        (self.sleep)(Duration::from_secs(self.payload.worker_test_duration));
        self.state = RequestState::Dispatched;

        match std::fs::write(&self.payload.report_path, "DUMMY") {
            Ok(()) => true,
            Err(e) => {
                error!("Test mode report {:?} failed: {}", self.payload.report_path, e);
                false
            }
        }
    }

    fn dispatch(&mut self) -> bool {
        let kind = self.router.resolve(
            &self.payload.request_content_type,
            self.payload.session_proxy_url.as_deref(),
            self.payload.query_site.as_deref(),
        );
        self.state = RequestState::Dispatched;
        self.router.dispatch(&kind, &self.payload.report_request())
    }

    /// A reported success only stands if the report can be read back
    fn confirm_report(&self, ok: bool) -> bool {
        if !ok {
            return false;
        }
        match std::fs::File::open(&self.payload.report_path) {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    "Report {:?} unreadable after extraction: {}",
                    self.payload.report_path, e
                );
                false
            }
        }
    }

    fn complete(&mut self, ok: bool) {
        self.state = if ok {
            RequestState::Completed
        } else {
            RequestState::Failed
        };
        let status = self.state.as_str();

        let mut update = Map::new();
        if ok {
            update.insert(
                self.payload.request_content_type.clone(),
                json!([self.payload.report_file, "data"]),
            );
        }
        update.insert("status".to_string(), Value::String(status.to_string()));

        if let Err(e) = self.record_history(status) {
            error!(
                "Failed to update history for session {} with {}: {}",
                self.payload.session_id, status, e
            );
        }

        match self.store.update_all(update) {
            Ok(()) => {
                let stored = self.store.get("status").unwrap_or(Value::Null);
                info!("Session store status now {:?}", stored);
            }
            Err(e) => error!(
                "Failed to update session store for {}: {}",
                self.payload.session_id, e
            ),
        }
    }

    fn record_history(&mut self, status: &str) -> Result<(), SessionError> {
        if self.history.is_none() {
            self.history = Some(Box::new(ServiceHistory::open(
                &self.payload.session_history_path,
            )?));
        }
        match self.history.as_mut() {
            Some(history) => history.add(&self.payload.session_id, status),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use content_extraction::{Config, Definitions};
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct SharedStore(Arc<Mutex<Map<String, Value>>>);

    impl SessionStore for SharedStore {
        fn set(&mut self, key: &str, value: Value) -> Result<(), SessionError> {
            self.0.lock().unwrap().insert(key.to_string(), value);
            Ok(())
        }

        fn get(&self, key: &str) -> Option<Value> {
            self.0.lock().unwrap().get(key).cloned()
        }

        fn update_all(&mut self, values: Map<String, Value>) -> Result<(), SessionError> {
            self.0.lock().unwrap().extend(values);
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct SharedHistory(Arc<Mutex<Vec<(String, String)>>>);

    impl ActivityHistory for SharedHistory {
        fn add(&mut self, session_id: &str, status_op: &str) -> Result<(), SessionError> {
            self.0
                .lock()
                .unwrap()
                .push((session_id.to_string(), status_op.to_string()));
            Ok(())
        }
    }

    struct BrokenHistory;

    impl ActivityHistory for BrokenHistory {
        fn add(&mut self, _: &str, _: &str) -> Result<(), SessionError> {
            Err(SessionError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        }
    }

    /// Accepts the initial status, refuses the final update
    struct BrokenStore(SharedStore);

    impl SessionStore for BrokenStore {
        fn set(&mut self, key: &str, value: Value) -> Result<(), SessionError> {
            self.0.set(key, value)
        }

        fn get(&self, key: &str) -> Option<Value> {
            self.0.get(key)
        }

        fn update_all(&mut self, _: Map<String, Value>) -> Result<(), SessionError> {
            Err(SessionError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )))
        }
    }

    fn router(dir: &Path) -> Arc<ContentRouter> {
        let mut config = Config::default();
        config.definitions.path = dir.join("defs.json");
        config.definitions.lock_dir = dir.join("locks");
        let router = ContentRouter::new(config);

        let defs: Definitions = serde_json::from_value(json!({
            "report-entry-example-test": {
                "content": {"struct": ["title"]},
                "conditions": {},
                "type": "entry"
            }
        }))
        .unwrap();
        assert!(router.registry().write_definitions(&defs, false));
        Arc::new(router)
    }

    fn payload(dir: &Path, content_type: &str) -> RequestPayload {
        let pdbx = dir.join("D_1_model.cif");
        std::fs::write(&pdbx, "data_D_1\n_struct.title 'A title'\n").unwrap();
        serde_json::from_value(json!({
            "request_content_type": content_type,
            "request_dataset_id": "D_1",
            "report_file": "D_1_report.json",
            "report_path": dir.join("D_1_report.json"),
            "session_path": dir,
            "session_store_prefix": "contentws",
            "session_history_path": dir.join("history"),
            "session_id": "s1",
            "session_pdbx_file_path": pdbx
        }))
        .unwrap()
    }

    #[test]
    fn test_successful_entry_request() {
        let dir = tempfile::tempdir().unwrap();
        let store = SharedStore::default();
        let history = SharedHistory::default();

        let mut request = ContentRequest::with_store(
            router(dir.path()),
            payload(dir.path(), "report-entry-example-test"),
            Box::new(store.clone()),
        )
        .unwrap()
        .with_history(Box::new(history.clone()));
        assert_eq!(store.get("status"), Some(json!("running")));
        assert_eq!(request.state(), RequestState::Received);

        assert!(request.run());
        assert_eq!(request.state(), RequestState::Completed);
        assert_eq!(store.get("status"), Some(json!("completed")));
        assert_eq!(
            store.get("report-entry-example-test"),
            Some(json!(["D_1_report.json", "data"]))
        );
        assert_eq!(
            *history.0.lock().unwrap(),
            vec![("s1".to_string(), "completed".to_string())]
        );
    }

    #[test]
    fn test_unknown_type_fails_without_report() {
        let dir = tempfile::tempdir().unwrap();
        let store = SharedStore::default();
        let payload = payload(dir.path(), "report-entry-unknown");
        let report = payload.report_path.clone();

        let mut request =
            ContentRequest::with_store(router(dir.path()), payload, Box::new(store.clone()))
                .unwrap()
                .with_history(Box::new(SharedHistory::default()));

        assert!(!request.run());
        assert_eq!(request.state(), RequestState::Failed);
        assert_eq!(store.get("status"), Some(json!("failed")));
        assert_eq!(store.get("report-entry-unknown"), None);
        assert!(!report.exists());
    }

    #[test]
    fn test_deleted_report_downgrades_to_failure() {
        let dir = tempfile::tempdir().unwrap();
        let payload = payload(dir.path(), "report-entry-example-test");
        let report = payload.report_path.clone();

        let mut request =
            ContentRequest::with_store(router(dir.path()), payload, Box::new(SharedStore::default()))
                .unwrap();

        assert!(request.dispatch());
        assert!(request.confirm_report(true));

        std::fs::remove_file(&report).unwrap();
        assert!(!request.confirm_report(true));
        assert!(!request.confirm_report(false));
    }

    #[test]
    fn test_history_failure_does_not_change_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let store = SharedStore::default();

        let mut request = ContentRequest::with_store(
            router(dir.path()),
            payload(dir.path(), "report-entry-example-test"),
            Box::new(store.clone()),
        )
        .unwrap()
        .with_history(Box::new(BrokenHistory));

        assert!(request.run());
        assert_eq!(store.get("status"), Some(json!("completed")));
    }

    #[test]
    fn test_store_failure_does_not_change_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let store = SharedStore::default();
        let payload = payload(dir.path(), "report-entry-example-test");
        let report = payload.report_path.clone();

        let mut request = ContentRequest::with_store(
            router(dir.path()),
            payload,
            Box::new(BrokenStore(store.clone())),
        )
        .unwrap()
        .with_history(Box::new(SharedHistory::default()));

        assert!(request.run());
        assert_eq!(request.state(), RequestState::Completed);
        assert!(report.exists());
        // The final update never landed
        assert_eq!(store.get("status"), Some(json!("running")));
    }

    #[test]
    fn test_test_mode_writes_dummy() {
        let dir = tempfile::tempdir().unwrap();
        let store = SharedStore::default();
        let slept = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&slept);

        let mut payload = payload(dir.path(), "anything-goes");
        payload.worker_test_mode = true;
        payload.worker_test_duration = 3;
        let report = payload.report_path.clone();

        let mut request = ContentRequest::with_store(router(dir.path()), payload, Box::new(store.clone()))
            .unwrap()
            .with_history(Box::new(SharedHistory::default()))
            .with_sleep(move |d| log.lock().unwrap().push(d));

        assert!(request.run());
        assert_eq!(std::fs::read_to_string(&report).unwrap(), "DUMMY");
        assert_eq!(*slept.lock().unwrap(), vec![Duration::from_secs(3)]);
        assert_eq!(store.get("anything-goes"), Some(json!(["D_1_report.json", "data"])));
    }

    #[test]
    fn test_setup_uses_file_store_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let payload = payload(dir.path(), "report-entry-example-test");

        let mut request = ContentRequest::setup(router(dir.path()), payload).unwrap();
        assert!(request.run());

        let store = FileSessionStore::open(dir.path(), "contentws").unwrap();
        assert_eq!(store.get("status"), Some(json!("completed")));

        let history = ServiceHistory::open(&dir.path().join("history")).unwrap();
        assert_eq!(history.entries("s1").unwrap().len(), 1);
    }
}
