//! Request payload and worker response types

use content_extraction::ReportRequest;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Task description published by the web tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPayload {
    /// e.g. "report-entry-sasbdb", "report-summary-emdb-status"
    pub request_content_type: String,

    #[serde(default)]
    pub request_dataset_id: String,

    #[serde(default = "default_format_type")]
    pub request_format_type: String,

    /// Report file name recorded in the session store
    pub report_file: String,

    /// Full path the report is written to
    pub report_path: PathBuf,

    pub session_path: PathBuf,
    pub session_store_prefix: String,
    pub session_history_path: PathBuf,
    pub session_id: String,

    /// Peer site serving entry reports for this dataset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_proxy_url: Option<String>,

    /// Site whose resources answer a summary request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_site: Option<String>,

    #[serde(default, deserialize_with = "lenient_bool")]
    pub worker_test_mode: bool,

    /// Seconds to sleep in test mode
    #[serde(default = "default_test_duration", deserialize_with = "lenient_u64")]
    pub worker_test_duration: u64,

    /// Container file for entry reports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_pdbx_file_path: Option<PathBuf>,
}

fn default_format_type() -> String {
    "json".to_string()
}

fn default_test_duration() -> u64 {
    10
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "y"
        ),
        _ => false,
    })
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Null => Ok(default_test_duration()),
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| D::Error::custom(format!("invalid duration {}", n))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("invalid duration {:?}", s))),
        other => Err(D::Error::custom(format!("invalid duration {}", other))),
    }
}

impl RequestPayload {
    /// Reader diagnostics for this request's container file
    pub fn parser_log_path(&self) -> PathBuf {
        self.session_path
            .join(format!("{}-parser.log", self.request_dataset_id))
    }

    pub fn report_request(&self) -> ReportRequest {
        ReportRequest {
            content_type: self.request_content_type.clone(),
            dataset_id: self.request_dataset_id.clone(),
            format_type: self.request_format_type.clone(),
            report_path: self.report_path.clone(),
            pdbx_file_path: self.session_pdbx_file_path.clone(),
            parser_log_path: self.parser_log_path(),
        }
    }
}

/// Response line sent back for each consumed message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub status: ResponseStatus,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Completed,
    Failed,
    Rejected,
}

impl WorkerResponse {
    pub fn completed(session_id: &str) -> Self {
        Self {
            status: ResponseStatus::Ok,
            outcome: Outcome::Completed,
            session_id: Some(session_id.to_string()),
            message: None,
        }
    }

    pub fn failed(session_id: &str, message: &str) -> Self {
        Self {
            status: ResponseStatus::Ok,
            outcome: Outcome::Failed,
            session_id: Some(session_id.to_string()),
            message: Some(message.to_string()),
        }
    }

    /// Message could not be processed at all
    pub fn rejected(message: &str) -> Self {
        Self {
            status: ResponseStatus::Error,
            outcome: Outcome::Rejected,
            session_id: None,
            message: Some(message.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> Value {
        json!({
            "request_content_type": "report-entry-sasbdb",
            "request_dataset_id": "D_1000000001",
            "report_file": "D_1000000001_report.json",
            "report_path": "/sessions/s1/D_1000000001_report.json",
            "session_path": "/sessions/s1",
            "session_store_prefix": "contentws",
            "session_history_path": "/sessions/history",
            "session_id": "s1"
        })
    }

    #[test]
    fn test_defaults() {
        let payload: RequestPayload = serde_json::from_value(base()).unwrap();
        assert_eq!(payload.request_format_type, "json");
        assert!(!payload.worker_test_mode);
        assert_eq!(payload.worker_test_duration, 10);
        assert!(payload.session_proxy_url.is_none());
        assert_eq!(
            payload.parser_log_path(),
            PathBuf::from("/sessions/s1/D_1000000001-parser.log")
        );
    }

    #[test]
    fn test_lenient_flags() {
        for (mode, expected) in [
            (json!(true), true),
            (json!("True"), true),
            (json!("1"), true),
            (json!(1), true),
            (json!("false"), false),
            (json!(0), false),
            (json!(null), false),
        ] {
            let mut raw = base();
            raw["worker_test_mode"] = mode.clone();
            raw["worker_test_duration"] = json!("3");
            let payload: RequestPayload = serde_json::from_value(raw).unwrap();
            assert_eq!(payload.worker_test_mode, expected, "mode {}", mode);
            assert_eq!(payload.worker_test_duration, 3);
        }
    }

    #[test]
    fn test_bad_duration_rejected() {
        let mut raw = base();
        raw["worker_test_duration"] = json!("soon");
        assert!(serde_json::from_value::<RequestPayload>(raw).is_err());
    }

    #[test]
    fn test_missing_required_field_rejected() {
        let mut raw = base();
        raw.as_object_mut().unwrap().remove("session_id");
        assert!(serde_json::from_value::<RequestPayload>(raw).is_err());
    }

    #[test]
    fn test_response_serialization() {
        let response = WorkerResponse::completed("s1");
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"status": "ok", "outcome": "completed", "session_id": "s1"})
        );
        let response = WorkerResponse::rejected("Parse error");
        assert_eq!(serde_json::to_value(&response).unwrap()["status"], json!("error"));
    }
}
