//! End-to-end request handling against real container files and SQLite
//! resources.

use content_extraction::config::ResourceConfig;
use content_extraction::{Config, ContentRouter, Definitions};
use content_service::{ContentRequest, FileSessionStore, RequestPayload, ServiceHistory, SessionStore};
use pretty_assertions::assert_eq;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const SITE: &str = "WWPDB_DEPLOY_TEST";

const MODEL: &str = r#"data_D_1000000001
_struct.entry_id D_1000000001
_struct.title 'Solution structure of a scattering sample'
#
loop_
_entity_poly.entity_id
_entity_poly.type
1 'polypeptide(L)'
2 'polypeptide(L)'
3 polyribonucleotide
#
loop_
_database_2.database_id
_database_2.database_code
PDB   1ABC
WWPDB D_1000000001
#
_pdbx_database_status.status_code HPUB
_pdbx_database_status.title_suppression Y
#
loop_
_audit_author.name
_audit_author.pdbx_ordinal
'Smith, J.' 1
'Jones, K.' 2
"#;

fn definitions() -> Value {
    json!({
        "report-entry-example-test": {
            "content": {
                "entity_poly": ["entity_id", "type"],
                "database_2": ["database_id", "database_code"]
            },
            "conditions": {
                "entity_poly": {"entity_id": ["1", "char", "eq"]},
                "database_2": {"database_id": ["PDB", "char", "eq"]}
            },
            "type": "entry"
        },
        "report-entry-sasbdb": {
            "content": {
                "struct": ["entry_id", "title"],
                "audit_author": ["name"],
                "pdbx_database_status": ["status_code", "title_suppression"],
                "pdbx_depui_status_flags": ["has_sas_data"]
            },
            "conditions": {},
            "type": "entry"
        },
        "report-summary-processing": {
            "content": {"rcsb_status": ["structure_id", "status_code", "date_begin_processing"]},
            "conditions": {},
            "resource": {"rcsb_status": ["DA_INTERNAL", "da_internal"]},
            "type": "rdbms"
        }
    })
}

struct Site {
    dir: tempfile::TempDir,
    router: Arc<ContentRouter>,
}

impl Site {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();

        let mut databases = HashMap::new();
        for (site, rows) in [(SITE, 3), ("PDBE", 1)] {
            let path = dir.path().join(format!("{}-da_internal.db", site));
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE rcsb_status (structure_id TEXT, status_code TEXT, date_begin_processing DATETIME);",
            )
            .unwrap();
            for i in 0..rows {
                conn.execute(
                    "INSERT INTO rcsb_status VALUES (?1, 'PROC', '2017-02-14 09:05:07')",
                    [format!("D_{}", i)],
                )
                .unwrap();
            }
            let mut resources = HashMap::new();
            resources.insert("DA_INTERNAL".to_string(), ResourceConfig { path });
            databases.insert(site.to_string(), resources);
        }

        let mut config = Config::default();
        config.site.site_id = SITE.to_string();
        config.definitions.path = dir.path().join("ws_content_type_definitions.json");
        config.definitions.lock_dir = dir.path().join("locks");
        config.databases = databases;

        let router = ContentRouter::new(config);
        let defs: Definitions = serde_json::from_value(definitions()).unwrap();
        assert!(router.registry().write_definitions(&defs, true));

        std::fs::write(dir.path().join("D_1000000001_model.cif"), MODEL).unwrap();

        Self {
            dir,
            router: Arc::new(router),
        }
    }

    fn session_path(&self) -> PathBuf {
        self.dir.path().join("sessions").join("s1")
    }

    fn payload(&self, content_type: &str) -> Value {
        let session = self.session_path();
        json!({
            "request_content_type": content_type,
            "request_dataset_id": "D_1000000001",
            "request_format_type": "json",
            "report_file": "report.json",
            "report_path": session.join("report.json"),
            "session_path": session,
            "session_store_prefix": "contentws",
            "session_history_path": self.dir.path().join("history"),
            "session_id": "s1",
            "session_pdbx_file_path": self.dir.path().join("D_1000000001_model.cif")
        })
    }

    fn run(&self, payload: Value) -> bool {
        let payload: RequestPayload = serde_json::from_value(payload).unwrap();
        let mut request = ContentRequest::setup(Arc::clone(&self.router), payload).unwrap();
        request.run()
    }

    fn report(&self) -> Option<Value> {
        let text = std::fs::read_to_string(self.session_path().join("report.json")).ok()?;
        Some(serde_json::from_str(&text).unwrap())
    }

    fn store(&self) -> FileSessionStore {
        FileSessionStore::open(&self.session_path(), "contentws").unwrap()
    }
}

fn status_ops(site: &Site) -> Vec<String> {
    ServiceHistory::open(&site.dir.path().join("history"))
        .unwrap()
        .entries("s1")
        .unwrap()
        .into_iter()
        .map(|e| e.status_op)
        .collect()
}

#[test]
fn entry_example_filters_rows_by_condition() {
    let site = Site::new();
    assert!(site.run(site.payload("report-entry-example-test")));

    let report = site.report().unwrap();
    assert_eq!(
        report["entity_poly"],
        json!([{"entity_id": "1", "type": "polypeptide(L)"}])
    );
    assert_eq!(
        report["database_2"],
        json!([{"database_id": "PDB", "database_code": "1ABC"}])
    );

    let store = site.store();
    assert_eq!(store.get("status"), Some(json!("completed")));
    assert_eq!(
        store.get("report-entry-example-test"),
        Some(json!(["report.json", "data"]))
    );
    assert_eq!(status_ops(&site), vec!["completed"]);

    // Reader diagnostics land beside the session, none for a clean file
    assert!(!site.session_path().join("D_1000000001-parser.log").exists());
}

#[test]
fn unknown_content_type_fails_without_report() {
    let site = Site::new();
    assert!(!site.run(site.payload("report-entry-nonexistent")));
    assert!(site.report().is_none());
    assert_eq!(site.store().get("status"), Some(json!("failed")));
    assert_eq!(status_ops(&site), vec!["failed"]);
}

#[test]
fn missing_summary_definition_fails_without_report() {
    let site = Site::new();
    assert!(!site.run(site.payload("report-summary-emdb-status")));
    assert!(site.report().is_none());
    assert_eq!(site.store().get("status"), Some(json!("failed")));
}

#[test]
fn unrecognized_prefix_fails() {
    let site = Site::new();
    assert!(!site.run(site.payload("model-file")));
    assert!(site.report().is_none());
}

#[test]
fn summary_without_conditions_returns_all_rows() {
    let site = Site::new();
    assert!(site.run(site.payload("report-summary-processing")));

    let report = site.report().unwrap();
    let rows = report["rcsb_status"].as_array().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["date_begin_processing"], json!("2017-02-14T09:05:07"));
}

#[test]
fn summary_query_site_selects_other_resources() {
    let site = Site::new();
    let mut payload = site.payload("report-summary-processing");
    payload["query_site"] = json!("PDBE");
    assert!(site.run(payload));

    let report = site.report().unwrap();
    assert_eq!(report["rcsb_status"].as_array().unwrap().len(), 1);
}

#[test]
fn ineligible_sasbdb_entry_yields_empty_report() {
    let site = Site::new();
    assert!(site.run(site.payload("report-entry-sasbdb")));
    assert_eq!(site.report(), Some(json!({})));
}

#[test]
fn eligible_sasbdb_entry_is_suppressed() {
    let site = Site::new();
    let flagged = format!("{}#\n_pdbx_depui_status_flags.has_sas_data Y\n", MODEL);
    std::fs::write(site.dir.path().join("D_1000000001_model.cif"), flagged).unwrap();

    assert!(site.run(site.payload("report-entry-sasbdb")));
    let report = site.report().unwrap();
    assert_eq!(report["audit_author"], json!([{}]));
    assert_eq!(report["struct"][0]["title"], json!(""));
    assert_eq!(report["struct"][0]["entry_id"], json!("D_1000000001"));
    assert_eq!(report["pdbx_database_status"][0]["status_code"], json!("HPUB"));
}

#[test]
fn test_mode_short_circuits_extraction() {
    let site = Site::new();
    let mut payload = site.payload("report-entry-nonexistent");
    payload["worker_test_mode"] = json!("true");
    payload["worker_test_duration"] = json!(0);
    assert!(site.run(payload));

    let text = std::fs::read_to_string(site.session_path().join("report.json")).unwrap();
    assert_eq!(text, "DUMMY");
}

#[test]
fn registry_write_keeps_a_backup() {
    let site = Site::new();
    let defs = site.router.registry().definitions();
    assert!(site.router.registry().write_definitions(&defs, true));

    let backups = std::fs::read_dir(site.dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_string_lossy()
                .starts_with("ws_content_type_definitions.json-")
        })
        .count();
    assert_eq!(backups, 1);
}

#[allow(dead_code)]
fn assert_send_sync<T: Send + Sync>(_: &T) {}

#[test]
fn router_is_shareable_across_workers() {
    let site = Site::new();
    assert_send_sync(&site.router);
    let _: &Path = site.router.registry().path();
}
