//! Integration tests for configuration loading and pass execution
//!
//! Tests cover:
//! - Sync then clean over file-backed stores
//! - Destination file written after each task
//! - Dry-run leaves the destination untouched
//! - Exit codes for unknown tasks and empty sources

use std::path::{Path, PathBuf};

use idsync_cli::config::SyncConfig;
use idsync_cli::runner::{exit_code, summary_line, Overrides, Runner};
use idsync_engine::{DryRunFlags, PassKind, PassStatus};
use serde_json::Value;
use tempfile::TempDir;

const CONFIG: &str = r#"
stores:
  hr:
    json_file: hr.json
    pivot_attribute: uid
    schema:
      name: person
      identifier_field: dn
      attributes:
        - { name: uid }
        - { name: cn }
        - { name: mail }
  ldap:
    json_file: ldap.json
    pivot_attribute: uid
    schema:
      name: person
      identifier_field: dn
      attributes:
        - { name: uid }
        - { name: cn }
        - { name: mail }
tasks:
  - name: people
    source: hr
    destination: ldap
    workers: 2
"#;

struct Fixture {
    dir: TempDir,
    config: PathBuf,
}

impl Fixture {
    fn new(hr: &str, ldap: Option<&str>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hr.json"), hr).unwrap();
        if let Some(ldap) = ldap {
            std::fs::write(dir.path().join("ldap.json"), ldap).unwrap();
        }
        let config = dir.path().join("idsync.yaml");
        std::fs::write(&config, CONFIG).unwrap();
        Self { dir, config }
    }

    fn ldap_records(&self) -> Vec<Value> {
        read_records(&self.dir.path().join("ldap.json"))
    }
}

fn read_records(path: &Path) -> Vec<Value> {
    let raw = std::fs::read_to_string(path).unwrap();
    serde_json::from_str(&raw).unwrap()
}

fn all() -> Vec<String> {
    vec!["all".to_string()]
}

const HR: &str = r#"[
  {"dn": "uid=1,ou=people,dc=x", "uid": "1", "cn": "One", "mail": "one@x"},
  {"dn": "uid=2,ou=people,dc=x", "uid": "2", "cn": "Two"}
]"#;

const LDAP: &str = r#"[
  {"dn": "uid=1,ou=people,dc=x", "uid": "1", "cn": "Old One"},
  {"dn": "uid=9,ou=people,dc=x", "uid": "9", "cn": "Nine"}
]"#;

#[tokio::test]
async fn test_sync_then_clean_writes_destination() {
    let fixture = Fixture::new(HR, Some(LDAP));
    let config = SyncConfig::load(&fixture.config).unwrap();
    let runner = Runner::open(config, Overrides::default()).await.unwrap();

    let reports = runner.run_passes(&all(), &all()).await.unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].kind, PassKind::Sync);
    assert_eq!(reports[1].kind, PassKind::Clean);
    assert_eq!(reports[0].counters.applied, 2);
    assert_eq!(reports[1].counters.applied, 1);
    assert_eq!(exit_code(&reports), 0);
    assert!(summary_line(&reports[0]).starts_with("people sync completed"));

    let mut records = fixture.ldap_records();
    records.sort_by(|a, b| a["uid"].as_str().cmp(&b["uid"].as_str()));
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["cn"], "One");
    assert_eq!(records[0]["mail"], "one@x");
    assert_eq!(records[1]["dn"], "uid=2,ou=people,dc=x");
}

#[tokio::test]
async fn test_dry_run_leaves_destination_untouched() {
    let fixture = Fixture::new(HR, Some(LDAP));
    let config = SyncConfig::load(&fixture.config).unwrap();
    let overrides = Overrides {
        dry_run: DryRunFlags::all(),
        ..Overrides::default()
    };
    let runner = Runner::open(config, overrides).await.unwrap();

    let reports = runner.run_passes(&all(), &all()).await.unwrap();
    assert!(reports.iter().all(|r| r.counters.applied == 0));
    assert_eq!(reports[0].counters.attempted, 2);

    let records = fixture.ldap_records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().any(|r| r["cn"] == "Old One"));
}

#[tokio::test]
async fn test_missing_destination_file_starts_empty() {
    let fixture = Fixture::new(HR, None);
    let config = SyncConfig::load(&fixture.config).unwrap();
    let runner = Runner::open(config, Overrides::default()).await.unwrap();
    assert!(runner.store("ldap").unwrap().is_empty().await);

    let reports = runner.run_passes(&all(), &[]).await.unwrap();
    assert_eq!(reports[0].counters.applied, 2);
    assert_eq!(fixture.ldap_records().len(), 2);
}

#[tokio::test]
async fn test_empty_source_exits_with_pass_failure() {
    let fixture = Fixture::new("[]", None);
    let config = SyncConfig::load(&fixture.config).unwrap();
    let runner = Runner::open(config, Overrides::default()).await.unwrap();

    let reports = runner.run_passes(&all(), &[]).await.unwrap();
    assert_eq!(reports[0].status, PassStatus::Failed);
    assert_eq!(exit_code(&reports), 2);
}

#[tokio::test]
async fn test_unknown_task_is_a_configuration_error() {
    let fixture = Fixture::new(HR, None);
    let config = SyncConfig::load(&fixture.config).unwrap();
    let runner = Runner::open(config, Overrides::default()).await.unwrap();

    let err = runner
        .run_passes(&["payroll".to_string()], &[])
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 1);
    assert!(err.to_string().contains("payroll"));
}

#[tokio::test]
async fn test_thread_override_is_validated() {
    let fixture = Fixture::new(HR, None);
    let config = SyncConfig::load(&fixture.config).unwrap();
    let overrides = Overrides {
        workers: Some(0),
        ..Overrides::default()
    };
    let runner = Runner::open(config, overrides).await.unwrap();

    let err = runner.run_passes(&all(), &[]).await.unwrap_err();
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn test_invalid_yaml_is_reported_with_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.yaml");
    std::fs::write(&path, "tasks: [unterminated").unwrap();

    let err = SyncConfig::load(&path).unwrap_err();
    assert_eq!(err.exit_code(), 1);
    assert!(err.to_string().contains("broken.yaml"));
}
