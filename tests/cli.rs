use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

fn qstore_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("qstore");
    path
}

const BILLING_REPORT: &str = "# Billing API\n\n\
Logging: request handlers log at debug level only, so production incidents \
leave no trace. Correlation ids are not propagated to the ledger worker.\n\n\
Error handling: the invoice exporter swallows IO errors and reports success.\n\n\
Availability: outbound calls to the tax service have no timeout configured.";

const SEARCH_REPORT: &str = "# Search Service\n\n\
Availability: the index rebuild blocks all readers for several minutes. \
Health checks do not cover the shard coordinator.\n\n\
Retries against the cluster use a fixed interval without jitter.";

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let reports = root.join("reports");
    fs::create_dir_all(&reports).unwrap();
    fs::write(reports.join("billing-api.md"), BILLING_REPORT).unwrap();
    fs::write(reports.join("search.md"), SEARCH_REPORT).unwrap();

    let config_content = format!(
        r#"[store]
path = "{}/db"
collection = "cli_tests"

[chunking]
max_chars = 160
overlap_chars = 24

[retrieval]
top_k = 5
min_score = 0.05

[embedding]
provider = "hashing"
dims = 256
"#,
        root.display()
    );

    let config_path = config_dir.join("qstore.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_qstore(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = qstore_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("QSTORE_DB_DIR")
        .env_remove("QSTORE_COLLECTION")
        .env_remove("QSTORE_EMBEDDING_MODEL")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run qstore binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn report_path(config_path: &Path, name: &str) -> String {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("reports")
        .join(name)
        .display()
        .to_string()
}

#[test]
fn test_init_is_idempotent() {
    let (tmp, config) = setup_test_env();

    let (stdout, stderr, ok) = run_qstore(&config, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(stdout.contains("cli_tests"));
    assert!(tmp.path().join("db/quality_store.sqlite").exists());

    let (_, stderr, ok) = run_qstore(&config, &["init"]);
    assert!(ok, "second init failed: {}", stderr);
}

#[test]
fn test_store_get_roundtrip() {
    let (_tmp, config) = setup_test_env();
    let billing = report_path(&config, "billing-api.md");

    let (stdout, stderr, ok) = run_qstore(
        &config,
        &[
            "store", &billing, "--app-id", "billing", "--focus", "all", "--meta", "team=payments",
        ],
    );
    assert!(ok, "store failed: {}", stderr);
    assert!(stdout.contains("Stored billing (billing-api)"));

    let (stdout, stderr, ok) = run_qstore(&config, &["get", "billing", "--json"]);
    assert!(ok, "get failed: {}", stderr);
    let stored: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(stored["text"], BILLING_REPORT);
    assert_eq!(stored["metadata"]["app_name"], "billing-api");
    assert_eq!(stored["metadata"]["extra"]["team"], "payments");
    assert!(stored["chunk_count"].as_u64().unwrap() > 1);
}

#[test]
fn test_store_replaces_previous_report() {
    let (tmp, config) = setup_test_env();
    let billing = report_path(&config, "billing-api.md");
    run_qstore(&config, &["store", &billing, "--app-id", "billing"]);

    let short = tmp.path().join("reports/short.md");
    fs::write(&short, "Nothing to report.").unwrap();
    let (stdout, stderr, ok) = run_qstore(
        &config,
        &["store", short.to_str().unwrap(), "--app-id", "billing", "--app-name", "Billing"],
    );
    assert!(ok, "restore failed: {}", stderr);
    assert!(stdout.contains("replaced"));

    let (stdout, _, ok) = run_qstore(&config, &["get", "billing"]);
    assert!(ok);
    assert!(stdout.contains("Nothing to report."));
    assert!(!stdout.contains("invoice exporter"));
    assert!(stdout.contains("chunks:       1"));
}

#[test]
fn test_store_from_stdin() {
    let (_tmp, config) = setup_test_env();

    let mut child = Command::new(qstore_binary())
        .arg("--config")
        .arg(config.to_str().unwrap())
        .args(["store", "-", "--app-id", "piped", "--app-name", "Piped"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"Report delivered over stdin.")
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let (stdout, _, ok) = run_qstore(&config, &["get", "piped"]);
    assert!(ok);
    assert!(stdout.contains("Report delivered over stdin."));
}

#[test]
fn test_query_ranks_and_filters() {
    let (_tmp, config) = setup_test_env();
    let billing = report_path(&config, "billing-api.md");
    let search = report_path(&config, "search.md");
    run_qstore(
        &config,
        &["store", &billing, "--app-id", "billing", "--focus", "logging", "--focus", "error_handling"],
    );
    run_qstore(
        &config,
        &["store", &search, "--app-id", "search", "--focus", "availability"],
    );

    let (stdout, stderr, ok) = run_qstore(
        &config,
        &["query", "invoice exporter swallows IO errors", "--json"],
    );
    assert!(ok, "query failed: {}", stderr);
    let hits: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0]["app_id"], "billing");
    let ids: Vec<&str> = hits.iter().map(|h| h["app_id"].as_str().unwrap()).collect();
    let mut dedup = ids.clone();
    dedup.sort();
    dedup.dedup();
    assert_eq!(ids.len(), dedup.len(), "one hit per app");

    let (stdout, _, ok) = run_qstore(
        &config,
        &["query", "invoice exporter swallows IO errors", "--focus", "availability", "--json"],
    );
    assert!(ok);
    let hits: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert!(hits.iter().all(|h| h["app_id"] == "search"));

    let (stdout, _, ok) = run_qstore(&config, &["query", "shard coordinator", "--limit", "1"]);
    assert!(ok);
    assert!(stdout.starts_with("1. ["));
    assert!(!stdout.contains("\n2. ["));
}

#[test]
fn test_query_empty_store() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_qstore(&config, &["query", "anything"]);
    assert!(ok, "query failed: {}", stderr);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_apps_and_delete() {
    let (_tmp, config) = setup_test_env();
    let billing = report_path(&config, "billing-api.md");
    let search = report_path(&config, "search.md");
    run_qstore(&config, &["store", &search, "--app-id", "search", "--app-name", "Search"]);
    run_qstore(&config, &["store", &billing, "--app-id", "billing", "--app-name", "Billing"]);

    let (stdout, _, ok) = run_qstore(&config, &["apps"]);
    assert!(ok);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines, vec!["billing\tBilling", "search\tSearch"]);

    let (stdout, stderr, ok) = run_qstore(&config, &["delete", "billing"]);
    assert!(ok, "delete failed: {}", stderr);
    assert!(stdout.contains("Deleted billing"));

    let (stdout, _, _) = run_qstore(&config, &["apps"]);
    assert!(!stdout.contains("billing"));

    let (_, stderr, ok) = run_qstore(&config, &["delete", "billing"]);
    assert!(!ok);
    assert!(stderr.contains("no analysis found"));
}

#[test]
fn test_get_unknown_app_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_qstore(&config, &["get", "nope"]);
    assert!(!ok);
    assert!(stderr.contains("no analysis found for app_id: nope"));
}

#[test]
fn test_invalid_focus_is_rejected() {
    let (_tmp, config) = setup_test_env();
    let billing = report_path(&config, "billing-api.md");
    let (_, stderr, ok) = run_qstore(&config, &["store", &billing, "--focus", "security"]);
    assert!(!ok);
    assert!(stderr.contains("unknown focus area"));
}

#[test]
fn test_bad_collection_name_is_configuration_error() {
    let (_tmp, config) = setup_test_env();
    let content = fs::read_to_string(&config)
        .unwrap()
        .replace("collection = \"cli_tests\"", "collection = \"bad-name\"");
    fs::write(&config, content).unwrap();

    let (_, stderr, ok) = run_qstore(&config, &["apps"]);
    assert!(!ok);
    assert!(stderr.contains("collection name"));
}
