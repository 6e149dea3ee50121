use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn bars_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("bars");
    path
}

/// Write a small source file and a config pointing at it.
///
/// The store URL is a port nothing listens on, with a retry budget of one
/// and no delay, so anything that needs the store fails fast.
fn setup_test_env(extra_load: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let source = root.join("stock_data.csv");
    fs::write(
        &source,
        "Date,Close,High,Low,Open,Volume\n\
         2023-01-03,125.07,130.90,124.17,130.28,112117500\n\
         2023-01-04,126.36,128.66,125.08,126.89,89113600\n\
         not-a-date,126.36,127.77,124.76,127.13,80962700\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[store]
url = "http://127.0.0.1:1"
max_retries = 1
retry_delay_secs = 0
timeout_secs = 2

[index]
name = "stock_data"

[source]
path = "{}"

[load]
{}
"#,
        source.display(),
        extra_load
    );

    let config_path = config_dir.join("bars.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_bars(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = bars_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run bars binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_dry_run_reports_counts() {
    let (_tmp, config) = setup_test_env("");
    let (stdout, stderr, success) = run_bars(&config, &["load", "--dry-run"]);

    assert!(success, "dry run failed: {}", stderr);
    assert!(stdout.contains("load stock_data (dry-run)"));
    assert!(stdout.contains("rows read: 3"));
    assert!(stdout.contains("rows with unparseable date: 1"));
}

#[test]
fn test_dry_run_rejects_wrong_column_count() {
    let (tmp, config) = setup_test_env("");
    let bad = tmp.path().join("bad.csv");
    fs::write(&bad, "date,close,volume\n2023-01-03,1,2\n").unwrap();

    let (stdout, stderr, success) =
        run_bars(&config, &["load", "--dry-run", "--file", bad.to_str().unwrap()]);

    assert!(!success);
    assert!(!stdout.contains("rows read"));
    assert!(stderr.contains("expected 6 columns"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_batch_size_in_config() {
    let (_tmp, config) = setup_test_env("batch_size = 0");
    let (_stdout, stderr, success) = run_bars(&config, &["load", "--dry-run"]);

    assert!(!success);
    assert!(stderr.contains("batch_size"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_batch_size_flag() {
    let (_tmp, config) = setup_test_env("");
    let (_stdout, stderr, success) =
        run_bars(&config, &["load", "--dry-run", "--batch-size", "0"]);

    assert!(!success);
    assert!(stderr.contains("batch_size"), "stderr: {}", stderr);
}

#[test]
fn test_ping_unreachable_store_fails() {
    let (_tmp, config) = setup_test_env("");
    let (stdout, stderr, success) = run_bars(&config, &["ping"]);

    assert!(!success);
    assert!(!stdout.contains("ok"));
    assert!(stderr.contains("after 1 attempt(s)"), "stderr: {}", stderr);
}

#[test]
fn test_load_unreachable_store_fails_without_summary() {
    let (_tmp, config) = setup_test_env("");
    let (stdout, _stderr, success) = run_bars(&config, &["load", "--progress", "off"]);

    assert!(!success);
    assert!(!stdout.contains("documents attempted"));
    assert!(!stdout.contains("ok"));
}

#[test]
fn test_missing_config_file() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");
    let (_stdout, stderr, success) = run_bars(&missing, &["ping"]);

    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_index_name_rejected() {
    let (_tmp, config) = setup_test_env("");
    let (_stdout, _stderr, success) = run_bars(&config, &["query", "--index", "Bad Name"]);
    assert!(!success);
}

#[test]
fn test_query_limit_beyond_result_window() {
    let (_tmp, config) = setup_test_env("");
    let (_stdout, stderr, success) = run_bars(&config, &["query", "--limit", "20000"]);

    assert!(!success);
    assert!(stderr.contains("between 1 and 10000"), "stderr: {}", stderr);
    // Rejected before any connection attempt.
    assert!(!stderr.contains("after 1 attempt(s)"), "stderr: {}", stderr);
}
