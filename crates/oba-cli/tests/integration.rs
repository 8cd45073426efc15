#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn oba(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("oba").unwrap();
    cmd.current_dir(dir.path())
        .env("OBA_ROOT", dir.path())
        .env_remove("OBA_API_KEY")
        .env_remove("RUST_LOG");
    cmd
}

fn init_region(dir: &TempDir, rest_url: &str, obaco_url: Option<&str>) {
    let mut cmd = oba(dir);
    cmd.args(["init", "--name", "Test", "--api-key", "TEST", "--rest-url", rest_url]);
    if let Some(url) = obaco_url {
        cmd.args(["--obaco-url", url]);
    }
    cmd.assert().success();
}

fn read_json(bytes: &[u8]) -> serde_json::Value {
    serde_json::from_slice(bytes).expect("stdout is JSON")
}

// ---------------------------------------------------------------------------
// oba init
// ---------------------------------------------------------------------------

#[test]
fn init_writes_config() {
    let dir = TempDir::new().unwrap();
    oba(&dir)
        .args(["init", "--rest-url", "https://api.example.test", "--api-key", "K"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized"));

    let config = std::fs::read_to_string(dir.path().join("config.yaml")).unwrap();
    assert!(config.contains("rest_base_url: https://api.example.test"));
    assert!(config.contains("app_uid:"));
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let dir = TempDir::new().unwrap();
    init_region(&dir, "https://api.example.test", None);

    oba(&dir)
        .args(["init", "--rest-url", "https://other.example.test"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already initialized"));

    oba(&dir)
        .args(["init", "--rest-url", "https://other.example.test", "--force"])
        .assert()
        .success();
    let config = std::fs::read_to_string(dir.path().join("config.yaml")).unwrap();
    assert!(config.contains("other.example.test"));
}

#[test]
fn init_rejects_unusable_url() {
    let dir = TempDir::new().unwrap();
    oba(&dir)
        .args(["init", "--rest-url", "ftp://nope", "--api-key", "K"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported scheme"));
    assert!(!dir.path().join("config.yaml").exists());
}

// ---------------------------------------------------------------------------
// oba config
// ---------------------------------------------------------------------------

#[test]
fn config_commands_need_init() {
    let dir = TempDir::new().unwrap();
    oba(&dir)
        .args(["config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

#[test]
fn config_show_masks_api_key() {
    let dir = TempDir::new().unwrap();
    oba(&dir)
        .args([
            "init",
            "--rest-url",
            "https://api.example.test",
            "--api-key",
            "SECRETKEY",
        ])
        .assert()
        .success();

    let out = oba(&dir).args(["--json", "config", "show"]).output().unwrap();
    assert!(out.status.success());
    let json = read_json(&out.stdout);
    assert_eq!(json["api_key"], "SECR…");
    assert_eq!(json["region"]["rest_base_url"], "https://api.example.test");
}

#[test]
fn config_validate_reports_warnings() {
    let dir = TempDir::new().unwrap();
    oba(&dir)
        .args(["init", "--rest-url", "https://api.example.test"])
        .assert()
        .success();
    oba(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[warning] api_key is empty"));
}

// ---------------------------------------------------------------------------
// oba alerts
// ---------------------------------------------------------------------------

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn mock_backend(server: &mut mockito::Server) -> Vec<mockito::Mock> {
    let start = now_ms();
    vec![
        server
            .mock("GET", "/api/where/agencies-with-coverage.json")
            .match_query(mockito::Matcher::UrlEncoded("key".into(), "TEST".into()))
            .with_body(
                r#"{"code":200,"data":{"list":[{"agencyId":"1"}],"references":{"agencies":[{"id":"1","name":"Metro"}]}}}"#,
            )
            .create(),
        server
            .mock("GET", "/api/where/alerts-for-agency/1.json")
            .match_query(mockito::Matcher::Any)
            .with_body(format!(
                r#"{{"code":200,"data":{{"list":[
                    {{"id":"1_1","severity":"SEVERE","summary":{{"value":"Bridge closed"}},"activeWindows":[{{"from":{start},"to":0}}]}},
                    {{"id":"1_2","severity":"INFO","summary":{{"value":"New schedule"}},"activeWindows":[{{"from":{start},"to":0}}]}}
                ]}}}}"#
            ))
            .create(),
        server
            .mock("GET", "/api/v1/regions/1/alerts.json")
            .match_query(mockito::Matcher::Any)
            .with_body(r#"[{"id":"ob-1","agency_id":"1","severity":"warning","title":"Snow routes"}]"#)
            .create(),
    ]
}

#[test]
fn alerts_check_prints_unread_high_severity() {
    let mut server = mockito::Server::new();
    let _mocks = mock_backend(&mut server);
    let dir = TempDir::new().unwrap();
    init_region(&dir, &server.url(), Some(&server.url()));

    oba(&dir)
        .args(["alerts", "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1_1"))
        .stdout(predicate::str::contains("Bridge closed"))
        .stdout(predicate::str::contains("1_2").not());
}

#[test]
fn alerts_check_all_view_as_json() {
    let mut server = mockito::Server::new();
    let _mocks = mock_backend(&mut server);
    let dir = TempDir::new().unwrap();
    init_region(&dir, &server.url(), Some(&server.url()));

    let out = oba(&dir)
        .args(["--json", "alerts", "check", "--view", "all"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let json = read_json(&out.stdout);
    assert_eq!(json["region"], "Test");
    assert_eq!(json["agencies"], 1);
    let mut ids: Vec<&str> = json["alerts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["alert"]["id"].as_str().unwrap())
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["1_1", "1_2", "ob-1"]);
    assert!(json["failure"].is_null());
}

#[test]
fn mark_read_hides_alert_from_unread_view() {
    let mut server = mockito::Server::new();
    let _mocks = mock_backend(&mut server);
    let dir = TempDir::new().unwrap();
    init_region(&dir, &server.url(), None);

    oba(&dir)
        .args(["alerts", "mark-read", "1_1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Marked read: 1_1"));
    oba(&dir)
        .args(["alerts", "mark-read", "1_1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Already read."));

    let prefs = std::fs::read_to_string(dir.path().join("preferences.json")).unwrap();
    assert!(prefs.contains("1_1"));

    oba(&dir)
        .args(["alerts", "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No alerts."));
    oba(&dir)
        .args(["alerts", "check", "--view", "recent"])
        .assert()
        .success()
        .stdout(predicate::str::contains("read"));
}

#[test]
fn agency_lookup_failure_fails_the_check() {
    let mut server = mockito::Server::new();
    let _m = server
        .mock("GET", "/api/where/agencies-with-coverage.json")
        .match_query(mockito::Matcher::Any)
        .with_status(500)
        .create();
    let dir = TempDir::new().unwrap();
    init_region(&dir, &server.url(), None);

    oba(&dir)
        .args(["alerts", "check"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to fetch agencies"))
        .stderr(predicate::str::contains("HTTP 500"));
}

#[test]
fn provider_failure_is_a_warning() {
    let mut server = mockito::Server::new();
    let _mocks = mock_backend(&mut server);
    let _down = server
        .mock("GET", "/down/api/v1/regions/1/alerts.json")
        .match_query(mockito::Matcher::Any)
        .with_status(503)
        .create();
    let dir = TempDir::new().unwrap();
    let obaco = format!("{}/down/", server.url());
    init_region(&dir, &server.url(), Some(&obaco));

    oba(&dir)
        .args(["alerts", "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1_1"))
        .stderr(predicate::str::contains("warning: obaco alerts unavailable"));
}

#[test]
fn test_alerts_flag_persists() {
    let dir = TempDir::new().unwrap();
    oba(&dir)
        .args(["alerts", "test-alerts"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Regional test alerts: off"));
    oba(&dir)
        .args(["alerts", "test-alerts", "on"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Regional test alerts: on"));

    let out = oba(&dir)
        .args(["--json", "alerts", "test-alerts"])
        .output()
        .unwrap();
    assert_eq!(read_json(&out.stdout)["display_regional_test_alerts"], true);
}
