//! End-to-end tests of the pattern-kb binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const KB_YAML: &str = r#"
meta:
  kb_version: 1.0.0
  schema_version: "2.0"
  symbol: BTCUSDT
  market: BTCUSDT_PERP
datasets:
  - id: ds_4h
    symbol: BTCUSDT
    market: BTCUSDT_PERP
    timeframe: 4h
    source: [binance]
    date_range: { start: "2023-01-01", end: "2024-01-01" }
    n_candles: 2190
    file_path: data/btc_4h.parquet
features:
  - name: rsi_14
    description: 14-period RSI
    dtype: float
    origin_level: candle
    formula: rsi(close, 14)
patterns:
  - id: p_long
    name: Oversold bounce
    description: RSI oversold then green candle
    window_length: 3
    timeframe: 4h
    type: forward
    conditions:
      - { feature: rsi_14, operator: "<", value: 30 }
    target: next_close_up
    dataset_used: ds_4h
    status: exploratory
    direction: long
    confidence: 0.64
  - id: p_nodir
    name: Directionless
    description: no declared direction
    window_length: 3
    timeframe: 4h
    type: backward
    target: next_close_up
    dataset_used: ds_4h
    status: active
    confidence: 0.90
"#;

const STATS_YAML: &str = r#"
patterns:
  - id: p_long
    support: 40
    lift: 1.5
    stability: 0.3
    win_rate: 0.61
  - id: p_nodir
    support: 12
    lift: 1.05
    stability: 0.05
"#;

fn workspace() -> (TempDir, std::path::PathBuf, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let kb = dir.path().join("kb.yaml");
    let stats = dir.path().join("perf.yaml");
    fs::write(&kb, KB_YAML).unwrap();
    fs::write(&stats, STATS_YAML).unwrap();
    (dir, kb, stats)
}

fn cmd() -> Command {
    Command::cargo_bin("pattern-kb").unwrap()
}

#[test]
fn test_validate_ok() {
    let (_dir, kb, _stats) = workspace();
    cmd()
        .arg("validate")
        .arg(&kb)
        .assert()
        .success()
        .stdout(predicate::str::contains("[OK]"))
        .stdout(predicate::str::contains("2 patterns"));
}

#[test]
fn test_validate_reports_every_violation_and_fails() {
    let dir = TempDir::new().unwrap();
    let kb = dir.path().join("kb.yaml");
    fs::write(
        &kb,
        KB_YAML.replace("dataset_used: ds_4h", "dataset_used: ds_missing"),
    )
    .unwrap();

    cmd()
        .arg("validate")
        .arg(&kb)
        .assert()
        .failure()
        .stderr(predicate::str::contains("2 integrity violation(s)"))
        .stderr(predicate::str::contains("p_long"))
        .stderr(predicate::str::contains("ds_missing"));
}

#[test]
fn test_validate_merges_fragments() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("10_base.yaml");
    let extra = dir.path().join("20_extra.yaml");
    fs::write(&base, KB_YAML).unwrap();
    fs::write(
        &extra,
        r#"
meta:
  kb_version: "1.0.0"
  schema_version: "2.0"
  symbol: BTCUSDT
  market: BTCUSDT_PERP
patterns:
  - id: p_extra
    name: Extra
    description: contributed by a fragment
    window_length: 2
    timeframe: 4h
    type: forward
    target: next_close_up
    status: exploratory
"#,
    )
    .unwrap();

    cmd()
        .arg("validate")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("3 patterns"));
}

#[test]
fn test_list_markets() {
    let (_dir, kb, _stats) = workspace();
    cmd()
        .arg("list-markets")
        .arg("--kb")
        .arg(&kb)
        .assert()
        .success()
        .stdout(predicate::str::contains("BTCUSDT_PERP"));
}

#[test]
fn test_list_timeframes() {
    let (_dir, kb, _stats) = workspace();
    cmd()
        .arg("list-timeframes")
        .arg("--kb")
        .arg(&kb)
        .arg("--market")
        .arg("BTCUSDT_PERP")
        .assert()
        .success()
        .stdout(predicate::str::contains("4h"));
}

#[test]
fn test_list_patterns_direction_filter_is_fail_closed() {
    let (_dir, kb, _stats) = workspace();
    cmd()
        .args(["list-patterns", "--market", "BTCUSDT_PERP", "--timeframe", "4h"])
        .arg("--kb")
        .arg(&kb)
        .arg("--direction")
        .arg("long")
        .assert()
        .success()
        .stdout(predicate::str::contains("p_long"))
        .stdout(predicate::str::contains("p_nodir").not());
}

#[test]
fn test_list_patterns_empty_result_is_success() {
    let (_dir, kb, _stats) = workspace();
    cmd()
        .args(["list-patterns", "--market", "SOLUSDT_PERP", "--timeframe", "4h"])
        .arg("--kb")
        .arg(&kb)
        .assert()
        .success()
        .stdout(predicate::str::contains("ID"));
}

#[test]
fn test_list_patterns_rejects_unknown_direction() {
    let (_dir, kb, _stats) = workspace();
    cmd()
        .args(["list-patterns", "--market", "BTCUSDT_PERP", "--timeframe", "4h"])
        .arg("--kb")
        .arg(&kb)
        .arg("--direction")
        .arg("sideways")
        .assert()
        .failure();
}

#[test]
fn test_classify_tiers_patterns() {
    let (_dir, kb, stats) = workspace();
    cmd()
        .arg("classify")
        .arg("--kb")
        .arg(&kb)
        .arg("--stats")
        .arg(&stats)
        .assert()
        .success()
        .stdout(predicate::str::contains("strong"))
        .stdout(predicate::str::contains("weak"));
}

#[test]
fn test_classify_json_output() {
    let (_dir, kb, stats) = workspace();
    let output = cmd()
        .arg("classify")
        .arg("--kb")
        .arg(&kb)
        .arg("--stats")
        .arg(&stats)
        .arg("--json")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let doc: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(doc["patterns"][0]["id"], "p_long");
    assert_eq!(doc["patterns"][0]["tier"], "strong");
    assert_eq!(doc["patterns"][1]["tier"], "weak");
    assert!(doc["families"].is_array());
}

#[test]
fn test_evolve_commits_bumped_version_and_history() {
    let (_dir, kb, stats) = workspace();
    cmd()
        .arg("evolve")
        .arg("--kb")
        .arg(&kb)
        .arg("--stats")
        .arg(&stats)
        .assert()
        .success()
        .stdout(predicate::str::contains("wave 2"));

    let evolved = fs::read_to_string(&kb).unwrap();
    assert!(evolved.contains("kb_version: 1.0.1"));
    assert!(evolved.contains("status_history"));
    // The strong pattern climbed the whole ladder.
    assert!(evolved.contains("new_status: active"));
}

#[test]
fn test_evolve_with_out_leaves_input_untouched() {
    let (dir, kb, stats) = workspace();
    let out = dir.path().join("evolved.yaml");
    cmd()
        .arg("evolve")
        .arg("--kb")
        .arg(&kb)
        .arg("--stats")
        .arg(&stats)
        .arg("--out")
        .arg(&out)
        .assert()
        .success();

    assert!(fs::read_to_string(&kb).unwrap().contains("kb_version: 1.0.0"));
    assert!(fs::read_to_string(&out).unwrap().contains("kb_version: 1.0.1"));

    // The written artifact went through the same validate-then-write
    // discipline as an in-place commit, so it must validate standalone.
    cmd()
        .arg("validate")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("[OK]"));
}

#[test]
fn test_bump_records_reason() {
    let (_dir, kb, _stats) = workspace();
    cmd()
        .arg("bump")
        .arg("--kb")
        .arg(&kb)
        .args(["--level", "minor", "--reason", "schema cleanup"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1.1.0"));

    let bumped = fs::read_to_string(&kb).unwrap();
    assert!(bumped.contains("kb_version: 1.1.0"));
    assert!(bumped.contains("schema cleanup"));
}
