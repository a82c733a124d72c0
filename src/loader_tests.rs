use super::*;
use crate::error::KbError;
use std::fs;
use tempfile::TempDir;

const META: &str = r#"
meta:
  kb_version: "1.0.0"
  schema_version: "2.0"
  symbol: BTCUSDT
  market: BTCUSDT_PERP
"#;

fn pattern_fragment(id: &str) -> String {
    format!(
        r#"{META}
patterns:
  - id: {id}
    name: Demo
    description: demo pattern
    window_length: 3
    timeframe: 4h
    type: forward
    target: next_close_up
    status: exploratory
"#
    )
}

fn write_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_read_document_attaches_path_on_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "broken.yaml", "meta: [not, a, mapping]");
    match read_document(&path) {
        Err(KbError::Parse { path: p, .. }) => assert_eq!(p, path),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn test_read_document_io_error() {
    match read_document(Path::new("/nonexistent/kb.yaml")) {
        Err(KbError::Io { .. }) => {}
        other => panic!("expected i/o error, got {other:?}"),
    }
}

#[test]
fn test_merge_first_meta_wins_and_sections_concatenate() {
    let first: KnowledgeBase = serde_yaml::from_str(&pattern_fragment("p1")).unwrap();
    let mut second: KnowledgeBase = serde_yaml::from_str(&pattern_fragment("p2")).unwrap();
    second.meta.kb_version = "9.9.9".to_string();

    let merged = merge_fragments(vec![first, second]).unwrap();
    assert_eq!(merged.meta.kb_version, "1.0.0");
    let ids: Vec<&str> = merged.patterns.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["p1", "p2"]);
}

#[test]
fn test_merge_rejects_schema_mismatch() {
    let first: KnowledgeBase = serde_yaml::from_str(&pattern_fragment("p1")).unwrap();
    let mut second: KnowledgeBase = serde_yaml::from_str(&pattern_fragment("p2")).unwrap();
    second.meta.schema_version = "3.0".to_string();

    match merge_fragments(vec![first, second]) {
        Err(KbError::SchemaMismatch { found }) => {
            assert_eq!(found, vec!["2.0".to_string(), "3.0".to_string()]);
        }
        other => panic!("expected schema mismatch, got {other:?}"),
    }
}

#[test]
fn test_merge_of_nothing_fails() {
    assert!(matches!(
        merge_fragments(vec![]),
        Err(KbError::NoFragments { .. })
    ));
}

#[test]
fn test_load_rejects_duplicate_across_fragments() {
    let dir = TempDir::new().unwrap();
    let a = write_file(&dir, "a.yaml", &pattern_fragment("p1"));
    let b = write_file(&dir, "b.yaml", &pattern_fragment("p1"));
    match load(&[a, b]) {
        Err(KbError::Integrity { violations }) => {
            assert_eq!(violations.len(), 1);
            assert!(violations[0].to_string().contains("p1"));
        }
        other => panic!("expected integrity failure, got {other:?}"),
    }
}

#[test]
fn test_load_dir_merges_sorted_fragments() {
    let dir = TempDir::new().unwrap();
    // Written out of order; load_dir must sort by file name.
    write_file(&dir, "20_more.yaml", &pattern_fragment("p2"));
    write_file(&dir, "10_base.yaml", &pattern_fragment("p1"));
    write_file(&dir, "notes.txt", "not a fragment");

    let kb = load_dir(dir.path()).unwrap();
    let ids: Vec<&str> = kb.patterns.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["p1", "p2"]);
}

#[test]
fn test_load_dir_without_fragments_fails() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        load_dir(dir.path()),
        Err(KbError::NoFragments { .. })
    ));
}

#[test]
fn test_load_path_dispatches_on_kind() {
    let dir = TempDir::new().unwrap();
    let file = write_file(&dir, "kb.yaml", &pattern_fragment("p1"));
    assert!(load_path(&file).is_ok());
    assert!(load_path(dir.path()).is_ok());
}

#[test]
fn test_write_atomic_round_trip() {
    let dir = TempDir::new().unwrap();
    let kb: KnowledgeBase = serde_yaml::from_str(&pattern_fragment("p1")).unwrap();
    let path = dir.path().join("kb.yaml");

    write_atomic(&path, &kb).unwrap();
    let reloaded = read_document(&path).unwrap();
    assert_eq!(kb, reloaded);
    // No temp file left behind.
    assert!(!path.with_extension("yaml.tmp").exists());
}
