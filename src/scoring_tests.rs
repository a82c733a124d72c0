use super::*;

fn stats(support: u64, lift: f64, stability: f64) -> PatternStats {
    PatternStats {
        support,
        lift: Some(lift),
        stability: Some(stability),
        ..PatternStats::default()
    }
}

#[test]
fn test_classify_strong() {
    let cfg = ScoringConfig::default();
    assert_eq!(classify(&stats(40, 1.40, 0.30), &cfg), TierOutcome::Strong);
    // Exactly at the cuts is still strong.
    assert_eq!(classify(&stats(30, 1.35, 0.25), &cfg), TierOutcome::Strong);
}

#[test]
fn test_classify_weak() {
    let cfg = ScoringConfig::default();
    assert_eq!(classify(&stats(10, 1.10, 0.10), &cfg), TierOutcome::Weak);
}

#[test]
fn test_classify_medium_band() {
    let cfg = ScoringConfig::default();
    // All three within 15% of the strong cuts but not at them.
    assert_eq!(classify(&stats(26, 1.20, 0.22), &cfg), TierOutcome::Medium);
    // One dimension outside the band drops it to weak.
    assert_eq!(classify(&stats(26, 1.00, 0.22), &cfg), TierOutcome::Weak);
}

#[test]
fn test_classify_too_rare() {
    let cfg = ScoringConfig::default();
    assert_eq!(classify(&stats(5, 2.0, 0.9), &cfg), TierOutcome::TooRare);
}

#[test]
fn test_classify_no_signal_on_missing_stats() {
    let cfg = ScoringConfig::default();
    let missing = PatternStats {
        support: 100,
        lift: None,
        stability: Some(0.5),
        ..PatternStats::default()
    };
    assert_eq!(classify(&missing, &cfg), TierOutcome::NoSignal);
}

#[test]
fn test_tier_display_and_flags() {
    assert_eq!(TierOutcome::TooRare.to_string(), "too_rare");
    assert!(TierOutcome::Strong.is_strong());
    assert!(!TierOutcome::Strong.needs_remining());
    // Every non-strong tier goes back to the miner, including the
    // unscored tags that only new evidence can move.
    for tier in [
        TierOutcome::Medium,
        TierOutcome::Weak,
        TierOutcome::TooRare,
        TierOutcome::NoSignal,
    ] {
        assert!(tier.needs_remining());
    }
}

#[test]
fn test_accuracy_buckets() {
    assert_eq!(accuracy_bucket(0.85), AccuracyBucket::VeryStrong);
    assert_eq!(accuracy_bucket(0.80), AccuracyBucket::VeryStrong);
    assert_eq!(accuracy_bucket(0.79), AccuracyBucket::Strong);
    assert_eq!(accuracy_bucket(0.60), AccuracyBucket::Strong);
    assert_eq!(accuracy_bucket(0.57), AccuracyBucket::Medium);
    assert_eq!(accuracy_bucket(0.53), AccuracyBucket::Weak);
    assert_eq!(accuracy_bucket(0.50), AccuracyBucket::VeryWeak);
}

#[test]
fn test_directional_win_rate_honors_expected_direction() {
    let outcomes = [Move::Down, Move::Down, Move::Up, Move::Flat];
    // Flat is excluded from the effective sample.
    let short = directional_win_rate(&outcomes, Direction::Short).unwrap();
    assert!((short - 2.0 / 3.0).abs() < 1e-12);
    let long = directional_win_rate(&outcomes, Direction::Long).unwrap();
    assert!((long - 1.0 / 3.0).abs() < 1e-12);
}

#[test]
fn test_directional_win_rate_edge_cases() {
    assert_eq!(
        directional_win_rate(&[Move::Flat, Move::Flat], Direction::Long),
        None
    );
    assert_eq!(directional_win_rate(&[], Direction::Short), None);
    assert_eq!(
        directional_win_rate(&[Move::Up], Direction::FilterOnly),
        None
    );
}

#[test]
fn test_family_score_formula() {
    let expected = 0.5 * 0.2 + 0.3 * 1001f64.ln() + 0.2 * 0.9;
    let base = family_score(1.2, 1000.0, 0.9, false);
    assert!((base - expected).abs() < 1e-9);
    let boosted = family_score(1.2, 1000.0, 0.9, true);
    assert!((boosted - expected * 1.10).abs() < 1e-9);
}

#[test]
fn test_family_score_clamps_negative_terms() {
    // Lift below 1 and negative stability contribute nothing.
    let score = family_score(0.8, 10.0, -0.4, false);
    let expected = 0.3 * 11f64.ln();
    assert!((score - expected).abs() < 1e-9);
}

fn fixture_patterns() -> Vec<PatternRule> {
    serde_yaml::from_str(
        r#"
- id: p1
  name: Fast long
  description: first family member
  window_length: 3
  timeframe: 4h
  type: forward
  target: next_close_up
  status: active
- id: p2
  name: Fast long variant
  description: second family member
  window_length: 3
  timeframe: 4h
  type: forward
  target: next_close_up
  status: candidate
- id: p3
  name: Slow short
  description: separate family
  window_length: 8
  timeframe: 4h
  type: backward
  target: next_close_down
  status: exploratory
- id: p4
  name: Unevaluated
  description: no stats yet
  window_length: 3
  timeframe: 1d
  type: forward
  target: next_close_up
  status: exploratory
"#,
    )
    .expect("valid pattern yaml")
}

fn fixture_index() -> StatsIndex {
    let mut index = StatsIndex::new();
    index.insert("p1", stats(40, 1.50, 0.30));
    index.insert("p2", stats(26, 1.30, 0.20));
    index.insert("p3", stats(15, 1.05, 0.05));
    index
}

#[test]
fn test_score_families_groups_and_aggregates() {
    let patterns = fixture_patterns();
    let index = fixture_index();
    let families = score_families(&patterns, &index, &ScoringConfig::default());

    // p4 has no stats, so only two families form.
    assert_eq!(families.len(), 2);
    let top = &families[0];
    assert_eq!(top.key.to_string(), "4h/forward/w3");
    assert_eq!(top.members, 2);
    assert_eq!(top.agg_support, 66);
    assert!((top.agg_lift - 1.40).abs() < 1e-12);
    assert!((top.agg_stability - 0.25).abs() < 1e-12);
    assert_eq!(top.tier, TierOutcome::Strong);

    // Sorted by score descending.
    assert!(families[0].score > families[1].score);
    assert_eq!(families[1].key.to_string(), "4h/backward/w8");
}

#[test]
fn test_score_patterns_preserves_order_and_tags_missing() {
    let patterns = fixture_patterns();
    let index = fixture_index();
    let scores = score_patterns(&patterns, &index, &ScoringConfig::default());

    let ids: Vec<&str> = scores.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["p1", "p2", "p3", "p4"]);
    assert_eq!(scores[0].tier, TierOutcome::Strong);
    assert_eq!(scores[1].tier, TierOutcome::Medium);
    assert_eq!(scores[2].tier, TierOutcome::Weak);
    assert_eq!(scores[3].tier, TierOutcome::NoSignal);
    assert!(scores[0].score.is_some());
    assert!(scores[3].score.is_none());
}

#[test]
fn test_strong_pattern_score_carries_boost() {
    let patterns = fixture_patterns();
    let index = fixture_index();
    let scores = score_patterns(&patterns, &index, &ScoringConfig::default());

    let expected = family_score(1.50, 40.0, 0.30, true);
    assert!((scores[0].score.unwrap() - expected).abs() < 1e-9);
}

#[test]
fn test_stats_index_load() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("perf.yaml");
    std::fs::write(
        &path,
        r#"
meta:
  generated_at: "2024-06-01"
patterns:
  - id: p1
    support: 40
    lift: 1.5
    stability: 0.3
    win_rate: 0.61
  - id: p2
    support: 8
"#,
    )
    .unwrap();

    let index = StatsIndex::load(&path).unwrap();
    assert_eq!(index.len(), 2);
    let p1 = index.get("p1").unwrap();
    assert_eq!(p1.support, 40);
    assert_eq!(p1.lift, Some(1.5));
    assert_eq!(p1.win_rate, Some(0.61));
    // Missing fields are tolerated and surface later as no_signal.
    let p2 = index.get("p2").unwrap();
    assert_eq!(p2.lift, None);
    assert!(index.get("p9").is_none());
}
