use tempfile::tempdir;
use tournament_harness::calibration::{
    run_calibration, CalibrationConfig, CalibrationError, CalibrationStore, RhoBasis,
};
use tournament_harness::judge::{JudgeProfile, SimulatedOracle};
use tournament_harness::model::{CalibrationItem, Judge, Tier};
use tournament_harness::trace::MemoryAuditSink;

fn pack(per_tier: usize) -> Vec<CalibrationItem> {
    let mut items = Vec::new();
    for tier in [Tier::High, Tier::Mid, Tier::Low] {
        for i in 0..per_tier {
            items.push(CalibrationItem {
                item_id: format!("{}-{i:02}", tier.as_str()),
                text: format!("A {} tier abstract about electrolyte design, number {i}.", tier.as_str()),
                true_tier: tier,
            });
        }
    }
    items
}

fn oracle(items: &[CalibrationItem]) -> SimulatedOracle {
    SimulatedOracle::new(3)
        .with_calibration_items(items)
        .with_profile("oracle", JudgeProfile::perfect())
        .with_profile("coin", JudgeProfile::coin_flip())
        .with_profile(
            "first-slot",
            JudgeProfile {
                skill: 0.0,
                first_bias: 10.0,
                noise: 0.0,
                ..JudgeProfile::default()
            },
        )
        .with_profile(
            "offline",
            JudgeProfile {
                unavailable: true,
                ..JudgeProfile::default()
            },
        )
}

#[tokio::test]
async fn perfect_judge_normalizes_to_one_and_coin_flip_is_near_zero() {
    let items = pack(10);
    let judges = vec![Judge::new("oracle", "anthropic"), Judge::new("coin", "openai")];
    let config = CalibrationConfig {
        pairs_per_tier_pair: 60,
        ..CalibrationConfig::default()
    };
    let run = run_calibration(&oracle(&items), &judges, &items, &config, None, None)
        .await
        .unwrap();

    let report = run.report;
    let perfect = &report.judges["oracle"];
    assert_eq!(perfect.total_calls, 180);
    assert_eq!(perfect.accuracy, 1.0);
    assert!(perfect.position_bias.abs() < 1e-12);
    assert_eq!(perfect.rho, 1.0);
    assert_eq!(perfect.confidence, "high");

    let coin = &report.judges["coin"];
    assert!(coin.rho < 0.35, "coin-flip rho was {}", coin.rho);
    let max_rho = report.judges.values().map(|j| j.rho).fold(0.0_f64, f64::max);
    assert_eq!(max_rho, 1.0);
    assert_eq!(report.tier_pairs.len(), 3);
}

#[tokio::test]
async fn first_slot_judge_is_flagged_as_fully_biased() {
    let items = pack(6);
    let judges = vec![
        Judge::new("oracle", "anthropic"),
        Judge::new("first-slot", "google"),
    ];
    let run = run_calibration(
        &oracle(&items),
        &judges,
        &items,
        &CalibrationConfig::default(),
        None,
        None,
    )
    .await
    .unwrap();

    let biased = &run.report.judges["first-slot"];
    assert!((biased.position_bias - 1.0).abs() < 1e-12);
    assert_eq!(biased.rho, 0.0);
    // 30% of pairs show the weaker item first.
    assert!((biased.accuracy - 0.6667).abs() < 0.01);
}

#[tokio::test]
async fn raw_accuracy_basis_keeps_coin_flip_weight_positive() {
    let items = pack(6);
    let judges = vec![Judge::new("oracle", "anthropic"), Judge::new("coin", "openai")];
    let config = CalibrationConfig {
        rho_basis: RhoBasis::RawAccuracy,
        ..CalibrationConfig::default()
    };
    let run = run_calibration(&oracle(&items), &judges, &items, &config, None, None)
        .await
        .unwrap();
    assert_eq!(run.report.rho_basis, RhoBasis::RawAccuracy);
    assert_eq!(run.report.judges["oracle"].rho, 1.0);
    assert!(run.report.judges["coin"].rho > 0.0);
}

#[tokio::test]
async fn unavailable_judge_is_excluded_and_audited() {
    let items = pack(5);
    let judges = vec![Judge::new("oracle", "anthropic"), Judge::new("offline", "xai")];
    let audit = MemoryAuditSink::new();
    let run = run_calibration(
        &oracle(&items),
        &judges,
        &items,
        &CalibrationConfig::default(),
        None,
        Some(&audit),
    )
    .await
    .unwrap();

    assert_eq!(run.report.excluded, vec!["offline".to_string()]);
    assert!(!run.report.judges.contains_key("offline"));
    assert_eq!(run.dropped, 45);
    assert_eq!(audit.events().len(), 45);
    assert!(audit.events().iter().all(|e| e.stage == "calibration"));
    let eligible = run.report.eligible_judges(&judges);
    assert_eq!(eligible.len(), 1);
    assert_eq!(eligible[0].id, "oracle");
}

#[tokio::test]
async fn rerun_with_results_file_skips_completed_calls() {
    let dir = tempdir().unwrap();
    let store = CalibrationStore::new(dir.path().join("calibration.json"));
    let items = pack(5);
    let judges = vec![Judge::new("oracle", "anthropic"), Judge::new("coin", "openai")];
    let config = CalibrationConfig::default();
    let oracle = oracle(&items);

    let first = run_calibration(&oracle, &judges, &items, &config, Some(&store), None)
        .await
        .unwrap();
    assert_eq!(first.executed, 90);
    assert_eq!(first.skipped, 0);
    assert!(store.path().exists());

    let second = run_calibration(&oracle, &judges, &items, &config, Some(&store), None)
        .await
        .unwrap();
    assert_eq!(second.executed, 0);
    assert_eq!(second.skipped, 90);
    assert_eq!(first.report, second.report);
    assert_eq!(store.load().unwrap().unwrap().records.len(), 90);
}

#[tokio::test]
async fn results_file_from_another_plan_seed_is_rejected() {
    let dir = tempdir().unwrap();
    let store = CalibrationStore::new(dir.path().join("calibration.json"));
    let items = pack(5);
    let judges = vec![Judge::new("oracle", "anthropic")];
    let oracle = oracle(&items);

    run_calibration(&oracle, &judges, &items, &CalibrationConfig::default(), Some(&store), None)
        .await
        .unwrap();

    let reseeded = CalibrationConfig {
        plan_seed: 99,
        ..CalibrationConfig::default()
    };
    let err = run_calibration(&oracle, &judges, &items, &reseeded, Some(&store), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CalibrationError::SeedMismatch {
            expected: 99,
            found: 0
        }
    ));
}

#[tokio::test]
async fn empty_pool_is_an_error() {
    let items = pack(5);
    let err = run_calibration(&oracle(&items), &[], &items, &CalibrationConfig::default(), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CalibrationError::NoJudges));
}
