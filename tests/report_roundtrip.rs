use std::collections::BTreeMap;

use tempfile::tempdir;
use tournament_harness::bradley_terry::RatingState;
use tournament_harness::judge::SimulatedOracle;
use tournament_harness::ledger::LedgerStore;
use tournament_harness::model::{CalibrationItem, Candidate, Judge, Tier};
use tournament_harness::pipeline::{run_full, PipelineConfig, PipelineInputs, PipelineStores};
use tournament_harness::report::{ReportError, RunReport};

async fn sample_report(dir: &std::path::Path) -> RunReport {
    let candidates: Vec<Candidate> = (0..8)
        .map(|i| {
            Candidate::new(format!("p{i}"), format!("Porous electrode design number {i} for flow batteries"))
                .with_labels([if i % 2 == 0 { "electrodes" } else { "membranes" }])
        })
        .collect();
    let items: Vec<CalibrationItem> = [Tier::High, Tier::Mid, Tier::Low]
        .into_iter()
        .flat_map(|tier| {
            (0..5).map(move |i| CalibrationItem {
                item_id: format!("{}-{i}", tier.as_str()),
                text: format!("{} calibration text {i}", tier.as_str()),
                true_tier: tier,
            })
        })
        .collect();
    let judges = vec![
        Judge::new("opus", "anthropic"),
        Judge::new("gpt", "openai"),
        Judge::new("gemini", "google"),
    ];
    let oracle = SimulatedOracle::new(6)
        .with_candidates(&candidates)
        .with_calibration_items(&items);
    let ledger = LedgerStore::new(dir.join("ledger.json"));
    let evidence = BTreeMap::new();
    let failed = BTreeMap::new();

    run_full(
        &oracle,
        &PipelineInputs {
            candidates: &candidates,
            judges: &judges,
            calibration_items: &items,
            evidence: &evidence,
            failed_gates: &failed,
        },
        &PipelineStores {
            ledger: &ledger,
            calibration: None,
            archive: None,
            audit: None,
        },
        &PipelineConfig {
            seed: 31,
            ..PipelineConfig::default()
        },
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn saved_report_reloads_identically() {
    let dir = tempdir().unwrap();
    let report = sample_report(dir.path()).await;
    let path = dir.path().join("report.json");
    report.save(&path).unwrap();

    let loaded = RunReport::load(&path).unwrap();
    assert_eq!(loaded, report);
    assert_eq!(loaded.rating_state(), report.rating_state());
    assert_eq!(loaded.portfolio, report.portfolio);

    // Every theta survives bit for bit.
    let before = report.rating_state().unwrap();
    let after = loaded.rating_state().unwrap();
    for (id, theta) in &before.theta {
        assert_eq!(theta.to_bits(), after.theta[id].to_bits());
    }

    loaded.save(dir.path().join("again.json")).unwrap();
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        std::fs::read_to_string(dir.path().join("again.json")).unwrap()
    );
}

#[test]
fn awkward_floats_round_trip_exactly() {
    let mut state = RatingState::default();
    state.theta.insert("a".to_string(), 0.1 + 0.2);
    state.theta.insert("b".to_string(), -(0.1 + 0.2));
    state.theta.insert("c".to_string(), f64::MIN_POSITIVE);
    state.pi.insert("judge".to_string(), 1.0 / 3.0);

    let json = serde_json::to_string(&state).unwrap();
    let back: RatingState = serde_json::from_str(&json).unwrap();
    assert_eq!(back, state);
    assert_eq!(back.pi["judge"].to_bits(), (1.0f64 / 3.0).to_bits());
}

#[tokio::test]
async fn markdown_covers_each_stage() {
    let dir = tempdir().unwrap();
    let report = sample_report(dir.path()).await;
    let md = report.render_markdown();
    for heading in [
        "# Tournament Run Report",
        "## Calibration",
        "## Tournament",
        "## Ratings",
        "## Portfolio",
        "## Next-run channel weights",
    ] {
        assert!(md.contains(heading), "missing {heading}");
    }
    assert!(md.contains(&report.run_id.to_string()));
}

#[test]
fn missing_or_corrupt_reports_are_errors() {
    let dir = tempdir().unwrap();
    let missing = RunReport::load(dir.path().join("nope.json")).unwrap_err();
    assert!(matches!(missing, ReportError::Io { .. }));

    let bad = dir.path().join("bad.json");
    std::fs::write(&bad, "[1, 2").unwrap();
    let corrupt = RunReport::load(&bad).unwrap_err();
    assert!(matches!(corrupt, ReportError::Parse { .. }));
}
