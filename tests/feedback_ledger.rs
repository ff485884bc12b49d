use std::collections::BTreeMap;

use tempfile::tempdir;
use tournament_harness::channel::Channel;
use tournament_harness::feedback::{run_feedback, CandidateOutcome, FeedbackConfig};
use tournament_harness::ledger::{ChannelLedger, ChannelRecord, LedgerError, LedgerStore};

fn outcome(id: &str, channel: Channel, percentile: Option<f64>, gates_passed: bool) -> CandidateOutcome {
    CandidateOutcome {
        candidate_id: id.to_string(),
        channel,
        gates_passed,
        failed_gates: if gates_passed {
            Vec::new()
        } else {
            vec!["length".to_string()]
        },
        rank: percentile.map(|_| 1),
        percentile,
        insufficient_evidence: percentile.is_none(),
    }
}

fn mixed_run() -> Vec<CandidateOutcome> {
    let mut out = Vec::new();
    for i in 0..5 {
        out.push(outcome(&format!("g{i}"), Channel::GraphExplorer, Some(0.9), true));
        out.push(outcome(&format!("a{i}"), Channel::AnalogyTransfer, Some(0.1), true));
    }
    out
}

#[test]
fn all_success_channel_outranks_all_failure_channel() {
    let dir = tempdir().unwrap();
    let store = LedgerStore::new(dir.path().join("ledger.json"));
    let report = run_feedback(&store, &mixed_run(), &FeedbackConfig::default()).unwrap();

    let after = &report.posterior_mean_after;
    assert!(after[&Channel::GraphExplorer] > after[&Channel::AnalogyTransfer]);
    assert_eq!(
        report.posterior_mean_before[&Channel::GraphExplorer],
        report.posterior_mean_before[&Channel::AnalogyTransfer]
    );
    assert_eq!(report.tallies[&Channel::GraphExplorer].successes, 5);
    assert_eq!(
        report.tallies[&Channel::AnalogyTransfer].failure_reasons["tournament_bottom"],
        5
    );
    assert!(report.recommendation.contains("graph_explorer"));

    let on_disk = store.load().unwrap();
    assert_eq!(on_disk, report.ledger);
    assert_eq!(on_disk.record(Channel::GraphExplorer).successes, 5);
    assert_eq!(on_disk.record(Channel::AnalogyTransfer).failures, 5);
}

#[test]
fn counts_accumulate_across_runs_and_unknown_channels_survive() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    let mut seeded = ChannelLedger::default();
    seeded.channels.insert(
        "retired_channel".to_string(),
        ChannelRecord {
            successes: 2,
            failures: 7,
            failure_reasons: BTreeMap::new(),
        },
    );
    let store = LedgerStore::new(&path);
    store.commit(&seeded).unwrap();

    run_feedback(&store, &mixed_run(), &FeedbackConfig::default()).unwrap();
    let second = run_feedback(&store, &mixed_run(), &FeedbackConfig { seed: 1, ..FeedbackConfig::default() })
        .unwrap();

    assert_eq!(second.ledger.record(Channel::GraphExplorer).successes, 10);
    assert_eq!(second.ledger.record(Channel::AnalogyTransfer).failures, 10);
    assert_eq!(second.ledger.channels["retired_channel"].failures, 7);
    assert_eq!(store.load().unwrap().channels["retired_channel"].successes, 2);
}

#[test]
fn next_weights_respect_the_exploration_floor() {
    let dir = tempdir().unwrap();
    let store = LedgerStore::new(dir.path().join("ledger.json"));
    let mut history = Vec::new();
    for i in 0..40 {
        history.push(outcome(&format!("e{i}"), Channel::ExploitRefiner, Some(1.0), true));
        history.push(outcome(&format!("c{i}"), Channel::ConstraintInjection, None, false));
    }
    run_feedback(&store, &history, &FeedbackConfig::default()).unwrap();
    let report = run_feedback(&store, &[], &FeedbackConfig::default()).unwrap();

    let total: f64 = report.next_weights.values().sum();
    assert!((total - 1.0).abs() < 1e-9);
    assert_eq!(report.next_weights.len(), Channel::ALL.len());
    for (channel, w) in &report.next_weights {
        assert!(*w >= 0.10 - 1e-12, "{channel} fell to {w}");
    }
    assert!(
        report.next_weights[&Channel::ExploitRefiner] > report.next_weights[&Channel::ConstraintInjection]
    );
}

#[test]
fn gate_failures_are_tallied_by_gate_name() {
    let dir = tempdir().unwrap();
    let store = LedgerStore::new(dir.path().join("ledger.json"));
    let outcomes = vec![outcome("x", Channel::ConstraintInjection, Some(1.0), false)];
    let report = run_feedback(&store, &outcomes, &FeedbackConfig::default()).unwrap();
    let record = report.ledger.record(Channel::ConstraintInjection);
    assert_eq!(record.failures, 1);
    assert_eq!(record.failure_reasons["length"], 1);
}

#[test]
fn corrupt_ledger_is_reported_and_left_untouched() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    std::fs::write(&path, "{ not json").unwrap();
    let store = LedgerStore::new(&path);

    let err = run_feedback(&store, &mixed_run(), &FeedbackConfig::default()).unwrap_err();
    assert!(matches!(err, LedgerError::Parse { .. }));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
}

#[test]
fn unwritable_ledger_location_is_an_error() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "file").unwrap();
    let store = LedgerStore::new(blocker.join("ledger.json"));

    let err = run_feedback(&store, &mixed_run(), &FeedbackConfig::default()).unwrap_err();
    assert!(matches!(err, LedgerError::Io { .. }));
}

#[test]
fn concurrent_writers_never_lose_an_update() {
    let dir = tempdir().unwrap();
    let store = LedgerStore::new(dir.path().join("ledger.json"));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            std::thread::spawn(move || {
                store
                    .update(|ledger| ledger.record_mut(Channel::GraphExplorer).successes += 1)
                    .unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(store.load().unwrap().record(Channel::GraphExplorer).successes, 8);
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|name| name != "ledger.json" && name != "ledger.lock")
        .collect();
    assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
}
