use std::collections::{BTreeMap, BTreeSet};

use tournament_harness::judge::{CallPolicy, JudgeProfile, PairSide, SimulatedOracle};
use tournament_harness::model::{Candidate, Judge, PresentedOrder};
use tournament_harness::tournament::{
    run_bout, run_tournament, BoutContext, BoutPlan, EarlyStop, Escalation, TournamentConfig,
    TournamentError,
};

fn pool(n: usize) -> Vec<Candidate> {
    (0..n)
        .map(|i| {
            Candidate::new(
                format!("idea-{i:02}"),
                format!("Proposal {i}: a solid-state electrolyte variant with dopant {i}."),
            )
        })
        .collect()
}

fn judges() -> Vec<Judge> {
    vec![
        Judge::new("opus", "anthropic"),
        Judge::new("sonnet", "anthropic"),
        Judge::new("gpt", "openai"),
        Judge::new("gemini", "google"),
    ]
}

fn config(seed: u64) -> TournamentConfig {
    TournamentConfig {
        seed,
        ..TournamentConfig::default()
    }
}

#[tokio::test]
async fn no_rematches_when_the_field_is_large_enough() {
    let candidates = pool(12);
    let oracle = SimulatedOracle::new(1).with_candidates(&candidates);
    let result = run_tournament(&oracle, &candidates, &judges(), &config(42), None)
        .await
        .unwrap();

    assert_eq!(result.rounds.len(), 6);
    let mut seen = BTreeSet::new();
    for round in &result.rounds {
        assert_eq!(round.forced_rematches, 0);
        assert_eq!(round.pairings.len(), 6);
        for bout in &round.pairings {
            let key = if bout.candidate_a < bout.candidate_b {
                (bout.candidate_a.clone(), bout.candidate_b.clone())
            } else {
                (bout.candidate_b.clone(), bout.candidate_a.clone())
            };
            assert!(seen.insert(key), "rematch in round {}", round.round);
        }
    }
}

#[tokio::test]
async fn same_seed_reproduces_pairings_placement_and_verdicts() {
    let candidates = pool(9);
    let oracle = SimulatedOracle::new(7).with_candidates(&candidates);
    let first = run_tournament(&oracle, &candidates, &judges(), &config(2024), None)
        .await
        .unwrap();
    let second = run_tournament(&oracle, &candidates, &judges(), &config(2024), None)
        .await
        .unwrap();

    assert_eq!(first.rounds, second.rounds);
    assert_eq!(first.matches, second.matches);
    assert_eq!(first.standings, second.standings);
    assert_eq!(
        serde_json::to_string(&first.matches).unwrap(),
        serde_json::to_string(&second.matches).unwrap()
    );
}

#[tokio::test]
async fn panels_never_repeat_a_provider() {
    let candidates = pool(8);
    let oracle = SimulatedOracle::new(3).with_candidates(&candidates);
    let judges = judges();
    let provider: BTreeMap<&str, &str> = judges
        .iter()
        .map(|j| (j.id.as_str(), j.provider.as_str()))
        .collect();
    let result = run_tournament(&oracle, &candidates, &judges, &config(9), None)
        .await
        .unwrap();

    assert_eq!(result.panel_cap, 3);
    let final_round = result.rounds.last().unwrap();
    assert_eq!(final_round.panel_size, 3);
    for round in &result.rounds {
        for bout in &round.pairings {
            let providers: BTreeSet<&str> = bout.judges.iter().map(|j| provider[j.as_str()]).collect();
            assert_eq!(providers.len(), bout.judges.len(), "{} reused a provider", bout.match_id);
        }
    }
}

#[tokio::test]
async fn perfect_judges_leave_the_best_candidate_unbeaten() {
    let candidates = pool(8);
    let mut oracle = SimulatedOracle::new(5);
    for (i, c) in candidates.iter().enumerate() {
        oracle = oracle.with_quality(c.id.clone(), i as f64);
    }
    for judge in judges() {
        oracle = oracle.with_profile(judge.id, JudgeProfile::perfect());
    }
    let result = run_tournament(&oracle, &candidates, &judges(), &config(13), None)
        .await
        .unwrap();

    let top = &result.standings[0];
    assert_eq!(top.id, "idea-07");
    assert_eq!(top.losses, 0);
    assert_eq!(top.wins, 6);
    assert!(result.matches.iter().all(|m| m.is_well_formed()));
}

#[tokio::test]
async fn odd_field_hands_each_bye_to_a_new_candidate() {
    let candidates = pool(7);
    let oracle = SimulatedOracle::new(11).with_candidates(&candidates);
    let result = run_tournament(&oracle, &candidates, &judges(), &config(77), None)
        .await
        .unwrap();

    let byes: Vec<&String> = result.rounds.iter().filter_map(|r| r.bye.as_ref()).collect();
    assert_eq!(byes.len(), 6);
    let distinct: BTreeSet<&String> = byes.iter().copied().collect();
    assert_eq!(distinct.len(), 6);
    assert!(result.standings.iter().all(|s| s.byes <= 1));
}

#[tokio::test]
async fn call_ids_follow_round_and_match_numbering() {
    let candidates = pool(6);
    let oracle = SimulatedOracle::new(2).with_candidates(&candidates);
    let result = run_tournament(&oracle, &candidates, &judges(), &config(1), None)
        .await
        .unwrap();
    let first = &result.matches[0];
    assert!(first.match_id.starts_with("R1-M01-J"));
    assert!(result.matches.iter().all(|m| m.match_id.contains("-J")));
    assert!(result.estimated_cost > 0.0);
}

#[tokio::test]
async fn single_candidate_is_rejected() {
    let candidates = pool(1);
    let oracle = SimulatedOracle::new(0);
    let err = run_tournament(&oracle, &candidates, &judges(), &config(0), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TournamentError::TooFewCandidates(1)));
}

/// Panel of one judge that always picks the first slot and one that always picks the second.
fn split_panel_oracle() -> SimulatedOracle {
    let slot_fan = |first_bias: f64| JudgeProfile {
        skill: 0.0,
        first_bias,
        noise: 0.0,
        ..JudgeProfile::default()
    };
    SimulatedOracle::new(5)
        .with_quality("strong", 1.0)
        .with_quality("weak", -1.0)
        .with_profile("first-fan", slot_fan(10.0))
        .with_profile("echo", slot_fan(10.0))
        .with_profile("second-fan", slot_fan(-10.0))
        .with_profile("referee", JudgeProfile::perfect())
        .with_profile("spare", JudgeProfile::perfect())
}

fn split_plan(judge_order: Vec<Judge>) -> BoutPlan {
    BoutPlan {
        match_id: "R4-M01".to_string(),
        round: 4,
        candidate_a: PairSide::new("weak", "a thin incremental tweak"),
        candidate_b: PairSide::new("strong", "a well-grounded new mechanism"),
        orders: vec![PresentedOrder::AFirst; judge_order.len()],
        judge_order,
        tie_coin: true,
        panel: 2,
    }
}

#[tokio::test]
async fn split_panel_escalates_to_a_provider_distinct_referee() {
    let oracle = split_panel_oracle();
    let policy = CallPolicy::default();
    let escalation = Escalation {
        enabled: true,
        extra_judges: 2,
    };
    let early_stop = EarlyStop::default();
    let ctx = BoutContext {
        oracle: &oracle,
        criterion: "quality",
        policy: &policy,
        escalation: &escalation,
        early_stop: &early_stop,
    };
    let plan = split_plan(vec![
        Judge::new("first-fan", "anthropic"),
        Judge::new("second-fan", "openai"),
        Judge::new("echo", "anthropic"),
        Judge::new("referee", "google"),
        Judge::new("spare", "xai"),
    ]);

    let out = run_bout(&ctx, &plan).await;

    assert!(out.escalated);
    assert!(!out.tie_broken);
    // `echo` shares a provider with `first-fan`; `spare` is not needed once the tie breaks.
    assert_eq!(out.judges, vec!["first-fan", "second-fan", "referee"]);
    assert_eq!((out.votes_a, out.votes_b), (1, 2));
    assert_eq!(out.winner.as_deref(), Some("strong"));
    assert_eq!(out.records.len(), 3);
    assert_eq!(out.records[2].match_id, "R4-M01-J3");
}

#[tokio::test]
async fn split_panel_without_a_distinct_provider_falls_back_to_the_coin() {
    let oracle = split_panel_oracle();
    let policy = CallPolicy::default();
    let escalation = Escalation::default();
    let early_stop = EarlyStop::default();
    let ctx = BoutContext {
        oracle: &oracle,
        criterion: "quality",
        policy: &policy,
        escalation: &escalation,
        early_stop: &early_stop,
    };
    let plan = split_plan(vec![
        Judge::new("first-fan", "anthropic"),
        Judge::new("second-fan", "openai"),
        Judge::new("echo", "anthropic"),
    ]);

    let out = run_bout(&ctx, &plan).await;

    assert!(!out.escalated);
    assert!(out.tie_broken);
    assert_eq!(out.judges, vec!["first-fan", "second-fan"]);
    assert_eq!(out.winner.as_deref(), Some("weak"));
}

#[tokio::test]
async fn disabled_escalation_leaves_the_split_to_the_coin() {
    let oracle = split_panel_oracle();
    let policy = CallPolicy::default();
    let escalation = Escalation {
        enabled: false,
        extra_judges: 1,
    };
    let early_stop = EarlyStop::default();
    let ctx = BoutContext {
        oracle: &oracle,
        criterion: "quality",
        policy: &policy,
        escalation: &escalation,
        early_stop: &early_stop,
    };
    let plan = split_plan(vec![
        Judge::new("first-fan", "anthropic"),
        Judge::new("second-fan", "openai"),
        Judge::new("referee", "google"),
    ]);

    let out = run_bout(&ctx, &plan).await;
    assert!(!out.escalated);
    assert!(out.tie_broken);
    assert_eq!(out.judges.len(), 2);
}

#[tokio::test]
async fn escalation_beyond_the_provider_count_is_warned() {
    let candidates = pool(6);
    let oracle = SimulatedOracle::new(2).with_candidates(&candidates);
    let three_providers = vec![
        Judge::new("opus", "anthropic"),
        Judge::new("gpt", "openai"),
        Judge::new("gemini", "google"),
    ];
    let result = run_tournament(&oracle, &candidates, &three_providers, &config(1), None)
        .await
        .unwrap();
    assert_eq!(result.panel_cap, 3);
    assert!(result.warnings.iter().any(|w| w.contains("escalation")));
}
