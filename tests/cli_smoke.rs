use std::path::Path;
use std::process::Command;

use serde_json::json;
use tempfile::tempdir;
use tournament_harness::bradley_terry::RatingReport;
use tournament_harness::calibration::CalibrationReport;
use tournament_harness::concept_graph::ConceptGraph;
use tournament_harness::portfolio::PortfolioSelection;
use tournament_harness::report::RunReport;
use tournament_harness::tournament::TournamentResult;

fn tourney(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_tourney"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap()
}

fn write(dir: &Path, name: &str, value: serde_json::Value) -> String {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_string_pretty(&value).unwrap()).unwrap();
    path.to_string_lossy().to_string()
}

fn inputs(dir: &Path) -> (String, String, String) {
    let candidates: Vec<_> = (0..8)
        .map(|i| {
            json!({
                "id": format!("idea-{i}"),
                "text": format!("Proposal {i}: solid electrolyte interphase tuning route {i}"),
                "taxonomy_labels": [if i < 4 { "anodes" } else { "cathodes" }],
            })
        })
        .collect();
    let judges = json!([
        {"id": "opus", "provider": "anthropic"},
        {"id": "gpt", "provider": "openai"},
        {"id": "gemini", "provider": "google"},
    ]);
    let tier = |name: &str| -> Vec<serde_json::Value> {
        (0..4)
            .map(|i| json!({"id": format!("{name}-{i}"), "abstract": format!("{name} reference abstract {i}")}))
            .collect()
    };
    let pack = json!({"tiers": {"high": tier("high"), "mid": {"papers": tier("mid")}, "low": tier("low")}});
    (
        write(dir, "candidates.json", json!(candidates)),
        write(dir, "judges.json", judges),
        write(dir, "pack.json", pack),
    )
}

#[test]
fn graph_command_writes_holes() {
    let dir = tempdir().unwrap();
    let docs = write(
        dir.path(),
        "docs.json",
        json!([
            {"id": "1", "text": "Lithium anode coatings suppress dendrite growth"},
            {"id": "2", "text": "Lithium anode interphase improves electrolyte stability"},
            {"id": "3", "text": "Lithium anode cycling with solid electrolyte"},
            {"id": "4", "text": "Sodium anode hosts reduce dendrite growth"},
            {"id": "5", "abstract": "Sodium anode interphase improves electrolyte stability"},
            {"id": "6", "abstract": "Sodium anode cycling with solid electrolyte"},
        ]),
    );
    let out = dir.path().join("graph.json");
    let output = tourney(&["graph", "--docs", &docs, "--out", out.to_str().unwrap()]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let graph: ConceptGraph = serde_json::from_str(&std::fs::read_to_string(out).unwrap()).unwrap();
    assert_eq!(graph.documents, 6);
    assert!(!graph.holes.is_empty());
}

#[test]
fn simulated_full_run_writes_report_markdown_and_ledger() {
    let dir = tempdir().unwrap();
    let (candidates, judges, pack) = inputs(dir.path());
    let ledger = dir.path().join("ledger.json");
    let out = dir.path().join("report.json");
    let md = dir.path().join("report.md");
    let audit = dir.path().join("audit.jsonl");

    let output = tourney(&[
        "--simulate",
        "--seed",
        "12",
        "full",
        "--candidates",
        &candidates,
        "--judges",
        &judges,
        "--pack",
        &pack,
        "--ledger",
        ledger.to_str().unwrap(),
        "--audit",
        audit.to_str().unwrap(),
        "--out",
        out.to_str().unwrap(),
        "--markdown",
        md.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("complete"));

    let report = RunReport::load(&out).unwrap();
    assert_eq!(report.seed, 12);
    assert!(report.portfolio.is_some());
    assert!(ledger.exists());
    assert!(audit.exists());
    assert!(std::fs::read_to_string(md).unwrap().contains("## Portfolio"));
}

fn calibrate(dir: &Path, judges: &str, pack: &str, sim_spec: &str) -> std::path::PathBuf {
    let calibration = dir.join("calibration.json");
    let output = tourney(&[
        "--simulate",
        "--sim-spec",
        sim_spec,
        "calibrate",
        "--judges",
        judges,
        "--pack",
        pack,
        "--out",
        calibration.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    calibration
}

#[test]
fn stage_commands_chain_through_files() {
    let dir = tempdir().unwrap();
    let (candidates, judges, pack) = inputs(dir.path());
    // gemini never answers, so calibration excludes it.
    let sim_spec = write(
        dir.path(),
        "sim.json",
        json!({"seed": 3, "judges": {"gemini": {"unavailable": true}}}),
    );
    let calibration = calibrate(dir.path(), &judges, &pack, &sim_spec);
    let report: CalibrationReport =
        serde_json::from_str(&std::fs::read_to_string(&calibration).unwrap()).unwrap();
    assert_eq!(report.excluded, vec!["gemini".to_string()]);

    let tournament = dir.path().join("tournament.json");
    let ratings = dir.path().join("ratings.json");
    let portfolio = dir.path().join("portfolio.json");

    let output = tourney(&[
        "--simulate",
        "--sim-spec",
        &sim_spec,
        "tournament",
        "--candidates",
        &candidates,
        "--judges",
        &judges,
        "--calibration",
        calibration.to_str().unwrap(),
        "--out",
        tournament.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let result: TournamentResult =
        serde_json::from_str(&std::fs::read_to_string(&tournament).unwrap()).unwrap();
    assert!(!result.matches.is_empty());
    assert!(!result.judges.contains(&"gemini".to_string()));
    assert!(result.matches.iter().all(|m| m.judge != "gemini"));

    let output = tourney(&[
        "rate",
        "--candidates",
        &candidates,
        "--tournament",
        tournament.to_str().unwrap(),
        "--calibration",
        calibration.to_str().unwrap(),
        "--out",
        ratings.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let rated: RatingReport = serde_json::from_str(&std::fs::read_to_string(&ratings).unwrap()).unwrap();
    assert_eq!(rated.ranked.len() + rated.insufficient.len(), 8);
    assert_eq!(rated.meta.uncalibrated_matches, 0);
    assert!(rated.judges.values().all(|d| !d.rho_defaulted && !d.uncalibrated));

    let output = tourney(&[
        "portfolio",
        "--candidates",
        &candidates,
        "--ratings",
        ratings.to_str().unwrap(),
        "--out",
        portfolio.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let selection: PortfolioSelection =
        serde_json::from_str(&std::fs::read_to_string(&portfolio).unwrap()).unwrap();
    assert_eq!(selection.selected.len(), 5);
}

#[test]
fn tournament_and_rate_refuse_to_run_without_calibration() {
    let dir = tempdir().unwrap();
    let (candidates, judges, _) = inputs(dir.path());
    let tournament = dir.path().join("tournament.json");

    let output = tourney(&[
        "--simulate",
        "tournament",
        "--candidates",
        &candidates,
        "--judges",
        &judges,
        "--out",
        tournament.to_str().unwrap(),
    ]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--calibration"));
    assert!(!tournament.exists());

    let output = tourney(&[
        "rate",
        "--candidates",
        &candidates,
        "--tournament",
        tournament.to_str().unwrap(),
        "--out",
        dir.path().join("ratings.json").to_str().unwrap(),
    ]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--calibration"));
}

#[test]
fn config_file_seed_drives_simulated_runs() {
    let dir = tempdir().unwrap();
    let (candidates, judges, pack) = inputs(dir.path());
    let config = write(dir.path(), "config.json", json!({"seed": 77}));
    let sim_spec = write(dir.path(), "sim.json", json!({}));
    let calibration = calibrate(dir.path(), &judges, &pack, &sim_spec);

    // The same seed given through the config file and through --seed.
    let mut logs = Vec::new();
    let runs = [
        ("from-config.json", ["--config", config.as_str()]),
        ("from-flag.json", ["--seed", "77"]),
    ];
    for (name, seed_args) in runs {
        let out = dir.path().join(name);
        let output = tourney(&[
            "--simulate",
            seed_args[0],
            seed_args[1],
            "tournament",
            "--candidates",
            &candidates,
            "--judges",
            &judges,
            "--calibration",
            calibration.to_str().unwrap(),
            "--out",
            out.to_str().unwrap(),
        ]);
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        let result: TournamentResult =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(result.seed, 77);
        logs.push(result.matches);
    }
    assert_eq!(logs[0], logs[1]);
}

#[test]
fn missing_input_file_fails_cleanly() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("graph.json");
    let output = tourney(&[
        "graph",
        "--docs",
        dir.path().join("absent.json").to_str().unwrap(),
        "--out",
        out.to_str().unwrap(),
    ]);
    assert!(!output.status.success());
    assert!(!out.exists());
}
