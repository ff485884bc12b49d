#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tournament_harness::archive::SqliteMatchArchive;
use tournament_harness::bradley_terry::{rate, RatingReport};
use tournament_harness::calibration::{
    run_calibration, CalibrationPack, CalibrationReport, CalibrationStore,
};
use tournament_harness::channel::{generate_mix, Channel, GenerationContext};
use tournament_harness::concept_graph::{build_concept_graph, Document};
use tournament_harness::feedback::{outcomes_from_ratings, run_feedback};
use tournament_harness::gateway::ProviderGateway;
use tournament_harness::judge::{GatewayOracle, JudgeOracle, SimulatedOracle, SimulationSpec};
use tournament_harness::ledger::LedgerStore;
use tournament_harness::model::{CalibrationItem, Candidate, Judge, JudgeSpec};
use tournament_harness::pipeline::{run_full, PipelineConfig, PipelineInputs, PipelineStores};
use tournament_harness::portfolio::{optimize, EvidenceFlags};
use tournament_harness::report::RunReport;
use tournament_harness::tournament::{run_tournament, TournamentResult};
use tournament_harness::trace::{AuditSink, AuditWorker, JsonlAuditSink};

#[derive(Parser)]
#[command(name = "tourney", version, about = "Tournament ranking and portfolio CLI")]
struct Cli {
    /// Seed for every randomized pairing, order and sampling decision
    #[arg(long, global = true)]
    seed: Option<u64>,
    /// Pipeline config JSON (partial files are fine)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Judge with the deterministic simulated oracle instead of OpenRouter
    #[arg(long, global = true)]
    simulate: bool,
    /// Hidden qualities and judge profiles for --simulate
    #[arg(long, global = true)]
    sim_spec: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the concept graph and structural holes from a corpus
    Graph {
        /// JSON array of {id, text}
        #[arg(long)]
        docs: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Generate seed proposals across channels
    Generate {
        #[arg(long)]
        context: PathBuf,
        /// Channel weights, e.g. the `next_weights` of a feedback report
        #[arg(long)]
        weights: Option<PathBuf>,
        #[arg(long, default_value_t = 20)]
        total: usize,
        #[arg(long)]
        out: PathBuf,
    },
    /// Calibrate the judge pool on a tiered pack
    Calibrate {
        #[arg(long)]
        judges: PathBuf,
        #[arg(long)]
        pack: PathBuf,
        /// Resumable per-call results file
        #[arg(long)]
        results: Option<PathBuf>,
        #[arg(long)]
        audit: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Run the Swiss tournament
    Tournament {
        #[arg(long)]
        candidates: PathBuf,
        #[arg(long)]
        judges: PathBuf,
        /// Calibration report; judges it does not list as eligible are dropped
        #[arg(long)]
        calibration: PathBuf,
        #[arg(long)]
        audit: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Fit Bradley-Terry ratings to a tournament match log
    Rate {
        #[arg(long)]
        candidates: PathBuf,
        #[arg(long)]
        tournament: PathBuf,
        /// Calibration report supplying judge rho
        #[arg(long)]
        calibration: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Select a diverse portfolio from ratings
    Portfolio {
        #[arg(long)]
        candidates: PathBuf,
        #[arg(long)]
        ratings: PathBuf,
        /// {id: {evidence, risk}}
        #[arg(long)]
        evidence: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Update the channel ledger from ratings and gate results
    Feedback {
        #[arg(long)]
        candidates: PathBuf,
        #[arg(long)]
        ratings: PathBuf,
        /// {id: [failed gate, ...]}
        #[arg(long)]
        gates: Option<PathBuf>,
        #[arg(long)]
        ledger: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Calibrate, run the tournament, rate, select and update the ledger
    Full {
        #[arg(long)]
        candidates: PathBuf,
        #[arg(long)]
        judges: PathBuf,
        #[arg(long)]
        pack: PathBuf,
        #[arg(long)]
        ledger: PathBuf,
        #[arg(long)]
        evidence: Option<PathBuf>,
        #[arg(long)]
        gates: Option<PathBuf>,
        #[arg(long)]
        calibration_results: Option<PathBuf>,
        /// SQLite archive for the match log
        #[arg(long)]
        archive: Option<PathBuf>,
        #[arg(long)]
        audit: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
        /// Optional markdown rendering of the report
        #[arg(long)]
        markdown: Option<PathBuf>,
    },
    /// Export an archived run as JSONL, or list runs when no run id is given
    ArchiveExport {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        run_id: Option<String>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    let mut config: PipelineConfig = match &cli.config {
        Some(path) => read_json(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    let config = config.seeded();

    match &cli.command {
        Commands::Graph { docs, out } => {
            let docs: Vec<Document> = read_json(docs)?;
            let graph = build_concept_graph(&docs, &Default::default());
            info!(nodes = graph.nodes.len(), holes = graph.holes.len(), "concept graph built");
            write_json(out, &graph)?;
        }
        Commands::Generate {
            context,
            weights,
            total,
            out,
        } => {
            let ctx: GenerationContext = read_json(context)?;
            let weights: BTreeMap<Channel, f64> = match weights {
                Some(path) => read_json(path)?,
                None => Channel::ALL.into_iter().map(|c| (c, 1.0)).collect(),
            };
            let candidates = generate_mix(&weights, *total, config.seed, &ctx);
            write_json(out, &candidates)?;
        }
        Commands::Calibrate {
            judges,
            pack,
            results,
            audit,
            out,
        } => {
            let judges = read_judges(judges)?;
            let items = read_pack(pack)?;
            let oracle = build_oracle(&cli, config.seed, &[], &items)?;
            let store = results.as_ref().map(CalibrationStore::new);
            let (sink, worker) = open_audit(audit.as_deref())?;
            let run = run_calibration(
                &*oracle,
                &judges,
                &items,
                &config.calibration,
                store.as_ref(),
                sink.as_ref().map(|s| s as &dyn AuditSink),
            )
            .await?;
            close_audit(sink, worker)?;
            println!(
                "calibration: {} calls executed, {} skipped, {} dropped",
                run.executed, run.skipped, run.dropped
            );
            write_json(out, &run.report)?;
        }
        Commands::Tournament {
            candidates,
            judges,
            calibration,
            audit,
            out,
        } => {
            let candidates: Vec<Candidate> = read_json(candidates)?;
            let pool = read_judges(judges)?;
            let report: CalibrationReport = read_json(calibration)?;
            let judges = report.eligible_judges(&pool);
            for judge in pool.iter().filter(|j| !judges.iter().any(|k| k.id == j.id)) {
                warn!(judge = %judge.id, "judge is not calibrated; excluded from the tournament");
            }
            let oracle = build_oracle(&cli, config.seed, &candidates, &[])?;
            let (sink, worker) = open_audit(audit.as_deref())?;
            let result = run_tournament(
                &*oracle,
                &candidates,
                &judges,
                &config.tournament,
                sink.as_ref().map(|s| s as &dyn AuditSink),
            )
            .await?;
            close_audit(sink, worker)?;
            println!(
                "tournament: {} rounds, {} judge calls, {} valid verdicts",
                result.rounds.len(),
                result.total_calls,
                result.matches.len()
            );
            write_json(out, &result)?;
        }
        Commands::Rate {
            candidates,
            tournament,
            calibration,
            out,
        } => {
            let candidates: Vec<Candidate> = read_json(candidates)?;
            let result: TournamentResult = read_json(tournament)?;
            let rho = read_json::<CalibrationReport>(calibration)?.weights();
            let ids: Vec<String> = candidates.iter().map(|c| c.id.clone()).collect();
            let ratings = rate(&ids, &result.matches, &rho, &config.estimator)?;
            write_json(out, &ratings)?;
        }
        Commands::Portfolio {
            candidates,
            ratings,
            evidence,
            out,
        } => {
            let candidates: Vec<Candidate> = read_json(candidates)?;
            let ratings: RatingReport = read_json(ratings)?;
            let flags: BTreeMap<String, EvidenceFlags> = read_optional(evidence.as_deref())?;
            let selection = optimize(&ratings, &candidates, &flags, &config.portfolio)?;
            println!("portfolio: {}", selection.ids().join(", "));
            write_json(out, &selection)?;
        }
        Commands::Feedback {
            candidates,
            ratings,
            gates,
            ledger,
            out,
        } => {
            let candidates: Vec<Candidate> = read_json(candidates)?;
            let ratings: RatingReport = read_json(ratings)?;
            let failed: BTreeMap<String, Vec<String>> = read_optional(gates.as_deref())?;
            let outcomes = outcomes_from_ratings(&candidates, &ratings, &failed);
            let report = run_feedback(&LedgerStore::new(ledger), &outcomes, &config.feedback)?;
            println!("{}", report.recommendation);
            write_json(out, &report)?;
        }
        Commands::Full {
            candidates,
            judges,
            pack,
            ledger,
            evidence,
            gates,
            calibration_results,
            archive,
            audit,
            out,
            markdown,
        } => {
            let candidates: Vec<Candidate> = read_json(candidates)?;
            let judges = read_judges(judges)?;
            let items = read_pack(pack)?;
            let evidence: BTreeMap<String, EvidenceFlags> = read_optional(evidence.as_deref())?;
            let failed_gates: BTreeMap<String, Vec<String>> = read_optional(gates.as_deref())?;
            let oracle = build_oracle(&cli, config.seed, &candidates, &items)?;

            let ledger = LedgerStore::new(ledger);
            let calibration = calibration_results.as_ref().map(CalibrationStore::new);
            let archive = archive.as_ref().map(SqliteMatchArchive::new).transpose()?;
            let (sink, worker) = open_audit(audit.as_deref())?;

            let inputs = PipelineInputs {
                candidates: &candidates,
                judges: &judges,
                calibration_items: &items,
                evidence: &evidence,
                failed_gates: &failed_gates,
            };
            let stores = PipelineStores {
                ledger: &ledger,
                calibration: calibration.as_ref(),
                archive: archive.as_ref(),
                audit: sink.as_ref().map(|s| s as &dyn AuditSink),
            };
            let report: RunReport = run_full(&*oracle, &inputs, &stores, &config).await?;
            close_audit(sink, worker)?;

            report.save(out)?;
            if let Some(path) = markdown {
                std::fs::write(path, report.render_markdown())?;
            }
            println!("run {} complete ({} warnings)", report.run_id, report.warnings.len());
        }
        Commands::ArchiveExport { db, run_id, out } => {
            let archive = SqliteMatchArchive::new(db)?;
            match (run_id, out) {
                (Some(run_id), Some(out)) => {
                    let written = archive.export_jsonl(run_id, out).await?;
                    println!("exported {written} matches");
                }
                (Some(_), None) => return Err("archive-export --run-id requires --out".into()),
                (None, _) => {
                    for run in archive.list_runs().await? {
                        println!(
                            "{}\tseed={}\tcandidates={}\tmatches={}",
                            run.run_id, run.seed, run.candidates, run.matches
                        );
                    }
                }
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn build_oracle(
    cli: &Cli,
    seed: u64,
    candidates: &[Candidate],
    items: &[CalibrationItem],
) -> Result<Box<dyn JudgeOracle>, Box<dyn std::error::Error>> {
    if cli.simulate {
        let oracle = match &cli.sim_spec {
            Some(path) => SimulatedOracle::from_spec(read_json::<SimulationSpec>(path)?),
            None => SimulatedOracle::new(seed),
        };
        return Ok(Box::new(
            oracle
                .with_candidates(candidates)
                .with_calibration_items(items),
        ));
    }
    let gateway = Arc::new(ProviderGateway::from_env()?);
    Ok(Box::new(GatewayOracle::new(gateway)))
}

fn open_audit(
    path: Option<&Path>,
) -> Result<(Option<JsonlAuditSink>, Option<AuditWorker>), Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let (sink, worker) = JsonlAuditSink::new(path)?;
            Ok((Some(sink), Some(worker)))
        }
        None => Ok((None, None)),
    }
}

fn close_audit(
    sink: Option<JsonlAuditSink>,
    worker: Option<AuditWorker>,
) -> Result<(), Box<dyn std::error::Error>> {
    drop(sink);
    if let Some(worker) = worker {
        worker.join()?;
    }
    Ok(())
}

fn read_judges(path: &Path) -> Result<Vec<Judge>, Box<dyn std::error::Error>> {
    let specs: Vec<JudgeSpec> = read_json(path)?;
    Ok(specs.into_iter().map(Judge::from).collect())
}

fn read_pack(path: &Path) -> Result<Vec<CalibrationItem>, Box<dyn std::error::Error>> {
    let pack: CalibrationPack = read_json(path)?;
    Ok(pack.into_items())
}

fn read_optional<T: serde::de::DeserializeOwned + Default>(
    path: Option<&Path>,
) -> Result<T, Box<dyn std::error::Error>> {
    match path {
        Some(path) => read_json(path),
        None => Ok(T::default()),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(
    path: impl AsRef<Path>,
) -> Result<T, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), io::Error> {
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    std::fs::write(path, json)
}
