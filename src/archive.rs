//! SQLite archive of each run's candidates and match log.
//!
//! Append-only: a run is written once and never updated or deleted.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::model::{Candidate, MatchRecord, PresentedOrder};
use crate::trace::now_epoch_ms;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive lock poisoned")]
    Poisoned,
    #[error("task join error: {0}")]
    Join(String),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("run {0} is already archived")]
    DuplicateRun(String),
    #[error("run {0} not found")]
    UnknownRun(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub created_at_ms: i64,
    pub seed: u64,
    pub candidates: usize,
    pub matches: usize,
}

#[derive(Clone)]
pub struct SqliteMatchArchive {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMatchArchive {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             CREATE TABLE IF NOT EXISTS runs (\
               run_id TEXT PRIMARY KEY,\
               created_at INTEGER NOT NULL,\
               seed INTEGER NOT NULL\
             );\
             CREATE TABLE IF NOT EXISTS candidates (\
               run_id TEXT NOT NULL,\
               candidate_id TEXT NOT NULL,\
               text TEXT NOT NULL,\
               text_hash TEXT NOT NULL,\
               taxonomy_labels TEXT NOT NULL,\
               origin_channel TEXT,\
               PRIMARY KEY (run_id, candidate_id)\
             );\
             CREATE TABLE IF NOT EXISTS matches (\
               run_id TEXT NOT NULL,\
               seq INTEGER NOT NULL,\
               match_id TEXT NOT NULL,\
               round INTEGER NOT NULL,\
               candidate_a TEXT NOT NULL,\
               candidate_b TEXT NOT NULL,\
               judge TEXT NOT NULL,\
               presented_order TEXT NOT NULL,\
               winner TEXT NOT NULL,\
               confidence REAL NOT NULL,\
               rationale TEXT NOT NULL,\
               PRIMARY KEY (run_id, seq)\
             );",
        )?;
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R, ArchiveError>
    where
        F: FnOnce(&mut Connection) -> Result<R, ArchiveError>,
    {
        let mut guard = self.conn.lock().map_err(|_| ArchiveError::Poisoned)?;
        f(&mut guard)
    }

    /// Store one run. Fails if the run id already exists.
    pub async fn archive_run(
        &self,
        run_id: &str,
        seed: u64,
        candidates: &[Candidate],
        matches: &[MatchRecord],
    ) -> Result<(), ArchiveError> {
        let run_id = run_id.to_string();
        let candidates = candidates.to_vec();
        let matches = matches.to_vec();
        let archive = self.clone();
        tokio::task::spawn_blocking(move || {
            archive.with_conn(|conn| {
                let tx = conn.transaction()?;
                let exists: Option<String> = tx
                    .query_row(
                        "SELECT run_id FROM runs WHERE run_id = ?1",
                        params![run_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if exists.is_some() {
                    return Err(ArchiveError::DuplicateRun(run_id));
                }
                tx.execute(
                    "INSERT INTO runs (run_id, created_at, seed) VALUES (?1, ?2, ?3)",
                    params![run_id, now_epoch_ms(), seed as i64],
                )?;
                for c in &candidates {
                    let labels = serde_json::to_string(&c.taxonomy_labels)
                        .map_err(|e| ArchiveError::Serde(e.to_string()))?;
                    tx.execute(
                        "INSERT INTO candidates (run_id, candidate_id, text, text_hash, taxonomy_labels, origin_channel)\
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            run_id,
                            c.id,
                            c.text,
                            blake3::hash(c.text.as_bytes()).to_hex().to_string(),
                            labels,
                            c.origin_channel.map(|ch| ch.as_str()),
                        ],
                    )?;
                }
                for (seq, m) in matches.iter().enumerate() {
                    tx.execute(
                        "INSERT INTO matches (run_id, seq, match_id, round, candidate_a, candidate_b, judge,\
                                              presented_order, winner, confidence, rationale)\
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                        params![
                            run_id,
                            seq as i64,
                            m.match_id,
                            m.round as i64,
                            m.candidate_a,
                            m.candidate_b,
                            m.judge,
                            order_str(m.presented_order),
                            m.winner,
                            m.confidence,
                            m.rationale,
                        ],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
        })
        .await
        .map_err(|e| ArchiveError::Join(e.to_string()))?
    }

    pub async fn list_runs(&self) -> Result<Vec<RunSummary>, ArchiveError> {
        let archive = self.clone();
        tokio::task::spawn_blocking(move || {
            archive.with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT r.run_id, r.created_at, r.seed,\
                            (SELECT COUNT(*) FROM candidates c WHERE c.run_id = r.run_id),\
                            (SELECT COUNT(*) FROM matches m WHERE m.run_id = r.run_id)\
                     FROM runs r ORDER BY r.created_at, r.run_id",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(RunSummary {
                        run_id: row.get(0)?,
                        created_at_ms: row.get(1)?,
                        seed: row.get::<_, i64>(2)? as u64,
                        candidates: row.get::<_, i64>(3)?.max(0) as usize,
                        matches: row.get::<_, i64>(4)?.max(0) as usize,
                    })
                })?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
        })
        .await
        .map_err(|e| ArchiveError::Join(e.to_string()))?
    }

    /// Match log of one run in its original order.
    pub async fn load_matches(&self, run_id: &str) -> Result<Vec<MatchRecord>, ArchiveError> {
        let run_id = run_id.to_string();
        let archive = self.clone();
        tokio::task::spawn_blocking(move || {
            archive.with_conn(|conn| read_matches(conn, &run_id))
        })
        .await
        .map_err(|e| ArchiveError::Join(e.to_string()))?
    }

    /// Write one run's match log as JSON lines.
    pub async fn export_jsonl(
        &self,
        run_id: &str,
        path: impl AsRef<Path>,
    ) -> Result<usize, ArchiveError> {
        let matches = self.load_matches(run_id).await?;
        let path = path.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || {
            let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
            for m in &matches {
                let line =
                    serde_json::to_string(m).map_err(|e| ArchiveError::Serde(e.to_string()))?;
                writeln!(file, "{line}")?;
            }
            file.flush()?;
            Ok(matches.len())
        })
        .await
        .map_err(|e| ArchiveError::Join(e.to_string()))?
    }
}

fn read_matches(conn: &Connection, run_id: &str) -> Result<Vec<MatchRecord>, ArchiveError> {
    let known: Option<String> = conn
        .query_row(
            "SELECT run_id FROM runs WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )
        .optional()?;
    if known.is_none() {
        return Err(ArchiveError::UnknownRun(run_id.to_string()));
    }
    let mut stmt = conn.prepare(
        "SELECT match_id, round, candidate_a, candidate_b, judge, presented_order, winner,\
                confidence, rationale \
         FROM matches WHERE run_id = ?1 ORDER BY seq",
    )?;
    let rows = stmt.query_map(params![run_id], |row| {
        let order: String = row.get(5)?;
        Ok(MatchRecord {
            match_id: row.get(0)?,
            round: row.get::<_, i64>(1)? as u32,
            candidate_a: row.get(2)?,
            candidate_b: row.get(3)?,
            judge: row.get(4)?,
            presented_order: if order == "b_first" {
                PresentedOrder::BFirst
            } else {
                PresentedOrder::AFirst
            },
            winner: row.get(6)?,
            confidence: row.get(7)?,
            rationale: row.get(8)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn order_str(order: PresentedOrder) -> &'static str {
    match order {
        PresentedOrder::AFirst => "a_first",
        PresentedOrder::BFirst => "b_first",
    }
}
