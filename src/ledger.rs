//! Cross-run channel ledger: Beta posterior counts per generation channel.
//!
//! The file is read at the start of a run and rewritten at the end, under an
//! exclusive lock file, through a temp file in the same directory and an atomic
//! rename. A crash mid-write leaves the previous ledger intact.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::channel::Channel;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger at {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub successes: u64,
    pub failures: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failure_reasons: BTreeMap<String, u64>,
}

impl ChannelRecord {
    /// Beta(successes + 1, failures + 1) parameters.
    pub fn beta_params(&self) -> (f64, f64) {
        (self.successes as f64 + 1.0, self.failures as f64 + 1.0)
    }

    pub fn posterior_mean(&self) -> f64 {
        let (a, b) = self.beta_params();
        a / (a + b)
    }
}

/// `{channel_id: {successes, failures}}`. Unknown channel ids are preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelLedger {
    pub channels: BTreeMap<String, ChannelRecord>,
}

impl ChannelLedger {
    pub fn record(&self, channel: Channel) -> ChannelRecord {
        self.channels
            .get(channel.as_str())
            .cloned()
            .unwrap_or_default()
    }

    pub fn record_mut(&mut self, channel: Channel) -> &mut ChannelRecord {
        self.channels.entry(channel.as_str().to_string()).or_default()
    }
}

/// File-backed ledger. Pass it explicitly to whatever needs to learn.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty ledger; an unreadable one is an error.
    pub fn load(&self) -> Result<ChannelLedger, LedgerError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(ChannelLedger::default()),
            Ok(text) => serde_json::from_str(&text).map_err(|source| LedgerError::Parse {
                path: self.path.clone(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ChannelLedger::default()),
            Err(source) => Err(self.io_error(source)),
        }
    }

    pub fn commit(&self, ledger: &ChannelLedger) -> Result<(), LedgerError> {
        write_json_atomic(&self.path, ledger).map_err(|e| self.io_error(e))
    }

    /// Locked read-modify-write. Returns the ledger as committed.
    pub fn update<F>(&self, f: F) -> Result<ChannelLedger, LedgerError>
    where
        F: FnOnce(&mut ChannelLedger),
    {
        let _lock = LedgerLock::acquire(&self.path).map_err(|e| self.io_error(e))?;
        let mut ledger = self.load()?;
        f(&mut ledger);
        self.commit(&ledger)?;
        Ok(ledger)
    }

    fn io_error(&self, source: std::io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[derive(Debug)]
struct LedgerLock {
    _file: std::fs::File,
}

impl LedgerLock {
    fn acquire(path: &Path) -> std::io::Result<Self> {
        let mut lock_path = path.to_path_buf();
        lock_path.set_extension("lock");
        if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(lock_path)?;
        file.lock_exclusive()?;
        Ok(Self { _file: file })
    }
}

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> std::io::Result<()> {
    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent.to_path_buf(),
        None => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
    tmp.write_all(&bytes)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
