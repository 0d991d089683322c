//! Saving and loading the learner's value table.
//!
//! Tables are stored as pretty-printed JSON. A missing or unreadable file is
//! never fatal: the learner keeps the table it already has and the caller gets
//! a [`LoadOutcome`] describing what happened.

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufReader, ErrorKind},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{PersistenceError, Position, agent::QLearner};

/// Default location of the saved table, relative to the working directory.
pub const DEFAULT_TABLE_PATH: &str = "models/q_table.json";

/// Serializable export of a complete value table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QTableSnapshot {
    pub rows: usize,
    pub cols: usize,
    pub entries: Vec<QTableEntry>,
}

/// Value estimates of one cell, keyed by action name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QTableEntry {
    pub position: Position,
    pub values: BTreeMap<String, f64>,
}

/// What happened when loading a saved table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The saved table replaced the learner's table.
    Restored,
    /// No saved table exists; the learner starts from its fresh table.
    Missing,
    /// A saved table exists but could not be used; the learner keeps its table.
    Corrupt { reason: String },
}

/// File-backed store for value tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QTableStore {
    path: PathBuf,
}

impl Default for QTableStore {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_PATH)
    }
}

impl QTableStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the learner's table, creating parent directories as needed.
    ///
    /// The table is written to a sibling file first and then renamed over the
    /// target, so a failed save leaves any previous table intact.
    pub fn save(&self, learner: &QLearner) -> Result<(), PersistenceError> {
        let io_error = |operation, source| PersistenceError::Io {
            operation,
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| io_error("create directory for", e))?;
        }
        let encoded = serde_json::to_vec_pretty(&learner.snapshot())?;
        let staging = self.staging_path();
        fs::write(&staging, encoded).map_err(|e| io_error("write", e))?;
        if let Err(e) = fs::rename(&staging, &self.path) {
            let _ = fs::remove_file(&staging);
            return Err(io_error("replace", e));
        }

        info!(path = %self.path.display(), "saved value table");
        Ok(())
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Loads the saved table into `learner`.
    pub fn load_into(&self, learner: &mut QLearner) -> LoadOutcome {
        let outcome = match self.read_snapshot() {
            Ok(None) => LoadOutcome::Missing,
            Ok(Some(snapshot)) => match learner.restore(&snapshot) {
                Ok(()) => LoadOutcome::Restored,
                Err(e) => LoadOutcome::Corrupt {
                    reason: e.to_string(),
                },
            },
            Err(reason) => LoadOutcome::Corrupt { reason },
        };

        let path = self.path.display();
        match &outcome {
            LoadOutcome::Restored => info!(%path, "restored saved value table"),
            LoadOutcome::Missing => {
                info!(%path, "no saved value table found, starting from a fresh table")
            }
            LoadOutcome::Corrupt { reason } => {
                warn!(%path, %reason, "saved value table is unusable, keeping the current table")
            }
        }
        outcome
    }

    fn read_snapshot(&self) -> Result<Option<QTableSnapshot>, String> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(format!("failed to open: {e}")),
        };
        serde_json::from_reader(BufReader::new(file))
            .map(Some)
            .map_err(|e| format!("failed to parse: {e}"))
    }
}
