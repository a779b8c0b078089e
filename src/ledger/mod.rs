use crate::error::LedgerError;
use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Durable at-most-once bookkeeping for executed command ids.
///
/// The full state is rewritten on every mark; command volume is low-frequency
/// and ops-triggered, so there is no append log and no compaction. The ledger
/// is the sole authority for "already handled" — the poller's block watermark
/// only narrows discovery. One process per ledger file; in-process reads are
/// concurrent and writes exclusive.
pub struct ExecutionLedger {
    path: PathBuf,
    first_run: bool,
    state: RwLock<LedgerState>,
}

#[derive(Default)]
struct LedgerState {
    /// Canonical decimal string ids. Grow-only.
    executed: BTreeSet<String>,
    highest_seen: U256,
}

/// On-disk layout. Both fields are strings so arbitrary-precision ids
/// survive round-trips losslessly.
#[derive(Serialize, Deserialize)]
struct LedgerFile {
    executed_commands: Vec<String>,
    last_command_id: String,
}

impl ExecutionLedger {
    /// Open (or create) the ledger at `path`. The first-run flag is fixed
    /// here, from whether the file pre-existed, and never changes for the
    /// process lifetime.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let first_run = !path.exists();
        let state = if first_run {
            LedgerState::default()
        } else {
            Self::load(&path)?
        };

        Ok(Self {
            path,
            first_run,
            state: RwLock::new(state),
        })
    }

    fn load(path: &Path) -> Result<LedgerState, LedgerError> {
        let raw = fs::read_to_string(path).map_err(|source| LedgerError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let file: LedgerFile =
            serde_json::from_str(&raw).map_err(|source| LedgerError::Corrupt {
                path: path.display().to_string(),
                source,
            })?;

        let highest_seen = if file.last_command_id.is_empty() {
            U256::ZERO
        } else {
            U256::from_str_radix(&file.last_command_id, 10).map_err(|_| {
                LedgerError::InvalidLastId {
                    path: path.display().to_string(),
                    value: file.last_command_id.clone(),
                }
            })?
        };

        Ok(LedgerState {
            executed: file.executed_commands.into_iter().collect(),
            highest_seen,
        })
    }

    /// True only during the very first run of the agent against a fresh
    /// storage location.
    pub fn is_first_run(&self) -> bool {
        self.first_run
    }

    /// Pure lookup, no side effect.
    pub fn is_executed(&self, id: U256) -> bool {
        let state = self.state.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.executed.contains(&id.to_string())
    }

    /// Largest id ever marked. Informational ordering only; dedup is
    /// strictly by set membership.
    pub fn highest_seen_id(&self) -> U256 {
        let state = self.state.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.highest_seen
    }

    /// Record `id` as executed and persist synchronously. Idempotent:
    /// marking an already-marked id is a no-op success.
    pub fn mark_executed(&self, id: U256) -> Result<(), LedgerError> {
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);

        let inserted = state.executed.insert(id.to_string());
        if id > state.highest_seen {
            state.highest_seen = id;
        } else if !inserted {
            return Ok(());
        }

        self.persist(&state)
    }

    fn persist(&self, state: &LedgerState) -> Result<(), LedgerError> {
        let file = LedgerFile {
            executed_commands: state.executed.iter().cloned().collect(),
            last_command_id: state.highest_seen.to_string(),
        };

        let json = serde_json::to_string_pretty(&file).map_err(|source| LedgerError::Corrupt {
            path: self.path.display().to_string(),
            source,
        })?;

        fs::write(&self.path, json).map_err(|source| LedgerError::Write {
            path: self.path.display().to_string(),
            source,
        })
    }
}
