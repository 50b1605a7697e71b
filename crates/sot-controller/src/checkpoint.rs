//! Atomic persistence of run snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use sot_types::{EvaluationId, EvaluationRecord, SotError, SotResult};

use crate::event_log::{Event, EventLog, LogState};

/// Snapshot layout version; anything else fails to load.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub id: EvaluationId,
    pub point: Vec<f64>,
}

/// Everything needed to resume a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub format_version: u32,
    pub run_id: Uuid,
    pub dim: usize,
    pub budget: usize,
    pub issued_count: usize,
    pub next_id: EvaluationId,
    pub event_log: Vec<Event>,
    pub strategy_state: serde_json::Value,
    pub pending: Vec<PendingEntry>,
    pub best_so_far: Option<EvaluationRecord>,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Check the snapshot is self-consistent and return the folded log.
    pub fn validate(&self) -> SotResult<LogState> {
        if self.format_version != FORMAT_VERSION {
            return Err(SotError::corrupt(format!(
                "unsupported format version {} (expected {})",
                self.format_version, FORMAT_VERSION
            )));
        }
        if self.dim == 0 {
            return Err(SotError::corrupt("dimension is zero"));
        }
        if self.issued_count > self.budget {
            return Err(SotError::corrupt(format!(
                "issued {} exceeds budget {}",
                self.issued_count, self.budget
            )));
        }
        if let Some(entry) = self.pending.iter().find(|p| p.point.len() != self.dim) {
            return Err(SotError::corrupt(format!(
                "pending {} has dimension {}, run has {}",
                entry.id,
                entry.point.len(),
                self.dim
            )));
        }
        for (index, event) in self.event_log.iter().enumerate() {
            let Event::Submitted { records, .. } = event else {
                continue;
            };
            if let Some(record) = records.iter().find(|r| r.point.len() != self.dim) {
                return Err(SotError::corrupt(format!(
                    "event {index}: {} has dimension {}, run has {}",
                    record.id,
                    record.point.len(),
                    self.dim
                )));
            }
        }

        let state = EventLog::from_events(self.event_log.clone())
            .fold()
            .map_err(|e| SotError::corrupt(format!("event log: {e}")))?;

        if state.run_id != Some(self.run_id) {
            return Err(SotError::corrupt("event log belongs to a different run"));
        }
        if state.budget != self.budget || state.issued != self.issued_count {
            return Err(SotError::corrupt(format!(
                "event log shows {}/{} issued, snapshot says {}/{}",
                state.issued, state.budget, self.issued_count, self.budget
            )));
        }
        if state.next_id != self.next_id {
            return Err(SotError::corrupt(format!(
                "next id {} disagrees with event log ({})",
                self.next_id, state.next_id
            )));
        }
        let logged_pending: Vec<PendingEntry> = state
            .pending
            .iter()
            .map(|(id, point)| PendingEntry {
                id: *id,
                point: point.clone(),
            })
            .collect();
        if logged_pending != self.pending {
            return Err(SotError::corrupt("pending set disagrees with event log"));
        }
        if state.best != self.best_so_far {
            return Err(SotError::corrupt("best-so-far disagrees with event log"));
        }
        Ok(state)
    }
}

/// A single snapshot file, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Write `checkpoint` to a temporary sibling, fsync it, then rename it over
    /// the destination. A crash at any point leaves either the previous
    /// snapshot or the new one, never a mix.
    pub fn save(&self, checkpoint: &Checkpoint) -> SotResult<()> {
        let bytes = serde_json::to_vec(checkpoint)?;
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("checkpoint");
        let temp_path = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        if let Err(e) = write_synced(&temp_path, &bytes) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        #[cfg(unix)]
        {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        debug!(
            "checkpoint saved to {}: {} events, {} pending",
            self.path.display(),
            checkpoint.event_log.len(),
            checkpoint.pending.len()
        );
        Ok(())
    }

    /// Read and validate the snapshot. Every failure is reported as
    /// `CorruptCheckpoint`.
    pub fn load(&self) -> SotResult<Checkpoint> {
        let bytes = fs::read(&self.path).map_err(|e| {
            SotError::corrupt(format!("cannot read {}: {e}", self.path.display()))
        })?;
        let checkpoint: Checkpoint = serde_json::from_slice(&bytes).map_err(|e| {
            warn!("checkpoint {} is unreadable: {}", self.path.display(), e);
            SotError::corrupt(format!("{}: {e}", self.path.display()))
        })?;
        checkpoint.validate()?;
        Ok(checkpoint)
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_checkpoint() -> Checkpoint {
        let run_id = Uuid::new_v4();
        let r0 = EvaluationRecord::new(EvaluationId(0), vec![0.1, 0.2]);
        let r1 = EvaluationRecord::new(EvaluationId(1), vec![0.3, 0.4]);
        let completed_at = Utc::now();
        let events = vec![
            Event::Started {
                run_id,
                budget: 5,
                at: Utc::now(),
            },
            Event::Submitted {
                requested: 2,
                records: vec![r0.clone(), r1.clone()],
            },
            Event::Completed {
                id: EvaluationId(0),
                value: 1.0 / 3.0,
                completed_at,
            },
            Event::StrategyUpdated {
                issued: 2,
                completed: 1,
                failed: 0,
            },
        ];
        let mut best = r0;
        best.mark_completed(1.0 / 3.0, completed_at).unwrap();

        Checkpoint {
            format_version: FORMAT_VERSION,
            run_id,
            dim: 2,
            budget: 5,
            issued_count: 2,
            next_id: EvaluationId(2),
            event_log: events,
            strategy_state: serde_json::json!({ "opaque": [1, 2, 3] }),
            pending: vec![PendingEntry {
                id: r1.id,
                point: r1.point,
            }],
            best_so_far: Some(best),
            saved_at: Utc::now(),
        }
    }

    #[test]
    fn save_then_load_is_identity() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("run.json"));
        assert!(!store.exists());

        let checkpoint = sample_checkpoint();
        store.save(&checkpoint).unwrap();
        assert!(store.exists());
        assert_eq!(store.load().unwrap(), checkpoint);
    }

    #[test]
    fn save_replaces_and_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("run.json"));
        let mut checkpoint = sample_checkpoint();
        store.save(&checkpoint).unwrap();
        checkpoint.saved_at = Utc::now();
        store.save(&checkpoint).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["run.json".to_string()]);
        assert_eq!(store.load().unwrap().saved_at, checkpoint.saved_at);
    }

    #[test]
    fn missing_file_is_corrupt() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("absent.json"));
        assert!(store.load().unwrap_err().is_corrupt_checkpoint());
    }

    #[test]
    fn unknown_version_is_corrupt() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("run.json"));
        let mut checkpoint = sample_checkpoint();
        checkpoint.format_version = 99;
        store.save(&checkpoint).unwrap();
        assert!(store.load().unwrap_err().is_corrupt_checkpoint());
    }

    #[test]
    fn inconsistent_snapshot_is_corrupt() {
        let mut checkpoint = sample_checkpoint();
        checkpoint.issued_count = 3;
        assert!(checkpoint.validate().unwrap_err().is_corrupt_checkpoint());

        let mut checkpoint = sample_checkpoint();
        checkpoint.pending.clear();
        assert!(checkpoint.validate().unwrap_err().is_corrupt_checkpoint());

        let mut checkpoint = sample_checkpoint();
        checkpoint.best_so_far = None;
        assert!(checkpoint.validate().unwrap_err().is_corrupt_checkpoint());

        let mut checkpoint = sample_checkpoint();
        checkpoint.pending[0].point.push(0.5);
        assert!(checkpoint.validate().unwrap_err().is_corrupt_checkpoint());
    }

    #[test]
    fn short_logged_point_is_corrupt() {
        let mut checkpoint = sample_checkpoint();
        if let Event::Submitted { records, .. } = &mut checkpoint.event_log[1] {
            records[0].point.truncate(1);
        }
        if let Some(best) = checkpoint.best_so_far.as_mut() {
            best.point.truncate(1);
        }
        let err = checkpoint.validate().unwrap_err();
        assert!(err.is_corrupt_checkpoint());
        assert!(err.to_string().contains("event 1"));
    }

    #[test]
    fn garbage_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.json");
        fs::write(&path, b"{\"format_version\":1,").unwrap();
        let store = CheckpointStore::new(&path);
        assert!(store.load().unwrap_err().is_corrupt_checkpoint());
    }
}
