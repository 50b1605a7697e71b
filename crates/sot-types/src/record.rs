//! Evaluation records: the audit trail of a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{SotResult, SotError};

/// Sequence number of an evaluation, unique within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvaluationId(pub u64);

impl EvaluationId {
    pub fn next(self) -> Self {
        EvaluationId(self.0 + 1)
    }
}

impl fmt::Display for EvaluationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationStatus {
    Pending,
    Completed,
    Failed,
}

impl EvaluationStatus {
    pub fn is_resolved(self) -> bool {
        !matches!(self, EvaluationStatus::Pending)
    }
}

/// One objective evaluation.
///
/// Created `Pending` when the control loop dispatches it and resolved exactly
/// once, to `Completed` or `Failed`. A resolved record never changes again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub id: EvaluationId,
    pub point: Vec<f64>,
    pub status: EvaluationStatus,
    pub value: Option<f64>,
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl EvaluationRecord {
    pub fn new(id: EvaluationId, point: Vec<f64>) -> Self {
        Self::submitted_at(id, point, Utc::now())
    }

    pub fn submitted_at(id: EvaluationId, point: Vec<f64>, at: DateTime<Utc>) -> Self {
        Self {
            id,
            point,
            status: EvaluationStatus::Pending,
            value: None,
            error: None,
            submitted_at: at,
            completed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == EvaluationStatus::Pending
    }

    pub fn dim(&self) -> usize {
        self.point.len()
    }

    pub fn mark_completed(&mut self, value: f64, at: DateTime<Utc>) -> SotResult<()> {
        self.ensure_pending()?;
        self.status = EvaluationStatus::Completed;
        self.value = Some(value);
        self.completed_at = Some(at);
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: String, at: DateTime<Utc>) -> SotResult<()> {
        self.ensure_pending()?;
        self.status = EvaluationStatus::Failed;
        self.error = Some(reason);
        self.completed_at = Some(at);
        Ok(())
    }

    /// Completed value, if this record should count toward the best-so-far.
    pub fn objective(&self) -> Option<f64> {
        match self.status {
            EvaluationStatus::Completed => self.value,
            _ => None,
        }
    }

    /// Whether `self` should replace `current` as the best record.
    ///
    /// Minimization; a tie keeps the incumbent, so the earliest completion wins.
    pub fn improves_on(&self, current: Option<&EvaluationRecord>) -> bool {
        let Some(value) = self.objective() else {
            return false;
        };
        match current.and_then(EvaluationRecord::objective) {
            None => true,
            Some(best) => value < best,
        }
    }

    fn ensure_pending(&self) -> SotResult<()> {
        if self.status.is_resolved() {
            return Err(SotError::Validation(format!(
                "evaluation {} already resolved as {:?}",
                self.id, self.status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(id: u64, value: f64) -> EvaluationRecord {
        let mut record = EvaluationRecord::new(EvaluationId(id), vec![value]);
        record.mark_completed(value, Utc::now()).unwrap();
        record
    }

    #[test]
    fn record_lifecycle() {
        let mut record = EvaluationRecord::new(EvaluationId(1), vec![0.5, 1.5]);
        assert!(record.is_pending());
        assert_eq!(record.dim(), 2);

        record.mark_completed(3.25, Utc::now()).unwrap();
        assert_eq!(record.status, EvaluationStatus::Completed);
        assert_eq!(record.value, Some(3.25));
        assert!(record.completed_at.is_some());
    }

    #[test]
    fn record_failure() {
        let mut record = EvaluationRecord::new(EvaluationId(0), vec![1.0]);
        record.mark_failed("objective panicked".into(), Utc::now()).unwrap();
        assert_eq!(record.status, EvaluationStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("objective panicked"));
        assert_eq!(record.objective(), None);
    }

    #[test]
    fn resolved_record_is_immutable() {
        let mut record = completed(3, 1.0);
        assert!(record.mark_failed("late".into(), Utc::now()).is_err());
        assert!(record.mark_completed(0.0, Utc::now()).is_err());
        assert_eq!(record.value, Some(1.0));
        assert_eq!(record.status, EvaluationStatus::Completed);
    }

    #[test]
    fn best_tracking_minimizes_and_keeps_earliest_tie() {
        let first = completed(1, 2.0);
        let tie = completed(2, 2.0);
        let better = completed(3, 1.0);

        assert!(first.improves_on(None));
        assert!(!tie.improves_on(Some(&first)));
        assert!(better.improves_on(Some(&first)));
        assert!(!first.improves_on(Some(&better)));
    }

    #[test]
    fn failed_record_never_improves() {
        let mut failed = EvaluationRecord::new(EvaluationId(9), vec![0.0]);
        failed.mark_failed("boom".into(), Utc::now()).unwrap();
        assert!(!failed.improves_on(None));
    }

    #[test]
    fn id_serializes_as_plain_number() {
        let json = serde_json::to_string(&EvaluationId(42)).unwrap();
        assert_eq!(json, "42");
        assert_eq!(EvaluationId(41).next(), EvaluationId(42));
    }
}
