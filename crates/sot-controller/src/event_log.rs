//! Append-only journal of every state change in a run.
//!
//! Folding the log yields the evaluation records, the pending set and the
//! best-so-far; replaying it against a freshly configured strategy rebuilds
//! that strategy's state call for call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use sot_strategy::SearchStrategy;
use sot_types::{
    validation_error, EvaluationId, EvaluationRecord, EvaluationStatus, SotResult, StrategyError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Budget issued and every evaluation resolved.
    Completed,
    /// Stop requested by the operator.
    Stopped,
    /// The strategy could propose nothing more before the budget was spent.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Started {
        run_id: Uuid,
        budget: usize,
        at: DateTime<Utc>,
    },
    /// Result of one `propose(requested)` call, possibly empty.
    Submitted {
        requested: usize,
        records: Vec<EvaluationRecord>,
    },
    Completed {
        id: EvaluationId,
        value: f64,
        completed_at: DateTime<Utc>,
    },
    Failed {
        id: EvaluationId,
        reason: String,
        completed_at: DateTime<Utc>,
    },
    /// Pending work dispatched again after a resume.
    Resubmitted {
        ids: Vec<EvaluationId>,
        at: DateTime<Utc>,
    },
    StrategyUpdated {
        issued: usize,
        completed: usize,
        failed: usize,
    },
    Terminated {
        reason: TerminationReason,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Started { .. } => "started",
            Event::Submitted { .. } => "submitted",
            Event::Completed { .. } => "completed",
            Event::Failed { .. } => "failed",
            Event::Resubmitted { .. } => "resubmitted",
            Event::StrategyUpdated { .. } => "strategy_updated",
            Event::Terminated { .. } => "terminated",
        }
    }
}

/// Everything derivable from a prefix of the log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogState {
    pub run_id: Option<Uuid>,
    pub budget: usize,
    pub records: BTreeMap<EvaluationId, EvaluationRecord>,
    /// Pending ids and their points.
    pub pending: BTreeMap<EvaluationId, Vec<f64>>,
    pub issued: usize,
    pub completed: usize,
    pub failed: usize,
    pub best: Option<EvaluationRecord>,
    pub next_id: EvaluationId,
    pub terminated: Option<TerminationReason>,
}

impl Default for LogState {
    fn default() -> Self {
        Self {
            run_id: None,
            budget: 0,
            records: BTreeMap::new(),
            pending: BTreeMap::new(),
            issued: 0,
            completed: 0,
            failed: 0,
            best: None,
            next_id: EvaluationId(0),
            terminated: None,
        }
    }
}

impl LogState {
    /// Budget fully issued and nothing left pending.
    pub fn is_complete(&self) -> bool {
        self.issued >= self.budget && self.pending.is_empty()
    }

    /// Apply the event at position `index`. Returns the record it resolved,
    /// if any.
    pub fn apply(&mut self, index: usize, event: &Event) -> SotResult<Option<&EvaluationRecord>> {
        if self.run_id.is_none() && !matches!(event, Event::Started { .. }) {
            return Err(validation_error!(
                "event {index}: {} before the run started",
                event.kind()
            ));
        }

        match event {
            Event::Started { run_id, budget, .. } => {
                if self.run_id.is_some() {
                    return Err(validation_error!("event {index}: run started twice"));
                }
                self.run_id = Some(*run_id);
                self.budget = *budget;
            }
            Event::Submitted { requested, records } => {
                if records.len() > *requested {
                    return Err(validation_error!(
                        "event {index}: {} records for {} requested",
                        records.len(),
                        requested
                    ));
                }
                for record in records {
                    if record.status != EvaluationStatus::Pending {
                        return Err(validation_error!(
                            "event {index}: {} submitted as {:?}",
                            record.id,
                            record.status
                        ));
                    }
                    if record.id < self.next_id {
                        return Err(validation_error!(
                            "event {index}: {} reused or out of order",
                            record.id
                        ));
                    }
                    if self.issued >= self.budget {
                        return Err(validation_error!(
                            "event {index}: {} exceeds budget {}",
                            record.id,
                            self.budget
                        ));
                    }
                    self.pending.insert(record.id, record.point.clone());
                    self.records.insert(record.id, record.clone());
                    self.issued += 1;
                    self.next_id = record.id.next();
                }
            }
            Event::Completed {
                id,
                value,
                completed_at,
            } => {
                let record = self.resolve(index, *id)?;
                record
                    .mark_completed(*value, *completed_at)
                    .map_err(|e| validation_error!("event {index}: {e}"))?;
                let snapshot = record.clone();
                self.completed += 1;
                if snapshot.improves_on(self.best.as_ref()) {
                    self.best = Some(snapshot);
                }
                return Ok(self.records.get(id));
            }
            Event::Failed {
                id,
                reason,
                completed_at,
            } => {
                let record = self.resolve(index, *id)?;
                record
                    .mark_failed(reason.clone(), *completed_at)
                    .map_err(|e| validation_error!("event {index}: {e}"))?;
                self.failed += 1;
                return Ok(self.records.get(id));
            }
            Event::Resubmitted { ids, .. } => {
                if let Some(id) = ids.iter().find(|id| !self.pending.contains_key(*id)) {
                    return Err(validation_error!(
                        "event {index}: {id} resubmitted but not pending"
                    ));
                }
                self.terminated = None;
            }
            Event::StrategyUpdated {
                issued,
                completed,
                failed,
            } => {
                if (*issued, *completed, *failed) != (self.issued, self.completed, self.failed) {
                    return Err(validation_error!(
                        "event {index}: progress marker {issued}/{completed}/{failed} \
                         disagrees with {}/{}/{}",
                        self.issued,
                        self.completed,
                        self.failed
                    ));
                }
            }
            Event::Terminated { reason, .. } => {
                self.terminated = Some(*reason);
            }
        }
        Ok(None)
    }

    fn resolve(&mut self, index: usize, id: EvaluationId) -> SotResult<&mut EvaluationRecord> {
        if self.pending.remove(&id).is_none() {
            return Err(match self.records.get(&id) {
                Some(record) => validation_error!(
                    "event {index}: {id} already resolved as {:?}",
                    record.status
                ),
                None => validation_error!("event {index}: {id} was never submitted"),
            });
        }
        self.records
            .get_mut(&id)
            .ok_or_else(|| validation_error!("event {index}: {id} pending without a record"))
    }
}

/// Ordered, append-only event journal. Insertion order is replay order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(events: Vec<Event>) -> Self {
        Self { events }
    }

    pub fn append(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.events.clone()
    }

    /// Derive records, pending set and best-so-far, rejecting impossible
    /// transitions.
    pub fn fold(&self) -> SotResult<LogState> {
        let mut state = LogState::default();
        for (index, event) in self.events.iter().enumerate() {
            state.apply(index, event)?;
        }
        Ok(state)
    }

    /// Restart `strategy` with the logged budget and feed it every logged
    /// call in order. Each `Submitted` batch must be reproduced exactly.
    pub fn replay<S: SearchStrategy + ?Sized>(&self, strategy: &mut S) -> SotResult<LogState> {
        let budget = match self.events.first() {
            Some(Event::Started { budget, .. }) => *budget,
            _ => return Err(StrategyError::NotStarted.into()),
        };
        strategy.start(budget)?;

        let mut state = LogState::default();
        for (index, event) in self.events.iter().enumerate() {
            match event {
                Event::Submitted { requested, records } => {
                    let proposed = strategy.propose(*requested);
                    if proposed.len() != records.len() {
                        return Err(StrategyError::ReplayDivergence {
                            index,
                            message: format!(
                                "strategy proposed {} points, log holds {}",
                                proposed.len(),
                                records.len()
                            ),
                        }
                        .into());
                    }
                    if let Some(record) = records
                        .iter()
                        .zip(&proposed)
                        .find_map(|(r, p)| (r.point != *p).then_some(r))
                    {
                        return Err(StrategyError::ReplayDivergence {
                            index,
                            message: format!("{} was proposed at a different point", record.id),
                        }
                        .into());
                    }
                }
                Event::StrategyUpdated { issued, .. } if strategy.issued() != *issued => {
                    return Err(StrategyError::ReplayDivergence {
                        index,
                        message: format!(
                            "strategy issued {}, log says {}",
                            strategy.issued(),
                            issued
                        ),
                    }
                    .into());
                }
                _ => {}
            }

            if let Some(record) = state.apply(index, event)? {
                strategy.observe(record);
            }
        }
        Ok(state)
    }
}
