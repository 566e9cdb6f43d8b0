//! Correlates live queue snapshots with log-derived unit runs.
//!
//! Each build merges the current snapshot for one slot with the newest
//! `SlotRun` reconstructed from the log, producing durable [`WorkUnit`]
//! records plus a current-unit pointer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::line::UnitResult;
use crate::run::{FahLog, FrameMark, UnitRun};
use crate::snapshot::{UnitSnapshot, UnitState};
use crate::types::ProjectKey;

/// Identifies a work unit within one build: slot plus queue index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkUnitKey {
    pub slot_id: u32,
    pub queue_index: u32,
}

/// Durable merge of a live queue entry with its log-derived unit run.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkUnit {
    pub key: WorkUnitKey,
    pub project: ProjectKey,
    pub state: UnitState,
    pub assigned: Option<DateTime<Utc>>,
    pub timeout: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub work_server: Option<String>,
    pub attempts: u32,
    /// Frames completed as reported by the client snapshot.
    pub frames_done: u32,
    pub total_frames: u32,
    /// Core version from the log, once seen.
    pub core_version: Option<f64>,
    /// Observed frames from the log.
    pub frames: Vec<FrameMark>,
    pub result: UnitResult,
    /// Whether the matched log span carried a too-many-errors marker.
    pub too_many_errors: bool,
    /// Whether a log span was found for this unit.
    pub log_found: bool,
}

impl WorkUnit {
    fn from_snapshot(entry: &UnitSnapshot) -> Self {
        Self {
            key: WorkUnitKey {
                slot_id: entry.slot,
                queue_index: entry.id,
            },
            project: entry.project,
            state: entry.state,
            assigned: entry.assigned,
            timeout: entry.timeout,
            deadline: entry.deadline,
            work_server: entry.work_server.clone(),
            attempts: entry.attempts,
            frames_done: entry.frames_done,
            total_frames: entry.total_frames,
            core_version: None,
            frames: Vec::new(),
            result: UnitResult::Unknown,
            too_many_errors: false,
            log_found: false,
        }
    }

    fn merge_unit_run(&mut self, unit_run: &UnitRun) {
        self.core_version = unit_run.core_version;
        self.frames = unit_run.frames.clone();
        self.result = unit_run.result;
        self.too_many_errors = unit_run.too_many_errors;
        self.log_found = true;
    }

    /// The most recently observed log frame.
    #[must_use]
    pub fn last_frame(&self) -> Option<&FrameMark> {
        self.frames.last()
    }

    /// Frames completed, preferring log observations over the snapshot.
    #[must_use]
    pub fn frames_complete(&self) -> u32 {
        self.last_frame().map_or(self.frames_done, |frame| frame.id)
    }

    /// Whether this unit is finished, for history insert and benchmarking.
    ///
    /// A unit is terminal when its result denotes completion or failure, or
    /// when the log carried a too-many-errors marker while the result is
    /// otherwise unclassified.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.result.is_completed()
            || self.result.is_failed()
            || (self.too_many_errors && matches!(self.result, UnitResult::Unknown))
    }
}

/// The work units built for one slot, plus the current-unit pointer.
///
/// Invariants: at most one unit per key, and `current` always references a
/// member of `units`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkUnitCollection {
    units: Vec<WorkUnit>,
    current: Option<WorkUnitKey>,
}

impl WorkUnitCollection {
    /// Inserts a unit, replacing any existing unit with the same key.
    fn insert(&mut self, unit: WorkUnit) {
        if let Some(existing) = self.units.iter_mut().find(|u| u.key == unit.key) {
            *existing = unit;
        } else {
            self.units.push(unit);
        }
    }

    pub fn units(&self) -> &[WorkUnit] {
        &self.units
    }

    pub const fn current_key(&self) -> Option<WorkUnitKey> {
        self.current
    }

    /// The unit the current pointer references.
    #[must_use]
    pub fn current_unit(&self) -> Option<&WorkUnit> {
        let key = self.current?;
        self.units.iter().find(|u| u.key == key)
    }

    #[must_use]
    pub fn get(&self, key: WorkUnitKey) -> Option<&WorkUnit> {
        self.units.iter().find(|u| u.key == key)
    }
}

/// Finds the last unit run in the slot's newest `SlotRun` matching a live
/// entry. Ties break by recency: queue indices recycle, so the newest
/// matching span wins.
fn find_unit_run<'log>(
    log: &'log FahLog,
    slot_id: u32,
    queue_index: u32,
    project: ProjectKey,
) -> Option<&'log UnitRun> {
    let slot_run = log.current_slot_run(slot_id)?;
    slot_run
        .unit_runs_rev()
        .find(|unit| unit.matches(queue_index, project))
}

/// Like [`find_unit_run`], but searches every run newest-first. Used by the
/// continuity rule, which must locate spans independent of the snapshot.
fn find_unit_run_any_run<'log>(
    log: &'log FahLog,
    slot_id: u32,
    queue_index: u32,
    project: ProjectKey,
) -> Option<&'log UnitRun> {
    log.runs.iter().rev().find_map(|run| {
        run.slot_run(slot_id)?
            .unit_runs_rev()
            .find(|unit| unit.matches(queue_index, project))
    })
}

/// Builds the work unit collection for one slot.
///
/// Merges each live entry with its matched log span (or keeps
/// protocol-only fields on a miss), resolves the current pointer
/// (RUNNING over READY), and re-inserts a previous current unit that has
/// left the snapshot so it never silently disappears between builds.
#[must_use]
pub fn build(
    slot_id: u32,
    snapshot: &[UnitSnapshot],
    log: &FahLog,
    previous_current: Option<&WorkUnit>,
) -> WorkUnitCollection {
    let mut collection = WorkUnitCollection::default();

    for entry in snapshot.iter().filter(|entry| entry.slot == slot_id) {
        let mut unit = WorkUnit::from_snapshot(entry);
        match find_unit_run(log, slot_id, entry.id, entry.project) {
            Some(unit_run) => unit.merge_unit_run(unit_run),
            None => {
                tracing::debug!(
                    slot_id,
                    queue_index = entry.id,
                    project = %entry.project,
                    "log section not found for live queue entry"
                );
            }
        }
        collection.insert(unit);
    }

    collection.current = resolve_current(&collection);

    if let Some(previous) = previous_current {
        if previous.key.slot_id == slot_id && !still_in_snapshot(previous, snapshot) {
            if collection.get(previous.key).is_some() {
                // The queue index was already recycled for a new live entry;
                // that entry keeps the key.
                tracing::debug!(
                    slot_id,
                    queue_index = previous.key.queue_index,
                    "previous current unit's queue index recycled, dropping carried copy"
                );
            } else {
                let mut carried = previous.clone();
                if let Some(unit_run) =
                    find_unit_run_any_run(log, slot_id, previous.key.queue_index, previous.project)
                {
                    carried.merge_unit_run(unit_run);
                }
                collection.insert(carried);
            }
        }
    }

    collection
}

/// RUNNING entry if any, else READY, else unset.
fn resolve_current(collection: &WorkUnitCollection) -> Option<WorkUnitKey> {
    collection
        .units
        .iter()
        .find(|unit| unit.state == UnitState::Running)
        .or_else(|| {
            collection
                .units
                .iter()
                .find(|unit| unit.state == UnitState::Ready)
        })
        .map(|unit| unit.key)
}

/// Whether the previous current unit still appears in the live snapshot,
/// identified by queue index, project, and assignment time.
fn still_in_snapshot(previous: &WorkUnit, snapshot: &[UnitSnapshot]) -> bool {
    snapshot.iter().any(|entry| {
        entry.slot == previous.key.slot_id
            && entry.id == previous.key.queue_index
            && entry.project == previous.project
            && entry.assigned == previous.assigned
    })
}
