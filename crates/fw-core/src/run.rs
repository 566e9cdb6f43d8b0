//! The reconstructed run tree: `FahLog` → `Run` → `SlotRun` → `UnitRun`.
//!
//! The tracker ([`crate::tracker`]) exclusively mutates this tree while
//! parsing; afterwards the tree is read-only. Line spans are global
//! zero-based indices into the flattened line sequence.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveTime, Utc};

use crate::line::{LogFormat, LogLine, UnitResult};
use crate::tracker;
use crate::types::ProjectKey;

/// One observed frame within a unit run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMark {
    /// Frame id (the printed percent).
    pub id: u32,
    /// Steps completed.
    pub done: u64,
    /// Total steps.
    pub total: u64,
    /// Time offset of the frame line.
    pub offset: Option<NaiveTime>,
    /// Duration since the previous observed frame, when both offsets exist.
    pub duration: Option<Duration>,
}

/// One attempt to process a work unit within a slot.
///
/// Open while the attempt is live; closed by the next attempt in the same
/// slot or by the end of the run.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitRun {
    /// Queue index; a recycled small integer.
    pub queue_index: u32,
    /// Global index of the first line in this span.
    pub start_index: usize,
    /// Global index of the last line in this span; `None` while open.
    pub end_index: Option<usize>,
    /// Time offset at which the attempt started.
    pub start_offset: Option<NaiveTime>,
    /// Core version, once seen.
    pub core_version: Option<f64>,
    /// Observed frames, in order.
    pub frames: Vec<FrameMark>,
    /// Every project 4-tuple seen in this span.
    pub projects: Vec<ProjectKey>,
    /// Core return result.
    pub result: UnitResult,
    /// Whether a too-many-errors marker appeared in this span.
    pub too_many_errors: bool,
}

impl UnitRun {
    pub(crate) fn new(queue_index: u32, start_index: usize, start_offset: Option<NaiveTime>) -> Self {
        Self {
            queue_index,
            start_index,
            end_index: None,
            start_offset,
            core_version: None,
            frames: Vec::new(),
            projects: Vec::new(),
            result: UnitResult::Unknown,
            too_many_errors: false,
        }
    }

    pub const fn is_open(&self) -> bool {
        self.end_index.is_none()
    }

    /// The most recently seen project tuple.
    #[must_use]
    pub fn last_project(&self) -> Option<ProjectKey> {
        self.projects.last().copied()
    }

    /// The most recently observed frame.
    #[must_use]
    pub fn last_frame(&self) -> Option<&FrameMark> {
        self.frames.last()
    }

    /// Inter-frame durations observed in this span.
    #[must_use]
    pub fn frame_durations(&self) -> Vec<Duration> {
        self.frames.iter().filter_map(|f| f.duration).collect()
    }

    /// Whether this attempt matches a live queue entry.
    #[must_use]
    pub fn matches(&self, queue_index: u32, project: ProjectKey) -> bool {
        self.queue_index == queue_index && self.projects.contains(&project)
    }
}

/// Slot activity status within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotRunStatus {
    #[default]
    Unknown,
    Running,
    /// Paused after repeated early unit ends.
    EuePaused,
}

/// One slot's activity within one run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SlotRun {
    pub slot_id: u32,
    /// Unit runs in chronological order; the last one may be open.
    pub unit_runs: Vec<UnitRun>,
    pub completed_units: u32,
    pub failed_units: u32,
    /// Legacy lifetime counter, when the log reports one.
    pub total_completed_units: Option<u32>,
    pub status: SlotRunStatus,
}

impl SlotRun {
    pub(crate) fn new(slot_id: u32) -> Self {
        Self {
            slot_id,
            ..Self::default()
        }
    }

    /// The most recent unit run, open or sealed.
    #[must_use]
    pub fn current_unit_run(&self) -> Option<&UnitRun> {
        self.unit_runs.last()
    }

    pub(crate) fn open_unit_run_mut(&mut self) -> Option<&mut UnitRun> {
        self.unit_runs.last_mut().filter(|unit| unit.is_open())
    }

    /// Unit runs newest-first.
    pub fn unit_runs_rev(&self) -> impl Iterator<Item = &UnitRun> {
        self.unit_runs.iter().rev()
    }
}

/// One continuous client process lifetime between restarts.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    /// Global index of the run start marker (or first attributed line).
    pub start_index: usize,
    /// Absolute start time, when the start marker carried one.
    pub start_time: Option<DateTime<Utc>>,
    pub client_version: Option<String>,
    pub arguments: Option<String>,
    pub slot_runs: BTreeMap<u32, SlotRun>,
    /// Lines owned by this run, contiguous from `start_index`.
    pub lines: Vec<LogLine>,
}

impl Run {
    pub(crate) fn new(start_index: usize, start_time: Option<DateTime<Utc>>) -> Self {
        Self {
            start_index,
            start_time,
            client_version: None,
            arguments: None,
            slot_runs: BTreeMap::new(),
            lines: Vec::new(),
        }
    }

    pub fn slot_run(&self, slot_id: u32) -> Option<&SlotRun> {
        self.slot_runs.get(&slot_id)
    }

    pub(crate) fn slot_run_mut(&mut self, slot_id: u32) -> &mut SlotRun {
        self.slot_runs
            .entry(slot_id)
            .or_insert_with(|| SlotRun::new(slot_id))
    }

    /// Seals every open unit run at `end_index`.
    pub(crate) fn seal(&mut self, end_index: usize) {
        for slot_run in self.slot_runs.values_mut() {
            if let Some(unit) = slot_run.open_unit_run_mut() {
                unit.end_index = Some(end_index);
            }
        }
    }
}

/// Ordered run collection reconstructed from one client's log.
///
/// Supports full parse, incremental append, and hard restart reset. All
/// mutation goes through the tracker; readers see completed state only.
#[derive(Debug, Clone, PartialEq)]
pub struct FahLog {
    pub format: LogFormat,
    /// Lines seen before the first recognized run start.
    pub prelude: Vec<LogLine>,
    /// Runs, most recent last.
    pub runs: Vec<Run>,
    pub(crate) next_index: usize,
    /// Most recently referenced slot id, for lines without a slot tag.
    pub(crate) active_slot: Option<u32>,
}

impl FahLog {
    #[must_use]
    pub const fn new(format: LogFormat) -> Self {
        Self {
            format,
            prelude: Vec::new(),
            runs: Vec::new(),
            next_index: 0,
            active_slot: None,
        }
    }

    /// Parses a complete log text.
    #[must_use]
    pub fn parse(format: LogFormat, text: &str) -> Self {
        let mut log = Self::new(format);
        log.append(text);
        log
    }

    /// Appends new log text, extending open state in place.
    ///
    /// A run start marker at the head of the new text seals carried-over
    /// open state exactly as it would mid-parse.
    pub fn append(&mut self, text: &str) {
        for raw in text.lines() {
            tracker::apply_line(self, raw);
        }
    }

    /// Discards all reconstructed state, keeping the format.
    pub fn reset(&mut self) {
        *self = Self::new(self.format);
    }

    /// The most recent run, if any.
    #[must_use]
    pub fn current_run(&self) -> Option<&Run> {
        self.runs.last()
    }

    /// The most recent slot run for a slot, searching runs newest-first.
    #[must_use]
    pub fn current_slot_run(&self, slot_id: u32) -> Option<&SlotRun> {
        self.runs.iter().rev().find_map(|run| run.slot_run(slot_id))
    }

    /// Lazy, restartable iteration over every owned line in original order.
    ///
    /// Walks the tree without copying or mutating it; call again for a
    /// fresh iteration.
    pub fn lines(&self) -> impl Iterator<Item = &LogLine> {
        self.prelude
            .iter()
            .chain(self.runs.iter().flat_map(|run| run.lines.iter()))
    }

    /// Looks up a line by global index.
    #[must_use]
    pub fn line(&self, index: usize) -> Option<&LogLine> {
        if index < self.prelude.len() {
            return self.prelude.get(index);
        }
        let run = self
            .runs
            .iter()
            .take_while(|run| run.start_index <= index)
            .last()?;
        run.lines.get(index - run.start_index)
    }

    /// Total number of lines consumed so far.
    #[must_use]
    pub const fn line_count(&self) -> usize {
        self.next_index
    }
}
