//! The run tracker state machine.
//!
//! Consumes classified and extracted lines in order, growing the
//! `Run` → `SlotRun` → `UnitRun` tree owned by [`FahLog`]. Transitions:
//!
//! 1. A run start marker seals the current run and pushes a new one.
//! 2. A slot queue-index selection closes the slot's open unit run at the
//!    previous line and opens a new one at this line.
//! 3. Any other recognized line folds into the open unit run, or, absent
//!    one, into the slot run / run aggregates.
//! 4. At end of input the tail stays open: it is the current live state.
//!
//! The tracker is total over malformed input: a corrupted or truncated
//! section bounds the affected unit run at whatever next marker or EOF
//! appears.

use chrono::Duration;

use crate::classify;
use crate::extract;
use crate::line::{LineData, LineType, LogFormat, LogLine, TypedPayload};
use crate::run::{FahLog, Run, SlotRunStatus, UnitRun};

/// Classifies, extracts, and applies one raw line to the log tree.
pub(crate) fn apply_line(log: &mut FahLog, raw: &str) {
    let index = log.next_index;
    log.next_index += 1;

    let line_type = classify::classify(log.format, raw);
    let data = extract::extract(log.format, line_type, raw);
    if let LineData::Error(e) = &data {
        tracing::trace!(index, line_type = ?line_type, error = %e, "line extraction failed");
    }
    let line = LogLine {
        raw: raw.to_string(),
        index,
        line_type,
        time_offset: extract::time_offset(log.format, raw),
        data,
    };

    match line.line_type {
        LineType::LogOpen => start_run(log, line),
        LineType::WorkUnitWorking => on_working(log, line),
        LineType::WorkUnitProject
        | LineType::WorkUnitCoreVersion
        | LineType::WorkUnitFrame
        | LineType::WorkUnitCoreReturn
        | LineType::WorkUnitTooManyErrors
        | LineType::ClientEuePause
        | LineType::ClientNumberOfUnitsCompleted => on_slot_line(log, line),
        LineType::ClientVersion | LineType::ClientArguments => on_run_line(log, line),
        LineType::None | LineType::LogHeader | LineType::Error => record(log, line),
    }
}

/// Seals the current run (if any) and opens a new one at this marker.
fn start_run(log: &mut FahLog, line: LogLine) {
    if let Some(run) = log.runs.last_mut() {
        run.seal(line.index.saturating_sub(1));
    }
    log.active_slot = None;

    let start_time = match line.data.payload() {
        Some(TypedPayload::Timestamp { value }) => Some(*value),
        _ => None,
    };
    let mut run = Run::new(line.index, start_time);
    run.lines.push(line);
    log.runs.push(run);
}

/// Ensures a run exists to attribute slot activity to.
///
/// A log truncated below its start marker still describes a live process;
/// a shell run with no start time bounds that activity.
fn ensure_run(log: &mut FahLog, index: usize) -> &mut Run {
    if log.runs.is_empty() {
        log.runs.push(Run::new(index, None));
    }
    log.runs.last_mut().expect("run pushed above")
}

/// Resolves which slot a work-unit line belongs to.
fn resolve_slot(log: &FahLog, raw: &str) -> Option<u32> {
    extract::slot_tag(log.format, raw)
        .map(|(_, slot)| slot)
        .or(log.active_slot)
        .or(match log.format {
            // Single-process logs have exactly one slot.
            LogFormat::Legacy => Some(0),
            LogFormat::FahClient => None,
        })
}

/// Queue-index selection: close the slot's open unit run, open a new one.
fn on_working(log: &mut FahLog, line: LogLine) {
    let selection = match line.data.payload() {
        Some(TypedPayload::QueueIndex { queue, slot }) => Some((*queue, *slot)),
        _ => None,
    };
    let index = line.index;
    let offset = line.time_offset;

    let Some((queue, slot)) = selection else {
        // Unparseable selection: the line is recorded but opens nothing.
        record(log, line);
        return;
    };

    log.active_slot = Some(slot);
    let run = ensure_run(log, index);
    run.lines.push(line);

    let slot_run = run.slot_run_mut(slot);
    if let Some(open) = slot_run.open_unit_run_mut() {
        open.end_index = Some(index.saturating_sub(1));
    }
    slot_run.unit_runs.push(UnitRun::new(queue, index, offset));
    slot_run.status = SlotRunStatus::Running;
}

/// Any other slot-scoped line: fold into the open unit run, else the slot run.
fn on_slot_line(log: &mut FahLog, line: LogLine) {
    let Some(slot) = resolve_slot(log, &line.raw) else {
        record(log, line);
        return;
    };
    log.active_slot = Some(slot);

    let index = line.index;
    let offset = line.time_offset;
    let line_type = line.line_type;
    let payload = line.data.payload().cloned();

    let run = ensure_run(log, index);
    run.lines.push(line);
    let slot_run = run.slot_run_mut(slot);

    match (line_type, payload) {
        (LineType::WorkUnitProject, Some(TypedPayload::Project { value })) => {
            if let Some(unit) = slot_run.open_unit_run_mut() {
                if unit.projects.last() != Some(&value) {
                    unit.projects.push(value);
                }
            }
        }
        (LineType::WorkUnitCoreVersion, Some(TypedPayload::CoreVersion { value })) => {
            if let Some(unit) = slot_run.open_unit_run_mut() {
                unit.core_version = Some(value);
            }
        }
        (LineType::WorkUnitFrame, Some(TypedPayload::Frame { value })) => {
            if let Some(unit) = slot_run.open_unit_run_mut() {
                let duration = match (unit.last_frame().and_then(|f| f.offset), offset) {
                    (Some(prev), Some(cur)) => {
                        let mut d = cur - prev;
                        if d < Duration::zero() {
                            // Midnight wrap: offsets are intra-day.
                            d += Duration::hours(24);
                        }
                        Some(d)
                    }
                    _ => None,
                };
                unit.frames.push(crate::run::FrameMark {
                    id: value.percent,
                    done: value.done,
                    total: value.total,
                    offset,
                    duration,
                });
            }
        }
        (LineType::WorkUnitCoreReturn, Some(TypedPayload::Result { value })) => {
            if let Some(unit) = slot_run.open_unit_run_mut() {
                unit.result = value;
            }
            if value.is_completed() {
                slot_run.completed_units += 1;
            } else if value.is_failed() {
                slot_run.failed_units += 1;
            }
        }
        (LineType::WorkUnitTooManyErrors, _) => {
            if let Some(unit) = slot_run.open_unit_run_mut() {
                unit.too_many_errors = true;
            }
        }
        (LineType::ClientEuePause, _) => {
            slot_run.status = SlotRunStatus::EuePaused;
        }
        (
            LineType::ClientNumberOfUnitsCompleted,
            Some(TypedPayload::UnitCount { value }),
        ) => {
            slot_run.total_completed_units = Some(value);
        }
        // Extraction failed: the line is already recorded at its index.
        _ => {}
    }
}

/// Run-level identity lines.
fn on_run_line(log: &mut FahLog, line: LogLine) {
    let line_type = line.line_type;
    let payload = line.data.payload().cloned();
    let index = line.index;

    if log.runs.is_empty() {
        log.prelude.push(line);
        return;
    }
    let run = ensure_run(log, index);
    run.lines.push(line);

    match (line_type, payload) {
        (LineType::ClientVersion, Some(TypedPayload::Version { value })) => {
            run.client_version.get_or_insert(value);
        }
        (LineType::ClientArguments, Some(TypedPayload::Text { value })) => {
            run.arguments.get_or_insert(value);
        }
        _ => {}
    }
}

/// Records a line with no structural effect.
fn record(log: &mut FahLog, line: LogLine) {
    match log.runs.last_mut() {
        Some(run) => run.lines.push(line),
        None => log.prelude.push(line),
    }
}

#[cfg(test)]
mod tests {
    use crate::line::{LogFormat, UnitResult};
    use crate::run::{FahLog, SlotRunStatus};
    use crate::types::ProjectKey;

    const SIMPLE_V7: &str = "\
*********************** Log Started 2024-03-01T12:00:00Z ***********************
12:00:01:      Version: 7.6.21
12:04:31:WU01:FS00:Starting
12:04:33:WU01:FS00:0xa7:Project: 16814 (Run 0, Clone 1, Gen 2)
12:04:33:WU01:FS00:0xa7:Version: 0.0.11
12:06:10:WU01:FS00:0xa7:Completed 2500 out of 250000 steps (1%)
12:07:55:WU01:FS00:0xa7:Completed 5000 out of 250000 steps (2%)
14:55:59:WU01:FS00:FahCore returned: FINISHED_UNIT (100 = 0x64)
";

    #[test]
    fn one_marker_one_slot_one_finish() {
        let log = FahLog::parse(LogFormat::FahClient, SIMPLE_V7);

        assert_eq!(log.runs.len(), 1);
        let run = &log.runs[0];
        assert_eq!(run.start_index, 0);
        assert_eq!(run.client_version.as_deref(), Some("7.6.21"));

        let slot_run = run.slot_run(0).expect("slot 0 exists");
        assert_eq!(slot_run.completed_units, 1);
        assert_eq!(slot_run.failed_units, 0);
        assert_eq!(slot_run.unit_runs.len(), 1);

        let unit = &slot_run.unit_runs[0];
        assert_eq!(unit.queue_index, 1);
        assert_eq!(unit.result, UnitResult::FinishedUnit);
        assert_eq!(unit.last_project(), Some(ProjectKey::new(16814, 0, 1, 2)));
        assert_eq!(unit.core_version, Some(0.11));
        assert!(unit.is_open(), "tail stays open at EOF");
    }

    #[test]
    fn frame_durations_computed_between_offsets() {
        let log = FahLog::parse(LogFormat::FahClient, SIMPLE_V7);
        let unit = log.current_slot_run(0).unwrap().current_unit_run().unwrap();

        assert_eq!(unit.frames.len(), 2);
        assert_eq!(unit.frames[0].duration, None);
        assert_eq!(
            unit.frames[1].duration,
            Some(chrono::Duration::seconds(105))
        );
    }

    #[test]
    fn frame_duration_wraps_midnight() {
        let text = "\
*********************** Log Started 2024-03-01T23:00:00Z ***********************
23:58:40:WU00:FS00:Starting
23:59:00:WU00:FS00:0xa7:Completed 1000 out of 100000 steps (1%)
00:01:00:WU00:FS00:0xa7:Completed 2000 out of 100000 steps (2%)
";
        let log = FahLog::parse(LogFormat::FahClient, text);
        let unit = log.current_slot_run(0).unwrap().current_unit_run().unwrap();
        assert_eq!(
            unit.frames[1].duration,
            Some(chrono::Duration::seconds(120))
        );
    }

    #[test]
    fn run_boundaries_equal_start_markers() {
        let text = format!("{SIMPLE_V7}{SIMPLE_V7}{SIMPLE_V7}");
        let log = FahLog::parse(LogFormat::FahClient, &text);
        assert_eq!(log.runs.len(), 3);
    }

    #[test]
    fn restart_seals_previous_runs_open_unit() {
        let text = "\
*********************** Log Started 2024-03-01T12:00:00Z ***********************
12:04:31:WU01:FS00:Starting
12:06:10:WU01:FS00:0xa7:Completed 2500 out of 250000 steps (1%)
*********************** Log Started 2024-03-01T13:00:00Z ***********************
13:01:00:WU02:FS00:Starting
";
        let log = FahLog::parse(LogFormat::FahClient, text);
        assert_eq!(log.runs.len(), 2);

        let first = log.runs[0].slot_run(0).unwrap();
        let sealed = first.current_unit_run().unwrap();
        assert_eq!(sealed.end_index, Some(2));

        let second = log.runs[1].slot_run(0).unwrap();
        assert!(second.current_unit_run().unwrap().is_open());
    }

    #[test]
    fn unit_run_spans_are_strictly_ordered() {
        let text = "\
*********************** Log Started 2024-03-01T12:00:00Z ***********************
12:04:31:WU01:FS00:Starting
12:06:10:WU01:FS00:0xa7:Completed 2500 out of 250000 steps (1%)
14:55:59:WU01:FS00:FahCore returned: FINISHED_UNIT (100 = 0x64)
14:56:10:WU02:FS00:Starting
14:58:00:WU02:FS00:0xa7:Completed 1000 out of 250000 steps (1%)
15:10:00:WU03:FS00:Starting
";
        let log = FahLog::parse(LogFormat::FahClient, text);
        let slot_run = log.current_slot_run(0).unwrap();
        assert_eq!(slot_run.unit_runs.len(), 3);

        for pair in slot_run.unit_runs.windows(2) {
            let end = pair[0].end_index.expect("all but the last are sealed");
            assert!(end < pair[1].start_index);
        }
        assert!(slot_run.unit_runs[2].is_open());
    }

    #[test]
    fn append_equivalence_at_any_line_boundary() {
        let whole = FahLog::parse(LogFormat::FahClient, SIMPLE_V7);
        let lines: Vec<&str> = SIMPLE_V7.lines().collect();

        for split in 0..=lines.len() {
            let head: String = lines[..split].iter().map(|l| format!("{l}\n")).collect();
            let tail: String = lines[split..].iter().map(|l| format!("{l}\n")).collect();

            let mut chunked = FahLog::parse(LogFormat::FahClient, &head);
            chunked.append(&tail);
            assert_eq!(chunked, whole, "split at line {split}");
        }
    }

    #[test]
    fn append_starting_with_marker_seals_carried_state() {
        let mut log = FahLog::parse(
            LogFormat::FahClient,
            "\
*********************** Log Started 2024-03-01T12:00:00Z ***********************
12:04:31:WU01:FS00:Starting
",
        );
        assert!(log.current_slot_run(0).unwrap().current_unit_run().unwrap().is_open());

        log.append(
            "*********************** Log Started 2024-03-01T13:00:00Z ***********************\n",
        );
        assert_eq!(log.runs.len(), 2);
        let sealed = log.runs[0].slot_run(0).unwrap().current_unit_run().unwrap();
        assert!(!sealed.is_open());
    }

    #[test]
    fn malformed_line_is_isolated() {
        let text = "\
*********************** Log Started 2024-03-01T12:00:00Z ***********************
12:04:31:WU01:FS00:Starting
12:04:33:WU01:FS00:0xa7:Project: NOT (Run digits, Clone here, Gen 2)
12:05:00:WU01:FS00:0xa7:Project: 16814 (Run 0, Clone 1, Gen 2)
";
        let log = FahLog::parse(LogFormat::FahClient, text);

        let bad = log.line(2).unwrap();
        assert!(bad.data.is_error());

        // Neighbors are untouched and the good project landed.
        assert!(!log.line(1).unwrap().data.is_error());
        assert!(!log.line(3).unwrap().data.is_error());
        let unit = log.current_slot_run(0).unwrap().current_unit_run().unwrap();
        assert_eq!(unit.projects, vec![ProjectKey::new(16814, 0, 1, 2)]);
    }

    #[test]
    fn empty_shell_run_exists() {
        let text = "\
*********************** Log Started 2024-03-01T12:00:00Z ***********************
12:00:05:Connecting to assign1.foldingathome.org
";
        let log = FahLog::parse(LogFormat::FahClient, text);
        assert_eq!(log.runs.len(), 1);
        assert!(log.runs[0].slot_runs.is_empty());
    }

    #[test]
    fn truncated_log_without_marker_still_tracks() {
        let text = "\
12:04:31:WU01:FS00:Starting
12:06:10:WU01:FS00:0xa7:Completed 2500 out of 250000 steps (1%)
";
        let log = FahLog::parse(LogFormat::FahClient, text);
        assert_eq!(log.runs.len(), 1);
        assert!(log.runs[0].start_time.is_none());
        let unit = log.current_slot_run(0).unwrap().current_unit_run().unwrap();
        assert_eq!(unit.frames.len(), 1);
    }

    #[test]
    fn two_slots_track_independently() {
        let text = "\
*********************** Log Started 2024-03-01T12:00:00Z ***********************
12:04:31:WU01:FS00:Starting
12:05:00:WU02:FS01:Starting
12:05:10:WU02:FS01:0xa8:Project: 13000 (Run 1, Clone 2, Gen 3)
12:06:10:WU01:FS00:0xa7:Project: 16814 (Run 0, Clone 1, Gen 2)
14:00:00:WU02:FS01:FahCore returned: EARLY_UNIT_END (114 = 0x72)
14:55:59:WU01:FS00:FahCore returned: FINISHED_UNIT (100 = 0x64)
";
        let log = FahLog::parse(LogFormat::FahClient, text);
        let run = log.current_run().unwrap();

        let fs0 = run.slot_run(0).unwrap();
        assert_eq!(fs0.completed_units, 1);
        assert_eq!(fs0.failed_units, 0);
        assert_eq!(
            fs0.current_unit_run().unwrap().last_project(),
            Some(ProjectKey::new(16814, 0, 1, 2))
        );

        let fs1 = run.slot_run(1).unwrap();
        assert_eq!(fs1.completed_units, 0);
        assert_eq!(fs1.failed_units, 1);
        assert_eq!(fs1.current_unit_run().unwrap().result, UnitResult::EarlyUnitEnd);
    }

    #[test]
    fn eue_pause_sets_slot_status() {
        let text = "\
*********************** Log Started 2024-03-01T12:00:00Z ***********************
12:04:31:WU01:FS00:Starting
13:20:59:WU01:FS00:Too many errors, failing
13:21:00:WU01:FS00:Pausing due to too many errors
";
        let log = FahLog::parse(LogFormat::FahClient, text);
        let slot_run = log.current_slot_run(0).unwrap();
        assert_eq!(slot_run.status, SlotRunStatus::EuePaused);
        assert!(slot_run.current_unit_run().unwrap().too_many_errors);
    }

    #[test]
    fn legacy_log_parses_single_slot() {
        let text = "\
--- Opening Log file [March 1 12:00:00 UTC]
# Windows CPU Console Edition
[12:04:31] Working on queue slot 01 [March 1 12:04:31 UTC]
[12:04:33] Project: 5102 (Run 4, Clone 5, Gen 6)
[12:04:33] Version 2.27 (March 12, 2010)
[12:06:10] Completed 2500 out of 250000 steps  (1%)
[14:55:59] Folding@home Core Shutdown: FINISHED_UNIT
[15:00:00] + Number of Units Completed: 42
";
        let log = FahLog::parse(LogFormat::Legacy, text);
        assert_eq!(log.runs.len(), 1);
        let run = log.current_run().unwrap();
        assert!(run.start_time.is_some());

        let slot_run = run.slot_run(0).unwrap();
        assert_eq!(slot_run.completed_units, 1);
        assert_eq!(slot_run.total_completed_units, Some(42));

        let unit = slot_run.current_unit_run().unwrap();
        assert_eq!(unit.queue_index, 1);
        assert_eq!(unit.core_version, Some(2.27));
        assert_eq!(unit.result, UnitResult::FinishedUnit);
        assert_eq!(unit.last_project(), Some(ProjectKey::new(5102, 4, 5, 6)));
    }
}
