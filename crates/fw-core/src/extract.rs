//! Typed data extraction from classified lines.
//!
//! Extraction is a lookup keyed by [`LineType`]. An extractor that fails
//! produces a [`ParseError`] value on the line; it never aborts the parse.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveTime, Utc};
use regex::Regex;

use crate::line::{FrameProgress, LineData, LineType, LogFormat, ParseError, TypedPayload, UnitResult};
use crate::types::ProjectKey;

static V7_TIME_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{2}):(\d{2}):(\d{2}):").unwrap());
static LEGACY_TIME_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(\d{2}):(\d{2}):(\d{2})\]").unwrap());
static SLOT_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"WU(\d+):FS(\d+)").unwrap());
static LEGACY_QUEUE_SLOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Working on queue slot (\d+)").unwrap());
static PROJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Project: (\d+) \(Run (\d+), Clone (\d+), Gen (\d+)\)").unwrap()
});
static FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Completed (\d+) out of (\d+) steps\s+\((\d+)%?\)").unwrap()
});
static V7_LOG_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Log Started (\S+?)\s*\*").unwrap());
static LEGACY_LOG_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Opening Log file \[(\w+ \d+ \d{2}:\d{2}:\d{2}) UTC\]").unwrap()
});
static CORE_RETURN_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:FahCore returned|Core Shutdown): (\w+)").unwrap());
static VERSION_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Version:?\s+([\d.]+)").unwrap());
static UNIT_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Number of Units Completed: (\d+)").unwrap());
static ARGUMENTS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Arguments:\s*(.*)$").unwrap());

/// Reference year for legacy log-open stamps, which omit the year.
const LEGACY_REFERENCE_YEAR: i32 = 2000;

/// Parses the intra-day time offset prefix, if the line carries one.
#[must_use]
pub fn time_offset(format: LogFormat, raw: &str) -> Option<NaiveTime> {
    let re = match format {
        LogFormat::FahClient => &V7_TIME_PREFIX,
        LogFormat::Legacy => &LEGACY_TIME_PREFIX,
    };
    let caps = re.captures(raw)?;
    let (h, m, s) = (
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
    );
    NaiveTime::from_hms_opt(h, m, s)
}

/// Parses the `WUxx:FSyy` slot tag carried on client/server work-unit lines.
///
/// Returns `(queue_index, slot_id)`. Legacy lines carry no tag.
#[must_use]
pub fn slot_tag(format: LogFormat, raw: &str) -> Option<(u32, u32)> {
    if format != LogFormat::FahClient {
        return None;
    }
    let caps = SLOT_TAG.captures(raw)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

/// Parses a core version string.
///
/// Accepts standard decimal (`2.27`), the truncated three-part encoding
/// (`0.0.11` collapses to `0.11`), and a bare leading-dot form (`.11`).
/// Defaults to `0.0` on total failure.
#[must_use]
pub fn parse_core_version(s: &str) -> f64 {
    let s = s.trim().trim_end_matches('.');
    if s.is_empty() {
        return 0.0;
    }
    let parts: Vec<&str> = s.split('.').collect();
    let candidate = match parts.as_slice() {
        [a, b, c] if *a == "0" && *b == "0" => format!("0.{c}"),
        [a, b, ..] => format!("{a}.{b}"),
        [a] => (*a).to_string(),
        [] => return 0.0,
    };
    let candidate = if candidate.starts_with('.') {
        format!("0{candidate}")
    } else {
        candidate
    };
    candidate.parse().unwrap_or(0.0)
}

fn err(message: impl Into<String>) -> LineData {
    LineData::Error(ParseError::new(message))
}

fn extract_log_open(format: LogFormat, raw: &str) -> LineData {
    match format {
        LogFormat::FahClient => {
            let Some(caps) = V7_LOG_START.captures(raw) else {
                return err("log start stamp not found");
            };
            match DateTime::parse_from_rfc3339(&caps[1]) {
                Ok(dt) => LineData::Parsed(TypedPayload::Timestamp {
                    value: dt.with_timezone(&Utc),
                }),
                Err(e) => err(format!("invalid log start stamp: {e}")),
            }
        }
        LogFormat::Legacy => {
            let Some(caps) = LEGACY_LOG_START.captures(raw) else {
                return err("log open stamp not found");
            };
            // Legacy stamps carry no year; anchor to a fixed reference year
            // so offsets within the run stay consistent.
            let with_year = format!("{LEGACY_REFERENCE_YEAR} {}", &caps[1]);
            match chrono::NaiveDateTime::parse_from_str(&with_year, "%Y %B %d %H:%M:%S") {
                Ok(naive) => LineData::Parsed(TypedPayload::Timestamp {
                    value: naive.and_utc(),
                }),
                Err(e) => err(format!("invalid log open stamp: {e}")),
            }
        }
    }
}

fn extract_working(format: LogFormat, raw: &str) -> LineData {
    match format {
        LogFormat::FahClient => slot_tag(format, raw).map_or_else(
            || err("queue/slot tag not found"),
            |(queue, slot)| LineData::Parsed(TypedPayload::QueueIndex { queue, slot }),
        ),
        LogFormat::Legacy => {
            let Some(caps) = LEGACY_QUEUE_SLOT.captures(raw) else {
                return err("queue slot index not found");
            };
            caps[1].parse().map_or_else(
                |e| err(format!("invalid queue slot index: {e}")),
                |queue| LineData::Parsed(TypedPayload::QueueIndex { queue, slot: 0 }),
            )
        }
    }
}

fn extract_project(raw: &str) -> LineData {
    let Some(caps) = PROJECT.captures(raw) else {
        return err("project tuple not found");
    };
    let parse = |i: usize| caps[i].parse::<u32>();
    match (parse(1), parse(2), parse(3), parse(4)) {
        (Ok(project), Ok(run), Ok(clone), Ok(generation)) => LineData::Parsed(TypedPayload::Project {
            value: ProjectKey::new(project, run, clone, generation),
        }),
        _ => err("project tuple out of range"),
    }
}

fn extract_frame(raw: &str) -> LineData {
    let Some(caps) = FRAME.captures(raw) else {
        return err("frame progress not found");
    };
    let done = caps[1].parse::<u64>();
    let total = caps[2].parse::<u64>();
    let percent = caps[3].parse::<u32>();
    match (done, total, percent) {
        (Ok(done), Ok(total), Ok(percent)) if total > 0 => {
            LineData::Parsed(TypedPayload::Frame {
                value: FrameProgress {
                    done,
                    total,
                    percent,
                },
            })
        }
        _ => err("frame progress out of range"),
    }
}

fn extract_core_return(raw: &str) -> LineData {
    CORE_RETURN_TOKEN.captures(raw).map_or_else(
        || err("core return token not found"),
        |caps| {
            LineData::Parsed(TypedPayload::Result {
                value: UnitResult::from_token(&caps[1]),
            })
        },
    )
}

fn extract_version(raw: &str) -> LineData {
    VERSION_VALUE.captures(raw).map_or_else(
        || err("version not found"),
        |caps| {
            LineData::Parsed(TypedPayload::Version {
                value: caps[1].to_string(),
            })
        },
    )
}

fn extract_core_version(raw: &str) -> LineData {
    // Total by specification: unparseable versions collapse to 0.0.
    let value = VERSION_VALUE
        .captures(raw)
        .map_or(0.0, |caps| parse_core_version(&caps[1]));
    LineData::Parsed(TypedPayload::CoreVersion { value })
}

fn extract_unit_count(raw: &str) -> LineData {
    let Some(caps) = UNIT_COUNT.captures(raw) else {
        return err("unit count not found");
    };
    caps[1].parse().map_or_else(
        |e| err(format!("invalid unit count: {e}")),
        |value| LineData::Parsed(TypedPayload::UnitCount { value }),
    )
}

fn extract_arguments(raw: &str) -> LineData {
    ARGUMENTS.captures(raw).map_or_else(
        || err("arguments not found"),
        |caps| {
            LineData::Parsed(TypedPayload::Text {
                value: caps[1].trim().to_string(),
            })
        },
    )
}

/// Extracts the typed payload for a classified line.
///
/// Line types without an extractor yield [`LineData::None`].
#[must_use]
pub fn extract(format: LogFormat, line_type: LineType, raw: &str) -> LineData {
    match line_type {
        LineType::LogOpen => extract_log_open(format, raw),
        LineType::WorkUnitWorking => extract_working(format, raw),
        LineType::WorkUnitProject => extract_project(raw),
        LineType::WorkUnitFrame => extract_frame(raw),
        LineType::WorkUnitCoreReturn => extract_core_return(raw),
        LineType::WorkUnitCoreVersion => extract_core_version(raw),
        LineType::ClientVersion => extract_version(raw),
        LineType::ClientNumberOfUnitsCompleted => extract_unit_count(raw),
        LineType::ClientArguments => extract_arguments(raw),
        LineType::None
        | LineType::LogHeader
        | LineType::WorkUnitTooManyErrors
        | LineType::ClientEuePause
        | LineType::Error => LineData::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::NaiveDate;

    #[test]
    fn time_offset_v7_and_legacy() {
        assert_eq!(
            time_offset(LogFormat::FahClient, "12:04:31:WU01:FS00:Starting"),
            NaiveTime::from_hms_opt(12, 4, 31)
        );
        assert_eq!(
            time_offset(LogFormat::Legacy, "[03:15:59] Completed 10 out of 100 steps  (10%)"),
            NaiveTime::from_hms_opt(3, 15, 59)
        );
        assert_eq!(time_offset(LogFormat::FahClient, "no prefix here"), None);
    }

    #[test]
    fn slot_tag_only_on_fahclient_lines() {
        assert_eq!(
            slot_tag(LogFormat::FahClient, "12:04:31:WU03:FS01:Starting"),
            Some((3, 1))
        );
        assert_eq!(
            slot_tag(LogFormat::Legacy, "[12:04:31] Working on queue slot 03"),
            None
        );
    }

    #[test]
    fn log_open_v7_timestamp() {
        let raw = "*********************** Log Started 2024-03-01T12:00:00Z ***********************";
        let data = extract(LogFormat::FahClient, LineType::LogOpen, raw);
        let Some(TypedPayload::Timestamp { value }) = data.payload() else {
            panic!("expected timestamp, got {data:?}");
        };
        assert_eq!(
            *value,
            DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc)
        );
    }

    #[test]
    fn log_open_legacy_timestamp() {
        let raw = "--- Opening Log file [March 1 12:00:00 UTC]";
        let data = extract(LogFormat::Legacy, LineType::LogOpen, raw);
        let Some(TypedPayload::Timestamp { value }) = data.payload() else {
            panic!("expected timestamp, got {data:?}");
        };
        let expected = NaiveDate::from_ymd_opt(LEGACY_REFERENCE_YEAR, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc();
        assert_eq!(*value, expected);
    }

    #[test]
    fn malformed_log_open_is_recorded_not_thrown() {
        let raw = "*********************** Log Started NOT-A-DATE ***********************";
        let data = extract(LogFormat::FahClient, LineType::LogOpen, raw);
        assert!(data.is_error());
    }

    #[test]
    fn working_extracts_queue_and_slot() {
        let data = extract(
            LogFormat::FahClient,
            LineType::WorkUnitWorking,
            "12:04:31:WU01:FS02:Starting",
        );
        assert_eq!(
            data.payload(),
            Some(&TypedPayload::QueueIndex { queue: 1, slot: 2 })
        );

        let data = extract(
            LogFormat::Legacy,
            LineType::WorkUnitWorking,
            "[12:04:31] Working on queue slot 07 [March 1 12:04:31 UTC]",
        );
        assert_eq!(
            data.payload(),
            Some(&TypedPayload::QueueIndex { queue: 7, slot: 0 })
        );
    }

    #[test]
    fn project_tuple() {
        let data = extract(
            LogFormat::FahClient,
            LineType::WorkUnitProject,
            "12:04:33:WU01:FS00:0xa7:Project: 16814 (Run 0, Clone 1, Gen 2)",
        );
        assert_eq!(
            data.payload(),
            Some(&TypedPayload::Project {
                value: ProjectKey::new(16814, 0, 1, 2)
            })
        );
    }

    #[test]
    fn frame_progress() {
        let data = extract(
            LogFormat::FahClient,
            LineType::WorkUnitFrame,
            "12:06:10:WU01:FS00:0xa7:Completed 2500 out of 250000 steps (1%)",
        );
        assert_eq!(
            data.payload(),
            Some(&TypedPayload::Frame {
                value: FrameProgress {
                    done: 2500,
                    total: 250_000,
                    percent: 1
                }
            })
        );
    }

    #[test]
    fn core_return_tokens() {
        let data = extract(
            LogFormat::FahClient,
            LineType::WorkUnitCoreReturn,
            "14:55:59:WU01:FS00:FahCore returned: FINISHED_UNIT (100 = 0x64)",
        );
        assert_eq!(
            data.payload(),
            Some(&TypedPayload::Result {
                value: UnitResult::FinishedUnit
            })
        );

        let data = extract(
            LogFormat::Legacy,
            LineType::WorkUnitCoreReturn,
            "[14:55:59] Folding@home Core Shutdown: UNSTABLE_MACHINE",
        );
        assert_eq!(
            data.payload(),
            Some(&TypedPayload::Result {
                value: UnitResult::UnstableMachine
            })
        );
    }

    #[test]
    fn core_version_standard_and_truncated() {
        assert!((parse_core_version("2.27") - 2.27).abs() < f64::EPSILON);
        assert!((parse_core_version("0.0.11") - 0.11).abs() < f64::EPSILON);
        assert!((parse_core_version(".11") - 0.11).abs() < f64::EPSILON);
        assert!((parse_core_version("7.6.21") - 7.6).abs() < f64::EPSILON);
        assert!((parse_core_version("garbage") - 0.0).abs() < f64::EPSILON);
        assert!((parse_core_version("") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn core_version_extraction_never_fails() {
        let data = extract(
            LogFormat::FahClient,
            LineType::WorkUnitCoreVersion,
            "12:04:33:WU01:FS00:0xa7:Version: 0.0.11",
        );
        assert_eq!(
            data.payload(),
            Some(&TypedPayload::CoreVersion { value: 0.11 })
        );

        // Total: a mangled line still produces a payload, defaulting to 0.0.
        let data = extract(
            LogFormat::FahClient,
            LineType::WorkUnitCoreVersion,
            "12:04:33:WU01:FS00:0xa7:Version mangled",
        );
        assert_eq!(
            data.payload(),
            Some(&TypedPayload::CoreVersion { value: 0.0 })
        );
    }

    #[test]
    fn unit_count() {
        let data = extract(
            LogFormat::Legacy,
            LineType::ClientNumberOfUnitsCompleted,
            "[15:00:00] + Number of Units Completed: 42",
        );
        assert_eq!(data.payload(), Some(&TypedPayload::UnitCount { value: 42 }));
    }

    #[test]
    fn untyped_line_types_have_no_extractor() {
        for line_type in [
            LineType::None,
            LineType::LogHeader,
            LineType::WorkUnitTooManyErrors,
            LineType::ClientEuePause,
            LineType::Error,
        ] {
            assert_eq!(
                extract(LogFormat::FahClient, line_type, "whatever"),
                LineData::None
            );
        }
    }
}
