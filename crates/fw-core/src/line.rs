//! Log line types: classification tags, typed payloads, and parse errors.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ProjectKey;

/// Which log dialect a line belongs to.
///
/// Both dialects share one classification engine with separate rule tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Client/server protocol log (v7-style, `WUxx:FSyy:` prefixed lines).
    #[default]
    FahClient,
    /// Single-process log (`[HH:MM:SS]` prefixed lines).
    Legacy,
}

impl LogFormat {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FahClient => "fahclient",
            Self::Legacy => "legacy",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Symbolic tag assigned to every log line.
///
/// Classification is total: a line that matches no rule is tagged [`LineType::None`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineType {
    /// No rule matched.
    None,
    /// Run start marker (log opened, client process started or restarted).
    LogOpen,
    /// Header or separator noise.
    LogHeader,
    /// Client software version.
    ClientVersion,
    /// Client command-line arguments.
    ClientArguments,
    /// Slot queue-index selection: a slot started working a queue entry.
    WorkUnitWorking,
    /// Work unit project identity (project/run/clone/gen).
    WorkUnitProject,
    /// Core version for the unit being processed.
    WorkUnitCoreVersion,
    /// Frame progress.
    WorkUnitFrame,
    /// Core returned with a unit result.
    WorkUnitCoreReturn,
    /// The unit accumulated too many errors.
    WorkUnitTooManyErrors,
    /// Slot paused after repeated failures (early unit end pause).
    ClientEuePause,
    /// Legacy lifetime completed-unit counter.
    ClientNumberOfUnitsCompleted,
    /// A logged error.
    Error,
}

/// Outcome reported when a core finishes processing a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnitResult {
    #[default]
    Unknown,
    FinishedUnit,
    EarlyUnitEnd,
    UnstableMachine,
    Interrupted,
    BadWorkUnit,
    CoreOutdated,
}

impl UnitResult {
    /// Whether this result counts as a completed unit.
    #[must_use]
    pub const fn is_completed(self) -> bool {
        matches!(self, Self::FinishedUnit)
    }

    /// Whether this result counts as a failed unit.
    ///
    /// `Interrupted` is neither completed nor failed: the client was stopped
    /// mid-unit and the unit may be resumed in a later run.
    #[must_use]
    pub const fn is_failed(self) -> bool {
        matches!(
            self,
            Self::EarlyUnitEnd | Self::UnstableMachine | Self::BadWorkUnit | Self::CoreOutdated
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::FinishedUnit => "finished_unit",
            Self::EarlyUnitEnd => "early_unit_end",
            Self::UnstableMachine => "unstable_machine",
            Self::Interrupted => "interrupted",
            Self::BadWorkUnit => "bad_work_unit",
            Self::CoreOutdated => "core_outdated",
        }
    }

    /// Maps a core return token (e.g. `FINISHED_UNIT`) to a result.
    ///
    /// Unrecognized tokens map to [`UnitResult::Unknown`] rather than an
    /// error: the result kind set grows over client versions.
    #[must_use]
    pub fn from_token(token: &str) -> Self {
        match token {
            "FINISHED_UNIT" => Self::FinishedUnit,
            "EARLY_UNIT_END" => Self::EarlyUnitEnd,
            "UNSTABLE_MACHINE" => Self::UnstableMachine,
            "INTERRUPTED" => Self::Interrupted,
            "BAD_WORK_UNIT" => Self::BadWorkUnit,
            "CORE_OUTDATED" => Self::CoreOutdated,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for UnitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "finished_unit" => Ok(Self::FinishedUnit),
            "early_unit_end" => Ok(Self::EarlyUnitEnd),
            "unstable_machine" => Ok(Self::UnstableMachine),
            "interrupted" => Ok(Self::Interrupted),
            "bad_work_unit" => Ok(Self::BadWorkUnit),
            "core_outdated" => Ok(Self::CoreOutdated),
            _ => Err(format!("invalid unit result: {s}")),
        }
    }
}

/// A recorded extraction failure.
///
/// Parse errors are values carried on the line, never propagated: one
/// malformed line must not abort the rest of the parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error: {}", self.message)
    }
}

/// Frame progress as written in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameProgress {
    /// Steps completed.
    pub done: u64,
    /// Total steps in the unit.
    pub total: u64,
    /// Percent complete as printed.
    pub percent: u32,
}

/// Typed payload extracted from a classified line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TypedPayload {
    /// An absolute timestamp (run start).
    Timestamp { value: DateTime<Utc> },
    /// A software version string.
    Version { value: String },
    /// A parsed core version number.
    CoreVersion { value: f64 },
    /// A work unit project 4-tuple.
    Project { value: ProjectKey },
    /// Frame progress.
    Frame { value: FrameProgress },
    /// Queue index selection with the owning slot.
    QueueIndex { queue: u32, slot: u32 },
    /// A unit result.
    Result { value: UnitResult },
    /// A lifetime completed-unit count.
    UnitCount { value: u32 },
    /// Free text.
    Text { value: String },
}

/// Extraction outcome attached to a line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LineData {
    /// The line type has no extractor.
    #[default]
    None,
    /// Extraction succeeded.
    Parsed(TypedPayload),
    /// Extraction failed; the failure is recorded, not propagated.
    Error(ParseError),
}

impl LineData {
    pub const fn payload(&self) -> Option<&TypedPayload> {
        match self {
            Self::Parsed(payload) => Some(payload),
            _ => None,
        }
    }

    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// One classified, extracted log line. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    /// Raw line text.
    pub raw: String,
    /// Global zero-based line index within the log.
    pub index: usize,
    pub line_type: LineType,
    /// Intra-day time offset from the line's timestamp prefix.
    pub time_offset: Option<NaiveTime>,
    pub data: LineData,
}
