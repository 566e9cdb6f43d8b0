//! Run reconstruction and work unit aggregation engine.
//!
//! This crate contains the fundamental types and logic for:
//! - Line classification and extraction: turning raw log text into
//!   classified, typed lines
//! - Run tracking: the state machine reconstructing `Run` → `SlotRun` →
//!   `UnitRun` execution epochs from the line sequence
//! - Correlation: merging live queue snapshots with log-derived spans into
//!   durable work unit records
//! - Metrics: frame time, PPD/UPD, ETA, and credit
//! - Benchmarks: rolling frame-time fallbacks per (slot, project)

pub mod benchmark;
pub mod classify;
pub mod correlate;
pub mod extract;
pub mod line;
pub mod metrics;
pub mod run;
pub mod snapshot;
mod tracker;
pub mod types;

pub use benchmark::{BenchmarkKey, BenchmarkStore};
pub use classify::{classify, detect_format};
pub use correlate::{WorkUnit, WorkUnitCollection, WorkUnitKey, build};
pub use line::{LineData, LineType, LogFormat, LogLine, ParseError, TypedPayload, UnitResult};
pub use metrics::{BonusPolicy, CalcPolicy, Protein, UnitMetrics};
pub use run::{FahLog, FrameMark, Run, SlotRun, SlotRunStatus, UnitRun};
pub use snapshot::{SlotDescription, SlotInfoEntry, SlotKind, SlotStatus, UnitSnapshot, UnitState};
pub use types::{ClientName, ProjectKey, SlotIdentifier, ValidationError};
