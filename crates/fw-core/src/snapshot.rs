//! Live protocol snapshot types.
//!
//! A queue snapshot is transient: each `QueueInfo` message replaces the
//! previous one wholesale. Durable state comes from merging these entries
//! with log-derived unit runs (see [`crate::correlate`]).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ProjectKey;

/// State of a live queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum UnitState {
    #[default]
    Unknown,
    Download,
    Ready,
    Running,
    Send,
    Paused,
}

impl UnitState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Download => "DOWNLOAD",
            Self::Ready => "READY",
            Self::Running => "RUNNING",
            Self::Send => "SEND",
            Self::Paused => "PAUSED",
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DOWNLOAD" => Ok(Self::Download),
            "READY" => Ok(Self::Ready),
            "RUNNING" => Ok(Self::Running),
            "SEND" => Ok(Self::Send),
            "PAUSED" => Ok(Self::Paused),
            "UNKNOWN" => Ok(Self::Unknown),
            _ => Err(format!("invalid unit state: {s}")),
        }
    }
}

/// One live queue entry, replaced wholesale each snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    /// Queue index. Small and recycled.
    pub id: u32,
    pub state: UnitState,
    /// The owning slot.
    pub slot: u32,
    #[serde(flatten)]
    pub project: ProjectKey,
    pub assigned: Option<DateTime<Utc>>,
    pub timeout: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    /// Work server address.
    #[serde(default)]
    pub work_server: Option<String>,
    /// Upload/download attempt count.
    #[serde(default)]
    pub attempts: u32,
    /// Frames completed as reported by the client.
    #[serde(default)]
    pub frames_done: u32,
    /// Total frames in the unit.
    #[serde(default)]
    pub total_frames: u32,
}

/// Reported status of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    #[default]
    Unknown,
    Offline,
    Paused,
    Finishing,
    Running,
    /// Running, but frame times had to come from the benchmark fallback.
    RunningNoFrameTimes,
}

impl SlotStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Offline => "offline",
            Self::Paused => "paused",
            Self::Finishing => "finishing",
            Self::Running => "running",
            Self::RunningNoFrameTimes => "running_no_frame_times",
        }
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of hardware backs a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotKind {
    Cpu,
    Gpu,
}

/// Slot hardware description, as reported by the client.
///
/// Kind-specific data lives in the variant; the few call sites that care
/// match exhaustively on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SlotDescription {
    Cpu {
        /// Worker thread count, when reported.
        threads: Option<u32>,
    },
    Gpu {
        /// PCI bus index, when reported.
        bus: Option<u32>,
        /// Device name, when reported.
        device: Option<String>,
    },
}

impl SlotDescription {
    pub const fn kind(&self) -> SlotKind {
        match self {
            Self::Cpu { .. } => SlotKind::Cpu,
            Self::Gpu { .. } => SlotKind::Gpu,
        }
    }

    /// Parses a client description string such as `cpu:12` or
    /// `gpu:0:GP104 [GeForce GTX 1070]`.
    #[must_use]
    pub fn parse(description: &str) -> Option<Self> {
        let mut parts = description.splitn(3, ':');
        match parts.next()?.trim().to_ascii_lowercase().as_str() {
            "cpu" | "smp" => Some(Self::Cpu {
                threads: parts.next().and_then(|t| t.trim().parse().ok()),
            }),
            "gpu" => Some(Self::Gpu {
                bus: parts.next().and_then(|b| b.trim().parse().ok()),
                device: parts
                    .next()
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(String::from),
            }),
            _ => None,
        }
    }
}

/// One slot as reported by a `SlotInfo` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInfoEntry {
    pub id: u32,
    pub status: SlotStatus,
    pub description: Option<SlotDescription>,
    #[serde(default)]
    pub idle: bool,
}
