//! Derived production metrics: frame time, PPD/UPD, ETA, and credit.
//!
//! Everything here is a pure function of its inputs. Time never comes from
//! the clock: callers pass the retrieval reference time.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::correlate::WorkUnit;
use crate::snapshot::SlotStatus;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Project metadata consumed by the credit and bonus calculations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protein {
    pub project: u32,
    pub credit: f64,
    /// Frames per unit; almost always 100.
    pub frames: u32,
    /// Bonus factor; 0 disables the bonus for this project.
    #[serde(default)]
    pub k_factor: f64,
    #[serde(default)]
    pub timeout_days: f64,
    #[serde(default)]
    pub deadline_days: f64,
    #[serde(default)]
    pub core: String,
    #[serde(default)]
    pub atoms: u64,
}

impl Default for Protein {
    fn default() -> Self {
        Self {
            project: 0,
            credit: 0.0,
            frames: 100,
            k_factor: 0.0,
            timeout_days: 0.0,
            deadline_days: 0.0,
            core: String::new(),
            atoms: 0,
        }
    }
}

/// How frame time is derived from observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CalcPolicy {
    /// Most recent inter-frame duration.
    #[default]
    LastFrame,
    /// Mean of the last three inter-frame durations.
    LastThreeFrames,
    /// Mean of every observed inter-frame duration.
    AllFrames,
    /// Wall clock since assignment divided by frames completed; falls back
    /// to the benchmark average when live data is insufficient.
    EffectiveRate,
}

/// Whether and how the deadline bonus applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BonusPolicy {
    #[default]
    None,
    /// Projected from assignment time to projected finish.
    DownloadTime,
    /// Projected purely from frame time.
    FrameTime,
}

/// Frame time plus where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTime {
    pub duration: Option<Duration>,
    /// True when the value is the benchmark average, not a live observation.
    pub from_benchmark: bool,
}

impl FrameTime {
    const EMPTY: Self = Self {
        duration: None,
        from_benchmark: false,
    };
}

/// Derived view of one work unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitMetrics {
    pub frame_time: FrameTime,
    pub ppd: f64,
    pub upd: f64,
    pub credit: f64,
    pub eta: Option<Duration>,
    pub eta_date: Option<DateTime<Utc>>,
}

fn mean(durations: &[Duration]) -> Option<Duration> {
    if durations.is_empty() {
        return None;
    }
    let total: i64 = durations.iter().map(Duration::num_seconds).sum();
    Some(Duration::seconds(
        total / i64::try_from(durations.len()).unwrap_or(i64::MAX),
    ))
}

/// Total frames for the unit, preferring the snapshot's count.
fn total_frames(unit: &WorkUnit, protein: &Protein) -> u32 {
    if unit.total_frames > 0 {
        unit.total_frames
    } else {
        protein.frames
    }
}

/// Computes frame time under a policy.
///
/// `benchmark` is the rolling average for this unit's (slot, project) pair;
/// only the effective-rate policy consults it.
#[must_use]
pub fn frame_time(
    unit: &WorkUnit,
    policy: CalcPolicy,
    reference: DateTime<Utc>,
    benchmark: Option<Duration>,
) -> FrameTime {
    let durations: Vec<Duration> = unit.frames.iter().filter_map(|f| f.duration).collect();

    match policy {
        CalcPolicy::LastFrame => FrameTime {
            duration: durations.last().copied(),
            from_benchmark: false,
        },
        CalcPolicy::LastThreeFrames => {
            let tail = &durations[durations.len().saturating_sub(3)..];
            FrameTime {
                duration: mean(tail),
                from_benchmark: false,
            }
        }
        CalcPolicy::AllFrames => FrameTime {
            duration: mean(&durations),
            from_benchmark: false,
        },
        CalcPolicy::EffectiveRate => {
            let frames_complete = i64::from(unit.frames_complete());
            let live = unit.assigned.and_then(|assigned| {
                if frames_complete == 0 || reference <= assigned {
                    return None;
                }
                Some((reference - assigned) / i32::try_from(frames_complete).unwrap_or(i32::MAX))
            });
            match live {
                Some(duration) => FrameTime {
                    duration: Some(duration),
                    from_benchmark: false,
                },
                None => FrameTime {
                    duration: benchmark,
                    from_benchmark: benchmark.is_some(),
                },
            }
        }
    }
}

/// Credit for the unit with any deadline bonus applied.
///
/// The bonus multiplier is `max(1, sqrt(k × deadline / projected))` and
/// applies only when a bonus policy is enabled and at least one frame has
/// completed.
#[must_use]
pub fn credit(
    unit: &WorkUnit,
    protein: &Protein,
    bonus: BonusPolicy,
    frame_time: Option<Duration>,
    reference: DateTime<Utc>,
) -> f64 {
    let base = protein.credit;
    if bonus == BonusPolicy::None || unit.frames_complete() == 0 {
        return base;
    }
    if protein.k_factor <= 0.0 || protein.deadline_days <= 0.0 {
        return base;
    }
    let Some(ft) = frame_time else {
        return base;
    };

    let frames = f64::from(total_frames(unit, protein));
    let ft_secs = ft.num_seconds() as f64;
    if ft_secs <= 0.0 {
        return base;
    }

    let projected_secs = match bonus {
        BonusPolicy::FrameTime => ft_secs * frames,
        BonusPolicy::DownloadTime => {
            let remaining = f64::from(total_frames(unit, protein).saturating_sub(unit.frames_complete()));
            let elapsed = unit
                .assigned
                .map_or(0.0, |assigned| (reference - assigned).num_seconds() as f64)
                .max(0.0);
            elapsed + ft_secs * remaining
        }
        BonusPolicy::None => return base,
    };
    if projected_secs <= 0.0 {
        return base;
    }

    let deadline_secs = protein.deadline_days * SECONDS_PER_DAY;
    let multiplier = (protein.k_factor * deadline_secs / projected_secs).sqrt().max(1.0);
    base * multiplier
}

/// Estimated time (and date) of completion.
#[must_use]
pub fn eta(
    unit: &WorkUnit,
    protein: &Protein,
    frame_time: Option<Duration>,
    reference: DateTime<Utc>,
) -> (Option<Duration>, Option<DateTime<Utc>>) {
    let Some(ft) = frame_time else {
        return (None, None);
    };
    let remaining = total_frames(unit, protein).saturating_sub(unit.frames_complete());
    let Ok(remaining) = i32::try_from(remaining) else {
        return (None, None);
    };
    let eta = ft * remaining;
    (Some(eta), Some(reference + eta))
}

/// Computes the full derived view of one unit.
///
/// A unit with no usable frame time yields zero PPD/UPD and no ETA; this
/// function never fails and never returns negative rates.
#[must_use]
pub fn calculate(
    unit: &WorkUnit,
    protein: &Protein,
    calc: CalcPolicy,
    bonus: BonusPolicy,
    reference: DateTime<Utc>,
    benchmark: Option<Duration>,
) -> UnitMetrics {
    let ft = frame_time(unit, calc, reference, benchmark);

    let Some(duration) = ft.duration else {
        return UnitMetrics {
            frame_time: FrameTime::EMPTY,
            ppd: 0.0,
            upd: 0.0,
            credit: protein.credit,
            eta: None,
            eta_date: None,
        };
    };
    let ft_secs = duration.num_seconds() as f64;
    if ft_secs <= 0.0 {
        return UnitMetrics {
            frame_time: ft,
            ppd: 0.0,
            upd: 0.0,
            credit: protein.credit,
            eta: None,
            eta_date: None,
        };
    }

    let frames = f64::from(total_frames(unit, protein));
    let frames_per_day = SECONDS_PER_DAY / ft_secs;
    let upd = frames_per_day / frames;
    let unit_credit = credit(unit, protein, bonus, Some(duration), reference);
    let (eta, eta_date) = self::eta(unit, protein, Some(duration), reference);

    UnitMetrics {
        frame_time: ft,
        ppd: unit_credit * upd,
        upd,
        credit: unit_credit,
        eta,
        eta_date,
    }
}

/// Maps a slot's reported status given how frame times were derived.
///
/// Display-only: correlation logic never depends on this.
#[must_use]
pub const fn observed_status(base: SlotStatus, frame_time: FrameTime) -> SlotStatus {
    match base {
        SlotStatus::Running if frame_time.from_benchmark => SlotStatus::RunningNoFrameTimes,
        other => other,
    }
}
