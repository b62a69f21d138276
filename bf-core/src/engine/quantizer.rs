//! Stepped-dialect quantization
//!
//! Boards speaking the stepped dialect only accept a fixed set of duty steps,
//! each addressed by a one-byte code. The quantizer maps a continuous duty to
//! a step with hysteresis so the fans do not flap between neighbours.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::STEP_TABLE;

/// One entry of the step table, stored as its percent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Step(u8);

impl Step {
    pub const OFF: Step = Step(0);
    pub const FULL: Step = Step(100);

    /// Step with exactly this percent, if the table has one
    pub fn from_percent(percent: u8) -> Option<Self> {
        STEP_TABLE
            .iter()
            .find(|(p, _)| *p == percent)
            .map(|(p, _)| Step(*p))
    }

    /// Step addressed by a one-byte code
    pub fn from_code(code: u8) -> Option<Self> {
        STEP_TABLE
            .iter()
            .find(|(_, c)| *c == code)
            .map(|(p, _)| Step(*p))
    }

    /// Smallest step at or above `percent`, or the full step when `percent`
    /// exceeds every entry.
    pub fn ceiling(percent: u8) -> Self {
        STEP_TABLE
            .iter()
            .find(|(p, _)| *p >= percent)
            .map(|(p, _)| Step(*p))
            .unwrap_or(Self::FULL)
    }

    /// All steps in ascending order
    pub fn all() -> impl Iterator<Item = Step> {
        STEP_TABLE.iter().map(|(p, _)| Step(*p))
    }

    pub fn percent(self) -> u8 {
        self.0
    }

    pub fn code(self) -> u8 {
        STEP_TABLE
            .iter()
            .find(|(p, _)| *p == self.0)
            .map(|(_, c)| *c)
            .unwrap_or(0xFF)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

impl From<Step> for u8 {
    fn from(step: Step) -> u8 {
        step.0
    }
}

impl TryFrom<u8> for Step {
    type Error = String;

    fn try_from(percent: u8) -> Result<Self, Self::Error> {
        Step::from_percent(percent).ok_or_else(|| format!("{}% is not a supported step", percent))
    }
}

/// Map a desired duty onto a step, holding the previous step unless the
/// request clears it by `margin`.
///
/// * Up: only when `desired >= last + margin`.
/// * Down: only when `desired <= candidate - margin`, where the candidate is
///   the step the request would round up to.
/// * No previous step, or a previous step of 0: the candidate is taken as is.
pub fn quantize(desired: u8, last: Option<Step>, margin: u8) -> Step {
    let candidate = Step::ceiling(desired);

    let last = match last {
        Some(last) if last != Step::OFF => last,
        _ => return candidate,
    };

    let desired = desired as i16;
    let margin = margin as i16;

    if candidate > last {
        if desired >= last.percent() as i16 + margin {
            candidate
        } else {
            last
        }
    } else if candidate < last {
        if desired <= candidate.percent() as i16 - margin {
            candidate
        } else {
            last
        }
    } else {
        last
    }
}
