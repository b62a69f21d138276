//! Control targets
//!
//! A target is one independently controlled fan group: a CPU bank on stepped
//! boards, or the whole chassis on continuous boards. Each carries its own
//! controller memory across cycles.

use serde::{Deserialize, Serialize};

use super::quantizer::Step;
use crate::data::ControllerConfig;
use crate::error::{BmcfanError, Result};
use crate::hw::{SensorSelector, SensorSnapshot};

/// Per-target controller memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetState {
    /// Duty most recently handed to the actuator
    pub last_duty: u8,
    /// Integral accumulator in fixed point (see `control::INTEGRAL_RESOLUTION`)
    pub integral: i64,
    /// Step most recently chosen by the quantizer (stepped dialect only)
    pub last_step: Option<Step>,
}

impl TargetState {
    pub fn new(initial_duty: u8) -> Self {
        Self {
            last_duty: initial_duty,
            integral: 0,
            last_step: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControlTarget {
    name: String,
    selectors: Vec<SensorSelector>,
    bank: Option<String>,
    pub state: TargetState,
}

impl ControlTarget {
    pub fn new(
        name: impl Into<String>,
        selectors: Vec<SensorSelector>,
        bank: Option<String>,
        initial_duty: u8,
    ) -> Self {
        Self {
            name: name.into(),
            selectors,
            bank,
            state: TargetState::new(initial_duty),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn selectors(&self) -> &[SensorSelector] {
        &self.selectors
    }

    /// Fan bank addressed by stepped commands
    pub fn bank(&self) -> Option<&str> {
        self.bank.as_deref()
    }

    /// Controlling temperature: the hottest reading among the target's
    /// selectors, absent if none of them read.
    pub fn temperature(&self, snapshot: &SensorSnapshot) -> Option<i32> {
        snapshot.hottest(&self.selectors)
    }
}

/// One target per (sensor, bank) pair, paired by position. Extra banks are
/// left alone; fewer banks than sensors is a configuration error.
pub fn stepped_targets(config: &ControllerConfig) -> Result<Vec<ControlTarget>> {
    if config.banks.len() < config.sensors.len() {
        return Err(BmcfanError::invalid_config(
            "BMCFAN_BANKS",
            format!(
                "{} bank(s) configured for {} sensor(s)",
                config.banks.len(),
                config.sensors.len()
            ),
        ));
    }

    let initial = config.clamped_initial_duty();
    Ok(config
        .sensors
        .iter()
        .zip(&config.banks)
        .enumerate()
        .map(|(i, (sensor, bank))| {
            ControlTarget::new(
                format!("cpu{}", i + 1),
                vec![sensor.clone()],
                Some(bank.clone()),
                initial,
            )
        })
        .collect())
}

/// A single chassis-wide target driven by the hottest configured sensor
pub fn chassis_target(config: &ControllerConfig) -> ControlTarget {
    ControlTarget::new(
        "chassis",
        config.sensors.clone(),
        None,
        config.clamped_initial_duty(),
    )
}
