//! Proportional-integral duty computation
//!
//! Each cycle the controller nudges the previous duty by a proportional and
//! an integral term, then applies bounds, a slew limit and the quiet cap:
//!
//! ```text
//! error  = temp - setpoint
//! |error| <= deadband  ->  last - 1               (integral untouched)
//! otherwise            ->  last + round(kp*error) + integral/RES
//! ```
//!
//! The integral accumulator is fixed point so long runs do not drift, and it
//! is clamped to `±max_duty` worth of duty to bound windup.

use crate::constants::control::INTEGRAL_RESOLUTION;
use crate::data::ControllerConfig;

use super::target::TargetState;

#[derive(Debug, Clone, PartialEq)]
pub struct PiController {
    setpoint: i32,
    deadband: i32,
    min_duty: u8,
    max_duty: u8,
    gain_p: f64,
    gain_i: f64,
    max_slew: u8,
    quiet_threshold: i32,
    quiet_max_duty: u8,
    interval_secs: f64,
}

impl PiController {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            setpoint: config.setpoint,
            deadband: config.deadband,
            min_duty: config.min_duty,
            max_duty: config.max_duty,
            gain_p: config.gain_p,
            gain_i: config.gain_i,
            max_slew: config.max_slew,
            quiet_threshold: config.quiet_threshold,
            quiet_max_duty: config.quiet_max_duty,
            interval_secs: config.interval_secs as f64,
        }
    }

    /// Compute the next duty for a target.
    ///
    /// Only the integral accumulator is updated here; the caller records the
    /// returned duty as `last_duty` once it has been handed to the actuator.
    pub fn compute(&self, state: &mut TargetState, temperature: i32) -> u8 {
        let min = self.min_duty as i64;
        let max = self.max_duty as i64;
        let last = state.last_duty as i64;
        let error = temperature as i64 - self.setpoint as i64;

        if error.abs() <= self.deadband as i64 {
            let decayed = (last - 1).clamp(min, max);
            return self.quiet_cap(temperature, decayed as u8);
        }

        let proportional = (self.gain_p * error as f64).round() as i64;

        let integral = if self.gain_i > 0.0 {
            let limit = max * INTEGRAL_RESOLUTION;
            let delta =
                (self.gain_i * error as f64 * self.interval_secs * INTEGRAL_RESOLUTION as f64).round() as i64;
            state.integral = state.integral.saturating_add(delta).clamp(-limit, limit);
            state.integral / INTEGRAL_RESOLUTION
        } else {
            0
        };

        let raw = last.saturating_add(proportional).saturating_add(integral).clamp(min, max);

        let slew = self.max_slew as i64;
        let limited = (last + (raw - last).clamp(-slew, slew)).clamp(min, max);

        self.quiet_cap(temperature, limited as u8)
    }

    /// Below the quiet threshold duty never exceeds the quiet maximum
    fn quiet_cap(&self, temperature: i32, duty: u8) -> u8 {
        if temperature < self.quiet_threshold && duty > self.quiet_max_duty {
            self.quiet_max_duty
        } else {
            duty
        }
    }
}
