//! Fan actuation commands
//!
//! Builds the raw commands for both dialects and runs them through the
//! executor. Nothing here decides *what* duty to apply; see `engine` for that.

use tracing::debug;

use super::ipmi::{IpmiCommand, IpmiTransport, SafeExecutor};
use crate::constants::{control, ipmi};
use crate::engine::Step;
use crate::error::Result;

/// `raw 0x30 0x70 0x66 0x01 <bank> <code>`
pub fn step_command(bank: &str, step: Step) -> IpmiCommand {
    IpmiCommand::new(ipmi::STEPPED_PREFIX)
        .arg(bank)
        .arg(format!("0x{:02x}", step.code()))
}

/// `raw 0x30 0x30 0x02 0xff <percent>`; percent is clamped to 100
pub fn percent_command(percent: u8) -> IpmiCommand {
    let percent = percent.min(control::DUTY_CEILING);
    IpmiCommand::new(ipmi::CONTINUOUS_DUTY_PREFIX).arg(format!("0x{:02x}", percent))
}

pub fn manual_mode_command() -> IpmiCommand {
    IpmiCommand::new(ipmi::CONTINUOUS_MANUAL)
}

pub fn automatic_mode_command() -> IpmiCommand {
    IpmiCommand::new(ipmi::CONTINUOUS_AUTOMATIC)
}

/// Set one fan bank to a discrete step
pub async fn apply_step<T: IpmiTransport>(executor: &SafeExecutor<T>, bank: &str, step: Step) -> Result<()> {
    let command = step_command(bank, step);
    debug!("Setting bank {} to {} ({})", bank, step, command);
    executor.run(&command).await.map(|_| ())
}

/// Set every fan to a percent
pub async fn apply_percent<T: IpmiTransport>(executor: &SafeExecutor<T>, percent: u8) -> Result<()> {
    let command = percent_command(percent);
    debug!("Setting all fans to {}% ({})", percent, command);
    executor.run(&command).await.map(|_| ())
}

pub async fn enter_manual_mode<T: IpmiTransport>(executor: &SafeExecutor<T>) -> Result<()> {
    executor.run(&manual_mode_command()).await.map(|_| ())
}

pub async fn restore_automatic_mode<T: IpmiTransport>(executor: &SafeExecutor<T>) -> Result<()> {
    executor.run(&automatic_mode_command()).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_command_encoding() {
        let step = Step::from_percent(25).unwrap();
        assert_eq!(step_command("0x00", step).to_string(), "raw 0x30 0x70 0x66 0x01 0x00 0x30");

        let full = Step::from_percent(100).unwrap();
        assert_eq!(step_command("0x01", full).to_string(), "raw 0x30 0x70 0x66 0x01 0x01 0xff");
    }

    #[test]
    fn test_percent_command_encoding() {
        assert_eq!(percent_command(15).to_string(), "raw 0x30 0x30 0x02 0xff 0x0f");
        assert_eq!(percent_command(100).to_string(), "raw 0x30 0x30 0x02 0xff 0x64");
        assert_eq!(percent_command(180).to_string(), "raw 0x30 0x30 0x02 0xff 0x64");
    }

    #[test]
    fn test_mode_commands() {
        assert_eq!(manual_mode_command().to_string(), "raw 0x30 0x30 0x01 0x00");
        assert_eq!(automatic_mode_command().to_string(), "raw 0x30 0x30 0x01 0x01");
    }
}
