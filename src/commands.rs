/*
 * This file is part of bmcfan.
 *
 * Copyright (C) 2025 bmcfan contributors
 *
 * bmcfan is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * bmcfan is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with bmcfan. If not, see <https://www.gnu.org/licenses/>.
 */

use std::fmt::Write as _;

use anyhow::Context;
use tracing::debug;

use bf_core::hw::actuator;
use bf_core::{
    read_status, ControlTarget, ControllerConfig, IpmiTool, IpmiTransport, PlatformIdentity,
    SafeExecutor, SensorReader, SensorSnapshot, StatusSnapshot, SysfsDmi, VendorPolicy,
    VendorSetting,
};

use crate::cli::{Cli, Commands};

/// A status older than this many poll intervals is reported as stale
const STALE_INTERVALS: u64 = 3;

pub async fn run_cli(cli: &Cli) -> anyhow::Result<()> {
    let config = ControllerConfig::load(cli.config.as_deref()).context("Invalid configuration")?;

    match &cli.command {
        Commands::Config => cmd_config(&config),
        Commands::Detect => cmd_detect(&config),
        Commands::Sensors => {
            let executor = SafeExecutor::from_config(IpmiTool::from_config(&config), &config);
            cmd_sensors(&config, &executor).await
        }
        Commands::Status { json } => cmd_status(&config, *json),
        Commands::RestoreAuto => {
            let executor = SafeExecutor::from_config(IpmiTool::from_config(&config), &config);
            cmd_restore_auto(&executor).await
        }
    }
}

// ============================================================================
// Config / Detect
// ============================================================================

fn cmd_config(config: &ControllerConfig) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

fn cmd_detect(config: &ControllerConfig) -> anyhow::Result<()> {
    let identity = PlatformIdentity::gather(&SysfsDmi);
    let policy = VendorPolicy::resolve(config.vendor, &SysfsDmi);
    print!("{}", render_detect(&identity, config.vendor, policy));
    Ok(())
}

pub fn render_detect(identity: &PlatformIdentity, setting: VendorSetting, policy: VendorPolicy) -> String {
    let field = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
    let source = match setting {
        VendorSetting::Auto => "detected",
        _ => "configured",
    };

    let mut out = String::new();
    let _ = writeln!(out, "Platform");
    let _ = writeln!(out, "========");
    let _ = writeln!(out, "Manufacturer: {}", field(&identity.manufacturer));
    let _ = writeln!(out, "Product:      {}", field(&identity.product));
    let _ = writeln!(out, "Board vendor: {}", field(&identity.board_vendor));
    let _ = writeln!(out, "Board name:   {}", field(&identity.board_name));
    let _ = writeln!(out);
    let _ = writeln!(out, "Dialect:      {} ({})", policy, source);
    let _ = writeln!(
        out,
        "Manual mode:  {}",
        if policy.requires_manual_mode() { "required" } else { "not used" }
    );
    out
}

// ============================================================================
// Sensors
// ============================================================================

pub async fn cmd_sensors<T: IpmiTransport>(
    config: &ControllerConfig,
    executor: &SafeExecutor<T>,
) -> anyhow::Result<()> {
    let mut reader = SensorReader::new();
    let snapshot = reader
        .fetch(executor)
        .await
        .context("Could not read the sensor table")?;

    let policy = VendorPolicy::resolve(config.vendor, &SysfsDmi);
    debug!("Building {} targets from {} sensor rows", policy, snapshot.rows().len());
    let targets = policy.build_targets(config)?;
    print!("{}", render_sensors(snapshot, &targets));
    Ok(())
}

pub fn render_sensors(snapshot: &SensorSnapshot, targets: &[ControlTarget]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<24} {:<6} {:<6} {:>8}", "SENSOR", "ID", "STATUS", "READING");
    for row in snapshot.rows() {
        let _ = writeln!(
            out,
            "{:<24} {:<6} {:<6} {:>8}",
            row.label,
            row.id.as_deref().unwrap_or("-"),
            row.status.as_deref().unwrap_or("-"),
            row.reading.map(|r| format!("{}°C", r)).unwrap_or_else(|| "absent".to_string()),
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Targets:");
    for target in targets {
        let reading = target
            .temperature(snapshot)
            .map(|t| format!("{}°C", t))
            .unwrap_or_else(|| "no reading".to_string());
        let _ = writeln!(
            out,
            "  {:<10} bank {:<6} {}",
            target.name(),
            target.bank().unwrap_or("all"),
            reading
        );
    }
    out
}

// ============================================================================
// Status
// ============================================================================

fn cmd_status(config: &ControllerConfig, json: bool) -> anyhow::Result<()> {
    let status = read_status(&config.status_file)
        .with_context(|| format!("No status at {:?}; is bmcfand running?", config.status_file))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", render_status(&status, unix_now()));
    }
    Ok(())
}

pub fn render_status(status: &StatusSnapshot, now: u64) -> String {
    let age = now.saturating_sub(status.updated_at);
    let state = if !status.alive {
        "stopped"
    } else if age > status.poll_interval_secs * STALE_INTERVALS {
        "stale"
    } else {
        "running"
    };

    let s = &status.settings;
    let mut out = String::new();
    let _ = writeln!(out, "bmcfan Status");
    let _ = writeln!(out, "=============");
    let _ = writeln!(out, "Daemon:   {} (updated {}s ago, {} cycles)", state, age, status.cycles);
    let _ = writeln!(out, "Dialect:  {}", status.vendor);
    let _ = writeln!(out, "Interval: {}s", status.poll_interval_secs);
    let _ = writeln!(
        out,
        "Control:  setpoint {}°C ±{}, duty {}-{}%, kp {}, ki {}, slew {}%",
        s.setpoint, s.deadband, s.min_duty, s.max_duty, s.gain_p, s.gain_i, s.max_slew
    );
    let _ = writeln!(out, "Quiet:    <{}°C caps duty at {}%", s.quiet_threshold, s.quiet_max_duty);
    let _ = writeln!(out);

    for target in &status.targets {
        let temp = target
            .temperature
            .map(|t| format!("{}°C", t))
            .unwrap_or_else(|| "-".to_string());
        let step = target
            .step
            .map(|s| format!(" (step {})", s))
            .unwrap_or_default();
        let _ = writeln!(out, "  {:<10} {:>6}  duty {}%{}", target.name, temp, target.duty, step);
    }
    out
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ============================================================================
// Restore
// ============================================================================

pub async fn cmd_restore_auto<T: IpmiTransport>(executor: &SafeExecutor<T>) -> anyhow::Result<()> {
    actuator::restore_automatic_mode(executor)
        .await
        .context("BMC did not accept the automatic-mode command")?;
    println!("Automatic fan control restored");
    Ok(())
}
