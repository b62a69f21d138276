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

//! Command Line Interface
//!
//! Operator access to the configuration, platform detection, live sensor
//! readings and the daemon's last exported status.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "bmcfan")]
#[command(version)]
#[command(about = "bmcfan - closed-loop IPMI fan control")]
#[command(long_about = "bmcfan - closed-loop IPMI fan control

Operator tool for the bmcfand daemon. Reads the same configuration as the
daemon (env-style file overlaid by BMCFAN_* environment variables).

EXAMPLES:
    bmcfan config                 Print the effective configuration as JSON
    bmcfan detect                 Show platform identity and fan-control dialect
    bmcfan sensors                Read the BMC temperature table
    bmcfan status                 Show the daemon's last exported status
    bmcfan status --json          Same, as raw JSON
    bmcfan restore-auto           Hand fan control back to the BMC

ENVIRONMENT VARIABLES:
    BMCFAN_CONFIG=PATH     Configuration file (default /etc/default/bmcfan)
    BMCFAN_LOG=debug       Enable debug logging

FILES:
    /etc/default/bmcfan                                     Configuration
    /run/bmcfan/status.json                                 Daemon status
    /var/lib/node_exporter/textfile_collector/bmcfan.prom   Metrics")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file to read instead of the default
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Print the effective configuration as JSON
    Config,

    /// Show platform identity and the resolved fan-control dialect
    Detect,

    /// Fetch the temperature sensor table and per-target readings
    Sensors,

    /// Show the daemon's last exported status
    Status {
        /// Print the raw status document
        #[arg(long)]
        json: bool,
    },

    /// Issue the automatic-mode command (continuous-dialect boards)
    RestoreAuto,
}
