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

use clap::Parser;
use tracing_subscriber::EnvFilter;

use bmcfan::cli::Cli;
use bmcfan::commands;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    // Logging only when BMCFAN_LOG is set
    if let Ok(filter) = std::env::var("BMCFAN_LOG") {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(filter))
            .with_writer(std::io::stderr)
            .init();
    }

    if let Err(e) = commands::run_cli(&cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
