//! bmcfan Daemon (bmcfand)
//!
//! Closed-loop fan control through the BMC. Polls the temperature sensor
//! table, runs a PI controller per fan target and applies the result with the
//! board's fan-control dialect.
//!
//! # Startup
//! - Configuration is loaded and validated before anything touches the BMC
//! - One instance per host: a second instance exits 0 without acting
//! - The metrics directory must be creatable, otherwise startup fails
//!
//! # Shutdown
//! - SIGTERM/SIGINT are honored between cycles or mid-sleep, never mid-command
//! - Continuous-dialect boards are handed back to automatic control
//! - A final export marks the controller as down

mod control_loop;
mod lifecycle;
mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info, warn};

use bf_core::{ControllerConfig, Exporter, IpmiTool, SafeExecutor, SysfsDmi, VendorPolicy};

use crate::control_loop::Controller;
use crate::lifecycle::{InstanceLock, LockOutcome, Shutdown};

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Process Hardening
// ============================================================================

/// Metrics must stay world-readable for the textfile collector
fn set_umask() {
    // SAFETY: umask only sets the file creation mask for the process.
    unsafe { libc::umask(0o022) };
    debug!("Umask set to 0022");
}

fn disable_core_dumps() {
    let limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: setrlimit is called with a valid resource and an initialized struct.
    if unsafe { libc::setrlimit(libc::RLIMIT_CORE, &limit) } != 0 {
        warn!("Failed to disable core dumps");
    }
}

/// Local BMC access needs root; a remote BMC over the network does not
fn check_privileges(config: &ControllerConfig) {
    // SAFETY: geteuid just returns the effective user id.
    let euid = unsafe { libc::geteuid() };
    if euid != 0 && config.ipmitool_args.is_empty() {
        warn!("Not running as root (euid={}); local BMC access will likely fail", euid);
    }
}

// ============================================================================
// CLI
// ============================================================================

struct Options {
    config: Option<PathBuf>,
    once: bool,
}

fn print_help() {
    eprintln!("bmcfand {} - closed-loop IPMI fan control daemon", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    bmcfand [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -c, --config PATH   Env-style configuration file (default /etc/default/bmcfan)");
    eprintln!("        --once          Run a single control cycle, then shut down");
    eprintln!("    -v, --version       Print version");
    eprintln!("    -h, --help          Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    BMCFAN_*            Any configuration key; overrides the file");
    eprintln!("    BMCFAN_LOG          Log filter (trace, debug, info, warn, error)");
    eprintln!("    BMCFAN_DEBUG        Debug logging when BMCFAN_LOG is unset");
    eprintln!();
    eprintln!("    BMCFAN_LOG and BMCFAN_DEBUG may also be set in the configuration file.");
}

/// Returns `None` when the process should exit successfully right away
fn parse_args() -> Option<Options> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = Options {
        config: None,
        once: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                return None;
            }
            "-v" | "--version" => {
                println!("bmcfand {}", VERSION);
                return None;
            }
            "--once" => options.once = true,
            "-c" | "--config" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
                options.config = Some(PathBuf::from(&args[i]));
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    Some(options)
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    logging::install_panic_hook();

    let Some(options) = parse_args() else {
        return Ok(());
    };

    let mut log = logging::init();
    set_umask();
    disable_core_dumps();

    info!("STARTUP: bmcfand {} starting", VERSION);
    info!("STARTUP: Logging to {}", if log.journald { "systemd journal" } else { "stdout" });

    // Starting: configuration, lock, export directory, dialect
    let config = ControllerConfig::load(options.config.as_deref()).context("Invalid configuration")?;
    match &config.log_filter {
        Some(directive) => {
            log.set_filter(directive);
        }
        None if config.debug => log.enable_debug(),
        None => {}
    }
    debug!("STARTUP: Log filter: {}", log.filter);
    check_privileges(&config);

    let _lock = match InstanceLock::acquire(&config.lock_file).context("Could not take instance lock")? {
        LockOutcome::Acquired(lock) => {
            debug!("STARTUP: Lock held at {:?}", lock.path());
            lock
        }
        LockOutcome::Held { pid } => {
            match pid {
                Some(pid) => info!("Another instance is running (PID {}), exiting", pid),
                None => info!("Another instance is running, exiting"),
            }
            return Ok(());
        }
    };

    let exporter = Exporter::from_config(&config);
    exporter
        .prepare()
        .context("Could not create metrics directory")?;

    let policy = VendorPolicy::resolve(config.vendor, &SysfsDmi);
    info!("STARTUP: Fan control dialect: {}", policy);

    let executor = SafeExecutor::from_config(IpmiTool::from_config(&config), &config);
    let mut controller = Controller::new(config, policy, executor, exporter)?;

    let shutdown = Arc::new(Shutdown::new());
    if let Err(e) = lifecycle::listen_for_signals(shutdown.clone()) {
        warn!("Failed to install signal handlers: {}. Shutdown via signals may not work cleanly.", e);
    }

    let state = lifecycle::run(&mut controller, &shutdown, options.once).await;
    info!("SHUTDOWN: bmcfand {}", state);
    Ok(())
}
