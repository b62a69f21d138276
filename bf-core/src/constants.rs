//! Constants and configuration defaults for bmcfan
//!
//! Centralizes magic numbers, command encodings, paths and defaults.
//! Add new values here instead of sprinkling literals through the code.

use std::time::Duration;

/// System paths
pub mod paths {
    use std::path::Path;

    /// Env-style configuration file read before the process environment
    pub const CONFIG_FILE: &str = "/etc/default/bmcfan";

    /// Textfile-collector metrics snapshot
    pub const METRICS_FILE: &str = "/var/lib/node_exporter/textfile_collector/bmcfan.prom";

    /// JSON status snapshot read by `bmcfan status`
    pub const STATUS_FILE: &str = "/run/bmcfan/status.json";

    /// Single-instance lock file, placed under /run when it exists
    pub fn default_lock_file() -> &'static str {
        if Path::new("/run").exists() {
            "/run/bmcfan.lock"
        } else {
            "/var/run/bmcfan.lock"
        }
    }

    /// DMI/SMBIOS identification strings used for vendor detection
    pub mod dmi {
        pub const SYS_VENDOR: &str = "/sys/class/dmi/id/sys_vendor";
        pub const PRODUCT_NAME: &str = "/sys/class/dmi/id/product_name";
        pub const BOARD_VENDOR: &str = "/sys/class/dmi/id/board_vendor";
        pub const BOARD_NAME: &str = "/sys/class/dmi/id/board_name";
    }
}

/// Platform management command encodings
pub mod ipmi {
    /// Default program used to talk to the BMC
    pub const DEFAULT_PROGRAM: &str = "ipmitool";

    /// Arguments that dump the temperature sensor table
    pub const SENSOR_QUERY: &[&str] = &["sdr", "type", "temperature"];

    /// Stepped dialect: `raw <prefix..> <bank> <code>`
    pub const STEPPED_PREFIX: &[&str] = &["raw", "0x30", "0x70", "0x66", "0x01"];

    /// Continuous dialect: enter manual fan control
    pub const CONTINUOUS_MANUAL: &[&str] = &["raw", "0x30", "0x30", "0x01", "0x00"];

    /// Continuous dialect: hand fan control back to the BMC
    pub const CONTINUOUS_AUTOMATIC: &[&str] = &["raw", "0x30", "0x30", "0x01", "0x01"];

    /// Continuous dialect: `raw <prefix..> <percent as hex>`, applies to all fans
    pub const CONTINUOUS_DUTY_PREFIX: &[&str] = &["raw", "0x30", "0x30", "0x02", "0xff"];
}

/// Discrete steps supported by the stepped dialect and their one-byte codes.
/// Ascending by percent; the quantizer relies on this ordering.
pub const STEP_TABLE: [(u8, u8); 12] = [
    (0, 0x12),
    (25, 0x30),
    (30, 0x35),
    (35, 0x3A),
    (40, 0x40),
    (50, 0x50),
    (60, 0x60),
    (70, 0x70),
    (80, 0x80),
    (90, 0x90),
    (95, 0xA0),
    (100, 0xFF),
];

/// Safe Command Executor parameters
pub mod exec {
    use super::*;

    /// Sleep before attempt N (index 0 = first attempt). Attempts past the end
    /// reuse the last entry.
    pub const BACKOFF: [Duration; 3] = [
        Duration::ZERO,
        Duration::from_millis(200),
        Duration::from_millis(500),
    ];

    /// Default per-attempt timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Default attempts per command
    pub const DEFAULT_ATTEMPTS: u32 = 3;
}

/// PI controller parameters
pub mod control {
    /// Fixed-point scale of the integral accumulator
    pub const INTEGRAL_RESOLUTION: i64 = 1000;

    /// Upper bound of any duty percent
    pub const DUTY_CEILING: u8 = 100;

    /// Temperatures outside this range (°C) are not credible sensor values
    pub const MIN_TEMPERATURE: i32 = -273;
    pub const MAX_TEMPERATURE: i32 = 1000;
}

/// Lifecycle timing
pub mod timing {
    use super::*;

    /// Interval sleeps are cut into slices this long so shutdown is honored promptly
    pub const SLEEP_SLICE: Duration = Duration::from_millis(250);

    /// Consecutive failures between repeated warn-level log lines
    pub const LOG_EVERY_N_FAILURES: u32 = 10;
}

/// Default values for every tunable in `ControllerConfig`
pub mod defaults {
    pub const SETPOINT: i32 = 65;
    pub const DEADBAND: i32 = 2;
    pub const MIN_DUTY: u8 = 10;
    pub const MAX_DUTY: u8 = 100;
    pub const INITIAL_DUTY: u8 = 30;
    pub const GAIN_P: f64 = 3.0;
    pub const GAIN_I: f64 = 0.0;
    pub const MAX_SLEW: u8 = 6;
    pub const QUIET_THRESHOLD: i32 = 50;
    pub const QUIET_MAX_DUTY: u8 = 15;
    pub const HYSTERESIS: u8 = 3;
    pub const INTERVAL_SECS: u64 = 10;
    pub const SENSORS: &str = "CPU1 Temp,CPU2 Temp";
    pub const BANKS: &str = "0x00,0x01";
}

/// Metric names written to the textfile snapshot
pub mod metrics {
    pub const PREFIX: &str = "bmcfan";
}
