//! Controller configuration
//!
//! Every tunable comes from an env-style key/value source: an optional file of
//! `KEY=VALUE` lines, overlaid by the process environment. All keys have
//! defaults, so an empty environment yields a working configuration.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::constants::control::{MAX_TEMPERATURE, MIN_TEMPERATURE};
use crate::constants::{defaults, exec, ipmi, paths};
use crate::error::{BmcfanError, Result};
use crate::hw::{SensorSelector, VendorSetting};

/// Configuration keys, in the order they are documented
pub mod keys {
    pub const CONFIG: &str = "BMCFAN_CONFIG";
    pub const SETPOINT: &str = "BMCFAN_SETPOINT";
    pub const DEADBAND: &str = "BMCFAN_DEADBAND";
    pub const MIN_DUTY: &str = "BMCFAN_MIN_DUTY";
    pub const MAX_DUTY: &str = "BMCFAN_MAX_DUTY";
    pub const INITIAL_DUTY: &str = "BMCFAN_INITIAL_DUTY";
    pub const KP: &str = "BMCFAN_KP";
    pub const KI: &str = "BMCFAN_KI";
    pub const MAX_SLEW: &str = "BMCFAN_MAX_SLEW";
    pub const QUIET_THRESHOLD: &str = "BMCFAN_QUIET_THRESHOLD";
    pub const QUIET_MAX_DUTY: &str = "BMCFAN_QUIET_MAX_DUTY";
    pub const HYSTERESIS: &str = "BMCFAN_HYSTERESIS";
    pub const INTERVAL: &str = "BMCFAN_INTERVAL";
    pub const SENSORS: &str = "BMCFAN_SENSORS";
    pub const BANKS: &str = "BMCFAN_BANKS";
    pub const VENDOR: &str = "BMCFAN_VENDOR";
    pub const COMMAND_TIMEOUT: &str = "BMCFAN_COMMAND_TIMEOUT";
    pub const COMMAND_ATTEMPTS: &str = "BMCFAN_COMMAND_ATTEMPTS";
    pub const IPMITOOL: &str = "BMCFAN_IPMITOOL";
    pub const IPMITOOL_ARGS: &str = "BMCFAN_IPMITOOL_ARGS";
    pub const METRICS_FILE: &str = "BMCFAN_METRICS_FILE";
    pub const STATUS_FILE: &str = "BMCFAN_STATUS_FILE";
    pub const LOCK_FILE: &str = "BMCFAN_LOCK_FILE";
    pub const DEBUG: &str = "BMCFAN_DEBUG";
    pub const LOG: &str = "BMCFAN_LOG";

    /// Every key the loader understands
    pub const ALL: &[&str] = &[
        CONFIG, SETPOINT, DEADBAND, MIN_DUTY, MAX_DUTY, INITIAL_DUTY, KP, KI, MAX_SLEW,
        QUIET_THRESHOLD, QUIET_MAX_DUTY, HYSTERESIS, INTERVAL, SENSORS, BANKS, VENDOR,
        COMMAND_TIMEOUT, COMMAND_ATTEMPTS, IPMITOOL, IPMITOOL_ARGS, METRICS_FILE,
        STATUS_FILE, LOCK_FILE, DEBUG, LOG,
    ];
}

/// Immutable controller configuration, loaded once at startup
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerConfig {
    /// Target steady-state temperature (°C)
    pub setpoint: i32,
    /// Half-width of the band around the setpoint where only decay applies (°C)
    pub deadband: i32,
    pub min_duty: u8,
    pub max_duty: u8,
    /// Duty assumed for every target before the first cycle
    pub initial_duty: u8,
    pub gain_p: f64,
    /// Zero disables the integral term
    pub gain_i: f64,
    /// Largest duty change allowed per cycle
    pub max_slew: u8,
    pub quiet_threshold: i32,
    pub quiet_max_duty: u8,
    /// Margin the stepped quantizer requires before changing step
    pub hysteresis: u8,
    pub interval_secs: u64,
    pub sensors: Vec<SensorSelector>,
    pub banks: Vec<String>,
    pub vendor: VendorSetting,
    pub command_timeout_secs: u64,
    pub command_attempts: u32,
    pub ipmitool: String,
    pub ipmitool_args: Vec<String>,
    pub metrics_file: PathBuf,
    pub status_file: PathBuf,
    pub lock_file: PathBuf,
    pub debug: bool,
    /// tracing filter directive; takes precedence over `debug`
    pub log_filter: Option<String>,
}

impl ControllerConfig {
    /// Load configuration from the env-style file (if any) overlaid by the
    /// process environment.
    ///
    /// An explicitly requested file must exist; the default file is optional.
    pub fn load(explicit_file: Option<&Path>) -> Result<Self> {
        let file = explicit_file
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(keys::CONFIG).ok().map(PathBuf::from));

        let mut values = match file {
            Some(path) => {
                let contents = fs::read_to_string(&path)
                    .map_err(|e| BmcfanError::FileRead { path: path.clone(), source: e })?;
                info!("Loading configuration from {:?}", path);
                parse_env_file(&contents)
            }
            None => match fs::read_to_string(paths::CONFIG_FILE) {
                Ok(contents) => {
                    info!("Loading configuration from {}", paths::CONFIG_FILE);
                    parse_env_file(&contents)
                }
                Err(e) => {
                    debug!("No configuration file at {}: {}", paths::CONFIG_FILE, e);
                    HashMap::new()
                }
            },
        };

        for key in keys::ALL {
            if let Ok(value) = std::env::var(key) {
                values.insert((*key).to_string(), value);
            }
        }

        Self::from_lookup(|key| values.get(key).cloned())
    }

    /// Build a configuration from an arbitrary key lookup, applying defaults
    /// and validating the result.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let vendor_raw = get(keys::VENDOR).unwrap_or_else(|| "auto".to_string());
        let vendor = match VendorSetting::parse(&vendor_raw) {
            Some(v) => v,
            None => {
                warn!(
                    "Unknown {} value '{}', falling back to the stepped dialect",
                    keys::VENDOR, vendor_raw
                );
                VendorSetting::Stepped
            }
        };

        let config = Self {
            setpoint: parse_field(&get, keys::SETPOINT, defaults::SETPOINT)?,
            deadband: parse_field(&get, keys::DEADBAND, defaults::DEADBAND)?,
            min_duty: parse_field(&get, keys::MIN_DUTY, defaults::MIN_DUTY)?,
            max_duty: parse_field(&get, keys::MAX_DUTY, defaults::MAX_DUTY)?,
            initial_duty: parse_field(&get, keys::INITIAL_DUTY, defaults::INITIAL_DUTY)?,
            gain_p: parse_field(&get, keys::KP, defaults::GAIN_P)?,
            gain_i: parse_field(&get, keys::KI, defaults::GAIN_I)?,
            max_slew: parse_field(&get, keys::MAX_SLEW, defaults::MAX_SLEW)?,
            quiet_threshold: parse_field(&get, keys::QUIET_THRESHOLD, defaults::QUIET_THRESHOLD)?,
            quiet_max_duty: parse_field(&get, keys::QUIET_MAX_DUTY, defaults::QUIET_MAX_DUTY)?,
            hysteresis: parse_field(&get, keys::HYSTERESIS, defaults::HYSTERESIS)?,
            interval_secs: parse_field(&get, keys::INTERVAL, defaults::INTERVAL_SECS)?,
            sensors: split_list(&get(keys::SENSORS).unwrap_or_else(|| defaults::SENSORS.to_string()))
                .iter()
                .map(|s| SensorSelector::parse(s))
                .collect(),
            banks: split_list(&get(keys::BANKS).unwrap_or_else(|| defaults::BANKS.to_string())),
            vendor,
            command_timeout_secs: parse_field(
                &get,
                keys::COMMAND_TIMEOUT,
                exec::DEFAULT_TIMEOUT.as_secs(),
            )?,
            command_attempts: parse_field(&get, keys::COMMAND_ATTEMPTS, exec::DEFAULT_ATTEMPTS)?,
            ipmitool: get(keys::IPMITOOL).unwrap_or_else(|| ipmi::DEFAULT_PROGRAM.to_string()),
            ipmitool_args: get(keys::IPMITOOL_ARGS)
                .map(|s| s.split_whitespace().map(String::from).collect())
                .unwrap_or_default(),
            metrics_file: get(keys::METRICS_FILE)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(paths::METRICS_FILE)),
            status_file: get(keys::STATUS_FILE)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(paths::STATUS_FILE)),
            lock_file: get(keys::LOCK_FILE)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(paths::default_lock_file())),
            debug: get(keys::DEBUG).map(|v| parse_flag(&v)).unwrap_or(false),
            log_filter: get(keys::LOG),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants
    pub fn validate(&self) -> Result<()> {
        let credible = MIN_TEMPERATURE..=MAX_TEMPERATURE;
        if !credible.contains(&self.setpoint) {
            return Err(BmcfanError::invalid_config(
                keys::SETPOINT,
                format!("must lie within [{}, {}]", MIN_TEMPERATURE, MAX_TEMPERATURE),
            ));
        }
        if !credible.contains(&self.quiet_threshold) {
            return Err(BmcfanError::invalid_config(
                keys::QUIET_THRESHOLD,
                format!("must lie within [{}, {}]", MIN_TEMPERATURE, MAX_TEMPERATURE),
            ));
        }
        if self.max_duty > 100 {
            return Err(BmcfanError::invalid_config(keys::MAX_DUTY, "must be <= 100"));
        }
        if self.min_duty > self.max_duty {
            return Err(BmcfanError::invalid_config(
                keys::MIN_DUTY,
                format!("{} exceeds {} ({})", self.min_duty, keys::MAX_DUTY, self.max_duty),
            ));
        }
        if self.quiet_max_duty < self.min_duty || self.quiet_max_duty > self.max_duty {
            return Err(BmcfanError::invalid_config(
                keys::QUIET_MAX_DUTY,
                format!("{} must lie within [{}, {}]", self.quiet_max_duty, self.min_duty, self.max_duty),
            ));
        }
        if self.deadband < 0 {
            return Err(BmcfanError::invalid_config(keys::DEADBAND, "must not be negative"));
        }
        if !self.gain_p.is_finite() || self.gain_p < 0.0 {
            return Err(BmcfanError::invalid_config(keys::KP, "must be a non-negative number"));
        }
        if !self.gain_i.is_finite() || self.gain_i < 0.0 {
            return Err(BmcfanError::invalid_config(keys::KI, "must be a non-negative number"));
        }
        if self.interval_secs == 0 {
            return Err(BmcfanError::invalid_config(keys::INTERVAL, "must be at least 1 second"));
        }
        if self.command_timeout_secs == 0 {
            return Err(BmcfanError::invalid_config(keys::COMMAND_TIMEOUT, "must be at least 1 second"));
        }
        if self.command_attempts == 0 {
            return Err(BmcfanError::invalid_config(keys::COMMAND_ATTEMPTS, "must be at least 1"));
        }
        if self.sensors.is_empty() {
            return Err(BmcfanError::invalid_config(keys::SENSORS, "at least one sensor selector is required"));
        }
        Ok(())
    }

    /// Poll interval as a Duration
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Per-attempt command timeout as a Duration
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Initial duty clamped into the configured bounds
    pub fn clamped_initial_duty(&self) -> u8 {
        self.initial_duty.clamp(self.min_duty, self.max_duty)
    }
}

/// Parse `KEY=VALUE` lines. Blank lines and `#` comments are skipped, an
/// optional `export ` prefix and surrounding quotes are stripped.
pub fn parse_env_file(contents: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            warn!("Ignoring malformed configuration line: {}", line);
            continue;
        };

        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
            .unwrap_or(value);

        values.insert(key.trim().to_string(), value.to_string());
    }

    values
}

fn parse_field<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| BmcfanError::invalid_config(key, format!("'{}': {}", raw, e))),
        None => Ok(default),
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ControllerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.setpoint, 65);
        assert_eq!(config.deadband, 2);
        assert_eq!(config.min_duty, 10);
        assert_eq!(config.max_duty, 100);
        assert_eq!(config.gain_i, 0.0);
        assert_eq!(config.interval(), Duration::from_secs(10));
        assert_eq!(config.vendor, VendorSetting::Auto);
        assert_eq!(
            config.sensors,
            vec![
                SensorSelector::Label("CPU1 Temp".to_string()),
                SensorSelector::Label("CPU2 Temp".to_string()),
            ]
        );
        assert_eq!(config.banks, vec!["0x00", "0x01"]);
        assert!(!config.debug);
    }

    #[test]
    fn test_overrides_applied() {
        let config = ControllerConfig::from_lookup(lookup_from(&[
            (keys::SETPOINT, "70"),
            (keys::KI, "0.25"),
            (keys::SENSORS, "id:0Eh, Inlet Temp"),
            (keys::VENDOR, "dell"),
            (keys::IPMITOOL_ARGS, "-I lanplus -H 10.0.0.2"),
            (keys::DEBUG, "yes"),
        ]))
        .unwrap();

        assert_eq!(config.setpoint, 70);
        assert_eq!(config.gain_i, 0.25);
        assert_eq!(
            config.sensors,
            vec![
                SensorSelector::Id("0Eh".to_string()),
                SensorSelector::Label("Inlet Temp".to_string()),
            ]
        );
        assert_eq!(config.vendor, VendorSetting::Continuous);
        assert_eq!(config.ipmitool_args, vec!["-I", "lanplus", "-H", "10.0.0.2"]);
        assert!(config.debug);
    }

    #[test]
    fn test_unknown_vendor_falls_back_to_stepped() {
        let config = ControllerConfig::from_lookup(lookup_from(&[(keys::VENDOR, "acme")])).unwrap();
        assert_eq!(config.vendor, VendorSetting::Stepped);
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = ControllerConfig::from_lookup(lookup_from(&[(keys::SETPOINT, "warm")])).unwrap_err();
        assert!(err.to_string().contains(keys::SETPOINT));
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let err = ControllerConfig::from_lookup(lookup_from(&[
            (keys::MIN_DUTY, "60"),
            (keys::MAX_DUTY, "40"),
        ]))
        .unwrap_err();
        assert!(matches!(err, BmcfanError::InvalidConfig { .. }));
    }

    #[test]
    fn test_quiet_cap_outside_bounds_rejected() {
        let result = ControllerConfig::from_lookup(lookup_from(&[
            (keys::MIN_DUTY, "20"),
            (keys::QUIET_MAX_DUTY, "15"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_incredible_temperatures_rejected() {
        for (key, value) in [
            (keys::SETPOINT, "-2147483648"),
            (keys::SETPOINT, "2147483647"),
            (keys::SETPOINT, "-274"),
            (keys::QUIET_THRESHOLD, "1001"),
            (keys::QUIET_THRESHOLD, "-2147483648"),
        ] {
            let err = ControllerConfig::from_lookup(lookup_from(&[(key, value)])).unwrap_err();
            assert!(err.to_string().contains(key), "{}={} gave {}", key, value, err);
        }

        let config = ControllerConfig::from_lookup(lookup_from(&[
            (keys::SETPOINT, "-273"),
            (keys::QUIET_THRESHOLD, "-273"),
        ]))
        .unwrap();
        assert_eq!(config.setpoint, -273);
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(ControllerConfig::from_lookup(lookup_from(&[(keys::INTERVAL, "0")])).is_err());
    }

    #[test]
    fn test_initial_duty_clamped() {
        let config = ControllerConfig::from_lookup(lookup_from(&[(keys::INITIAL_DUTY, "5")])).unwrap();
        assert_eq!(config.clamped_initial_duty(), 10);
    }

    #[test]
    fn test_parse_env_file() {
        let values = parse_env_file(
            "# bmcfan overrides\n\
             BMCFAN_SETPOINT=68\n\
             export BMCFAN_SENSORS=\"CPU1 Temp,CPU2 Temp\"\n\
             BMCFAN_VENDOR='continuous'\n\
             garbage line\n\
             \n",
        );
        assert_eq!(values.get("BMCFAN_SETPOINT").map(String::as_str), Some("68"));
        assert_eq!(values.get("BMCFAN_SENSORS").map(String::as_str), Some("CPU1 Temp,CPU2 Temp"));
        assert_eq!(values.get("BMCFAN_VENDOR").map(String::as_str), Some("continuous"));
        assert_eq!(values.len(), 3);
    }

    #[test]
    #[serial]
    fn test_log_filter_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "BMCFAN_LOG=bf_core=trace").unwrap();

        std::env::remove_var(keys::LOG);
        let config = ControllerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.log_filter.as_deref(), Some("bf_core=trace"));

        std::env::set_var(keys::LOG, "warn");
        let config = ControllerConfig::load(Some(file.path()));
        std::env::remove_var(keys::LOG);
        assert_eq!(config.unwrap().log_filter.as_deref(), Some("warn"));

        let config = ControllerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.log_filter, None);
    }

    #[test]
    #[serial]
    fn test_load_environment_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "BMCFAN_SETPOINT=60").unwrap();
        writeln!(file, "BMCFAN_DEADBAND=4").unwrap();

        std::env::set_var(keys::SETPOINT, "72");
        let config = ControllerConfig::load(Some(file.path()));
        std::env::remove_var(keys::SETPOINT);

        let config = config.unwrap();
        assert_eq!(config.setpoint, 72);
        assert_eq!(config.deadband, 4);
    }

    #[test]
    #[serial]
    fn test_load_missing_explicit_file_fails() {
        let result = ControllerConfig::load(Some(Path::new("/nonexistent/bmcfan.conf")));
        assert!(matches!(result, Err(BmcfanError::FileRead { .. })));
    }
}
