//! Metrics and status export
//!
//! After every completed cycle the controller publishes two documents:
//!
//! * a Prometheus textfile-collector snapshot (`bmcfan_*` gauges)
//! * a JSON status document read back by `bmcfan status`
//!
//! Both are replaced atomically so readers never see a partial write.

use std::fmt::Write as _;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ControllerConfig;
use crate::constants::metrics::PREFIX;
use crate::engine::{ControlTarget, Step};
use crate::error::{BmcfanError, Result};
use crate::hw::VendorPolicy;

/// Exported state of one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetStatus {
    pub name: String,
    pub bank: Option<String>,
    pub temperature: Option<i32>,
    pub duty: u8,
    pub step: Option<Step>,
}

impl TargetStatus {
    pub fn from_target(target: &ControlTarget, temperature: Option<i32>) -> Self {
        Self {
            name: target.name().to_string(),
            bank: target.bank().map(String::from),
            temperature,
            duty: target.state.last_duty,
            step: target.state.last_step,
        }
    }
}

/// Controller tunables echoed into the export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedSettings {
    pub setpoint: i32,
    pub deadband: i32,
    pub min_duty: u8,
    pub max_duty: u8,
    pub gain_p: f64,
    pub gain_i: f64,
    pub max_slew: u8,
    pub quiet_threshold: i32,
    pub quiet_max_duty: u8,
    pub hysteresis: u8,
}

impl From<&ControllerConfig> for ExportedSettings {
    fn from(config: &ControllerConfig) -> Self {
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
            hysteresis: config.hysteresis,
        }
    }
}

/// Everything published after a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub vendor: VendorPolicy,
    /// False only in the final write made on shutdown
    pub alive: bool,
    pub poll_interval_secs: u64,
    /// Unix seconds of the write
    pub updated_at: u64,
    /// Completed cycles since start
    pub cycles: u64,
    pub settings: ExportedSettings,
    pub targets: Vec<TargetStatus>,
}

impl StatusSnapshot {
    pub fn new(
        config: &ControllerConfig,
        vendor: VendorPolicy,
        targets: Vec<TargetStatus>,
        cycles: u64,
        alive: bool,
    ) -> Self {
        Self {
            vendor,
            alive,
            poll_interval_secs: config.interval_secs,
            updated_at: current_timestamp(),
            cycles,
            settings: ExportedSettings::from(config),
            targets,
        }
    }

    /// Render the Prometheus text exposition
    pub fn render_metrics(&self) -> String {
        let mut out = String::new();
        let s = &self.settings;

        gauge(&mut out, "up", "", self.alive as u8);
        gauge(&mut out, "vendor_info", &format!("{{dialect=\"{}\"}}", self.vendor.tag()), 1);
        gauge(&mut out, "poll_interval_seconds", "", self.poll_interval_secs);
        gauge(&mut out, "cycles_total", "", self.cycles);
        gauge(&mut out, "last_update_timestamp_seconds", "", self.updated_at);

        gauge(&mut out, "setpoint_celsius", "", s.setpoint);
        gauge(&mut out, "deadband_celsius", "", s.deadband);
        gauge(&mut out, "duty_min_percent", "", s.min_duty);
        gauge(&mut out, "duty_max_percent", "", s.max_duty);
        gauge(&mut out, "gain_p", "", s.gain_p);
        gauge(&mut out, "gain_i", "", s.gain_i);
        gauge(&mut out, "slew_max_percent", "", s.max_slew);
        gauge(&mut out, "quiet_threshold_celsius", "", s.quiet_threshold);
        gauge(&mut out, "quiet_max_percent", "", s.quiet_max_duty);
        gauge(&mut out, "hysteresis_percent", "", s.hysteresis);

        for target in &self.targets {
            let labels = format!("{{target=\"{}\"}}", escape_label(&target.name));
            if let Some(temp) = target.temperature {
                gauge(&mut out, "temperature_celsius", &labels, temp);
            }
            gauge(&mut out, "duty_percent", &labels, target.duty);
            if let Some(step) = target.step {
                gauge(&mut out, "step_percent", &labels, step.percent());
            }
        }

        out
    }
}

fn gauge(out: &mut String, name: &str, labels: &str, value: impl std::fmt::Display) {
    let _ = writeln!(out, "{}_{}{} {}", PREFIX, name, labels, value);
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Publishes snapshots to the metrics and status files
#[derive(Debug, Clone)]
pub struct Exporter {
    metrics_file: PathBuf,
    status_file: PathBuf,
}

impl Exporter {
    pub fn new(metrics_file: impl Into<PathBuf>, status_file: impl Into<PathBuf>) -> Self {
        Self {
            metrics_file: metrics_file.into(),
            status_file: status_file.into(),
        }
    }

    pub fn from_config(config: &ControllerConfig) -> Self {
        Self::new(&config.metrics_file, &config.status_file)
    }

    pub fn metrics_file(&self) -> &Path {
        &self.metrics_file
    }

    pub fn status_file(&self) -> &Path {
        &self.status_file
    }

    /// Create the output directories. Failure here is fatal at startup.
    pub fn prepare(&self) -> Result<()> {
        for path in [&self.metrics_file, &self.status_file] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|e| BmcfanError::CreateDir {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }
        Ok(())
    }

    pub fn publish(&self, snapshot: &StatusSnapshot) -> Result<()> {
        write_atomic(&self.metrics_file, snapshot.render_metrics().as_bytes())?;
        let json = serde_json::to_string_pretty(snapshot)?;
        write_atomic(&self.status_file, json.as_bytes())?;
        debug!("Published status for {} target(s)", snapshot.targets.len());
        Ok(())
    }
}

/// Read a status document written by [`Exporter::publish`]
pub fn read_status(path: &Path) -> Result<StatusSnapshot> {
    let contents = fs::read_to_string(path).map_err(|e| BmcfanError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(serde_json::from_str(&contents)?)
}

/// Write to a hidden sibling temp file, sync, then rename into place
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| BmcfanError::generic(format!("{:?} has no file name", path)))?;
    let temp_path = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

    let mut file = fs::File::create(&temp_path)
        .map_err(|e| BmcfanError::FileWrite { path: temp_path.clone(), source: e })?;
    file.write_all(contents)
        .map_err(|e| BmcfanError::FileWrite { path: temp_path.clone(), source: e })?;
    file.sync_all()
        .map_err(|e| BmcfanError::FileWrite { path: temp_path.clone(), source: e })?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| BmcfanError::FileWrite {
        path: path.to_path_buf(),
        source: e,
    })
}

fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::config::keys;
    use crate::hw::SensorSelector;

    fn config() -> ControllerConfig {
        ControllerConfig::from_lookup(|_| None).unwrap()
    }

    fn stepped_snapshot() -> StatusSnapshot {
        let config = config();
        let mut cpu1 = ControlTarget::new("cpu1", vec![SensorSelector::parse("CPU1 Temp")], Some("0x00".into()), 16);
        cpu1.state.last_step = Step::from_percent(25);
        let cpu2 = ControlTarget::new("cpu2", vec![SensorSelector::parse("CPU2 Temp")], Some("0x01".into()), 30);

        StatusSnapshot::new(
            &config,
            VendorPolicy::Stepped,
            vec![
                TargetStatus::from_target(&cpu1, Some(70)),
                TargetStatus::from_target(&cpu2, None),
            ],
            1,
            true,
        )
    }

    #[test]
    fn test_render_metrics() {
        let text = stepped_snapshot().render_metrics();

        assert!(text.contains("bmcfan_up 1\n"));
        assert!(text.contains("bmcfan_vendor_info{dialect=\"stepped\"} 1\n"));
        assert!(text.contains("bmcfan_poll_interval_seconds 10\n"));
        assert!(text.contains("bmcfan_setpoint_celsius 65\n"));
        assert!(text.contains("bmcfan_gain_p 3\n"));
        assert!(text.contains("bmcfan_temperature_celsius{target=\"cpu1\"} 70\n"));
        assert!(text.contains("bmcfan_duty_percent{target=\"cpu1\"} 16\n"));
        assert!(text.contains("bmcfan_step_percent{target=\"cpu1\"} 25\n"));
        assert!(text.contains("bmcfan_duty_percent{target=\"cpu2\"} 30\n"));
    }

    #[test]
    fn test_absent_temperature_omitted() {
        let text = stepped_snapshot().render_metrics();
        assert!(!text.contains("temperature_celsius{target=\"cpu2\"}"));
        assert!(!text.contains("step_percent{target=\"cpu2\"}"));
    }

    #[test]
    fn test_not_alive_renders_zero() {
        let mut snapshot = stepped_snapshot();
        snapshot.alive = false;
        assert!(snapshot.render_metrics().starts_with("bmcfan_up 0\n"));
    }

    #[test]
    fn test_escape_label() {
        assert_eq!(escape_label("a\"b\\c"), "a\\\"b\\\\c");
    }

    #[test]
    fn test_publish_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(dir.path().join("prom/bmcfan.prom"), dir.path().join("run/status.json"));
        exporter.prepare().unwrap();

        let snapshot = stepped_snapshot();
        exporter.publish(&snapshot).unwrap();

        let metrics = fs::read_to_string(exporter.metrics_file()).unwrap();
        assert_eq!(metrics, snapshot.render_metrics());

        let status = read_status(exporter.status_file()).unwrap();
        assert_eq!(status, snapshot);

        // No temp files left behind
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("prom"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_prepare_fails_when_parent_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "x").unwrap();

        let exporter = Exporter::new(blocker.join("bmcfan.prom"), dir.path().join("status.json"));
        assert!(matches!(exporter.prepare(), Err(BmcfanError::CreateDir { .. })));
    }

    #[test]
    fn test_settings_follow_config() {
        let config = ControllerConfig::from_lookup(|key| (key == keys::KI).then(|| "0.5".to_string())).unwrap();
        let settings = ExportedSettings::from(&config);
        assert_eq!(settings.gain_i, 0.5);
        assert_eq!(settings.max_slew, 6);
    }
}
