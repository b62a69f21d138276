//! Vendor dialect selection
//!
//! Boards speak one of two fan-control dialects. Stepped boards take a
//! discrete step per fan bank and keep their own automatic mode untouched;
//! continuous boards take a single percent for all fans but must be switched
//! into manual mode first and handed back on exit. All dialect differences
//! live behind [`VendorPolicy`] so the control loop never branches on vendor.

use std::fmt;
use std::fs;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::actuator;
use super::ipmi::{IpmiTransport, SafeExecutor};
use crate::constants::paths::dmi;
use crate::data::ControllerConfig;
use crate::engine::{self, ControlTarget};
use crate::error::{BmcfanError, Result};

/// Identification substrings (lowercase) that select the continuous dialect
const CONTINUOUS_MARKERS: &[&str] = &["dell", "poweredge"];

/// Identification substrings (lowercase) that positively select the stepped dialect
const STEPPED_MARKERS: &[&str] = &["supermicro"];

/// Configured dialect choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VendorSetting {
    Auto,
    Stepped,
    Continuous,
}

impl VendorSetting {
    /// Parse a configured value; vendor names are accepted as aliases
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Some(Self::Auto),
            "stepped" | "supermicro" => Some(Self::Stepped),
            "continuous" | "dell" => Some(Self::Continuous),
            _ => None,
        }
    }
}

/// DMI identification field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmiField {
    SysVendor,
    ProductName,
    BoardVendor,
    BoardName,
}

impl DmiField {
    pub const ALL: [DmiField; 4] = [
        DmiField::SysVendor,
        DmiField::ProductName,
        DmiField::BoardVendor,
        DmiField::BoardName,
    ];

    fn path(self) -> &'static str {
        match self {
            DmiField::SysVendor => dmi::SYS_VENDOR,
            DmiField::ProductName => dmi::PRODUCT_NAME,
            DmiField::BoardVendor => dmi::BOARD_VENDOR,
            DmiField::BoardName => dmi::BOARD_NAME,
        }
    }
}

/// Source of platform identification strings
#[cfg_attr(test, mockall::automock)]
pub trait DmiSource {
    fn read(&self, field: DmiField) -> Option<String>;
}

/// Reads identification from sysfs
#[derive(Debug, Default, Clone, Copy)]
pub struct SysfsDmi;

impl DmiSource for SysfsDmi {
    fn read(&self, field: DmiField) -> Option<String> {
        fs::read_to_string(field.path())
            .map(|s| s.trim().to_string())
            .ok()
            .filter(|s| !s.is_empty())
    }
}

/// Platform identification used for detection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlatformIdentity {
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub board_vendor: Option<String>,
    pub board_name: Option<String>,
}

impl PlatformIdentity {
    pub fn gather(source: &dyn DmiSource) -> Self {
        Self {
            manufacturer: source.read(DmiField::SysVendor),
            product: source.read(DmiField::ProductName),
            board_vendor: source.read(DmiField::BoardVendor),
            board_name: source.read(DmiField::BoardName),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields().next().is_none()
    }

    fn fields(&self) -> impl Iterator<Item = &str> {
        [&self.manufacturer, &self.product, &self.board_vendor, &self.board_name]
            .into_iter()
            .filter_map(|f| f.as_deref())
    }

    fn contains_any(&self, markers: &[&str]) -> bool {
        self.fields().any(|field| {
            let lowered = field.to_ascii_lowercase();
            markers.iter().any(|m| lowered.contains(m))
        })
    }
}

impl fmt::Display for PlatformIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "unknown platform");
        }
        let parts: Vec<&str> = self.fields().collect();
        write!(f, "{}", parts.join(" / "))
    }
}

/// Dialect in force for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VendorPolicy {
    Stepped,
    Continuous,
}

impl VendorPolicy {
    /// Classify a platform. Inconclusive identification selects the stepped
    /// dialect.
    pub fn detect(identity: &PlatformIdentity) -> Self {
        if identity.contains_any(CONTINUOUS_MARKERS) {
            debug!("Continuous-dialect platform: {}", identity);
            Self::Continuous
        } else if identity.contains_any(STEPPED_MARKERS) {
            debug!("Stepped-dialect platform: {}", identity);
            Self::Stepped
        } else {
            info!("Platform not recognised ({}), defaulting to the stepped dialect", identity);
            Self::Stepped
        }
    }

    /// Apply the configured setting; an explicit choice always wins over
    /// detection.
    pub fn resolve(setting: VendorSetting, source: &dyn DmiSource) -> Self {
        match setting {
            VendorSetting::Stepped => Self::Stepped,
            VendorSetting::Continuous => Self::Continuous,
            VendorSetting::Auto => Self::detect(&PlatformIdentity::gather(source)),
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Stepped => "stepped",
            Self::Continuous => "continuous",
        }
    }

    /// Whether the board must be put into manual mode before duties stick
    pub fn requires_manual_mode(self) -> bool {
        matches!(self, Self::Continuous)
    }

    /// Control targets for this dialect
    pub fn build_targets(self, config: &ControllerConfig) -> Result<Vec<ControlTarget>> {
        match self {
            Self::Stepped => engine::stepped_targets(config),
            Self::Continuous => Ok(vec![engine::chassis_target(config)]),
        }
    }

    /// Switch the board to manual fan control. Returns `Ok(false)` when the
    /// dialect has no such mode.
    pub async fn enter_manual_mode<T: IpmiTransport>(self, executor: &SafeExecutor<T>) -> Result<bool> {
        if !self.requires_manual_mode() {
            return Ok(false);
        }
        actuator::enter_manual_mode(executor).await?;
        Ok(true)
    }

    /// Hand fan control back to the board. Returns `Ok(false)` when the
    /// dialect has no such mode.
    pub async fn restore_automatic_mode<T: IpmiTransport>(self, executor: &SafeExecutor<T>) -> Result<bool> {
        if !self.requires_manual_mode() {
            return Ok(false);
        }
        actuator::restore_automatic_mode(executor).await?;
        Ok(true)
    }

    /// Apply a computed duty to a target.
    ///
    /// The stepped dialect quantizes first and records the chosen step on the
    /// target before actuating, so a failed command does not roll it back.
    pub async fn apply_duty<T: IpmiTransport>(
        self,
        executor: &SafeExecutor<T>,
        target: &mut ControlTarget,
        duty: u8,
        hysteresis: u8,
    ) -> Result<()> {
        match self {
            Self::Stepped => {
                let step = engine::quantize(duty, target.state.last_step, hysteresis);
                target.state.last_step = Some(step);
                let bank = target.bank().ok_or_else(|| {
                    BmcfanError::generic(format!("target {} has no fan bank", target.name()))
                })?;
                actuator::apply_step(executor, bank, step).await
            }
            Self::Continuous => actuator::apply_percent(executor, duty).await,
        }
    }
}

impl fmt::Display for VendorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}
