//! Platform management access
//!
//! Command execution against the BMC, sensor table parsing, vendor dialect
//! selection and fan actuation.

pub mod actuator;
mod ipmi;
mod sensors;
mod vendor;

pub use ipmi::{backoff_for, IpmiCommand, IpmiTool, IpmiTransport, SafeExecutor};
pub use sensors::{parse_reading, SensorReader, SensorRow, SensorSelector, SensorSnapshot};
pub use vendor::{
    DmiField, DmiSource, PlatformIdentity, SysfsDmi, VendorPolicy, VendorSetting,
};
