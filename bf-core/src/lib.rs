//! bmcfan Core Library
//!
//! Closed-loop fan control for servers whose fans are driven through the
//! baseboard management controller.
//!
//! # Module Structure
//!
//! - `hw/` - BMC access (command execution, sensors, vendor dialects, actuation)
//! - `engine/` - PI controller, stepped quantizer, control targets
//! - `data/` - Configuration and metrics/status export
//!
//! # Example
//!
//! ```no_run
//! use bf_core::{ControllerConfig, PiController, TargetState};
//!
//! let config = ControllerConfig::load(None).unwrap();
//! let pi = PiController::new(&config);
//! let mut state = TargetState::new(config.clamped_initial_duty());
//! let duty = pi.compute(&mut state, 70);
//! ```

// Grouped modules
pub mod data;
pub mod engine;
pub mod hw;

// Standalone modules
pub mod constants;
#[cfg(feature = "testing")]
pub mod testing;

pub use bf_error as error;

// Re-export error types
pub use error::{BmcfanError, Result};

// Re-export primary types from data/
pub use data::{read_status, ControllerConfig, Exporter, StatusSnapshot, TargetStatus};

// Re-export engine types
pub use engine::{quantize, ControlTarget, PiController, Step, TargetState};

// Re-export hardware types
pub use hw::{
    IpmiCommand, IpmiTool, IpmiTransport, PlatformIdentity, SafeExecutor, SensorReader,
    SensorSelector, SensorSnapshot, SysfsDmi, VendorPolicy, VendorSetting,
};
