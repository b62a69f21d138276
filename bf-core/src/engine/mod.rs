//! Control engine
//!
//! PI duty computation, stepped quantization and per-target state.

mod pi;
mod quantizer;
mod target;

pub use pi::PiController;
pub use quantizer::{quantize, Step};
pub use target::{chassis_target, stepped_targets, ControlTarget, TargetState};
