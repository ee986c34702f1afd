//! Software model of an N76E003 for exercising both sides of the flashing stack
//! without hardware.
pub use self::chip::SimulatedChip;
pub use self::icp_target::{IcpTarget, TargetTimings};
pub use self::loopback::LoopbackTransport;
pub use self::memory::FlashMemory;

mod chip;
mod icp_target;
mod loopback;
mod memory;
