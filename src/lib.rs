//! Nuvoton N76E003 flashing: UART ISP client, the ISP bootloader itself, and
//! the 3-wire ICP programming engine.

pub mod bootloader;
pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod flashing;
pub mod format;
pub mod icp;
pub mod packet;
pub mod protocol;
pub mod sim;
pub mod transport;

pub use self::config::ConfigFlags;
pub use self::device::Chip;
pub use self::error::{Error, Result};
pub use self::flashing::Flashing;
pub use self::protocol::{Command, Response};
pub use self::transport::Transport;
