use crate::error::Result;

/// The 3-wire programming interface (DAT, CLK, RST, plus an optional trigger).
///
/// One implementation per host platform (pigpio, gpiod, an MCU port...).
/// Exactly one [`crate::icp::Icp`] owns a `Pins` at a time.
pub trait Pins {
    /// Acquire the lines. Failure is reported as [`crate::Error::PinInit`].
    fn init(&mut self) -> Result<()>;

    /// Release the lines, optionally keeping RST high so the target stays in reset.
    fn deinit(&mut self, leave_reset_high: bool);

    fn set_dat(&mut self, high: bool);
    fn get_dat(&mut self) -> bool;
    fn set_clk(&mut self, high: bool);
    fn set_rst(&mut self, high: bool);

    /// `true` drives DAT, `false` samples it.
    fn dat_dir(&mut self, output: bool);

    /// Fault-injection instrumentation, a no-op where not wired.
    fn set_trigger(&mut self, _high: bool) {}

    fn usleep(&mut self, us: u32);
}
