//! Host-side ICP driver: the 3-wire bit-level protocol.
//!
//! Every command is a 24-bit frame `(param << 6) | cmd`, clocked MSB first.
//! Byte reads and writes follow the frame, each closed by a 9th clock that
//! carries the `end` flag.
//!
//! Timing is the only synchronisation there is. A delay that is too short
//! does not fail loudly, the target just returns or stores garbage.
use crate::config::ConfigFlags;
use crate::constants::icp::*;
use crate::constants::{CFG_FLASH_ADDR, CFG_FLASH_LEN};
use crate::error::{Error, Result};

pub use self::pins::Pins;
pub use self::programmer::{DeviceInfo, Programmer};
pub use self::timing::IcpTimings;

mod pins;
mod programmer;
mod timing;

/// Settle time of each bit of the RST pattern.
const RESET_SEQ_BIT_DELAY: u32 = 10000;
/// Length of the config load after RST rises.
const CONFIG_LOAD_TIME: u32 = 280;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcpState {
    Uninitialized,
    Entered,
    Exited,
}

pub struct Icp<P: Pins> {
    pins: P,
    timings: IcpTimings,
    state: IcpState,
    reset_seq: u32,
}

impl<P: Pins> Icp<P> {
    pub fn new(pins: P, timings: IcpTimings) -> Self {
        Icp {
            pins,
            timings,
            state: IcpState::Uninitialized,
            reset_seq: RESET_SEQ,
        }
    }

    /// Use the RST pattern of older programmer firmware.
    pub fn with_alt_reset_seq(mut self) -> Self {
        self.reset_seq = ALT_RESET_SEQ;
        self
    }

    pub fn state(&self) -> IcpState {
        self.state
    }

    pub fn timings(&self) -> &IcpTimings {
        &self.timings
    }

    pub fn set_timings(&mut self, timings: IcpTimings) {
        self.timings = timings;
    }

    pub fn pins(&self) -> &P {
        &self.pins
    }

    pub fn pins_mut(&mut self) -> &mut P {
        &mut self.pins
    }

    /// Acquire the pins and put the target in programming mode.
    ///
    /// `do_reset` plays the full RST pattern, otherwise a plain reset pulse is used.
    pub fn init(&mut self, do_reset: bool) -> Result<()> {
        self.pins.init().map_err(|e| match e {
            Error::PinInit(_) => e,
            other => Error::PinInit(other.to_string()),
        })?;
        self.entry(do_reset);
        log::debug!("ICP entered (full reset: {})", do_reset);
        Ok(())
    }

    pub fn entry(&mut self, do_reset: bool) {
        if do_reset {
            self.send_reset_seq(self.reset_seq, FRAME_BITS);
        } else {
            self.pins.set_rst(true);
            self.delay(5000);
            self.pins.set_rst(false);
            self.delay(1000);
        }
        self.delay(100);
        self.send_entry_bits();
        self.delay(10);
        self.state = IcpState::Entered;
    }

    /// Enter again without releasing the pins, e.g. to reload CONFIG after an erase.
    pub fn reentry(&mut self, delay1: u32, delay2: u32, delay3: u32) {
        self.delay(10);
        if delay1 > 0 {
            self.pins.set_rst(true);
            self.delay(delay1);
        }
        self.pins.set_rst(false);
        self.delay(delay2);
        self.send_entry_bits();
        self.delay(delay3);
        self.state = IcpState::Entered;
    }

    /// Reentry that places the CONFIG load at a fixed offset from the trigger edge.
    ///
    /// A first RST pulse lines the chip up, then TRIGGER goes high
    /// `after_trigger_high` us before RST rises again, and drops
    /// `before_trigger_low` us (default 280, the config load time) later.
    pub fn reentry_glitch(
        &mut self,
        delay1: u32,
        delay2: u32,
        after_trigger_high: u32,
        before_trigger_low: Option<u32>,
    ) {
        self.delay(200);
        self.pins.set_rst(true);
        self.delay(delay1);
        self.pins.set_rst(false);
        self.delay(delay2);

        self.pins.set_trigger(true);
        self.delay(after_trigger_high);
        self.pins.set_rst(true);

        let before_trigger_low = before_trigger_low
            .filter(|&d| d != 0)
            .unwrap_or(CONFIG_LOAD_TIME);
        if before_trigger_low > delay1 {
            self.delay(delay1);
            self.pins.set_rst(false);
            self.delay(before_trigger_low - delay1);
            self.pins.set_trigger(false);
        } else {
            self.delay(before_trigger_low);
            self.pins.set_trigger(false);
            self.delay(delay1 - before_trigger_low);
            self.pins.set_rst(false);
        }
        self.delay(delay2);
        self.send_entry_bits();
        self.delay(10);
        self.state = IcpState::Entered;
    }

    /// [`Icp::reentry_glitch`] followed by a CONFIG read.
    pub fn reentry_glitch_read(
        &mut self,
        delay1: u32,
        delay2: u32,
        after_trigger_high: u32,
        before_trigger_low: Option<u32>,
    ) -> Result<ConfigFlags> {
        self.reentry_glitch(delay1, delay2, after_trigger_high, before_trigger_low);
        self.read_config()
    }

    /// Leave programming mode, RST ends high.
    pub fn exit(&mut self) {
        self.pins.set_rst(true);
        self.delay(5000);
        self.pins.set_rst(false);
        self.delay(10000);
        self.send_exit_bits();
        self.delay(500);
        self.pins.set_rst(true);
        self.state = IcpState::Exited;
    }

    /// Exit and release the pins. Calling it twice is harmless.
    pub fn deinit(&mut self, leave_reset_high: bool) {
        if self.state == IcpState::Uninitialized {
            return;
        }
        if self.state == IcpState::Entered {
            self.exit();
        }
        self.pins.deinit(leave_reset_high);
        self.state = IcpState::Uninitialized;
        log::debug!("ICP released");
    }

    pub fn read_device_id(&mut self) -> Result<u16> {
        self.read_id_word(0)
    }

    pub fn read_pid(&mut self) -> Result<u16> {
        self.read_id_word(2)
    }

    pub fn read_cid(&mut self) -> Result<u8> {
        self.ensure_entered()?;
        self.send_command(READ_CID, 0);
        Ok(self.read_byte(true))
    }

    pub fn read_uid(&mut self) -> Result<[u8; UID_LEN]> {
        let mut uid = [0u8; UID_LEN];
        self.read_uid_area(0, &mut uid)?;
        Ok(uid)
    }

    pub fn read_ucid(&mut self) -> Result<[u8; UCID_LEN]> {
        let mut ucid = [0u8; UCID_LEN];
        self.read_uid_area(UCID_OFFSET, &mut ucid)?;
        Ok(ucid)
    }

    /// Read `buf.len()` bytes from `address`; returns the address after the last byte.
    pub fn read_flash(&mut self, address: u32, buf: &mut [u8]) -> Result<u32> {
        self.ensure_entered()?;
        if buf.is_empty() {
            return Ok(address);
        }
        self.send_command(READ_FLASH, address);
        let last = buf.len() - 1;
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.read_byte(i == last);
        }
        Ok(address + buf.len() as u32)
    }

    /// Program `data` at `address`, which must already be erased.
    pub fn write_flash(&mut self, address: u32, data: &[u8]) -> Result<u32> {
        self.ensure_entered()?;
        if data.is_empty() {
            return Ok(address);
        }
        self.send_command(WRITE_FLASH, address);
        let (settle, hold) = self.timings.program_time;
        let last = data.len() - 1;
        for (i, &b) in data.iter().enumerate() {
            self.write_byte(b, i == last, settle, hold);
        }
        Ok(address + data.len() as u32)
    }

    /// Erase APROM, LDROM and CONFIG. Also the only way out of a locked chip.
    pub fn mass_erase(&mut self) -> Result<()> {
        self.ensure_entered()?;
        log::debug!("mass erase");
        self.send_command(MASS_ERASE, MASS_ERASE_MAGIC);
        let (settle, hold) = self.timings.mass_erase_time;
        self.write_byte(0xff, true, settle, hold);
        Ok(())
    }

    pub fn page_erase(&mut self, address: u32) -> Result<()> {
        self.ensure_entered()?;
        log::debug!("page erase 0x{:05x}", address);
        self.send_command(PAGE_ERASE, address);
        let (settle, hold) = self.timings.page_erase_time;
        self.write_byte(0xff, true, settle, hold);
        Ok(())
    }

    pub fn read_config(&mut self) -> Result<ConfigFlags> {
        let mut raw = [0u8; CFG_FLASH_LEN];
        self.read_flash(CFG_FLASH_ADDR, &mut raw)?;
        Ok(ConfigFlags::decode(raw))
    }

    fn ensure_entered(&self) -> Result<()> {
        if self.state != IcpState::Entered {
            return Err(Error::NotInitialized);
        }
        Ok(())
    }

    fn read_id_word(&mut self, param: u32) -> Result<u16> {
        self.ensure_entered()?;
        self.send_command(READ_DEVICE_ID, param);
        let lo = self.read_byte(false);
        let hi = self.read_byte(true);
        Ok(u16::from_le_bytes([lo, hi]))
    }

    /// One frame per byte, the UID page does not auto-increment.
    fn read_uid_area(&mut self, offset: u32, buf: &mut [u8]) -> Result<()> {
        self.ensure_entered()?;
        for (i, b) in buf.iter_mut().enumerate() {
            self.send_command(READ_UID, offset + i as u32);
            *b = self.read_byte(true);
        }
        Ok(())
    }

    fn delay(&mut self, us: u32) {
        // skip the call overhead of sleeping 0us
        if us > 0 {
            self.pins.usleep(us);
        }
    }

    fn send_reset_seq(&mut self, seq: u32, len: u32) {
        for i in 0..=len {
            self.pins.set_rst((seq >> (len - i)) & 1 == 1);
            self.delay(RESET_SEQ_BIT_DELAY);
        }
    }

    fn send_entry_bits(&mut self) {
        self.bitsend(ENTRY_BITS, FRAME_BITS, self.timings.entry_bit_delay);
    }

    fn send_exit_bits(&mut self) {
        self.bitsend(EXIT_BITS, FRAME_BITS, self.timings.entry_bit_delay);
    }

    fn send_command(&mut self, cmd: u8, param: u32) {
        log::trace!("icp cmd 0x{:02x} param 0x{:05x}", cmd, param);
        let frame = (param << 6) | u32::from(cmd);
        self.bitsend(frame, FRAME_BITS, self.timings.command_bit_delay);
    }

    fn bitsend(&mut self, data: u32, len: u32, delay: u32) {
        self.pins.dat_dir(true);
        for i in (0..len).rev() {
            self.pins.set_dat((data >> i) & 1 == 1);
            self.delay(delay);
            self.pins.set_clk(true);
            self.delay(delay);
            self.pins.set_clk(false);
        }
    }

    fn read_byte(&mut self, end: bool) -> u8 {
        let delay = self.timings.read_bit_delay;
        self.pins.dat_dir(false);
        self.delay(delay);
        let mut data = 0u8;
        for i in (0..8).rev() {
            self.delay(delay);
            let bit = self.pins.get_dat();
            self.pins.set_clk(true);
            self.delay(delay);
            self.pins.set_clk(false);
            data |= u8::from(bit) << i;
        }

        self.pins.dat_dir(true);
        self.delay(delay);
        self.pins.set_dat(end);
        self.delay(delay);
        self.pins.set_clk(true);
        self.delay(delay);
        self.pins.set_clk(false);
        self.delay(delay);
        self.pins.set_dat(false);
        data
    }

    fn write_byte(&mut self, data: u8, end: bool, settle: u32, hold: u32) {
        self.bitsend(u32::from(data), 8, self.timings.write_bit_delay);
        self.pins.set_dat(end);
        self.delay(settle);
        self.pins.set_clk(true);
        self.delay(hold);
        self.pins.set_dat(false);
        self.pins.set_clk(false);
    }
}

impl<P: Pins> Drop for Icp<P> {
    fn drop(&mut self) {
        self.deinit(true);
    }
}
