use crate::constants::icp::*;
use crate::constants::CFG_FLASH_ADDR;
use crate::error::{Error, Result};
use crate::icp::Pins;

use super::memory::FlashMemory;

/// Minimum settle times (us) the simulated silicon needs before the closing clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetTimings {
    pub program: u64,
    pub page_erase: u64,
    pub mass_erase: u64,
}

impl Default for TargetTimings {
    fn default() -> Self {
        TargetTimings {
            program: 20,
            page_erase: 6000,
            mass_erase: 65000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Held in reset by RST high.
    Reset,
    /// Running, watching DAT/CLK for the entry pattern.
    Idle,
    /// Programming mode, shifting in a 24-bit frame.
    Command,
    /// Shifting out byte `address`, `bit` clocks done.
    Read { cmd: u8, address: u32, bit: u8 },
    /// Byte done, next clock samples the end flag.
    ReadEnd { cmd: u8, address: u32 },
    Write { cmd: u8, address: u32, bit: u8, value: u8 },
    /// 8 bits in at `since`, next clock samples end and commits.
    WriteEnd { cmd: u8, address: u32, value: u8, since: u64 },
    Exited,
}

/// Pin-level model of the ICP slave of an N76E003.
///
/// DAT is sampled on CLK rising edges. Time only passes through `usleep`,
/// which lets the model refuse writes whose settle time was too short,
/// the way real silicon silently keeps the old contents.
#[derive(Debug, Clone)]
pub struct IcpTarget {
    pub memory: FlashMemory,
    pub timings: TargetTimings,
    phase: Phase,
    dat_host: bool,
    dat_output: bool,
    clk: bool,
    rst: bool,
    trigger: bool,
    shift: u32,
    bits: u32,
    /// Lock bit as loaded when RST was released.
    locked: bool,
    /// Exit pattern seen since the last entry.
    exited: bool,
    now: u64,
    initialized: bool,
    fail_init: bool,
    missed_writes: usize,
    trigger_edges: usize,
}

impl IcpTarget {
    pub fn new(memory: FlashMemory) -> Self {
        IcpTarget {
            memory,
            timings: TargetTimings::default(),
            phase: Phase::Reset,
            dat_host: false,
            dat_output: true,
            clk: false,
            rst: true,
            trigger: false,
            shift: 0,
            bits: 0,
            locked: false,
            exited: false,
            now: 0,
            initialized: false,
            fail_init: false,
            missed_writes: 0,
            trigger_edges: 0,
        }
    }

    /// Pins whose `init` fails, like a GPIO backend without permissions.
    pub fn failing() -> Self {
        let mut target = Self::default();
        target.fail_init = true;
        target
    }

    pub fn in_programming_mode(&self) -> bool {
        !matches!(self.phase, Phase::Reset | Phase::Idle | Phase::Exited)
    }

    /// True once the exit pattern was clocked in, until the next entry.
    pub fn has_exited(&self) -> bool {
        self.exited
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn reset_high(&self) -> bool {
        self.rst
    }

    /// Virtual microseconds elapsed.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Bytes the host clocked in too fast to be stored.
    pub fn missed_writes(&self) -> usize {
        self.missed_writes
    }

    pub fn trigger_edges(&self) -> usize {
        self.trigger_edges
    }

    /// Value the target drives on DAT in a read phase.
    fn output_bit(&self) -> bool {
        match self.phase {
            Phase::Read { cmd, address, bit } => (self.read_value(cmd, address) >> (7 - bit)) & 1 == 1,
            _ => false,
        }
    }

    fn read_value(&self, cmd: u8, address: u32) -> u8 {
        let cfg_end = CFG_FLASH_ADDR + self.memory.config.len() as u32;
        match cmd {
            READ_FLASH if (CFG_FLASH_ADDR..cfg_end).contains(&address) => {
                self.memory.config[(address - CFG_FLASH_ADDR) as usize]
            }
            _ if self.locked => 0xff,
            READ_FLASH => self.memory.read(address as usize),
            READ_DEVICE_ID => self.memory.ids.get(address as usize).copied().unwrap_or(0xff),
            READ_CID => self.memory.cid,
            READ_UID => self
                .memory
                .uid_area
                .get(address as usize)
                .copied()
                .unwrap_or(0xff),
            _ => 0xff,
        }
    }

    fn on_rising_edge(&mut self) {
        let dat = self.dat_host;
        match self.phase {
            Phase::Reset | Phase::Exited => (),
            Phase::Idle => {
                self.shift = ((self.shift << 1) | u32::from(dat)) & 0xff_ffff;
                if self.shift == ENTRY_BITS {
                    log::trace!("sim: ICP entry");
                    self.exited = false;
                    self.enter_command();
                } else if self.shift == EXIT_BITS {
                    self.leave();
                }
            }
            Phase::Command => {
                self.shift = (self.shift << 1) | u32::from(dat);
                self.bits += 1;
                if self.bits == FRAME_BITS {
                    let frame = self.shift & 0xff_ffff;
                    self.decode(frame);
                }
            }
            Phase::Read { cmd, address, bit } => {
                self.phase = if bit == 7 {
                    Phase::ReadEnd { cmd, address }
                } else {
                    Phase::Read {
                        cmd,
                        address,
                        bit: bit + 1,
                    }
                };
            }
            Phase::ReadEnd { cmd, address } => {
                if dat {
                    self.enter_command();
                } else {
                    self.phase = Phase::Read {
                        cmd,
                        address: address + 1,
                        bit: 0,
                    };
                }
            }
            Phase::Write {
                cmd,
                address,
                bit,
                value,
            } => {
                let value = (value << 1) | u8::from(dat);
                self.phase = Phase::Write {
                    cmd,
                    address,
                    bit: bit + 1,
                    value,
                };
            }
            Phase::WriteEnd {
                cmd,
                address,
                value,
                since,
            } => {
                self.commit(cmd, address, value, self.now - since);
                if dat {
                    self.enter_command();
                } else {
                    self.phase = Phase::Write {
                        cmd,
                        address: address + 1,
                        bit: 0,
                        value: 0,
                    };
                }
            }
        }
    }

    fn on_falling_edge(&mut self) {
        if let Phase::Write {
            cmd,
            address,
            bit: 8,
            value,
        } = self.phase
        {
            self.phase = Phase::WriteEnd {
                cmd,
                address,
                value,
                since: self.now,
            };
        }
    }

    fn enter_command(&mut self) {
        self.phase = Phase::Command;
        self.shift = 0;
        self.bits = 0;
    }

    fn leave(&mut self) {
        log::trace!("sim: ICP exit");
        self.phase = Phase::Exited;
        self.exited = true;
    }

    fn decode(&mut self, frame: u32) {
        if frame == EXIT_BITS {
            self.leave();
            return;
        }
        let cmd = (frame & 0x3f) as u8;
        let address = frame >> 6;
        self.phase = match cmd {
            READ_FLASH | READ_DEVICE_ID | READ_CID | READ_UID => Phase::Read {
                cmd,
                address,
                bit: 0,
            },
            WRITE_FLASH | MASS_ERASE | PAGE_ERASE => Phase::Write {
                cmd,
                address,
                bit: 0,
                value: 0,
            },
            _ => {
                log::warn!("sim: unknown ICP command 0x{:02x}", cmd);
                self.shift = 0;
                self.bits = 0;
                Phase::Command
            }
        };
    }

    fn commit(&mut self, cmd: u8, address: u32, value: u8, elapsed: u64) {
        let needed = match cmd {
            WRITE_FLASH => self.timings.program,
            PAGE_ERASE => self.timings.page_erase,
            _ => self.timings.mass_erase,
        };
        if elapsed < needed {
            log::warn!(
                "sim: cmd 0x{:02x} at 0x{:05x} got {}us, needs {}us",
                cmd,
                address,
                elapsed,
                needed
            );
            self.missed_writes += 1;
            return;
        }
        match cmd {
            MASS_ERASE if address == MASS_ERASE_MAGIC => self.memory.erase_all(),
            MASS_ERASE => log::warn!("sim: bad mass erase magic 0x{:05x}", address),
            // locked silicon only accepts a mass erase
            _ if self.locked => (),
            PAGE_ERASE if address >= CFG_FLASH_ADDR => self.memory.erase_config(),
            PAGE_ERASE => self.memory.erase_page(address as usize),
            _ if address >= CFG_FLASH_ADDR => self
                .memory
                .program_config((address - CFG_FLASH_ADDR) as usize, value),
            _ => self.memory.program(address as usize, value),
        }
    }
}

impl Default for IcpTarget {
    fn default() -> Self {
        Self::new(FlashMemory::n76e003())
    }
}

impl Pins for IcpTarget {
    fn init(&mut self) -> Result<()> {
        if self.fail_init {
            return Err(Error::PinInit("gpio chip not accessible".into()));
        }
        self.initialized = true;
        Ok(())
    }

    fn deinit(&mut self, leave_reset_high: bool) {
        self.set_rst(leave_reset_high);
        self.initialized = false;
    }

    fn set_dat(&mut self, high: bool) {
        self.dat_host = high;
    }

    fn get_dat(&mut self) -> bool {
        if self.dat_output {
            self.dat_host
        } else {
            self.output_bit()
        }
    }

    fn set_clk(&mut self, high: bool) {
        if self.rst {
            self.clk = high;
            return;
        }
        match (self.clk, high) {
            (false, true) => self.on_rising_edge(),
            (true, false) => self.on_falling_edge(),
            _ => (),
        }
        self.clk = high;
    }

    fn set_rst(&mut self, high: bool) {
        if high && !self.rst {
            self.phase = Phase::Reset;
        } else if !high && self.rst {
            // CONFIG is loaded as the chip leaves reset
            self.locked = self.memory.config_flags().is_locked();
            self.phase = Phase::Idle;
            self.shift = 0;
        }
        self.rst = high;
    }

    fn dat_dir(&mut self, output: bool) {
        self.dat_output = output;
    }

    fn set_trigger(&mut self, high: bool) {
        if high != self.trigger {
            self.trigger_edges += 1;
        }
        self.trigger = high;
    }

    fn usleep(&mut self, us: u32) {
        self.now += u64::from(us);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icp::{Icp, IcpTimings};

    #[test]
    fn entry_then_device_id() {
        let mut icp = Icp::new(IcpTarget::default(), IcpTimings::default());
        icp.init(true).unwrap();
        assert!(icp.pins().in_programming_mode());
        assert_eq!(icp.read_device_id().unwrap(), 0x3650);
        assert_eq!(icp.read_cid().unwrap(), 0xda);
    }

    #[test]
    fn exit_pattern_leaves_programming_mode() {
        let mut icp = Icp::new(IcpTarget::default(), IcpTimings::default());
        icp.init(false).unwrap();
        assert!(!icp.pins().has_exited());
        icp.exit();
        assert!(icp.pins().has_exited());
        assert!(icp.pins().reset_high());
        assert!(!icp.pins().in_programming_mode());
    }

    fn clock_in(target: &mut IcpTarget, bits: u32) {
        target.dat_dir(true);
        for i in (0..FRAME_BITS).rev() {
            target.set_dat((bits >> i) & 1 == 1);
            target.set_clk(true);
            target.set_clk(false);
        }
    }

    #[test]
    fn exit_bits_are_seen_while_reset_is_low() {
        let mut target = IcpTarget::default();
        target.init().unwrap();
        target.set_rst(false);
        clock_in(&mut target, EXIT_BITS);
        assert!(target.has_exited());
        assert!(!target.reset_high());

        // a following entry is ignored until the next reset pulse
        clock_in(&mut target, ENTRY_BITS);
        assert!(!target.in_programming_mode());
        target.set_rst(true);
        target.set_rst(false);
        clock_in(&mut target, ENTRY_BITS);
        assert!(target.in_programming_mode());
        assert!(!target.has_exited());
    }

    #[test]
    fn near_miss_exit_bits_are_ignored() {
        let mut target = IcpTarget::default();
        target.init().unwrap();
        target.set_rst(false);
        clock_in(&mut target, EXIT_BITS ^ 1);
        assert!(!target.has_exited());
    }

    #[test]
    fn short_program_time_is_not_stored() {
        let timings = IcpTimings {
            program_time: (5, 5),
            ..IcpTimings::default()
        };
        let mut icp = Icp::new(IcpTarget::default(), timings);
        icp.init(true).unwrap();
        icp.write_flash(0x10, &[0x12, 0x34]).unwrap();
        assert_eq!(icp.pins().missed_writes(), 2);
        let mut buf = [0u8; 2];
        icp.read_flash(0x10, &mut buf).unwrap();
        assert_eq!(buf, [0xff, 0xff]);
    }
}
