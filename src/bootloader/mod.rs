//! The resident UART ISP bootloader.
//!
//! [`Bootloader`] runs the dispatch state machine in the main loop. The packet
//! mailbox and the timers live in an [`IsrShared`] that the UART and timer
//! interrupts reach on their own; the main loop calls [`Bootloader::poll`]
//! (or simply [`Bootloader::run`] on hardware).
//!
//! ```ignore
//! static SHARED: IsrShared = IsrShared::new();
//!
//! fn uart0_isr() { SHARED.on_uart_rx(read_sbuf()) }
//! fn timer0_isr() { SHARED.on_timer_tick() }
//!
//! fn main() -> ! {
//!     Bootloader::with_shared(Chip::take(), BootloaderConfig::default(), &SHARED).run()
//! }
//! ```
use std::borrow::Borrow;

use scroll::{Pread, LE};

use crate::constants::{commands, flash_mode, iap, EXTENDED_CMDS_FW_VER, PACKET_SIZE};
use crate::constants::{CFG_FLASH_LEN, UPDATE_FIRST_DATA_OFFSET};
use crate::packet::{self, Packet};

pub use self::hal::{Iap, Platform, ProtectedRegister, Region, Uart};
pub use self::mailbox::{Mailbox, State};
pub use self::shared::IsrShared;
pub use self::timer::Countdown;

pub mod hal;
mod mailbox;
mod shared;
mod timer;

const UID_LEN: usize = 12;
const UCID_ADDR: u16 = 0x20;
const UCID_LEN: usize = 0x30;
const HIRC_TRIM_ADDR: u16 = 0x30;
/// Lowering the high trim byte by 7 pulls HIRC down to 16.6MHz for 115200 baud.
const HIRC_TRIM_OFFSET: u8 = 7;

/// Build options of the bootloader image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootloaderConfig {
    pub fw_version: u8,
    pub aprom_size: u16,
    pub ldrom_size: u16,
    pub page_size: u16,
    /// Ticks to wait for CONNECT before booting APROM, about 1s at 200.
    pub connect_timeout: u16,
    /// Ticks of UART silence after which a partial packet is dropped.
    pub idle_timeout: u16,
    /// Require every packet to carry the next sequence number.
    ///
    /// Replies always carry the device counter, bumped once per reply, so a
    /// host must send `reply + 1` next. Stock Nuvoton ISP tools expect the
    /// reply to be the request number + 1 instead and do not interoperate
    /// with this check.
    pub check_sequence: bool,
    pub watchdog: bool,
}

impl Default for BootloaderConfig {
    fn default() -> Self {
        BootloaderConfig {
            fw_version: EXTENDED_CMDS_FW_VER,
            aprom_size: 16 * 1024,
            ldrom_size: 2 * 1024,
            page_size: 128,
            connect_timeout: 200,
            idle_timeout: 90,
            check_sequence: false,
            watchdog: false,
        }
    }
}

impl BootloaderConfig {
    pub fn page_mask(&self) -> u16 {
        !(self.page_size - 1)
    }

    /// End of the flat APROM + LDROM space.
    pub fn flash_end(&self) -> u32 {
        u32::from(self.aprom_size) + u32::from(self.ldrom_size)
    }
}

/// Outcome of one main-loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Idle,
    Handled,
    /// Leave ISP: restore trim and software-reset into APROM.
    BootAprom,
    /// A programmed byte did not read back. Nothing is serviced any more.
    Halted,
}

/// Verify failure recorded when the bootloader halts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    pub address: u16,
    pub expected: u8,
    pub actual: u8,
}

/// The main-loop half of the bootloader.
///
/// `S` is how the interrupt-shared state is held: owned for the simulator,
/// `&'static IsrShared` on hardware, `Arc<IsrShared>` for threaded tests.
pub struct Bootloader<P: Platform, S: Borrow<IsrShared> = IsrShared> {
    platform: P,
    config: BootloaderConfig,
    shared: S,
    tx: Packet,
    seq: u16,
    start_address: u16,
    end_address: u16,
    current_address: u16,
    total_checksum: u16,
    fault: Option<Fault>,
}

impl<P: Platform> Bootloader<P> {
    /// A bootloader that owns its interrupt-shared state.
    pub fn new(platform: P, config: BootloaderConfig) -> Self {
        Self::with_shared(platform, config, IsrShared::new())
    }
}

impl<P: Platform, S: Borrow<IsrShared>> Bootloader<P, S> {
    pub fn with_shared(platform: P, config: BootloaderConfig, shared: S) -> Self {
        Bootloader {
            platform,
            config,
            shared,
            tx: [0; PACKET_SIZE],
            seq: 0,
            start_address: 0,
            end_address: 0,
            current_address: 0,
            total_checksum: 0,
            fault: None,
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn config(&self) -> &BootloaderConfig {
        &self.config
    }

    pub fn shared(&self) -> &IsrShared {
        Borrow::<IsrShared>::borrow(&self.shared)
    }

    pub fn state(&self) -> State {
        self.shared().state()
    }

    pub fn sequence(&self) -> u16 {
        self.seq
    }

    pub fn fault(&self) -> Option<Fault> {
        self.fault
    }

    /// Power-on setup: IAP on, HIRC retrimmed, connection timeout armed.
    pub fn start(&mut self) {
        self.platform.set_interrupts(false);
        self.platform.set_iap_enabled(true);
        let mut trim = self.read_hirc_trim();
        trim[0] = trim[0].wrapping_sub(HIRC_TRIM_OFFSET);
        self.write_hirc_trim(trim);
        if self.config.watchdog {
            self.platform
                .write_protected_register(ProtectedRegister::Wdcon, 0x07);
        }
        let (idle, connect) = (self.config.idle_timeout, self.config.connect_timeout);
        self.shared().with(|s| {
            s.mailbox.set_idle_ticks(idle);
            s.mailbox.set_state(State::Disconnected);
            s.connect_timer.arm(connect);
        });
        self.platform.set_interrupts(true);
        log::info!(
            "ISP bootloader v{:02x} up, APROM {}K LDROM {}K",
            self.config.fw_version,
            self.config.aprom_size / 1024,
            self.config.ldrom_size / 1024
        );
    }

    /// UART receive interrupt, for ports that keep the bootloader reachable from it.
    pub fn on_uart_rx(&self, byte: u8) {
        self.shared().on_uart_rx(byte);
    }

    /// Periodic timer interrupt.
    pub fn on_timer_tick(&self) {
        self.shared().on_timer_tick();
    }

    /// One main-loop iteration.
    pub fn poll(&mut self) -> Step {
        if self.fault.is_some() {
            return Step::Halted;
        }

        let mut step = Step::Idle;
        if let Some(rx) = self.shared().with(|s| s.mailbox.packet()) {
            self.platform.set_interrupts(false);
            step = self.dispatch(&rx);
            self.shared().with(|s| s.mailbox.release());
            if step == Step::Halted {
                // interrupts stay off, as in the trap loop
                return step;
            }
            self.platform.set_interrupts(true);
            if step == Step::BootAprom {
                return step;
            }
        }

        let (expired, _) = self
            .shared()
            .with(|s| (s.connect_timer.expired(), s.mailbox.check_idle()));
        if expired {
            log::info!("no ISP host, booting APROM");
            return Step::BootAprom;
        }
        step
    }

    /// Restore the factory trim and software-reset into APROM.
    /// Everything after this is up to the reset hardware.
    pub fn boot_aprom(&mut self) {
        self.platform.set_interrupts(false);
        let trim = self.read_hirc_trim();
        self.write_hirc_trim(trim);
        self.platform.set_iap_enabled(false);
        self.platform
            .write_protected_register(ProtectedRegister::Chpcon, 0x80);
    }

    /// Main loop on real hardware. The interrupt handlers keep feeding the
    /// [`IsrShared`] this bootloader was built over.
    pub fn run(mut self) -> ! {
        self.start();
        loop {
            match self.poll() {
                Step::BootAprom => {
                    self.boot_aprom();
                    self.platform.trap();
                }
                Step::Halted => self.platform.trap(),
                Step::Idle | Step::Handled => (),
            }
        }
    }

    fn dispatch(&mut self, rx: &Packet) -> Step {
        let cmd = rx[0];
        self.tx = [0; PACKET_SIZE];
        log::debug!("=> {}", hex::encode(rx));

        if self.config.check_sequence
            && cmd != commands::CONNECT
            && cmd != commands::SYNC_SEQ
            && packet::sequence(rx) != self.seq.wrapping_add(1)
        {
            log::warn!(
                "sequence mismatch: got {}, expected {}",
                packet::sequence(rx),
                self.seq.wrapping_add(1)
            );
            self.reply(rx);
            self.set_state(State::Command);
            return Step::Handled;
        }

        if cmd != commands::CONTINUATION {
            // anything but a continuation ends a running update or dump
            self.set_state(State::Command);
        } else {
            match self.state() {
                State::Dumping => {
                    self.dump(rx);
                    return Step::Handled;
                }
                State::Updating => return self.update(rx, packet::payload(rx).len()),
                _ => (),
            }
        }

        match cmd {
            commands::CONNECT => {
                self.seq = 0;
                self.connected(rx);
            }
            commands::SYNC_SEQ => {
                let host_seq = packet::sequence(rx);
                let echoed = rx[..].pread_with::<u16>(8, LE).unwrap_or_default();
                self.seq = if self.config.check_sequence && host_seq != echoed {
                    // wraps to 0 on the reply
                    0xffff
                } else {
                    host_seq
                };
                self.connected(rx);
            }
            commands::GET_FW_VERSION => {
                self.tx[8] = self.config.fw_version;
                self.reply(rx);
            }
            commands::RUN_LDROM => self.reply(rx),
            commands::RUN_APROM | commands::RESET => return Step::BootAprom,
            commands::GET_DEVICE_ID => {
                let mut did = [0u8; 4];
                self.iap_read(iap::BYTE_READ_ID, 0, &mut did);
                self.tx[8..10].copy_from_slice(&did[..2]);
                self.reply(rx);
            }
            commands::GET_UID => {
                let mut uid = [0u8; UID_LEN];
                self.iap_read(iap::READ_UID, 0, &mut uid);
                self.tx[8..8 + UID_LEN].copy_from_slice(&uid);
                self.reply(rx);
            }
            commands::GET_CID => {
                let mut cid = [0u8; 1];
                self.iap_read(iap::READ_CID, 0, &mut cid);
                self.tx[8] = cid[0];
                self.reply(rx);
            }
            commands::GET_UCID => {
                let mut ucid = [0u8; UCID_LEN];
                self.iap_read(iap::READ_UID, UCID_ADDR, &mut ucid);
                self.tx[8..8 + UCID_LEN].copy_from_slice(&ucid);
                self.reply(rx);
            }
            commands::GET_FLASH_MODE => {
                let conf = self.read_config();
                self.tx[8] = if conf[0] & 0x80 != 0 {
                    flash_mode::APROM
                } else {
                    flash_mode::LDROM
                };
                self.reply(rx);
            }
            commands::ERASE_ALL => {
                self.erase_aprom(0, u32::from(self.config.aprom_size));
                self.reply(rx);
            }
            commands::READ_CONFIG => self.reply_config(rx),
            commands::UPDATE_CONFIG => {
                self.write_config(&rx[8..8 + CFG_FLASH_LEN]);
                self.reply_config(rx);
            }
            commands::READ_ROM => {
                if !self.set_addresses(rx, self.config.flash_end()) {
                    self.fail(rx);
                } else {
                    self.start_dump(rx);
                }
            }
            commands::DUMP_ROM => {
                self.start_address = 0;
                self.current_address = 0;
                self.end_address = self.config.flash_end() as u16;
                self.start_dump(rx);
            }
            commands::UPDATE_APROM => {
                // never let an update run into the LDROM
                if !self.set_addresses(rx, u32::from(self.config.aprom_size)) {
                    self.fail(rx);
                } else {
                    let page = self.start_address & self.config.page_mask();
                    self.erase_aprom(u32::from(page), u32::from(self.end_address));
                    self.total_checksum = 0;
                    self.set_state(State::Updating);
                    return self.update(rx, PACKET_SIZE - UPDATE_FIRST_DATA_OFFSET);
                }
            }
            commands::PAGE_ERASE => {
                let start = rx[..].pread_with::<u16>(8, LE).unwrap_or_default();
                if start >= self.config.aprom_size {
                    self.fail(rx);
                } else {
                    let page = u32::from(start & self.config.page_mask());
                    self.erase_aprom(page, page + u32::from(self.config.page_size));
                    self.reply(rx);
                }
            }
            _ => {
                log::debug!("unsupported command 0x{:02x}", cmd);
                self.fail(rx);
            }
        }
        Step::Handled
    }

    /// Reply shared by CONNECT and SYNC_SEQ: the host is here, stop the boot countdown.
    fn connected(&mut self, rx: &Packet) {
        self.reply(rx);
        self.shared().with(|s| s.connect_timer.disarm());
    }

    fn set_state(&self, state: State) {
        self.shared().with(|s| s.mailbox.set_state(state));
    }

    /// Reads start/length from the payload; false if the range is empty or ends past `limit`.
    fn set_addresses(&mut self, rx: &Packet, limit: u32) -> bool {
        let start = rx[..].pread_with::<u16>(8, LE).unwrap_or_default();
        let len = rx[..].pread_with::<u16>(12, LE).unwrap_or_default();
        let end = u32::from(start) + u32::from(len);
        if len == 0 || end > limit {
            log::warn!("rejecting range 0x{:04x}..0x{:05x}", start, end);
            return false;
        }
        self.start_address = start;
        self.current_address = start;
        self.end_address = end as u16;
        true
    }

    fn start_dump(&mut self, rx: &Packet) {
        self.total_checksum = 0;
        self.set_state(State::Dumping);
        self.dump(rx);
    }

    /// Fill the payload from `current_address`, crossing into LDROM past the APROM end.
    fn dump(&mut self, rx: &Packet) {
        for i in 8..PACKET_SIZE {
            let (cmd, address) = if self.current_address >= self.config.aprom_size {
                (
                    iap::BYTE_READ_LD,
                    self.current_address - self.config.aprom_size,
                )
            } else {
                (iap::BYTE_READ_AP, self.current_address)
            };
            self.tx[i] = self.iap_go(cmd, address, 0);
            self.current_address = self.current_address.wrapping_add(1);
            if self.current_address == self.end_address {
                self.set_state(State::Command);
                break;
            }
        }
        self.reply(rx);
    }

    /// Program the tail of `rx` (the last `len` bytes), reading every byte back.
    fn update(&mut self, rx: &Packet, len: usize) -> Step {
        self.platform.set_update_enabled(Region::Aprom, true);
        for &byte in &rx[PACKET_SIZE - len..] {
            let address = self.current_address;
            self.iap_go(iap::BYTE_PROGRAM_AP, address, byte);
            let actual = self.iap_go(iap::BYTE_READ_AP, address, 0);
            if actual != byte {
                log::error!(
                    "verify failed at 0x{:04x}: wrote 0x{:02x}, read 0x{:02x}",
                    address,
                    byte,
                    actual
                );
                self.fault = Some(Fault {
                    address,
                    expected: byte,
                    actual,
                });
                return Step::Halted;
            }
            self.total_checksum = self.total_checksum.wrapping_add(u16::from(byte));
            self.current_address = self.current_address.wrapping_add(1);
            if self.current_address == self.end_address {
                self.set_state(State::Command);
                break;
            }
        }
        self.platform.set_update_enabled(Region::Aprom, false);
        self.stamp(rx);
        self.tx[8..10].copy_from_slice(&self.total_checksum.to_le_bytes());
        self.send();
        Step::Handled
    }

    fn erase_aprom(&mut self, start: u32, end: u32) {
        self.platform.set_update_enabled(Region::Aprom, true);
        let step = usize::from(self.config.page_size);
        for page in (start..end).step_by(step) {
            log::debug!("erase page 0x{:04x}", page);
            self.iap_go(iap::PAGE_ERASE_AP, page as u16, 0xff);
        }
        self.platform.set_update_enabled(Region::Aprom, false);
    }

    fn read_config(&mut self) -> [u8; CFG_FLASH_LEN] {
        let mut conf = [0u8; CFG_FLASH_LEN];
        self.iap_read(iap::BYTE_READ_CONFIG, 0, &mut conf);
        conf
    }

    /// CONFIG can only be rewritten by erasing the whole sector first.
    fn write_config(&mut self, data: &[u8]) {
        self.platform.set_update_enabled(Region::Config, true);
        self.iap_go(iap::PAGE_ERASE_CONFIG, 0, 0xff);
        for (i, &byte) in data.iter().enumerate() {
            self.iap_go(iap::BYTE_PROGRAM_CONFIG, i as u16, byte);
        }
        self.platform.set_update_enabled(Region::Config, false);
    }

    fn reply_config(&mut self, rx: &Packet) {
        let conf = self.read_config();
        self.tx[8..8 + CFG_FLASH_LEN].copy_from_slice(&conf);
        self.tx[8 + CFG_FLASH_LEN..16].fill(0xff);
        self.reply(rx);
    }

    fn read_hirc_trim(&mut self) -> [u8; 2] {
        let mut trim = [0u8; 2];
        self.iap_read(iap::READ_UID, HIRC_TRIM_ADDR, &mut trim);
        trim
    }

    fn write_hirc_trim(&mut self, trim: [u8; 2]) {
        self.platform
            .write_protected_register(ProtectedRegister::RcTrim0, trim[0]);
        self.platform
            .write_protected_register(ProtectedRegister::RcTrim1, trim[1]);
    }

    fn iap_go(&mut self, cmd: u8, address: u16, data: u8) -> u8 {
        let value = self.platform.iap(cmd, address, data);
        if self.config.watchdog {
            self.platform.kick_watchdog();
        }
        value
    }

    fn iap_read(&mut self, cmd: u8, start: u16, buf: &mut [u8]) {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.iap_go(cmd, start + i as u16, 0);
        }
    }

    /// Checksum of `rx` and the next sequence number into the reply header.
    fn stamp(&mut self, rx: &Packet) {
        self.seq = self.seq.wrapping_add(1);
        packet::stamp(&mut self.tx, packet::checksum(rx), self.seq);
    }

    fn reply(&mut self, rx: &Packet) {
        self.stamp(rx);
        self.send();
    }

    /// NACK: a normal reply with the checksum bytes inverted.
    fn fail(&mut self, rx: &Packet) {
        self.stamp(rx);
        packet::invert_checksum(&mut self.tx);
        self.send();
    }

    fn send(&mut self) {
        log::debug!("<= {}", hex::encode(self.tx));
        for i in 0..PACKET_SIZE {
            self.platform.transmit(self.tx[i]);
            if self.config.watchdog {
                self.platform.kick_watchdog();
            }
        }
    }
}
