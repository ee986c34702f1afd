use std::collections::VecDeque;

use crate::bootloader::{Iap, Platform, ProtectedRegister, Region, Uart};
use crate::constants::iap;

use super::memory::FlashMemory;

/// The bootloader's view of an N76E003: IAP engine, UART transmitter and
/// the few protected registers it touches.
///
/// Rule breaks (IAP writes without the matching enable bit, protected writes
/// with interrupts on) are refused and counted in [`SimulatedChip::violations`].
#[derive(Debug, Clone)]
pub struct SimulatedChip {
    pub memory: FlashMemory,
    interrupts: bool,
    iap_enabled: bool,
    aprom_update: bool,
    ldrom_update: bool,
    config_update: bool,
    rctrim: [u8; 2],
    chpcon: Option<u8>,
    wdcon: Option<u8>,
    tx: VecDeque<u8>,
    watchdog_kicks: usize,
    erased_pages: Vec<u16>,
    violations: usize,
    /// Cell that refuses to program, for exercising the verify path.
    bad_cell: Option<usize>,
}

impl SimulatedChip {
    pub fn new(memory: FlashMemory) -> Self {
        SimulatedChip {
            memory,
            interrupts: false,
            iap_enabled: false,
            aprom_update: false,
            ldrom_update: false,
            config_update: false,
            rctrim: [0; 2],
            chpcon: None,
            wdcon: None,
            tx: VecDeque::new(),
            watchdog_kicks: 0,
            erased_pages: Vec::new(),
            violations: 0,
            bad_cell: None,
        }
    }

    pub fn with_bad_cell(mut self, address: usize) -> Self {
        self.bad_cell = Some(address);
        self
    }

    pub fn tx_pending(&self) -> usize {
        self.tx.len()
    }

    /// Pop one full reply packet if one has been transmitted.
    pub fn take_packet(&mut self, len: usize) -> Option<Vec<u8>> {
        (self.tx.len() >= len).then(|| self.tx.drain(..len).collect())
    }

    pub fn rctrim(&self) -> [u8; 2] {
        self.rctrim
    }

    /// True once the bootloader has issued the software reset into APROM.
    pub fn reset_to_aprom(&self) -> bool {
        self.chpcon == Some(0x80)
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.interrupts
    }

    pub fn watchdog_enabled(&self) -> bool {
        self.wdcon.is_some()
    }

    pub fn watchdog_kicks(&self) -> usize {
        self.watchdog_kicks
    }

    pub fn erased_pages(&self) -> &[u16] {
        &self.erased_pages
    }

    pub fn violations(&self) -> usize {
        self.violations
    }

    fn violation(&mut self, what: &str) {
        log::warn!("sim: {}", what);
        self.violations += 1;
    }

    fn update_enabled(&self, region: Region) -> bool {
        self.iap_enabled
            && match region {
                Region::Aprom => self.aprom_update,
                Region::Ldrom => self.ldrom_update,
                Region::Config => self.config_update,
            }
    }

    fn checked_write(&mut self, region: Region) -> bool {
        if !self.update_enabled(region) {
            self.violation("IAP write without update enable");
            return false;
        }
        true
    }
}

impl Default for SimulatedChip {
    fn default() -> Self {
        Self::new(FlashMemory::n76e003())
    }
}

impl Iap for SimulatedChip {
    fn iap(&mut self, cmd: u8, address: u16, data: u8) -> u8 {
        if self.interrupts {
            self.violation("IAPGO with interrupts enabled");
        }
        let address = usize::from(address);
        let aprom_size = self.memory.aprom_size();
        let ldrom_size = self.memory.ldrom_size();
        match cmd {
            iap::BYTE_READ_AP if address < aprom_size => self.memory.read(address),
            iap::BYTE_READ_LD if address < ldrom_size => self.memory.read(aprom_size + address),
            iap::BYTE_READ_CONFIG => self.memory.config.get(address).copied().unwrap_or(0xff),
            iap::READ_UID => self.memory.uid_area.get(address).copied().unwrap_or(0xff),
            iap::READ_CID => self.memory.cid,
            iap::BYTE_READ_ID => self.memory.ids.get(address).copied().unwrap_or(0xff),
            iap::BYTE_PROGRAM_AP if address < aprom_size => {
                if self.checked_write(Region::Aprom) && self.bad_cell != Some(address) {
                    self.memory.program(address, data);
                }
                data
            }
            iap::BYTE_PROGRAM_LD if address < ldrom_size => {
                if self.checked_write(Region::Ldrom) && self.bad_cell != Some(aprom_size + address)
                {
                    self.memory.program(aprom_size + address, data);
                }
                data
            }
            iap::BYTE_PROGRAM_CONFIG => {
                if self.checked_write(Region::Config) {
                    self.memory.program_config(address, data);
                }
                data
            }
            iap::PAGE_ERASE_AP if address < aprom_size => {
                if self.checked_write(Region::Aprom) {
                    self.memory.erase_page(address);
                    self.erased_pages.push(address as u16);
                }
                data
            }
            iap::PAGE_ERASE_LD if address < ldrom_size => {
                if self.checked_write(Region::Ldrom) {
                    self.memory.erase_page(aprom_size + address);
                }
                data
            }
            iap::PAGE_ERASE_CONFIG => {
                if self.checked_write(Region::Config) {
                    self.memory.erase_config();
                }
                data
            }
            _ => {
                // IAPFF: command or address rejected
                self.violation("IAP fail flag");
                0xff
            }
        }
    }

    fn set_iap_enabled(&mut self, enabled: bool) {
        self.iap_enabled = enabled;
    }

    fn set_update_enabled(&mut self, region: Region, enabled: bool) {
        match region {
            Region::Aprom => self.aprom_update = enabled,
            Region::Ldrom => self.ldrom_update = enabled,
            Region::Config => self.config_update = enabled,
        }
    }
}

impl Uart for SimulatedChip {
    fn transmit(&mut self, byte: u8) {
        self.tx.push_back(byte);
    }
}

impl Platform for SimulatedChip {
    fn set_interrupts(&mut self, enabled: bool) {
        self.interrupts = enabled;
    }

    fn write_protected_register(&mut self, register: ProtectedRegister, value: u8) {
        if self.interrupts {
            self.violation("TA write with interrupts enabled");
            return;
        }
        match register {
            ProtectedRegister::RcTrim0 => self.rctrim[0] = value,
            ProtectedRegister::RcTrim1 => self.rctrim[1] = value,
            ProtectedRegister::Chpcon => self.chpcon = Some(value),
            ProtectedRegister::Wdcon => self.wdcon = Some(value),
        }
    }

    fn kick_watchdog(&mut self) {
        self.watchdog_kicks += 1;
    }

    /// The simulated CPU cannot spin; a trap ends the test instead.
    fn trap(&mut self) -> ! {
        panic!("simulated CPU trapped")
    }
}
