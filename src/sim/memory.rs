use crate::config::ConfigFlags;
use crate::constants::{CFG_FLASH_LEN, N76E003_DEVID, NUVOTON_CID};

/// Size of the UID page: UID at 0x00, UCID at 0x20, HIRC trim at 0x30.
pub const UID_AREA_LEN: usize = 0x40;

/// Non-volatile contents of one simulated N76E003.
///
/// The flash is a single array, LDROM is the top `ldrom_size()` bytes of it.
/// Programming can only clear bits, erasing sets a page back to 0xff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashMemory {
    pub flash: Vec<u8>,
    pub config: [u8; CFG_FLASH_LEN],
    pub uid_area: [u8; UID_AREA_LEN],
    /// DID low, DID high, PID low, PID high
    pub ids: [u8; 4],
    pub cid: u8,
    page_size: usize,
}

impl FlashMemory {
    pub fn new(flash_size: usize, page_size: usize, device_id: u16) -> Self {
        let mut uid_area = [0u8; UID_AREA_LEN];
        for (i, b) in uid_area.iter_mut().enumerate() {
            *b = 0x10u8.wrapping_add(i as u8 * 3);
        }
        // HIRC trim
        uid_area[0x30] = 0x8c;
        uid_area[0x31] = 0x01;
        let did = device_id.to_le_bytes();
        let mut config = ConfigFlags::blank();
        // the ISP bootloader ships in a 2K LDROM and is booted first
        config.set_ldrom_size_kb(2);
        config.set_cbs(false);
        FlashMemory {
            flash: vec![0xff; flash_size],
            config: config.encode(),
            uid_area,
            ids: [did[0], did[1], 0x04, 0x00],
            cid: NUVOTON_CID,
            page_size,
        }
    }

    pub fn n76e003() -> Self {
        Self::new(18 * 1024, 128, N76E003_DEVID)
    }

    pub fn config_flags(&self) -> ConfigFlags {
        ConfigFlags::decode(self.config)
    }

    pub fn ldrom_size(&self) -> usize {
        self.config_flags().ldrom_size() as usize
    }

    pub fn aprom_size(&self) -> usize {
        self.flash.len() - self.ldrom_size()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn aprom(&self) -> &[u8] {
        &self.flash[..self.aprom_size()]
    }

    pub fn ldrom(&self) -> &[u8] {
        &self.flash[self.aprom_size()..]
    }

    /// Load an image directly, bypassing the programming rules.
    pub fn load(&mut self, address: usize, data: &[u8]) {
        self.flash[address..address + data.len()].copy_from_slice(data);
    }

    pub fn read(&self, address: usize) -> u8 {
        self.flash.get(address).copied().unwrap_or(0xff)
    }

    pub fn program(&mut self, address: usize, value: u8) {
        if let Some(b) = self.flash.get_mut(address) {
            *b &= value;
        }
    }

    pub fn erase_page(&mut self, address: usize) {
        let start = address & !(self.page_size - 1);
        let end = (start + self.page_size).min(self.flash.len());
        if start < end {
            self.flash[start..end].fill(0xff);
        }
    }

    pub fn program_config(&mut self, index: usize, value: u8) {
        if let Some(b) = self.config.get_mut(index) {
            *b &= value;
        }
    }

    pub fn erase_config(&mut self) {
        self.config = [0xff; CFG_FLASH_LEN];
    }

    /// Flash and CONFIG back to 0xff, identity untouched.
    pub fn erase_all(&mut self) {
        self.flash.fill(0xff);
        self.erase_config();
    }
}

impl Default for FlashMemory {
    fn default() -> Self {
        Self::n76e003()
    }
}
