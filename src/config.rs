//! The 5-byte CONFIG sector of the N76E003.
//!
//! Fields are packed below byte granularity, so every bit not named here is
//! carried through untouched on re-encode.
use std::fmt;

use bitfield::bitfield;

use crate::constants::CFG_FLASH_LEN;

bitfield! {
    /// CONFIG0..CONFIG4, little endian, in the low 40 bits.
    #[derive(Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ConfigFlags(u64);
    impl Debug;
    /// 1 = unlocked, 0 = locked
    pub lock, set_lock: 1;
    /// P2.0/nRST works as reset pin
    pub rpd, set_rpd: 2;
    /// 1 = OCD disabled, 0 = OCD enabled
    pub ocden, set_ocden: 4;
    pub ocdpwm, set_ocdpwm: 5;
    /// 1 = boot from APROM, 0 = boot from LDROM
    pub cbs, set_cbs: 7;
    pub u8, lds, set_lds: 10, 8;
    pub cborst, set_cborst: 18;
    pub boiap, set_boiap: 19;
    pub u8, cbov, set_cbov: 21, 20;
    pub cboden, set_cboden: 23;
    pub u8, wdten, set_wdten: 39, 36;
}

const STORAGE_MASK: u64 = (1 << (CFG_FLASH_LEN * 8)) - 1;

/// Maximum LDROM size selectable through LDS.
pub const LDROM_MAX_SIZE: u32 = 4 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrownOutVoltage {
    V4_4,
    V3_7,
    V2_7,
    V2_2,
}

impl fmt::Display for BrownOutVoltage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BrownOutVoltage::V4_4 => "4.4V",
            BrownOutVoltage::V3_7 => "3.7V",
            BrownOutVoltage::V2_7 => "2.7V",
            BrownOutVoltage::V2_2 => "2.2V",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogMode {
    Disabled,
    /// Enabled, stops in Idle and Power-down
    StopsInIdle,
    /// Enabled, keeps running in Idle and Power-down
    AlwaysOn,
}

impl ConfigFlags {
    /// An erased CONFIG sector: everything unlocked, boot from APROM, no LDROM.
    pub const fn blank() -> Self {
        ConfigFlags(STORAGE_MASK)
    }

    pub fn decode(bytes: [u8; CFG_FLASH_LEN]) -> Self {
        let mut raw = [0u8; 8];
        raw[..CFG_FLASH_LEN].copy_from_slice(&bytes);
        ConfigFlags(u64::from_le_bytes(raw))
    }

    pub fn encode(&self) -> [u8; CFG_FLASH_LEN] {
        let mut out = [0u8; CFG_FLASH_LEN];
        out.copy_from_slice(&self.0.to_le_bytes()[..CFG_FLASH_LEN]);
        out
    }

    /// Decode from a slice of at least 5 bytes; extra bytes are ignored.
    pub fn from_slice(raw: &[u8]) -> Option<Self> {
        let bytes: [u8; CFG_FLASH_LEN] = raw.get(..CFG_FLASH_LEN)?.try_into().ok()?;
        Some(Self::decode(bytes))
    }

    pub fn is_locked(&self) -> bool {
        !self.lock()
    }

    pub fn boots_from_aprom(&self) -> bool {
        self.cbs()
    }

    /// LDROM size in bytes. Codes 0..=3 all select the 4K maximum.
    pub fn ldrom_size(&self) -> u32 {
        let kb = 7 - u32::from(self.lds() & 0x7);
        (kb * 1024).min(LDROM_MAX_SIZE)
    }

    /// Select an LDROM size in whole KiB, clamped to 0..=4.
    pub fn set_ldrom_size_kb(&mut self, kb: u8) {
        let kb = kb.min((LDROM_MAX_SIZE / 1024) as u8);
        self.set_lds((7 - kb) & 0x7);
    }

    pub fn aprom_size(&self, flash_size: u32) -> u32 {
        flash_size.saturating_sub(self.ldrom_size())
    }

    pub fn brown_out_voltage(&self) -> BrownOutVoltage {
        match self.cbov() & 0x3 {
            0 => BrownOutVoltage::V4_4,
            1 => BrownOutVoltage::V3_7,
            2 => BrownOutVoltage::V2_7,
            _ => BrownOutVoltage::V2_2,
        }
    }

    pub fn watchdog(&self) -> WatchdogMode {
        match self.wdten() {
            0b1111 => WatchdogMode::Disabled,
            0b0101 => WatchdogMode::StopsInIdle,
            _ => WatchdogMode::AlwaysOn,
        }
    }

    /// Multi-line human readable summary, `flash_size` is used to derive the APROM size.
    pub fn describe(&self, flash_size: u32) -> String {
        let mut s = String::new();
        let raw = self.encode();
        s.push_str(&format!("Raw config bytes:   {}\n", hex::encode_upper(raw)));
        s.push_str(&format!(
            "MCU boot select:    {}\n",
            if self.cbs() { "APROM" } else { "LDROM" }
        ));
        s.push_str(&format!("LDROM size:         {} Bytes\n", self.ldrom_size()));
        s.push_str(&format!(
            "APROM size:         {} Bytes\n",
            self.aprom_size(flash_size)
        ));
        s.push_str(&format!(
            "Security lock:      {}\n",
            if self.lock() { "UNLOCKED" } else { "LOCKED" }
        ));
        s.push_str(&format!(
            "P2.0/nRST reset:    {}\n",
            if self.rpd() { "enabled" } else { "disabled" }
        ));
        s.push_str(&format!(
            "On-chip debugger:   {}\n",
            if self.ocden() { "disabled" } else { "enabled" }
        ));
        s.push_str(&format!(
            "OCD halt PWM:       {}\n",
            if self.ocdpwm() {
                "tri-state pins are used as PWM outputs"
            } else {
                "PWM continues"
            }
        ));
        s.push_str(&format!(
            "Brown-out detect:   {}\n",
            if self.cboden() { "enabled" } else { "disabled" }
        ));
        s.push_str(&format!("Brown-out voltage:  {}\n", self.brown_out_voltage()));
        s.push_str(&format!(
            "Brown-out reset:    {}\n",
            if self.cborst() { "enabled" } else { "disabled" }
        ));
        let wdt = match self.watchdog() {
            WatchdogMode::Disabled => "disabled",
            WatchdogMode::StopsInIdle => "enabled, stops in Idle/Power-down",
            WatchdogMode::AlwaysOn => "enabled, keeps running in Idle/Power-down",
        };
        s.push_str(&format!("WDT:                {}\n", wdt));
        s
    }
}

impl Default for ConfigFlags {
    fn default() -> Self {
        Self::blank()
    }
}
