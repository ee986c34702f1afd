//! Whole-chip programming over ICP.
use std::fmt;

use crate::config::ConfigFlags;
use crate::constants::icp::{UCID_LEN, UID_LEN};
use crate::constants::{APROM_ADDR, NUVOTON_CID};
use crate::device::Chip;
use crate::error::{Error, Result};

use super::{Icp, IcpTimings, Pins};

/// (delay1, delay2, delay3) for each reentry attempt on a chip that reads back as locked.
const REENTRY_LADDER: [(u32, u32, u32); 3] = [(5000, 1000, 10), (10000, 2000, 100), (20000, 5000, 500)];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_id: u16,
    pub cid: u8,
    pub uid: [u8; UID_LEN],
    pub ucid: [u8; UCID_LEN],
}

impl DeviceInfo {
    /// A locked chip hides its identity and reads back 0xff.
    pub fn looks_locked(&self) -> bool {
        self.cid == 0xff
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Device ID: 0x{:04x}", self.device_id)?;
        writeln!(f, "CID:       0x{:02x}", self.cid)?;
        writeln!(f, "UID:       {}", hex::encode(self.uid))?;
        write!(f, "UCID:      {}", hex::encode(self.ucid))
    }
}

pub struct Programmer<P: Pins> {
    icp: Icp<P>,
    chip: Chip,
    info: DeviceInfo,
    config: ConfigFlags,
    /// CONFIG is blank after a mass erase, no page erase needed before writing it
    erased: bool,
}

impl<P: Pins> Programmer<P> {
    /// Enter ICP and identify the target.
    ///
    /// A locked chip is accepted (it can still be mass erased), anything else
    /// that is not `chip` fails with [`Error::DeviceMismatch`].
    pub fn connect(pins: P, chip: Chip) -> Result<Self> {
        Self::connect_with(pins, chip.clone(), IcpTimings::from(&chip))
    }

    pub fn connect_with(pins: P, chip: Chip, timings: IcpTimings) -> Result<Self> {
        let mut icp = Icp::new(pins, timings);
        icp.init(true)?;
        let mut info = read_info(&mut icp)?;

        for &(d1, d2, d3) in REENTRY_LADDER.iter() {
            if !info.looks_locked() {
                break;
            }
            log::warn!("CID reads 0xff, reentering ({}us/{}us/{}us)", d1, d2, d3);
            icp.reentry(d1, d2, d3);
            info = read_info(&mut icp)?;
        }
        if info.looks_locked() {
            log::warn!("still unreadable, trying a full exit/entry");
            icp.exit();
            icp.entry(true);
            info = read_info(&mut icp)?;
        }

        if !info.looks_locked() && info.device_id != chip.device_id {
            return Err(Error::DeviceMismatch {
                expected: chip.device_id,
                actual: info.device_id,
            });
        }
        if !info.looks_locked() && info.cid != NUVOTON_CID {
            log::warn!("unexpected company id 0x{:02x}", info.cid);
        }

        let config = icp.read_config()?;
        log::info!("Found {} (locked: {})", chip, info.looks_locked() || config.is_locked());
        Ok(Programmer {
            icp,
            chip,
            info,
            config,
            erased: false,
        })
    }

    pub fn chip(&self) -> &Chip {
        &self.chip
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn icp(&mut self) -> &mut Icp<P> {
        &mut self.icp
    }

    pub fn is_locked(&self) -> bool {
        self.info.looks_locked() || self.config.is_locked()
    }

    pub fn read_config(&mut self) -> Result<ConfigFlags> {
        self.config = self.icp.read_config()?;
        Ok(self.config)
    }

    /// Erase (unless already blank) and program CONFIG, then read it back.
    pub fn write_config(&mut self, flags: ConfigFlags) -> Result<()> {
        if !self.erased {
            self.icp.page_erase(self.chip.config_addr)?;
        }
        self.icp.write_flash(self.chip.config_addr, &flags.encode())?;
        self.erased = false;

        let readback = self.read_config()?;
        check_same(self.chip.config_addr, &flags.encode(), &readback.encode())
    }

    /// Wipe the chip. A locked chip only reloads CONFIG on reentry, so reenter after.
    pub fn mass_erase(&mut self) -> Result<()> {
        let was_locked = self.is_locked();
        log::info!("Mass erasing");
        self.icp.mass_erase()?;
        if was_locked {
            let (d1, d2, d3) = REENTRY_LADDER[0];
            self.icp.reentry(d1, d2, d3);
            self.info = read_info(&mut self.icp)?;
            if self.info.device_id != self.chip.device_id {
                return Err(Error::DeviceMismatch {
                    expected: self.chip.device_id,
                    actual: self.info.device_id,
                });
            }
        }
        self.config = self.icp.read_config()?;
        self.erased = true;
        Ok(())
    }

    /// Whole flash, APROM then LDROM.
    pub fn dump_flash(&mut self) -> Result<Vec<u8>> {
        if self.is_locked() {
            return Err(Error::Locked);
        }
        let mut data = vec![0u8; self.chip.flash_size as usize];
        self.icp.read_flash(APROM_ADDR, &mut data)?;
        Ok(data)
    }

    /// Full programming cycle.
    ///
    /// Mass erase, CONFIG (LDROM size and boot select when `ldrom` is given),
    /// LDROM, APROM, verify of the whole flash, and only then the lock bit:
    /// a locked chip can no longer be read back.
    pub fn program(&mut self, aprom: &[u8], ldrom: Option<&[u8]>, lock: bool) -> Result<()> {
        let mut config = ConfigFlags::blank();
        let mut ldrom_size = 0u32;
        if let Some(ldrom) = ldrom {
            let len = ldrom.len() as u32;
            if len == 0 || len > self.chip.ldrom_max_size {
                return Err(Error::InvalidRange {
                    start: 0,
                    end: len,
                });
            }
            let kb = (len - 1) / 1024 + 1;
            ldrom_size = kb * 1024;
            config.set_cbs(false);
            config.set_ldrom_size_kb(kb as u8);
        }
        let aprom_size = self.chip.aprom_size(ldrom_size);
        if aprom.len() as u32 > aprom_size {
            return Err(Error::InvalidRange {
                start: APROM_ADDR,
                end: aprom.len() as u32,
            });
        }

        self.mass_erase()?;
        self.write_config(config)?;

        let mut image = vec![0xffu8; self.chip.flash_size as usize];
        if let Some(ldrom) = ldrom {
            let base = self.chip.ldrom_addr(ldrom_size);
            log::info!("Programming LDROM ({} bytes)", ldrom.len());
            self.icp.write_flash(base, ldrom)?;
            image[base as usize..base as usize + ldrom.len()].copy_from_slice(ldrom);
        }
        log::info!("Programming APROM ({} bytes)", aprom.len());
        self.icp.write_flash(APROM_ADDR, aprom)?;
        image[..aprom.len()].copy_from_slice(aprom);

        let readback = self.dump_flash()?;
        check_same(APROM_ADDR, &image, &readback)?;
        log::info!("Entire flash verified");

        if lock {
            config.set_lock(false);
            // clearing a bit needs no erase
            self.icp
                .write_flash(self.chip.config_addr, &config.encode())?;
            self.read_config()?;
            log::info!("Chip locked");
        }
        Ok(())
    }

    /// Leave programming mode and release the pins.
    pub fn close(mut self, leave_reset_high: bool) {
        self.icp.deinit(leave_reset_high);
    }
}

fn read_info<P: Pins>(icp: &mut Icp<P>) -> Result<DeviceInfo> {
    Ok(DeviceInfo {
        device_id: icp.read_device_id()?,
        cid: icp.read_cid()?,
        uid: icp.read_uid()?,
        ucid: icp.read_ucid()?,
    })
}

fn check_same(base: u32, expected: &[u8], actual: &[u8]) -> Result<()> {
    match expected.iter().zip(actual).position(|(a, b)| a != b) {
        Some(i) => Err(Error::VerifyMismatch {
            address: base + i as u32,
            expected: expected[i],
            actual: actual[i],
        }),
        None => Ok(()),
    }
}
