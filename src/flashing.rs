//! Chip flashing logic over the UART ISP bootloader.

use scroll::{Pread, LE};

use crate::config::ConfigFlags;
use crate::constants::{
    flash_mode, CONTINUATION_DATA_SIZE, EXTENDED_CMDS_FW_VER, N76E003_DEVID,
    UPDATE_FIRST_DATA_SIZE,
};
use crate::device::{Chip, ChipDB};
use crate::error::{Error, Result};
use crate::protocol::{Command, Response};
use crate::transport::{SerialTransport, Transport};

/// CONNECT is retried while the target is still coming out of reset.
const CONNECT_RETRIES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashMode {
    Aprom,
    Ldrom,
}

pub struct Flashing<T: Transport> {
    transport: T,
    chip: Chip,
    /// Last sequence number seen from the device
    seq: u16,
    fw_version: u8,
    device_id: u16,
    config: ConfigFlags,
}

impl Flashing<SerialTransport> {
    pub fn new_from_serial(port: Option<&str>) -> Result<Self> {
        let mut transport = match port {
            Some(port) => SerialTransport::open(port)?,
            None => SerialTransport::open_any()?,
        };
        transport.clear_input()?;
        Self::new(transport)
    }
}

impl<T: Transport> Flashing<T> {
    /// CONNECT, SYNC_SEQ, then identify the chip and read its CONFIG.
    pub fn new(mut transport: T) -> Result<Self> {
        let seq = connect(&mut transport)?;
        let mut f = Flashing {
            transport,
            chip: Chip::n76e003().map_err(|e| Error::ChipDb(e.to_string()))?,
            seq,
            fw_version: 0,
            device_id: 0,
            config: ConfigFlags::blank(),
        };
        f.sync_seq()?;

        let resp = f.command(Command::GetFwVersion)?;
        f.fw_version = resp[0];
        log::debug!("bootloader firmware: 0x{:02x}", f.fw_version);

        let resp = f.command(Command::GetDeviceId)?;
        f.device_id = resp[..].pread_with::<u16>(0, LE).unwrap_or_default();
        f.chip = ChipDB::find_chip(f.device_id).map_err(|_| Error::DeviceMismatch {
            expected: N76E003_DEVID,
            actual: f.device_id,
        })?;
        log::debug!("found chip: {}", f.chip);

        f.config = f.read_config()?;
        Ok(f)
    }

    pub fn chip(&self) -> &Chip {
        &self.chip
    }

    pub fn fw_version(&self) -> u8 {
        self.fw_version
    }

    pub fn device_id(&self) -> u16 {
        self.device_id
    }

    pub fn config(&self) -> ConfigFlags {
        self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn supports_extended(&self) -> bool {
        self.fw_version >= EXTENDED_CMDS_FW_VER
    }

    /// APROM size as selected by the LDS bits.
    pub fn aprom_size(&self) -> u32 {
        self.config.aprom_size(self.chip.flash_size)
    }

    pub fn dump_info(&mut self) -> Result<()> {
        log::info!(
            "Chip: {} (Flash: {}KiB, APROM: {}KiB, LDROM: {}KiB)",
            self.chip,
            self.chip.flash_size / 1024,
            self.aprom_size() / 1024,
            self.config.ldrom_size() / 1024
        );
        log::info!("Bootloader firmware: 0x{:02x}", self.fw_version);
        if self.supports_extended() {
            log::info!("CID: 0x{:02x}", self.read_cid()?);
            log::info!("UID: {}", hex::encode(self.read_uid()?));
            log::info!("UCID: {}", hex::encode(self.read_ucid()?));
        }
        let mode = match self.flash_mode()? {
            FlashMode::Aprom => "APROM",
            FlashMode::Ldrom => "LDROM",
        };
        log::info!("Boot select: {}", mode);
        Ok(())
    }

    pub fn read_uid(&mut self) -> Result<Vec<u8>> {
        self.ensure_extended()?;
        Ok(self.command(Command::GetUid)?[..12].to_vec())
    }

    pub fn read_cid(&mut self) -> Result<u8> {
        self.ensure_extended()?;
        Ok(self.command(Command::GetCid)?[0])
    }

    pub fn read_ucid(&mut self) -> Result<Vec<u8>> {
        self.ensure_extended()?;
        Ok(self.command(Command::GetUcid)?[..48].to_vec())
    }

    pub fn flash_mode(&mut self) -> Result<FlashMode> {
        match self.command(Command::GetFlashMode)?[0] {
            flash_mode::APROM => Ok(FlashMode::Aprom),
            flash_mode::LDROM => Ok(FlashMode::Ldrom),
            other => Err(Error::Framing(format!("unknown flash mode {}", other))),
        }
    }

    pub fn read_config(&mut self) -> Result<ConfigFlags> {
        let resp = self.command(Command::ReadConfig)?;
        let config = ConfigFlags::from_slice(&resp)
            .ok_or_else(|| Error::Framing("short config reply".into()))?;
        self.config = config;
        Ok(config)
    }

    /// Rewrite CONFIG and check the read back the device returns.
    pub fn write_config(&mut self, config: ConfigFlags) -> Result<()> {
        let expected = config.encode();
        let resp = self.command(Command::UpdateConfig { config: expected })?;
        let actual = ConfigFlags::from_slice(&resp)
            .ok_or_else(|| Error::Framing("short config reply".into()))?;
        self.config = actual;
        if let Some(i) = (0..expected.len()).find(|&i| expected[i] != actual.encode()[i]) {
            return Err(Error::VerifyMismatch {
                address: self.chip.config_addr + i as u32,
                expected: expected[i],
                actual: actual.encode()[i],
            });
        }
        log::info!("Config written");
        Ok(())
    }

    pub fn erase_all(&mut self) -> Result<()> {
        self.command(Command::EraseAll)?;
        log::info!("APROM erased");
        Ok(())
    }

    pub fn page_erase(&mut self, address: u32) -> Result<()> {
        self.ensure_extended()?;
        let address = self.check_range(address, 1, self.aprom_size())?;
        self.command(Command::PageErase { address })?;
        log::info!("Page 0x{:04x} erased", address & !(self.chip.page_size as u16 - 1));
        Ok(())
    }

    /// Erase and program `data` at `address` in APROM.
    ///
    /// `progress` is called with the number of bytes acknowledged so far.
    pub fn flash<F: FnMut(usize)>(&mut self, address: u32, data: &[u8], mut progress: F) -> Result<()> {
        let start = self.check_range(address, data.len(), self.aprom_size())?;
        let len = data.len() as u16;
        let first = data.len().min(UPDATE_FIRST_DATA_SIZE);

        let mut sum = 0u16;
        let mut done = 0;
        for chunk in std::iter::once(&data[..first]).chain(data[first..].chunks(CONTINUATION_DATA_SIZE)) {
            let cmd = if done == 0 {
                Command::UpdateAprom {
                    address: start,
                    len,
                    data: chunk.to_vec(),
                }
            } else {
                Command::Continuation {
                    data: chunk.to_vec(),
                }
            };
            let resp = self.command(cmd)?;
            sum = chunk
                .iter()
                .fold(sum, |acc, &b| acc.wrapping_add(u16::from(b)));
            let device_sum = resp[..].pread_with::<u16>(0, LE).unwrap_or_default();
            if device_sum != sum {
                return Err(Error::ChecksumMismatch {
                    expected: sum,
                    actual: device_sum,
                });
            }
            done += chunk.len();
            progress(done);
        }
        log::info!("Programmed {} bytes at 0x{:04x}", data.len(), start);
        Ok(())
    }

    /// Read `len` bytes of the flat APROM + LDROM space.
    pub fn read<F: FnMut(usize)>(&mut self, address: u32, len: usize, mut progress: F) -> Result<Vec<u8>> {
        self.ensure_extended()?;
        let start = self.check_range(address, len, self.chip.flash_size)?;
        let mut out = Vec::with_capacity(len);
        let mut cmd = Command::ReadRom {
            address: start,
            len: len as u16,
        };
        while out.len() < len {
            let resp = self.command(cmd)?;
            let take = (len - out.len()).min(CONTINUATION_DATA_SIZE);
            out.extend_from_slice(&resp[..take]);
            progress(out.len());
            cmd = Command::Continuation { data: vec![] };
        }
        Ok(out)
    }

    /// APROM followed by LDROM, as the bootloader sees them.
    pub fn dump<F: FnMut(usize)>(&mut self, mut progress: F) -> Result<Vec<u8>> {
        self.ensure_extended()?;
        let len = self.chip.flash_size as usize;
        let mut out = Vec::with_capacity(len);
        let mut cmd = Command::DumpRom;
        while out.len() < len {
            let resp = self.command(cmd)?;
            let take = (len - out.len()).min(CONTINUATION_DATA_SIZE);
            out.extend_from_slice(&resp[..take]);
            progress(out.len());
            cmd = Command::Continuation { data: vec![] };
        }
        Ok(out)
    }

    pub fn verify(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let actual = self.read(address, data.len(), |_| ())?;
        if let Some(i) = data.iter().zip(&actual).position(|(a, b)| a != b) {
            return Err(Error::VerifyMismatch {
                address: address + i as u32,
                expected: data[i],
                actual: actual[i],
            });
        }
        log::info!("Verified {} bytes", data.len());
        Ok(())
    }

    pub fn run_ldrom(&mut self) -> Result<()> {
        self.command(Command::RunLdrom)?;
        Ok(())
    }

    /// Leave ISP and boot APROM. Connection will be lost.
    pub fn reset(&mut self) -> Result<()> {
        self.transport
            .transfer(Command::RunAprom, self.seq.wrapping_add(1))?;
        log::info!("Device reset");
        Ok(())
    }

    fn ensure_extended(&self) -> Result<()> {
        if !self.supports_extended() {
            return Err(Error::Unsupported(
                "bootloader firmware below 0xd0 lacks this command",
            ));
        }
        Ok(())
    }

    fn check_range(&self, address: u32, len: usize, limit: u32) -> Result<u16> {
        let end = u32::try_from(len)
            .ok()
            .and_then(|len| address.checked_add(len));
        let Some(end) = end.filter(|&end| len != 0 && end <= limit && end <= 0x1_0000) else {
            return Err(Error::InvalidRange {
                start: address,
                end: end.unwrap_or(u32::MAX),
            });
        };
        Ok(address as u16)
    }

    fn sync_seq(&mut self) -> Result<()> {
        let seq = self.seq.wrapping_add(1);
        self.exchange(Command::SyncSeq { seq }, seq, seq.wrapping_add(1))?;
        Ok(())
    }

    /// Send the next packet and return the 56-byte payload of an acknowledged reply.
    fn command(&mut self, cmd: Command) -> Result<Vec<u8>> {
        let seq = self.seq.wrapping_add(1);
        self.exchange(cmd, seq, seq)
    }

    fn exchange(&mut self, cmd: Command, seq: u16, expected_seq: u16) -> Result<Vec<u8>> {
        let command = cmd.code();
        let resp = self
            .transport
            .transfer(cmd, seq)?
            .ok_or_else(|| Error::Framing("no reply expected".into()))?;
        if resp.seq() != expected_seq {
            return Err(Error::SequenceMismatch {
                expected: expected_seq,
                actual: resp.seq(),
            });
        }
        self.seq = resp.seq();
        match resp {
            Response::Ok { payload, .. } => Ok(payload),
            Response::Nack { .. } => Err(Error::Nack { command }),
        }
    }
}

/// Returns the sequence number of the CONNECT reply.
fn connect<T: Transport>(transport: &mut T) -> Result<u16> {
    for attempt in 1..=CONNECT_RETRIES {
        match transport.transfer(Command::Connect, 0) {
            Ok(Some(resp)) if resp.is_ok() => {
                log::debug!("connected after {} attempt(s)", attempt);
                return Ok(resp.seq());
            }
            Ok(resp) => log::debug!("bad CONNECT reply: {:?}", resp),
            Err(Error::Framing(e)) => log::debug!("CONNECT: {}", e),
            Err(e) => return Err(e),
        }
    }
    Err(Error::Framing("no response to CONNECT".into()))
}
