//! The host side of the UART ISP packet protocol

use std::fmt;

use scroll::{Pwrite, LE};

use crate::constants::{
    commands, CFG_FLASH_LEN, CONTINUATION_DATA_SIZE, PACKET_SIZE, UPDATE_FIRST_DATA_OFFSET,
    UPDATE_FIRST_DATA_SIZE,
};
use crate::error::{Error, Result};
use crate::packet::{self, Packet};

/// ISP Command
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    /// Wake the bootloader up. The device restarts its sequence counter at 0.
    Connect,
    /// Make the device adopt the host's sequence number.
    SyncSeq { seq: u16 },
    /// Return the firmware version byte. 0xd0 and up support the extended commands.
    GetFwVersion,
    GetDeviceId,
    /// Extended: 12-byte UID
    GetUid,
    /// Extended: company ID
    GetCid,
    /// Extended: UCID page
    GetUcid,
    GetFlashMode,
    ReadConfig,
    /// Erase CONFIG and program the given 5 bytes.
    UpdateConfig { config: [u8; CFG_FLASH_LEN] },
    /// Erase the whole APROM.
    EraseAll,
    /// Extended: start a dump, the reply carries the first chunk
    ReadRom { address: u16, len: u16 },
    /// Extended: dump APROM followed by LDROM
    DumpRom,
    /// Erase the range and start programming it.
    ///
    /// `data` is the first chunk, at most 48 bytes.
    UpdateAprom { address: u16, len: u16, data: Vec<u8> },
    /// Next chunk of a running update (at most 56 bytes) or dump (no data).
    Continuation { data: Vec<u8> },
    /// Extended: erase the 128-byte page containing `address`
    PageErase { address: u16 },
    /// Leave ISP into APROM. There is no reply.
    RunAprom,
    RunLdrom,
    /// Same as `RunAprom`
    Reset,
}

impl Command {
    pub fn code(&self) -> u8 {
        match self {
            Command::Connect => commands::CONNECT,
            Command::SyncSeq { .. } => commands::SYNC_SEQ,
            Command::GetFwVersion => commands::GET_FW_VERSION,
            Command::GetDeviceId => commands::GET_DEVICE_ID,
            Command::GetUid => commands::GET_UID,
            Command::GetCid => commands::GET_CID,
            Command::GetUcid => commands::GET_UCID,
            Command::GetFlashMode => commands::GET_FLASH_MODE,
            Command::ReadConfig => commands::READ_CONFIG,
            Command::UpdateConfig { .. } => commands::UPDATE_CONFIG,
            Command::EraseAll => commands::ERASE_ALL,
            Command::ReadRom { .. } => commands::READ_ROM,
            Command::DumpRom => commands::DUMP_ROM,
            Command::UpdateAprom { .. } => commands::UPDATE_APROM,
            Command::Continuation { .. } => commands::CONTINUATION,
            Command::PageErase { .. } => commands::PAGE_ERASE,
            Command::RunAprom => commands::RUN_APROM,
            Command::RunLdrom => commands::RUN_LDROM,
            Command::Reset => commands::RESET,
        }
    }

    /// Whether the bootloader answers this command.
    pub fn expects_reply(&self) -> bool {
        !matches!(self, Command::RunAprom | Command::Reset)
    }

    pub fn into_raw(self, seq: u16) -> Result<Packet> {
        let mut buf = [0u8; PACKET_SIZE];
        buf[0] = self.code();
        buf[..].pwrite_with(seq, 4, LE).map_err(framing)?;
        match self {
            Command::SyncSeq { seq } => {
                buf[..].pwrite_with(seq, 8, LE).map_err(framing)?;
            }
            Command::UpdateConfig { config } => {
                buf[8..8 + CFG_FLASH_LEN].copy_from_slice(&config);
            }
            Command::ReadRom { address, len } => {
                buf[..].pwrite_with(address, 8, LE).map_err(framing)?;
                buf[..].pwrite_with(len, 12, LE).map_err(framing)?;
            }
            Command::UpdateAprom { address, len, data } => {
                if data.len() > UPDATE_FIRST_DATA_SIZE {
                    return Err(Error::Framing(format!(
                        "first update chunk too long: {}",
                        data.len()
                    )));
                }
                buf[..].pwrite_with(address, 8, LE).map_err(framing)?;
                buf[..].pwrite_with(len, 12, LE).map_err(framing)?;
                buf[UPDATE_FIRST_DATA_OFFSET..UPDATE_FIRST_DATA_OFFSET + data.len()]
                    .copy_from_slice(&data);
            }
            Command::Continuation { data } => {
                if data.len() > CONTINUATION_DATA_SIZE {
                    return Err(Error::Framing(format!(
                        "continuation chunk too long: {}",
                        data.len()
                    )));
                }
                buf[8..8 + data.len()].copy_from_slice(&data);
            }
            Command::PageErase { address } => {
                buf[..].pwrite_with(address, 8, LE).map_err(framing)?;
            }
            _ => (),
        }
        Ok(buf)
    }
}

fn framing(e: scroll::Error) -> Error {
    Error::Framing(e.to_string())
}

/// Reply to a Command, already checked against the request's checksum.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Response {
    /// Checksum matches the request
    Ok { seq: u16, payload: Vec<u8> },
    /// Checksum bytes inverted
    Nack { seq: u16 },
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ok { seq, payload } => write!(f, "OK#{}[{}]", seq, hex::encode(payload)),
            Response::Nack { seq } => write!(f, "NACK#{}", seq),
        }
    }
}

impl Response {
    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok { .. })
    }

    pub fn seq(&self) -> u16 {
        match self {
            Response::Ok { seq, .. } | Response::Nack { seq } => *seq,
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            Response::Ok { payload, .. } => payload,
            Response::Nack { .. } => &[],
        }
    }

    pub(crate) fn from_raw(request: &Packet, raw: &[u8]) -> Result<Self> {
        let raw: &Packet = raw.try_into().map_err(|_| {
            Error::Framing(format!("reply is {} bytes, expected {}", raw.len(), PACKET_SIZE))
        })?;
        let expected = packet::checksum(request);
        let actual = packet::reply_checksum(raw);
        let seq = packet::sequence(raw);
        if actual == expected {
            Ok(Response::Ok {
                seq,
                payload: packet::payload(raw).to_vec(),
            })
        } else if actual == !expected {
            Ok(Response::Nack { seq })
        } else {
            Err(Error::ChecksumMismatch { expected, actual })
        }
    }
}
