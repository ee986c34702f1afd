/// Every ISP packet is exactly this long, in both directions.
pub const PACKET_SIZE: usize = 64;

/// First payload byte after the checksum/command and sequence words.
pub const PACKET_HEADER_SIZE: usize = 8;

/// Data bytes carried by a continuation packet.
pub const CONTINUATION_DATA_SIZE: usize = PACKET_SIZE - PACKET_HEADER_SIZE;

/// Offset of program data in the first UPDATE_APROM packet.
pub const UPDATE_FIRST_DATA_OFFSET: usize = 16;

/// Data bytes carried by the first UPDATE_APROM packet.
pub const UPDATE_FIRST_DATA_SIZE: usize = PACKET_SIZE - UPDATE_FIRST_DATA_OFFSET;

/// The ISP link never negotiates its rate; third party tools assume this.
pub const ISP_BAUDRATE: u32 = 115200;

/// Firmware version that implements the non-standard commands.
pub const EXTENDED_CMDS_FW_VER: u8 = 0xd0;

pub const N76E003_DEVID: u16 = 0x3650;

/// Nuvoton's company ID; a locked or absent chip reads back 0xff.
pub const NUVOTON_CID: u8 = 0xda;

pub const APROM_ADDR: u32 = 0x0000;
pub const CFG_FLASH_ADDR: u32 = 0x30000;
pub const CFG_FLASH_LEN: usize = 5;

/// UART ISP opcodes.
pub mod commands {
    pub const UPDATE_APROM: u8 = 0xa0;
    pub const UPDATE_CONFIG: u8 = 0xa1;
    pub const READ_CONFIG: u8 = 0xa2;
    pub const ERASE_ALL: u8 = 0xa3;
    pub const SYNC_SEQ: u8 = 0xa4;
    pub const READ_ROM: u8 = 0xa5; // non-standard
    pub const GET_FW_VERSION: u8 = 0xa6;
    pub const DUMP_ROM: u8 = 0xaa; // non-standard
    pub const RUN_APROM: u8 = 0xab;
    pub const RUN_LDROM: u8 = 0xac;
    pub const RESET: u8 = 0xad;
    pub const CONNECT: u8 = 0xae;
    pub const GET_DEVICE_ID: u8 = 0xb1;
    pub const GET_UID: u8 = 0xb2; // non-standard
    pub const GET_CID: u8 = 0xb3; // non-standard
    pub const GET_UCID: u8 = 0xb4; // non-standard
    pub const GET_FLASH_MODE: u8 = 0xca;
    pub const PAGE_ERASE: u8 = 0xd5; // non-standard
    /// Carries the next chunk of a running update or dump.
    pub const CONTINUATION: u8 = 0x00;
}

/// Values returned by GET_FLASH_MODE.
pub mod flash_mode {
    pub const APROM: u8 = 1;
    pub const LDROM: u8 = 2;
}

/// IAPCN values used by the bootloader.
pub mod iap {
    pub const BYTE_READ_AP: u8 = 0x00;
    pub const BYTE_PROGRAM_AP: u8 = 0x21;
    pub const PAGE_ERASE_AP: u8 = 0x22;
    pub const BYTE_READ_LD: u8 = 0x40;
    pub const BYTE_PROGRAM_LD: u8 = 0x61;
    pub const PAGE_ERASE_LD: u8 = 0x62;
    pub const BYTE_READ_CONFIG: u8 = 0xc0;
    pub const BYTE_PROGRAM_CONFIG: u8 = 0xe1;
    pub const PAGE_ERASE_CONFIG: u8 = 0xe2;
    pub const READ_UID: u8 = 0x04;
    pub const READ_CID: u8 = 0x0b;
    pub const BYTE_READ_ID: u8 = 0x0c;
}

/// ICP command codes, the low 6 bits of every 24-bit frame.
pub mod icp {
    pub const READ_UID: u8 = 0x04;
    pub const READ_CID: u8 = 0x0b;
    pub const READ_DEVICE_ID: u8 = 0x0c;
    pub const READ_FLASH: u8 = 0x00;
    pub const WRITE_FLASH: u8 = 0x21;
    pub const MASS_ERASE: u8 = 0x26;
    pub const PAGE_ERASE: u8 = 0x22;

    /// Clocked out on DATA to enter programming mode.
    pub const ENTRY_BITS: u32 = 0x5aa503;
    /// Clocked out on DATA to leave programming mode.
    pub const EXIT_BITS: u32 = 0xf78f0;
    /// RESET line pattern used before entry.
    pub const RESET_SEQ: u32 = 0x9e1cb6;
    /// Reset pattern used by older programmer firmware.
    pub const ALT_RESET_SEQ: u32 = 0xae1cb6;
    /// Parameter that confirms a mass erase.
    pub const MASS_ERASE_MAGIC: u32 = 0x3a5a5;

    pub const FRAME_BITS: u32 = 24;
    pub const UID_LEN: usize = 12;
    pub const UCID_LEN: usize = 16;
    pub const UCID_OFFSET: u32 = 0x20;
}
