//! Fixed 64-byte ISP packet layout shared by the bootloader and the host.
//!
//! Inbound (host to device): `[0..4)` command, `[4..8)` sequence number.
//! Outbound (device to host): `[0..2)` checksum of the inbound packet, `[4..6)` sequence number.
//! Everything from byte 8 is payload. Unused header bytes are zero.
use scroll::{Pread, Pwrite, LE};

use crate::constants::{PACKET_HEADER_SIZE, PACKET_SIZE};

pub type Packet = [u8; PACKET_SIZE];

/// 16-bit additive checksum over all 64 bytes.
pub fn checksum(packet: &Packet) -> u16 {
    packet
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

pub fn sequence(packet: &Packet) -> u16 {
    packet[..].pread_with::<u16>(4, LE).unwrap_or_default()
}

pub fn reply_checksum(packet: &Packet) -> u16 {
    packet[..].pread_with::<u16>(0, LE).unwrap_or_default()
}

/// Write checksum and sequence into the first 8 bytes of `tx`.
pub fn stamp(tx: &mut Packet, checksum: u16, seq: u16) {
    tx[..PACKET_HEADER_SIZE].fill(0);
    // infallible, both offsets are inside the header
    let _ = tx[..].pwrite_with(checksum, 0, LE);
    let _ = tx[..].pwrite_with(seq, 4, LE);
}

/// Turn a stamped reply into a NACK by inverting the checksum bytes.
pub fn invert_checksum(tx: &mut Packet) {
    tx[0] = !tx[0];
    tx[1] = !tx[1];
}

pub fn payload(packet: &Packet) -> &[u8] {
    &packet[PACKET_HEADER_SIZE..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_wraps_at_16_bits() {
        let packet = [0xffu8; PACKET_SIZE];
        assert_eq!(checksum(&packet), (0xff * 64) as u16);

        let mut packet = [0u8; PACKET_SIZE];
        packet[0] = 0xae;
        assert_eq!(checksum(&packet), 0xae);
    }

    #[test]
    fn stamp_layout() {
        let mut tx = [0x55u8; PACKET_SIZE];
        stamp(&mut tx, 0x1234, 0xbeef);
        assert_eq!(&tx[..8], &[0x34, 0x12, 0, 0, 0xef, 0xbe, 0, 0]);
        assert_eq!(tx[8], 0x55);
        assert_eq!(reply_checksum(&tx), 0x1234);
        assert_eq!(sequence(&tx), 0xbeef);

        invert_checksum(&mut tx);
        assert_eq!(reply_checksum(&tx), !0x1234u16);
    }
}
