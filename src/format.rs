//! Firmware file formats
use std::str;
use std::{borrow::Cow, path::Path};

use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirmwareFormat {
    PlainHex,
    IntelHex,
    Binary,
}

/// Flash image plus the address of its first byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firmware {
    pub address: u32,
    pub data: Vec<u8>,
}

pub fn read_firmware_from_file<P: AsRef<Path>>(path: P) -> Result<Firmware> {
    let p = path.as_ref();
    let raw = std::fs::read(p)?;

    let format = guess_format(p, &raw);
    log::info!("Read {} as {:?} format", p.display(), format);
    match format {
        FirmwareFormat::PlainHex => Ok(Firmware {
            address: 0,
            data: read_hex(str::from_utf8(&raw)?)?,
        }),
        FirmwareFormat::IntelHex => read_ihex(str::from_utf8(&raw)?),
        FirmwareFormat::Binary => Ok(Firmware {
            address: 0,
            data: raw,
        }),
    }
}

/// Output format follows the extension: `.hex`/`.ihex` Intel HEX, anything else raw binary.
pub fn write_firmware_to_file<P: AsRef<Path>>(path: P, address: u32, data: &[u8]) -> Result<()> {
    let p = path.as_ref();
    let out = match ext_of(p).as_str() {
        "ihex" | "ihe" | "hex" => write_ihex(address, data)?.into_bytes(),
        _ => data.to_vec(),
    };
    std::fs::write(p, out)?;
    log::info!("Wrote {} bytes to {}", data.len(), p.display());
    Ok(())
}

fn ext_of(path: &Path) -> String {
    path.extension()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default()
        .to_lowercase()
}

pub fn guess_format(path: &Path, raw: &[u8]) -> FirmwareFormat {
    let ext = ext_of(path);
    if ["ihex", "ihe", "h86", "hex", "a51", "omf"].contains(&&*ext) && raw.first() == Some(&b':') {
        return FirmwareFormat::IntelHex;
    }
    if ext == "bin" {
        return FirmwareFormat::Binary;
    }

    let is_hex_line = |c: u8| c.is_ascii_hexdigit() || c == b'\n' || c == b'\r';
    if raw.first() == Some(&b':') && raw.iter().all(|&c| is_hex_line(c) || c == b':') {
        FirmwareFormat::IntelHex
    } else if !raw.is_empty() && raw.iter().all(|&c| is_hex_line(c) || c == b' ') {
        FirmwareFormat::PlainHex
    } else {
        FirmwareFormat::Binary
    }
}

pub fn read_hex(data: &str) -> Result<Vec<u8>> {
    let digits: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(hex::decode(digits)?)
}

pub fn read_ihex(data: &str) -> Result<Firmware> {
    use ihex::Record;

    let mut base_address = 0;

    let mut records = vec![];
    for record in ihex::Reader::new(data) {
        let record = record?;
        use Record::*;
        match record {
            Data { offset, value } => {
                let offset = base_address + offset as u32;

                records.push((offset, value.into()));
            }
            EndOfFile => (),
            ExtendedSegmentAddress(address) => {
                base_address = (address as u32) * 16;
            }
            StartSegmentAddress { .. } => (),
            ExtendedLinearAddress(address) => {
                base_address = (address as u32) << 16;
            }
            StartLinearAddress(_) => (),
        };
    }
    merge_sections(records)
}

/// 16-byte data records, with an extended linear address record when above 64K.
pub fn write_ihex(address: u32, data: &[u8]) -> Result<String> {
    use ihex::Record;

    let mut records = vec![];
    let mut upper = 0u16;
    for (i, chunk) in data.chunks(16).enumerate() {
        let addr = address + (i * 16) as u32;
        let hi = (addr >> 16) as u16;
        if hi != upper {
            records.push(Record::ExtendedLinearAddress(hi));
            upper = hi;
        }
        records.push(Record::Data {
            offset: addr as u16,
            value: chunk.to_vec(),
        });
    }
    records.push(Record::EndOfFile);
    Ok(ihex::create_object_file_representation(&records)?)
}

/// Lay sections out in one image, gaps filled with 0xff (erased flash).
fn merge_sections(mut sections: Vec<(u32, Cow<[u8]>)>) -> Result<Firmware> {
    sections.sort(); // order by start address

    let (Some(first), Some(last)) = (sections.first(), sections.last()) else {
        anyhow::bail!("empty firmware file");
    };
    let start_address = first.0;
    let end_address = sections
        .iter()
        .map(|(addr, sect)| addr + sect.len() as u32)
        .max()
        .unwrap_or(last.0);

    let total_size = end_address - start_address;

    let mut binary = vec![0xffu8; total_size as usize];
    for (addr, sect) in sections {
        let sect_start = (addr - start_address) as usize;
        let sect_end = sect_start + sect.len();
        binary[sect_start..sect_end].copy_from_slice(&sect);
    }
    Ok(Firmware {
        address: start_address,
        data: binary,
    })
}
