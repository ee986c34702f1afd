//! MCU Chip definition, with part-specific flash layout and ICP timings
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// MCU Family
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Family {
    pub name: String,
    pub description: String,
    pub variants: Vec<Chip>,
}

/// Represents an MCU chip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chip {
    pub name: String,
    #[serde(deserialize_with = "parse_u16")]
    pub device_id: u16,
    #[serde(deserialize_with = "parse_u8")]
    pub company_id: u8,

    /// APROM + LDROM, the LDROM is carved from the top
    #[serde(deserialize_with = "parse_address_and_offset")]
    pub flash_size: u32,
    #[serde(deserialize_with = "parse_address_and_offset")]
    pub ldrom_max_size: u32,
    pub page_size: u32,

    #[serde(deserialize_with = "parse_address_and_offset")]
    pub config_addr: u32,
    pub config_len: usize,

    /// ICP timings in microseconds, as (before CLK rise, after CLK rise)
    pub program_time: (u32, u32),
    pub page_erase_time: (u32, u32),
    pub mass_erase_time: (u32, u32),
    /// Default per-bit delay for software toggled GPIO
    #[serde(default)]
    pub bit_delay: u32,
}

impl ::std::fmt::Display for Chip {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        write!(f, "{}(0x{:04x})", self.name, self.device_id)
    }
}

pub struct ChipDB {
    families: Vec<Family>,
}

impl ChipDB {
    pub fn load() -> Result<Self> {
        Ok(ChipDB {
            families: vec![serde_yaml::from_str(include_str!(
                "../devices/0x36-N76E003.yaml"
            ))?],
        })
    }

    pub fn find_chip(device_id: u16) -> Result<Chip> {
        let db = ChipDB::load()?;
        let chip = db
            .families
            .iter()
            .flat_map(|f| f.variants.iter())
            .find(|c| c.device_id == device_id)
            .cloned()
            .ok_or_else(|| anyhow::format_err!("Cannot find chip with id 0x{:04x}", device_id))?;
        log::debug!("Find chip: {}", chip);
        Ok(chip)
    }

    pub fn find_by_name(name: &str) -> Result<Chip> {
        let db = ChipDB::load()?;
        db.families
            .iter()
            .flat_map(|f| f.variants.iter())
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| anyhow::format_err!("Unknown chip {:?}", name))
    }
}

impl Chip {
    pub fn n76e003() -> Result<Chip> {
        ChipDB::find_chip(crate::constants::N76E003_DEVID)
    }

    pub const fn page_mask(&self) -> u32 {
        !(self.page_size - 1)
    }

    /// APROM size when `ldrom_size` bytes are reserved for LDROM
    pub fn aprom_size(&self, ldrom_size: u32) -> u32 {
        self.flash_size - ldrom_size.min(self.ldrom_max_size)
    }

    /// ICP flat address of an LDROM of `ldrom_size` bytes
    pub fn ldrom_addr(&self, ldrom_size: u32) -> u32 {
        self.aprom_size(ldrom_size)
    }
}

fn parse_number(s: &str) -> Option<u32> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else if let Some(kb) = s
        .strip_suffix("KiB")
        .or_else(|| s.strip_suffix("KB"))
        .or_else(|| s.strip_suffix('K'))
    {
        kb.parse::<u32>().ok().map(|k| k * 1024)
    } else {
        // parse pure digits here
        s.parse().ok()
    }
}

fn parse_address_and_offset<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = serde::Deserialize::deserialize(deserializer)?;
    parse_number(&s)
        .ok_or_else(|| serde::de::Error::custom(format!("error while parsing {:?}", s)))
}

fn parse_u16<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = parse_address_and_offset(deserializer)?;
    u16::try_from(v).map_err(serde::de::Error::custom)
}

fn parse_u8<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = parse_address_and_offset(deserializer)?;
    u8::try_from(v).map_err(serde::de::Error::custom)
}
