use crate::device::Chip;

/// Delay between entry/exit pattern bits, independent of host speed.
pub const ENTRY_BIT_DELAY: u32 = 60;

/// Per-part and per-host ICP delays in microseconds.
///
/// The bit delays depend on how fast the host toggles GPIO (0 for a slow
/// software path, a few us for fast hosts). The `(before, after)` pairs are
/// how long DAT holds the end flag before CLK rises, and how long CLK stays
/// high afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcpTimings {
    pub command_bit_delay: u32,
    pub read_bit_delay: u32,
    pub write_bit_delay: u32,
    pub entry_bit_delay: u32,
    pub program_time: (u32, u32),
    pub page_erase_time: (u32, u32),
    pub mass_erase_time: (u32, u32),
}

impl Default for IcpTimings {
    /// N76E003 datasheet values.
    fn default() -> Self {
        IcpTimings {
            command_bit_delay: 2,
            read_bit_delay: 2,
            write_bit_delay: 2,
            entry_bit_delay: ENTRY_BIT_DELAY,
            program_time: (20, 5),
            page_erase_time: (6000, 100),
            mass_erase_time: (65000, 500),
        }
    }
}

impl From<&Chip> for IcpTimings {
    fn from(chip: &Chip) -> Self {
        IcpTimings {
            command_bit_delay: chip.bit_delay,
            read_bit_delay: chip.bit_delay,
            write_bit_delay: chip.bit_delay,
            entry_bit_delay: ENTRY_BIT_DELAY,
            program_time: chip.program_time,
            page_erase_time: chip.page_erase_time,
            mass_erase_time: chip.mass_erase_time,
        }
    }
}

impl IcpTimings {
    /// Same part timings with all bit delays set to `delay`.
    pub fn with_bit_delay(mut self, delay: u32) -> Self {
        self.command_bit_delay = delay;
        self.read_bit_delay = delay;
        self.write_bit_delay = delay;
        self
    }
}
