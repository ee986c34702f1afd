//! Hardware seams of the bootloader.
//!
//! A port to real silicon implements these over SFR access, the simulator in
//! [`crate::sim`] implements them over plain memory.

/// Flash regions with a separate update-enable bit (APUEN, LDUEN, CFUEN).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Aprom,
    Ldrom,
    Config,
}

/// Registers that need the TA unlock sequence before every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtectedRegister {
    RcTrim0,
    RcTrim1,
    /// Writing 0x80 performs a software reset into APROM.
    Chpcon,
    Wdcon,
}

/// In-application programming engine.
pub trait Iap {
    /// Load IAPCN/IAPA/IAPFD, trigger IAPGO and return IAPFD afterwards.
    ///
    /// Interrupts must already be masked.
    fn iap(&mut self, cmd: u8, address: u16, data: u8) -> u8;

    fn set_iap_enabled(&mut self, enabled: bool);

    fn set_update_enabled(&mut self, region: Region, enabled: bool);
}

/// UART0 transmit side. Reception happens in interrupt context.
pub trait Uart {
    /// Write SBUF and busy-wait on TI.
    fn transmit(&mut self, byte: u8);
}

pub trait Platform: Iap + Uart {
    /// Global interrupt enable (EA).
    fn set_interrupts(&mut self, enabled: bool);

    /// TA unlock followed by the register write, as a single operation.
    ///
    /// The caller must have interrupts masked so no interrupt can slip its
    /// own protected write in between.
    fn write_protected_register(&mut self, register: ProtectedRegister, value: u8);

    fn kick_watchdog(&mut self) {}

    /// Spin forever. Only a hardware reset gets the CPU out.
    fn trap(&mut self) -> !;
}
