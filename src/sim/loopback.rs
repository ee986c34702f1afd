use crate::bootloader::{Bootloader, BootloaderConfig, Step};
use crate::constants::PACKET_SIZE;
use crate::error::{Error, Result};
use crate::packet::Packet;
use crate::transport::Transport;

use super::chip::SimulatedChip;

/// A host transport wired straight into a simulated bootloader.
///
/// Every sent packet is fed byte by byte through the receive interrupt, then
/// the main loop is polled once; whatever the device transmitted is the reply.
pub struct LoopbackTransport {
    bootloader: Bootloader<SimulatedChip>,
    last_step: Step,
}

impl LoopbackTransport {
    pub fn new(chip: SimulatedChip, config: BootloaderConfig) -> Self {
        let mut bootloader = Bootloader::new(chip, config);
        bootloader.start();
        LoopbackTransport {
            bootloader,
            last_step: Step::Idle,
        }
    }

    pub fn bootloader(&self) -> &Bootloader<SimulatedChip> {
        &self.bootloader
    }

    pub fn chip(&self) -> &SimulatedChip {
        self.bootloader.platform()
    }

    pub fn last_step(&self) -> Step {
        self.last_step
    }

    /// Advance the periodic timer and let the main loop react.
    pub fn tick(&mut self, ticks: usize) -> Step {
        for _ in 0..ticks {
            self.bootloader.on_timer_tick();
        }
        self.last_step = self.bootloader.poll();
        self.last_step
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new(SimulatedChip::default(), BootloaderConfig::default())
    }
}

impl Transport for LoopbackTransport {
    fn send_raw(&mut self, raw: &Packet) -> Result<()> {
        for &b in raw.iter() {
            self.bootloader.on_uart_rx(b);
        }
        self.last_step = self.bootloader.poll();
        if self.last_step == Step::BootAprom {
            self.bootloader.boot_aprom();
        }
        Ok(())
    }

    fn recv_raw(&mut self) -> Result<Vec<u8>> {
        self.bootloader
            .platform_mut()
            .take_packet(PACKET_SIZE)
            .ok_or_else(|| Error::Framing("timed out waiting for reply".into()))
    }
}
