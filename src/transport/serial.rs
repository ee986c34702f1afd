//! Serial Transportation.
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serialport::{DataBits, Parity, SerialPort, StopBits};

use super::Transport;
use crate::constants::{ISP_BAUDRATE, PACKET_SIZE};
use crate::error::{Error, Result};
use crate::packet::Packet;

const SERIAL_TIMEOUT_MS: u64 = 500;

/// 115200 8N1, the only setting the bootloader speaks.
pub struct SerialTransport {
    serial_port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(port: &str) -> Result<Self> {
        log::info!("Opening serial port: \"{}\" @ {} baud", port, ISP_BAUDRATE);
        let port = serialport::new(port, ISP_BAUDRATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(Duration::from_millis(SERIAL_TIMEOUT_MS))
            .open()?;
        Ok(SerialTransport { serial_port: port })
    }

    pub fn open_nth(nth: usize) -> Result<Self> {
        let ports = serialport::available_ports()?;

        log::debug!(
            "serial ports: {:?}",
            ports.iter().map(|p| &p.port_name).collect::<Vec<_>>()
        );
        match ports.get(nth) {
            Some(port) => Self::open(&port.port_name),
            None => Err(Error::Framing("No serial ports found!".into())),
        }
    }

    pub fn open_any() -> Result<Self> {
        Self::open_nth(0)
    }

    /// Drop anything left over from an earlier, abandoned exchange.
    pub fn clear_input(&mut self) -> Result<()> {
        self.serial_port.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }
}

impl Transport for SerialTransport {
    fn send_raw(&mut self, raw: &Packet) -> Result<()> {
        self.serial_port.write_all(raw)?;
        self.serial_port.flush()?;
        Ok(())
    }

    fn recv_raw(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; PACKET_SIZE];
        match self.serial_port.read_exact(&mut buf) {
            Ok(()) => Ok(buf),
            Err(e) if e.kind() == ErrorKind::TimedOut => {
                Err(Error::Framing("timed out waiting for reply".into()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
