//! Abstract Device transport interface.
use crate::error::Result;
use crate::packet::Packet;
use crate::protocol::{Command, Response};

pub use self::serial::SerialTransport;

mod serial;

/// Abstraction of the transport layer.
/// A serial port on real hardware, or a simulated bootloader in tests.
pub trait Transport {
    fn send_raw(&mut self, raw: &Packet) -> Result<()>;
    fn recv_raw(&mut self) -> Result<Vec<u8>>;

    /// Send `cmd` stamped with `seq`; `None` for commands the device never answers.
    fn transfer(&mut self, cmd: Command, seq: u16) -> Result<Option<Response>> {
        let expects_reply = cmd.expects_reply();
        let req = cmd.into_raw(seq)?;
        log::debug!("=> {}", hex::encode(req));
        self.send_raw(&req)?;
        if !expects_reply {
            return Ok(None);
        }

        let resp = self.recv_raw()?;
        log::debug!("<= {}", hex::encode(&resp));
        Response::from_raw(&req, &resp).map(Some)
    }
}
