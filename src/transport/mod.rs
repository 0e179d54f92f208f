//! Byte channel between the host and the bridge.
use anyhow::Result;

use crate::Error;

pub use self::emulator::EmulatorTransport;
pub use self::serial::SerialTransport;

mod emulator;
mod serial;

/// Abstraction of the host <-> bridge link.
/// Might be a serial port, or the in-process emulator.
pub trait Transport {
    fn send_raw(&mut self, raw: &[u8]) -> Result<()>;
    /// Fill `buf` as far as possible, stopping early when the link times out.
    /// Returns the number of bytes read.
    fn recv_raw(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn write(&mut self, data: &[u8]) -> Result<()> {
        log::trace!("host -> bridge {}", hex::encode(data));
        self.send_raw(data)
    }

    /// Reads exactly `len` bytes. Nothing at all is a [`Error::Timeout`], a
    /// partial reply is a [`Error::ShortRead`].
    fn read(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let n = self.recv_raw(&mut buf)?;
        log::trace!("host <- bridge {}", hex::encode(&buf[..n]));
        if n == 0 && len > 0 {
            return Err(Error::Timeout.into());
        }
        anyhow::ensure!(
            n == len,
            Error::ShortRead {
                expected: len,
                got: n
            }
        );
        Ok(buf)
    }

    fn read_byte(&mut self) -> Result<u8> {
        Ok(self.read(1)?[0])
    }
}
