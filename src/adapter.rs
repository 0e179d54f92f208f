//! Host side of the bridge protocol.

use anyhow::Result;
use scroll::{LE, Pread, Pwrite};

use crate::Error;
use crate::constants::{BRIDGE_VERSION, commands, replies};
use crate::transport::Transport;

/// Staged bytes per batch before acks are collected.
const STAGING_BLOCK: usize = 64;
/// `T` polls before giving up on a busy timer that never stops.
const MAX_TIMER_POLLS: usize = 1_000_000;

/// Snapshot of the bridge busy timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerReading {
    pub running: bool,
    pub count: u32,
}

pub struct Adapter<T: Transport> {
    transport: T,
}

impl<T: Transport> Adapter<T> {
    pub fn new(transport: T) -> Self {
        Adapter { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Ensures a bridge speaking API version 0 is attached.
    pub fn connect(&mut self) -> Result<()> {
        let version = self.version()?;
        anyhow::ensure!(version == 0, Error::AdapterVersion(version));
        Ok(())
    }

    /// API version of the bridge.
    pub fn version(&mut self) -> Result<u8> {
        self.transport.write(&[commands::VERSION])?;
        let reply = self.transport.read_byte()?;
        if !reply.is_ascii_digit() {
            return Err(Error::AdapterVersion(reply).into());
        }
        Ok(reply - BRIDGE_VERSION)
    }

    fn check_ack(&mut self) -> Result<()> {
        let reply = self.transport.read_byte()?;
        if reply != replies::ACK {
            return Err(Error::from_reply(replies::ACK, reply).into());
        }
        Ok(())
    }

    /// Pulses the target reset line.
    pub fn reset_target(&mut self) -> Result<()> {
        self.transport.write(&[commands::RESET_TARGET])?;
        self.check_ack()
    }

    /// Drops the contents of both bridge FIFOs.
    pub fn flush(&mut self) -> Result<()> {
        self.transport.write(&[commands::FLUSH])?;
        self.check_ack()
    }

    /// Sets the target clock divider.
    ///
    /// Sample values:
    /// - 0: 6 MHz
    /// - 1: 3 MHz
    /// - 2: 2 MHz
    /// - 3: 1.5 MHz
    /// - 4: 1.2 MHz
    /// - 11: 500 KHz
    pub fn set_tclk(&mut self, divider: u8) -> Result<()> {
        self.transport.write(&[commands::SET_TCLK, divider])?;
        self.check_ack()
    }

    /// Sets the serial bit clock divider.
    pub fn set_sclk(&mut self, divider: u16) -> Result<()> {
        let mut buf = [commands::SET_SCLK, 0, 0];
        buf.pwrite_with(divider, 1, LE)?;
        self.transport.write(&buf)?;
        self.check_ack()
    }

    pub fn set_clock_dividers(&mut self, target: u8, serial: u16) -> Result<()> {
        self.set_tclk(target)?;
        self.set_sclk(serial)
    }

    pub fn timer_running(&mut self) -> Result<bool> {
        self.transport.write(&[commands::TIMER_STATUS])?;
        match self.transport.read_byte()? {
            replies::TIMER_RUNNING => Ok(true),
            replies::TIMER_STOPPED => Ok(false),
            other => Err(Error::from_reply(replies::TIMER_STOPPED, other).into()),
        }
    }

    pub fn timer_count(&mut self) -> Result<u32> {
        self.transport.write(&[commands::TIMER_COUNT])?;
        let raw = self.transport.read(4)?;
        Ok(raw.pread_with::<u32>(0, LE)?)
    }

    pub fn busy_timer(&mut self) -> Result<TimerReading> {
        let running = self.timer_running()?;
        let count = self.timer_count()?;
        Ok(TimerReading { running, count })
    }

    /// Waits until the busy timer stops running, returns its value.
    pub fn wait_busy_timer(&mut self) -> Result<u32> {
        for _ in 0..MAX_TIMER_POLLS {
            if !self.timer_running()? {
                return self.timer_count();
            }
        }
        Err(Error::Timeout.into())
    }

    fn fifo_read(&mut self, count: usize) -> Result<Vec<u8>> {
        let mut buf = [commands::FIFO_READ, 0, 0, 0, 0];
        buf.pwrite_with(count as u32, 1, LE)?;
        self.transport.write(&buf)?;
        self.transport.read(count)
    }

    /// Stages `data` into the outbound FIFO, one `w` per byte.
    fn stage(&mut self, data: &[u8]) -> Result<()> {
        for block in data.chunks(STAGING_BLOCK) {
            let buf: Vec<u8> = block
                .iter()
                .flat_map(|&b| [commands::FIFO_WRITE, b])
                .collect();
            self.transport.write(&buf)?;
            let acks = self.transport.read(block.len())?;
            if let Some(&bad) = acks.iter().find(|&&a| a != replies::ACK) {
                return Err(Error::from_reply(replies::ACK, bad).into());
            }
        }
        Ok(())
    }

    /// Executes a command via Standard Serial I/O.
    ///
    /// The outbound FIFO is filled with `command` followed by `result_size`
    /// filler bytes, the transaction is run, the bytes clocked in while the
    /// command went out are discarded and the following `result_size` bytes
    /// are returned.
    pub fn execute(&mut self, command: &[u8], result_size: usize) -> Result<Vec<u8>> {
        self.flush()?;

        let mut data = command.to_vec();
        data.resize(command.len() + result_size, replies::FILLER);
        self.stage(&data)?;

        self.transport.write(&[commands::TRANSACTION])?;
        self.check_ack()?;

        self.fifo_read(command.len())?;
        self.fifo_read(result_size)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Replays canned bridge replies and records what the host sent.
    #[derive(Default)]
    struct Scripted {
        sent: Vec<u8>,
        replies: VecDeque<u8>,
    }

    impl Scripted {
        fn new(replies: &[u8]) -> Self {
            Scripted {
                sent: vec![],
                replies: replies.iter().copied().collect(),
            }
        }
    }

    impl Transport for Scripted {
        fn send_raw(&mut self, raw: &[u8]) -> Result<()> {
            self.sent.extend_from_slice(raw);
            Ok(())
        }

        fn recv_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
            let mut n = 0;
            while n < buf.len() {
                match self.replies.pop_front() {
                    Some(b) => buf[n] = b,
                    None => break,
                }
                n += 1;
            }
            Ok(n)
        }
    }

    fn kind(err: &anyhow::Error) -> &Error {
        err.downcast_ref::<Error>().expect("typed error")
    }

    #[test]
    fn connect_checks_version() {
        let mut adapter = Adapter::new(Scripted::new(b"0"));
        adapter.connect().unwrap();
        assert_eq!(adapter.transport().sent, b"v");

        let mut adapter = Adapter::new(Scripted::new(b"1"));
        let err = adapter.connect().unwrap_err();
        assert_eq!(kind(&err), &Error::AdapterVersion(1));

        let mut adapter = Adapter::new(Scripted::new(b"x"));
        let err = adapter.version().unwrap_err();
        assert_eq!(kind(&err), &Error::AdapterVersion(b'x'));
    }

    #[test]
    fn missing_reply_is_timeout() {
        let mut adapter = Adapter::new(Scripted::new(b""));
        let err = adapter.reset_target().unwrap_err();
        assert_eq!(kind(&err), &Error::Timeout);
    }

    #[test]
    fn wrong_ack_is_synchronization_error() {
        let mut adapter = Adapter::new(Scripted::new(b"x"));
        let err = adapter.flush().unwrap_err();
        assert!(kind(&err).is_synchronization());
    }

    #[test]
    fn dividers_are_little_endian() {
        let mut adapter = Adapter::new(Scripted::new(b".."));
        adapter.set_clock_dividers(1, 0x017f).unwrap();
        assert_eq!(adapter.transport().sent, [b's', 1, b'S', 0x7f, 0x01]);
    }

    #[test]
    fn timer_count_is_lsb_first() {
        let mut adapter = Adapter::new(Scripted::new(&[b's', b'r', b's', 0x34, 0x12, 0, 0]));
        assert!(!adapter.timer_running().unwrap());
        assert_eq!(adapter.wait_busy_timer().unwrap(), 0x1234);
        assert_eq!(adapter.transport().sent, b"TTTt");
    }

    #[test]
    fn execute_frames_the_transaction() {
        // flush, 3 staging acks, transaction ack, 2 echo bytes, 1 result byte
        let mut adapter = Adapter::new(Scripted::new(b"....."));
        adapter.transport_mut().replies.extend([0xaa, 0xbb, 0x42]);
        let result = adapter.execute(&[0x70, 0x01], 1).unwrap();
        assert_eq!(result, [0x42]);
        assert_eq!(
            adapter.transport().sent,
            [
                b'f', b'w', 0x70, b'w', 0x01, b'w', 0xff, b'W', b'R', 2, 0, 0, 0, b'R', 1, 0, 0, 0
            ]
        );
    }

    #[test]
    fn execute_reports_full_fifo() {
        let mut adapter = Adapter::new(Scripted::new(b"..!"));
        let err = adapter.execute(&[1, 2], 0).unwrap_err();
        assert_eq!(kind(&err), &Error::FifoFull);
    }

    #[test]
    fn short_read_is_synchronization_error() {
        // acks, one echo byte, then only one of the two result bytes
        let mut adapter = Adapter::new(Scripted::new(b".....\x01\x02"));
        let err = adapter.execute(&[0xfb], 2).unwrap_err();
        assert_eq!(
            kind(&err),
            &Error::ShortRead {
                expected: 2,
                got: 1
            }
        );
        assert!(kind(&err).is_synchronization());
    }
}
