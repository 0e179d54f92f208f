//! Standard Serial I/O commands of the target, run through the bridge.

use anyhow::Result;
use bitfield::bitfield;
use scroll::{LE, Pwrite};

use crate::Error;
use crate::adapter::Adapter;
use crate::constants::sio;
use crate::transport::Transport;

/// Result of the last ID check, bits 2..3 of status register 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UnlockStatus {
    NotAttempted = 0,
    Failed = 1,
    /// Not produced by the ROM bootloader.
    Reserved = 2,
    Successful = 3,
}

impl From<u8> for UnlockStatus {
    fn from(bits: u8) -> Self {
        match bits & 3 {
            0 => UnlockStatus::NotAttempted,
            1 => UnlockStatus::Failed,
            2 => UnlockStatus::Reserved,
            _ => UnlockStatus::Successful,
        }
    }
}

bitfield! {
    /// Status register 1 (SRD1), second byte of the status reply.
    pub struct StatusRegister1(u8);
    impl Debug;
    pub u8, id_check, _: 3, 2;
}

impl StatusRegister1 {
    pub fn unlock_status(&self) -> UnlockStatus {
        UnlockStatus::from(self.id_check())
    }
}

pub struct SerialIo<T: Transport> {
    adapter: Adapter<T>,
    version_marker: Vec<u8>,
}

impl<T: Transport> SerialIo<T> {
    pub fn new(adapter: Adapter<T>, version_marker: &[u8]) -> Self {
        SerialIo {
            adapter,
            version_marker: version_marker.to_vec(),
        }
    }

    pub fn adapter(&mut self) -> &mut Adapter<T> {
        &mut self.adapter
    }

    fn execute(&mut self, cmd: &[u8], reply_len: usize) -> Result<Vec<u8>> {
        log::debug!("bridge -> target {}, {}", hex::encode(cmd), reply_len);
        let res = self.adapter.execute(cmd, reply_len)?;
        log::debug!("bridge <- target {}", hex::encode(&res));
        Ok(res)
    }

    /// Checks the bridge, resets the target and checks its version reply.
    pub fn connect(&mut self) -> Result<Vec<u8>> {
        self.adapter.connect()?;
        self.adapter.reset_target()?;
        let version = self.version()?;
        if !version.starts_with(&self.version_marker) {
            return Err(Error::TargetVersion(version).into());
        }
        Ok(version)
    }

    /// Raw 8-byte version reply.
    pub fn version(&mut self) -> Result<Vec<u8>> {
        self.execute(&[sio::VERSION], sio::VERSION_LEN)
    }

    /// Presents an ID code. The outcome is read back with [`Self::unlock_status`].
    pub fn unlock(&mut self, code: &[u8; sio::CODE_LEN]) -> Result<()> {
        let mut cmd = sio::UNLOCK.to_vec();
        cmd.extend_from_slice(code);
        self.execute(&cmd, 0)?;
        Ok(())
    }

    pub fn unlock_status(&mut self) -> Result<UnlockStatus> {
        let status = self.execute(&[sio::READ_STATUS], sio::STATUS_LEN)?;
        let srd1 = StatusRegister1(status[1]);
        log::debug!("status: {:?}", srd1);
        Ok(srd1.unlock_status())
    }

    /// Reads the 256-byte page at `page << 8`.
    pub fn read_page(&mut self, page: u16) -> Result<Vec<u8>> {
        let mut cmd = [sio::READ_PAGE, 0, 0];
        cmd.pwrite_with(page, 1, LE)?;
        self.execute(&cmd, sio::PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_id_check_bits() {
        assert_eq!(
            StatusRegister1(0b0000_1100).unlock_status(),
            UnlockStatus::Successful
        );
        assert_eq!(
            StatusRegister1(0b0000_0100).unlock_status(),
            UnlockStatus::Failed
        );
        assert_eq!(
            StatusRegister1(0b0000_0000).unlock_status(),
            UnlockStatus::NotAttempted
        );
        assert_eq!(
            StatusRegister1(0b1111_0011).unlock_status(),
            UnlockStatus::NotAttempted
        );
        assert_eq!(
            StatusRegister1(0b1000_1000).unlock_status(),
            UnlockStatus::Reserved
        );
    }
}
