//! Standard Serial I/O bridge, programmer and ID code recovery for M16C MCUs.

pub mod adapter;
pub mod bridge;
pub mod constants;
pub mod device;
pub mod error;
pub mod flashing;
pub mod serialio;
pub mod simulator;
pub mod transport;

pub use self::adapter::Adapter;
pub use self::bridge::Bridge;
pub use self::device::Chip;
pub use self::error::Error;
pub use self::flashing::Flashing;
pub use self::serialio::{SerialIo, UnlockStatus};
pub use self::transport::Transport;
