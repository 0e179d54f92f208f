//! Command bytes and fixed parameters of the bridge and the target.

/// Bridge board clock.
pub const CLOCK_HZ: u32 = 12_000_000;
/// Host UART baud rate the bridge bitstream is built for.
pub const HOST_BAUDRATE: u32 = 1_200_000;

/// Depth of both bridge FIFOs.
pub const FIFO_DEPTH: usize = 512;
/// Cycles the target reset line is held low (10ms).
pub const RESET_HOLD_CYCLES: u32 = CLOCK_HZ / 100;

/// Power-on target clock divider, ~1.2MHz.
pub const DEFAULT_TCLK_DIVIDER: u8 = 4;
/// Power-on serial bit clock divider.
pub const DEFAULT_SCLK_DIVIDER: u16 = 1023;

/// API version reported by `v`.
pub const BRIDGE_VERSION: u8 = b'0';

/// Host -> bridge commands.
pub mod commands {
    pub const VERSION: u8 = b'v';
    pub const FLUSH: u8 = b'f';
    pub const RESET_TARGET: u8 = b'r';
    pub const FIFO_WRITE: u8 = b'w';
    pub const TRANSACTION: u8 = b'W';
    pub const FIFO_READ: u8 = b'R';
    pub const TIMER_COUNT: u8 = b't';
    pub const TIMER_STATUS: u8 = b'T';
    pub const SET_TCLK: u8 = b's';
    pub const SET_SCLK: u8 = b'S';
}

/// Bridge -> host reply bytes.
pub mod replies {
    pub const ACK: u8 = b'.';
    pub const FIFO_FULL: u8 = b'!';
    pub const UNKNOWN: u8 = b'?';
    pub const TIMER_RUNNING: u8 = b'r';
    pub const TIMER_STOPPED: u8 = b's';
    /// Streamed by `R` when the inbound FIFO has run dry.
    pub const FILLER: u8 = 0xff;
}

/// Standard Serial I/O target commands.
pub mod sio {
    pub const VERSION: u8 = 0xfb;
    pub const VERSION_LEN: usize = 8;
    /// ID check: command, address `0x0fffdf`, length 7.
    pub const UNLOCK: [u8; 5] = [0xf5, 0xdf, 0xff, 0x0f, 0x07];
    pub const READ_STATUS: u8 = 0x70;
    pub const STATUS_LEN: usize = 2;
    pub const READ_PAGE: u8 = 0xff;
    pub const PAGE_SIZE: usize = 256;
    pub const CODE_LEN: usize = 7;
}
