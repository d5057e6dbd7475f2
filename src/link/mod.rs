//! Link - physical layer abstraction
//!
//! The link layer is an abstraction over the serial transports that `xpressnet` supports for
//! talking to an LI.  You will need to enable the corresponding crate features for your link
//! implementation.  Here is a list:
//!
//! - `link-serial`: Platform-independent link implementation for serial port devices (direct
//!   RS-232, USB-serial, or an Ethernet-tunnelled serial stream)
//! - `link-simulator`: Simulated link for `xpressnet` testing without hardware

#[cfg(feature = "link-serial")]
mod serial;
#[cfg(feature = "link-serial")]
pub use serial::{available_ports, SerialPortLink};

#[cfg(any(test, feature = "link-simulator"))]
pub mod simulator;
#[cfg(any(test, feature = "link-simulator"))]
pub use simulator::SimulatorLink;

/// Flow control applied to the serial line.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum FlowControl {
    None = 0,
    Hardware = 1,
    Software = 2,
}

impl FlowControl {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(FlowControl::None),
            1 => Some(FlowControl::Hardware),
            2 => Some(FlowControl::Software),
            _ => None,
        }
    }
}

impl core::fmt::Display for FlowControl {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let s = match self {
            FlowControl::None => "no flow control",
            FlowControl::Hardware => "hardware flow control",
            FlowControl::Software => "software flow control",
        };
        write!(f, "{s}")
    }
}

/// Error reported by a link implementation.
#[derive(Debug)]
pub enum LinkError {
    /// The device could not be opened.
    CannotOpen(String),
    /// The link is not open.
    NotOpen,
    /// A read from the device failed.
    Read(String),
    /// A write to the device failed or was incomplete.
    Write(String),
}

impl core::fmt::Display for LinkError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            LinkError::CannotOpen(e) => write!(f, "cannot open port: {e}"),
            LinkError::NotOpen => write!(f, "port is not open"),
            LinkError::Read(e) => write!(f, "read failed: {e}"),
            LinkError::Write(e) => write!(f, "write failed: {e}"),
        }
    }
}

impl std::error::Error for LinkError {}

/// Generic abstraction for `xpressnet` link implementations
///
/// The driver owns no I/O resources itself; the application constructs a link and hands it to
/// every [`poll()`][`crate::driver::XpressNet::poll`] call.  All methods must be non-blocking:
/// [`read()`][`Link::read`] returns the bytes currently available (possibly zero) and
/// [`write()`][`Link::write`] must not wait for the transmission to complete.
pub trait Link {
    /// Open the underlying device.
    fn open(&mut self) -> Result<(), LinkError>;

    /// Close the underlying device.  Closing an already-closed link is a no-op.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Read available bytes into `buf` without blocking.  Returns the number of bytes read; zero
    /// when nothing is pending.  Reads may be chunked arbitrarily.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError>;

    /// Write all of `data` to the device.
    fn write(&mut self, data: &[u8]) -> Result<(), LinkError>;
}
