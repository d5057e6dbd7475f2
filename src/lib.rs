//! # `xpressnet` - an XpressNET command station communication stack
//!
//! _xpressnet_ lets a host process drive a model-railway command station over the XpressNET wire
//! protocol, carried across a serial link (RS-232, USB-serial, or an Ethernet-tunnelled serial
//! stream).  It is structured in layers:
//!
//! - The [`link`] module abstracts the serial transports to the LI adapter.
//! - The [`frame`] module splits the byte stream into XOR-checksummed packets.
//! - The [`commands`] module is the catalogue of requests the driver can issue.
//! - The [`driver`] module implements the command flow: queueing, conflict handling, send pacing,
//!   timeouts with bounded resend, and the matching of station replies back to requests.
//!
//! Issue a command with an `ok` and an `err` callback; exactly one of them is guaranteed to fire,
//! based on the reply from the command station or the LI.  Asynchronous notifications (track
//! status, stolen locomotives, feedback inputs, log records) arrive through the
//! [`driver::XnEvents`] sink.
//!
//! # Example
//! ```no_run
//! use xpressnet::{driver, link, time, LiType};
//!
//! // Initialize the driver and the serial link:
//! // ==========================================
//! let mut xn = driver::XpressNet::new(driver::Config::default());
//! let mut link = link::SerialPortLink::new("/dev/ttyUSB0", 19200, link::FlowControl::Hardware);
//!
//! // Connect; the opening handshake runs in the background:
//! // ======================================================
//! xn.connect(time::Instant::now(), &mut link, LiType::Li101, &mut ())
//!     .expect("cannot open port");
//!
//! // Issue a command:
//! // ================
//! xn.set_trk_status(
//!     xpressnet::TrkStatus::On,
//!     || println!("track is on"),
//!     || eprintln!("no response"),
//! )
//! .unwrap();
//!
//! // Main Poll Cycle
//! // ===============
//! loop {
//!     let now = time::Instant::now();
//!     xn.poll(now, &mut link, &mut ());
//!     std::thread::sleep(std::time::Duration::from_millis(10));
//! }
//! ```

pub mod addr;
pub mod commands;
pub mod driver;
pub mod frame;
pub mod link;
pub mod prefs;
pub mod time;

#[cfg(test)]
pub mod test_utils;

pub use addr::LocoAddr;
pub use driver::{Config, LocoInfo, XnEvents, XpressNet};

/// Type of the LI adapter between the host and the command station bus.
///
/// The choice governs framing (LI-USB-Ethernet wraps every frame in an envelope marker) and
/// acknowledgement behavior (uLI and LI-USB-Ethernet confirm accessory operation requests
/// themselves).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum LiType {
    Li100,
    Li101,
    Uli,
    LiUsbEth,
}

impl LiType {
    /// Interface name as used in preference stores.
    pub fn name(self) -> &'static str {
        match self {
            LiType::Li100 => "LI100",
            LiType::Li101 => "LI101",
            LiType::Uli => "uLI",
            LiType::LiUsbEth => "LI-USB-Ethernet",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "LI100" => Some(LiType::Li100),
            "LI101" => Some(LiType::Li101),
            "uLI" => Some(LiType::Uli),
            "LI-USB-Ethernet" => Some(LiType::LiUsbEth),
            _ => None,
        }
    }
}

/// Track power status derived from station reports.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum TrkStatus {
    /// Nothing heard from the command station yet (initial, and after disconnect).
    Unknown = 0,
    Off = 1,
    On = 2,
    Programming = 3,
}

/// Verbosity of driver logging, from nothing up to raw wire bytes.
///
/// The driver compares each record against its configured level before emitting it through
/// [`XnEvents::on_log`]; records above the level are dropped.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
#[repr(u8)]
pub enum LogLevel {
    None = 0,
    Error = 1,
    Warning = 2,
    Info = 3,
    Commands = 4,
    RawData = 5,
    Debug = 6,
}

impl LogLevel {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(LogLevel::None),
            1 => Some(LogLevel::Error),
            2 => Some(LogLevel::Warning),
            3 => Some(LogLevel::Info),
            4 => Some(LogLevel::Commands),
            5 => Some(LogLevel::RawData),
            6 => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

/// Return codes of the shared-library facade re-exporting this driver to host applications.
///
/// Successful calls return `0`.
pub mod codes {
    pub const TRK_FILE_CANNOT_ACCESS: i32 = 1010;
    pub const TRK_FILE_DEVICE_OPENED: i32 = 1011;
    pub const TRK_ALREADY_OPENNED: i32 = 2001;
    pub const TRK_CANNOT_OPEN_PORT: i32 = 2002;
    pub const TRK_NOT_OPENED: i32 = 2011;
    pub const TRK_UNSUPPORTED_API_VERSION: i32 = 4000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn li_type_names_roundtrip() {
        for li in [LiType::Li100, LiType::Li101, LiType::Uli, LiType::LiUsbEth] {
            assert_eq!(LiType::from_name(li.name()), Some(li));
        }
        assert_eq!(LiType::from_name("LI999"), None);
    }

    #[test]
    fn log_levels_are_ordered() {
        assert!(LogLevel::Error < LogLevel::Warning);
        assert!(LogLevel::Commands < LogLevel::RawData);
        assert!(LogLevel::None < LogLevel::Error);
        assert_eq!(LogLevel::from_code(4), Some(LogLevel::Commands));
        assert_eq!(LogLevel::from_code(7), None);
    }
}
