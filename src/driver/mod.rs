//! Driver - the XpressNET command-flow engine
//!
//! The driver is a single-threaded cooperative state machine.  It owns no I/O resources and never
//! reads the clock; the application constructs a [`Link`] and calls
//! [`poll()`][`XpressNet::poll`] from its own loop, passing the current monotonic time.  Every
//! poll processes inbound bytes, scans the pending queue for expired deadlines and pushes queued
//! commands onto the wire when admission and pacing rules allow.
//!
//! Commands are handed in through the facade methods (see [`XpressNet::set_trk_status`] and
//! friends).  Each accepted command ends in exactly one `ok` or one `err` callback invocation.
//!
//! # Example
//! ```no_run
//! use xpressnet::{driver, link, LiType};
//!
//! let mut xn = driver::XpressNet::new(driver::Config::default());
//! let mut link = link::SerialPortLink::new("/dev/ttyUSB0", 19200, link::FlowControl::Hardware);
//!
//! xn.connect(xpressnet::time::Instant::now(), &mut link, LiType::Li101, &mut ())
//!     .expect("cannot open port");
//!
//! loop {
//!     let now = xpressnet::time::Instant::now();
//!     xn.poll(now, &mut link, &mut ());
//!     std::thread::sleep(std::time::Duration::from_millis(10));
//! }
//! ```

use std::collections::VecDeque;

use crate::addr::LocoAddr;
use crate::commands::{Command, Direction};
use crate::frame::Deframer;
use crate::link::{Link, LinkError};
use crate::time::{Duration, Instant};
use crate::{LiType, LogLevel, TrkStatus};

mod api;
mod pending;
mod receive;
mod send;


pub(crate) use pending::{ErrAction, OkAction, OpeningStage, PartialLocoInfo, PendingItem};

pub const OUT_INTERVAL_DEFAULT: Duration = Duration::from_millis(50);
pub const OUT_INTERVAL_MIN: Duration = Duration::from_millis(50);
pub const OUT_INTERVAL_MAX: Duration = Duration::from_millis(500);
pub const PENDING_TIMEOUT_DEFAULT: Duration = Duration::from_millis(1000);
pub const PENDING_PROG_TIMEOUT_DEFAULT: Duration = Duration::from_millis(10000);
pub const MAX_ATTEMPTS_DEFAULT: u8 = 3;
pub const INPUT_IDLE_TIMEOUT_DEFAULT: Duration = Duration::from_millis(300);
pub const MAX_PENDING_DEFAULT: usize = 3;

/// Driver configuration
///
/// All values have working defaults; use [`XpressNet::set_config`] to change them at runtime.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Config {
    /// Minimum interval between two consecutive link writes.
    pub out_interval: Duration,
    /// Deadline for a normal command's reply.
    pub pending_timeout: Duration,
    /// Deadline for service-mode CV commands (programming mode is slow).
    pub pending_prog_timeout: Duration,
    /// Send attempts (including the first) before a command fails.
    pub max_attempts: u8,
    /// Inbound bytes older than this are considered a stale partial frame.
    pub input_idle_timeout: Duration,
    /// Maximum number of unacknowledged commands in flight.
    pub max_pending: usize,
    /// Only log records at most this severe are emitted through the events sink.
    pub log_level: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            out_interval: OUT_INTERVAL_DEFAULT,
            pending_timeout: PENDING_TIMEOUT_DEFAULT,
            pending_prog_timeout: PENDING_PROG_TIMEOUT_DEFAULT,
            max_attempts: MAX_ATTEMPTS_DEFAULT,
            input_idle_timeout: INPUT_IDLE_TIMEOUT_DEFAULT,
            max_pending: MAX_PENDING_DEFAULT,
            log_level: LogLevel::None,
        }
    }
}

/// Error raised by [`XpressNet::set_config`] for values outside their permitted range.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ConfigError {
    OutIntervalRange(Duration),
    MaxAttemptsZero,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            ConfigError::OutIntervalRange(v) => write!(
                f,
                "out_interval {v} outside permitted range {OUT_INTERVAL_MIN}..{OUT_INTERVAL_MAX}"
            ),
            ConfigError::MaxAttemptsZero => write!(f, "max_attempts must be at least 1"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Error raised by [`XpressNet::connect`].
#[derive(Debug)]
pub enum ConnectError {
    AlreadyOpen,
    CannotOpenPort(LinkError),
}

impl core::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            ConnectError::AlreadyOpen => write!(f, "device is already open"),
            ConnectError::CannotOpenPort(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ConnectError {}

/// Error raised by [`XpressNet::disconnect`].
#[derive(Debug, PartialEq, Eq)]
pub enum DisconnectError {
    NotOpen,
}

impl core::fmt::Display for DisconnectError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "device is not open")
    }
}

impl std::error::Error for DisconnectError {}

/// Validation error raised by the facade before any wire traffic happens.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CommandError {
    InvalidTrkStatus(TrkStatus),
    InvalidSpeed(u8),
    InvalidCv(u16),
    InvalidBit(u8),
    InvalidPort(u16),
}

impl core::fmt::Display for CommandError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            CommandError::InvalidTrkStatus(s) => write!(f, "track status {s:?} cannot be set"),
            CommandError::InvalidSpeed(s) => write!(f, "speed {s} out of range"),
            CommandError::InvalidCv(cv) => write!(f, "CV {cv} out of range"),
            CommandError::InvalidBit(b) => write!(f, "bit index {b} out of range"),
            CommandError::InvalidPort(p) => write!(f, "accessory port {p} out of range"),
        }
    }
}

impl std::error::Error for CommandError {}

/// Kind of device reporting on a feedback input.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum FeedbackType {
    AccWithoutFb = 0,
    AccWithFb = 1,
    Fb = 2,
    Reserved = 3,
}

impl FeedbackType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => FeedbackType::AccWithoutFb,
            1 => FeedbackType::AccWithFb,
            2 => FeedbackType::Fb,
            _ => FeedbackType::Reserved,
        }
    }
}

/// State nibble of a feedback group: four track inputs.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct AccInputsState(pub u8);

impl AccInputsState {
    pub fn input(self, i: u8) -> bool {
        debug_assert!(i < 4);
        self.0 & (1 << i) != 0
    }
}

/// Everything the driver knows about a locomotive after acquiring it.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct LocoInfo {
    pub addr: LocoAddr,
    pub direction: Direction,
    /// Speed normalized to the 28-step scale.
    pub speed: u8,
    pub max_speed: u8,
    /// Function states F0-F28 as a bitmap, `b0` = F0.
    pub functions: u32,
    pub used_by_another: bool,
}

/// Event sink for driver notifications.
///
/// All methods run on the thread driving [`XpressNet::poll`] and must not block.  Every method
/// has a no-op default, so implementations only override what they care about.  `()` implements
/// the trait and can be passed where no events are needed.
#[allow(unused_variables)]
pub trait XnEvents {
    /// The driver is about to open the link.
    fn before_open(&mut self) {}
    /// The opening handshake completed and the first track status is known.
    fn after_open(&mut self) {}
    /// The driver is about to close the link; queued commands are failed first.
    fn before_close(&mut self) {}
    /// The link is closed.
    fn after_close(&mut self) {}
    /// A log record passed the configured level filter.
    fn on_log(&mut self, level: LogLevel, msg: &str) {}
    /// The derived track status changed.
    fn on_trk_status_changed(&mut self, status: TrkStatus) {}
    /// Another throttle took control of a locomotive.
    fn on_loco_stolen(&mut self, addr: LocoAddr) {}
    /// A feedback module reported the state of an input group.
    fn on_acc_input_changed(
        &mut self,
        group: u8,
        nibble: bool,
        error: bool,
        input_type: FeedbackType,
        state: AccInputsState,
    ) {
    }
    /// A background failure that is not tied to a single command.
    fn on_error(&mut self, msg: &str) {}
}

/// A sort of placeholder when no event sink is used.
impl XnEvents for () {}

/// The XpressNET driver.
///
/// See the [module documentation][`crate::driver`] for the polling contract.
pub struct XpressNet {
    config: Config,
    li_type: LiType,
    connected: bool,
    opening: bool,
    trk_status: TrkStatus,
    deframer: Deframer,
    pending: VecDeque<PendingItem>,
    outgoing: VecDeque<PendingItem>,
    last_sent: Option<Instant>,
}

impl XpressNet {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            li_type: LiType::Li101,
            connected: false,
            opening: false,
            trk_status: TrkStatus::Unknown,
            deframer: Deframer::new(LiType::Li101),
            pending: VecDeque::new(),
            outgoing: VecDeque::new(),
            last_sent: None,
        }
    }

    #[inline(always)]
    pub fn connected(&self) -> bool {
        self.connected
    }

    #[inline(always)]
    pub fn trk_status(&self) -> TrkStatus {
        self.trk_status
    }

    #[inline(always)]
    pub fn li_type(&self) -> LiType {
        self.li_type
    }

    #[inline(always)]
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn set_config(&mut self, config: Config) -> Result<(), ConfigError> {
        if config.out_interval < OUT_INTERVAL_MIN || config.out_interval > OUT_INTERVAL_MAX {
            return Err(ConfigError::OutIntervalRange(config.out_interval));
        }
        if config.max_attempts == 0 {
            return Err(ConfigError::MaxAttemptsZero);
        }
        self.config = config;
        Ok(())
    }

    pub fn set_log_level(&mut self, level: LogLevel) {
        self.config.log_level = level;
    }

    /// Open the link and start the opening handshake.
    ///
    /// `after_open` fires later, once the handshake has produced the first track status report.
    pub fn connect<L: Link, E: XnEvents>(
        &mut self,
        now: Instant,
        link: &mut L,
        li_type: LiType,
        events: &mut E,
    ) -> Result<(), ConnectError> {
        if self.connected {
            return Err(ConnectError::AlreadyOpen);
        }

        events.before_open();
        self.li_type = li_type;
        self.log(events, LogLevel::Info, "Connecting...");

        if let Err(e) = link.open() {
            self.log(events, LogLevel::Error, &format!("Open failed: {e}"));
            events.after_close();
            return Err(ConnectError::CannotOpenPort(e));
        }

        self.connected = true;
        self.opening = true;
        self.trk_status = TrkStatus::Unknown;
        self.deframer.reset(li_type);
        self.pending.clear();
        self.outgoing.clear();
        self.last_sent = None;
        self.log(events, LogLevel::Info, "Connected");

        self.enqueue(
            Command::GetLiVersion,
            OkAction::Opening(OpeningStage::LiVersion),
            ErrAction::Opening(OpeningStage::LiVersion),
        );
        self.pump_outgoing(now, link, events);
        Ok(())
    }

    /// Close the link.  Every queued command's `err` callback fires before `after_close`.
    pub fn disconnect<L: Link, E: XnEvents>(
        &mut self,
        now: Instant,
        link: &mut L,
        events: &mut E,
    ) -> Result<(), DisconnectError> {
        if !self.connected {
            return Err(DisconnectError::NotOpen);
        }
        self.close_now(now, link, events);
        Ok(())
    }

    /// Drive the engine: read and match inbound frames, scan deadlines, send queued commands.
    ///
    /// Call this regularly (every few tens of milliseconds) from the thread owning the driver.
    pub fn poll<L: Link, E: XnEvents>(&mut self, now: Instant, link: &mut L, events: &mut E) {
        if !self.connected {
            return;
        }

        if !link.is_open() {
            // The device disappeared underneath us.
            self.log(events, LogLevel::Error, "Link closed unexpectedly");
            events.on_error("link closed unexpectedly");
            self.close_now(now, link, events);
            return;
        }

        self.handle_input(now, link, events);
        self.check_pending(now, link, events);
        self.pump_outgoing(now, link, events);
    }

    /// uLI and LI-USB-Ethernet confirm accessory operation requests themselves; the classic
    /// LI100/LI101 pass them on silently.
    pub(crate) fn li_acknowledges_acc_op(&self) -> bool {
        matches!(self.li_type, LiType::Uli | LiType::LiUsbEth)
    }

    pub(crate) fn log<E: XnEvents>(&self, events: &mut E, level: LogLevel, msg: &str) {
        if level != LogLevel::None && level <= self.config.log_level {
            events.on_log(level, msg);
        }
    }

    pub(crate) fn update_trk_status<E: XnEvents>(&mut self, events: &mut E, status: TrkStatus) {
        if self.trk_status == status {
            return;
        }
        self.trk_status = status;
        events.on_trk_status_changed(status);
        if self.opening {
            self.opening = false;
            events.after_open();
        }
    }

    /// Tear the connection down: fail queued commands, reset the track status, close the link.
    pub(crate) fn close_now<L: Link, E: XnEvents>(
        &mut self,
        now: Instant,
        link: &mut L,
        events: &mut E,
    ) {
        if !self.connected {
            return;
        }
        events.before_close();
        self.log(events, LogLevel::Info, "Disconnecting...");
        self.connected = false;
        self.opening = false;
        self.drain_queues(now, link, events);
        self.trk_status_reset(events);
        link.close();
        self.deframer.reset(self.li_type);
        self.log(events, LogLevel::Info, "Disconnected");
        events.after_close();
    }

    fn trk_status_reset<E: XnEvents>(&mut self, events: &mut E) {
        if self.trk_status != TrkStatus::Unknown {
            self.trk_status = TrkStatus::Unknown;
            events.on_trk_status_changed(TrkStatus::Unknown);
        }
    }

    /// Continue the opening handshake after a stage completed.
    pub(crate) fn opening_ok(&mut self, stage: OpeningStage) {
        if !self.connected || !self.opening {
            return;
        }
        match stage {
            OpeningStage::LiVersion => self.enqueue(
                Command::GetLiAddress,
                OkAction::Opening(OpeningStage::LiAddress),
                ErrAction::Opening(OpeningStage::LiAddress),
            ),
            OpeningStage::LiAddress => self.enqueue(
                Command::GetCsVersion,
                OkAction::Opening(OpeningStage::CsVersion),
                ErrAction::Opening(OpeningStage::CsVersion),
            ),
            OpeningStage::CsVersion => self.enqueue(
                Command::GetCsStatus,
                OkAction::Opening(OpeningStage::CsStatus),
                ErrAction::Opening(OpeningStage::CsStatus),
            ),
            // The track status report triggers after_open.
            OpeningStage::CsStatus => (),
        }
    }

    /// Continue or abort the opening handshake after a stage failed.
    ///
    /// Missing LI address and command station version are tolerable; a dead LI or an unreadable
    /// track status is not.
    pub(crate) fn opening_err<L: Link, E: XnEvents>(
        &mut self,
        stage: OpeningStage,
        now: Instant,
        link: &mut L,
        events: &mut E,
    ) {
        match stage {
            OpeningStage::LiVersion => {
                self.log(events, LogLevel::Error, "Get LI Version: no response!");
                if self.connected {
                    events.on_error("Get LI Version: no response!");
                    self.close_now(now, link, events);
                }
            }
            OpeningStage::LiAddress => {
                self.log(
                    events,
                    LogLevel::Warning,
                    "Unable to get LI address, ignoring!",
                );
                if self.connected && self.opening {
                    self.enqueue(
                        Command::GetCsVersion,
                        OkAction::Opening(OpeningStage::CsVersion),
                        ErrAction::Opening(OpeningStage::CsVersion),
                    );
                }
            }
            OpeningStage::CsVersion => {
                self.log(
                    events,
                    LogLevel::Warning,
                    "Command station version not received, ignoring!",
                );
                if self.connected && self.opening {
                    self.enqueue(
                        Command::GetCsStatus,
                        OkAction::Opening(OpeningStage::CsStatus),
                        ErrAction::Opening(OpeningStage::CsStatus),
                    );
                }
            }
            OpeningStage::CsStatus => {
                self.log(events, LogLevel::Error, "Get CS Status: no response!");
                if self.connected {
                    events.on_error("Get CS Status: no response!");
                    self.close_now(now, link, events);
                }
            }
        }
    }
}
