//! XpressNET command catalogue
//!
//! Every request the driver can put on the wire is a variant of [`Command`].  A variant knows its
//! wire encoding ([`bytes()`][`Command::bytes`]), a log description
//! ([`describe()`][`Command::describe`]) and whether it conflicts with another in-flight request
//! ([`conflicts()`][`Command::conflicts`]).  The response matcher branches on the variants
//! directly, so there is no dynamic dispatch anywhere in the send or receive path.

use crate::addr::LocoAddr;

/// Travel direction of a locomotive.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Direction {
    Backward,
    Forward,
}

impl Direction {
    pub fn to_bit(self) -> u8 {
        match self {
            Direction::Backward => 0,
            Direction::Forward => 1,
        }
    }

    pub fn from_bit(bit: u8) -> Self {
        if bit == 0 {
            Direction::Backward
        } else {
            Direction::Forward
        }
    }
}

/// Functions F0-F4.  F0 sits at bit 4, F1-F4 at bits 0-3.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct FuncA(pub u8);

impl FuncA {
    /// Extract F0-F4 from a `b0..b28` function bitmap.
    pub fn from_bitmap(map: u32) -> Self {
        let mut fa = 0u8;
        if map & (1 << 0) != 0 {
            fa |= 1 << 4;
        }
        for f in 1..=4 {
            if map & (1u32 << f) != 0 {
                fa |= 1 << (f - 1);
            }
        }
        FuncA(fa)
    }

    pub fn to_bitmap(self) -> u32 {
        let mut map = 0u32;
        if self.0 & (1 << 4) != 0 {
            map |= 1 << 0;
        }
        for f in 1..=4u32 {
            if self.0 & (1 << (f - 1)) != 0 {
                map |= 1 << f;
            }
        }
        map
    }
}

/// Functions F5-F12, packed linearly with F5 at bit 0.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct FuncB(pub u8);

impl FuncB {
    pub fn from_bitmap(map: u32) -> Self {
        FuncB(((map >> 5) & 0xFF) as u8)
    }

    pub fn to_bitmap(self) -> u32 {
        u32::from(self.0) << 5
    }
}

/// Functions F13-F20, packed linearly with F13 at bit 0.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct FuncC(pub u8);

impl FuncC {
    pub fn from_bitmap(map: u32) -> Self {
        FuncC(((map >> 13) & 0xFF) as u8)
    }

    pub fn to_bitmap(self) -> u32 {
        u32::from(self.0) << 13
    }
}

/// Functions F21-F28, packed linearly with F21 at bit 0.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct FuncD(pub u8);

impl FuncD {
    pub fn from_bitmap(map: u32) -> Self {
        FuncD(((map >> 21) & 0xFF) as u8)
    }

    pub fn to_bitmap(self) -> u32 {
        u32::from(self.0) << 21
    }
}

/// Which half of the F5-F12 bank a [`Command::SetFuncB`] transmits.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum FuncRange {
    F5ToF8,
    F9ToF12,
}

/// Result status of a service-mode CV access.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum ReadCvStatus {
    Ok = 0x14,
    ShortCircuit = 0x12,
    DataByteNotFound = 0x13,
    CsBusy = 0x1F,
    CsReady = 0x11,
}

impl ReadCvStatus {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x14 => Some(ReadCvStatus::Ok),
            0x12 => Some(ReadCvStatus::ShortCircuit),
            0x13 => Some(ReadCvStatus::DataByteNotFound),
            0x1F => Some(ReadCvStatus::CsBusy),
            0x11 => Some(ReadCvStatus::CsReady),
            _ => None,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            ReadCvStatus::Ok => "Ok",
            ReadCvStatus::ShortCircuit => "Short Circuit",
            ReadCvStatus::DataByteNotFound => "Data Byte Not Found",
            ReadCvStatus::CsBusy => "Command station busy",
            ReadCvStatus::CsReady => "Command station ready",
        }
    }
}

/// A request to the command station or the LI.
///
/// CV numbers in `PomWriteCv`/`PomWriteBit` must lie in `1..=1024`; `speed` in `SetSpeedDir` must
/// be at most 28; `port` in `AccOpRequest` at most 2047.  The driver facade validates these before
/// constructing a variant.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Command {
    TrackOff,
    TrackOn,
    EmergencyStopAll,
    EmergencyStopLoco { addr: LocoAddr },
    GetLiVersion,
    GetLiAddress,
    SetLiAddress { addr: u8 },
    GetCsVersion,
    GetCsStatus,
    PomWriteCv { addr: LocoAddr, cv: u16, value: u8 },
    PomWriteBit { addr: LocoAddr, cv: u16, bit: u8, value: bool },
    ReadDirectCv { cv: u8 },
    WriteDirectCv { cv: u8, value: u8 },
    RequestReadResult { cv: u8 },
    RequestWriteResult { cv: u8, value: u8 },
    GetLocoInfo { addr: LocoAddr },
    GetLocoFunc1328 { addr: LocoAddr },
    SetSpeedDir { addr: LocoAddr, speed: u8, dir: Direction },
    SetFuncA { addr: LocoAddr, fa: FuncA },
    SetFuncB { addr: LocoAddr, fb: FuncB, range: FuncRange },
    SetFuncC { addr: LocoAddr, fc: FuncC },
    SetFuncD { addr: LocoAddr, fd: FuncD },
    AccInfoRequest { group: u8, nibble: bool },
    AccOpRequest { port: u16, state: bool },
}

impl Command {
    /// Wire octets of this request, without checksum or envelope (the framer adds those).
    pub fn bytes(&self) -> Vec<u8> {
        match *self {
            Command::TrackOff => vec![0x21, 0x80],
            Command::TrackOn => vec![0x21, 0x81],
            Command::EmergencyStopAll => vec![0x80],
            Command::EmergencyStopLoco { addr } => vec![0x92, addr.hi(), addr.lo()],
            Command::GetLiVersion => vec![0xF0],
            Command::GetLiAddress => vec![0xF2, 0x01, 0x00],
            Command::SetLiAddress { addr } => vec![0xF2, 0x01, addr],
            Command::GetCsVersion => vec![0x21, 0x21],
            Command::GetCsStatus => vec![0x21, 0x24],
            Command::PomWriteCv { addr, cv, value } => vec![
                0xE6,
                0x30,
                addr.hi(),
                addr.lo(),
                0xEC + (((cv - 1) >> 8) & 0x03) as u8,
                ((cv - 1) & 0xFF) as u8,
                value,
            ],
            Command::PomWriteBit {
                addr,
                cv,
                bit,
                value,
            } => vec![
                0xE6,
                0x30,
                addr.hi(),
                addr.lo(),
                0xE8 + (((cv - 1) >> 8) & 0x03) as u8,
                ((cv - 1) & 0xFF) as u8,
                0xF0 + ((value as u8) << 3) + bit,
            ],
            Command::ReadDirectCv { cv } => vec![0x22, 0x15, cv],
            Command::WriteDirectCv { cv, value } => vec![0x23, 0x16, cv, value],
            Command::RequestReadResult { .. } => vec![0x21, 0x10],
            Command::RequestWriteResult { .. } => vec![0x21, 0x10],
            Command::GetLocoInfo { addr } => vec![0xE3, 0x00, addr.hi(), addr.lo()],
            Command::GetLocoFunc1328 { addr } => vec![0xE3, 0x09, addr.hi(), addr.lo()],
            Command::SetSpeedDir { addr, speed, dir } => {
                let sp = if speed > 0 { u16::from(speed) + 3 } else { 0 };
                vec![
                    0xE4,
                    0x12,
                    addr.hi(),
                    addr.lo(),
                    (dir.to_bit() << 7) | (((sp >> 1) & 0x0F) as u8) | (((sp & 0x1) << 4) as u8),
                ]
            }
            Command::SetFuncA { addr, fa } => vec![0xE4, 0x20, addr.hi(), addr.lo(), fa.0],
            Command::SetFuncB { addr, fb, range } => match range {
                FuncRange::F5ToF8 => vec![0xE4, 0x21, addr.hi(), addr.lo(), fb.0 & 0x0F],
                FuncRange::F9ToF12 => vec![0xE4, 0x22, addr.hi(), addr.lo(), fb.0 >> 4],
            },
            Command::SetFuncC { addr, fc } => vec![0xE4, 0x23, addr.hi(), addr.lo(), fc.0],
            Command::SetFuncD { addr, fd } => vec![0xE4, 0x28, addr.hi(), addr.lo(), fd.0],
            Command::AccInfoRequest { group, nibble } => {
                vec![0x42, group, 0x80 + nibble as u8]
            }
            Command::AccOpRequest { port, state } => vec![
                0x52,
                (port >> 3) as u8,
                0x80 + ((port & 0x7) as u8) + ((state as u8) << 3),
            ],
        }
    }

    /// Human-readable description for the command log.
    pub fn describe(&self) -> String {
        match *self {
            Command::TrackOff => "Track Off".to_string(),
            Command::TrackOn => "Track On".to_string(),
            Command::EmergencyStopAll => "All Loco Emergency Stop".to_string(),
            Command::EmergencyStopLoco { addr } => {
                format!("Single Loco Emergency Stop: {addr}")
            }
            Command::GetLiVersion => "LI Get Version".to_string(),
            Command::GetLiAddress => "LI Get Address".to_string(),
            Command::SetLiAddress { addr } => format!("LI Set Address to {addr}"),
            Command::GetCsVersion => "Get Command station version".to_string(),
            Command::GetCsStatus => "Get Command station status".to_string(),
            Command::PomWriteCv { addr, cv, value } => {
                format!("POM Addr {addr}, CV {cv}, Value: {value}")
            }
            Command::PomWriteBit {
                addr,
                cv,
                bit,
                value,
            } => format!("POM Addr {addr}, CV {cv}, Bit: {bit}, Value: {value}"),
            Command::ReadDirectCv { cv } => format!("Direct Mode CV {cv} read request"),
            Command::WriteDirectCv { cv, value } => {
                format!("Direct Mode CV {cv} write request, Value: {value}")
            }
            Command::RequestReadResult { .. } | Command::RequestWriteResult { .. } => {
                "Request for service mode results".to_string()
            }
            Command::GetLocoInfo { addr } => format!("Get Loco Information {addr}"),
            Command::GetLocoFunc1328 { addr } => {
                format!("Get Loco Function 13-28 Status {addr}")
            }
            Command::SetSpeedDir { addr, speed, dir } => {
                format!("Loco {addr} Set Speed {speed}, Dir {}", dir.to_bit())
            }
            Command::SetFuncA { addr, fa } => {
                format!("Set loco {addr} func A (0-4): {:05b}", fa.0)
            }
            Command::SetFuncB { addr, fb, .. } => {
                format!("Set loco {addr} func B (5-12): {:08b}", fb.0)
            }
            Command::SetFuncC { addr, fc } => {
                format!("Set loco {addr} func C (13-20): {:08b}", fc.0)
            }
            Command::SetFuncD { addr, fd } => {
                format!("Set loco {addr} func D (21-28): {:08b}", fd.0)
            }
            Command::AccInfoRequest { group, nibble } => format!(
                "Accessory Decoder Information Request: group {group}, nibble: {}",
                nibble as u8
            ),
            Command::AccOpRequest { port, state } => format!(
                "Accessory Decoder Operation Request: port {port}, state: {}",
                state as u8
            ),
        }
    }

    /// Whether sending `self` and `other` without an intervening reply would be meaningless or
    /// racy.  The relation is symmetric.
    pub fn conflicts(&self, other: &Command) -> bool {
        use Command::*;
        match (self, other) {
            (TrackOn, TrackOff) | (TrackOff, TrackOn) => true,
            (SetLiAddress { .. }, SetLiAddress { .. }) => true,
            (
                PomWriteCv {
                    addr: a1, cv: c1, ..
                },
                PomWriteCv {
                    addr: a2, cv: c2, ..
                },
            ) => a1 == a2 && c1 == c2,
            (
                PomWriteBit {
                    addr: a1,
                    cv: c1,
                    bit: b1,
                    ..
                },
                PomWriteBit {
                    addr: a2,
                    cv: c2,
                    bit: b2,
                    ..
                },
            ) => a1 == a2 && c1 == c2 && b1 == b2,
            (
                PomWriteBit {
                    addr: a1, cv: c1, ..
                },
                PomWriteCv {
                    addr: a2, cv: c2, ..
                },
            )
            | (
                PomWriteCv {
                    addr: a1, cv: c1, ..
                },
                PomWriteBit {
                    addr: a2, cv: c2, ..
                },
            ) => a1 == a2 && c1 == c2,
            (SetSpeedDir { addr: a1, .. }, SetSpeedDir { addr: a2, .. }) => a1 == a2,
            (SetSpeedDir { .. }, EmergencyStopAll) | (EmergencyStopAll, SetSpeedDir { .. }) => true,
            (SetSpeedDir { addr: a1, .. }, EmergencyStopLoco { addr: a2 })
            | (EmergencyStopLoco { addr: a1 }, SetSpeedDir { addr: a2, .. }) => a1 == a2,
            (SetFuncA { addr: a1, .. }, SetFuncA { addr: a2, .. }) => a1 == a2,
            (
                SetFuncB {
                    addr: a1,
                    range: r1,
                    ..
                },
                SetFuncB {
                    addr: a2,
                    range: r2,
                    ..
                },
            ) => a1 == a2 && r1 == r2,
            (SetFuncC { addr: a1, .. }, SetFuncC { addr: a2, .. }) => a1 == a2,
            (SetFuncD { addr: a1, .. }, SetFuncD { addr: a2, .. }) => a1 == a2,
            (AccOpRequest { port: p1, .. }, AccOpRequest { port: p2, .. }) => p1 >> 1 == p2 >> 1,
            _ => false,
        }
    }

    /// Whether the LI "OK" confirmation (`01 04 05`) is a sufficient acknowledgement.
    ///
    /// False for query commands whose real answer is a subsequent data packet.
    pub fn expects_ok_on_li_ack(&self) -> bool {
        !matches!(
            self,
            Command::GetLiVersion
                | Command::GetLiAddress
                | Command::GetCsVersion
                | Command::GetCsStatus
                | Command::GetLocoInfo { .. }
                | Command::GetLocoFunc1328 { .. }
                | Command::ReadDirectCv { .. }
                | Command::WriteDirectCv { .. }
                | Command::RequestReadResult { .. }
                | Command::RequestWriteResult { .. }
                | Command::AccInfoRequest { .. }
        )
    }

    /// Service-mode commands answer only after the command station has entered programming mode,
    /// which can take seconds.  These get the long pending deadline.
    pub fn is_programming(&self) -> bool {
        matches!(
            self,
            Command::ReadDirectCv { .. }
                | Command::WriteDirectCv { .. }
                | Command::RequestReadResult { .. }
                | Command::RequestWriteResult { .. }
        )
    }
}
