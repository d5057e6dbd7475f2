//! Preferences collaborator
//!
//! Host applications keep the connection parameters in a keyed preference store.  The driver does
//! not persist anything itself; it only reads the `XN` group through the [`Preferences`] trait
//! and resolves it into a [`ConnectionSettings`] value.
//!
//! Recognized keys in group `XN`:
//!
//! | key | meaning | default |
//! |---|---|---|
//! | `interface` | `LI100` / `LI101` / `uLI` / `LI-USB-Ethernet` | `LI101` |
//! | `port` | device path, or `auto` to autodetect a single uLI | `/dev/ttyUSB0` |
//! | `baudrate` | serial baud rate | `19200` |
//! | `flowcontrol` | `0` none, `1` hardware, `2` software | `1` |
//! | `loglevel` | numeric [`LogLevel`][`crate::LogLevel`] | `1` (errors) |

use crate::link::FlowControl;
use crate::{LiType, LogLevel};

pub const GROUP: &str = "XN";

pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";
pub const DEFAULT_BAUDRATE: u32 = 19200;

/// A keyed preference store, grouped like an INI file.
pub trait Preferences {
    fn get(&self, group: &str, key: &str) -> Option<String>;
}

/// Error resolving connection settings from a preference store.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum PrefsError {
    UnsupportedInterface(String),
    InvalidValue { key: &'static str, value: String },
    /// `port = auto`, but no uLI device is attached.
    NoUliFound,
    /// `port = auto`, but the choice of uLI device is ambiguous.
    MultipleUliFound(usize),
    /// `port = auto` requires the `link-serial` feature.
    AutoDetectUnavailable,
}

impl core::fmt::Display for PrefsError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            PrefsError::UnsupportedInterface(name) => {
                write!(f, "unsupported interface type: {name}")
            }
            PrefsError::InvalidValue { key, value } => {
                write!(f, "invalid value for {GROUP}/{key}: {value}")
            }
            PrefsError::NoUliFound => write!(f, "no uLI device found"),
            PrefsError::MultipleUliFound(n) => {
                write!(f, "{n} uLI devices found, cannot pick one automatically")
            }
            PrefsError::AutoDetectUnavailable => {
                write!(f, "port autodetection requires serial port support")
            }
        }
    }
}

impl std::error::Error for PrefsError {}

/// Connection parameters resolved from a preference store.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ConnectionSettings {
    pub li_type: LiType,
    pub port: String,
    pub baudrate: u32,
    pub flow_control: FlowControl,
    pub log_level: LogLevel,
}

impl ConnectionSettings {
    /// Read the `XN` group, filling in defaults for missing keys.
    ///
    /// The literal port value `auto` asks for autodetection of a single attached uLI device; zero
    /// or multiple candidates are an error.
    pub fn from_prefs(prefs: &dyn Preferences) -> Result<Self, PrefsError> {
        let li_type = match prefs.get(GROUP, "interface") {
            Some(name) => {
                LiType::from_name(&name).ok_or(PrefsError::UnsupportedInterface(name))?
            }
            None => LiType::Li101,
        };

        let baudrate = match prefs.get(GROUP, "baudrate") {
            Some(v) => v.parse::<u32>().map_err(|_| PrefsError::InvalidValue {
                key: "baudrate",
                value: v,
            })?,
            None => DEFAULT_BAUDRATE,
        };

        let flow_control = match prefs.get(GROUP, "flowcontrol") {
            Some(v) => v
                .parse::<u8>()
                .ok()
                .and_then(FlowControl::from_code)
                .ok_or(PrefsError::InvalidValue {
                    key: "flowcontrol",
                    value: v,
                })?,
            None => FlowControl::Hardware,
        };

        let log_level = match prefs.get(GROUP, "loglevel") {
            Some(v) => v
                .parse::<u8>()
                .ok()
                .and_then(LogLevel::from_code)
                .ok_or(PrefsError::InvalidValue {
                    key: "loglevel",
                    value: v,
                })?,
            None => LogLevel::Error,
        };

        let port = match prefs.get(GROUP, "port") {
            Some(p) if p == "auto" => autodetect_uli_port()?,
            Some(p) => p,
            None => DEFAULT_PORT.to_string(),
        };

        Ok(ConnectionSettings {
            li_type,
            port,
            baudrate,
            flow_control,
            log_level,
        })
    }
}

#[cfg(feature = "link-serial")]
fn autodetect_uli_port() -> Result<String, PrefsError> {
    let candidates =
        crate::link::available_ports(LiType::Uli).map_err(|_| PrefsError::NoUliFound)?;
    match candidates.len() {
        0 => Err(PrefsError::NoUliFound),
        1 => Ok(candidates.into_iter().next().unwrap().port_name),
        n => Err(PrefsError::MultipleUliFound(n)),
    }
}

#[cfg(not(feature = "link-serial"))]
fn autodetect_uli_port() -> Result<String, PrefsError> {
    Err(PrefsError::AutoDetectUnavailable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapPrefs(HashMap<(&'static str, &'static str), &'static str>);

    impl Preferences for MapPrefs {
        fn get(&self, group: &str, key: &str) -> Option<String> {
            self.0
                .iter()
                .find(|((g, k), _)| *g == group && *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn defaults_when_empty() {
        let prefs = MapPrefs(HashMap::new());
        let settings = ConnectionSettings::from_prefs(&prefs).unwrap();
        assert_eq!(settings.li_type, LiType::Li101);
        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.baudrate, DEFAULT_BAUDRATE);
        assert_eq!(settings.flow_control, FlowControl::Hardware);
        assert_eq!(settings.log_level, LogLevel::Error);
    }

    #[test]
    fn explicit_values() {
        let mut map = HashMap::new();
        map.insert(("XN", "interface"), "LI-USB-Ethernet");
        map.insert(("XN", "port"), "/dev/ttyS7");
        map.insert(("XN", "baudrate"), "62500");
        map.insert(("XN", "flowcontrol"), "0");
        map.insert(("XN", "loglevel"), "5");
        let settings = ConnectionSettings::from_prefs(&MapPrefs(map)).unwrap();
        assert_eq!(settings.li_type, LiType::LiUsbEth);
        assert_eq!(settings.port, "/dev/ttyS7");
        assert_eq!(settings.baudrate, 62500);
        assert_eq!(settings.flow_control, FlowControl::None);
        assert_eq!(settings.log_level, LogLevel::RawData);
    }

    #[test]
    fn unknown_interface_is_rejected() {
        let mut map = HashMap::new();
        map.insert(("XN", "interface"), "LI999");
        assert_eq!(
            ConnectionSettings::from_prefs(&MapPrefs(map)),
            Err(PrefsError::UnsupportedInterface("LI999".to_string()))
        );
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let mut map = HashMap::new();
        map.insert(("XN", "baudrate"), "fast");
        assert!(matches!(
            ConnectionSettings::from_prefs(&MapPrefs(map)),
            Err(PrefsError::InvalidValue { key: "baudrate", .. })
        ));

        let mut map = HashMap::new();
        map.insert(("XN", "loglevel"), "9");
        assert!(matches!(
            ConnectionSettings::from_prefs(&MapPrefs(map)),
            Err(PrefsError::InvalidValue { key: "loglevel", .. })
        ));
    }
}
