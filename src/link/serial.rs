use std::borrow::Cow;
use std::io::{Read, Write};

use super::{FlowControl, Link, LinkError};
use crate::LiType;

/// Platform-independent link implementation for serial port devices
///
/// Available with the `link-serial` feature.
///
/// This link implementation covers the classic LI100/LI101 RS-232 adapters, the uLI USB adapter
/// and Ethernet-tunnelled serial streams exposed as virtual COM ports.
///
/// USB-serial converters introduce noticeable latency into the communication path.  Particularly
/// FT232-based devices come with a 16ms latency by default unless explicitly configured for
/// low-latency operation; on Linux this implementation requests the low-latency mode itself.
/// Keep the driver's `out_interval` at its default or higher when your adapter buffers
/// aggressively.
///
/// # Example
/// ```no_run
/// use xpressnet::link::{FlowControl, SerialPortLink};
///
/// let mut link = SerialPortLink::new("/dev/ttyUSB0", 19200, FlowControl::Hardware);
/// ```
pub struct SerialPortLink {
    path: String,
    baud_rate: u32,
    flow_control: FlowControl,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialPortLink {
    pub fn new<'a, P: Into<Cow<'a, str>>>(path: P, baud_rate: u32, flow_control: FlowControl) -> Self {
        Self {
            path: path.into().into_owned(),
            baud_rate,
            flow_control,
            port: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Link for SerialPortLink {
    fn open(&mut self) -> Result<(), LinkError> {
        let flow = match self.flow_control {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
            FlowControl::Software => serialport::FlowControl::Software,
        };

        #[allow(unused_mut)]
        let mut port = serialport::new(self.path.as_str(), self.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(flow)
            .timeout(std::time::Duration::from_millis(10))
            .open_native()
            .map_err(|e| LinkError::CannotOpen(e.to_string()))?;

        #[cfg(target_os = "linux")]
        if let Err(e) = serialport_low_latency::enable_low_latency(&mut port) {
            log::warn!("Could not enable low-latency mode on {}: {}", self.path, e);
        }

        self.port = Some(Box::new(port));
        Ok(())
    }

    fn close(&mut self) {
        self.port = None;
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        let port = self.port.as_mut().ok_or(LinkError::NotOpen)?;
        let pending = port
            .bytes_to_read()
            .map_err(|e| LinkError::Read(e.to_string()))?;
        if pending == 0 {
            return Ok(0);
        }
        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(LinkError::Read(e.to_string())),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<(), LinkError> {
        let port = self.port.as_mut().ok_or(LinkError::NotOpen)?;
        port.write_all(data)
            .map_err(|e| LinkError::Write(e.to_string()))
    }
}

/// List serial ports suitable for the given interface type.
///
/// For [`LiType::Uli`] only ports whose USB product string starts with `uLI` are returned; for
/// all other interface types every known serial port is a candidate.
pub fn available_ports(li_type: LiType) -> Result<Vec<serialport::SerialPortInfo>, LinkError> {
    let ports = serialport::available_ports().map_err(|e| LinkError::Read(e.to_string()))?;
    Ok(ports
        .into_iter()
        .filter(|p| {
            if li_type != LiType::Uli {
                return true;
            }
            match &p.port_type {
                serialport::SerialPortType::UsbPort(usb) => usb
                    .product
                    .as_deref()
                    .map(|product| product.starts_with("uLI"))
                    .unwrap_or(false),
                _ => false,
            }
        })
        .collect())
}
