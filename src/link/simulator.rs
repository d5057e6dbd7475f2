//! Simulated link implementation for `xpressnet` testing with a scripted command station.

use std::collections::VecDeque;

use super::{Link, LinkError};

/// Simulated link for driving the stack in tests.
///
/// Available with the `link-simulator` feature.
///
/// The test owns the link and plays the command station: bytes pushed with
/// [`push_inbound()`][`SimulatorLink::push_inbound`] are what the driver will read on its next
/// poll, and everything the driver wrote since the last call is returned by
/// [`take_written()`][`SimulatorLink::take_written`].
#[derive(Debug, Default)]
pub struct SimulatorLink {
    open: bool,
    fail_open: bool,
    fail_writes: bool,
    inbound: VecDeque<u8>,
    written: Vec<u8>,
}

impl SimulatorLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes for the driver to receive.
    pub fn push_inbound(&mut self, data: &[u8]) {
        self.inbound.extend(data);
    }

    /// Take everything the driver has written so far.
    pub fn take_written(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.written)
    }

    /// Make the next [`open()`][`Link::open`] call fail.
    pub fn set_fail_open(&mut self, fail: bool) {
        self.fail_open = fail;
    }

    /// Make subsequent [`write()`][`Link::write`] calls fail.
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Drop the connection without going through the driver, as an unplugged cable would.
    pub fn drop_connection(&mut self) {
        self.open = false;
        self.inbound.clear();
    }
}

impl Link for SimulatorLink {
    fn open(&mut self) -> Result<(), LinkError> {
        if self.fail_open {
            return Err(LinkError::CannotOpen("simulated open failure".to_string()));
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
        self.inbound.clear();
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        if !self.open {
            return Err(LinkError::NotOpen);
        }
        let mut n = 0;
        while n < buf.len() {
            match self.inbound.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), LinkError> {
        if !self.open {
            return Err(LinkError::NotOpen);
        }
        if self.fail_writes {
            return Err(LinkError::Write("simulated write failure".to_string()));
        }
        log::trace!("SIM TX {data:02X?}");
        self.written.extend_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulator_roundtrip() {
        let mut link = SimulatorLink::new();
        link.open().unwrap();
        link.push_inbound(&[0x61, 0x01, 0x60]);

        let mut buf = [0u8; 2];
        assert_eq!(link.read(&mut buf).unwrap(), 2);
        assert_eq!(buf, [0x61, 0x01]);
        assert_eq!(link.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 0x60);
        assert_eq!(link.read(&mut buf).unwrap(), 0);

        link.write(&[0x21, 0x81, 0xA0]).unwrap();
        assert_eq!(link.take_written(), vec![0x21, 0x81, 0xA0]);
        assert!(link.take_written().is_empty());
    }
}
