//! Packet framing and deframing
//!
//! XpressNET frames are variable-length: the low nibble of the header byte encodes the payload
//! length (excluding header and checksum), and a trailing XOR over all preceding bytes closes the
//! frame.  On LI-USB-Ethernet links every frame additionally carries a two-byte envelope marker
//! (`FF FE` for data, `FF FD` for LI-side timeout/error reports).

use crate::time;
use crate::LiType;

/// Frame an outbound payload: append the XOR checksum and, on LI-USB-Ethernet links, prepend the
/// envelope marker.
pub fn encode(payload: &[u8], li_type: LiType) -> Vec<u8> {
    let mut data = Vec::with_capacity(payload.len() + 3);
    if li_type == LiType::LiUsbEth {
        data.extend_from_slice(&[0xFF, 0xFE]);
    }
    data.extend_from_slice(payload);
    let x = payload.iter().fold(0u8, |x, b| x ^ b);
    data.push(x);
    data
}

/// One deframing step result.
#[derive(Debug, PartialEq, Eq)]
pub enum DeframeResult {
    /// A complete frame with verified checksum, envelope stripped.  Includes header and XOR byte.
    Frame(Vec<u8>),
    /// A frame-sized chunk whose XOR did not come out as zero.  Exactly these bytes were dropped
    /// from the buffer.
    BadXor(Vec<u8>),
}

/// Accumulates inbound bytes and splits them into well-formed frames.
#[derive(Debug)]
pub struct Deframer {
    li_type: LiType,
    buf: Vec<u8>,
    last_rx: Option<time::Instant>,
}

impl Deframer {
    pub fn new(li_type: LiType) -> Self {
        Self {
            li_type,
            buf: Vec::new(),
            last_rx: None,
        }
    }

    pub fn reset(&mut self, li_type: LiType) {
        self.li_type = li_type;
        self.buf.clear();
        self.last_rx = None;
    }

    fn length_pos(&self) -> usize {
        if self.li_type == LiType::LiUsbEth {
            2
        } else {
            0
        }
    }

    /// Append newly received bytes.
    ///
    /// A partial frame that sat in the buffer for longer than `idle_timeout` is considered stale
    /// and discarded first.  On LI-USB-Ethernet links everything before the first envelope marker
    /// is dropped; a trailing lone `0xFF` is kept since it may be the first half of a marker split
    /// across reads.
    pub fn feed(&mut self, now: time::Instant, idle_timeout: time::Duration, data: &[u8]) {
        if let Some(last) = self.last_rx {
            if now - last > idle_timeout && !self.buf.is_empty() {
                log::debug!("Dropping {} stale input bytes", self.buf.len());
                self.buf.clear();
            }
        }
        self.buf.extend_from_slice(data);
        self.last_rx = Some(now);

        if self.li_type == LiType::LiUsbEth {
            let marker = self
                .buf
                .windows(2)
                .position(|w| w == [0xFF, 0xFE] || w == [0xFF, 0xFD]);
            match marker {
                Some(0) => (),
                Some(pos) => {
                    self.buf.drain(..pos);
                }
                None => {
                    if self.buf.last() == Some(&0xFF) {
                        self.buf.drain(..self.buf.len() - 1);
                    } else {
                        self.buf.clear();
                    }
                }
            }
        }
    }

    /// Try to extract the next frame from the buffer.
    pub fn next_frame(&mut self) -> Option<DeframeResult> {
        let lp = self.length_pos();
        if self.buf.len() <= lp {
            return None;
        }
        let length = usize::from(self.buf[lp] & 0x0F) + 2;
        if self.buf.len() < lp + length {
            return None;
        }

        let frame: Vec<u8> = self.buf[lp..lp + length].to_vec();
        self.buf.drain(..lp + length);

        let x = frame.iter().fold(0u8, |x, b| x ^ b);
        if x != 0 {
            Some(DeframeResult::BadXor(frame))
        } else {
            Some(DeframeResult::Frame(frame))
        }
    }
}

/// Format bytes the way they appear in the raw-data log: `0x61 0x01 0x60`.
pub(crate) fn hex_str(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 5);
    for (i, b) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("0x{b:02X}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{Duration, Instant};

    const IDLE: Duration = Duration::from_millis(300);

    #[test]
    fn encode_appends_xor() {
        assert_eq!(encode(&[0x21, 0x81], LiType::Li101), vec![0x21, 0x81, 0xA0]);
        assert_eq!(encode(&[0xF0], LiType::Li100), vec![0xF0, 0xF0]);
    }

    #[test]
    fn encode_eth_envelope() {
        assert_eq!(
            encode(&[0x21, 0x81], LiType::LiUsbEth),
            vec![0xFF, 0xFE, 0x21, 0x81, 0xA0]
        );
    }

    #[test]
    fn deframe_single() {
        let mut d = Deframer::new(LiType::Li101);
        d.feed(Instant::ZERO, IDLE, &[0x61, 0x01, 0x60]);
        assert_eq!(
            d.next_frame(),
            Some(DeframeResult::Frame(vec![0x61, 0x01, 0x60]))
        );
        assert_eq!(d.next_frame(), None);
    }

    #[test]
    fn deframe_chunked() {
        let mut d = Deframer::new(LiType::Li101);
        d.feed(Instant::ZERO, IDLE, &[0x61]);
        assert_eq!(d.next_frame(), None);
        d.feed(Instant::from_micros(1000), IDLE, &[0x01]);
        assert_eq!(d.next_frame(), None);
        d.feed(Instant::from_micros(2000), IDLE, &[0x60, 0x01]);
        assert_eq!(
            d.next_frame(),
            Some(DeframeResult::Frame(vec![0x61, 0x01, 0x60]))
        );
        assert_eq!(d.next_frame(), None);
    }

    #[test]
    fn deframe_back_to_back() {
        let mut d = Deframer::new(LiType::Li101);
        d.feed(Instant::ZERO, IDLE, &[0x01, 0x04, 0x05, 0x61, 0x01, 0x60]);
        assert_eq!(
            d.next_frame(),
            Some(DeframeResult::Frame(vec![0x01, 0x04, 0x05]))
        );
        assert_eq!(
            d.next_frame(),
            Some(DeframeResult::Frame(vec![0x61, 0x01, 0x60]))
        );
        assert_eq!(d.next_frame(), None);
    }

    #[test]
    fn xor_error_drops_exactly_the_frame() {
        let mut d = Deframer::new(LiType::Li101);
        d.feed(Instant::ZERO, IDLE, &[0x61, 0x01, 0x61, 0x01, 0x04, 0x05]);
        assert_eq!(
            d.next_frame(),
            Some(DeframeResult::BadXor(vec![0x61, 0x01, 0x61]))
        );
        // The following frame is still intact.
        assert_eq!(
            d.next_frame(),
            Some(DeframeResult::Frame(vec![0x01, 0x04, 0x05]))
        );
    }

    #[test]
    fn stale_partial_frame_is_flushed() {
        let mut d = Deframer::new(LiType::Li101);
        d.feed(Instant::ZERO, IDLE, &[0x61, 0x01]);
        assert_eq!(d.next_frame(), None);
        // More than the idle timeout later the partial frame is stale.
        d.feed(
            Instant::ZERO + Duration::from_millis(301),
            IDLE,
            &[0x01, 0x04, 0x05],
        );
        assert_eq!(
            d.next_frame(),
            Some(DeframeResult::Frame(vec![0x01, 0x04, 0x05]))
        );
    }

    #[test]
    fn eth_envelope_prefix_is_discarded() {
        let mut d = Deframer::new(LiType::LiUsbEth);
        d.feed(
            Instant::ZERO,
            IDLE,
            &[0xAA, 0xBB, 0xFF, 0xFE, 0x61, 0x01, 0x60, 0xCC],
        );
        assert_eq!(
            d.next_frame(),
            Some(DeframeResult::Frame(vec![0x61, 0x01, 0x60]))
        );
        assert_eq!(d.next_frame(), None);
        // Junk without an envelope marker is dropped on the next feed.
        d.feed(Instant::from_micros(1000), IDLE, &[]);
        d.feed(Instant::from_micros(2000), IDLE, &[0xFF, 0xFE, 0x01, 0x04, 0x05]);
        assert_eq!(
            d.next_frame(),
            Some(DeframeResult::Frame(vec![0x01, 0x04, 0x05]))
        );
    }

    #[test]
    fn eth_split_envelope_marker_survives() {
        let mut d = Deframer::new(LiType::LiUsbEth);
        d.feed(Instant::ZERO, IDLE, &[0xAA, 0xFF]);
        d.feed(Instant::from_micros(1000), IDLE, &[0xFE, 0x61, 0x01, 0x60]);
        assert_eq!(
            d.next_frame(),
            Some(DeframeResult::Frame(vec![0x61, 0x01, 0x60]))
        );
    }

    #[test]
    fn hex_formatting() {
        assert_eq!(hex_str(&[0x61, 0x01, 0x60]), "0x61 0x01 0x60");
    }
}
