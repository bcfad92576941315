//! PS/2 framing: 1 start bit, 8 data bits (LSB first), odd parity, 1 stop bit.

use std::fmt;

use tracing::trace;

use crate::error::FrameError;

pub const FRAME_BITS: usize = 11;

const PARITY_BIT: usize = 9;
const STOP_BIT: usize = 10;

/// Odd parity for `byte`: `true` when `byte` has an even number of set bits,
/// so that data plus parity always carries an odd count.
pub const fn odd_parity(byte: u8) -> bool {
    byte.count_ones() % 2 == 0
}

/// One 11-bit frame, bit 0 first on the wire.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame(u16);

impl Frame {
    pub fn encode(byte: u8) -> Self {
        let mut bits = (byte as u16) << 1;
        if odd_parity(byte) {
            bits |= 1 << PARITY_BIT;
        }
        bits |= 1 << STOP_BIT;
        Frame(bits)
    }

    pub fn from_bits(bits: u16) -> Self {
        Frame(bits & 0x7FF)
    }

    pub fn bits(self) -> impl Iterator<Item = bool> {
        (0..FRAME_BITS).map(move |i| self.bit(i))
    }

    pub fn bit(self, index: usize) -> bool {
        (self.0 >> index) & 1 == 1
    }

    pub fn data(self) -> u8 {
        (self.0 >> 1) as u8
    }

    /// Flip the parity bit.
    pub fn with_bad_parity(self) -> Self {
        Frame(self.0 ^ (1 << PARITY_BIT))
    }

    pub fn with_bad_start(self) -> Self {
        Frame(self.0 | 1)
    }

    pub fn with_bad_stop(self) -> Self {
        Frame(self.0 & !(1 << STOP_BIT))
    }

    /// Check the framing bits, reporting the first fault in wire order.
    pub fn check(self) -> Result<u8, FrameError> {
        if self.bit(0) {
            Err(FrameError::StartBit)
        } else if self.bit(PARITY_BIT) != odd_parity(self.data()) {
            Err(FrameError::Parity)
        } else if !self.bit(STOP_BIT) {
            Err(FrameError::StopBit)
        } else {
            Ok(self.data())
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({:011b}={:02X})", self.0, self.data())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiveState {
    #[default]
    Idle,
    Data {
        count: u8,
    },
    ParityBit,
    StopBit,
}

/// A completed frame, delivered even when it failed a framing check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    pub byte: u8,
    pub error: Option<FrameError>,
}

impl Received {
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Assembles frames one sampled bit at a time.
#[derive(Debug, Default)]
pub struct FrameReceiver {
    state: ReceiveState,
    byte: u8,
    error: Option<FrameError>,
}

impl FrameReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ReceiveState {
        self.state
    }

    /// Feed the data line level sampled on a clock falling edge.
    pub fn observe(&mut self, bit: bool) -> Option<Received> {
        match self.state {
            ReceiveState::Idle => {
                self.byte = 0;
                self.error = None;
                if bit {
                    self.fail(FrameError::StartBit);
                }
                self.state = ReceiveState::Data { count: 0 };
            }
            ReceiveState::Data { count } => {
                self.byte |= (bit as u8) << count;
                self.state = if count + 1 == 8 {
                    ReceiveState::ParityBit
                } else {
                    ReceiveState::Data { count: count + 1 }
                };
            }
            ReceiveState::ParityBit => {
                if bit != odd_parity(self.byte) {
                    self.fail(FrameError::Parity);
                }
                self.state = ReceiveState::StopBit;
            }
            ReceiveState::StopBit => {
                if !bit {
                    self.fail(FrameError::StopBit);
                }
                let received = Received {
                    byte: self.byte,
                    error: self.error,
                };
                trace!("PS2: received {:02X} ({:?})", received.byte, received.error);
                *self = Self::default();
                return Some(received);
            }
        }
        None
    }

    fn fail(&mut self, error: FrameError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn feed(receiver: &mut FrameReceiver, frame: Frame) -> Option<Received> {
        let mut out = None;
        for (i, bit) in frame.bits().enumerate() {
            out = receiver.observe(bit);
            if i + 1 < FRAME_BITS {
                assert_eq!(out, None);
            }
        }
        out
    }

    #[test]
    fn test_odd_parity_all_bytes() {
        for b in 0..=255u8 {
            assert_eq!(odd_parity(b), b.count_ones() % 2 == 0, "byte {b:02X}");
        }
    }

    #[test]
    fn test_every_byte_survives_framing() {
        let mut receiver = FrameReceiver::new();
        for b in 0..=255u8 {
            let received = feed(&mut receiver, Frame::encode(b)).unwrap();
            assert_eq!(received, Received { byte: b, error: None });
            assert_eq!(receiver.state(), ReceiveState::Idle);
        }
    }

    #[test]
    fn test_encode_layout() {
        // 0x1C = 0001_1100, three bits set, so parity is 0
        let frame = Frame::encode(0x1C);
        let bits: Vec<bool> = frame.bits().collect();
        assert_eq!(
            bits,
            [false, false, false, true, true, true, false, false, false, false, true]
        );
        assert_eq!(frame.check(), Ok(0x1C));
    }

    #[rstest]
    #[case(Frame::encode(0x1C).with_bad_start(), FrameError::StartBit)]
    #[case(Frame::encode(0x1C).with_bad_parity(), FrameError::Parity)]
    #[case(Frame::encode(0x1C).with_bad_stop(), FrameError::StopBit)]
    #[case(Frame::encode(0xFA).with_bad_parity().with_bad_stop(), FrameError::Parity)]
    #[case(Frame::encode(0x00).with_bad_start().with_bad_stop(), FrameError::StartBit)]
    fn test_first_error_wins(#[case] frame: Frame, #[case] expected: FrameError) {
        let mut receiver = FrameReceiver::new();
        let received = feed(&mut receiver, frame).unwrap();
        assert_eq!(received.byte, frame.data());
        assert_eq!(received.error, Some(expected));
        assert_eq!(frame.check(), Err(expected));
    }

    #[test]
    fn test_resyncs_after_error() {
        let mut receiver = FrameReceiver::new();
        let bad = feed(&mut receiver, Frame::encode(0x12).with_bad_parity()).unwrap();
        assert!(bad.has_error());
        let good = feed(&mut receiver, Frame::encode(0x12)).unwrap();
        assert_eq!(good, Received { byte: 0x12, error: None });
    }

    #[test]
    fn test_state_progression() {
        let mut receiver = FrameReceiver::new();
        receiver.observe(false);
        assert_eq!(receiver.state(), ReceiveState::Data { count: 0 });
        for i in 0..7 {
            receiver.observe(true);
            assert_eq!(receiver.state(), ReceiveState::Data { count: i + 1 });
        }
        receiver.observe(true);
        assert_eq!(receiver.state(), ReceiveState::ParityBit);
        receiver.observe(true);
        assert_eq!(receiver.state(), ReceiveState::StopBit);
        let received = receiver.observe(true).unwrap();
        assert_eq!(received, Received { byte: 0xFF, error: None });
    }
}
