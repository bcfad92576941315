//! Host to keyboard commands, and the queue that clocks them out.
//!
//! Commands are documented in <https://www.win.tue.nl/~aeb/linux/kbd/scancodes-12.html>.
//! The device acknowledges every byte it receives with [`ACK`], or asks for
//! it again with [`RESEND`]. Only one byte is ever in flight.

use std::{collections::VecDeque, fmt};

use tracing::{debug, trace};

use crate::bus::{self, Bus, Level, Line};
use crate::config::HostConfig;
use crate::error::{BusError, Diagnostic, Error, Result};
use crate::frame::{Frame, Received};
use crate::output::Output;

/// Byte acknowledged.
pub const ACK: u8 = 0xFA;
/// Byte rejected, send it again.
pub const RESEND: u8 = 0xFE;
/// Command not understood.
pub const ERROR: u8 = 0xFC;
/// Basic assurance test passed, sent after a reset.
pub const SELF_TEST_PASSED: u8 = 0xAA;

pub const QUEUE_CAPACITY: usize = 8;

/// Keyboard indicator bitmask, as sent in the parameter of [`Command::SetLeds`].
///
/// - Bit 2 (0x04): Caps Lock
/// - Bit 1 (0x02): Num Lock
/// - Bit 0 (0x01): Scroll Lock
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Leds(u8);

impl Leds {
    pub const SCROLL_LOCK: Leds = Leds(0x01);
    pub const NUM_LOCK: Leds = Leds(0x02);
    pub const CAPS_LOCK: Leds = Leds(0x04);

    /// Bits above the three indicators are dropped.
    pub fn new(byte: u8) -> Self {
        Leds(byte & 0x07)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_scroll_lock(&self) -> bool {
        self.0 & 0x01 == 0x01
    }

    pub fn is_num_lock(&self) -> bool {
        self.0 & 0x02 == 0x02
    }

    pub fn is_caps_lock(&self) -> bool {
        self.0 & 0x04 == 0x04
    }

    /// These indicators with `mask` switched on or off.
    pub fn with(self, mask: Leds, on: bool) -> Self {
        if on {
            Leds(self.0 | mask.0)
        } else {
            Leds(self.0 & !mask.0)
        }
    }
}

impl fmt::Debug for Leds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Leds({:02X}=", self.0)?;
        let mut first = true;
        for led in [
            ("Scroll", self.is_scroll_lock()),
            ("Num", self.is_num_lock()),
            ("Caps", self.is_caps_lock()),
        ] {
            if led.1 {
                if first {
                    first = false;
                } else {
                    write!(f, "+")?;
                }
                write!(f, "{}", led.0)?;
            }
        }
        write!(f, ")")?;
        Ok(())
    }
}

/// Typematic delay (0-3, 250ms steps from 250ms) and rate (0-31, 0 is fastest).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Typematic {
    pub delay: u8,
    pub rate: u8,
}

impl Typematic {
    pub fn new(delay: u8, rate: u8) -> Option<Self> {
        if delay <= 3 && rate <= 31 {
            Some(Typematic { delay, rate })
        } else {
            None
        }
    }

    pub fn from_param_byte(byte: u8) -> Self {
        Typematic {
            delay: (byte >> 5) & 0x3,
            rate: byte & 0x1F,
        }
    }

    pub fn as_param_byte(self) -> u8 {
        ((self.delay & 0x3) << 5) | (self.rate & 0x1F)
    }
}

/// Commands sent from the host to the keyboard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Set the indicators to exactly the given mask
    SetLeds(Leds),
    /// Request the two-byte keyboard ID
    Identify,
    /// Set auto-repeat delay and rate
    SetTypematic(Typematic),
    /// Start scanning
    Enable,
    /// Stop scanning and restore defaults
    Disable,
    /// Restore default typematic settings
    SetDefaults,
    /// Ask the keyboard to send its last byte again
    Resend,
    /// Reset and run the self test
    Reset,
    /// Unknown command byte
    Unknown(u8),
}

impl Command {
    /// Returns the number of bytes this command occupies
    pub fn len(&self) -> usize {
        match self {
            Command::SetLeds(_) => 2,
            Command::SetTypematic(_) => 2,
            Command::Identify => 1,
            Command::Enable => 1,
            Command::Disable => 1,
            Command::SetDefaults => 1,
            Command::Resend => 1,
            Command::Reset => 1,
            Command::Unknown(_) => 1,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Command::SetLeds(leds) => vec![0xED, leds.bits()],
            Command::Identify => vec![0xF2],
            Command::SetTypematic(typematic) => vec![0xF3, typematic.as_param_byte()],
            Command::Enable => vec![0xF4],
            Command::Disable => vec![0xF5],
            Command::SetDefaults => vec![0xF6],
            Command::Resend => vec![0xFE],
            Command::Reset => vec![0xFF],
            Command::Unknown(byte) => vec![*byte],
        }
    }

    /// What the keyboard sends once the whole command has been acknowledged.
    pub fn response(&self) -> Option<Response> {
        Some(match self {
            Command::Reset => Response::SelfTestPassed,
            Command::Identify => Response::KeyboardId {
                first: 0xAB,
                second: 0x83,
            },
            _ => return None,
        })
    }
}

impl TryFrom<&VecDeque<u8>> for Command {
    type Error = ();

    /// Fails only when the bytes so far are an incomplete command.
    fn try_from(value: &VecDeque<u8>) -> Result<Self, Self::Error> {
        let Some(&byte0) = value.front() else {
            return Err(());
        };

        match byte0 {
            0xED => {
                let Some(&led_byte) = value.get(1) else {
                    return Err(());
                };
                Ok(Command::SetLeds(Leds::new(led_byte)))
            }
            0xF2 => Ok(Command::Identify),
            0xF3 => {
                let Some(&param) = value.get(1) else {
                    return Err(());
                };
                Ok(Command::SetTypematic(Typematic::from_param_byte(param)))
            }
            0xF4 => Ok(Command::Enable),
            0xF5 => Ok(Command::Disable),
            0xF6 => Ok(Command::SetDefaults),
            0xFE => Ok(Command::Resend),
            0xFF => Ok(Command::Reset),
            _ => Ok(Command::Unknown(byte0)),
        }
    }
}

/// Replies sent from the keyboard to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Ack,
    Resend,
    Error,
    SelfTestPassed,
    KeyboardId { first: u8, second: u8 },
}

impl Response {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Response::Ack => vec![ACK],
            Response::Resend => vec![RESEND],
            Response::Error => vec![ERROR],
            Response::SelfTestPassed => vec![SELF_TEST_PASSED],
            Response::KeyboardId { first, second } => vec![*first, *second],
        }
    }
}

/// Clock one byte out to the device.
///
/// The host requests the bus by holding the clock low, then drives the start
/// bit and releases the clock. The device then generates the clock: each
/// remaining bit is driven while the clock is low and sampled by the device
/// on the rising edge.
pub fn transmit<B: Bus>(bus: &mut B, byte: u8, config: &HostConfig) -> Result<(), BusError> {
    let frame = Frame::encode(byte);
    let result: Result<(), BusError> = bus.exclusive(|bus| {
        bus.write_line(Line::Clock, Level::Low);
        bus.delay_us(config.settle_us);
        bus.write_line(Line::Data, Level::Low);
        bus.write_line(Line::Clock, Level::High);

        for bit in frame.bits().skip(1) {
            bus::wait_for(bus, Line::Clock, Level::Low, config.wait_timeout_us)?;
            bus.write_line(Line::Data, bit.into());
            bus::wait_for(bus, Line::Clock, Level::High, config.wait_timeout_us)?;
        }
        Ok(())
    });

    bus.write_line(Line::Data, Level::High);
    bus.write_line(Line::Clock, Level::High);
    trace!("PS2: sent {byte:02X}: {result:?}");
    result
}

/// Outgoing command bytes, sent one at a time as the device acknowledges them.
#[derive(Debug)]
pub struct CommandQueue {
    buf: [u8; QUEUE_CAPACITY],
    head: usize,
    tail: usize,
    awaiting_reply: bool,
    resends: u8,
    leds: Leds,
    config: HostConfig,
}

impl CommandQueue {
    pub fn new(config: HostConfig) -> Self {
        Self {
            buf: [0; QUEUE_CAPACITY],
            head: 0,
            tail: 0,
            awaiting_reply: false,
            resends: 0,
            leds: Leds::default(),
            config,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Bytes queued and not yet acknowledged, including the one in flight.
    pub fn pending(&self) -> &[u8] {
        &self.buf[self.head..self.tail]
    }

    pub fn awaiting_reply(&self) -> bool {
        self.awaiting_reply
    }

    pub fn leds(&self) -> Leds {
        self.leds
    }

    /// Queue `bytes` as one unit. Starts sending if nothing was queued.
    pub fn enqueue<B: Bus, O: Output>(
        &mut self,
        bus: &mut B,
        out: &mut O,
        bytes: &[u8],
    ) -> Result<()> {
        let available = QUEUE_CAPACITY - self.tail;
        if bytes.len() > available {
            return Err(Error::CommandQueueFull {
                requested: bytes.len(),
                available,
            });
        }

        let was_empty = self.is_empty();
        self.buf[self.tail..self.tail + bytes.len()].copy_from_slice(bytes);
        self.tail += bytes.len();
        debug!("PS2: queued {bytes:02X?}, pending {:02X?}", self.pending());

        if was_empty && !self.is_empty() {
            self.send_head(bus, out);
        }
        Ok(())
    }

    /// Switch the indicators in `mask` on or off.
    ///
    /// The new state is recorded once the command is queued, before the
    /// device has acknowledged it.
    pub fn request_leds<B: Bus, O: Output>(
        &mut self,
        bus: &mut B,
        out: &mut O,
        mask: Leds,
        on: bool,
    ) -> Result<Leds> {
        let leds = self.leds.with(mask, on);
        self.enqueue(bus, out, &Command::SetLeds(leds).to_bytes())?;
        self.leds = leds;
        Ok(leds)
    }

    /// Handle a byte received while a reply is outstanding.
    pub fn on_reply<B: Bus, O: Output>(&mut self, bus: &mut B, out: &mut O, received: Received) {
        let Received { byte, error } = received;
        if let Some(error) = error {
            return self.abort(out, Diagnostic::ReplyFrameError { byte, error });
        }
        if !self.awaiting_reply || self.is_empty() {
            // Nothing was sent, so there is nothing to acknowledge or resend.
            return self.abort(out, Diagnostic::UnexpectedReply(byte));
        }

        match byte {
            ACK => {
                trace!("PS2: {:02X} acknowledged", self.buf[self.head]);
                self.head += 1;
                self.resends = 0;
                if self.is_empty() {
                    debug!("PS2: command queue drained");
                    self.clear();
                } else {
                    self.send_head(bus, out);
                }
            }
            RESEND => {
                let byte = self.buf[self.head];
                // Attempts include the first send, so count past u8.
                let attempts = u16::from(self.resends) + 1;
                if self.resends >= self.config.max_resends {
                    return self.abort(out, Diagnostic::ResendLimit { byte, attempts });
                }
                self.resends += 1;
                debug!("PS2: resending {byte:02X} (attempt {})", attempts + 1);
                self.send_head(bus, out);
            }
            other => self.abort(out, Diagnostic::UnexpectedReply(other)),
        }
    }

    fn send_head<B: Bus, O: Output>(&mut self, bus: &mut B, out: &mut O) {
        let byte = self.buf[self.head];
        self.awaiting_reply = true;
        if let Err(error) = transmit(bus, byte, &self.config) {
            self.abort(out, Diagnostic::TransmitFailed { byte, error });
        }
    }

    fn abort<O: Output>(&mut self, out: &mut O, diagnostic: Diagnostic) {
        out.emit_diagnostic(&diagnostic);
        self.clear();
    }

    fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.awaiting_reply = false;
        self.resends = 0;
    }
}
