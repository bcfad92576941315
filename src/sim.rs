//! A software PS/2 keyboard on a simulated pair of open-collector lines.
//!
//! Time only advances through [`Bus::delay_us`], so a run is fully
//! deterministic: the host's polling loop and its blocking transmit waits
//! both move the device forward.
//!
//! The device clocks at 12.5kHz (40us per half period). When sending, it
//! puts each bit on the data line as it pulls the clock low, so the host can
//! sample on the falling edge. When the host requests the bus (clock held
//! low, then data low with the clock released) the device generates the
//! clock itself and samples the data line on each rising edge.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use bit_set::BitSet;
use tracing::{debug, trace};

use crate::bus::{Bus, Level, Line};
use crate::command::{Command, Leds, Response};
use crate::controller::Ps2Host;
use crate::frame::{FRAME_BITS, Frame, odd_parity};
use crate::keymap::KeyMap;
use crate::keys::scancodes::{BREAK_PREFIX, LEFT_SHIFT};
use crate::output::Output;

pub const HALF_PERIOD_US: u32 = 40;

/// How often [`run_until_idle`] polls the host.
pub const POLL_US: u32 = 10;

/// Host-to-device bits sampled after the start bit: data, parity, stop.
const RECEIVE_BITS: u8 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    Sending { frame: Frame, index: u8, low: bool },
    Receiving { bits: u16, count: u8, low: bool },
}

pub struct SimKeyboard {
    state: State,
    elapsed: u32,

    host_clock: Level,
    host_data: Level,
    device_clock: Level,
    device_data: Level,

    tx: VecDeque<Frame>,
    replies: VecDeque<Frame>,
    last_sent: Option<Frame>,
    command: VecDeque<u8>,
    scripted_replies: VecDeque<u8>,
    held: BitSet,
    scanning: bool,

    /// Every byte clocked in from the host, including resends.
    pub received: Vec<u8>,
    /// Every complete command, in order.
    pub commands: Vec<Command>,
    pub leds: Leds,
}

impl Default for SimKeyboard {
    fn default() -> Self {
        Self::new()
    }
}

impl SimKeyboard {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            elapsed: 0,
            host_clock: Level::High,
            host_data: Level::High,
            device_clock: Level::High,
            device_data: Level::High,
            tx: VecDeque::new(),
            replies: VecDeque::new(),
            last_sent: None,
            command: VecDeque::new(),
            scripted_replies: VecDeque::new(),
            held: BitSet::new(),
            scanning: true,
            received: Vec::new(),
            commands: Vec::new(),
            leds: Leds::default(),
        }
    }

    pub fn clock(&self) -> Level {
        wired_and(self.host_clock, self.device_clock)
    }

    pub fn data(&self) -> Level {
        wired_and(self.host_data, self.device_data)
    }

    /// Nothing left to send and no transfer in progress.
    pub fn is_idle(&self) -> bool {
        self.state == State::Idle && self.tx.is_empty() && self.replies.is_empty()
    }

    pub fn held(&self) -> impl Iterator<Item = u8> + '_ {
        self.held.iter().map(|code| code as u8)
    }

    /// Queue a raw frame, which may deliberately break the framing rules.
    pub fn push_frame(&mut self, frame: Frame) {
        self.tx.push_back(frame);
    }

    pub fn push_byte(&mut self, byte: u8) {
        self.push_frame(Frame::encode(byte));
    }

    /// Answer the next host byte with `reply` instead of the usual response.
    pub fn script_reply(&mut self, reply: u8) {
        self.scripted_replies.push_back(reply);
    }

    pub fn press(&mut self, code: u8) {
        if !self.scanning {
            trace!("SIM: scanning disabled, dropping press {code:02X}");
            return;
        }
        self.held.insert(code as usize);
        self.push_byte(code);
    }

    pub fn release(&mut self, code: u8) {
        if !self.scanning {
            trace!("SIM: scanning disabled, dropping release {code:02X}");
            return;
        }
        self.held.remove(code as usize);
        self.push_byte(BREAK_PREFIX);
        self.push_byte(code);
    }

    pub fn tap(&mut self, code: u8) {
        self.press(code);
        self.release(code);
    }

    /// Type `c` using whatever key produces it, holding shift if needed.
    ///
    /// Fails with the character if no key in `key_map` produces it.
    pub fn type_char(&mut self, key_map: &KeyMap, c: char) -> Result<(), char> {
        let (code, shift) = key_map.find(c).ok_or(c)?;
        let shift_held = self.held.contains(LEFT_SHIFT as usize);
        if shift && !shift_held {
            self.press(LEFT_SHIFT);
            self.tap(code);
            self.release(LEFT_SHIFT);
        } else {
            self.tap(code);
        }
        Ok(())
    }

    fn advance(&mut self, us: u32) {
        self.elapsed += us;
        while self.elapsed >= HALF_PERIOD_US {
            self.elapsed -= HALF_PERIOD_US;
            self.half_period();
        }
    }

    fn half_period(&mut self) {
        match self.state {
            State::Idle => {
                if self.host_clock.is_high() && self.host_data.is_low() {
                    // Request to send: the start bit is already on the line.
                    trace!("SIM: host request to send");
                    self.device_clock = Level::Low;
                    self.state = State::Receiving {
                        bits: 0,
                        count: 0,
                        low: true,
                    };
                } else if self.host_clock.is_high() && self.host_data.is_high() {
                    // Command replies jump ahead of pending scan codes.
                    let next = self.replies.pop_front().or_else(|| self.tx.pop_front());
                    if let Some(frame) = next {
                        self.state = State::Sending {
                            frame,
                            index: 0,
                            low: false,
                        };
                        self.half_period();
                    }
                }
            }
            State::Sending { frame, index, low } => {
                if low {
                    self.device_clock = Level::High;
                    let index = index + 1;
                    if index as usize == FRAME_BITS {
                        trace!("SIM: sent {frame:?}");
                        self.device_data = Level::High;
                        self.last_sent = Some(frame);
                        self.state = State::Idle;
                    } else {
                        self.state = State::Sending {
                            frame,
                            index,
                            low: false,
                        };
                    }
                } else if self.host_clock.is_low() {
                    // Inhibited mid-frame: give up and send it again later.
                    trace!("SIM: inhibited, requeueing {frame:?}");
                    self.device_data = Level::High;
                    self.tx.push_front(frame);
                    self.state = State::Idle;
                } else {
                    self.device_data = frame.bit(index as usize).into();
                    self.device_clock = Level::Low;
                    self.state = State::Sending {
                        frame,
                        index,
                        low: true,
                    };
                }
            }
            State::Receiving { bits, count, low } => {
                if low {
                    self.device_clock = Level::High;
                    let bits = bits | ((self.data().is_high() as u16) << count);
                    let count = count + 1;
                    if count == RECEIVE_BITS {
                        self.state = State::Idle;
                        self.on_host_frame(bits);
                    } else {
                        self.state = State::Receiving {
                            bits,
                            count,
                            low: false,
                        };
                    }
                } else {
                    self.device_clock = Level::Low;
                    self.state = State::Receiving {
                        bits,
                        count,
                        low: true,
                    };
                }
            }
        }
    }

    fn on_host_frame(&mut self, bits: u16) {
        let byte = bits as u8;
        let parity = (bits >> 8) & 1 == 1;
        let stop = (bits >> 9) & 1 == 1;
        self.received.push(byte);

        if parity != odd_parity(byte) || !stop {
            debug!("SIM: bad frame from host {bits:010b}, asking for resend");
            self.reply(Response::Resend);
            return;
        }

        if let Some(reply) = self.scripted_replies.pop_front() {
            trace!("SIM: scripted reply {reply:02X} to {byte:02X}");
            self.replies.push_back(Frame::encode(reply));
            return;
        }

        if byte == 0xFE && self.command.is_empty() {
            // The host lost our last byte: send it again, without an ACK.
            if let Some(frame) = self.last_sent {
                self.replies.push_back(frame);
            }
            return;
        }

        self.command.push_back(byte);
        let Ok(command) = Command::try_from(&self.command) else {
            // Waiting for a parameter byte.
            self.reply(Response::Ack);
            return;
        };
        self.command.clear();
        debug!("SIM: command {command:?}");

        if let Command::Unknown(_) = command {
            self.reply(Response::Error);
            return;
        }

        self.reply(Response::Ack);
        match command {
            Command::SetLeds(leds) => self.leds = leds,
            Command::Enable => self.scanning = true,
            Command::Disable => {
                self.scanning = false;
                self.held.clear();
            }
            Command::Reset => {
                self.tx.clear();
                self.leds = Leds::default();
                self.held.clear();
                self.scanning = true;
            }
            _ => {}
        }
        if let Some(response) = command.response() {
            self.reply(response);
        }
        self.commands.push(command);
    }

    fn reply(&mut self, response: Response) {
        for byte in response.to_bytes() {
            self.replies.push_back(Frame::encode(byte));
        }
    }
}

fn wired_and(a: Level, b: Level) -> Level {
    if a.is_low() || b.is_low() {
        Level::Low
    } else {
        Level::High
    }
}

/// The host's end of the simulated cable.
#[derive(Clone, Default)]
pub struct SimBus {
    device: Rc<RefCell<SimKeyboard>>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(&self) -> Rc<RefCell<SimKeyboard>> {
        self.device.clone()
    }
}

impl Bus for SimBus {
    fn read_line(&mut self, line: Line) -> Level {
        let device = self.device.borrow();
        match line {
            Line::Clock => device.clock(),
            Line::Data => device.data(),
        }
    }

    fn write_line(&mut self, line: Line, level: Level) {
        let mut device = self.device.borrow_mut();
        match line {
            Line::Clock => device.host_clock = level,
            Line::Data => device.host_data = level,
        }
    }

    fn delay_us(&mut self, us: u32) {
        self.device.borrow_mut().advance(us);
    }
}

/// Poll `host` until the keyboard has nothing left to send and no command is
/// waiting on a reply. Gives up and returns false after `budget_us` of polling.
pub fn run_until_idle<O: Output>(host: &mut Ps2Host<SimBus, O>, budget_us: u64) -> bool {
    let mut waited = 0;
    loop {
        host.step();
        if host.bus().device().borrow().is_idle() && !host.awaiting_reply() {
            return true;
        }
        if waited >= budget_us {
            return false;
        }
        host.bus_mut().delay_us(POLL_US);
        waited += POLL_US as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{ACK, transmit};
    use crate::config::HostConfig;
    use crate::frame::FrameReceiver;
    use crate::keymap::US_LAYOUT;

    /// Poll the bus like a host would and collect whatever frames arrive.
    fn drain(bus: &mut SimBus) -> Vec<u8> {
        let mut receiver = FrameReceiver::new();
        let mut last = Level::High;
        let mut out = Vec::new();
        for _ in 0..10_000 {
            let clock = bus.read_line(Line::Clock);
            if last.is_high() && clock.is_low() {
                let bit = bus.read_line(Line::Data).is_high();
                if let Some(received) = receiver.observe(bit) {
                    assert_eq!(received.error, None);
                    out.push(received.byte);
                }
            }
            last = clock;
            if bus.device().borrow().is_idle() {
                break;
            }
            bus.delay_us(10);
        }
        out
    }

    #[test]
    fn test_sends_scan_codes() {
        let mut bus = SimBus::new();
        bus.device().borrow_mut().tap(0x1c);
        assert_eq!(drain(&mut bus), [0x1c, 0xf0, 0x1c]);
    }

    #[test]
    fn test_type_char_uses_shift() {
        let mut bus = SimBus::new();
        bus.device()
            .borrow_mut()
            .type_char(&US_LAYOUT, 'A')
            .unwrap();
        assert_eq!(
            drain(&mut bus),
            [0x12, 0x1c, 0xf0, 0x1c, 0xf0, 0x12]
        );
        assert_eq!(bus.device().borrow().held().count(), 0);
        assert_eq!(
            bus.device().borrow_mut().type_char(&US_LAYOUT, '\u{e9}'),
            Err('\u{e9}')
        );
    }

    #[test]
    fn test_receives_command_and_acks() {
        let mut bus = SimBus::new();
        let config = HostConfig::default();
        transmit(&mut bus, 0xED, &config).unwrap();
        assert_eq!(drain(&mut bus), [ACK]);
        transmit(&mut bus, 0x04, &config).unwrap();
        assert_eq!(drain(&mut bus), [ACK]);

        let device = bus.device();
        let device = device.borrow();
        assert_eq!(device.received, [0xED, 0x04]);
        assert_eq!(device.commands, [Command::SetLeds(Leds::CAPS_LOCK)]);
        assert_eq!(device.leds, Leds::CAPS_LOCK);
    }

    #[test]
    fn test_reset_reports_self_test() {
        let mut bus = SimBus::new();
        transmit(&mut bus, 0xFF, &HostConfig::default()).unwrap();
        assert_eq!(drain(&mut bus), [ACK, 0xAA]);
    }

    #[test]
    fn test_unknown_command_is_an_error() {
        let mut bus = SimBus::new();
        transmit(&mut bus, 0x55, &HostConfig::default()).unwrap();
        assert_eq!(drain(&mut bus), [0xFC]);
    }

    #[test]
    fn test_disable_stops_scanning() {
        let mut bus = SimBus::new();
        transmit(&mut bus, 0xF5, &HostConfig::default()).unwrap();
        assert_eq!(drain(&mut bus), [ACK]);
        bus.device().borrow_mut().tap(0x1c);
        assert!(bus.device().borrow().is_idle());
    }

    #[test]
    fn test_host_inhibit_requeues_frame() {
        let mut bus = SimBus::new();
        bus.device().borrow_mut().press(0x1c);
        // Let the device start the frame, then hold the clock low.
        bus.delay_us(HALF_PERIOD_US * 3);
        bus.write_line(Line::Clock, Level::Low);
        bus.delay_us(HALF_PERIOD_US * 4);
        bus.write_line(Line::Clock, Level::High);
        assert_eq!(drain(&mut bus), [0x1c]);
    }
}
