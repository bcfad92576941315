use tracing::{debug, trace};

use crate::bus::{Bus, Level, Line};
use crate::command::{Command, CommandQueue, Leds};
use crate::config::HostConfig;
use crate::error::{Diagnostic, Result};
use crate::frame::{FrameReceiver, Received};
use crate::keymap::KeyMap;
use crate::keys::{KeyEvent, KeyHandler, Modifiers};
use crate::output::Output;

/// The host end of a PS/2 keyboard link.
///
/// [`Ps2Host::step`] must be called often enough to see every clock edge:
/// at least twice per device half period, so every 10us or so for a keyboard
/// clocking at 10-16.7kHz. Nothing checks this; a slow caller sees framing
/// errors.
pub struct Ps2Host<B: Bus, O: Output> {
    bus: B,
    output: O,
    receiver: FrameReceiver,
    queue: CommandQueue,
    keys: KeyHandler,
    last_clock: Level,
}

impl<B: Bus, O: Output> Ps2Host<B, O> {
    pub fn new(bus: B, output: O, key_map: &'static KeyMap, config: HostConfig) -> Self {
        Self {
            bus,
            output,
            receiver: FrameReceiver::new(),
            queue: CommandQueue::new(config),
            keys: KeyHandler::new(key_map),
            last_clock: Level::High,
        }
    }

    /// Release both lines so the device is free to send.
    pub fn initialize(&mut self) {
        self.bus.write_line(Line::Data, Level::High);
        self.bus.write_line(Line::Clock, Level::High);
        self.receiver = FrameReceiver::new();
        self.last_clock = self.bus.read_line(Line::Clock);
        debug!("PS2: lines released, clock {}", self.last_clock);
    }

    /// Poll the clock once, sampling the data line on a falling edge.
    pub fn step(&mut self) {
        let clock = self.bus.read_line(Line::Clock);
        let falling = self.last_clock.is_high() && clock.is_low();
        self.last_clock = clock;
        if !falling {
            return;
        }

        let bit = self.bus.read_line(Line::Data).is_high();
        if let Some(received) = self.receiver.observe(bit) {
            self.deliver(received);
        }
    }

    /// Queue raw command bytes as one unit.
    pub fn enqueue(&mut self, bytes: &[u8]) -> Result<()> {
        let idle = self.queue.is_empty();
        self.queue.enqueue(&mut self.bus, &mut self.output, bytes)?;
        if idle {
            self.resync();
        }
        Ok(())
    }

    pub fn send(&mut self, command: Command) -> Result<()> {
        self.enqueue(&command.to_bytes())
    }

    /// Switch the indicators in `mask` on or off, returning the new state.
    pub fn request_leds(&mut self, mask: Leds, on: bool) -> Result<Leds> {
        let idle = self.queue.is_empty();
        let leds = self
            .queue
            .request_leds(&mut self.bus, &mut self.output, mask, on)?;
        if idle {
            self.resync();
        }
        Ok(leds)
    }

    pub fn leds(&self) -> Leds {
        self.queue.leds()
    }

    pub fn modifiers(&self) -> Modifiers {
        self.keys.modifiers()
    }

    /// A command byte is in flight and the next frame is its reply.
    pub fn awaiting_reply(&self) -> bool {
        self.queue.awaiting_reply()
    }

    pub fn pending(&self) -> &[u8] {
        self.queue.pending()
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    fn deliver(&mut self, received: Received) {
        if self.queue.awaiting_reply() {
            trace!("PS2: reply {:02X}", received.byte);
            self.queue
                .on_reply(&mut self.bus, &mut self.output, received);
            self.resync();
            return;
        }

        let Received { byte, error } = received;
        if let Some(error) = error {
            self.output
                .emit_diagnostic(&Diagnostic::Frame { byte, error });
        }

        match self.keys.on_decoded(byte, error.is_some()) {
            Some(KeyEvent::Char(c)) => {
                trace!("PS2: key {byte:02X} = {c:?}");
                self.output.emit_char(c);
            }
            Some(KeyEvent::Indicator { leds, on }) => {
                if let Err(error) =
                    self.queue
                        .request_leds(&mut self.bus, &mut self.output, leds, on)
                {
                    self.output
                        .emit_diagnostic(&Diagnostic::IndicatorDropped(error));
                }
                self.resync();
            }
            None => {}
        }
    }

    /// Forget any partial frame and take the current clock level as the
    /// reference for edge detection, after the host may have driven the bus.
    fn resync(&mut self) {
        self.receiver = FrameReceiver::new();
        self.last_clock = self.bus.read_line(Line::Clock);
    }
}
