use thiserror::Error;

use crate::bus::{Level, Line};

/// Framing faults detected while receiving a byte from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("start bit was not 0")]
    StartBit,
    #[error("parity mismatch")]
    Parity,
    #[error("stop bit was not 1")]
    StopBit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("gave up waiting for {line:?} to go {level} after {waited_us}us")]
    Timeout {
        line: Line,
        level: Level,
        waited_us: u32,
    },
}

/// Errors returned to the code driving the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("command queue full: {requested} bytes requested, {available} free")]
    CommandQueueFull { requested: usize, available: usize },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Conditions that are recovered locally and only reported to the output
/// sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Diagnostic {
    #[error("frame error on {byte:02X}: {error}")]
    Frame { byte: u8, error: FrameError },
    #[error("unexpected command reply {0:02X}, discarding queue")]
    UnexpectedReply(u8),
    #[error("frame error on command reply {byte:02X}: {error}, discarding queue")]
    ReplyFrameError { byte: u8, error: FrameError },
    #[error("failed to transmit {byte:02X}: {error}, discarding queue")]
    TransmitFailed { byte: u8, error: BusError },
    #[error("device rejected {byte:02X} {attempts} times, discarding queue")]
    ResendLimit { byte: u8, attempts: u16 },
    #[error("indicator update dropped: {0}")]
    IndicatorDropped(Error),
}
