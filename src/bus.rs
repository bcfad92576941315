//! Access to the two open-collector PS/2 lines.
//!
//! Both lines idle high. Either side may pull a line low; releasing it lets
//! the pull-up bring it back high, so `Level::High` written by the host means
//! "released" rather than "driven".

use std::fmt;

use crate::error::BusError;

/// Interval between polls of a line while waiting for it to change.
pub const POLL_INTERVAL_US: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Line {
    Clock,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Level::High
    }

    pub fn is_low(self) -> bool {
        self == Level::Low
    }
}

impl From<bool> for Level {
    fn from(bit: bool) -> Self {
        if bit { Level::High } else { Level::Low }
    }
}

impl From<Level> for bool {
    fn from(level: Level) -> bool {
        level.is_high()
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => write!(f, "low"),
            Level::High => write!(f, "high"),
        }
    }
}

/// Line-level access to the keyboard port.
pub trait Bus {
    fn read_line(&mut self, line: Line) -> Level;

    fn write_line(&mut self, line: Line, level: Level);

    fn delay_us(&mut self, us: u32);

    /// Run `f` with preemption suppressed.
    ///
    /// Implementations backed by real hardware mask interrupts for the
    /// duration of the closure. The default runs it as-is, which is correct
    /// for anything that is never preempted in the first place.
    fn exclusive<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R
    where
        Self: Sized,
    {
        f(self)
    }
}

/// Spin until `line` reads `level`, giving up after `timeout_us`.
pub fn wait_for<B: Bus>(
    bus: &mut B,
    line: Line,
    level: Level,
    timeout_us: u32,
) -> Result<(), BusError> {
    let mut waited = 0;
    while bus.read_line(line) != level {
        if waited >= timeout_us {
            return Err(BusError::Timeout {
                line,
                level,
                waited_us: waited,
            });
        }
        bus.delay_us(POLL_INTERVAL_US);
        waited += POLL_INTERVAL_US;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A bus whose clock flips after a fixed number of microseconds.
    struct SlowClock {
        clock: Level,
        flip_after: u32,
        elapsed: u32,
    }

    impl Bus for SlowClock {
        fn read_line(&mut self, line: Line) -> Level {
            match line {
                Line::Clock if self.elapsed >= self.flip_after => Level::Low,
                Line::Clock => self.clock,
                Line::Data => Level::High,
            }
        }

        fn write_line(&mut self, _line: Line, _level: Level) {}

        fn delay_us(&mut self, us: u32) {
            self.elapsed += us;
        }
    }

    #[test]
    fn test_wait_for_returns_once_level_seen() {
        let mut bus = SlowClock {
            clock: Level::High,
            flip_after: 25,
            elapsed: 0,
        };
        wait_for(&mut bus, Line::Clock, Level::Low, 100).unwrap();
        assert_eq!(bus.elapsed, 25);
    }

    #[test]
    fn test_wait_for_times_out() {
        let mut bus = SlowClock {
            clock: Level::High,
            flip_after: u32::MAX,
            elapsed: 0,
        };
        let err = wait_for(&mut bus, Line::Clock, Level::Low, 50).unwrap_err();
        assert_eq!(
            err,
            BusError::Timeout {
                line: Line::Clock,
                level: Level::Low,
                waited_us: 50,
            }
        );
        assert_eq!(bus.elapsed, 50);
    }

    #[test]
    fn test_level_from_bit() {
        assert_eq!(Level::from(true), Level::High);
        assert_eq!(Level::from(false), Level::Low);
        assert!(bool::from(Level::High));
    }
}
