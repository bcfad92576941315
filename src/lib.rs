//! # PS/2 keyboard host
//!
//! Decodes the clocked, bit-serial PS/2 protocol from a keyboard into
//! characters, and sends host commands (such as indicator updates) back to
//! it. The electrical side is reached through the [`Bus`] trait; the
//! [`sim`] module provides a software keyboard behind that trait.
//!
//! The protocol is documented at
//! <https://www.win.tue.nl/~aeb/linux/kbd/scancodes-12.html> and
//! <http://www.burtonsys.com/ps2_chapweske.htm>.

pub mod bus;
pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod frame;
pub mod keymap;
pub mod keys;
pub mod output;
pub mod sim;

pub use bus::{Bus, Level, Line};
pub use command::{Command, Leds};
pub use config::HostConfig;
pub use controller::Ps2Host;
pub use error::{Diagnostic, Error, FrameError};
pub use keymap::{KeyMap, US_LAYOUT};
pub use output::{Output, Transcript};
