pub mod logging;
#[cfg(feature = "tui")]
pub mod terminal;
