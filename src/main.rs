use clap::Parser;
use std::path::PathBuf;
use tracing::{Level, info, warn};

use ps2_host::keys::scancodes::CAPS_LOCK;
use ps2_host::sim::{SimBus, run_until_idle};
use ps2_host::{Command, HostConfig, Ps2Host, Transcript, US_LAYOUT};

mod host;

/// PS/2 keyboard host
/// Runs the host protocol stack against a simulated keyboard
#[derive(Parser)]
#[command(name = "ps2-host")]
#[command(about = "A PS/2 keyboard host driving a simulated keyboard")]
struct Args {
    /// Text to type on the simulated keyboard
    #[arg(long = "type", value_name = "TEXT")]
    text: Option<String>,

    /// Type on the simulated keyboard from this terminal
    #[cfg(feature = "tui")]
    #[arg(long, conflicts_with = "text")]
    interactive: bool,

    /// Tap caps lock before typing
    #[arg(long)]
    caps_lock: bool,

    /// Reset the keyboard before typing
    #[arg(long)]
    reset: bool,

    /// Microseconds to hold the clock low when requesting the bus
    #[arg(long, default_value_t = HostConfig::default().settle_us)]
    settle_us: u32,

    /// Microseconds to wait for each device clock edge while transmitting
    #[arg(long, default_value_t = HostConfig::default().wait_timeout_us)]
    timeout_us: u32,

    /// Resends allowed per command byte
    #[arg(long, default_value_t = HostConfig::default().max_resends)]
    max_resends: u8,

    /// Write the log here instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn config(&self) -> HostConfig {
        HostConfig {
            settle_us: self.settle_us,
            wait_timeout_us: self.timeout_us,
            max_resends: self.max_resends,
        }
    }

    #[cfg(feature = "tui")]
    fn interactive(&self) -> bool {
        self.interactive
    }

    #[cfg(not(feature = "tui"))]
    fn interactive(&self) -> bool {
        false
    }
}

/// Simulated time allowed for a scripted run to settle.
const RUN_BUDGET_US: u64 = 60_000_000;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let level = if args.verbose {
        Level::TRACE
    } else {
        Level::INFO
    };
    match &args.log_file {
        Some(path) => host::logging::setup_logging_file(level, path)?,
        None if args.interactive() => {
            host::logging::setup_logging_file(level, &std::env::temp_dir().join("ps2-host.log"))?
        }
        None => host::logging::setup_logging_stdio(level),
    }

    let config = args.config();
    info!("PS/2 host starting: {config:?}");

    let mut host = Ps2Host::new(SimBus::new(), Transcript::new(), &US_LAYOUT, config);
    host.initialize();

    if args.reset {
        host.send(Command::Reset)?;
        if !run_until_idle(&mut host, RUN_BUDGET_US) {
            warn!("Keyboard did not finish resetting");
        }
    }

    let device = host.bus().device();
    if args.caps_lock {
        device.borrow_mut().tap(CAPS_LOCK);
    }

    #[cfg(feature = "tui")]
    if args.interactive {
        return host::terminal::run(&mut host);
    }

    if let Some(text) = &args.text {
        for c in text.chars() {
            if let Err(c) = device.borrow_mut().type_char(&US_LAYOUT, c) {
                warn!("No key produces {c:?}, skipping");
            }
        }
    }

    if !run_until_idle(&mut host, RUN_BUDGET_US) {
        warn!("Link still busy after {RUN_BUDGET_US}us");
    }

    let leds = host.leds();
    let transcript = host.output_mut();
    println!("{}", transcript.take_text());
    info!(
        "Done: {:?}, {} diagnostic(s)",
        leds,
        transcript.diagnostics.len()
    );
    Ok(())
}
