use std::io;
use std::time::Duration;

use ratatui::buffer::Buffer;
use ratatui::crossterm;
use ratatui::crossterm::event::{Event, KeyCode, KeyEventKind, KeyModifiers};
use ratatui::layout::Rect;
use ratatui::prelude::CrosstermBackend;
use ratatui::style::{Color, Style, Stylize};
use ratatui::text::{Line, Span};
use ratatui::widgets::Widget;
use tracing::{info, warn};

use ps2_host::keys::Modifiers;
use ps2_host::keys::scancodes::CAPS_LOCK;
use ps2_host::sim::{POLL_US, SimBus, SimKeyboard};
use ps2_host::{Bus, Command, Leds, Ps2Host, Transcript, US_LAYOUT};

/// Simulated link time run between redraws.
const POLLS_PER_FRAME: u32 = 2_000;

pub enum KeyboardCommand {
    Reset,
    Quit,
}

/// Turns terminal key presses into keystrokes on the simulated keyboard.
#[derive(Default)]
pub struct CrosstermKeyboard;

impl CrosstermKeyboard {
    pub fn update_keyboard(
        &mut self,
        event: &Event,
        device: &mut SimKeyboard,
    ) -> Option<KeyboardCommand> {
        let Event::Key(key) = event else {
            return None;
        };
        if key.kind != KeyEventKind::Press {
            return None;
        }
        if key.modifiers == KeyModifiers::CONTROL {
            match key.code {
                KeyCode::Char('q') | KeyCode::Char('c') => return Some(KeyboardCommand::Quit),
                KeyCode::Char('r') => return Some(KeyboardCommand::Reset),
                KeyCode::Char('l') => device.tap(CAPS_LOCK),
                _ => {}
            }
            return None;
        }
        let c = match key.code {
            KeyCode::Char(c) => c,
            KeyCode::Enter => '\n',
            KeyCode::Tab => '\t',
            KeyCode::Backspace => '\u{8}',
            _ => return None,
        };
        if let Err(c) = device.type_char(&US_LAYOUT, c) {
            warn!("No key produces {c:?}");
        }
        None
    }
}

/// The decoded text, with the indicator and modifier state underneath.
pub struct Console<'a> {
    transcript: &'a Transcript,
    leds: Leds,
    modifiers: Modifiers,
}

impl<'a> Console<'a> {
    pub fn new(transcript: &'a Transcript, leds: Leds, modifiers: Modifiers) -> Self {
        Self {
            transcript,
            leds,
            modifiers,
        }
    }

    fn rows(&self, width: usize) -> Vec<String> {
        let mut rows = vec![String::new()];
        for c in self.transcript.text.chars() {
            match c {
                '\n' => rows.push(String::new()),
                '\u{8}' => {
                    if let Some(row) = rows.last_mut() {
                        row.pop();
                    }
                }
                c if c.is_control() => {}
                c => {
                    if rows.last().is_some_and(|row| row.chars().count() >= width) {
                        rows.push(String::new());
                    }
                    if let Some(row) = rows.last_mut() {
                        row.push(c);
                    }
                }
            }
        }
        rows
    }
}

fn indicator(name: &'static str, on: bool) -> Span<'static> {
    if on {
        Span::styled(name, Style::default().fg(Color::Black).bg(Color::Green))
    } else {
        Span::styled(name, Style::default().fg(Color::DarkGray))
    }
}

impl<'a> Widget for Console<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        if area.height < 3 || area.width == 0 {
            return;
        }
        let text_height = (area.height - 2) as usize;
        let rows = self.rows(area.width as usize);
        let skip = rows.len().saturating_sub(text_height);
        for (y, row) in rows.iter().skip(skip).enumerate() {
            buf.set_string(area.left(), area.top() + y as u16, row, Style::default());
        }

        let diagnostic_row = area.bottom() - 2;
        if let Some(diagnostic) = self.transcript.diagnostics.last() {
            let line = Line::from(vec![
                Span::styled(
                    format!("{} ", self.transcript.diagnostics.len()),
                    Style::default().bold(),
                ),
                Span::styled(diagnostic.to_string(), Style::default().fg(Color::Red)),
            ]);
            buf.set_line(area.left(), diagnostic_row, &line, area.width);
        }

        let status = Line::from(vec![
            indicator(" Num ", self.leds.is_num_lock()),
            Span::raw(" "),
            indicator(" Caps ", self.leds.is_caps_lock()),
            Span::raw(" "),
            indicator(" Scroll ", self.leds.is_scroll_lock()),
            Span::raw(" "),
            indicator(" Shift ", self.modifiers.is_shift()),
            Span::styled(
                "  ^L caps lock  ^R reset  ^Q quit",
                Style::default().fg(Color::DarkGray),
            ),
        ]);
        buf.set_line(area.left(), area.bottom() - 1, &status, area.width);
    }
}

/// Run the link against this terminal's keyboard until the user quits.
pub fn run(host: &mut Ps2Host<SimBus, Transcript>) -> Result<(), Box<dyn std::error::Error>> {
    let mut terminal = ratatui::Terminal::new(CrosstermBackend::new(io::stdout()))?;
    crossterm::terminal::enable_raw_mode()?;
    crossterm::execute!(io::stdout(), crossterm::terminal::EnterAlternateScreen)?;
    terminal.clear()?;

    let result = run_loop(&mut terminal, host);

    crossterm::terminal::disable_raw_mode()?;
    crossterm::execute!(io::stdout(), crossterm::terminal::LeaveAlternateScreen)?;
    result
}

fn run_loop(
    terminal: &mut ratatui::Terminal<CrosstermBackend<io::Stdout>>,
    host: &mut Ps2Host<SimBus, Transcript>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut keyboard = CrosstermKeyboard;
    let device = host.bus().device();
    loop {
        for _ in 0..POLLS_PER_FRAME {
            host.step();
            host.bus_mut().delay_us(POLL_US);
        }

        let console = Console::new(host.output(), host.leds(), host.modifiers());
        terminal.draw(|frame| frame.render_widget(console, frame.area()))?;

        if !crossterm::event::poll(Duration::from_millis(10))? {
            continue;
        }
        let event = crossterm::event::read()?;
        let command = keyboard.update_keyboard(&event, &mut device.borrow_mut());
        match command {
            Some(KeyboardCommand::Quit) => return Ok(()),
            Some(KeyboardCommand::Reset) => {
                info!("Resetting keyboard");
                if let Err(e) = host.send(Command::Reset) {
                    warn!("Reset not sent: {e}");
                }
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::crossterm::event::KeyEvent;

    fn key(code: KeyCode, modifiers: KeyModifiers) -> Event {
        Event::Key(KeyEvent::new(code, modifiers))
    }

    #[test]
    fn test_keys_become_scan_codes() {
        let mut device = SimKeyboard::new();
        let mut keyboard = CrosstermKeyboard;
        assert!(
            keyboard
                .update_keyboard(&key(KeyCode::Char('a'), KeyModifiers::NONE), &mut device)
                .is_none()
        );
        assert!(
            keyboard
                .update_keyboard(&key(KeyCode::Char('l'), KeyModifiers::CONTROL), &mut device)
                .is_none()
        );
        assert!(matches!(
            keyboard.update_keyboard(&key(KeyCode::Char('q'), KeyModifiers::CONTROL), &mut device),
            Some(KeyboardCommand::Quit)
        ));
        assert!(!device.is_idle());
    }

    #[test]
    fn test_console_wraps_and_scrolls() {
        let transcript = Transcript {
            text: "abcdef\nxy\u{8}z".to_string(),
            diagnostics: vec![],
        };
        let console = Console::new(&transcript, Leds::CAPS_LOCK, Modifiers::default());
        assert_eq!(console.rows(4), ["abcd", "ef", "xz"]);

        let mut buf = Buffer::empty(Rect::new(0, 0, 40, 4));
        console.render(buf.area, &mut buf);
        assert_eq!(buf[(0, 0)].symbol(), "a");
        assert_eq!(buf[(0, 1)].symbol(), "x");
        assert_eq!(buf[(1, 3)].symbol(), "N");
    }
}
