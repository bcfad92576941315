use tracing::warn;

use crate::error::Diagnostic;

/// Where decoded characters and diagnostics go.
///
/// Emission must not block: the host calls into the sink from its polling
/// step and never waits on it.
pub trait Output {
    fn emit_char(&mut self, c: char);

    fn emit_diagnostic(&mut self, diagnostic: &Diagnostic) {
        warn!("PS2: {diagnostic}");
    }
}

/// Collects everything emitted, for scripted runs and tests.
#[derive(Debug, Default)]
pub struct Transcript {
    pub text: String,
    pub diagnostics: Vec<Diagnostic>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_text(&mut self) -> String {
        std::mem::take(&mut self.text)
    }
}

impl Output for Transcript {
    fn emit_char(&mut self, c: char) {
        self.text.push(c);
    }

    fn emit_diagnostic(&mut self, diagnostic: &Diagnostic) {
        warn!("PS2: {diagnostic}");
        self.diagnostics.push(*diagnostic);
    }
}
