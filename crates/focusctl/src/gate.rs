//! Disable gate
//!
//! Turning enforcement off requires typing a quote by hand. Input is read
//! one keystroke at a time in raw mode; if more input is already waiting
//! the moment a key is read, it came from a paste and the attempt fails.
//!
//! IDLE -> QUOTE_FETCHED -> TYPING -> MATCHED | MISMATCHED | PASTE_DETECTED | CANCELLED
//!                       \-> UNAVAILABLE
//!
//! Only MATCHED lets the caller disable anything. On unix stdin must be a
//! terminal that accepts raw mode; anything else (a pipe, a file) ends as
//! UNAVAILABLE without reading a byte.

use crate::quote::{obtain_quote, QuoteSource};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::tty::IsTty;
use focus_common::config::QuoteSettings;
use focus_common::{FocusError, Result};
use owo_colors::OwoColorize;
use std::io::{self, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Minutes enforcement may be switched off for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisableDuration(u32);

impl DisableDuration {
    pub const MIN_MINUTES: i64 = 1;
    pub const MAX_MINUTES: i64 = 60;

    pub fn new(minutes: i64) -> Result<Self> {
        if (Self::MIN_MINUTES..=Self::MAX_MINUTES).contains(&minutes) {
            Ok(Self(minutes as u32))
        } else {
            Err(FocusError::InvalidDuration(minutes))
        }
    }

    pub fn minutes(&self) -> u32 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.0) * 60)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    QuoteFetched,
    Typing,
    Matched,
    Mismatched,
    PasteDetected,
    Cancelled,
    Unavailable,
}

/// Terminal state of a gate run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Matched,
    Mismatched,
    PasteDetected,
    Cancelled,
    /// No raw terminal to read keystrokes from
    Unavailable,
}

impl GateOutcome {
    pub fn authorizes_disable(&self) -> bool {
        matches!(self, GateOutcome::Matched)
    }

    pub fn state(&self) -> GateState {
        match self {
            GateOutcome::Matched => GateState::Matched,
            GateOutcome::Mismatched => GateState::Mismatched,
            GateOutcome::PasteDetected => GateState::PasteDetected,
            GateOutcome::Cancelled => GateState::Cancelled,
            GateOutcome::Unavailable => GateState::Unavailable,
        }
    }
}

/// A keystroke as the gate sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Backspace,
    Enter,
    Interrupt,
    Other,
}

/// Keystrokes one at a time
pub trait KeySource {
    fn read_key(&mut self) -> Result<Key>;
    /// Whether more input is queued right now, without waiting
    fn pending(&mut self) -> Result<bool>;
}

// ============================================================================
// Session
// ============================================================================

/// One `disable` attempt. Never persisted.
#[derive(Debug)]
pub struct DisableSession {
    challenge_text: String,
    typed: String,
    started_at: Instant,
    requested_duration: Option<DisableDuration>,
    state: GateState,
}

impl DisableSession {
    pub fn new(challenge_text: String, requested_duration: Option<DisableDuration>) -> Self {
        Self {
            challenge_text,
            typed: String::new(),
            started_at: Instant::now(),
            requested_duration,
            state: GateState::QuoteFetched,
        }
    }

    pub fn challenge_text(&self) -> &str {
        &self.challenge_text
    }

    pub fn typed(&self) -> &str {
        &self.typed
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn requested_duration(&self) -> Option<DisableDuration> {
        self.requested_duration
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn finish(&mut self, outcome: GateOutcome) -> GateOutcome {
        self.state = outcome.state();
        outcome
    }

    fn compare(&mut self) -> GateOutcome {
        if self.typed.as_bytes() == self.challenge_text.as_bytes() {
            self.finish(GateOutcome::Matched)
        } else {
            self.finish(GateOutcome::Mismatched)
        }
    }

    /// Collect keystrokes until Enter, echoing them to `echo`
    pub fn collect<K: KeySource + ?Sized, W: Write>(
        &mut self,
        keys: &mut K,
        echo: &mut W,
    ) -> Result<GateOutcome> {
        self.state = GateState::Typing;
        loop {
            let key = keys.read_key()?;

            // A human cannot produce the next keystroke with zero delay
            if keys.pending()? {
                debug!("Input already queued after {:?}", key);
                return Ok(self.finish(GateOutcome::PasteDetected));
            }

            match key {
                Key::Interrupt => return Ok(self.finish(GateOutcome::Cancelled)),
                Key::Enter => break,
                Key::Backspace => {
                    if self.typed.pop().is_some() {
                        echo_str(echo, "\x08 \x08")?;
                    }
                }
                Key::Char(c) if !c.is_control() => {
                    self.typed.push(c);
                    let mut buf = [0u8; 4];
                    echo_str(echo, c.encode_utf8(&mut buf))?;
                }
                Key::Char(_) | Key::Other => {}
            }
        }
        Ok(self.compare())
    }

    /// Fallback check for a whole line read without raw mode
    #[cfg_attr(unix, allow(dead_code))]
    fn verify_line(&mut self, line: &str) -> GateOutcome {
        self.state = GateState::Typing;
        self.typed = line.trim_end_matches(['\n', '\r']).to_string();
        self.compare()
    }
}

fn echo_str<W: Write>(echo: &mut W, s: &str) -> Result<()> {
    echo.write_all(s.as_bytes())
        .and_then(|_| echo.flush())
        .map_err(|e| FocusError::Terminal(e.to_string()))
}

// ============================================================================
// Terminal input
// ============================================================================

/// Keeps the terminal in raw mode for as long as it lives
pub struct RawTerminal {
    _private: (),
}

impl RawTerminal {
    /// None when stdin is not a terminal or raw mode is unavailable
    pub fn open() -> Option<Self> {
        if !io::stdin().is_tty() {
            return None;
        }
        match enable_raw_mode() {
            Ok(()) => Some(Self { _private: () }),
            Err(e) => {
                debug!("Raw mode unavailable: {}", e);
                None
            }
        }
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

impl KeySource for RawTerminal {
    fn read_key(&mut self) -> Result<Key> {
        loop {
            let event = event::read().map_err(|e| FocusError::Terminal(e.to_string()))?;
            if let Event::Key(key) = event {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                return Ok(match (key.code, key.modifiers) {
                    (KeyCode::Char('c'), m) if m.contains(KeyModifiers::CONTROL) => Key::Interrupt,
                    (KeyCode::Char(c), _) => Key::Char(c),
                    (KeyCode::Backspace, _) => Key::Backspace,
                    (KeyCode::Enter, _) => Key::Enter,
                    _ => Key::Other,
                });
            }
        }
    }

    fn pending(&mut self) -> Result<bool> {
        loop {
            let ready = event::poll(Duration::ZERO).map_err(|e| FocusError::Terminal(e.to_string()))?;
            if !ready {
                return Ok(false);
            }
            // Key releases and resizes are not new input
            match event::read().map_err(|e| FocusError::Terminal(e.to_string()))? {
                Event::Key(key) if key.kind == KeyEventKind::Press => return Ok(true),
                Event::Paste(_) => return Ok(true),
                _ => continue,
            }
        }
    }
}

// ============================================================================
// Gate
// ============================================================================

pub struct DisableGate<'a> {
    settings: &'a QuoteSettings,
    source: &'a dyn QuoteSource,
}

impl<'a> DisableGate<'a> {
    pub fn new(settings: &'a QuoteSettings, source: &'a dyn QuoteSource) -> Self {
        Self { settings, source }
    }

    /// Run the full challenge on the controlling terminal
    pub fn challenge(&self, duration: Option<DisableDuration>) -> Result<GateOutcome> {
        let quote = obtain_quote(self.source, &self.settings.fallbacks, &mut rand::thread_rng());
        let mut session = DisableSession::new(quote, duration);
        let mut stdout = io::stdout();

        print_banner(session.challenge_text());

        let outcome = match RawTerminal::open() {
            Some(mut terminal) => {
                // Raw mode: no implicit carriage returns
                print!("Type the quote character by character:\r\n");
                print!("{}\r\n", "(Copy/paste will be detected and rejected)".yellow());
                print!("\r\nType here: ");
                let _ = stdout.flush();
                let outcome = session.collect(&mut terminal, &mut stdout);
                drop(terminal);
                println!();
                outcome?
            }
            None => without_raw_mode(&mut session)?,
        };

        info!(
            "Disable gate finished as {:?} after {:.1}s",
            outcome,
            session.elapsed().as_secs_f32()
        );
        Ok(outcome)
    }
}

/// Unix always has raw mode, so its absence means stdin is not a terminal
#[cfg(unix)]
fn without_raw_mode(session: &mut DisableSession) -> Result<GateOutcome> {
    println!(
        "{}",
        "An interactive terminal is required to type the quote.".yellow()
    );
    Ok(session.finish(GateOutcome::Unavailable))
}

#[cfg(not(unix))]
fn without_raw_mode(session: &mut DisableSession) -> Result<GateOutcome> {
    use std::io::BufRead;

    println!(
        "{}",
        "(Copy/paste detection is not available on this terminal)".yellow()
    );
    print!("\nType here: ");
    let _ = io::stdout().flush();
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| FocusError::Terminal(e.to_string()))?;
    Ok(session.verify_line(&line))
}

fn print_banner(quote: &str) {
    println!("\n{}", "=".repeat(80));
    println!("{}", "You are about to disable focusd".yellow().bold());
    println!("{}", "=".repeat(80));
    println!("\nTo continue, please type the following quote EXACTLY:\n");
    println!("  \"{}\"", quote);
    println!("\n{}\n", "-".repeat(80));
}
