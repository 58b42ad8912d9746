//! focusctl library - enable, disable and inspect enforcement

pub mod commands;
pub mod display;
pub mod gate;
pub mod quote;

pub use commands::{DisableResult, EnableReport, Focus, StatusReport};
pub use gate::{DisableDuration, DisableGate, DisableSession, GateOutcome, GateState, Key, KeySource};
pub use quote::{obtain_quote, HttpQuoteSource, OfflineQuotes, QuoteSource};
