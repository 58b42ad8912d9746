//! Challenge quotes for the disable gate

use focus_common::config::QuoteSettings;
use focus_common::{FocusError, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, warn};

/// Used when the configured fallback list is empty
const LAST_RESORT: &str = "The only way to do great work is to love what you do. - Steve Jobs";

/// Where challenge quotes come from
pub trait QuoteSource {
    fn fetch(&self) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct QuoteBody {
    content: String,
    author: String,
}

/// Quote API over HTTP
pub struct HttpQuoteSource {
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl HttpQuoteSource {
    pub fn new(settings: &QuoteSettings) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| FocusError::Quote(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: settings.endpoint.clone(),
            client,
        })
    }
}

impl QuoteSource for HttpQuoteSource {
    fn fetch(&self) -> Result<String> {
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .map_err(|e| FocusError::Quote(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(FocusError::Quote(format!("HTTP {}", response.status())));
        }

        let body: QuoteBody = response
            .json()
            .map_err(|e| FocusError::Quote(format!("Malformed body: {}", e)))?;
        format_quote(&body.content, &body.author)
    }
}

/// Always fails; for hosts with no network
pub struct OfflineQuotes;

impl QuoteSource for OfflineQuotes {
    fn fetch(&self) -> Result<String> {
        Err(FocusError::Quote("offline".to_string()))
    }
}

/// `content - author`, rejecting text that cannot be typed on a plain keyboard
fn format_quote(content: &str, author: &str) -> Result<String> {
    let content = content.trim();
    let author = author.trim();
    if content.is_empty() {
        return Err(FocusError::Quote("empty quote".to_string()));
    }
    let quote = if author.is_empty() {
        content.to_string()
    } else {
        format!("{} - {}", content, author)
    };
    if !quote.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err(FocusError::Quote("quote contains untypeable characters".to_string()));
    }
    Ok(quote)
}

/// Remote quote if available, otherwise a random fallback. Never fails.
pub fn obtain_quote<R: Rng + ?Sized>(
    source: &dyn QuoteSource,
    fallbacks: &[String],
    rng: &mut R,
) -> String {
    match source.fetch() {
        Ok(quote) => {
            debug!("Using remote quote");
            quote
        }
        Err(e) => {
            warn!("Quote service unavailable, using fallback: {}", e);
            fallbacks
                .choose(rng)
                .cloned()
                .unwrap_or_else(|| LAST_RESORT.to_string())
        }
    }
}
