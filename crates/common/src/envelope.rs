//! Response envelopes
//!
//! Every response from the system under test is classified exactly once,
//! at the transport boundary, into one of three shapes. Nothing downstream
//! re-inspects headers or content types.

use serde::Serialize;
use serde_json::Value;

/// A normalized record observed through a read channel
pub type Record = serde_json::Map<String, Value>;

/// Raw shape of one response, before identifier extraction
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum ResponseEnvelope {
    /// 3xx answer carrying a Location header
    Redirect { status: u16, location: String },

    /// Rendered markup (HTML, or XML for the vets listing)
    Html { status: u16, document: String },

    /// JSON body; an empty body decodes to `null`
    Json { status: u16, body: Value },
}

impl ResponseEnvelope {
    pub fn status(&self) -> u16 {
        match self {
            ResponseEnvelope::Redirect { status, .. }
            | ResponseEnvelope::Html { status, .. }
            | ResponseEnvelope::Json { status, .. } => *status,
        }
    }

    pub fn shape(&self) -> &'static str {
        match self {
            ResponseEnvelope::Redirect { .. } => "redirect",
            ResponseEnvelope::Html { .. } => "html",
            ResponseEnvelope::Json { .. } => "json",
        }
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self, ResponseEnvelope::Redirect { .. })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status())
    }

    /// Body rendered as text, for diagnostics and rejection reports
    pub fn body_text(&self) -> String {
        match self {
            ResponseEnvelope::Redirect { location, .. } => format!("-> {}", location),
            ResponseEnvelope::Html { document, .. } => document.clone(),
            ResponseEnvelope::Json { body, .. } => body.to_string(),
        }
    }

    /// Body text cut to `max` characters for log lines
    pub fn excerpt(&self, max: usize) -> String {
        let text = self.body_text();
        if text.chars().count() <= max {
            text
        } else {
            let cut: String = text.chars().take(max).collect();
            format!("{}...", cut)
        }
    }
}
