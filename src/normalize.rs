use crate::types::{RawResponse, RawToken, TicketData, Token};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::Value;
use tracing::debug;

/// Display label for tickets without a category. Never stored.
pub const UNCATEGORIZED_LABEL: &str = "Sin categoría";

/// Normalize an OCR payload using the current time as the ingestion timestamp.
pub fn normalize_response(raw: RawResponse) -> TicketData {
    normalize_response_at(raw, Utc::now())
}

/// Turn a sparse OCR payload into a fully-defaulted ticket body.
///
/// Total over any `RawResponse`: missing scalars get defaults, `tokens` are
/// reshaped into `bbox` form, `monto_debug` entries are stringified. The
/// image reference is left empty for the caller to fill in.
pub fn normalize_response_at(raw: RawResponse, ingested_at: DateTime<Utc>) -> TicketData {
    let date = match raw.fecha.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(fecha) => canonical_date(fecha),
        None => {
            debug!("no date in OCR response, using ingestion time");
            ingested_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        }
    };

    let amount = match raw.monto.filter(|m| m.is_finite()) {
        Some(m) => m,
        None => {
            debug!("no usable amount in OCR response, defaulting to 0");
            0.0
        }
    };

    TicketData {
        date,
        amount,
        amount_raw: raw.monto_raw.unwrap_or_default(),
        merchant: raw.merchant.unwrap_or_default(),
        text: raw.texto.unwrap_or_default(),
        text_clean: raw.texto_clean,
        text_lines: raw.texto_lines.unwrap_or_default(),
        image_url: String::new(),
        tokens: raw.tokens.map(|tokens| tokens.into_iter().map(token_from_raw).collect()),
        amount_debug: raw
            .monto_debug
            .map(|entries| entries.into_iter().map(debug_entry_to_string).collect()),
        category: raw.category.and_then(canonical_category),
        category_debug: raw.category_debug,
    }
}

fn token_from_raw(raw: RawToken) -> Token {
    Token {
        text: raw.text,
        confidence: raw.conf,
        bbox: [raw.left, raw.top, raw.width, raw.height],
    }
}

/// Strings pass through untouched; structured entries become compact JSON.
fn debug_entry_to_string(entry: Value) -> String {
    match entry {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// The display placeholder is not a classification; treat it as absent.
pub(crate) fn canonical_category(category: String) -> Option<String> {
    if category == UNCATEGORIZED_LABEL {
        None
    } else {
        Some(category)
    }
}

// Two-digit years first: `%Y` would otherwise read "24" as year 24.
const DAY_FIRST_FORMATS: &[&str] = &[
    "%d/%m/%y", "%d-%m-%y", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y",
];

/// Rewrite recognized date layouts to `YYYY-MM-DD`. RFC 3339 timestamps are
/// already canonical; anything unrecognized is kept verbatim.
fn canonical_date(fecha: &str) -> String {
    if DateTime::parse_from_rfc3339(fecha).is_ok() {
        return fecha.to_string();
    }
    if let Ok(d) = NaiveDate::parse_from_str(fecha, "%Y-%m-%d") {
        return d.format("%Y-%m-%d").to_string();
    }
    for fmt in DAY_FIRST_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(fecha, fmt) {
            return d.format("%Y-%m-%d").to_string();
        }
    }
    debug!(fecha, "unrecognized date layout, keeping as extracted");
    fecha.to_string()
}
