use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One recognized fragment as sent by the OCR service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawToken {
    #[serde(deserialize_with = "lenient_string_or_empty")]
    pub text: String,
    #[serde(deserialize_with = "amount_or_zero")]
    pub conf: f64,
    #[serde(deserialize_with = "amount_or_zero")]
    pub left: f64,
    #[serde(deserialize_with = "amount_or_zero")]
    pub top: f64,
    #[serde(deserialize_with = "amount_or_zero")]
    pub width: f64,
    #[serde(deserialize_with = "amount_or_zero")]
    pub height: f64,
}

/// Untrusted OCR service payload. Every field may be missing, null or of
/// the wrong shape; such fields read as absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawResponse {
    #[serde(deserialize_with = "lenient_string")]
    pub fecha: Option<String>,
    #[serde(deserialize_with = "lenient_amount")]
    pub monto: Option<f64>,
    #[serde(deserialize_with = "lenient_string")]
    pub monto_raw: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub merchant: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub texto: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub texto_clean: Option<String>,
    #[serde(deserialize_with = "lenient_seq")]
    pub texto_lines: Option<Vec<String>>,
    #[serde(deserialize_with = "lenient_seq")]
    pub tokens: Option<Vec<RawToken>>,
    #[serde(deserialize_with = "lenient_seq")]
    pub monto_debug: Option<Vec<Value>>,
    #[serde(deserialize_with = "lenient_string")]
    pub category: Option<String>,
    pub category_debug: Option<CategoryDebug>,
}

/// Diagnostics emitted by the service's category classifier.
///
/// Known shapes are matched in declaration order; anything else is kept as
/// `Opaque` so no information is lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CategoryDebug {
    Keywords(KeywordMatch),
    /// Score per candidate category.
    Scores(BTreeMap<String, f64>),
    Note(String),
    Opaque(Value),
}

/// Keywords from the receipt text that selected the category. Objects with
/// any other key are not this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeywordMatch {
    pub matched: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Token in canonical form. `bbox` is `[left, top, width, height]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    pub confidence: f64,
    pub bbox: [f64; 4],
}

/// Every field of a ticket except its identity. When read back from storage,
/// `null` in a required field reads as its default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TicketData {
    #[serde(deserialize_with = "null_as_default")]
    pub date: String,
    #[serde(deserialize_with = "amount_or_zero")]
    pub amount: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub amount_raw: String,
    #[serde(deserialize_with = "null_as_default")]
    pub merchant: String,
    #[serde(deserialize_with = "null_as_default")]
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_clean: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub text_lines: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub image_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<Vec<Token>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_debug: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_debug: Option<CategoryDebug>,
}

/// Canonical persisted ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    #[serde(flatten)]
    pub data: TicketData,
}

/// Partial edit of a ticket. `None` leaves the field untouched; for
/// `category`, `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TicketPatch {
    pub date: Option<String>,
    pub amount: Option<f64>,
    pub amount_raw: Option<String>,
    pub merchant: Option<String>,
    pub text: Option<String>,
    pub text_lines: Option<Vec<String>>,
    pub image_url: Option<String>,
    pub tokens: Option<Vec<Token>>,
    pub amount_debug: Option<Vec<String>>,
    #[serde(deserialize_with = "present")]
    pub category: Option<Option<String>>,
}

impl TicketPatch {
    pub fn is_empty(&self) -> bool {
        *self == TicketPatch::default()
    }
}

/// Whole persisted state: tickets newest first plus the active filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Snapshot {
    pub tickets: Vec<Ticket>,
    pub filter_category: Option<String>,
}

/// Accepts a JSON number or a numeric string; anything else (or a non-finite
/// value) becomes `None`.
fn lenient_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_amount_value))
}

fn amount_or_zero<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_amount(deserializer)?.unwrap_or(0.0))
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A string, or `None` for null and any other JSON type.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        _ => None,
    })
}

fn lenient_string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_string(deserializer)?.unwrap_or_default())
}

/// An array, keeping the elements that read as `T`. Any non-array is `None`.
fn lenient_seq<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(items)) => Some(
            items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
        ),
        _ => None,
    })
}

/// Distinguishes an explicit `null` from a missing key.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

pub(crate) fn parse_amount_value(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}
