//! The nine-field personal-data set and reply parsing.

use serde::{Deserialize, Serialize};

/// Personal-data fields extracted from an identity document.
///
/// Every field defaults to the empty string when the model cannot find it or
/// the reply cannot be parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFields {
    #[serde(default)]
    pub id_number: String,
    #[serde(default)]
    pub first_names: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub nationality: String,
    #[serde(default)]
    pub date_of_birth: String,
    #[serde(default)]
    pub place_of_birth: String,
    #[serde(default)]
    pub issuing_authority: String,
    #[serde(default)]
    pub date_of_expiry: String,
    #[serde(default)]
    pub card_number: String,
}

/// Parse a model reply into fields.
///
/// Replies are frequently wrapped in markdown-style fences around the JSON
/// payload; fences are stripped before parsing. Returns `None` when the
/// remaining text is not a JSON object, in which case callers degrade to the
/// default set.
pub fn parse_reply(text: &str) -> Option<ExtractedFields> {
    let cleaned = strip_fences(text);
    serde_json::from_str(&cleaned).ok()
}

fn strip_fences(text: &str) -> String {
    text.replace("```json", "").replace("```", "").trim().to_string()
}
