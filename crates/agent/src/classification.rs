//! Final-answer parsing and normalization.
//!
//! The model is asked for a JSON object with a numeric `score`, a free-text
//! `topic`, and a `category` label. Replies are cleaned of markdown fences
//! and emphasis, parsed, then normalized:
//!
//! - `score` is clamped into `[0, 100]`; missing or non-numeric becomes 0.
//! - an empty `topic` becomes the policy's default topic.
//! - an empty `category` becomes the policy's default category, then the
//!   remap table rewrites known provider mislabels.
//!
//! Malformed output is an [`Error::Parse`] carrying the cleaned text.

use ctxprompt_config::NormalizationConfig;
use ctxprompt_core::error::Error;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Keys accepted for the category label, in priority order.
const CATEGORY_KEYS: [&str; 3] = ["category", "brand", "brand_username"];

/// A normalized classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Bounded score in `[0, 100]`.
    pub score: u8,
    pub topic: String,
    pub category: String,
}

/// Defaults and the category remap table.
#[derive(Debug, Clone)]
pub struct NormalizationPolicy {
    pub default_topic: String,
    pub default_category: String,
    pub category_remap: BTreeMap<String, String>,
}

impl Default for NormalizationPolicy {
    fn default() -> Self {
        Self::from(&NormalizationConfig::default())
    }
}

impl From<&NormalizationConfig> for NormalizationPolicy {
    fn from(config: &NormalizationConfig) -> Self {
        Self {
            default_topic: config.default_topic.clone(),
            default_category: config.default_category.clone(),
            category_remap: config.category_remap.clone(),
        }
    }
}

impl NormalizationPolicy {
    /// Clean, parse, and normalize a raw model reply.
    pub fn parse(&self, raw: &str) -> Result<Classification, Error> {
        let cleaned = clean(raw);
        let value: Value = serde_json::from_str(&cleaned).map_err(|e| Error::Parse {
            raw: cleaned.clone(),
            reason: e.to_string(),
        })?;

        let Value::Object(fields) = value else {
            return Err(Error::Parse {
                raw: cleaned,
                reason: "expected a JSON object".into(),
            });
        };

        Ok(self.normalize(&fields))
    }

    fn normalize(&self, fields: &Map<String, Value>) -> Classification {
        let topic = text_field(fields, "topic").unwrap_or_else(|| self.default_topic.clone());

        let category = CATEGORY_KEYS
            .iter()
            .find_map(|key| text_field(fields, key))
            .unwrap_or_else(|| self.default_category.clone());
        let category = self
            .category_remap
            .get(&category)
            .cloned()
            .unwrap_or(category);

        Classification {
            score: clamp_score(fields.get("score")),
            topic,
            category,
        }
    }
}

/// Keep only the body of a leading code fence (up to the last closing fence,
/// dropping any trailing remark), then strip leftover backticks and `**`.
pub fn clean(raw: &str) -> String {
    let mut text = raw.trim();

    if let Some(rest) = text.strip_prefix("```") {
        // Drop the fence line, including any language tag.
        text = rest.split_once('\n').map_or("", |(_, body)| body);
        if let Some(end) = text.rfind("```") {
            text = &text[..end];
        }
    }

    text.replace("**", "").replace('`', "").trim().to_string()
}

fn text_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    let text = match fields.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn clamp_score(value: Option<&Value>) -> u8 {
    let score = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match score {
        Some(s) if s.is_finite() => s.round().clamp(0.0, 100.0) as u8,
        _ => 0,
    }
}
