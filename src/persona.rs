// src/persona.rs
// Persona records as they travel through extraction, aggregation and comparison.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;

pub const MAX_FEEDBACK: usize = 5;
pub const MAX_KEY_FEEDBACK_COMMENTS: usize = 3;

/// The fixed vocabulary of the closed-set taxonomy.
pub const CLOSED_SET_PERSONAS: [&str; 3] = ["System Alterer", "Financial Sponsor", "Social Player"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SentimentLabel {
    Positive,
    #[default]
    Neutral,
    Negative,
}

impl SentimentLabel {
    /// Case-insensitive; anything unrecognized reads as Neutral.
    pub fn from_label(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "positive" => SentimentLabel::Positive,
            "negative" => SentimentLabel::Negative,
            _ => SentimentLabel::Neutral,
        }
    }
}

impl<'de> Deserialize<'de> for SentimentLabel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(value.as_str().map(SentimentLabel::from_label).unwrap_or_default())
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SentimentLabel::Positive => "Positive",
            SentimentLabel::Neutral => "Neutral",
            SentimentLabel::Negative => "Negative",
        };
        write!(f, "{}", label)
    }
}

/// Who a closed-set persona's messages are mostly about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Focus {
    #[serde(rename = "Streamer-focused")]
    Streamer,
    #[serde(rename = "Chat-focused")]
    Chat,
    #[serde(rename = "Self-focused")]
    SelfFocused,
}

impl Focus {
    pub fn from_label(raw: &str) -> Option<Self> {
        let key: String = raw
            .chars()
            .filter(|c| c.is_alphabetic())
            .collect::<String>()
            .to_lowercase();
        match key.trim_end_matches("focused") {
            "streamer" => Some(Focus::Streamer),
            "chat" => Some(Focus::Chat),
            "self" => Some(Focus::SelfFocused),
            _ => None,
        }
    }
}

impl fmt::Display for Focus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Focus::Streamer => "Streamer-focused",
            Focus::Chat => "Chat-focused",
            Focus::SelfFocused => "Self-focused",
        };
        write!(f, "{}", label)
    }
}

fn deserialize_focus<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Focus>, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_str().and_then(Focus::from_label))
}

/// One insight label with its supporting excerpts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyFeedback {
    pub label: String,
    #[serde(default, deserialize_with = "deserialize_strings")]
    pub comments: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub recommendation: String,
}

/// A behavioral archetype, either straight from one batch or merged from several.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaRecord {
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub description: String,
    /// Percent of messages in scope. Merged records carry the raw sum.
    #[serde(default, deserialize_with = "deserialize_percent")]
    pub share: u32,
    #[serde(default)]
    pub sentiment_label: SentimentLabel,
    #[serde(
        default,
        deserialize_with = "deserialize_percent",
        serialize_with = "serialize_percent"
    )]
    pub sentiment_percent: u32,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub theme: String,
    #[serde(default, deserialize_with = "deserialize_focus", skip_serializing_if = "Option::is_none")]
    pub focus: Option<Focus>,
    #[serde(default, deserialize_with = "deserialize_strings")]
    pub feedback: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_key_feedback")]
    pub key_feedback: Vec<KeyFeedback>,
}

#[cfg(test)]
impl PersonaRecord {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            share: 0,
            sentiment_label: SentimentLabel::Neutral,
            sentiment_percent: 0,
            theme: String::new(),
            focus: None,
            feedback: Vec::new(),
            key_feedback: Vec::new(),
        }
    }
}

impl PersonaRecord {
    /// Dedupe evidence in first-seen order and enforce the caps.
    pub fn enforce_caps(&mut self) {
        self.feedback = unique_capped(std::mem::take(&mut self.feedback), MAX_FEEDBACK);
        for item in &mut self.key_feedback {
            item.comments = unique_capped(std::mem::take(&mut item.comments), MAX_KEY_FEEDBACK_COMMENTS);
        }
    }
}

/// The `{"personas": [...]}` object returned by one model call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    #[serde(default)]
    pub personas: Vec<PersonaRecord>,
}

/// A final, ranked persona set. Empty means no personas were identified.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonaSet {
    pub personas: Vec<PersonaRecord>,
}

impl PersonaSet {
    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }
}

/// Keep the first occurrence of each string, at most `cap` of them.
pub fn unique_capped<I>(items: I, cap: usize) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .take(cap)
        .collect()
}

/// Normalize a share-like value: `38`, `38.7`, `"38%"`, `" 38 % "`. Unparseable → 0.
pub fn parse_percent(value: &serde_json::Value) -> u32 {
    let number = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.replace('%', "").trim().parse::<f64>().ok(),
        _ => None,
    };
    match number {
        Some(n) if n.is_finite() && n > 0.0 => n.trunc().min(u32::MAX as f64) as u32,
        _ => 0,
    }
}

pub fn format_percent(value: u32) -> String {
    format!("{}%", value)
}

fn deserialize_percent<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(parse_percent(&value))
}

fn serialize_percent<S: Serializer>(value: &u32, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_percent(*value))
}

/// Strings that may arrive as null or as non-string scalars.
fn deserialize_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// A list of excerpts; a lone string is accepted as a one-item list, non-strings are dropped.
fn deserialize_strings<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                serde_json::Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        serde_json::Value::String(s) => vec![s],
        _ => Vec::new(),
    })
}

/// Insight entries. Null or a non-list reads as empty; entries without a string label are skipped.
fn deserialize_key_feedback<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<KeyFeedback>, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    let items = match value {
        serde_json::Value::Array(items) => items,
        _ => return Ok(Vec::new()),
    };

    Ok(items
        .into_iter()
        .filter_map(|item| {
            if !item.get("label").is_some_and(serde_json::Value::is_string) {
                tracing::warn!(entry = %item, "Skipping key feedback entry without a label");
                return None;
            }
            match serde_json::from_value::<KeyFeedback>(item) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable key feedback entry");
                    None
                }
            }
        })
        .collect())
}
