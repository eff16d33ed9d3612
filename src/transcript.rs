// src/transcript.rs
// Chat transcripts as written by the platform downloaders (one CSV row per message).

use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Accounts that post automated messages on YouTube streams.
const KNOWN_BOTS: [&str; 4] = ["nightbot", "streamlabs", "soundalerts", "streamelements"];

#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("failed to open transcript {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed transcript row: {0}")]
    Row(#[from] csv::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(alias = "message", default)]
    pub text: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub time_in_seconds: Option<f64>,
    #[serde(default)]
    pub author_name: Option<String>,
    /// Used for distinct-viewer counts.
    #[serde(default)]
    pub author_id: Option<String>,
}

impl ChatMessage {
    pub fn new(text: &str) -> Self {
        Self {
            message_id: None,
            text: text.to_string(),
            timestamp: None,
            time_in_seconds: None,
            author_name: None,
            author_id: None,
        }
    }

    fn has_author(&self) -> bool {
        self.author_id.as_deref().is_some_and(|id| !id.trim().is_empty())
    }

    fn is_bot(&self) -> bool {
        self.author_name
            .as_deref()
            .is_some_and(|name| KNOWN_BOTS.contains(&name.trim().to_lowercase().as_str()))
    }
}

/// Distinct chatters, or `"N/A"` when the transcript carries no author ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum UniqueUsers {
    Count(usize),
    NotAvailable(NotAvailable),
}

/// The literal `"N/A"` marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum NotAvailable {
    #[serde(rename = "N/A")]
    Marker,
}

impl UniqueUsers {
    pub fn not_available() -> Self {
        UniqueUsers::NotAvailable(NotAvailable::Marker)
    }
}

impl Serialize for UniqueUsers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            UniqueUsers::Count(n) => serializer.serialize_u64(*n as u64),
            UniqueUsers::NotAvailable(_) => serializer.serialize_str("N/A"),
        }
    }
}

impl std::fmt::Display for UniqueUsers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UniqueUsers::Count(n) => write!(f, "{}", n),
            UniqueUsers::NotAvailable(_) => write!(f, "N/A"),
        }
    }
}

pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<ChatMessage>, TranscriptError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| TranscriptError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let messages = from_reader(file)?;
    tracing::info!(path = %path.display(), messages = messages.len(), "Transcript loaded");
    Ok(messages)
}

pub fn from_reader<R: Read>(reader: R) -> Result<Vec<ChatMessage>, TranscriptError> {
    collect_rows(csv::Reader::from_reader(reader))
}

/// Rows with blank text are dropped.
fn collect_rows<R: Read>(mut reader: csv::Reader<R>) -> Result<Vec<ChatMessage>, TranscriptError> {
    let mut messages = Vec::new();
    for row in reader.deserialize::<ChatMessage>() {
        let message = row?;
        if !message.text.trim().is_empty() {
            messages.push(message);
        }
    }
    Ok(messages)
}

/// Drop known bot accounts and messages without an author id.
pub fn filter_bots(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let before = messages.len();
    let kept: Vec<ChatMessage> = messages
        .into_iter()
        .filter(|m| m.has_author() && !m.is_bot())
        .collect();
    tracing::debug!(before = before, after = kept.len(), "Bot messages filtered");
    kept
}

pub fn texts(messages: &[ChatMessage]) -> Vec<String> {
    messages.iter().map(|m| m.text.clone()).collect()
}

pub fn unique_users(messages: &[ChatMessage]) -> UniqueUsers {
    let authors: HashSet<&str> = messages
        .iter()
        .filter(|m| m.has_author())
        .filter_map(|m| m.author_id.as_deref())
        .collect();
    if authors.is_empty() {
        UniqueUsers::not_available()
    } else {
        UniqueUsers::Count(authors.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
message_id,text,timestamp,time_in_seconds,author_name,author_id
m1,hello chat,2024-05-01 10:00:00,0.5,alice,u1
m2,,2024-05-01 10:00:01,1.0,bob,u2
m3,go left!,2024-05-01 10:00:02,2.0,Nightbot,u3
m4,lol,2024-05-01 10:00:03,3.0,carol,
m5,gg,2024-05-01 10:00:04,4.0,alice,u1
";

    #[test]
    fn test_csv_rows_load_and_blank_text_dropped() {
        let messages = from_reader(CSV.as_bytes()).unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].text, "hello chat");
        assert_eq!(messages[0].time_in_seconds, Some(0.5));
        assert_eq!(messages[2].author_id, None);
    }

    #[test]
    fn test_load_csv_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.csv");
        std::fs::write(&path, CSV).unwrap();

        let messages = load_csv(&path).unwrap();
        assert_eq!(messages.len(), 4);
        assert!(matches!(
            load_csv(dir.path().join("missing.csv")),
            Err(TranscriptError::Open { .. })
        ));
    }

    #[test]
    fn test_message_column_alias() {
        let messages = from_reader("message,author_id\nhi,u1\n".as_bytes()).unwrap();
        assert_eq!(messages[0].text, "hi");
        assert_eq!(messages[0].author_id.as_deref(), Some("u1"));
    }

    #[test]
    fn test_bot_filter() {
        let messages = filter_bots(from_reader(CSV.as_bytes()).unwrap());
        let kept: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(kept, vec!["hello chat", "gg"]);
    }

    #[test]
    fn test_unique_users() {
        let messages = from_reader(CSV.as_bytes()).unwrap();
        assert_eq!(unique_users(&messages), UniqueUsers::Count(2));
        assert_eq!(unique_users(&[ChatMessage::new("anon")]), UniqueUsers::not_available());
    }

    #[test]
    fn test_unique_users_serialization() {
        assert_eq!(serde_json::to_string(&UniqueUsers::Count(12)).unwrap(), "12");
        assert_eq!(serde_json::to_string(&UniqueUsers::not_available()).unwrap(), "\"N/A\"");
        let parsed: UniqueUsers = serde_json::from_str("\"N/A\"").unwrap();
        assert_eq!(parsed, UniqueUsers::not_available());
        let parsed: UniqueUsers = serde_json::from_str("7").unwrap();
        assert_eq!(parsed, UniqueUsers::Count(7));
    }
}
