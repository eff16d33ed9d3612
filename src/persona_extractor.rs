// src/persona_extractor.rs
// One batch of chat messages in, one parsed persona list out.
// Recoverable failures degrade to an empty batch so a single bad reply never sinks the run.

use serde_json::Value;
use std::sync::Arc;

use crate::config::TaxonomyMode;
use crate::error::{ExtractionError, GatewayError};
use crate::gateway::{CompletionGateway, CompletionRequest};
use crate::persona::{BatchResult, PersonaRecord, CLOSED_SET_PERSONAS};
use crate::prompts::{build_persona_prompt, PERSONA_SYSTEM_PROMPT};
use crate::similarity::{names_match, DEFAULT_SIMILARITY_THRESHOLD};

#[derive(Debug, Clone, Copy)]
pub struct ExtractorSettings {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            temperature: 0.6,
            max_output_tokens: 3000,
        }
    }
}

pub struct PersonaExtractor {
    gateway: Arc<dyn CompletionGateway>,
    settings: ExtractorSettings,
}

impl PersonaExtractor {
    pub fn new(gateway: Arc<dyn CompletionGateway>, settings: ExtractorSettings) -> Self {
        Self { gateway, settings }
    }

    /// Extract personas from one batch.
    ///
    /// Unavailable models, empty replies and malformed JSON all come back as an
    /// empty `BatchResult`. Only a fatal gateway error (rejected credentials) is returned.
    pub fn extract(
        &self,
        messages: &[String],
        persona_count: usize,
        taxonomy: TaxonomyMode,
    ) -> Result<BatchResult, GatewayError> {
        degrade_batch(self.try_extract(messages, persona_count, taxonomy), messages.len())
    }

    /// Same as [`extract`](Self::extract) but without the degradation step.
    pub fn try_extract(
        &self,
        messages: &[String],
        persona_count: usize,
        taxonomy: TaxonomyMode,
    ) -> Result<BatchResult, ExtractionError> {
        let request = CompletionRequest {
            system_prompt: PERSONA_SYSTEM_PROMPT.to_string(),
            user_prompt: build_persona_prompt(messages, persona_count, taxonomy),
            temperature: self.settings.temperature,
            max_output_tokens: self.settings.max_output_tokens,
        };

        let raw = self.gateway.complete(&request)?;
        tracing::trace!(raw = %raw, "Raw model reply");

        let mut result = parse_batch_reply(&raw)?;
        if taxonomy == TaxonomyMode::Closed {
            result.personas = restrict_to_closed_set(result.personas);
        }

        tracing::debug!(
            messages = messages.len(),
            personas = result.personas.len(),
            taxonomy = %taxonomy,
            "Batch extracted"
        );
        Ok(result)
    }
}

/// Turn every non-fatal failure into an empty batch; pass fatal gateway errors through.
pub(crate) fn degrade_batch(
    outcome: Result<BatchResult, ExtractionError>,
    messages: usize,
) -> Result<BatchResult, GatewayError> {
    match outcome {
        Ok(result) => Ok(result),
        Err(ExtractionError::Gateway(e)) if e.is_fatal() => Err(e),
        Err(e) => {
            tracing::warn!(error = %e, messages = messages, "Batch degraded to empty persona list");
            Ok(BatchResult::default())
        }
    }
}

/// Everything between the first `{` and the last `}` of the reply.
fn clean_json_text(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if start < end {
        Some(&text[start..=end])
    } else {
        None
    }
}

/// Decode a model reply, tolerating prose around the JSON body.
///
/// Persona entries are decoded one at a time; an entry that cannot be read is
/// skipped instead of discarding the whole batch.
pub fn parse_batch_reply(raw: &str) -> Result<BatchResult, ExtractionError> {
    let json = clean_json_text(raw)
        .ok_or_else(|| ExtractionError::MalformedOutput("no JSON object in reply".to_string()))?;

    let parsed: Value = serde_json::from_str(json)
        .map_err(|e| ExtractionError::MalformedOutput(e.to_string()))?;

    let entries = match parsed.get("personas") {
        Some(Value::Array(entries)) => entries.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            return Err(ExtractionError::MalformedOutput(format!(
                "'personas' is not a list: {}",
                other
            )))
        }
    };

    let mut personas = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value::<PersonaRecord>(entry) {
            Ok(mut persona) => {
                persona.enforce_caps();
                personas.push(persona);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable persona entry");
            }
        }
    }

    Ok(BatchResult { personas })
}

/// Snap names onto the fixed vocabulary and drop anything outside it.
fn restrict_to_closed_set(personas: Vec<PersonaRecord>) -> Vec<PersonaRecord> {
    personas
        .into_iter()
        .filter_map(|mut persona| {
            let canonical = CLOSED_SET_PERSONAS
                .iter()
                .find(|name| names_match(&persona.name, name, DEFAULT_SIMILARITY_THRESHOLD));
            match canonical {
                Some(name) => {
                    persona.name = name.to_string();
                    Some(persona)
                }
                None => {
                    tracing::warn!(name = %persona.name, "Dropping persona outside the closed taxonomy");
                    None
                }
            }
        })
        .collect()
}
