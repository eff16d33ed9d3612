// src/pipeline.rs
// One video end to end: transcript messages -> batched extraction -> aggregated persona set + summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregator::aggregate;
use crate::batch_inference::BatchOrchestrator;
use crate::config::PipelineSettings;
use crate::error::PipelineError;
use crate::persona::PersonaSet;
use crate::transcript::{self, ChatMessage, UniqueUsers};

pub const NO_PERSONAS_SUMMARY: &str = "No personas identified.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSummary {
    pub overall_summary: String,
    pub total_messages: usize,
    pub unique_users: UniqueUsers,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoAnalysis {
    pub video_id: String,
    pub personas: PersonaSet,
    pub summary: VideoSummary,
    pub generated_at: DateTime<Utc>,
}

pub fn analyze_transcript(
    video_id: &str,
    messages: &[ChatMessage],
    settings: &PipelineSettings,
    orchestrator: &BatchOrchestrator,
) -> Result<VideoAnalysis, PipelineError> {
    settings.validate()?;

    tracing::info!(video_id = %video_id, messages = messages.len(), "Analyzing transcript");

    let texts = transcript::texts(messages);
    let pool = orchestrator.run(&texts, settings.batch_size, settings.max_personas, settings.taxonomy)?;
    let personas = aggregate(pool, settings.max_personas);

    if personas.is_empty() {
        tracing::warn!(video_id = %video_id, "No personas identified");
    } else {
        tracing::info!(video_id = %video_id, personas = personas.len(), "Transcript analyzed");
    }

    let summary = VideoSummary {
        overall_summary: overall_summary(&personas),
        total_messages: messages.len(),
        unique_users: transcript::unique_users(messages),
    };

    Ok(VideoAnalysis {
        video_id: video_id.to_string(),
        personas,
        summary,
        generated_at: Utc::now(),
    })
}

/// `"<n> personas identified: <name> (<share>%), ..."`
pub fn overall_summary(personas: &PersonaSet) -> String {
    if personas.is_empty() {
        return NO_PERSONAS_SUMMARY.to_string();
    }
    let listed: Vec<String> = personas
        .personas
        .iter()
        .map(|p| format!("{} ({}%)", p.name, p.share))
        .collect();
    format!("{} personas identified: {}", personas.len(), listed.join(", "))
}
