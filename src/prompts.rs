// src/prompts.rs
// Prompts for persona extraction, one per taxonomy mode.

use crate::config::TaxonomyMode;

/// System prompt shared by both taxonomy modes
pub const PERSONA_SYSTEM_PROMPT: &str =
    "You analyze live-stream chats and extract structured insights.";

/// Build the user prompt for one batch under the given taxonomy
pub fn build_persona_prompt(messages: &[String], persona_count: usize, taxonomy: TaxonomyMode) -> String {
    match taxonomy {
        TaxonomyMode::Open => build_open_prompt(messages, persona_count),
        TaxonomyMode::Closed => build_closed_prompt(messages),
    }
}

fn render_messages(messages: &[String]) -> String {
    serde_json::to_string_pretty(messages).unwrap_or_else(|_| "[]".to_string())
}

/// Open-set taxonomy: the model names its own archetypes
pub fn build_open_prompt(messages: &[String], persona_count: usize) -> String {
    format!(
        r#"You are an expert in sociolinguistic and behavioral analysis of live streaming communities.

Your task is to analyze the following live chat messages and extract structured *viewer personas*. Use a step-by-step process.

Step 1: Assign every message to exactly one viewer persona. Identify at most {persona_count} distinct personas based on recurring communication patterns, tone, goals, and social cues.

Step 2: For each persona actually observed in the messages, generate the following structured data:
- "name": A concise, descriptive label (e.g., "The Hype Booster", "The Backseat Strategist")
- "description": 1-2 sentences describing their role or behavior in chat
- "share": An estimated percentage (0-100) of the messages that belong to this persona
- "sentiment_label": One of "Positive", "Neutral", or "Negative"
- "sentiment_percent": The proportion (0-100) of this persona's messages that carry that sentiment
- "theme": The dominant intent or tone (e.g., Encouragement, Critique, Humor, Frustration)
- "feedback": 3-5 representative chat messages from this persona group
- "key_feedback": A list of notable concerns or insights. Each entry includes:
    - "label": a short summary of the issue
    - "comments": example messages reflecting that issue
    - "recommendation": a concise suggestion for the streamer to address this

Step 3: Stay grounded. Use only information present in the provided messages. Do not fabricate messages, quotes, or interpretations that the messages do not support.

Input:
Sample Messages:
{messages}

Respond with a JSON object:
{{
  "personas": [
    {{
      "name": "...",
      "description": "...",
      "share": 40,
      "sentiment_label": "Positive",
      "sentiment_percent": 75,
      "theme": "...",
      "feedback": ["...", "..."],
      "key_feedback": [
        {{
          "label": "...",
          "comments": ["...", "..."],
          "recommendation": "..."
        }}
      ]
    }}
  ]
}}"#,
        persona_count = persona_count,
        messages = render_messages(messages),
    )
}

/// Closed-set taxonomy: System Alterer / Financial Sponsor / Social Player only
pub fn build_closed_prompt(messages: &[String]) -> String {
    format!(
        r#"You are an expert in sociolinguistics and behavioral analysis of live streaming communities.

Your task is to analyze the following live chat messages and extract structured *viewer personas*. Use only these grounded viewer types:

1. **System Alterer (SA)**: Viewers who attempt to influence or steer the streamer's behavior or content (e.g., advice, critique, backseating).
2. **Financial Sponsor (FS)**: Viewers motivated by financial support, including subs, donations, gifted memberships, or monetary encouragement.
3. **Social Player (SP)**: Viewers driven by social interaction, fun, and engagement (e.g., games, emotes, memes, raffles, in-group bonding).

### Example Classifications

Message: "Go back, you missed a chest!"
-> Persona: System Alterer, Focus: Streamer-focused

Message: "Just dropped 5 subs, love your energy!"
-> Persona: Financial Sponsor, Focus: Self-focused

Message: "Chat is wild today 😂😂"
-> Persona: Social Player, Focus: Chat-focused

Message: "Sorry I missed the stream, I try to tune in when I can!"
-> Persona: Social Player, Focus: Self-focused

Only classify as Financial Sponsor if the message clearly refers to monetary contributions or subscriptions. Emotional support or casual presence does not count.

### Step 1: Assign Every Message a Persona

Classify each message into exactly one of the three personas using a best-fit approach, and determine its communication focus:
- Streamer-focused: aimed at or about the streamer
- Chat-focused: engaging with other viewers or chat culture
- Self-focused: about the viewer's own experience or actions

### Step 2: Group Messages by Persona

Cluster the labeled messages by persona and use focus to distinguish behaviors.

### Step 3: Extract Persona Insights

For each persona type actually present in the data (omit types with no messages), produce:
- "name": One of "System Alterer", "Financial Sponsor", or "Social Player"
- "description": How this group communicates and how it differs from the others
- "share": Estimated percentage (0-100) of all messages represented by this group
- "sentiment_label": One of "Positive", "Neutral", or "Negative"
- "sentiment_percent": Approximate percentage with that sentiment
- "theme": Dominant communicative tone or function (e.g., Advice, Hype, Critique, Playfulness, Support)
- "focus": One of "Streamer-focused", "Chat-focused", "Self-focused"
- "feedback": 3-5 representative messages from this group
- "key_feedback": Thematic insights, each with "label", "comments" (supporting examples) and "recommendation"

### Step 4: Stay Grounded

Base all classifications and summaries only on the provided messages. Do not fabricate messages or infer intent that the content does not reflect.

Input:
Sample Messages:
{messages}

Respond with a JSON object:
{{
  "personas": [
    {{
      "name": "Social Player",
      "description": "...",
      "share": 60,
      "sentiment_label": "Positive",
      "sentiment_percent": 85,
      "theme": "Playfulness",
      "focus": "Chat-focused",
      "feedback": ["...", "..."],
      "key_feedback": [
        {{
          "label": "Community Energy",
          "comments": ["...", "..."],
          "recommendation": "..."
        }}
      ]
    }}
  ]
}}"#,
        messages = render_messages(messages),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<String> {
        vec!["gg".to_string(), "go left!".to_string()]
    }

    #[test]
    fn test_open_prompt_carries_count_and_messages() {
        let prompt = build_persona_prompt(&sample(), 4, TaxonomyMode::Open);
        assert!(prompt.contains("at most 4 distinct personas"));
        assert!(prompt.contains("\"go left!\""));
        assert!(prompt.contains("Do not fabricate"));
        assert!(prompt.contains("exactly one viewer persona"));
    }

    #[test]
    fn test_closed_prompt_lists_vocabulary() {
        let prompt = build_persona_prompt(&sample(), 3, TaxonomyMode::Closed);
        for name in crate::persona::CLOSED_SET_PERSONAS {
            assert!(prompt.contains(name), "missing {name}");
        }
        assert!(prompt.contains("\"focus\""));
        assert!(prompt.contains("Do not fabricate"));
    }

    #[test]
    fn test_messages_are_json_escaped() {
        let prompt = build_open_prompt(&["say \"hi\"".to_string()], 3);
        assert!(prompt.contains(r#""say \"hi\"""#));
    }
}
