//! Reply shapes returned by the dialogue controller and the orchestrator.

use serde::{Deserialize, Serialize};

use colloquy_core::types::{ContextChunk, Phase};

/// Longest excerpt carried in a [`SourceRef`], in characters.
pub const EXCERPT_CHARS: usize = 160;

/// Reference to a chunk that backed an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub source_id: String,
    pub excerpt: String,
    pub quality_score: f32,
}

impl From<&ContextChunk> for SourceRef {
    fn from(chunk: &ContextChunk) -> Self {
        Self {
            source_id: chunk.source_id.clone(),
            excerpt: excerpt(&chunk.content, EXCERPT_CHARS),
            quality_score: chunk.quality_score,
        }
    }
}

/// Assistant reply produced by one controller step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub text: String,
    pub suggested_questions: Vec<String>,
    pub related_topics: Vec<String>,
    pub sources: Vec<SourceRef>,
    /// Errors recovered during this turn, as user-facing strings.
    pub errors: Vec<String>,
    /// Phase the session is in once the turn committed.
    pub phase: Phase,
}

impl Reply {
    /// Reply with text only.
    pub fn text(text: impl Into<String>, phase: Phase) -> Self {
        Self {
            text: text.into(),
            suggested_questions: Vec::new(),
            related_topics: Vec::new(),
            sources: Vec::new(),
            errors: Vec::new(),
            phase,
        }
    }
}

/// Response to `start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartResponse {
    pub session_id: String,
    pub greeting_text: String,
}

/// Response to `send_message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResponse {
    pub response_text: String,
    pub suggested_questions: Vec<String>,
    pub related_topics: Vec<String>,
    pub sources: Vec<SourceRef>,
    pub errors: Vec<String>,
    pub phase: Phase,
}

impl From<Reply> for TurnResponse {
    fn from(reply: Reply) -> Self {
        Self {
            response_text: reply.text,
            suggested_questions: reply.suggested_questions,
            related_topics: reply.related_topics,
            sources: reply.sources,
            errors: reply.errors,
            phase: reply.phase,
        }
    }
}

/// First `max_chars` characters of `text`, cut at a word boundary when one
/// is available, with an ellipsis when shortened.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    let cut = match cut.rfind(char::is_whitespace) {
        Some(pos) if pos > 0 => &cut[..pos],
        _ => cut.as_str(),
    };
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_short_text_unchanged() {
        assert_eq!(excerpt("  twenty days  ", 160), "twenty days");
    }

    #[test]
    fn test_excerpt_cuts_at_word_boundary() {
        let text = "Full-time employees accrue twenty days of paid vacation";
        assert_eq!(excerpt(text, 20), "Full-time employees...");
    }

    #[test]
    fn test_excerpt_without_whitespace() {
        assert_eq!(excerpt("abcdefghij", 4), "abcd...");
    }

    #[test]
    fn test_source_ref_from_chunk() {
        let mut chunk = ContextChunk::new("Vacation is twenty days.", "handbook#3", 0.8);
        chunk.quality_score = 0.88;
        let source = SourceRef::from(&chunk);
        assert_eq!(source.source_id, "handbook#3");
        assert_eq!(source.excerpt, "Vacation is twenty days.");
        assert!((source.quality_score - 0.88).abs() < 1e-6);
    }

    #[test]
    fn test_turn_response_from_reply() {
        let mut reply = Reply::text("Hello!", Phase::Understanding);
        reply.suggested_questions.push("What can you do?".into());
        let response = TurnResponse::from(reply);
        assert_eq!(response.response_text, "Hello!");
        assert_eq!(response.suggested_questions.len(), 1);
        assert_eq!(response.phase, Phase::Understanding);
    }
}
