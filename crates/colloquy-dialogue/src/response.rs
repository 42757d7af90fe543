//! Response composition for each phase.
//!
//! Produces greeting, help, clarification, apology and farewell texts, the
//! extractive answer used when generation is unavailable, the generation
//! prompt, and suggested follow-up questions.

use colloquy_core::types::{
    ContextChunk, EndReason, IntentAnalysis, IntentLabel, MemoryItem, Role, Turn,
};
use colloquy_validator::Conflict;

use crate::types::excerpt;

/// Average quality below which extractive answers are hedged.
pub const CONFIDENT_QUALITY: f32 = 0.65;

const MAX_SUGGESTIONS: usize = 4;
const MIN_SUGGESTIONS: usize = 2;
const MAX_RELATED_TOPICS: usize = 5;

const GREETING: &str = "Hello! I can help you find information in your documents. \
                        Ask me a question, or say \"help\" to see what I can do.";

const HELP: &str = "You can ask me questions in plain language, for example \
                    \"What is the vacation policy?\", \"Compare the Basic and Plus plans\" \
                    or \"Who is Jane Smith?\". I search the available documents and answer \
                    with the sources I used. Say \"bye\" when you are done.";

const APOLOGY: &str = "Sorry, something went wrong while I was working on that. \
                       Could you try asking again, perhaps in a different way?";

// =============================================================================
// ResponseComposer
// =============================================================================

/// Composes user-facing text. Holds no per-session state.
#[derive(Debug, Clone, Default)]
pub struct ResponseComposer;

impl ResponseComposer {
    pub fn new() -> Self {
        Self
    }

    pub fn greeting(&self) -> String {
        GREETING.to_string()
    }

    pub fn help(&self) -> String {
        HELP.to_string()
    }

    pub fn apology(&self) -> String {
        APOLOGY.to_string()
    }

    /// Reply to a repeated greeting in the middle of a conversation.
    pub fn greeting_again(&self) -> String {
        "Hello again! What would you like to know?".to_string()
    }

    /// Farewell for the given end condition.
    pub fn farewell(&self, reason: EndReason) -> String {
        match reason {
            EndReason::Goodbye | EndReason::Explicit => {
                "Goodbye! Thanks for the conversation.".to_string()
            }
            EndReason::TurnLimit => "We've reached the length limit for this conversation. \
                 Please start a new session if you have more questions. Goodbye!"
                .to_string(),
            EndReason::RetryLimit => "I wasn't able to find what you were looking for after \
                 several attempts, so I'm ending this conversation. Please start a new session \
                 and try rephrasing your question. Goodbye!"
                .to_string(),
            EndReason::ErrorLimit => "I've run into too many problems in this conversation \
                 and need to end it. Please start a new session. Sorry for the trouble!"
                .to_string(),
            EndReason::IdleTimeout => {
                "This conversation was closed after a period of inactivity. Goodbye!".to_string()
            }
        }
    }

    /// Ask the user to narrow down `query` after nothing usable was found.
    pub fn clarification(&self, query: &str) -> String {
        format!(
            "I couldn't find reliable information about \"{}\". Could you add more detail, \
             such as a specific document, team or time period?",
            query.trim()
        )
    }

    /// Suggested narrowing questions sent with a clarification.
    pub fn clarification_suggestions(&self, analysis: &IntentAnalysis) -> Vec<String> {
        let mut suggestions = Vec::new();
        if let Some(keyword) = analysis.keywords.first() {
            suggestions.push(format!("Which document covers {}?", keyword));
        }
        for (term, synonyms) in &analysis.synonyms {
            if let Some(alternative) = synonyms.first() {
                suggestions.push(format!("Try asking about {} instead of {}", alternative, term));
                break;
            }
        }
        pad(&mut suggestions, &["Try different keywords", "Ask a more specific question"]);
        suggestions
    }

    /// Answer composed directly from accepted chunks, without generation.
    pub fn extractive_answer(&self, chunks: &[ContextChunk], average_quality: f32) -> String {
        let answer = match chunks {
            [] => return "I couldn't find anything relevant to answer that.".to_string(),
            [single] => format!("according to {}: {}", single.source_id, single.content.trim()),
            many => {
                let mut lines = vec![format!("here is what {} sources say:", many.len())];
                for chunk in many {
                    lines.push(format!(
                        "- {}: {}",
                        chunk.source_id,
                        excerpt(&chunk.content, 300)
                    ));
                }
                lines.join("\n")
            }
        };

        if average_quality < CONFIDENT_QUALITY {
            format!("I'm not very confident, but {}", answer)
        } else {
            capitalize(&answer)
        }
    }

    /// Uncertainty note for contradicting sources, or `None`.
    pub fn conflict_hint(&self, conflicts: &[Conflict]) -> Option<String> {
        let first = conflicts.first()?;
        Some(if conflicts.len() == 1 {
            format!(
                "Note: the sources disagree ({}). Please double-check before relying on this.",
                first.detail
            )
        } else {
            format!(
                "Note: the sources disagree in {} places (for example, {}). Please double-check \
                 before relying on this.",
                conflicts.len(),
                first.detail
            )
        })
    }

    /// Prompt handed to the generation collaborator.
    pub fn build_prompt(
        &self,
        question: &str,
        chunks: &[ContextChunk],
        conflicts: &[Conflict],
        recent: &[Turn],
        remembered: &[MemoryItem],
    ) -> String {
        let mut prompt = String::from(
            "Answer the user's question using only the context below. \
             Cite sources by their id. If the context is insufficient, say so.\n\n",
        );

        if !recent.is_empty() {
            prompt.push_str("Conversation so far:\n");
            for turn in recent {
                let speaker = match turn.role {
                    Role::User => "User",
                    Role::Assistant => "Assistant",
                    Role::System => "System",
                };
                prompt.push_str(&format!("{}: {}\n", speaker, turn.text));
            }
            prompt.push('\n');
        }

        if !remembered.is_empty() {
            prompt.push_str("Remembered from earlier in the conversation:\n");
            for item in remembered {
                prompt.push_str(&format!("- {}\n", item.content.trim()));
            }
            prompt.push('\n');
        }

        prompt.push_str("Context:\n");
        for (i, chunk) in chunks.iter().enumerate() {
            prompt.push_str(&format!(
                "[{}] ({}) {}\n",
                i + 1,
                chunk.source_id,
                chunk.content.trim()
            ));
        }

        if !conflicts.is_empty() {
            prompt.push_str("\nThe sources contradict each other:\n");
            for conflict in conflicts {
                prompt.push_str(&format!("- {}\n", conflict.detail));
            }
            prompt.push_str("Mention the disagreement in your answer.\n");
        }

        prompt.push_str(&format!("\nQuestion: {}\nAnswer:", question.trim()));
        prompt
    }

    /// Two to four follow-up questions for an answered turn.
    pub fn suggestions(&self, analysis: &IntentAnalysis, chunks: &[ContextChunk]) -> Vec<String> {
        let mut suggestions = Vec::new();

        if !chunks.is_empty() {
            suggestions.push("Tell me more about this".to_string());
        }
        if let Some(entity) = analysis.entities.first() {
            suggestions.push(format!("What team is {} on?", entity));
        }
        if let Some(keyword) = analysis.keywords.first() {
            match analysis.label {
                IntentLabel::Comparison => {
                    suggestions.push(format!("Which option is best for {}?", keyword))
                }
                _ => suggestions.push(format!("Are there exceptions to the {} rules?", keyword)),
            }
        }
        if let Some(alternative) = analysis.synonyms.values().flatten().next() {
            suggestions.push(format!("What about {}?", alternative));
        }

        suggestions.truncate(MAX_SUGGESTIONS);
        pad(&mut suggestions, &["Tell me more about this", "What else should I know?"]);
        suggestions
    }

    /// Suggestions after a greeting or help turn.
    pub fn starter_suggestions(&self) -> Vec<String> {
        vec![
            "What is the vacation policy?".to_string(),
            "How do I request equipment?".to_string(),
            "Who should I contact about payroll?".to_string(),
        ]
    }

    /// Topics related to this turn: synonym terms first, then earlier topics.
    pub fn related_topics(&self, analysis: &IntentAnalysis, discussed: &[String]) -> Vec<String> {
        let mut topics: Vec<String> = Vec::new();
        let current: Vec<String> = analysis.keywords.iter().map(|k| k.to_lowercase()).collect();

        let candidates = analysis
            .synonyms
            .values()
            .flatten()
            .cloned()
            .chain(discussed.iter().rev().cloned());

        for topic in candidates {
            let topic = topic.to_lowercase();
            if current.contains(&topic) || topics.contains(&topic) {
                continue;
            }
            topics.push(topic);
            if topics.len() == MAX_RELATED_TOPICS {
                break;
            }
        }
        topics
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn pad(suggestions: &mut Vec<String>, generic: &[&str]) {
    for g in generic {
        if suggestions.len() >= MIN_SUGGESTIONS {
            break;
        }
        if !suggestions.iter().any(|s| s == g) {
            suggestions.push(g.to_string());
        }
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// =============================================================================
// Tests
// =============================================================================
