//! Offline extractive generator.
//!
//! Reads the numbered context lines and the question out of the prompt and
//! answers with the context sentences sharing the most keywords with the
//! question, each cited by source id.

use async_trait::async_trait;

use colloquy_core::collaborator::{CollaboratorError, Generator};
use colloquy_router::extract::extract_keywords;

const MAX_SENTENCES: usize = 2;

#[derive(Debug, Clone, PartialEq)]
struct ContextLine {
    source_id: String,
    text: String,
}

/// Answers from the prompt's own context. Needs no model.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtractiveGenerator;

impl ExtractiveGenerator {
    pub fn new() -> Self {
        Self
    }
}

/// `[n] (source) text` lines of the `Context:` block.
fn parse_context(prompt: &str) -> Vec<ContextLine> {
    prompt
        .lines()
        .skip_while(|line| line.trim() != "Context:")
        .skip(1)
        .take_while(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let rest = line.trim().strip_prefix('[')?;
            let (_, rest) = rest.split_once("] (")?;
            let (source_id, text) = rest.split_once(") ")?;
            Some(ContextLine {
                source_id: source_id.to_string(),
                text: text.trim().to_string(),
            })
        })
        .collect()
}

fn parse_question(prompt: &str) -> Option<&str> {
    prompt
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix("Question: "))
        .map(str::trim)
}

fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if matches!(c, '.' | '?' | '!') {
            let end = i + c.len_utf8();
            let next = text[end..].chars().next();
            if next.is_none() || next.is_some_and(char::is_whitespace) {
                let sentence = text[start..end].trim();
                if !sentence.is_empty() {
                    out.push(sentence);
                }
                start = end;
            }
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

fn truncate_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return text.to_string();
    }
    format!("{}...", words[..max_words].join(" "))
}

#[async_trait]
impl Generator for ExtractiveGenerator {
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        _temperature: f32,
    ) -> Result<String, CollaboratorError> {
        let context = parse_context(prompt);
        if context.is_empty() {
            return Err(CollaboratorError::Malformed("prompt has no context".into()));
        }
        let terms = parse_question(prompt).map(extract_keywords).unwrap_or_default();

        // (overlap, position) keeps ties in context order.
        let mut ranked: Vec<(usize, usize, &str, &str)> = Vec::new();
        for line in &context {
            for sentence in sentences(&line.text) {
                let words = extract_keywords(sentence);
                let overlap = terms.iter().filter(|t| words.contains(t)).count();
                ranked.push((overlap, ranked.len(), sentence, line.source_id.as_str()));
            }
        }
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let picked: Vec<String> = match ranked.first() {
            None => {
                return Err(CollaboratorError::Malformed("prompt context is empty".into()));
            }
            Some(&(0, _, sentence, source)) => vec![format!("{} ({})", sentence, source)],
            Some(_) => {
                ranked
                    .iter()
                    .take(MAX_SENTENCES)
                    .filter(|r| r.0 > 0)
                    .map(|(_, _, sentence, source)| format!("{} ({})", sentence, source))
                    .collect()
            }
        };

        Ok(truncate_words(&picked.join(" "), max_tokens.max(1) as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROMPT: &str = "Answer the user's question using only the context below.\n\n\
        Conversation so far:\nUser: hi\n\n\
        Context:\n\
        [1] (handbook#1) Employees accrue 20 vacation days per year. Unused days expire in March.\n\
        [2] (wiki#1) Jane Smith leads the platform team.\n\
        \nQuestion: How many vacation days do employees get?\nAnswer:";

    #[test]
    fn test_parse_context_and_question() {
        let context = parse_context(PROMPT);
        assert_eq!(context.len(), 2);
        assert_eq!(context[0].source_id, "handbook#1");
        assert_eq!(context[1].text, "Jane Smith leads the platform team.");
        assert_eq!(
            parse_question(PROMPT),
            Some("How many vacation days do employees get?")
        );
    }

    #[test]
    fn test_sentence_split() {
        assert_eq!(
            sentences("Costs 2.5 units. Really? Yes"),
            vec!["Costs 2.5 units.", "Really?", "Yes"]
        );
    }

    #[tokio::test]
    async fn test_generate_picks_overlapping_sentences() {
        let answer = ExtractiveGenerator::new().generate(PROMPT, 512, 0.2).await.unwrap();
        assert!(answer.starts_with("Employees accrue 20 vacation days per year. (handbook#1)"));
        assert!(!answer.contains("Jane Smith"));
    }

    #[tokio::test]
    async fn test_generate_truncates_to_max_tokens() {
        let answer = ExtractiveGenerator::new().generate(PROMPT, 3, 0.2).await.unwrap();
        assert_eq!(answer, "Employees accrue 20...");
    }

    #[tokio::test]
    async fn test_generate_without_context_fails() {
        let err = ExtractiveGenerator::new()
            .generate("Question: anything?\nAnswer:", 64, 0.2)
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Malformed(_)));
    }
}
