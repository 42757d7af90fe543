//! JSON document corpus with keyword-overlap retrieval.
//!
//! The corpus file is a JSON array of documents:
//!
//! ```json
//! [{"id": "handbook", "content": "Employees accrue ...", "metadata": {"dept": "hr"}}]
//! ```
//!
//! Each document is split into paragraphs on blank lines. A paragraph's
//! score is the fraction of query keywords it contains.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use colloquy_core::collaborator::{CollaboratorError, RetrievedDocument, Retriever, SearchFilters};
use colloquy_core::error::Result;
use colloquy_core::types::Metadata;
use colloquy_router::extract::extract_keywords;

#[derive(Debug, Clone, Deserialize)]
pub struct CorpusDocument {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone)]
struct Passage {
    source_id: String,
    content: String,
    lowered: String,
    keywords: Vec<String>,
    metadata: Metadata,
}

/// In-memory keyword retriever over a loaded corpus.
#[derive(Debug, Default)]
pub struct CorpusRetriever {
    passages: Vec<Passage>,
}

impl CorpusRetriever {
    /// Load a corpus from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let retriever = Self::from_json(&content)?;
        info!(
            path = %path.display(),
            passages = retriever.len(),
            "Corpus loaded"
        );
        Ok(retriever)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let documents: Vec<CorpusDocument> = serde_json::from_str(json)?;
        Ok(Self::from_documents(documents))
    }

    pub fn from_documents(documents: Vec<CorpusDocument>) -> Self {
        let mut passages = Vec::new();
        for doc in documents {
            let paragraphs = doc
                .content
                .split("\n\n")
                .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
                .filter(|p| !p.is_empty());
            for (i, paragraph) in paragraphs.enumerate() {
                passages.push(Passage {
                    source_id: format!("{}#{}", doc.id, i + 1),
                    lowered: paragraph.to_lowercase(),
                    keywords: extract_keywords(&paragraph),
                    content: paragraph,
                    metadata: doc.metadata.clone(),
                });
            }
        }
        Self { passages }
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    fn matches_filters(passage: &Passage, filters: &SearchFilters) -> bool {
        if let Some(ref entity) = filters.entity {
            if !passage.lowered.contains(&entity.to_lowercase()) {
                return false;
            }
        }
        filters.metadata.iter().all(|(key, expected)| {
            match passage.metadata.get(key) {
                Some(serde_json::Value::String(s)) => s == expected,
                Some(other) => other.to_string() == *expected,
                None => false,
            }
        })
    }
}

#[async_trait]
impl Retriever for CorpusRetriever {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filters: &SearchFilters,
    ) -> std::result::Result<Vec<RetrievedDocument>, CollaboratorError> {
        let terms = extract_keywords(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f32, &Passage)> = self
            .passages
            .iter()
            .filter(|p| Self::matches_filters(p, filters))
            .filter_map(|p| {
                let hits = terms.iter().filter(|t| p.keywords.contains(t)).count();
                (hits > 0).then(|| (hits as f32 / terms.len() as f32, p))
            })
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.source_id.cmp(&b.1.source_id))
        });
        scored.truncate(top_k);

        debug!(query, hits = scored.len(), "Corpus search");
        Ok(scored
            .into_iter()
            .map(|(score, p)| RetrievedDocument {
                content: p.content.clone(),
                score,
                source_id: p.source_id.clone(),
                metadata: p.metadata.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CORPUS: &str = r#"[
        {"id": "handbook", "content": "Employees accrue 20 vacation days per year.\n\nParental leave lasts 16 weeks.", "metadata": {"dept": "hr"}},
        {"id": "wiki", "content": "Jane Smith leads the platform team. Vacation requests go to her.", "metadata": {"dept": "eng"}}
    ]"#;

    #[test]
    fn test_paragraphs_become_passages() {
        let corpus = CorpusRetriever::from_json(CORPUS).unwrap();
        assert_eq!(corpus.len(), 3);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CORPUS.as_bytes()).unwrap();
        let corpus = CorpusRetriever::load(file.path()).unwrap();
        assert!(!corpus.is_empty());
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(CorpusRetriever::from_json("{not json").is_err());
    }

    #[tokio::test]
    async fn test_search_ranks_by_overlap() {
        let corpus = CorpusRetriever::from_json(CORPUS).unwrap();
        let results = corpus
            .search("vacation days", 8, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].source_id, "handbook#1");
        assert_eq!(results[0].score, 1.0);
        assert_eq!(results[1].source_id, "wiki#1");
        assert_eq!(results[1].score, 0.5);
    }

    #[tokio::test]
    async fn test_search_honours_top_k_and_filters() {
        let corpus = CorpusRetriever::from_json(CORPUS).unwrap();
        let top = corpus
            .search("vacation", 1, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(top.len(), 1);

        let mut filters = SearchFilters::default();
        filters.metadata.insert("dept".into(), "eng".into());
        let eng = corpus.search("vacation", 8, &filters).await.unwrap();
        assert_eq!(eng.len(), 1);
        assert_eq!(eng[0].source_id, "wiki#1");

        let filters = SearchFilters {
            entity: Some("jane smith".into()),
            ..Default::default()
        };
        let jane = corpus.search("vacation", 8, &filters).await.unwrap();
        assert_eq!(jane.len(), 1);
    }

    #[tokio::test]
    async fn test_search_without_keywords_is_empty() {
        let corpus = CorpusRetriever::from_json(CORPUS).unwrap();
        let results = corpus
            .search("what is the", 8, &SearchFilters::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
