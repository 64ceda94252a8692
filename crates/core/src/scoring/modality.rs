use crate::config::ModalityConfig;
use crate::models::{ChunkId, QueryIntent};
use crate::scoring::seeds::query_terms;
use crate::traits::ChunkStore;
use std::collections::HashMap;

const TABLE_HINTS: &[&str] = &[
    "table", "tables", "price", "prices", "pricing", "cost", "compare", "comparison", "list",
    "schedule", "spec", "specs", "specifications",
];
const DOCUMENT_HINTS: &[&str] = &[
    "pdf", "document", "documents", "brochure", "download", "report", "manual", "whitepaper",
];
const IMAGE_HINTS: &[&str] = &[
    "image", "images", "picture", "pictures", "photo", "photos", "diagram", "chart", "screenshot",
];

/// Coarse intent from keywords. Tables win over documents, documents over
/// images, so "download the price list" asks for a table.
pub fn classify_intent(query: &str) -> QueryIntent {
    let terms = query_terms(query);
    let mentions = |hints: &[&str]| terms.iter().any(|term| hints.contains(&term.as_str()));

    if mentions(TABLE_HINTS) {
        QueryIntent::WantsTable
    } else if mentions(DOCUMENT_HINTS) {
        QueryIntent::WantsDocument
    } else if mentions(IMAGE_HINTS) {
        QueryIntent::WantsImage
    } else {
        QueryIntent::WantsNarrative
    }
}

#[derive(Debug, Clone, Default)]
pub struct MultiModalScorer {
    config: ModalityConfig,
}

impl MultiModalScorer {
    pub fn new(config: ModalityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ModalityConfig {
        &self.config
    }

    /// Multiplicative boost per chunk: `match_boost` when the chunk's content
    /// type is what the intent asks for, `1.0` otherwise.
    pub fn score(&self, store: &dyn ChunkStore, intent: QueryIntent) -> HashMap<ChunkId, f64> {
        let preferred = intent.preferred_content();
        store
            .chunks()
            .map(|chunk| {
                let boost = match preferred {
                    Some(content_type) if chunk.content_type == content_type => self.config.match_boost,
                    _ => 1.0,
                };
                (chunk.chunk_id.clone(), boost)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::chunk;
    use crate::models::ContentType;
    use crate::stores::IndexSnapshot;

    #[test]
    fn intent_follows_keywords() {
        assert_eq!(classify_intent("Compare the pricing tiers"), QueryIntent::WantsTable);
        assert_eq!(classify_intent("Where is the product brochure?"), QueryIntent::WantsDocument);
        assert_eq!(classify_intent("show me a diagram of the office"), QueryIntent::WantsImage);
        assert_eq!(classify_intent("Who founded the company?"), QueryIntent::WantsNarrative);
    }

    #[test]
    fn table_hints_take_precedence() {
        assert_eq!(classify_intent("download the price list pdf"), QueryIntent::WantsTable);
    }

    #[test]
    fn only_matching_content_is_boosted() -> Result<(), crate::error::StoreError> {
        let store = IndexSnapshot::from_parts(
            vec![
                chunk("c-table", "https://a.test/", ContentType::Table, "Plan | Price", vec![1.0]),
                chunk("c-text", "https://a.test/", ContentType::Text, "Plans overview", vec![1.0]),
            ],
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )?;
        let scorer = MultiModalScorer::default();

        let boosts = scorer.score(&store, QueryIntent::WantsTable);
        assert_eq!(boosts["c-table"], 1.25);
        assert_eq!(boosts["c-text"], 1.0);

        let neutral = scorer.score(&store, QueryIntent::WantsNarrative);
        assert!(neutral.values().all(|boost| *boost == 1.0));
        Ok(())
    }
}
