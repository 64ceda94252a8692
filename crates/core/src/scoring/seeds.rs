use crate::models::NodeId;
use crate::traits::ChunkStore;
use std::collections::BTreeSet;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "your", "all", "any", "can", "how", "what",
    "when", "where", "which", "who", "why", "with", "this", "that", "from", "have", "has", "does",
    "about", "there", "their", "into", "some", "more", "was", "were", "will", "would", "should",
    "could", "our", "out", "get", "tell",
];

/// Lower-cased content terms of a query, in first-seen order.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for token in query
        .split(|ch: char| !ch.is_alphanumeric())
        .map(str::to_lowercase)
    {
        if token.chars().count() > 2 && !STOPWORDS.contains(&token.as_str()) && !terms.contains(&token) {
            terms.push(token);
        }
    }
    terms
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

/// Graph nodes a walk should start from for `query`: entity nodes whose name
/// shares a term with the query, and chunks tagged with one of those terms.
/// Without any entity match, chunks containing the most specific query term
/// are used instead.
pub fn derive_seeds(store: &dyn ChunkStore, query: &str) -> Vec<NodeId> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return Vec::new();
    }

    let mut seeds: BTreeSet<NodeId> = BTreeSet::new();
    for entity in store.entities() {
        if tokens(&entity.name).any(|token| terms.contains(&token)) {
            seeds.insert(entity.node_id.clone());
        }
    }
    for chunk in store.chunks() {
        let tagged = chunk
            .entity_tags
            .iter()
            .flat_map(|tag| tokens(tag).collect::<Vec<_>>())
            .any(|token| terms.contains(&token));
        if tagged {
            seeds.insert(chunk.chunk_id.clone());
        }
    }

    if seeds.is_empty() {
        let longest = terms
            .iter()
            .max_by(|left, right| left.len().cmp(&right.len()).then(right.cmp(left)));
        if let Some(term) = longest {
            for chunk in store.chunks() {
                if chunk.text.to_lowercase().contains(term.as_str()) {
                    seeds.insert(chunk.chunk_id.clone());
                }
            }
        }
    }

    seeds.into_iter().collect()
}
