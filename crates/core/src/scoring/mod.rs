//! Independent relevance signals. Each scorer is a pure function of the
//! shared snapshot and its inputs; fusion happens in [`crate::fusion`].

pub mod graph_walk;
pub mod modality;
pub mod seeds;
pub mod semantic;

pub use graph_walk::{shortest_path, GraphWalkScorer};
pub use modality::{classify_intent, MultiModalScorer};
pub use seeds::{derive_seeds, query_terms};
pub use semantic::{cosine_similarity, SemanticScorer};
