//! Per-mode fusion of signal outputs into one ranked, deduplicated evidence list.
//!
//! Every ranking signal is min-max normalised over the candidate universe with
//! the lower bound anchored at zero, then combined with weights renormalised
//! over the signals that actually produced output.

use crate::config::{EngineConfig, FusionWeights, ModalityConfig};
use crate::error::{QueryError, SignalFailure};
use crate::models::{ChunkId, ScoredEvidence, SearchMode, Signal, SignalScores};
use crate::traits::ChunkStore;
use std::collections::{BTreeSet, HashMap};

/// Output of one scorer for one query.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SignalOutcome {
    Available(HashMap<String, f64>),
    Unavailable(SignalFailure),
    #[default]
    NotRequested,
}

impl SignalOutcome {
    pub fn scores(&self) -> Option<&HashMap<String, f64>> {
        match self {
            SignalOutcome::Available(scores) => Some(scores),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&SignalFailure> {
        match self {
            SignalOutcome::Unavailable(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, SignalOutcome::Available(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SignalSet {
    pub semantic: SignalOutcome,
    pub graph: SignalOutcome,
    pub modality: SignalOutcome,
}

impl SignalSet {
    pub fn get(&self, signal: Signal) -> &SignalOutcome {
        match signal {
            Signal::Semantic => &self.semantic,
            Signal::Graph => &self.graph,
            Signal::Modality => &self.modality,
        }
    }

    pub fn failures(&self) -> Vec<SignalFailure> {
        [&self.semantic, &self.graph, &self.modality]
            .into_iter()
            .filter_map(SignalOutcome::failure)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct Normalizer {
    low: f64,
    high: f64,
}

impl Normalizer {
    fn over<'a>(values: impl Iterator<Item = &'a f64>) -> Self {
        let mut low = 0.0f64;
        let mut high = f64::NEG_INFINITY;
        for value in values {
            low = low.min(*value);
            high = high.max(*value);
        }
        Self { low, high }
    }

    fn apply(&self, value: Option<f64>) -> f64 {
        let Some(value) = value else {
            return 0.0;
        };
        let span = self.high - self.low;
        if span <= f64::EPSILON {
            return if self.high > 0.0 { 1.0 } else { 0.0 };
        }
        ((value - self.low) / span).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FusionRanker {
    weights: FusionWeights,
    modality: ModalityConfig,
}

impl FusionRanker {
    pub fn new(weights: FusionWeights, modality: ModalityConfig) -> Self {
        Self { weights, modality }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.fusion, config.modality)
    }

    /// Weights of the ranking signals that take part in `mode`, renormalised
    /// over the ones that are available. A signal that ran but scored nothing
    /// (a walk without seeds) gives up its weight to signals that did score.
    /// Empty when no signal is available.
    pub fn effective_weights(&self, mode: SearchMode, signals: &SignalSet) -> Vec<(Signal, f64)> {
        let configured = [
            (Signal::Semantic, self.weights.semantic),
            (Signal::Graph, self.weights.graph),
        ];
        let mut available: Vec<(Signal, f64)> = configured
            .into_iter()
            .filter(|(signal, _)| mode.uses(*signal) && signals.get(*signal).is_available())
            .collect();
        let scored = |signal: Signal| {
            signals
                .get(signal)
                .scores()
                .is_some_and(|scores| !scores.is_empty())
        };
        if available.iter().any(|(signal, _)| scored(*signal)) {
            available.retain(|(signal, _)| scored(*signal));
        }

        let total: f64 = available.iter().map(|(_, weight)| weight).sum();
        if total > 0.0 {
            available
                .into_iter()
                .map(|(signal, weight)| (signal, weight / total))
                .collect()
        } else {
            let share = 1.0 / available.len().max(1) as f64;
            available.into_iter().map(|(signal, _)| (signal, share)).collect()
        }
    }

    pub fn rank(
        &self,
        mode: SearchMode,
        signals: &SignalSet,
        store: &dyn ChunkStore,
        top_k: usize,
    ) -> Result<Vec<ScoredEvidence>, QueryError> {
        if store.all_chunk_count() == 0 {
            return Err(QueryError::EmptyIndex);
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let weights = self.effective_weights(mode, signals);
        if weights.is_empty() {
            return Err(QueryError::AllSignalsUnavailable {
                failures: signals.failures(),
            });
        }

        // Graph scores include page and entity nodes; only chunks are evidence.
        let universe: BTreeSet<&str> = weights
            .iter()
            .filter_map(|(signal, _)| signals.get(*signal).scores())
            .flat_map(|scores| scores.keys())
            .map(String::as_str)
            .filter(|id| store.contains_chunk(id))
            .collect();

        let normalizers: Vec<(Signal, f64, &HashMap<String, f64>, Normalizer)> = weights
            .iter()
            .filter_map(|(signal, weight)| {
                signals.get(*signal).scores().map(|scores| {
                    let normalizer = Normalizer::over(
                        universe.iter().filter_map(|id| scores.get(*id)),
                    );
                    (*signal, *weight, scores, normalizer)
                })
            })
            .collect();

        let mut fused: Vec<(&str, f64)> = universe
            .iter()
            .map(|id| {
                let score = normalizers
                    .iter()
                    .map(|(_, weight, scores, normalizer)| {
                        weight * normalizer.apply(scores.get(*id).copied())
                    })
                    .sum::<f64>();
                (*id, score)
            })
            .collect();

        if mode.uses(Signal::Modality) {
            if let Some(boosts) = signals.modality.scores() {
                let ceiling =
                    fused.iter().map(|(_, score)| *score).fold(0.0f64, f64::max) * (1.0 + self.modality.cap);
                for (id, score) in &mut fused {
                    let boost = boosts.get(*id).copied().unwrap_or(1.0);
                    *score = (*score * boost).min(ceiling);
                }
            }
        }

        fused.sort_by(|left, right| right.1.total_cmp(&left.1).then_with(|| left.0.cmp(right.0)));
        fused.truncate(top_k);

        let ids: Vec<ChunkId> = fused.iter().map(|(id, _)| id.to_string()).collect();
        let chunks = store.chunks_by_ids(&ids)?;

        Ok(chunks
            .into_iter()
            .zip(fused)
            .map(|(chunk, (_, fused_score))| {
                let raw = |outcome: &SignalOutcome| {
                    outcome.scores().and_then(|scores| scores.get(&chunk.chunk_id).copied())
                };
                let scores = SignalScores {
                    semantic: raw(&signals.semantic),
                    graph: raw(&signals.graph),
                    modality_boost: raw(&signals.modality),
                };
                ScoredEvidence {
                    chunk,
                    scores,
                    fused_score,
                }
            })
            .collect())
    }
}
