use crate::error::ConfigError;
use crate::models::RelationType;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::path::Path;
use std::time::Duration;

/// Relative weights of the two ranking signals in HYBRID and MULTIMODAL modes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FusionWeights {
    pub semantic: f64,
    pub graph: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            semantic: 0.5,
            graph: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelationWeights {
    pub links_to: f64,
    pub has_chunk: f64,
    pub contains: f64,
    pub mentions: f64,
    pub related_to: f64,
}

impl Default for RelationWeights {
    fn default() -> Self {
        Self {
            links_to: 0.8,
            has_chunk: 1.0,
            contains: 0.9,
            mentions: 1.0,
            related_to: 0.6,
        }
    }
}

impl RelationWeights {
    pub fn weight(&self, relation: RelationType) -> f64 {
        match relation {
            RelationType::LinksTo => self.links_to,
            RelationType::HasChunk => self.has_chunk,
            RelationType::Contains => self.contains,
            RelationType::Mentions => self.mentions,
            RelationType::RelatedTo => self.related_to,
        }
    }

    fn all(&self) -> [f64; 5] {
        [
            self.links_to,
            self.has_chunk,
            self.contains,
            self.mentions,
            self.related_to,
        ]
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GraphWalkConfig {
    pub max_depth: u32,
    pub decay: f64,
    pub relation_weights: RelationWeights,
    /// Upper bound on distinct nodes scored by one walk, across all seeds.
    pub max_visited: usize,
}

impl Default for GraphWalkConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            decay: 0.7,
            relation_weights: RelationWeights::default(),
            max_visited: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModalityConfig {
    /// Multiplier for chunks whose content type matches the query intent.
    pub match_boost: f64,
    /// A boosted chunk may exceed the best unboosted score by at most this fraction.
    pub cap: f64,
}

impl Default for ModalityConfig {
    fn default() -> Self {
        Self {
            match_boost: 1.25,
            cap: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConfidenceWeights {
    pub agreement: f64,
    pub coverage: f64,
    pub citation_density: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            agreement: 0.4,
            coverage: 0.3,
            citation_density: 0.3,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub fusion: FusionWeights,
    pub graph_walk: GraphWalkConfig,
    pub modality: ModalityConfig,
    pub confidence: ConfidenceWeights,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub scorer_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub stage_timeout: Duration,
    pub max_facts: usize,
    pub related_content_limit: usize,
    pub evidence_excerpt_chars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fusion: FusionWeights::default(),
            graph_walk: GraphWalkConfig::default(),
            modality: ModalityConfig::default(),
            confidence: ConfidenceWeights::default(),
            scorer_timeout: Duration::from_secs(2),
            stage_timeout: Duration::from_secs(30),
            max_facts: 8,
            related_content_limit: 5,
            evidence_excerpt_chars: 400,
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fusion = [self.fusion.semantic, self.fusion.graph];
        if fusion.iter().any(|weight| !weight.is_finite() || *weight < 0.0) {
            return Err(ConfigError::Invalid(
                "fusion weights must be finite and non-negative".to_string(),
            ));
        }
        if fusion.iter().sum::<f64>() <= 0.0 {
            return Err(ConfigError::Invalid(
                "at least one fusion weight must be positive".to_string(),
            ));
        }

        let decay = self.graph_walk.decay;
        if !(decay > 0.0 && decay <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "graph decay must be in (0, 1], got {decay}"
            )));
        }
        if self
            .graph_walk
            .relation_weights
            .all()
            .iter()
            .any(|weight| !(0.0..=1.0).contains(weight))
        {
            return Err(ConfigError::Invalid(
                "relation weights must be within [0, 1]".to_string(),
            ));
        }

        if !(self.modality.match_boost.is_finite() && self.modality.match_boost > 0.0) {
            return Err(ConfigError::Invalid(
                "modality match boost must be positive".to_string(),
            ));
        }
        if !(self.modality.cap.is_finite() && self.modality.cap >= 0.0) {
            return Err(ConfigError::Invalid(
                "modality cap must be non-negative".to_string(),
            ));
        }

        let confidence = [
            self.confidence.agreement,
            self.confidence.coverage,
            self.confidence.citation_density,
        ];
        if confidence.iter().any(|weight| *weight < 0.0) || confidence.iter().sum::<f64>() <= 0.0 {
            return Err(ConfigError::Invalid(
                "confidence weights must be non-negative with a positive sum".to_string(),
            ));
        }

        if self.scorer_timeout.is_zero() || self.stage_timeout.is_zero() {
            return Err(ConfigError::Invalid("timeouts must be non-zero".to_string()));
        }

        Ok(())
    }
}
