//! Multi-signal ranking of nearest-neighbor candidates
//!
//! Each candidate gets four component scores in [0, 1] that are fused into
//! one composite score with the configured [`ScoringWeights`].

use jobmatch_core::{
    EmbeddingEntry, Index, JobId, JobMetadata, Result, ScoringConfig, ScoringWeights, UserQuery,
    Vector,
};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use crate::distance::{experience_fit, location_score, rescale_cosine, skill_overlap};

/// Per-signal scores of one candidate, each in [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ComponentScores {
    pub title_sim: f32,
    pub skill_overlap: f32,
    pub location_bonus: f32,
    pub experience_fit: f32,
}

/// A ranked recommendation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub job_id: JobId,
    pub composite_score: f32,
    pub component_scores: ComponentScores,
    pub metadata: JobMetadata,
}

/// A job pulled from the index together with its exact title cosine
#[derive(Debug, Clone)]
pub struct Candidate {
    pub entry: Arc<EmbeddingEntry>,
    /// Cosine between query and job title vectors, in [-1, 1]
    pub title_cosine: f32,
}

#[derive(Debug, Clone)]
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    /// Validates the configuration and normalizes its weights
    pub fn new(mut config: ScoringConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.config.weights
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn components(&self, query: &UserQuery, candidate: &Candidate) -> ComponentScores {
        let job = &candidate.entry.metadata;
        ComponentScores {
            title_sim: rescale_cosine(candidate.title_cosine),
            skill_overlap: skill_overlap(&query.skills, &job.skills, self.config.skill_match_threshold),
            location_bonus: location_score(
                &query.location,
                &query.preferred_locations,
                &job.location,
                self.config.region_bonus,
                self.config.preferred_location_bonus,
            ),
            experience_fit: experience_fit(
                query.experience,
                &job.experience_required,
                self.config.experience_tolerance,
            ),
        }
    }

    /// Weighted sum of the components
    pub fn composite(&self, scores: &ComponentScores) -> f32 {
        let w = &self.config.weights;
        let total = w.title * scores.title_sim
            + w.skills * scores.skill_overlap
            + w.location * scores.location_bonus
            + w.experience * scores.experience_fit;
        total.clamp(0.0, 1.0)
    }

    pub fn score(&self, query: &UserQuery, candidate: &Candidate) -> ScoredCandidate {
        let component_scores = self.components(query, candidate);
        ScoredCandidate {
            job_id: candidate.entry.job_id,
            composite_score: self.composite(&component_scores),
            component_scores,
            metadata: candidate.entry.metadata.clone(),
        }
    }

    /// Score, rank and truncate to `query.top_k`.
    ///
    /// Duplicate job ids keep their first occurrence. Ties on the composite
    /// score go to the higher skill overlap, then the lower job id.
    pub fn recommend<I>(&self, query: &UserQuery, candidates: I) -> Vec<ScoredCandidate>
    where
        I: IntoIterator<Item = Candidate>,
    {
        let mut seen = HashSet::new();
        let mut scored: Vec<ScoredCandidate> = candidates
            .into_iter()
            .filter(|c| seen.insert(c.entry.job_id))
            .map(|c| self.score(query, &c))
            .collect();

        scored.sort_by(rank_order);
        scored.truncate(query.top_k);
        scored
    }

    /// Rank index positions: tombstoned positions are dropped and the exact
    /// title cosine is computed against `title_query`.
    pub fn rank_positions<I>(
        &self,
        query: &UserQuery,
        index: &Index,
        title_query: &Vector,
        positions: I,
    ) -> Vec<ScoredCandidate>
    where
        I: IntoIterator<Item = usize>,
    {
        let candidates = positions.into_iter().filter_map(|position| {
            if index.is_tombstoned(position) {
                return None;
            }
            index.entry(position).map(|entry| Candidate {
                entry: entry.clone(),
                title_cosine: index.title_similarity(position, title_query),
            })
        });
        self.recommend(query, candidates)
    }
}

fn rank_order(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.composite_score
        .partial_cmp(&a.composite_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            b.component_scores
                .skill_overlap
                .partial_cmp(&a.component_scores.skill_overlap)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.job_id.cmp(&b.job_id))
}
