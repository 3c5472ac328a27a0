//! Query title correction against the indexed title vocabulary

use std::sync::Arc;
use tracing::debug;

use crate::distance::title_similarity;

/// Snaps a free-text title to the closest known job title.
///
/// The vocabulary is the one captured by an [`Index`](jobmatch_core::Index),
/// so a normalizer built from one index version never sees titles from
/// another.
#[derive(Debug, Clone)]
pub struct TitleNormalizer {
    vocabulary: Arc<Vec<String>>,
    threshold: f64,
}

impl TitleNormalizer {
    pub fn new(vocabulary: Arc<Vec<String>>, threshold: f64) -> Self {
        Self {
            vocabulary,
            threshold,
        }
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }

    /// Returns the best vocabulary title when its similarity reaches the
    /// threshold, otherwise the raw title unchanged.
    ///
    /// Exact case-insensitive matches win immediately. Equal similarities go
    /// to the lexicographically smaller title.
    pub fn normalize(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        if trimmed.is_empty() || self.vocabulary.is_empty() {
            return raw.to_string();
        }

        if let Some(exact) = self
            .vocabulary
            .iter()
            .filter(|t| t.trim().eq_ignore_ascii_case(trimmed))
            .min()
        {
            return exact.clone();
        }

        let mut best: Option<(&String, f64)> = None;
        for title in self.vocabulary.iter() {
            let sim = title_similarity(trimmed, title);
            best = match best {
                Some((current, score)) if score > sim || (score == sim && current <= title) => {
                    Some((current, score))
                }
                _ => Some((title, sim)),
            };
        }

        match best {
            Some((title, score)) if score >= self.threshold => {
                debug!("Corrected title '{}' -> '{}' ({:.3})", raw, title, score);
                title.clone()
            }
            _ => raw.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer(titles: &[&str]) -> TitleNormalizer {
        let vocabulary = titles.iter().map(|t| t.to_string()).collect();
        TitleNormalizer::new(Arc::new(vocabulary), 0.8)
    }

    #[test]
    fn test_corrects_misspelling() {
        let n = normalizer(&["Data Scientist", "Data Analyst", "Chef"]);
        assert_eq!(n.normalize("data scienctist"), "Data Scientist");
    }

    #[test]
    fn test_exact_match_case_insensitive() {
        let n = normalizer(&["Data Scientist", "Chef"]);
        assert_eq!(n.normalize("  CHEF "), "Chef");
    }

    #[test]
    fn test_below_threshold_returns_raw() {
        let n = normalizer(&["Data Scientist", "Chef"]);
        assert_eq!(n.normalize("Astronaut"), "Astronaut");
    }

    #[test]
    fn test_blank_and_empty_vocabulary() {
        assert_eq!(normalizer(&["Chef"]).normalize("   "), "   ");
        assert_eq!(normalizer(&[]).normalize("Chef"), "Chef");
    }

    #[test]
    fn test_ties_go_to_smaller_title() {
        // Both candidates are a token superset of the query
        let n = normalizer(&["Senior Engineer", "Junior Engineer"]);
        assert_eq!(n.normalize("Engineer"), "Junior Engineer");
    }

    #[test]
    fn test_idempotent() {
        let n = normalizer(&["Data Scientist", "Data Analyst"]);
        let once = n.normalize("data scienctist");
        assert_eq!(n.normalize(&once), once);
    }
}
