//! Embedding-function contract and a deterministic hashing embedder.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use crate::vector::Vector;
use crate::Result;

/// Default dimension of [`HashingEmbedder`] vectors
pub const DEFAULT_EMBEDDING_DIM: usize = 256;

/// Opaque text -> fixed-length vector function.
///
/// Implementations must be deterministic for identical input. Temporary
/// unavailability is reported as [`crate::Error::TransientFetch`].
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vector>;
}

/// Feature-hashing embedder over character trigrams and words.
///
/// Stands in for model inference: identical text always yields the same
/// unit vector, and texts sharing many trigrams point in similar directions.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIM)
    }
}

impl Embedder for HashingEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Result<Vector> {
        Ok(Vector::new(hash_text_to_vector(text, self.dim)))
    }
}

/// Generate character trigrams from a string (padded with two spaces)
pub fn generate_trigrams(s: &str) -> HashSet<String> {
    let padded = format!("  {}  ", s);
    let chars: Vec<char> = padded.chars().collect();

    if chars.len() < 3 {
        return HashSet::new();
    }

    chars
        .windows(3)
        .map(|w| w.iter().collect::<String>())
        .collect()
}

/// Hash text into a unit vector; blank text gives the zero vector
pub fn hash_text_to_vector(text: &str, dim: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dim];
    let normalized = text.trim().to_lowercase();
    if normalized.is_empty() {
        return vector;
    }

    for trigram in generate_trigrams(&normalized) {
        vector[bucket(&trigram, dim)] += 1.0;
    }

    // Words contribute more than trigrams
    for word in normalized.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
        vector[bucket(word, dim)] += 2.0;
    }

    let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for v in &mut vector {
            *v /= magnitude;
        }
    }

    vector
}

#[inline]
fn bucket(token: &str, dim: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    (hasher.finish() as usize) % dim
}
