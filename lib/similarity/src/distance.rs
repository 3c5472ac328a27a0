//! Similarity functions for the structured scoring signals
//!
//! All functions return a similarity score in range [0.0, 1.0] where 1.0
//! means identical.

use jobmatch_core::{Location, NumericRange};
use std::collections::BTreeSet;

/// Lowercase, trim and collapse inner whitespace
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalized Levenshtein similarity of the normalized strings
pub fn string_similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&normalize_text(a), &normalize_text(b))
}

/// Token-set ratio: compares the shared tokens against each side's
/// leftovers, so word order and repeated words do not matter and a title
/// that is a token subset of the other scores 1.0.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let a = normalize_text(a);
    let b = normalize_text(b);
    let tokens_a: BTreeSet<&str> = a.split(' ').filter(|t| !t.is_empty()).collect();
    let tokens_b: BTreeSet<&str> = b.split(' ').filter(|t| !t.is_empty()).collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return if tokens_a == tokens_b { 1.0 } else { 0.0 };
    }

    let join = |tokens: Vec<&str>| tokens.join(" ");
    let sect = join(tokens_a.intersection(&tokens_b).copied().collect());
    let diff_a = join(tokens_a.difference(&tokens_b).copied().collect());
    let diff_b = join(tokens_b.difference(&tokens_a).copied().collect());

    if sect.is_empty() {
        return strsim::normalized_levenshtein(&diff_a, &diff_b);
    }
    if diff_a.is_empty() || diff_b.is_empty() {
        return 1.0;
    }

    let with_a = format!("{} {}", sect, diff_a);
    let with_b = format!("{} {}", sect, diff_b);
    strsim::normalized_levenshtein(&sect, &with_a)
        .max(strsim::normalized_levenshtein(&sect, &with_b))
        .max(strsim::normalized_levenshtein(&with_a, &with_b))
}

/// Title-to-title similarity used for query correction
pub fn title_similarity(a: &str, b: &str) -> f64 {
    string_similarity(a, b).max(token_set_ratio(a, b))
}

/// Cosine in [-1, 1] rescaled to [0, 1]
#[inline]
pub fn rescale_cosine(cosine: f32) -> f32 {
    ((cosine.clamp(-1.0, 1.0) + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Fuzzy Jaccard overlap of two skill sets.
///
/// Two skills match when their normalized edit-distance similarity is at
/// least `threshold`. Matching is one-to-one, best pairs first, so the
/// result is `matched / (|query| + |job| - matched)`.
pub fn skill_overlap(query: &BTreeSet<String>, job: &BTreeSet<String>, threshold: f64) -> f32 {
    if query.is_empty() || job.is_empty() {
        return 0.0;
    }

    let mut pairs: Vec<(f64, &str, &str)> = Vec::new();
    for q in query {
        for j in job {
            let sim = if q.eq_ignore_ascii_case(j) {
                1.0
            } else {
                string_similarity(q, j)
            };
            if sim >= threshold {
                pairs.push((sim, q.as_str(), j.as_str()));
            }
        }
    }
    pairs.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(b.1))
            .then_with(|| a.2.cmp(b.2))
    });

    let mut used_query = BTreeSet::new();
    let mut used_job = BTreeSet::new();
    for (_, q, j) in pairs {
        if !used_query.contains(q) && !used_job.contains(j) {
            used_query.insert(q);
            used_job.insert(j);
        }
    }

    let matched = used_query.len();
    let union = query.len() + job.len() - matched;
    matched as f32 / union as f32
}

/// Location credit for a job.
///
/// `1.0` for the same city (and region, when both sides name one),
/// `preferred_bonus` when the job's city is one of the preferred locations,
/// `region_bonus` for the same region, `0.0` otherwise.
pub fn location_score(
    query: &Location,
    preferred: &[Location],
    job: &Location,
    region_bonus: f32,
    preferred_bonus: f32,
) -> f32 {
    let job_city = normalize_text(&job.city);
    let job_region = normalize_text(&job.region);
    let query_city = normalize_text(&query.city);
    let query_region = normalize_text(&query.region);

    let regions_conflict =
        !query_region.is_empty() && !job_region.is_empty() && query_region != job_region;
    if !job_city.is_empty() && job_city == query_city && !regions_conflict {
        return 1.0;
    }

    let mut score = 0.0f32;
    if !job_city.is_empty()
        && preferred.iter().any(|p| {
            let city = normalize_text(&p.city);
            !city.is_empty() && job_city.contains(&city)
        })
    {
        score = score.max(preferred_bonus);
    }
    if !job_region.is_empty() && job_region == query_region {
        score = score.max(region_bonus);
    }
    score
}

/// 1.0 inside the required range, decaying linearly to 0.0 at
/// `tolerance` years outside it
pub fn experience_fit(years: f64, required: &NumericRange, tolerance: f64) -> f32 {
    let distance = required.distance(years);
    if distance <= 0.0 {
        return 1.0;
    }
    if tolerance <= 0.0 {
        return 0.0;
    }
    (1.0 - distance / tolerance).max(0.0) as f32
}
