use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::vector::Vector;
use crate::{Error, Result};

/// Stable catalog identifier of a job posting
pub type JobId = u64;

/// Structured location of a job or a candidate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub city: String,
}

impl Location {
    pub fn new(region: impl Into<String>, city: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            city: city.into(),
        }
    }

    pub fn city(city: impl Into<String>) -> Self {
        Self {
            region: String::new(),
            city: city.into(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.region.trim().is_empty() && self.city.trim().is_empty()
    }
}

/// Inclusive numeric range, e.g. years of experience or salary band
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NumericRange {
    pub min: f64,
    pub max: f64,
}

impl NumericRange {
    pub fn new(min: f64, max: f64) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Distance from `value` to the nearest end of the range; 0.0 inside it
    #[inline]
    pub fn distance(&self, value: f64) -> f64 {
        if value < self.min {
            self.min - value
        } else if value > self.max {
            value - self.max
        } else {
            0.0
        }
    }
}

/// A job posting as it comes out of the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    /// Row version stamp; a changed version means the row must be re-embedded
    #[serde(default)]
    pub version: u64,
    pub title: String,
    #[serde(default)]
    pub skills: BTreeSet<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: Location,
    #[serde(default)]
    pub experience_required: NumericRange,
    #[serde(default)]
    pub salary: Option<NumericRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
}

impl JobRecord {
    pub fn new(job_id: JobId, title: impl Into<String>) -> Self {
        Self {
            job_id,
            version: 0,
            title: title.into(),
            skills: BTreeSet::new(),
            description: String::new(),
            location: Location::default(),
            experience_required: NumericRange::default(),
            salary: None,
            company: None,
        }
    }

    #[must_use]
    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.skills = normalize_skills(skills);
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    #[must_use]
    pub fn with_experience(mut self, min: f64, max: f64) -> Self {
        self.experience_required = NumericRange::new(min, max);
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Text fed to the embedder for the full-profile vector.
    /// Descriptions and location stay out of it; they are scored separately.
    pub fn profile_text(&self) -> String {
        profile_text(&self.title, &self.skills, Some(self.experience_required))
    }

    /// Whether the row carries anything worth embedding
    pub fn has_embeddable_text(&self) -> bool {
        !self.title.trim().is_empty() || !self.skills.is_empty()
    }
}

/// Builds the "Title. Skills. Experience" sentence used for profile vectors,
/// skipping empty parts.
pub fn profile_text(
    title: &str,
    skills: &BTreeSet<String>,
    experience: Option<NumericRange>,
) -> String {
    let mut parts = Vec::with_capacity(3);
    if !title.trim().is_empty() {
        parts.push(format!("Job Title: {}", title.trim()));
    }
    if !skills.is_empty() {
        let joined: Vec<&str> = skills.iter().map(String::as_str).collect();
        parts.push(format!("Skills Required: {}", joined.join(", ")));
    }
    if let Some(range) = experience {
        if range.max > 0.0 {
            parts.push(format!(
                "Experience Required: {}-{} years",
                range.min, range.max
            ));
        }
    }
    parts.join(". ")
}

/// Lowercase, trim and dedup skill tokens
pub fn normalize_skills<I, S>(skills: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    skills
        .into_iter()
        .map(|s| s.as_ref().trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Denormalized copy of the job fields needed for scoring and display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub title: String,
    pub skills: BTreeSet<String>,
    pub location: Location,
    pub experience_required: NumericRange,
    pub salary: Option<NumericRange>,
    pub company: Option<String>,
}

impl From<&JobRecord> for JobMetadata {
    fn from(job: &JobRecord) -> Self {
        Self {
            title: job.title.clone(),
            skills: job.skills.clone(),
            location: job.location.clone(),
            experience_required: job.experience_required,
            salary: job.salary,
            company: job.company.clone(),
        }
    }
}

/// One stored job embedding. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingEntry {
    pub job_id: JobId,
    pub version: u64,
    pub title_vector: Vector,
    pub profile_vector: Vector,
    pub metadata: JobMetadata,
}

impl EmbeddingEntry {
    pub fn new(job: &JobRecord, title_vector: Vector, profile_vector: Vector) -> Self {
        Self {
            job_id: job.job_id,
            version: job.version,
            title_vector,
            profile_vector,
            metadata: JobMetadata::from(job),
        }
    }

    pub fn dim(&self) -> usize {
        self.title_vector.dim()
    }
}

/// Upper bound on `top_k` accepted from callers
pub const MAX_TOP_K: usize = 1000;

/// A recommendation request built per call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserQuery {
    pub title: String,
    #[serde(default)]
    pub skills: BTreeSet<String>,
    #[serde(default)]
    pub experience: f64,
    #[serde(default)]
    pub location: Location,
    /// Locations the user would also accept; partial location credit
    #[serde(default)]
    pub preferred_locations: Vec<Location>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    10
}

impl UserQuery {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            skills: BTreeSet::new(),
            experience: 0.0,
            location: Location::default(),
            preferred_locations: Vec::new(),
            top_k: default_top_k(),
        }
    }

    #[must_use]
    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.skills = normalize_skills(skills);
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    #[must_use]
    pub fn with_experience(mut self, years: f64) -> Self {
        self.experience = years;
        self
    }

    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Reject malformed queries before they reach the index
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(Error::QueryValidation("top_k must be positive".into()));
        }
        if self.top_k > MAX_TOP_K {
            return Err(Error::QueryValidation(format!(
                "top_k must be at most {}, got {}",
                MAX_TOP_K, self.top_k
            )));
        }
        if !self.experience.is_finite() || self.experience < 0.0 {
            return Err(Error::QueryValidation(format!(
                "experience must be a non-negative number, got {}",
                self.experience
            )));
        }
        if self.title.trim().is_empty() && self.skills.is_empty() {
            return Err(Error::QueryValidation(
                "query needs a title or at least one skill".into(),
            ));
        }
        Ok(())
    }

    /// Profile sentence for the query, shaped like [`JobRecord::profile_text`]
    pub fn profile_text(&self, title: &str) -> String {
        profile_text(title, &self.skills, None)
    }
}
