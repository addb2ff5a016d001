//! Retrieved review records and ranked result sets.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata key holding the review text.
pub const REVIEW_KEY: &str = "review";
/// Metadata key holding the course subject.
pub const SUBJECT_KEY: &str = "subject";
/// Metadata key holding the star rating.
pub const STARS_KEY: &str = "stars";

/// A match exactly as the vector store returned it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Map<String, Value>,
}

impl RawMatch {
    pub fn new(id: impl Into<String>, score: f32, metadata: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            score,
            metadata,
        }
    }
}

/// Why a raw match could not become a [`RetrievedRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedMatch {
    MissingKey(&'static str),
    InvalidValue(&'static str),
    InvalidScore,
    EmptyIdentifier,
}

impl std::fmt::Display for MalformedMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MalformedMatch::MissingKey(key) => write!(f, "missing metadata key '{key}'"),
            MalformedMatch::InvalidValue(key) => write!(f, "invalid value for '{key}'"),
            MalformedMatch::InvalidScore => write!(f, "non-finite similarity score"),
            MalformedMatch::EmptyIdentifier => write!(f, "empty identifier"),
        }
    }
}

/// Review metadata every usable match must carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewMetadata {
    pub review_text: String,
    pub subject: String,
    pub star_rating: f64,
}

impl ReviewMetadata {
    /// Extract the required keys. Review and star rating are read from their
    /// own keys; a store that only carries one of them is rejected.
    pub fn from_map(metadata: &Map<String, Value>) -> Result<Self, MalformedMatch> {
        let review_text = required_text(metadata, REVIEW_KEY)?;
        let subject = required_text(metadata, SUBJECT_KEY)?;
        let star_rating = match metadata.get(STARS_KEY) {
            None | Some(Value::Null) => return Err(MalformedMatch::MissingKey(STARS_KEY)),
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            Some(_) => None,
        }
        .filter(|stars| stars.is_finite())
        .ok_or(MalformedMatch::InvalidValue(STARS_KEY))?;

        Ok(Self {
            review_text,
            subject,
            star_rating,
        })
    }
}

fn required_text(metadata: &Map<String, Value>, key: &'static str) -> Result<String, MalformedMatch> {
    match metadata.get(key) {
        None | Some(Value::Null) => Err(MalformedMatch::MissingKey(key)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(MalformedMatch::InvalidValue(key)),
    }
}

/// A review that survived validation, with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedRecord {
    /// Store identifier; the instructor's name in the review corpus.
    pub identifier: String,
    pub similarity_score: f32,
    pub metadata: ReviewMetadata,
}

impl TryFrom<RawMatch> for RetrievedRecord {
    type Error = MalformedMatch;

    fn try_from(raw: RawMatch) -> Result<Self, Self::Error> {
        if raw.id.trim().is_empty() {
            return Err(MalformedMatch::EmptyIdentifier);
        }
        if !raw.score.is_finite() {
            return Err(MalformedMatch::InvalidScore);
        }
        let metadata = ReviewMetadata::from_map(&raw.metadata)?;
        Ok(Self {
            identifier: raw.id,
            similarity_score: raw.score,
            metadata,
        })
    }
}

/// Records ranked by descending similarity, at most top-K long.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    records: Vec<RetrievedRecord>,
}

impl RetrievalResult {
    /// Rank `records` by descending score and keep the first `top_k`.
    ///
    /// The sort is stable, so equal scores keep the store's order.
    pub fn ranked(mut records: Vec<RetrievedRecord>, top_k: usize) -> Self {
        records.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));
        records.truncate(top_k);
        Self { records }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[RetrievedRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RetrievedRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Scores never increase along the sequence.
    pub fn is_ranked(&self) -> bool {
        self.records
            .windows(2)
            .all(|w| w[0].similarity_score >= w[1].similarity_score)
    }
}

impl<'a> IntoIterator for &'a RetrievalResult {
    type Item = &'a RetrievedRecord;
    type IntoIter = std::slice::Iter<'a, RetrievedRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
