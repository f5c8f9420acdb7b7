//! Job kinds, kind-specific parameters, and submission-time clamping.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

pub const DEFAULT_BOOK_COUNT: u32 = 3;
pub const DEFAULT_IMAGE_COUNT: u32 = 4;
pub const DEFAULT_LARGE_BOOK_COUNT: u32 = 5;
pub const DEFAULT_WORD_COUNT: u32 = 5_000;

pub const MAX_COUNT: u32 = 50;
pub const MAX_WORD_COUNT: u32 = 100_000;

/// Number of envelopes at the head of a large-book batch published with
/// [`Priority::High`].
pub const HIGH_PRIORITY_SLOTS: u32 = 2;

/// The kinds of work the pipeline knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Book,
    LargeBook,
    Image,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::Book, JobKind::LargeBook, JobKind::Image];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Book => "book",
            JobKind::LargeBook => "large_book",
            JobKind::Image => "image",
        }
    }

    /// Name of the durable lane carrying envelopes of this kind.
    pub fn lane_name(&self) -> &'static str {
        match self {
            JobKind::Book => "book_generation_queue",
            JobKind::LargeBook => "large_book_generation_queue",
            JobKind::Image => "image_generation_queue",
        }
    }

    pub fn default_count(&self) -> u32 {
        match self {
            JobKind::Book => DEFAULT_BOOK_COUNT,
            JobKind::LargeBook => DEFAULT_LARGE_BOOK_COUNT,
            JobKind::Image => DEFAULT_IMAGE_COUNT,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "book" => Ok(JobKind::Book),
            "large_book" | "large-book" => Ok(JobKind::LargeBook),
            "image" => Ok(JobKind::Image),
            other => Err(DomainError::validation(format!("unknown job kind: {other}"))),
        }
    }
}

/// Broker-side priority tier. Two tiers only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

impl Priority {
    /// Priority of the envelope at `index` (0-based) within a large-book batch.
    pub fn for_batch_position(index: u32) -> Self {
        if index < HIGH_PRIORITY_SLOTS {
            Priority::High
        } else {
            Priority::Normal
        }
    }

    pub fn level(&self) -> u8 {
        match self {
            Priority::Normal => 0,
            Priority::High => 1,
        }
    }

    pub fn from_level(level: u8) -> Self {
        if level > 0 {
            Priority::High
        } else {
            Priority::Normal
        }
    }
}

/// Raw, caller-supplied submission parameters.
///
/// Anything that is not a positive integer is treated as absent; nothing here
/// is ever rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitParams {
    #[serde(default)]
    pub count: Option<serde_json::Value>,
    #[serde(default)]
    pub word_count: Option<serde_json::Value>,
}

impl SubmitParams {
    pub fn new(count: Option<i64>, word_count: Option<i64>) -> Self {
        Self {
            count: count.map(serde_json::Value::from),
            word_count: word_count.map(serde_json::Value::from),
        }
    }

    /// Lenient parse of a request body: invalid JSON means "use defaults".
    pub fn from_body(body: &[u8]) -> Self {
        serde_json::from_slice::<serde_json::Value>(body)
            .ok()
            .map(|value| Self {
                count: value.get("count").cloned(),
                word_count: value.get("word_count").cloned(),
            })
            .unwrap_or_default()
    }
}

/// Submission parameters after defaults and ceilings have been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParameters {
    pub count: u32,
    pub word_count: u32,
}

impl JobParameters {
    pub fn resolve(kind: JobKind, raw: &SubmitParams) -> Self {
        Self {
            count: clamp_or_default(raw.count.as_ref(), kind.default_count(), MAX_COUNT),
            word_count: clamp_or_default(
                raw.word_count.as_ref(),
                DEFAULT_WORD_COUNT,
                MAX_WORD_COUNT,
            ),
        }
    }
}

fn clamp_or_default(value: Option<&serde_json::Value>, default: u32, max: u32) -> u32 {
    match value.and_then(serde_json::Value::as_i64) {
        Some(v) if v >= 1 => v.min(i64::from(max)) as u32,
        _ => default,
    }
}

/// Kind-specific parameters carried by an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobSpec {
    /// `count` small books in one task.
    Book { count: u32 },
    /// One large book; a batch submission yields one envelope per book.
    LargeBook { book_number: u32, word_count: u32 },
    /// `count` images in one task.
    Image { count: u32 },
}

impl JobSpec {
    pub fn kind(&self) -> JobKind {
        match self {
            JobSpec::Book { .. } => JobKind::Book,
            JobSpec::LargeBook { .. } => JobKind::LargeBook,
            JobSpec::Image { .. } => JobKind::Image,
        }
    }

    /// Check the same bounds submission clamps to, for envelopes arriving off the wire.
    pub fn validate(&self) -> Result<(), DomainError> {
        let check = |field: &str, value: u32, max: u32| {
            if (1..=max).contains(&value) {
                Ok(())
            } else {
                Err(DomainError::validation(format!(
                    "{field} {value} outside 1..={max}"
                )))
            }
        };
        match *self {
            JobSpec::Book { count } | JobSpec::Image { count } => check("count", count, MAX_COUNT),
            JobSpec::LargeBook {
                book_number,
                word_count,
            } => {
                check("book_number", book_number, MAX_COUNT)?;
                check("word_count", word_count, MAX_WORD_COUNT)
            }
        }
    }
}
