//! Named durable queues, one per job kind.

use bookforge_core::JobKind;
use serde::{Deserialize, Serialize};

const DEAD_LETTER_SUFFIX: &str = ".dlq";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lane {
    name: String,
    durable: bool,
}

impl Lane {
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
        }
    }

    pub fn for_kind(kind: JobKind) -> Self {
        Self::durable(kind.lane_name())
    }

    /// One lane per kind, in declaration order.
    pub fn all() -> Vec<Lane> {
        JobKind::ALL.into_iter().map(Lane::for_kind).collect()
    }

    /// Lane receiving envelopes that exhausted their deliveries.
    pub fn dead_letter(&self) -> Lane {
        Lane::durable(format!("{}{DEAD_LETTER_SUFFIX}", self.name))
    }

    pub fn is_dead_letter(&self) -> bool {
        self.name.ends_with(DEAD_LETTER_SUFFIX)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }
}

impl core::fmt::Display for Lane {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.name)
    }
}
