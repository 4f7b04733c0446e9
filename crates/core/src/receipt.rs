use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::fields::{Item, MerchantInfo};

/// How the final receipt was assembled from its captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    /// No captures at all.
    Empty,
    /// Exactly one capture, passed through untouched.
    Single,
    /// Consecutive captures spliced at detected overlaps.
    Overlap,
    /// Captures concatenated in capture order.
    Position,
}

impl fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MergeMethod::Empty => "empty",
            MergeMethod::Single => "single",
            MergeMethod::Overlap => "overlap",
            MergeMethod::Position => "position",
        };
        write!(f, "{s}")
    }
}

impl FromStr for MergeMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "empty" => Ok(MergeMethod::Empty),
            "single" => Ok(MergeMethod::Single),
            "overlap" => Ok(MergeMethod::Overlap),
            "position" => Ok(MergeMethod::Position),
            other => Err(format!("unknown merge method: {other}")),
        }
    }
}

/// One receipt reconstructed from all captures of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedReceipt {
    pub items: Vec<Item>,
    /// Full merged line sequence, including any gap marker lines.
    pub lines: Vec<String>,
    pub total_cents: Option<i64>,
    pub merchant: MerchantInfo,
    pub date: Option<NaiveDate>,
    /// Merge confidence in [0, 1]; completed sessions surface this value.
    pub confidence: f32,
    pub method: MergeMethod,
    /// Human-readable markers for transitions where no reliable overlap was
    /// found, in capture order.
    pub gaps_detected: Vec<String>,
}

impl MergedReceipt {
    /// Result for a session that never captured anything.
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            lines: Vec::new(),
            total_cents: None,
            merchant: MerchantInfo::default(),
            date: None,
            confidence: 0.0,
            method: MergeMethod::Empty,
            gaps_detected: Vec::new(),
        }
    }

    pub fn items_total_cents(&self) -> i64 {
        self.items.iter().map(|i| i.price_cents).sum()
    }
}
