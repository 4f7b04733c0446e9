use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    SumMismatch,
    GapDetected,
    LowConfidence,
    NoItems,
    NoTotal,
    NoImages,
}

impl IssueType {
    /// Fixed user-facing advice for this kind of issue.
    pub fn recommendation(self) -> &'static str {
        match self {
            IssueType::SumMismatch => {
                "Check the item prices against the printed total; re-capture the item area if it is blurry"
            }
            IssueType::GapDetected => {
                "Re-capture with more overlap between consecutive photos so every line appears in two shots"
            }
            IssueType::LowConfidence => {
                "Improve the lighting and hold the camera steady, then capture the receipt again"
            }
            IssueType::NoItems => "Make sure the item lines are inside the frame and in focus",
            IssueType::NoTotal => "Photograph the bottom of the receipt so the total line is included",
            IssueType::NoImages => "Add at least one capture before completing the session",
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueType::SumMismatch => "sum_mismatch",
            IssueType::GapDetected => "gap_detected",
            IssueType::LowConfidence => "low_confidence",
            IssueType::NoItems => "no_items",
            IssueType::NoTotal => "no_total",
            IssueType::NoImages => "no_images",
        };
        write!(f, "{s}")
    }
}

/// One problem found while checking a merged receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub issue_type: IssueType,
    pub severity: Severity,
    pub message: String,
    /// Structured context for clients that want more than the message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Outcome of validating a merged receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// True when no high-severity issue was found.
    pub is_valid: bool,
    pub issues: Vec<Issue>,
    /// Deduplicated advice derived from the issues, in issue order.
    pub recommendations: Vec<String>,
    /// Composite quality score in [0, 1].
    pub overall_score: f32,
}
