//! Consistency checks over a merged receipt. Findings never block
//! completion; they tell the user what to re-capture.

use serde_json::json;

use kvitto_core::{
    format_cents, Issue, IssueType, MergeMethod, MergedReceipt, Severity, ValidationResult,
};

/// Items-vs-total disagreement beyond this percentage raises an issue.
const SUM_TOLERANCE_PERCENT: f64 = 5.0;
/// Beyond this percentage the mismatch is severe.
const SUM_HIGH_PERCENT: f64 = 15.0;
/// Merge confidence below this is flagged.
const LOW_CONFIDENCE_FLOOR: f32 = 0.5;

const HIGH_PENALTY: f32 = 0.3;
const MEDIUM_PENALTY: f32 = 0.1;
const ITEMS_BONUS: f32 = 0.1;
const TOTAL_BONUS: f32 = 0.1;
const MERCHANT_BONUS: f32 = 0.05;

pub struct Validator;

impl Validator {
    pub fn validate(merged: &MergedReceipt) -> ValidationResult {
        let mut issues = Vec::new();

        if merged.method == MergeMethod::Empty {
            issues.push(Issue {
                issue_type: IssueType::NoImages,
                severity: Severity::High,
                message: "no images were captured in this session".to_string(),
                details: None,
            });
        }

        check_sum(merged, &mut issues);

        if !merged.gaps_detected.is_empty() {
            issues.push(Issue {
                issue_type: IssueType::GapDetected,
                severity: Severity::High,
                message: format!(
                    "{} possible gap(s) between captures; part of the receipt may be missing",
                    merged.gaps_detected.len()
                ),
                details: Some(json!({ "gaps": merged.gaps_detected })),
            });
        }

        if merged.confidence < LOW_CONFIDENCE_FLOOR {
            issues.push(Issue {
                issue_type: IssueType::LowConfidence,
                severity: Severity::Medium,
                message: format!("low merge confidence ({:.2})", merged.confidence),
                details: Some(json!({ "confidence": merged.confidence })),
            });
        }

        if merged.items.is_empty() {
            issues.push(Issue {
                issue_type: IssueType::NoItems,
                severity: Severity::High,
                message: "no line items were recognized".to_string(),
                details: None,
            });
        }

        if merged.total_cents.is_none() {
            issues.push(Issue {
                issue_type: IssueType::NoTotal,
                severity: Severity::Medium,
                message: "no total amount was recognized".to_string(),
                details: None,
            });
        }

        let is_valid = issues.iter().all(|i| i.severity != Severity::High);
        let recommendations = recommendations_for(&issues);
        let overall_score = score(merged, &issues);
        ValidationResult {
            is_valid,
            issues,
            recommendations,
            overall_score,
        }
    }
}

fn check_sum(merged: &MergedReceipt, issues: &mut Vec<Issue>) {
    let total = match merged.total_cents {
        Some(total) if total > 0 && !merged.items.is_empty() => total,
        _ => return,
    };
    let items_sum = merged.items_total_cents();
    let percent = (items_sum - total).unsigned_abs() as f64 / total as f64 * 100.0;
    if percent <= SUM_TOLERANCE_PERCENT {
        return;
    }
    let severity = if percent <= SUM_HIGH_PERCENT {
        Severity::Medium
    } else {
        Severity::High
    };
    issues.push(Issue {
        issue_type: IssueType::SumMismatch,
        severity,
        message: format!(
            "items sum to {} but the receipt total is {} ({percent:.1}% apart)",
            format_cents(items_sum),
            format_cents(total)
        ),
        details: Some(json!({
            "items_sum_cents": items_sum,
            "total_cents": total,
            "percent": percent,
        })),
    });
}

/// One recommendation per issue kind, in first-occurrence order.
fn recommendations_for(issues: &[Issue]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for issue in issues {
        let advice = issue.issue_type.recommendation();
        if !out.iter().any(|r| r == advice) {
            out.push(advice.to_string());
        }
    }
    out
}

fn score(merged: &MergedReceipt, issues: &[Issue]) -> f32 {
    let high = issues.iter().filter(|i| i.severity == Severity::High).count() as f32;
    let medium = issues
        .iter()
        .filter(|i| i.severity == Severity::Medium)
        .count() as f32;
    let mut score = merged.confidence - HIGH_PENALTY * high - MEDIUM_PENALTY * medium;
    if !merged.items.is_empty() {
        score += ITEMS_BONUS;
    }
    if merged.total_cents.is_some() {
        score += TOTAL_BONUS;
    }
    if merged.merchant.name.is_some() {
        score += MERCHANT_BONUS;
    }
    score.clamp(0.0, 1.0)
}
