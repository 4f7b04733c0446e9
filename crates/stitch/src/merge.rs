//! Assembly of one receipt from an ordered capture sequence. Two strategies
//! are computed and the more confident one wins: splicing at detected
//! overlaps, or plain concatenation in capture order.

use std::collections::HashSet;

use kvitto_core::{
    ImageCapture, Item, MerchantInfo, MergeMethod, MergedReceipt, OverlapResult,
    DEFAULT_MIN_OVERLAP_CONFIDENCE,
};

use crate::overlap::find_overlap;
use crate::parse::{extract_items, FieldParser};
use crate::similarity::{normalize_line, similarity};

/// Confidence contribution of a transition with no reliable overlap.
const GAP_CONTRIBUTION: f32 = 0.3;
/// Fixed confidence of the position strategy: concatenation cannot lose
/// content, but it cannot remove duplicated regions either.
const POSITION_CONFIDENCE: f32 = 0.7;
/// Item pair similarity above which two items are the same purchase.
const CLUSTER_JOIN_THRESHOLD: f32 = 0.85;
const DESCRIPTION_WEIGHT: f32 = 0.7;
const PRICE_WEIGHT: f32 = 0.3;

const GAP_MARKER_PREFIX: &str = "--- possible gap";

/// Analysis of one adjacent capture pair.
struct Transition {
    overlap: OverlapResult,
    spliced: bool,
    contribution: f32,
    marker: Option<String>,
}

pub struct Merger {
    min_overlap_confidence: f32,
    parser: FieldParser,
}

impl Merger {
    pub fn new(min_overlap_confidence: f32) -> Self {
        Self {
            min_overlap_confidence,
            parser: FieldParser::new(),
        }
    }

    /// Merger with a caller-supplied parser (useful to pin its reference
    /// date).
    pub fn with_parser(min_overlap_confidence: f32, parser: FieldParser) -> Self {
        Self {
            min_overlap_confidence,
            parser,
        }
    }

    /// Merge an ordered capture sequence into one receipt.
    pub fn merge(&self, captures: &[ImageCapture]) -> MergedReceipt {
        match captures.len() {
            0 => MergedReceipt::empty(),
            1 => Self::single(&captures[0]),
            _ => self.merge_multi(captures),
        }
    }

    /// The overlap strategy in isolation.
    pub fn merge_by_overlap(&self, captures: &[ImageCapture]) -> MergedReceipt {
        let transitions = self.analyze(captures);
        self.overlap_strategy(captures, &transitions)
    }

    /// The position strategy in isolation.
    pub fn merge_by_position(&self, captures: &[ImageCapture]) -> MergedReceipt {
        self.position_strategy(captures)
    }

    fn single(capture: &ImageCapture) -> MergedReceipt {
        let parsed = &capture.parsed;
        MergedReceipt {
            items: parsed.items.clone(),
            lines: parsed.lines.clone(),
            total_cents: parsed.total_cents,
            merchant: parsed.merchant.clone(),
            date: parsed.date,
            confidence: parsed.confidence,
            method: MergeMethod::Single,
            gaps_detected: Vec::new(),
        }
    }

    fn merge_multi(&self, captures: &[ImageCapture]) -> MergedReceipt {
        let transitions = self.analyze(captures);
        let by_overlap = self.overlap_strategy(captures, &transitions);
        let by_position = self.position_strategy(captures);
        // Gap findings describe the capture sequence itself, so they are
        // surfaced whichever strategy wins.
        let gaps: Vec<String> = transitions
            .iter()
            .filter_map(|t| t.marker.clone())
            .collect();
        tracing::debug!(
            overlap_confidence = by_overlap.confidence,
            position_confidence = by_position.confidence,
            gaps = gaps.len(),
            "choosing merge strategy"
        );
        let mut chosen = if by_position.confidence > by_overlap.confidence {
            by_position
        } else {
            by_overlap
        };
        chosen.gaps_detected = gaps;
        chosen
    }

    fn analyze(&self, captures: &[ImageCapture]) -> Vec<Transition> {
        captures
            .windows(2)
            .enumerate()
            .map(|(idx, pair)| {
                let overlap = find_overlap(&pair[0].parsed.lines, &pair[1].parsed.lines);
                if overlap.is_reliable(self.min_overlap_confidence) {
                    Transition {
                        spliced: true,
                        contribution: overlap.confidence,
                        marker: None,
                        overlap,
                    }
                } else {
                    Transition {
                        spliced: false,
                        contribution: GAP_CONTRIBUTION,
                        marker: Some(format!(
                            "{GAP_MARKER_PREFIX} between capture {} and capture {} ---",
                            idx + 1,
                            idx + 2
                        )),
                        overlap,
                    }
                }
            })
            .collect()
    }

    /// Splice each capture after the previous one, dropping the lines the
    /// overlap showed to be repeats. Unreliable transitions fall back to a
    /// gap marker followed by the full capture.
    fn overlap_strategy(
        &self,
        captures: &[ImageCapture],
        transitions: &[Transition],
    ) -> MergedReceipt {
        let Some(first) = captures.first() else {
            return MergedReceipt::empty();
        };
        let mut lines = first.parsed.lines.clone();
        let mut items = Vec::new();
        let mut seen = HashSet::new();
        let mut gaps = Vec::new();
        for item in &first.parsed.items {
            push_unique(&mut items, &mut seen, item.clone());
        }

        let mut contributions = Vec::with_capacity(transitions.len());
        for (capture, transition) in captures[1..].iter().zip(transitions) {
            contributions.push(transition.contribution);
            if transition.spliced {
                let cut = transition
                    .overlap
                    .cut_index_next
                    .min(capture.parsed.lines.len());
                let remainder = capture.parsed.lines[cut..].to_vec();
                // Items come only from the genuinely new lines.
                for item in extract_items(&remainder) {
                    push_unique(&mut items, &mut seen, item);
                }
                lines.extend(remainder);
            } else {
                if let Some(marker) = &transition.marker {
                    lines.push(marker.clone());
                    gaps.push(marker.clone());
                }
                lines.extend(capture.parsed.lines.iter().cloned());
                for item in capture.parsed.items.iter().cloned() {
                    push_unique(&mut items, &mut seen, item);
                }
            }
        }

        let confidence = if contributions.is_empty() {
            0.0
        } else {
            contributions.iter().sum::<f32>() / contributions.len() as f32
        };
        let mut merged = MergedReceipt {
            items,
            lines,
            total_cents: None,
            merchant: MerchantInfo::default(),
            date: None,
            confidence,
            method: MergeMethod::Overlap,
            gaps_detected: gaps,
        };
        self.refresh_summary(&mut merged);
        merged
    }

    /// Concatenate all captures in order and dedup items by clustering.
    fn position_strategy(&self, captures: &[ImageCapture]) -> MergedReceipt {
        if captures.is_empty() {
            return MergedReceipt::empty();
        }
        let lines: Vec<String> = captures
            .iter()
            .flat_map(|c| c.parsed.lines.iter().cloned())
            .collect();
        let all_items: Vec<Item> = captures
            .iter()
            .flat_map(|c| c.parsed.items.iter().cloned())
            .collect();
        let mut merged = MergedReceipt {
            items: dedup_by_clustering(all_items),
            lines,
            total_cents: None,
            merchant: MerchantInfo::default(),
            date: None,
            confidence: POSITION_CONFIDENCE,
            method: MergeMethod::Position,
            gaps_detected: Vec::new(),
        };
        self.refresh_summary(&mut merged);
        merged
    }

    /// Re-derive date, total and merchant from the assembled line sequence;
    /// values parsed from any single capture may predate the full receipt.
    fn refresh_summary(&self, merged: &mut MergedReceipt) {
        let content: Vec<String> = merged
            .lines
            .iter()
            .filter(|line| !line.starts_with(GAP_MARKER_PREFIX))
            .cloned()
            .collect();
        let summary = self.parser.derive_summary(&content);
        merged.date = summary.date.map(|(date, _)| date);
        merged.total_cents = summary.total.map(|(cents, _)| cents);
        merged.merchant = summary.merchant;
    }
}

impl Default for Merger {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_OVERLAP_CONFIDENCE)
    }
}

fn push_unique(items: &mut Vec<Item>, seen: &mut HashSet<(String, i64)>, item: Item) {
    let key = (normalize_line(&item.description), item.price_cents);
    if seen.insert(key) {
        items.push(item);
    }
}

/// Single-pass clustering: each item joins the first cluster whose founder
/// it resembles, otherwise founds its own. The highest-confidence member
/// represents the cluster.
fn dedup_by_clustering(items: Vec<Item>) -> Vec<Item> {
    struct Cluster {
        founder: Item,
        best: Item,
    }
    let mut clusters: Vec<Cluster> = Vec::new();
    for item in items {
        let slot = clusters
            .iter()
            .position(|c| item_similarity(&c.founder, &item) > CLUSTER_JOIN_THRESHOLD);
        match slot {
            Some(idx) => {
                if item.confidence > clusters[idx].best.confidence {
                    clusters[idx].best = item;
                }
            }
            None => clusters.push(Cluster {
                founder: item.clone(),
                best: item,
            }),
        }
    }
    clusters.into_iter().map(|c| c.best).collect()
}

/// Weighted blend of description similarity and exact price agreement.
fn item_similarity(a: &Item, b: &Item) -> f32 {
    let desc = similarity(&a.description, &b.description);
    let price = if a.price_cents == b.price_cents { 1.0 } else { 0.0 };
    DESCRIPTION_WEIGHT * desc + PRICE_WEIGHT * price
}
