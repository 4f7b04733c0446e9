use serde::{Deserialize, Serialize};

/// Default threshold an overlap must clear before the merge will splice at
/// it instead of flagging a gap.
pub const DEFAULT_MIN_OVERLAP_CONFIDENCE: f32 = 0.6;

/// A single matched line is weak evidence; overlaps shorter than this are
/// never treated as reliable.
pub const MIN_RELIABLE_LINES: usize = 2;

/// The overlapping run of lines detected between two consecutive captures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverlapResult {
    /// The repeated lines, as rendered by the later capture.
    pub matched_lines: Vec<String>,
    /// Mean per-line similarity across the run, in [0, 1].
    pub confidence: f32,
    /// Index into the earlier capture's lines where the run begins.
    pub cut_index_prev: usize,
    /// Index into the later capture's lines just past the run, where new
    /// content starts.
    pub cut_index_next: usize,
}

impl OverlapResult {
    /// The no-overlap result: keep all of the earlier capture, take all of
    /// the later one.
    pub fn empty(prev_len: usize) -> Self {
        Self {
            matched_lines: Vec::new(),
            confidence: 0.0,
            cut_index_prev: prev_len,
            cut_index_next: 0,
        }
    }

    pub fn matched_count(&self) -> usize {
        self.matched_lines.len()
    }

    /// Whether the overlap is trustworthy enough to splice at.
    pub fn is_reliable(&self, min_confidence: f32) -> bool {
        self.confidence >= min_confidence && self.matched_lines.len() >= MIN_RELIABLE_LINES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_keeps_everything() {
        let overlap = OverlapResult::empty(7);
        assert_eq!(overlap.cut_index_prev, 7);
        assert_eq!(overlap.cut_index_next, 0);
        assert_eq!(overlap.matched_count(), 0);
        assert!(!overlap.is_reliable(0.0));
    }

    #[test]
    fn reliability_needs_confidence_and_length() {
        let two_lines = OverlapResult {
            matched_lines: vec!["a".into(), "b".into()],
            confidence: 0.9,
            cut_index_prev: 0,
            cut_index_next: 2,
        };
        assert!(two_lines.is_reliable(0.6));
        assert!(!two_lines.is_reliable(0.95));

        let one_line = OverlapResult {
            matched_lines: vec!["a".into()],
            confidence: 1.0,
            cut_index_prev: 0,
            cut_index_next: 1,
        };
        assert!(!one_line.is_reliable(0.6));
    }
}
