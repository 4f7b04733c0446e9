//! Overlap detection between consecutive captures. Users are told to keep
//! the last lines of one photo inside the next, so the shared region sits
//! near the tail of the earlier capture and the head of the later one.

use kvitto_core::OverlapResult;

use crate::similarity::similarity;

/// How many trailing lines of the earlier capture are tried as run starts.
pub const TAIL_WINDOW: usize = 10;
/// How many leading lines of the later capture are tried as run starts.
pub const HEAD_WINDOW: usize = 15;
/// A line pair must score strictly above this to extend a run.
pub const LINE_MATCH_THRESHOLD: f32 = 0.7;

#[derive(Debug)]
struct Run {
    start_prev: usize,
    start_next: usize,
    len: usize,
    /// Sum of per-pair similarities; the selection criterion.
    total: f32,
}

/// Find the best overlapping run between two captures' lines.
///
/// Every (tail, head) start-offset pair is tried; the windows bound only
/// where a run may start, not how far it extends. The winner is the run
/// with the highest accumulated similarity, which favors long runs but
/// lets a short exact match beat a long mediocre one.
pub fn find_overlap(lines_prev: &[String], lines_next: &[String]) -> OverlapResult {
    if lines_prev.is_empty() || lines_next.is_empty() {
        return OverlapResult::empty(lines_prev.len());
    }

    let tail_start = lines_prev.len().saturating_sub(TAIL_WINDOW);
    let head_end = lines_next.len().min(HEAD_WINDOW);

    let mut best: Option<Run> = None;
    for i in tail_start..lines_prev.len() {
        for j in 0..head_end {
            let run = extend_run(lines_prev, lines_next, i, j);
            if run.len == 0 {
                continue;
            }
            if best.as_ref().is_none_or(|b| run.total > b.total) {
                best = Some(run);
            }
        }
    }

    match best {
        None => OverlapResult::empty(lines_prev.len()),
        Some(run) => OverlapResult {
            matched_lines: lines_next[run.start_next..run.start_next + run.len].to_vec(),
            confidence: run.total / run.len as f32,
            cut_index_prev: run.start_prev,
            cut_index_next: run.start_next + run.len,
        },
    }
}

/// Extend a run of consecutive matching pairs from the given offsets,
/// stopping at the first pair at or below the threshold.
fn extend_run(prev: &[String], next: &[String], start_prev: usize, start_next: usize) -> Run {
    let mut len = 0;
    let mut total = 0.0;
    while start_prev + len < prev.len() && start_next + len < next.len() {
        let score = similarity(&prev[start_prev + len], &next[start_next + len]);
        if score <= LINE_MATCH_THRESHOLD {
            break;
        }
        total += score;
        len += 1;
    }
    Run {
        start_prev,
        start_next,
        len,
        total,
    }
}
