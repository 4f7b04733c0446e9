//! Line-level fuzzy matching. OCR renders the same printed line slightly
//! differently across photos, so equality is scored, not tested.

/// Lines shorter than this get the short-line boost.
const SHORT_LINE_CHARS: usize = 10;
/// Raw score a short pair must clear before the boost applies.
const SHORT_LINE_MIN_SCORE: f32 = 0.8;
const SHORT_LINE_BOOST: f32 = 1.2;

/// Canonical form used for comparisons: trimmed, inner whitespace collapsed,
/// curly quote variants unified, lowercased.
pub fn normalize_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut pending_space = false;
    for c in line.trim().chars() {
        let c = match c {
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{2032}' => '\'',
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{2033}' => '"',
            c => c,
        };
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        for lower in c.to_lowercase() {
            out.push(lower);
        }
    }
    out
}

/// Similarity between two raw lines, in [0, 1].
///
/// Normalized Levenshtein distance over characters. A high raw score on a
/// short line is a stronger true-positive signal than the same score on a
/// long one, so short near-matches are boosted by 20% (capped at 1.0).
pub fn similarity(a: &str, b: &str) -> f32 {
    let a = normalize_line(a);
    let b = normalize_line(b);
    if a == b {
        return 1.0;
    }
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let max_len = a.len().max(b.len());
    let raw = 1.0 - levenshtein(&a, &b) as f32 / max_len as f32;
    if a.len() < SHORT_LINE_CHARS && b.len() < SHORT_LINE_CHARS && raw > SHORT_LINE_MIN_SCORE {
        (raw * SHORT_LINE_BOOST).min(1.0)
    } else {
        raw
    }
}

/// Levenshtein edit distance over chars, two-row to keep memory flat.
fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
