use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Parse a money-looking token into integer agorot/cents.
///
/// Accepts plain integers ("45"), dot decimals ("45.90"), comma decimals
/// ("7,90"), comma thousands ("1,234.56") and an optional ₪ or $ sign on
/// either side. Returns `None` for anything that does not start with a
/// digit once signs are stripped.
pub fn parse_amount(raw: &str) -> Option<i64> {
    let s = raw
        .trim()
        .trim_matches(|c: char| c == '₪' || c == '$' || c.is_whitespace());
    if !s.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return None;
    }
    let normalized = if s.contains(',') && s.contains('.') {
        // "1,234.56" -- commas are thousands separators
        s.replace(',', "")
    } else if let Some(pos) = s.rfind(',') {
        let frac = &s[pos + 1..];
        if (1..=2).contains(&frac.len()) && frac.chars().all(|c| c.is_ascii_digit()) {
            // "7,90" -- European-style decimal comma
            format!("{}.{}", s[..pos].replace(',', ""), frac)
        } else {
            s.replace(',', "")
        }
    } else {
        s.to_string()
    };
    let amount = Decimal::from_str(&normalized).ok()?;
    (amount * Decimal::from(100)).round().to_i64()
}

/// Render integer cents as a plain "12.90" style string.
pub fn format_cents(cents: i64) -> String {
    format!("{:.2}", Decimal::from(cents) / Decimal::from(100))
}
