//! Structured field extraction from recognized receipt text. Tuned for
//! Israeli receipts: Hebrew keyword synonyms, ₪ amounts, day-first dates,
//! nine-digit business numbers.

use std::sync::OnceLock;

use chrono::{Months, NaiveDate, Utc};
use regex::Regex;

use kvitto_core::{parse_amount, Item, MerchantInfo, ParsedFields};

macro_rules! re {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).expect("invalid built-in regex"))
        }
    };
}

// ── Keyword classes ──────────────────────────────────────────────────────────

re!(
    re_total_kw,
    r#"(?i)\b(?:total|grand\s+total|amount\s+due|balance\s+due|to\s+pay)\b|סה["״]?כ|סך\s*הכל|לתשלום"#
);
re!(re_subtotal_kw, r"(?i)\bsub\s*-?\s*total\b|ביניים");
re!(
    re_paid_kw,
    r"(?i)\b(?:paid|cash|credit|card|visa|mastercard|amex)\b|שולם|מזומן|אשראי|כרטיס"
);
re!(re_change_kw, r"(?i)\bchange\b|\brefund\b|עודף|החזר");
re!(re_tax_kw, r#"(?i)\b(?:vat|tax|discount)\b|מע["״]?מ|הנחה"#);

// Thousands-grouped form first so "1,234.56" is taken whole.
re!(
    re_amount,
    r"\d{1,3}(?:,\d{3})+(?:\.\d{1,2})?|\d+(?:[.,]\d{1,2})?"
);

// ── Date patterns ────────────────────────────────────────────────────────────

re!(re_date_dmy, r"\b(\d{1,2})[./-](\d{1,2})[./-](\d{2,4})\b");
re!(re_date_ymd, r"\b(\d{4})[./-](\d{1,2})[./-](\d{1,2})\b");
re!(
    re_date_hebrew,
    r"\b(\d{1,2})\s+ב?(ינואר|פברואר|מרץ|מרס|אפריל|מאי|יוני|יולי|אוגוסט|ספטמבר|אוקטובר|נובמבר|דצמבר)\s+(\d{2,4})\b"
);
re!(
    re_date_month_name,
    r"(?i)\b(january|february|march|april|may|june|july|august|september|october|november|december)\.?\s+(\d{1,2}),?\s+(\d{4})\b"
);
re!(
    re_date_day_month,
    r"(?i)\b(\d{1,2})\s+(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?,?\s+(\d{4})\b"
);

// ── Merchant patterns ────────────────────────────────────────────────────────

re!(
    re_label_kw,
    r"(?i)\b(?:receipt|invoice|tax|vat|date|tel|phone|fax|cashier|welcome|order)\b|קבלה|חשבונית|תאריך|טלפון|קופה|עוסק|פקס|ברוכים"
);
re!(
    re_tax_id,
    r#"(?i)(?:ע\.?\s?מ\.?|ח\.?\s?פ\.?|עוסק\s+מורשה|מס'?\s*עוסק|tax\s*id|vat\s*(?:no|number|reg)?\.?|business\s*(?:no|number|id)?\.?)\s*:?\s*(\d{9})\b"#
);
re!(
    re_phone,
    r"(?:\+972[-\s]?|0)(?:[23489]|5\d|7\d)[-\s]?\d{3}[-\s]?\d{4}\b"
);
re!(re_email, r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}");
re!(
    re_street_kw,
    r"(?i)\b(?:st|street|ave|avenue|rd|road|blvd|boulevard)\b|רחוב|רח'|שד'|שדרות|דרך"
);

// ── Item line shapes ─────────────────────────────────────────────────────────

re!(
    re_item_desc_price,
    r"^(?P<desc>[^\d\s].*?)\s+[₪$]?\s*(?P<price>\d{1,5}[.,]\d{1,2})\s*[₪$]?$"
);
re!(
    re_item_qty_desc_price,
    r"^(?P<qty>\d{1,3})\s*[xX×*]\s*(?P<desc>[^\d\s].*?)\s+[₪$]?\s*(?P<price>\d{1,5}[.,]\d{1,2})\s*[₪$]?$"
);
re!(
    re_item_desc_unit_qty,
    r"^(?P<desc>[^\d\s].*?)\s+[₪$]?\s*(?P<unit>\d{1,5}[.,]\d{1,2})\s*[xX×*]\s*(?P<qty>\d{1,3})$"
);

// ── Confidence constants ─────────────────────────────────────────────────────

const CONF_DATE_DMY: f32 = 0.75;
const CONF_DATE_YMD: f32 = 0.85;
const CONF_DATE_HEBREW: f32 = 0.80;
const CONF_DATE_NAMED: f32 = 0.85;

const CONF_TOTAL_KEYWORD: f32 = 0.90;
const CONF_TOTAL_CLAMPED: f32 = 0.75;
const CONF_TOTAL_PAID_MINUS_CHANGE: f32 = 0.70;
const CONF_TOTAL_FALLBACK: f32 = 0.50;

const CONF_NAME_PRIMARY: f32 = 0.70;
const CONF_NAME_FALLBACK: f32 = 0.40;

const CONF_ITEM_DESC_PRICE: f32 = 0.75;
const CONF_ITEM_QTY_DESC_PRICE: f32 = 0.85;
const CONF_ITEM_DESC_UNIT_QTY: f32 = 0.80;

// Field weights for the aggregate parse confidence; they sum to 1 and a
// missing field contributes zero.
const W_DATE: f32 = 0.30;
const W_TOTAL: f32 = 0.35;
const W_MERCHANT: f32 = 0.15;
const W_ITEMS: f32 = 0.20;

/// Two-digit years below the pivot land in the 2000s, the rest in the 1900s.
const TWO_DIGIT_YEAR_PIVOT: i32 = 30;
/// Receipts older than this are assumed to be misreads.
const MAX_DATE_AGE_MONTHS: u32 = 120;
/// Small future slack for clock skew and post-dated receipts.
const MAX_DATE_AHEAD_MONTHS: u32 = 12;

const NAME_SCAN_LINES: usize = 5;
const ADDRESS_SCAN_LINES: usize = 6;

/// Items above this are treated as misparsed summary amounts.
const MAX_ITEM_PRICE_CENTS: i64 = 1_000_000;
const MAX_DESCRIPTION_CHARS: usize = 100;

// ── Date cascade ─────────────────────────────────────────────────────────────

struct DatePattern {
    regex: fn() -> &'static Regex,
    build: fn(&regex::Captures<'_>) -> Option<NaiveDate>,
    confidence: f32,
}

/// Tried strictly in order; the first plausible hit wins, so the day-first
/// form beats everything else when both could match.
const DATE_PATTERNS: &[DatePattern] = &[
    DatePattern {
        regex: re_date_dmy,
        build: build_dmy,
        confidence: CONF_DATE_DMY,
    },
    DatePattern {
        regex: re_date_ymd,
        build: build_ymd,
        confidence: CONF_DATE_YMD,
    },
    DatePattern {
        regex: re_date_hebrew,
        build: build_hebrew,
        confidence: CONF_DATE_HEBREW,
    },
    DatePattern {
        regex: re_date_month_name,
        build: build_month_name,
        confidence: CONF_DATE_NAMED,
    },
    DatePattern {
        regex: re_date_day_month,
        build: build_day_month,
        confidence: CONF_DATE_NAMED,
    },
];

fn group<'a>(caps: &'a regex::Captures<'_>, idx: usize) -> Option<&'a str> {
    caps.get(idx).map(|m| m.as_str())
}

fn expand_year(year: i32) -> i32 {
    if year < 100 {
        if year < TWO_DIGIT_YEAR_PIVOT {
            2000 + year
        } else {
            1900 + year
        }
    } else {
        year
    }
}

fn build_dmy(caps: &regex::Captures<'_>) -> Option<NaiveDate> {
    let day: u32 = group(caps, 1)?.parse().ok()?;
    let month: u32 = group(caps, 2)?.parse().ok()?;
    let year = expand_year(group(caps, 3)?.parse().ok()?);
    NaiveDate::from_ymd_opt(year, month, day)
}

fn build_ymd(caps: &regex::Captures<'_>) -> Option<NaiveDate> {
    let year: i32 = group(caps, 1)?.parse().ok()?;
    let month: u32 = group(caps, 2)?.parse().ok()?;
    let day: u32 = group(caps, 3)?.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn build_hebrew(caps: &regex::Captures<'_>) -> Option<NaiveDate> {
    let day: u32 = group(caps, 1)?.parse().ok()?;
    let month = hebrew_month_number(group(caps, 2)?)?;
    let year = expand_year(group(caps, 3)?.parse().ok()?);
    NaiveDate::from_ymd_opt(year, month, day)
}

fn build_month_name(caps: &regex::Captures<'_>) -> Option<NaiveDate> {
    let month = month_number(group(caps, 1)?)?;
    let day: u32 = group(caps, 2)?.parse().ok()?;
    let year: i32 = group(caps, 3)?.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn build_day_month(caps: &regex::Captures<'_>) -> Option<NaiveDate> {
    let day: u32 = group(caps, 1)?.parse().ok()?;
    let month = month_number(group(caps, 2)?)?;
    let year: i32 = group(caps, 3)?.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn month_number(name: &str) -> Option<u32> {
    let lower = name.to_lowercase();
    let month = match lower.get(..3)? {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn hebrew_month_number(name: &str) -> Option<u32> {
    let month = match name {
        "ינואר" => 1,
        "פברואר" => 2,
        "מרץ" | "מרס" => 3,
        "אפריל" => 4,
        "מאי" => 5,
        "יוני" => 6,
        "יולי" => 7,
        "אוגוסט" => 8,
        "ספטמבר" => 9,
        "אוקטובר" => 10,
        "נובמבר" => 11,
        "דצמבר" => 12,
        _ => return None,
    };
    Some(month)
}

// ── Amount scanning ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct AmountScan {
    /// Last amount on the first total-keyword line, or on the line after
    /// it for label-on-its-own-line layouts.
    keyword: Option<i64>,
    /// Maximum amount across all payment-keyword lines.
    paid: Option<i64>,
    /// First amount on the first change-keyword line.
    change: Option<i64>,
}

fn is_total_line(line: &str) -> bool {
    re_total_kw().is_match(line) && !re_subtotal_kw().is_match(line)
}

fn is_summary_line(line: &str) -> bool {
    re_total_kw().is_match(line)
        || re_subtotal_kw().is_match(line)
        || re_paid_kw().is_match(line)
        || re_change_kw().is_match(line)
        || re_tax_kw().is_match(line)
}

/// Lines whose digits are identifiers, not money: dates, business numbers,
/// phone numbers.
fn is_reference_line(line: &str) -> bool {
    re_date_dmy().is_match(line)
        || re_date_ymd().is_match(line)
        || re_tax_id().is_match(line)
        || re_phone().is_match(line)
}

fn amounts(line: &str) -> Vec<i64> {
    re_amount()
        .find_iter(line)
        .filter_map(|m| parse_amount(m.as_str()))
        .collect()
}

/// Amounts that carry a decimal part. Card fragments and quantities are
/// whole numbers, so a decimal is the stronger money signal.
fn decimal_amounts(line: &str) -> Vec<i64> {
    re_amount()
        .find_iter(line)
        .filter(|m| m.as_str().contains(['.', ',']))
        .filter_map(|m| parse_amount(m.as_str()))
        .collect()
}

fn scan_amounts(lines: &[String]) -> AmountScan {
    let mut scan = AmountScan::default();
    for (idx, line) in lines.iter().enumerate() {
        if scan.keyword.is_none() && is_total_line(line) {
            scan.keyword = amounts(line).last().copied().or_else(|| {
                lines
                    .get(idx + 1)
                    .and_then(|next| amounts(next).last().copied())
            });
        }
        if re_paid_kw().is_match(line) {
            let line_max = decimal_amounts(line)
                .into_iter()
                .max()
                .or_else(|| amounts(line).into_iter().max());
            if let Some(cents) = line_max {
                scan.paid = Some(scan.paid.map_or(cents, |p| p.max(cents)));
            }
        }
        if scan.change.is_none() && re_change_kw().is_match(line) {
            scan.change = decimal_amounts(line)
                .first()
                .copied()
                .or_else(|| amounts(line).first().copied());
        }
    }
    scan
}

/// Largest amount on any non-reference line, optionally capped.
fn max_amount(lines: &[String], cap: Option<i64>) -> Option<i64> {
    let mut best_decimal: Option<i64> = None;
    let mut best_plain: Option<i64> = None;
    for line in lines {
        if is_reference_line(line) {
            continue;
        }
        for m in re_amount().find_iter(line) {
            if let Some(cents) = parse_amount(m.as_str()) {
                if cap.is_some_and(|c| cents > c) {
                    continue;
                }
                let slot = if m.as_str().contains(['.', ',']) {
                    &mut best_decimal
                } else {
                    &mut best_plain
                };
                *slot = Some(slot.map_or(cents, |b| b.max(cents)));
            }
        }
    }
    best_decimal.or(best_plain)
}

/// Pick the receipt total.
///
/// An explicit total keyword is trusted unless it exceeds what was actually
/// paid, in which case the cleaner payment line wins. Without any keyword,
/// paid-minus-change reconstructs the total, and the last resort is the
/// largest plausible amount in the text.
fn resolve_total(scan: &AmountScan, lines: &[String]) -> Option<(i64, f32)> {
    match (scan.keyword, scan.paid) {
        (Some(keyword), Some(paid)) if keyword > paid => Some((paid, CONF_TOTAL_CLAMPED)),
        (Some(keyword), _) => Some((keyword, CONF_TOTAL_KEYWORD)),
        (None, Some(paid)) => {
            if let Some(change) = scan.change {
                let net = paid - change;
                if net > 0 {
                    return Some((net, CONF_TOTAL_PAID_MINUS_CHANGE));
                }
            }
            max_amount(lines, Some(paid)).map(|cents| (cents, CONF_TOTAL_FALLBACK))
        }
        (None, None) => max_amount(lines, None).map(|cents| (cents, CONF_TOTAL_FALLBACK)),
    }
}

// ── Merchant extraction ──────────────────────────────────────────────────────

fn is_name_candidate(line: &str) -> bool {
    let alpha = line.chars().filter(|c| c.is_alphabetic()).count();
    let digits = line.chars().filter(|c| c.is_ascii_digit()).count();
    // Business names are multi-word; single tokens are usually codes.
    line.contains(' ')
        && alpha >= 2
        && digits <= alpha
        && !re_label_kw().is_match(line)
        && !is_summary_line(line)
}

fn is_address_candidate(line: &str) -> bool {
    if re_street_kw().is_match(line) {
        return true;
    }
    // "123 Main" style: leading house number, but not a date or phone line.
    line.chars().next().is_some_and(|c| c.is_ascii_digit())
        && line.chars().any(|c| c.is_alphabetic())
        && !is_reference_line(line)
}

fn extract_merchant(lines: &[String], text: &str) -> (MerchantInfo, Option<f32>) {
    let mut merchant = MerchantInfo::default();
    let mut name_confidence = None;
    let mut name_index = None;

    for (idx, line) in lines.iter().take(NAME_SCAN_LINES).enumerate() {
        if is_name_candidate(line) {
            merchant.name = Some(line.clone());
            name_confidence = Some(CONF_NAME_PRIMARY);
            name_index = Some(idx);
            break;
        }
    }
    if merchant.name.is_none() {
        if let Some(first) = lines.first() {
            merchant.name = Some(first.clone());
            name_confidence = Some(CONF_NAME_FALLBACK);
            name_index = Some(0);
        }
    }

    merchant.tax_id = re_tax_id()
        .captures(text)
        .and_then(|caps| group(&caps, 1).map(str::to_string));
    merchant.phone = re_phone().find(text).map(|m| m.as_str().to_string());
    merchant.email = re_email().find(text).map(|m| m.as_str().to_string());
    merchant.address = lines
        .iter()
        .enumerate()
        .take(ADDRESS_SCAN_LINES)
        .filter(|(idx, _)| Some(*idx) != name_index)
        .find(|(_, line)| is_address_candidate(line))
        .map(|(_, line)| line.clone());

    (merchant, name_confidence)
}

// ── Item extraction ──────────────────────────────────────────────────────────

struct ItemShape {
    regex: fn() -> &'static Regex,
    build: fn(&regex::Captures<'_>) -> Option<Item>,
}

/// First shape whose regex matches claims the line, even if its builder
/// then rejects it.
const ITEM_SHAPES: &[ItemShape] = &[
    ItemShape {
        regex: re_item_desc_price,
        build: build_desc_price,
    },
    ItemShape {
        regex: re_item_qty_desc_price,
        build: build_qty_desc_price,
    },
    ItemShape {
        regex: re_item_desc_unit_qty,
        build: build_desc_unit_qty,
    },
];

fn rounded_div(total: i64, parts: i64) -> i64 {
    (total + parts / 2) / parts
}

fn build_desc_price(caps: &regex::Captures<'_>) -> Option<Item> {
    let desc = caps.name("desc")?.as_str().trim();
    let price = parse_amount(caps.name("price")?.as_str())?;
    Some(Item::simple(desc, price, CONF_ITEM_DESC_PRICE))
}

fn build_qty_desc_price(caps: &regex::Captures<'_>) -> Option<Item> {
    let qty: u32 = caps.name("qty")?.as_str().parse().ok()?;
    if qty == 0 {
        return None;
    }
    let desc = caps.name("desc")?.as_str().trim();
    let price = parse_amount(caps.name("price")?.as_str())?;
    Some(Item {
        description: desc.to_string(),
        price_cents: price,
        quantity: qty,
        unit_price_cents: rounded_div(price, qty as i64),
        confidence: CONF_ITEM_QTY_DESC_PRICE,
    })
}

fn build_desc_unit_qty(caps: &regex::Captures<'_>) -> Option<Item> {
    let qty: u32 = caps.name("qty")?.as_str().parse().ok()?;
    if qty == 0 {
        return None;
    }
    let desc = caps.name("desc")?.as_str().trim();
    let unit = parse_amount(caps.name("unit")?.as_str())?;
    Some(Item {
        description: desc.to_string(),
        price_cents: unit * qty as i64,
        quantity: qty,
        unit_price_cents: unit,
        confidence: CONF_ITEM_DESC_UNIT_QTY,
    })
}

fn is_valid_item(item: &Item) -> bool {
    if item.price_cents <= 0 || item.price_cents > MAX_ITEM_PRICE_CENTS {
        return false;
    }
    let desc_chars = item.description.chars().count();
    if desc_chars <= 1 || desc_chars > MAX_DESCRIPTION_CHARS {
        return false;
    }
    item.description.chars().any(|c| c.is_alphabetic())
}

pub(crate) fn extract_items(lines: &[String]) -> Vec<Item> {
    let mut items = Vec::new();
    for line in lines {
        if is_summary_line(line) {
            continue;
        }
        for shape in ITEM_SHAPES {
            if let Some(caps) = (shape.regex)().captures(line) {
                if let Some(item) = (shape.build)(&caps) {
                    if is_valid_item(&item) {
                        items.push(item);
                    }
                }
                break;
            }
        }
    }
    items
}

// ── Parser ───────────────────────────────────────────────────────────────────

/// Summary fields shared between per-capture parsing and post-merge
/// re-derivation.
pub(crate) struct Summary {
    pub date: Option<(NaiveDate, f32)>,
    pub total: Option<(i64, f32)>,
    pub merchant: MerchantInfo,
    pub name_confidence: Option<f32>,
}

pub struct FieldParser {
    today: NaiveDate,
}

impl FieldParser {
    pub fn new() -> Self {
        Self {
            today: Utc::now().date_naive(),
        }
    }

    /// Fixed reference date for year plausibility.
    pub fn with_today(today: NaiveDate) -> Self {
        Self { today }
    }

    /// Parse one capture's recognized text into structured fields.
    pub fn parse(&self, raw_text: &str) -> ParsedFields {
        let lines: Vec<String> = raw_text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        let summary = self.derive_summary(&lines);
        let items = extract_items(&lines);
        let confidence = aggregate_confidence(&summary, &items);
        ParsedFields {
            date: summary.date.map(|(date, _)| date),
            total_cents: summary.total.map(|(cents, _)| cents),
            merchant: summary.merchant,
            items,
            lines,
            confidence,
        }
    }

    /// Derive date, total and merchant from an assembled line sequence.
    pub(crate) fn derive_summary(&self, lines: &[String]) -> Summary {
        let text = lines.join("\n");
        let date = self.extract_date(&text);
        let scan = scan_amounts(lines);
        let total = resolve_total(&scan, lines);
        let (merchant, name_confidence) = extract_merchant(lines, &text);
        Summary {
            date,
            total,
            merchant,
            name_confidence,
        }
    }

    fn extract_date(&self, text: &str) -> Option<(NaiveDate, f32)> {
        for pattern in DATE_PATTERNS {
            for caps in (pattern.regex)().captures_iter(text) {
                if let Some(date) = (pattern.build)(&caps) {
                    if self.is_plausible(date) {
                        return Some((date, pattern.confidence));
                    }
                }
            }
        }
        None
    }

    fn is_plausible(&self, date: NaiveDate) -> bool {
        let earliest = self
            .today
            .checked_sub_months(Months::new(MAX_DATE_AGE_MONTHS))
            .unwrap_or(NaiveDate::MIN);
        let latest = self
            .today
            .checked_add_months(Months::new(MAX_DATE_AHEAD_MONTHS))
            .unwrap_or(NaiveDate::MAX);
        (earliest..=latest).contains(&date)
    }
}

impl Default for FieldParser {
    fn default() -> Self {
        Self::new()
    }
}

fn aggregate_confidence(summary: &Summary, items: &[Item]) -> f32 {
    let items_confidence = if items.is_empty() {
        None
    } else {
        Some(items.iter().map(|i| i.confidence).sum::<f32>() / items.len() as f32)
    };
    let parts = [
        (summary.date.map(|(_, c)| c), W_DATE),
        (summary.total.map(|(_, c)| c), W_TOTAL),
        (summary.name_confidence, W_MERCHANT),
        (items_confidence, W_ITEMS),
    ];
    let mut score = 0.0;
    for (confidence, weight) in parts {
        if let Some(c) = confidence {
            score += c * weight;
        }
    }
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> FieldParser {
        FieldParser::with_today(NaiveDate::from_ymd_opt(2026, 8, 15).unwrap())
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // ── dates ──

    #[test]
    fn parses_day_first_dates() {
        let parsed = parser().parse("תאריך: 15/03/2026");
        assert_eq!(parsed.date, Some(date(2026, 3, 15)));
        let parsed = parser().parse("15.3.26 12:30");
        assert_eq!(parsed.date, Some(date(2026, 3, 15)));
    }

    #[test]
    fn two_digit_years_use_the_pivot() {
        // 24 -> 2024 (below the pivot), 95 -> 1995 (above it, then rejected
        // as implausibly old).
        let parsed = parser().parse("01.02.24");
        assert_eq!(parsed.date, Some(date(2024, 2, 1)));
        let parsed = parser().parse("01.02.95");
        assert_eq!(parsed.date, None);
    }

    #[test]
    fn parses_iso_dates() {
        let parsed = parser().parse("printed 2026-03-15 10:44");
        assert_eq!(parsed.date, Some(date(2026, 3, 15)));
    }

    #[test]
    fn parses_hebrew_month_dates() {
        let parsed = parser().parse("5 במרץ 2026");
        assert_eq!(parsed.date, Some(date(2026, 3, 5)));
        let parsed = parser().parse("17 אוגוסט 2025");
        assert_eq!(parsed.date, Some(date(2025, 8, 17)));
    }

    #[test]
    fn parses_english_month_dates() {
        let parsed = parser().parse("March 15, 2026");
        assert_eq!(parsed.date, Some(date(2026, 3, 15)));
        let parsed = parser().parse("15 Mar 2026");
        assert_eq!(parsed.date, Some(date(2026, 3, 15)));
    }

    #[test]
    fn impossible_dates_fall_through_the_cascade() {
        // 45/13 is no calendar date; the ISO form later in the text is.
        let parsed = parser().parse("45/13/2026 then 2026-03-15");
        assert_eq!(parsed.date, Some(date(2026, 3, 15)));
    }

    #[test]
    fn implausible_dates_are_rejected() {
        assert_eq!(parser().parse("15/03/2039").date, None);
        assert_eq!(parser().parse("15/03/2012").date, None);
        // Just inside the 10-year window.
        assert!(parser().parse("15/03/2017").date.is_some());
    }

    // ── totals ──

    #[test]
    fn keyword_total_beats_larger_amounts() {
        let parsed = parser().parse("mystery fee 99.00\nTOTAL 45.90");
        assert_eq!(parsed.total_cents, Some(4590));
    }

    #[test]
    fn hebrew_total_keyword_is_recognized() {
        let parsed = parser().parse("סה\"כ לתשלום: 64.40");
        assert_eq!(parsed.total_cents, Some(6440));
    }

    #[test]
    fn total_amount_may_sit_on_the_next_line() {
        let parsed = parser().parse("סה\"כ\n45.90");
        assert_eq!(parsed.total_cents, Some(4590));
    }

    #[test]
    fn subtotal_lines_are_not_totals() {
        let parsed = parser().parse("SUB TOTAL 40.00\nTOTAL 45.90");
        assert_eq!(parsed.total_cents, Some(4590));
    }

    #[test]
    fn misread_total_is_clamped_to_paid() {
        // The keyword total exceeds what was paid, so the payment line wins.
        let parsed = parser().parse("סה\"כ 89.00\nשולם במזומן 45.90");
        assert_eq!(parsed.total_cents, Some(4590));
    }

    #[test]
    fn paid_minus_change_reconstructs_total() {
        let parsed = parser().parse("מזומן 100.00\nעודף 10.10");
        assert_eq!(parsed.total_cents, Some(8990));
    }

    #[test]
    fn fallback_total_is_the_largest_amount() {
        let parsed = parser().parse("latte 12.90\nsoup of the day 24.00");
        assert_eq!(parsed.total_cents, Some(2400));
    }

    #[test]
    fn fallback_ignores_dates_and_reference_numbers() {
        let parsed = parser().parse("15/03/2026\nע.מ 514891234\nlatte 12.90");
        assert_eq!(parsed.total_cents, Some(1290));
    }

    #[test]
    fn no_amounts_means_no_total() {
        let parsed = parser().parse("thank you\ncome again");
        assert_eq!(parsed.total_cents, None);
    }

    // ── merchant ──

    #[test]
    fn merchant_name_is_the_first_plausible_header_line() {
        let parsed = parser().parse("קפה נח בע\"מ\nרחוב הרצל 5 תל אביב\nטל: 03-555-1234");
        assert_eq!(parsed.merchant.name.as_deref(), Some("קפה נח בע\"מ"));
        assert_eq!(
            parsed.merchant.address.as_deref(),
            Some("רחוב הרצל 5 תל אביב")
        );
        assert_eq!(parsed.merchant.phone.as_deref(), Some("03-555-1234"));
    }

    #[test]
    fn blacklisted_header_lines_are_skipped() {
        let parsed = parser().parse("חשבונית מס קבלה\nSuper Deli\nTOTAL 10.00");
        assert_eq!(parsed.merchant.name.as_deref(), Some("Super Deli"));
    }

    #[test]
    fn single_word_headers_are_not_names() {
        let parsed = parser().parse("SUPERPHARM\nSuper Pharm Ltd\nTOTAL 10.00");
        assert_eq!(parsed.merchant.name.as_deref(), Some("Super Pharm Ltd"));
    }

    #[test]
    fn name_falls_back_to_the_first_line() {
        let parsed = parser().parse("קבלה מס' 1234\n15/03/2026");
        assert_eq!(parsed.merchant.name.as_deref(), Some("קבלה מס' 1234"));
    }

    #[test]
    fn extracts_tax_id_phone_and_email() {
        let text = "Cafe Noah\nע.מ 514891234\n03-555-1234\nhello@cafenoah.co.il";
        let parsed = parser().parse(text);
        assert_eq!(parsed.merchant.tax_id.as_deref(), Some("514891234"));
        assert_eq!(parsed.merchant.phone.as_deref(), Some("03-555-1234"));
        assert_eq!(
            parsed.merchant.email.as_deref(),
            Some("hello@cafenoah.co.il")
        );
    }

    #[test]
    fn tax_id_requires_a_label() {
        let parsed = parser().parse("Cafe Noah\n514891234");
        assert_eq!(parsed.merchant.tax_id, None);
    }

    #[test]
    fn date_lines_are_not_addresses() {
        let parsed = parser().parse("Cafe Noah\n15/03/2026 10:21");
        assert_eq!(parsed.merchant.address, None);
    }

    // ── items ──

    #[test]
    fn parses_simple_item_lines() {
        let items = parser().parse("לחם מלא 12.90\nקפה הפוך 8.00").items;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].description, "לחם מלא");
        assert_eq!(items[0].price_cents, 1290);
        assert_eq!(items[0].quantity, 1);
        assert_eq!(items[1].unit_price_cents, 800);
    }

    #[test]
    fn parses_quantity_prefix_items() {
        let items = parser().parse("2 x latte 25.80").items;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 2);
        assert_eq!(items[0].price_cents, 2580);
        assert_eq!(items[0].unit_price_cents, 1290);
    }

    #[test]
    fn parses_unit_times_quantity_items() {
        let items = parser().parse("croissant 9.50 x 3").items;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 3);
        assert_eq!(items[0].unit_price_cents, 950);
        assert_eq!(items[0].price_cents, 2850);
    }

    #[test]
    fn unit_price_rounds_to_nearest_cent() {
        let items = parser().parse("3 x cookie 10.00").items;
        assert_eq!(items[0].unit_price_cents, 333);
    }

    #[test]
    fn summary_lines_never_become_items() {
        let parsed = parser().parse("latte 12.90\nTOTAL 12.90\nמזומן 20.00\nעודף 7.10");
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].description, "latte");
    }

    #[test]
    fn out_of_bounds_items_are_rejected() {
        let items = parser().parse("watch 99999.99\nx 1.00\nthing 0.00").items;
        assert!(items.is_empty());
    }

    #[test]
    fn integer_only_lines_are_not_items() {
        let items = parser().parse("table 12").items;
        assert!(items.is_empty());
    }

    // ── whole receipts ──

    #[test]
    fn parses_a_full_hebrew_receipt() {
        let text = "קפה נח\nרחוב הרצל 5\nע.מ 514891234\n15/03/2026\nקפה הפוך 12.00\nמאפה שקדים 14.50\nסה\"כ 26.50\nמזומן 30.00\nעודף 3.50";
        let parsed = parser().parse(text);
        assert_eq!(parsed.merchant.name.as_deref(), Some("קפה נח"));
        assert_eq!(parsed.date, Some(date(2026, 3, 15)));
        assert_eq!(parsed.total_cents, Some(2650));
        assert_eq!(parsed.items.len(), 2);
        assert_eq!(parsed.items_total_cents(), 2650);
        assert!(parsed.confidence > 0.5, "confidence {}", parsed.confidence);
        assert_eq!(parsed.lines.len(), 9);
    }

    #[test]
    fn empty_text_parses_to_nothing() {
        let parsed = parser().parse("");
        assert!(parsed.lines.is_empty());
        assert!(parsed.items.is_empty());
        assert_eq!(parsed.date, None);
        assert_eq!(parsed.total_cents, None);
        assert_eq!(parsed.confidence, 0.0);
    }

    #[test]
    fn lines_are_trimmed_and_blank_lines_dropped() {
        let parsed = parser().parse("  Cafe Noah  \n\n   \nlatte 12.90\n");
        assert_eq!(parsed.lines, vec!["Cafe Noah", "latte 12.90"]);
    }
}
