use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Business identity printed at the top of a receipt. Every field is
/// optional; receipts routinely omit or garble any of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MerchantInfo {
    pub name: Option<String>,
    /// Nine-digit Israeli business number (ע.מ / ח.פ).
    pub tax_id: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl MerchantInfo {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.tax_id.is_none()
            && self.address.is_none()
            && self.phone.is_none()
            && self.email.is_none()
    }
}

/// A single purchased line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub description: String,
    /// Line total in cents (unit price times quantity).
    pub price_cents: i64,
    pub quantity: u32,
    pub unit_price_cents: i64,
    /// Confidence assigned by the line shape that matched, in [0, 1].
    pub confidence: f32,
}

impl Item {
    /// Single-quantity item where the line total is the unit price.
    pub fn simple(description: impl Into<String>, price_cents: i64, confidence: f32) -> Self {
        Self {
            description: description.into(),
            price_cents,
            quantity: 1,
            unit_price_cents: price_cents,
            confidence,
        }
    }
}

/// Structured fields extracted from one capture's recognized text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedFields {
    pub date: Option<NaiveDate>,
    pub total_cents: Option<i64>,
    pub merchant: MerchantInfo,
    pub items: Vec<Item>,
    /// Trimmed non-empty text lines, the unit overlap detection works on.
    pub lines: Vec<String>,
    /// Aggregate parse confidence in [0, 1].
    pub confidence: f32,
}

impl ParsedFields {
    /// Stand-in for captures whose recognition produced nothing usable.
    pub fn fallback() -> Self {
        Self::default()
    }

    pub fn items_total_cents(&self) -> i64 {
        self.items.iter().map(|i| i.price_cents).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merchant_emptiness() {
        assert!(MerchantInfo::default().is_empty());
        let named = MerchantInfo {
            name: Some("Cafe Noah".into()),
            ..Default::default()
        };
        assert!(!named.is_empty());
    }

    #[test]
    fn simple_item_defaults() {
        let item = Item::simple("espresso", 1200, 0.75);
        assert_eq!(item.quantity, 1);
        assert_eq!(item.unit_price_cents, 1200);
        assert_eq!(item.price_cents, 1200);
    }

    #[test]
    fn fallback_is_inert() {
        let fields = ParsedFields::fallback();
        assert!(fields.lines.is_empty());
        assert!(fields.items.is_empty());
        assert_eq!(fields.confidence, 0.0);
        assert_eq!(fields.items_total_cents(), 0);
    }

    #[test]
    fn items_total_sums_line_totals() {
        let fields = ParsedFields {
            items: vec![Item::simple("a", 100, 0.7), Item::simple("b", 250, 0.7)],
            ..Default::default()
        };
        assert_eq!(fields.items_total_cents(), 350);
    }
}
