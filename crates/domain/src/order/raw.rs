//! Orders as delivered by a source connector, before import.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// A line item as reported by the source platform.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawOrderLine {
    /// The platform's id for this line, used to address it on sync-back.
    #[serde(default)]
    pub source_line_id: Option<String>,
    pub sku: Option<String>,
    pub product_id: Option<String>,
    pub ean: Option<String>,
    pub title: Option<String>,
    pub quantity: u32,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RawOrderLine {
    /// Creates a line with a SKU and quantity.
    pub fn new(sku: impl Into<String>, quantity: u32) -> Self {
        Self {
            sku: Some(sku.into()),
            quantity,
            ..Default::default()
        }
    }

    pub fn with_source_line_id(mut self, id: impl Into<String>) -> Self {
        self.source_line_id = Some(id.into());
        self
    }

    pub fn with_product_id(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }

    pub fn with_ean(mut self, ean: impl Into<String>) -> Self {
        self.ean = Some(ean.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Largest quantity a line may carry; storage keeps quantities as 32-bit signed integers.
pub const MAX_LINE_QUANTITY: u32 = i32::MAX as u32;

/// An order as reported by the source platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOrder {
    pub native_id: String,
    pub order_number: Option<String>,
    pub placed_at: DateTime<Utc>,
    /// Full platform payload, kept verbatim as the order's snapshot.
    pub payload: serde_json::Value,
    pub lines: Vec<RawOrderLine>,
}

impl RawOrder {
    /// Checks the order is importable.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.native_id.trim().is_empty() {
            return Err(DomainError::MalformedOrder {
                native_id: self.native_id.clone(),
                reason: "missing native order id".to_string(),
            });
        }
        if self.lines.is_empty() {
            return Err(DomainError::MalformedOrder {
                native_id: self.native_id.clone(),
                reason: "order has no line items".to_string(),
            });
        }
        if let Some(pos) = self.lines.iter().position(|l| l.quantity == 0) {
            return Err(DomainError::MalformedOrder {
                native_id: self.native_id.clone(),
                reason: format!("line {pos} has zero quantity"),
            });
        }
        if let Some(pos) = self
            .lines
            .iter()
            .position(|l| l.quantity > MAX_LINE_QUANTITY)
        {
            return Err(DomainError::MalformedOrder {
                native_id: self.native_id.clone(),
                reason: format!("line {pos} quantity exceeds {MAX_LINE_QUANTITY}"),
            });
        }
        if let Some(pos) = self
            .lines
            .iter()
            .position(|l| l.sku.is_none() && l.product_id.is_none() && l.ean.is_none())
        {
            return Err(DomainError::MalformedOrder {
                native_id: self.native_id.clone(),
                reason: format!("line {pos} has no sku, product id or ean"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(lines: Vec<RawOrderLine>) -> RawOrder {
        RawOrder {
            native_id: "1001".to_string(),
            order_number: None,
            placed_at: Utc::now(),
            payload: serde_json::Value::Null,
            lines,
        }
    }

    #[test]
    fn valid_order_passes() {
        assert!(order(vec![RawOrderLine::new("SKU", 1)]).validate().is_ok());
    }

    #[test]
    fn rejects_blank_native_id() {
        let mut o = order(vec![RawOrderLine::new("SKU", 1)]);
        o.native_id = "  ".to_string();
        assert!(matches!(
            o.validate(),
            Err(DomainError::MalformedOrder { .. })
        ));
    }

    #[test]
    fn rejects_empty_orders_and_zero_quantities() {
        assert!(order(vec![]).validate().is_err());
        let err = order(vec![RawOrderLine::new("A", 1), RawOrderLine::new("B", 0)])
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("line 1 has zero quantity"));
    }

    #[test]
    fn rejects_quantities_beyond_storage_range() {
        let err = order(vec![RawOrderLine::new("A", MAX_LINE_QUANTITY + 1)])
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("line 0 quantity exceeds"));

        assert!(
            order(vec![RawOrderLine::new("A", MAX_LINE_QUANTITY)])
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn rejects_unidentifiable_lines() {
        let line = RawOrderLine {
            quantity: 1,
            ..Default::default()
        };
        assert!(order(vec![line]).validate().is_err());

        let by_product = RawOrderLine {
            quantity: 1,
            ..Default::default()
        }
        .with_product_id("gid-9");
        assert!(order(vec![by_product]).validate().is_ok());
    }
}
