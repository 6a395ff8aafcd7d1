//! Routing rule configuration.

use common::{RuleId, StoreId};
use serde::{Deserialize, Serialize};

use super::SkuPattern;
use crate::error::DomainError;
use crate::order::OrderLine;

/// How a destination should find the product for a dispatched line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LookupMethod {
    #[default]
    Sku,
    Ean,
}

impl LookupMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupMethod::Sku => "sku",
            LookupMethod::Ean => "ean",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "sku" => Ok(LookupMethod::Sku),
            "ean" => Ok(LookupMethod::Ean),
            other => Err(DomainError::UnknownValue {
                kind: "lookup method",
                value: other.to_string(),
            }),
        }
    }
}

/// What a rule matches on.
///
/// Every field that is set must match. A predicate with no fields set
/// matches every line.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RulePredicate {
    pub sku_pattern: Option<SkuPattern>,
    pub product_id: Option<String>,
    pub tag: Option<String>,
}

impl RulePredicate {
    /// Matches every line.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn sku(pattern: impl Into<String>) -> Self {
        Self {
            sku_pattern: Some(SkuPattern::new(pattern)),
            ..Default::default()
        }
    }

    pub fn product(product_id: impl Into<String>) -> Self {
        Self {
            product_id: Some(product_id.into()),
            ..Default::default()
        }
    }

    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
            ..Default::default()
        }
    }

    pub fn and_product(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }

    pub fn and_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn is_catch_all(&self) -> bool {
        self.sku_pattern.is_none() && self.product_id.is_none() && self.tag.is_none()
    }

    pub fn matches(&self, line: &OrderLine) -> bool {
        if let Some(pattern) = &self.sku_pattern {
            match line.sku.as_deref() {
                Some(sku) if pattern.matches(sku) => {}
                _ => return false,
            }
        }
        if let Some(product_id) = &self.product_id
            && line.product_id.as_deref() != Some(product_id.as_str())
        {
            return false;
        }
        if let Some(tag) = &self.tag
            && !line.has_tag(tag)
        {
            return false;
        }
        true
    }
}

/// Maps matching lines from a source store to a destination store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub id: RuleId,
    pub source_store_id: StoreId,
    pub destination_store_id: StoreId,
    pub predicate: RulePredicate,
    /// Higher priorities are evaluated first.
    pub priority: i32,
    pub lookup: LookupMethod,
    pub active: bool,
    pub notes: Option<String>,
}

impl RoutingRule {
    pub fn new(
        source_store_id: StoreId,
        destination_store_id: StoreId,
        predicate: RulePredicate,
        priority: i32,
    ) -> Self {
        Self {
            id: RuleId::new(),
            source_store_id,
            destination_store_id,
            predicate,
            priority,
            lookup: LookupMethod::Sku,
            active: true,
            notes: None,
        }
    }

    pub fn with_lookup(mut self, lookup: LookupMethod) -> Self {
        self.lookup = lookup;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn matches(&self, line: &OrderLine) -> bool {
        self.active && self.predicate.matches(line)
    }
}
