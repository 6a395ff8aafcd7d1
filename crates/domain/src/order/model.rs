//! Imported orders and their lines.

use chrono::{DateTime, Utc};
use common::{LineId, OrderId, StoreId};
use serde::{Deserialize, Serialize};

use super::OrderStatus;
use super::raw::{RawOrder, RawOrderLine};
use crate::error::DomainError;
use crate::routing::{LineBinding, LookupMethod};

/// A single line of an imported order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: LineId,
    pub order_id: OrderId,
    /// Index of the line within the source payload.
    pub position: i32,
    /// The source platform's id for the line, when it reports one.
    pub source_line_id: Option<String>,
    pub sku: Option<String>,
    pub product_id: Option<String>,
    pub ean: Option<String>,
    pub title: Option<String>,
    pub quantity: u32,
    /// Lowercased, trimmed tags.
    pub tags: Vec<String>,
    /// Destination store, set once by routing and never changed afterwards.
    pub destination: Option<StoreId>,
    /// How the destination should look the product up; meaningful once assigned.
    pub lookup: LookupMethod,
}

impl OrderLine {
    /// Builds an unassigned line from its source representation.
    pub fn from_raw(order_id: OrderId, position: i32, raw: &RawOrderLine) -> Self {
        Self {
            id: LineId::new(),
            order_id,
            position,
            source_line_id: raw.source_line_id.clone(),
            sku: raw.sku.clone(),
            product_id: raw.product_id.clone(),
            ean: raw.ean.clone(),
            title: raw.title.clone(),
            quantity: raw.quantity,
            tags: normalize_tags(&raw.tags),
            destination: None,
            lookup: LookupMethod::default(),
        }
    }

    /// Returns true if the line carries the given tag (case-insensitive).
    pub fn has_tag(&self, tag: &str) -> bool {
        let wanted = tag.trim().to_lowercase();
        self.tags.iter().any(|t| *t == wanted)
    }

    /// Binds the line to a destination.
    ///
    /// Re-assigning the same destination is a no-op; a different destination
    /// is refused.
    pub fn assign(&mut self, destination: StoreId, lookup: LookupMethod) -> Result<(), DomainError> {
        match self.destination {
            None => {
                self.destination = Some(destination);
                self.lookup = lookup;
                Ok(())
            }
            Some(existing) if existing == destination => Ok(()),
            Some(existing) => Err(DomainError::LineAlreadyAssigned {
                line_id: self.id,
                existing,
                requested: destination,
            }),
        }
    }
}

/// An order imported from the source store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub source_store_id: StoreId,
    /// The source platform's own order id.
    pub native_id: String,
    pub order_number: Option<String>,
    pub status: OrderStatus,
    /// Bumped on every committed status transition.
    pub version: i64,
    /// When the order was placed at the source.
    pub placed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub payload: serde_json::Value,
    pub lines: Vec<OrderLine>,
}

impl Order {
    /// Creates a `New` order from a validated raw order.
    pub fn import(source_store_id: StoreId, raw: &RawOrder, now: DateTime<Utc>) -> Self {
        let id = OrderId::new();
        Self {
            id,
            source_store_id,
            native_id: raw.native_id.clone(),
            order_number: raw.order_number.clone(),
            status: OrderStatus::New,
            version: 1,
            placed_at: raw.placed_at,
            created_at: now,
            last_synced_at: None,
            payload: raw.payload.clone(),
            lines: lines_from_raw(id, &raw.lines),
        }
    }

    /// Replaces the snapshot and lines with a fresher copy from the source.
    ///
    /// Only allowed while the order is still `New`; returns false otherwise.
    pub fn refresh_from(&mut self, raw: &RawOrder) -> bool {
        if !self.status.accepts_source_updates() {
            return false;
        }
        self.order_number = raw.order_number.clone();
        self.placed_at = raw.placed_at;
        self.payload = raw.payload.clone();
        self.lines = lines_from_raw(self.id, &raw.lines);
        true
    }

    /// Applies a status transition, enforcing the state machine.
    pub fn transition(&mut self, next: OrderStatus, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.version += 1;
        self.last_synced_at = Some(now);
        Ok(())
    }

    /// Applies routing bindings to this order's lines, all or nothing.
    pub fn bind_lines(&mut self, bindings: &[LineBinding]) -> Result<(), DomainError> {
        let mut updated = self.lines.clone();
        for binding in bindings {
            let line = updated
                .iter_mut()
                .find(|l| l.id == binding.line_id)
                .ok_or(DomainError::UnknownLine {
                    order_id: self.id,
                    line_id: binding.line_id,
                })?;
            line.assign(binding.destination, binding.lookup)?;
        }
        self.lines = updated;
        Ok(())
    }

    /// Lines bound to the given destination.
    pub fn lines_for(&self, destination: StoreId) -> Vec<&OrderLine> {
        self.lines
            .iter()
            .filter(|l| l.destination == Some(destination))
            .collect()
    }

    /// Distinct destinations assigned to this order's lines, in line order.
    pub fn assigned_destinations(&self) -> Vec<StoreId> {
        let mut out = Vec::new();
        for dest in self.lines.iter().filter_map(|l| l.destination) {
            if !out.contains(&dest) {
                out.push(dest);
            }
        }
        out
    }

    /// Lines without a destination.
    pub fn unassigned_lines(&self) -> impl Iterator<Item = &OrderLine> {
        self.lines.iter().filter(|l| l.destination.is_none())
    }

    /// Label used in logs: the order number when known, else the native id.
    pub fn display_ref(&self) -> &str {
        self.order_number.as_deref().unwrap_or(&self.native_id)
    }
}

fn lines_from_raw(order_id: OrderId, raw: &[RawOrderLine]) -> Vec<OrderLine> {
    raw.iter()
        .enumerate()
        .map(|(i, line)| OrderLine::from_raw(order_id, i as i32, line))
        .collect()
}

fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}
