//! Configured stores.

use chrono::{DateTime, Utc};
use common::StoreId;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Default Admin API version used when a store does not pin one.
pub const DEFAULT_API_VERSION: &str = "2024-01";

/// Whether orders come from or go to a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreRole {
    Source,
    Destination,
}

impl StoreRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreRole::Source => "source",
            StoreRole::Destination => "destination",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "source" => Ok(StoreRole::Source),
            "destination" => Ok(StoreRole::Destination),
            other => Err(DomainError::UnknownValue {
                kind: "store role",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for StoreRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A store the engine talks to.
///
/// `platform` selects the connector implementation from the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    pub id: StoreId,
    pub name: String,
    pub platform: String,
    pub role: StoreRole,
    pub shop_url: String,
    #[serde(skip_serializing, default)]
    pub access_token: String,
    pub api_version: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Store {
    /// Creates an active store with the default API version.
    pub fn new(
        name: impl Into<String>,
        platform: impl Into<String>,
        role: StoreRole,
        shop_url: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            id: StoreId::new(),
            name: name.into(),
            platform: platform.into(),
            role,
            shop_url: shop_url.into(),
            access_token: access_token.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            active: true,
            created_at: Utc::now(),
        }
    }

    /// Shorthand for an active source store.
    pub fn source(name: impl Into<String>, platform: impl Into<String>) -> Self {
        let name = name.into();
        let url = format!("{}.example", name.to_lowercase().replace(' ', "-"));
        Self::new(name, platform, StoreRole::Source, url, "")
    }

    /// Shorthand for an active destination store.
    pub fn destination(name: impl Into<String>, platform: impl Into<String>) -> Self {
        let name = name.into();
        let url = format!("{}.example", name.to_lowercase().replace(' ', "-"));
        Self::new(name, platform, StoreRole::Destination, url, "")
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    pub fn is_source(&self) -> bool {
        self.role == StoreRole::Source
    }

    pub fn is_destination(&self) -> bool {
        self.role == StoreRole::Destination
    }
}
