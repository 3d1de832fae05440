//! CRM synchronisation for targeted contacts and accounts.
//!
//! This crate provides:
//! - [`CrmBackend`]: the remote CRM seam (find by natural key, create, update)
//! - [`HubSpotClient`]: HubSpot CRM v3 REST implementation
//! - [`InMemoryCrm`]: process-local backend for dry runs and tests
//! - [`CrmSync`]: idempotent upserts with bounded retry, reporting [`StageResult`]s
//!
//! [`StageResult`]: abm_shared::StageResult

pub mod hubspot;
pub mod memory;
pub mod sync;

use std::collections::BTreeMap;

use async_trait::async_trait;

pub use hubspot::HubSpotClient;
pub use memory::{InMemoryCrm, StoredRecord};
pub use sync::{CrmSync, company_properties, contact_properties};

/// Flat property bag sent to the CRM. Absent values are omitted, never null.
pub type Properties = BTreeMap<String, String>;

/// CRM object types the pipeline writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Contact,
    Company,
}

impl EntityKind {
    /// Object type segment in CRM v3 URLs.
    pub fn object_type(&self) -> &'static str {
        match self {
            Self::Contact => "contacts",
            Self::Company => "companies",
        }
    }

    /// Property holding the natural key.
    pub fn key_property(&self) -> &'static str {
        match self {
            Self::Contact => "email",
            Self::Company => "domain",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Contact => f.write_str("contact"),
            Self::Company => f.write_str("company"),
        }
    }
}

/// A remote CRM object reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrmEntity {
    pub id: String,
}

/// Failures raised by a [`CrmBackend`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CrmError {
    #[error("rate limited")]
    RateLimited,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("remote error {code}: {message}")]
    Remote { code: u16, message: String },
}

impl CrmError {
    /// Rate limits and transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Transport(_))
    }
}

/// Remote CRM collaborator.
#[async_trait]
pub trait CrmBackend: Send + Sync {
    /// Look up an object by its natural key (email or domain).
    async fn find_by_key(&self, kind: EntityKind, key: &str)
    -> Result<Option<CrmEntity>, CrmError>;

    async fn create(&self, kind: EntityKind, properties: &Properties)
    -> Result<CrmEntity, CrmError>;

    async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        properties: &Properties,
    ) -> Result<(), CrmError>;
}
