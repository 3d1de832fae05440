//! Core domain types for ABM contact processing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Contact
// ---------------------------------------------------------------------------

/// A raw contact as submitted by the caller. `email` is the natural key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

// ---------------------------------------------------------------------------
// EnrichedContact
// ---------------------------------------------------------------------------

/// A contact augmented with firmographic data and a provenance map.
///
/// Every derived field that is present has an entry in `sources` keyed by the
/// field's serialized name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedContact {
    #[serde(flatten)]
    pub contact: Contact,
    #[serde(default)]
    pub linkedin: Option<String>,
    #[serde(default)]
    pub linkedin_company_page: Option<String>,
    #[serde(default)]
    pub revenue: Option<u64>,
    #[serde(default)]
    pub employees: Option<u64>,
    pub summary: String,
    #[serde(default)]
    pub sources: BTreeMap<String, String>,
}

impl EnrichedContact {
    pub fn name(&self) -> &str {
        &self.contact.name
    }

    pub fn email(&self) -> &str {
        &self.contact.email
    }

    pub fn company(&self) -> &str {
        &self.contact.company
    }

    pub fn domain(&self) -> &str {
        &self.contact.domain
    }

    pub fn title(&self) -> Option<&str> {
        self.contact.title.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// A target-account snapshot derived from an enriched contact. `domain` is the natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub company: String,
    pub domain: String,
    pub revenue: u64,
    pub contact_name: String,
    pub contact_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employees: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin_company_page: Option<String>,
}

// ---------------------------------------------------------------------------
// TargetingDecision
// ---------------------------------------------------------------------------

/// Outcome category of a targeting evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetingStatus {
    Targeted,
    Skipped,
    Error,
}

impl TargetingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Targeted => "targeted",
            Self::Skipped => "skipped",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for TargetingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of evaluating an enriched contact against the revenue threshold.
///
/// An [`Account`] exists only on the `Targeted` variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetingDecision {
    Targeted { reason: String, account: Account },
    Skipped { reason: String },
    Error { reason: String },
}

impl TargetingDecision {
    pub fn status(&self) -> TargetingStatus {
        match self {
            Self::Targeted { .. } => TargetingStatus::Targeted,
            Self::Skipped { .. } => TargetingStatus::Skipped,
            Self::Error { .. } => TargetingStatus::Error,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Targeted { reason, .. } | Self::Skipped { reason } | Self::Error { reason } => {
                reason
            }
        }
    }

    pub fn account(&self) -> Option<&Account> {
        match self {
            Self::Targeted { account, .. } => Some(account),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// StageResult
// ---------------------------------------------------------------------------

/// What a CRM upsert did to the remote entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Created,
    Updated,
}

/// Outcome of one CRM sync sub-operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageResult {
    Success {
        action: SyncAction,
        /// Remote object id.
        id: String,
        /// Natural key the entity was matched on (email or domain).
        key: String,
    },
    Error {
        message: String,
    },
}

impl StageResult {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The failure message, if this is an error.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Error { message } => Some(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enriched() -> EnrichedContact {
        EnrichedContact {
            contact: Contact {
                name: "Jane Doe".into(),
                email: "jane@acme.com".into(),
                company: "Acme".into(),
                domain: "acme.com".into(),
                title: None,
                phone: None,
            },
            linkedin: Some("https://linkedin.com/in/janedoe".into()),
            linkedin_company_page: None,
            revenue: Some(5_000_000),
            employees: Some(200),
            summary: "Acme makes things.".into(),
            sources: BTreeMap::from([("revenue".to_string(), "Mocked".to_string())]),
        }
    }

    #[test]
    fn enriched_contact_flattens_contact_fields() {
        let json = serde_json::to_value(enriched()).expect("serialize");
        assert_eq!(json["email"], "jane@acme.com");
        assert_eq!(json["revenue"], 5_000_000);
        assert!(json.get("contact").is_none());
        assert!(json.get("title").is_none());
        assert!(json["linkedin_company_page"].is_null());
    }

    #[test]
    fn partial_contact_deserializes_with_defaults() {
        let contact: Contact = serde_json::from_str(r#"{"domain":"acme.com"}"#).expect("parse");
        assert_eq!(contact.domain, "acme.com");
        assert!(contact.name.is_empty());
        assert!(contact.title.is_none());
    }

    #[test]
    fn targeting_decision_is_tagged_by_status() {
        let decision = TargetingDecision::Skipped {
            reason: "revenue 2000000 < threshold 3000000".into(),
        };
        let json = serde_json::to_string(&decision).expect("serialize");
        assert!(json.contains(r#""status":"skipped""#));
        assert_eq!(decision.status(), TargetingStatus::Skipped);
        assert!(decision.account().is_none());
    }

    #[test]
    fn stage_result_shapes() {
        let ok = StageResult::Success {
            action: SyncAction::Created,
            id: "123".into(),
            key: "jane@acme.com".into(),
        };
        let json = serde_json::to_value(&ok).expect("serialize");
        assert_eq!(json["status"], "success");
        assert_eq!(json["action"], "created");
        assert!(ok.is_success());

        let err = StageResult::error("Contact email missing");
        let json = serde_json::to_value(&err).expect("serialize");
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "Contact email missing");
    }
}
