//! Idempotent contact/company upserts with bounded retry.
//!
//! Each upsert looks the entity up by natural key, updates on a hit and
//! creates on a miss. Rate limits and transport failures (per-call timeouts
//! included) are retried with exponential backoff up to the policy's attempt
//! budget; any other remote error ends the upsert immediately. The outcome is
//! always a [`StageResult`], never an error.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use abm_shared::{Account, EnrichedContact, RetryPolicy, StageResult, SyncAction};
use tracing::{error, info, instrument, warn};

use crate::{CrmBackend, CrmError, EntityKind, Properties};

/// Upsert adapter over a [`CrmBackend`].
pub struct CrmSync {
    backend: Arc<dyn CrmBackend>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl CrmSync {
    pub fn new(backend: Arc<dyn CrmBackend>, retry: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            backend,
            retry,
            call_timeout,
        }
    }

    /// Create or update the contact keyed by email.
    #[instrument(skip_all, fields(email = %contact.email()))]
    pub async fn upsert_contact(&self, contact: &EnrichedContact) -> StageResult {
        let email = contact.email().trim();
        if email.is_empty() {
            error!("cannot sync contact: email is missing");
            return StageResult::error("Contact email missing");
        }
        let properties = contact_properties(contact);
        self.upsert(EntityKind::Contact, email, &properties).await
    }

    /// Create or update the company keyed by domain.
    #[instrument(skip_all, fields(domain = %account.domain))]
    pub async fn upsert_account(&self, account: &Account) -> StageResult {
        let domain = account.domain.trim();
        if domain.is_empty() {
            error!("cannot sync company: domain is missing");
            return StageResult::error("Company domain missing");
        }
        let properties = company_properties(account);
        self.upsert(EntityKind::Company, domain, &properties).await
    }

    async fn upsert(&self, kind: EntityKind, key: &str, properties: &Properties) -> StageResult {
        let max_attempts = self.retry.max_attempts();

        for attempt in 0..max_attempts {
            match self.try_upsert(kind, key, properties).await {
                Ok((action, id)) => {
                    info!(%kind, key, ?action, id = %id, "CRM upsert succeeded");
                    return StageResult::Success {
                        action,
                        id,
                        key: key.to_string(),
                    };
                }
                Err(err) if err.is_retryable() => {
                    if attempt + 1 < max_attempts {
                        let delay = self.retry.delay_for(attempt);
                        warn!(
                            %kind,
                            key,
                            error = %err,
                            attempt = attempt + 1,
                            max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            "CRM call failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        warn!(%kind, key, error = %err, attempt = attempt + 1, "CRM call failed on final attempt");
                    }
                }
                Err(err) => {
                    error!(%kind, key, error = %err, "CRM upsert failed");
                    return StageResult::error(format!("API error during {kind} operation: {err}"));
                }
            }
        }

        error!(%kind, key, max_attempts, "max retries reached for CRM upsert");
        StageResult::error(format!("Max retries reached for {kind} operation"))
    }

    async fn try_upsert(
        &self,
        kind: EntityKind,
        key: &str,
        properties: &Properties,
    ) -> Result<(SyncAction, String), CrmError> {
        match self.bounded(self.backend.find_by_key(kind, key)).await? {
            Some(existing) => {
                self.bounded(self.backend.update(kind, &existing.id, properties))
                    .await?;
                Ok((SyncAction::Updated, existing.id))
            }
            None => {
                let created = self.bounded(self.backend.create(kind, properties)).await?;
                Ok((SyncAction::Created, created.id))
            }
        }
    }

    /// Bound one backend call by the per-call timeout.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, CrmError>>,
    ) -> Result<T, CrmError> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CrmError::Transport(format!(
                "call timed out after {}ms",
                self.call_timeout.as_millis()
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Property mapping
// ---------------------------------------------------------------------------

fn insert_non_empty(props: &mut Properties, key: &str, value: Option<&str>) {
    if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
        props.insert(key.to_string(), v.to_string());
    }
}

/// CRM contact properties for an enriched contact.
pub fn contact_properties(contact: &EnrichedContact) -> Properties {
    let mut props = Properties::new();
    let name = contact.name().trim();
    let mut parts = name.split_whitespace();
    let first = parts.next();
    let last = if name.contains(' ') {
        name.split_whitespace().last()
    } else {
        None
    };
    let website = (!contact.domain().trim().is_empty())
        .then(|| format!("https://{}", contact.domain().trim()));

    insert_non_empty(&mut props, "email", Some(contact.email()));
    insert_non_empty(&mut props, "firstname", first);
    insert_non_empty(&mut props, "lastname", last);
    insert_non_empty(&mut props, "phone", contact.contact.phone.as_deref());
    insert_non_empty(&mut props, "jobtitle", contact.title());
    insert_non_empty(&mut props, "company", Some(contact.company()));
    insert_non_empty(&mut props, "website", website.as_deref());
    insert_non_empty(&mut props, "hs_linkedin_url", contact.linkedin.as_deref());
    props
}

/// CRM company properties for a target account.
pub fn company_properties(account: &Account) -> Properties {
    let mut props = Properties::new();
    let domain = account.domain.trim();
    let revenue = account.revenue.to_string();
    let employees = account.employees.map(|e| e.to_string());
    let website = format!("https://{domain}");

    insert_non_empty(&mut props, "name", Some(&account.company));
    insert_non_empty(&mut props, "domain", Some(domain));
    insert_non_empty(&mut props, "annualrevenue", Some(&revenue));
    insert_non_empty(&mut props, "numberofemployees", employees.as_deref());
    insert_non_empty(&mut props, "website", Some(&website));
    insert_non_empty(
        &mut props,
        "linkedin_company_page",
        account.linkedin_company_page.as_deref(),
    );
    props
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::{CrmEntity, InMemoryCrm};
    use abm_shared::Contact;
    use async_trait::async_trait;

    fn enriched(email: &str) -> EnrichedContact {
        EnrichedContact {
            contact: Contact {
                name: "Jane Doe".into(),
                email: email.into(),
                company: "Acme".into(),
                domain: "acme.com".into(),
                title: Some("VP Marketing".into()),
                phone: None,
            },
            linkedin: Some("https://linkedin.com/in/janedoe".into()),
            linkedin_company_page: Some("https://linkedin.com/company/acme".into()),
            revenue: Some(5_000_000),
            employees: Some(200),
            summary: "Acme is a company.".into(),
            sources: BTreeMap::new(),
        }
    }

    fn account() -> Account {
        Account {
            company: "Acme".into(),
            domain: "acme.com".into(),
            revenue: 5_000_000,
            contact_name: "Jane Doe".into(),
            contact_email: "jane@acme.com".into(),
            employees: Some(200),
            linkedin_company_page: None,
        }
    }

    fn sync(crm: Arc<InMemoryCrm>, max_attempts: u32) -> CrmSync {
        CrmSync::new(
            crm,
            RetryPolicy::new(max_attempts, Duration::from_millis(1)),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn contact_property_mapping() {
        let props = contact_properties(&enriched("jane@acme.com"));
        assert_eq!(props["email"], "jane@acme.com");
        assert_eq!(props["firstname"], "Jane");
        assert_eq!(props["lastname"], "Doe");
        assert_eq!(props["jobtitle"], "VP Marketing");
        assert_eq!(props["website"], "https://acme.com");
        assert_eq!(props["hs_linkedin_url"], "https://linkedin.com/in/janedoe");
        assert!(!props.contains_key("phone"));
    }

    #[test]
    fn single_token_name_has_no_lastname() {
        let mut contact = enriched("cher@acme.com");
        contact.contact.name = "Cher".into();
        let props = contact_properties(&contact);
        assert_eq!(props["firstname"], "Cher");
        assert!(!props.contains_key("lastname"));
    }

    #[test]
    fn company_property_mapping() {
        let props = company_properties(&account());
        assert_eq!(props["name"], "Acme");
        assert_eq!(props["annualrevenue"], "5000000");
        assert_eq!(props["numberofemployees"], "200");
        assert_eq!(props["website"], "https://acme.com");
        assert!(!props.contains_key("linkedin_company_page"));
    }

    #[tokio::test]
    async fn creates_on_miss_updates_on_hit() {
        let crm = Arc::new(InMemoryCrm::new());
        let sync = sync(crm.clone(), 3);

        let first = sync.upsert_contact(&enriched("jane@acme.com")).await;
        let StageResult::Success { action, id, key } = first else {
            panic!("expected success, got {first:?}");
        };
        assert_eq!(action, SyncAction::Created);
        assert_eq!(key, "jane@acme.com");

        let second = sync.upsert_contact(&enriched("jane@acme.com")).await;
        assert_eq!(
            second,
            StageResult::Success {
                action: SyncAction::Updated,
                id,
                key: "jane@acme.com".into(),
            }
        );
        assert_eq!(crm.len(), 1);
    }

    #[tokio::test]
    async fn account_upsert_keys_on_domain() {
        let crm = Arc::new(InMemoryCrm::new());
        let result = sync(crm.clone(), 3).upsert_account(&account()).await;
        assert!(result.is_success());
        assert!(crm.get(EntityKind::Company, "acme.com").is_some());
    }

    #[tokio::test]
    async fn missing_keys_short_circuit_without_calls() {
        let crm = Arc::new(InMemoryCrm::new());
        let sync = sync(crm.clone(), 3);

        let result = sync.upsert_contact(&enriched("  ")).await;
        assert_eq!(result, StageResult::error("Contact email missing"));

        let mut acct = account();
        acct.domain = String::new();
        let result = sync.upsert_account(&acct).await;
        assert_eq!(result, StageResult::error("Company domain missing"));

        assert_eq!(crm.calls(), 0);
    }

    #[tokio::test]
    async fn repeated_rate_limits_exhaust_attempts() {
        let crm = Arc::new(InMemoryCrm::new());
        for _ in 0..10 {
            crm.push_failure(CrmError::RateLimited);
        }

        let result = sync(crm.clone(), 3).upsert_contact(&enriched("jane@acme.com")).await;
        assert_eq!(
            result,
            StageResult::error("Max retries reached for contact operation")
        );
        assert_eq!(crm.calls(), 3);
    }

    #[tokio::test]
    async fn remote_error_is_not_retried() {
        let crm = Arc::new(InMemoryCrm::new());
        crm.push_failure(CrmError::Remote {
            code: 401,
            message: "authentication credentials not found".into(),
        });

        let result = sync(crm.clone(), 3).upsert_account(&account()).await;
        match result {
            StageResult::Error { message } => assert!(message.contains("401")),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(crm.calls(), 1);
    }

    #[tokio::test]
    async fn transport_error_then_success() {
        let crm = Arc::new(InMemoryCrm::new());
        crm.push_failure(CrmError::Transport("connection reset".into()));

        let result = sync(crm.clone(), 3).upsert_contact(&enriched("jane@acme.com")).await;
        assert!(result.is_success());
        // failed find, then find + create
        assert_eq!(crm.calls(), 3);
    }

    /// Backend whose calls never complete.
    struct StalledCrm;

    #[async_trait]
    impl CrmBackend for StalledCrm {
        async fn find_by_key(&self, _: EntityKind, _: &str) -> Result<Option<CrmEntity>, CrmError> {
            std::future::pending().await
        }
        async fn create(&self, _: EntityKind, _: &Properties) -> Result<CrmEntity, CrmError> {
            std::future::pending().await
        }
        async fn update(&self, _: EntityKind, _: &str, _: &Properties) -> Result<(), CrmError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn stalled_calls_are_bounded_by_timeout() {
        let sync = CrmSync::new(
            Arc::new(StalledCrm),
            RetryPolicy::new(2, Duration::from_millis(1)),
            Duration::from_millis(20),
        );
        let result = sync.upsert_account(&account()).await;
        assert_eq!(
            result,
            StageResult::error("Max retries reached for company operation")
        );
    }

    #[tokio::test]
    async fn zero_attempt_policy_still_calls_once() {
        let crm = Arc::new(InMemoryCrm::new());
        let result = sync(crm.clone(), 0).upsert_contact(&enriched("jane@acme.com")).await;
        assert!(result.is_success());
        assert_eq!(crm.calls(), 2);
    }
}
