//! Revenue-threshold targeting. Pure, no I/O.

use abm_shared::{Account, EnrichedContact, TargetingDecision};

/// Decide whether the enriched contact's company is a target account.
///
/// - no revenue → `Error` ("missing revenue data")
/// - revenue ≥ threshold → `Targeted` with an [`Account`] snapshot, downgraded
///   to `Error` when company or domain is empty
/// - otherwise → `Skipped` with the comparison in the reason
pub fn evaluate(enriched: &EnrichedContact, threshold: u64) -> TargetingDecision {
    let Some(revenue) = enriched.revenue else {
        return TargetingDecision::Error {
            reason: "missing revenue data".into(),
        };
    };

    if revenue < threshold {
        return TargetingDecision::Skipped {
            reason: format!("revenue {revenue} < threshold {threshold}"),
        };
    }

    let company = enriched.company().trim();
    let domain = enriched.domain().trim();
    if company.is_empty() || domain.is_empty() {
        return TargetingDecision::Error {
            reason: "account data is missing company or domain".into(),
        };
    }

    TargetingDecision::Targeted {
        reason: format!("revenue {revenue} >= threshold {threshold}"),
        account: Account {
            company: company.to_string(),
            domain: domain.to_string(),
            revenue,
            contact_name: enriched.name().trim().to_string(),
            contact_email: enriched.email().trim().to_string(),
            employees: enriched.employees,
            linkedin_company_page: enriched.linkedin_company_page.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use abm_shared::{Contact, TargetingStatus};

    const THRESHOLD: u64 = 3_000_000;

    fn enriched(revenue: Option<u64>) -> EnrichedContact {
        EnrichedContact {
            contact: Contact {
                name: "Jane Doe".into(),
                email: "jane@acme.com".into(),
                company: "Acme".into(),
                domain: "acme.com".into(),
                title: None,
                phone: None,
            },
            linkedin: None,
            linkedin_company_page: Some("https://linkedin.com/company/acme".into()),
            revenue,
            employees: Some(200),
            summary: "Acme makes things.".into(),
            sources: BTreeMap::new(),
        }
    }

    #[test]
    fn at_threshold_is_targeted() {
        let decision = evaluate(&enriched(Some(THRESHOLD)), THRESHOLD);
        assert_eq!(decision.status(), TargetingStatus::Targeted);

        let account = decision.account().unwrap();
        assert_eq!(account.domain, "acme.com");
        assert_eq!(account.revenue, THRESHOLD);
        assert_eq!(account.contact_email, "jane@acme.com");
        assert_eq!(account.employees, Some(200));
    }

    #[test]
    fn below_threshold_is_skipped_with_comparison() {
        let decision = evaluate(&enriched(Some(2_000_000)), THRESHOLD);
        assert_eq!(decision.status(), TargetingStatus::Skipped);
        assert!(decision.account().is_none());
        assert_eq!(decision.reason(), "revenue 2000000 < threshold 3000000");
    }

    #[test]
    fn missing_revenue_is_error() {
        let decision = evaluate(&enriched(None), THRESHOLD);
        assert_eq!(
            decision,
            TargetingDecision::Error {
                reason: "missing revenue data".into()
            }
        );
    }

    #[test]
    fn targeted_without_company_is_downgraded() {
        let mut e = enriched(Some(10_000_000));
        e.contact.company = " ".into();
        let decision = evaluate(&e, THRESHOLD);
        assert_eq!(decision.status(), TargetingStatus::Error);
        assert!(decision.account().is_none());
    }
}
