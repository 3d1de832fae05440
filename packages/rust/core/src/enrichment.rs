//! Contact enrichment: social identifiers, firmographics and a company summary.
//!
//! Enrichment requires a non-empty domain and fails with a validation error
//! otherwise. The domain lookup fails soft: any lookup error (or a lookup that
//! outlives its timeout) is replaced by [`SUMMARY_UNAVAILABLE`]. Every derived
//! field that is present gets a provenance entry in `sources` under the same
//! name as the field.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use abm_scraper::DomainLookup;
use abm_shared::{AbmError, Contact, EnrichedContact, Result};
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

/// Summary used when the domain lookup fails.
pub const SUMMARY_UNAVAILABLE: &str = "Company summary unavailable.";

/// Candidate annual revenues for mocked firmographics.
pub const REVENUE_CANDIDATES: [u64; 3] = [2_000_000, 5_000_000, 10_000_000];

/// Candidate headcounts for mocked firmographics.
pub const EMPLOYEE_CANDIDATES: [u64; 3] = [50, 200, 500];

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));

// ---------------------------------------------------------------------------
// Firmographics
// ---------------------------------------------------------------------------

/// Revenue and headcount for one company.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Firmographics {
    pub revenue: Option<u64>,
    pub employees: Option<u64>,
}

/// Source of firmographic numbers for a domain.
pub trait FirmographicSource: Send + Sync {
    fn firmographics(&self, domain: &str) -> Firmographics;

    /// Provenance recorded for every value this source supplies.
    fn provenance(&self) -> String;
}

/// Picks from the fixed candidate sets by hashing the domain, so the same
/// domain always gets the same numbers.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockFirmographics;

impl FirmographicSource for MockFirmographics {
    fn firmographics(&self, domain: &str) -> Firmographics {
        let digest = Sha256::digest(domain.trim().to_lowercase().as_bytes());
        let revenue = REVENUE_CANDIDATES[digest[0] as usize % REVENUE_CANDIDATES.len()];
        let employees = EMPLOYEE_CANDIDATES[digest[1] as usize % EMPLOYEE_CANDIDATES.len()];
        Firmographics {
            revenue: Some(revenue),
            employees: Some(employees),
        }
    }

    fn provenance(&self) -> String {
        "Mocked (e.g., from Clearbit)".into()
    }
}

/// Caller-supplied firmographics, the same for every domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixedFirmographics(pub Firmographics);

impl FixedFirmographics {
    pub fn new(revenue: Option<u64>, employees: Option<u64>) -> Self {
        Self(Firmographics { revenue, employees })
    }
}

impl FirmographicSource for FixedFirmographics {
    fn firmographics(&self, _domain: &str) -> Firmographics {
        self.0
    }

    fn provenance(&self) -> String {
        "Provided override".into()
    }
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// `https://linkedin.com/in/{name}` with the name lowercased and reduced to
/// ASCII letters and digits.
pub fn linkedin_profile_url(name: &str) -> Option<String> {
    let handle = NON_ALNUM.replace_all(&name.to_lowercase(), "").into_owned();
    (!handle.is_empty()).then(|| format!("https://linkedin.com/in/{handle}"))
}

/// `https://linkedin.com/company/{slug}` with the company name slugified.
pub fn linkedin_company_url(company: &str) -> Option<String> {
    let lowered = company.to_lowercase();
    let slug = NON_ALNUM.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    (!slug.is_empty()).then(|| format!("https://linkedin.com/company/{slug}"))
}

/// Trimmed, lowercased domain and trimmed email: the natural keys every later
/// stage matches on.
fn normalize(contact: &Contact) -> Contact {
    Contact {
        email: contact.email.trim().to_string(),
        domain: contact.domain.trim().to_lowercase(),
        ..contact.clone()
    }
}

// ---------------------------------------------------------------------------
// Enricher
// ---------------------------------------------------------------------------

/// Enrichment adapter over a domain lookup and a firmographic source.
pub struct Enricher {
    lookup: Arc<dyn DomainLookup>,
    firmographics: Arc<dyn FirmographicSource>,
    lookup_timeout: Duration,
}

impl Enricher {
    pub fn new(
        lookup: Arc<dyn DomainLookup>,
        firmographics: Arc<dyn FirmographicSource>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            lookup,
            firmographics,
            lookup_timeout,
        }
    }

    #[instrument(skip_all, fields(email = %contact.email, domain = %contact.domain))]
    pub async fn enrich(&self, contact: &Contact) -> Result<EnrichedContact> {
        let contact = normalize(contact);
        let domain = contact.domain.as_str();
        if domain.is_empty() {
            return Err(AbmError::validation("contact domain is required"));
        }

        let mut sources = BTreeMap::new();

        let linkedin = linkedin_profile_url(&contact.name);
        if linkedin.is_some() {
            sources.insert(
                "linkedin".to_string(),
                "Generated from name via LinkedIn format".to_string(),
            );
        }

        let linkedin_company_page = linkedin_company_url(&contact.company);
        if linkedin_company_page.is_some() {
            sources.insert(
                "linkedin_company_page".to_string(),
                "Generated from company name via LinkedIn format".to_string(),
            );
        }

        let summary = match tokio::time::timeout(self.lookup_timeout, self.lookup.lookup(domain)).await {
            Ok(Ok(summary)) if !summary.trim().is_empty() => {
                sources.insert("summary".to_string(), self.lookup.provenance(domain));
                summary
            }
            Ok(Ok(_)) => {
                warn!(domain, "domain lookup returned an empty summary");
                sources.insert("summary".to_string(), format!("Placeholder (no summary for {domain})"));
                SUMMARY_UNAVAILABLE.to_string()
            }
            Ok(Err(e)) => {
                warn!(domain, error = %e, "domain lookup failed, using placeholder");
                sources.insert("summary".to_string(), format!("Placeholder (lookup for {domain} failed)"));
                SUMMARY_UNAVAILABLE.to_string()
            }
            Err(_) => {
                warn!(
                    domain,
                    timeout_ms = self.lookup_timeout.as_millis() as u64,
                    "domain lookup timed out, using placeholder"
                );
                sources.insert("summary".to_string(), format!("Placeholder (lookup for {domain} timed out)"));
                SUMMARY_UNAVAILABLE.to_string()
            }
        };

        let firmographics = self.firmographics.firmographics(domain);
        let provenance = self.firmographics.provenance();
        if firmographics.revenue.is_some() {
            sources.insert("revenue".to_string(), provenance.clone());
        }
        if firmographics.employees.is_some() {
            sources.insert("employees".to_string(), provenance);
        }

        debug!(?firmographics, fields = sources.len(), "enrichment sources recorded");
        info!(domain, "contact enriched");

        Ok(EnrichedContact {
            contact,
            linkedin,
            linkedin_company_page,
            revenue: firmographics.revenue,
            employees: firmographics.employees,
            summary,
            sources,
        })
    }
}
