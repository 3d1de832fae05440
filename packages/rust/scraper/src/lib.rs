//! Company-summary lookup by domain.
//!
//! The enrichment step asks a [`DomainLookup`] for a one-paragraph description
//! of a company given its web domain. Two implementations ship here:
//! - [`CannedSummaries`]: fixed text for a few well-known domains, templated otherwise
//! - [`HttpSummaryLookup`]: fetches the homepage and reads its meta description
//!
//! Lookups may fail; callers decide how to degrade.

use std::time::Duration;

use abm_shared::{AbmError, Result};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

/// Maximum number of redirects to follow when fetching a homepage.
const MAX_REDIRECTS: usize = 5;

/// Default timeout in seconds for fetching a homepage.
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Maximum response size we consider valid (5 MB).
const MAX_RESPONSE_SIZE: u64 = 5 * 1024 * 1024;

/// User-Agent string for homepage requests.
const USER_AGENT: &str = concat!("abm-pipeline/", env!("CARGO_PKG_VERSION"));

/// Source of a short company summary for a domain.
#[async_trait]
pub trait DomainLookup: Send + Sync {
    /// Describe the company behind `domain`.
    async fn lookup(&self, domain: &str) -> Result<String>;

    /// Human-readable provenance for successful lookups.
    fn provenance(&self, domain: &str) -> String {
        format!("Scraped from {domain}")
    }
}

// ---------------------------------------------------------------------------
// Canned summaries
// ---------------------------------------------------------------------------

const KNOWN_SUMMARIES: &[(&str, &str)] = &[
    (
        "acme.com",
        "Acme Corp is a leader in marketing automation, helping clients scale with data-driven insights.",
    ),
    (
        "example.com",
        "Example Inc. provides innovative cloud solutions for small businesses.",
    ),
    (
        "hubspot.com",
        "HubSpot offers a powerful CRM platform for scaling marketing and sales operations.",
    ),
];

/// Offline lookup: built-in text for known domains, a generic B2B blurb otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct CannedSummaries;

#[async_trait]
impl DomainLookup for CannedSummaries {
    async fn lookup(&self, domain: &str) -> Result<String> {
        let domain = domain.trim().to_lowercase();
        let summary = KNOWN_SUMMARIES
            .iter()
            .find(|(known, _)| *known == domain)
            .map(|(_, summary)| (*summary).to_string())
            .unwrap_or_else(|| {
                format!("{domain} is a B2B SaaS company specializing in growth enablement.")
            });
        Ok(summary)
    }

    fn provenance(&self, domain: &str) -> String {
        format!("Scraped from {domain} (canned)")
    }
}

// ---------------------------------------------------------------------------
// HTTP homepage lookup
// ---------------------------------------------------------------------------

/// Options for [`HttpSummaryLookup`].
#[derive(Debug, Clone)]
pub struct LookupOptions {
    /// Timeout for HTTP requests in seconds.
    pub timeout_secs: u64,
    /// Fetch over HTTPS (plain HTTP is only useful against local servers).
    pub use_https: bool,
}

impl Default for LookupOptions {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            use_https: true,
        }
    }
}

/// Fetches `https://{domain}/` and extracts its description.
pub struct HttpSummaryLookup {
    client: Client,
    use_https: bool,
}

impl HttpSummaryLookup {
    pub fn new(opts: &LookupOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(opts.timeout_secs))
            .build()
            .map_err(|e| AbmError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            use_https: opts.use_https,
        })
    }

    fn homepage_url(&self, domain: &str) -> Result<Url> {
        let scheme = if self.use_https { "https" } else { "http" };
        let raw = format!("{scheme}://{}/", domain.trim().trim_end_matches('/'));
        Url::parse(&raw).map_err(|e| AbmError::validation(format!("invalid domain '{domain}': {e}")))
    }
}

#[async_trait]
impl DomainLookup for HttpSummaryLookup {
    #[instrument(skip(self))]
    async fn lookup(&self, domain: &str) -> Result<String> {
        let url = self.homepage_url(domain)?;

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| AbmError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AbmError::Network(format!("{url}: HTTP {status}")));
        }

        if let Some(len) = response.content_length() {
            if len > MAX_RESPONSE_SIZE {
                return Err(AbmError::validation(format!(
                    "{url}: response too large ({len} bytes, max {MAX_RESPONSE_SIZE})"
                )));
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| AbmError::Network(format!("{url}: failed to read body: {e}")))?;

        let summary = extract_description(&body)?;
        debug!(%url, chars = summary.len(), "homepage description extracted");
        Ok(summary)
    }

    fn provenance(&self, domain: &str) -> String {
        format!("Scraped from https://{domain}/ (meta description)")
    }
}

/// Pull a description out of homepage HTML: `<meta name="description">`,
/// then `og:description`, then `<title>`.
fn extract_description(html: &str) -> Result<String> {
    let doc = Html::parse_document(html);

    for css in [
        r#"meta[name="description"]"#,
        r#"meta[property="og:description"]"#,
    ] {
        let selector = Selector::parse(css).map_err(|e| AbmError::parse(format!("{css}: {e}")))?;
        let content = doc
            .select(&selector)
            .filter_map(|el| el.value().attr("content"))
            .map(collapse_whitespace)
            .find(|s| !s.is_empty());
        if let Some(content) = content {
            return Ok(content);
        }
    }

    let title_sel = Selector::parse("title").map_err(|e| AbmError::parse(format!("title: {e}")))?;
    doc.select(&title_sel)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AbmError::parse("homepage has no description or title"))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn canned_known_domains() {
        let lookup = CannedSummaries;
        assert!(lookup.lookup("acme.com").await.unwrap().contains("Acme Corp"));
        assert!(lookup.lookup("example.com").await.unwrap().contains("cloud solutions"));
        assert!(lookup.lookup("HubSpot.com").await.unwrap().contains("CRM platform"));
    }

    #[tokio::test]
    async fn canned_unknown_domain() {
        let result = CannedSummaries.lookup("unknowncompany.com").await.unwrap();
        assert!(result.contains("unknowncompany.com"));
        assert!(result.contains("B2B SaaS company"));
    }

    #[test]
    fn extract_prefers_meta_description() {
        let html = r#"<html><head><title>Acme</title>
            <meta name="description" content="  Acme builds
              rockets.  "></head><body></body></html>"#;
        assert_eq!(extract_description(html).unwrap(), "Acme builds rockets.");
    }

    #[test]
    fn extract_falls_back_to_og_then_title() {
        let og = r#"<html><head><meta property="og:description" content="OG text"></head></html>"#;
        assert_eq!(extract_description(og).unwrap(), "OG text");

        let title = r#"<html><head><title> Acme | Home </title></head></html>"#;
        assert_eq!(extract_description(title).unwrap(), "Acme | Home");
    }

    #[test]
    fn extract_fails_on_bare_page() {
        assert!(extract_description("<html><body><p>hi</p></body></html>").is_err());
    }

    fn local_lookup() -> HttpSummaryLookup {
        HttpSummaryLookup::new(&LookupOptions {
            timeout_secs: 2,
            use_https: false,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn http_lookup_with_mock_server() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(
                r#"<html><head><meta name="description" content="Widgets for everyone."></head></html>"#,
            ))
            .mount(&server)
            .await;

        let host = server.address().to_string();
        let summary = local_lookup().lookup(&host).await.unwrap();
        assert_eq!(summary, "Widgets for everyone.");
    }

    #[tokio::test]
    async fn http_lookup_error_status() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let host = server.address().to_string();
        let err = local_lookup().lookup(&host).await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
