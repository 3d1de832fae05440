//! Adapter wiring: turns the loaded [`AppConfig`] into a ready [`Pipeline`].
//!
//! This is the only place API keys are read from the environment.

use std::sync::Arc;
use std::time::Duration;

use abm_core::crew::CrewRunner;
use abm_core::enrichment::{Enricher, FirmographicSource, FixedFirmographics, MockFirmographics};
use abm_core::pipeline::Pipeline;
use abm_core::summary::{Summarizer, SummaryConfig};
use abm_crm::{CrmBackend, CrmSync, HubSpotClient, InMemoryCrm};
use abm_llm::{GenerationService, OpenAiClient};
use abm_scraper::{CannedSummaries, DomainLookup, HttpSummaryLookup, LookupOptions};
use abm_shared::{AppConfig, Result, RetryPolicy, ScraperMode, resolve_api_key};
use tracing::info;

const OPENAI_KEY_MIN_LEN: usize = 30;
const HUBSPOT_KEY_MIN_LEN: usize = 20;

/// Mocked firmographics unless the caller overrides revenue or headcount.
/// A missing half of the override falls back to the mocked value.
pub(crate) fn firmographics(
    domain: &str,
    revenue: Option<u64>,
    employees: Option<u64>,
) -> Arc<dyn FirmographicSource> {
    if revenue.is_none() && employees.is_none() {
        return Arc::new(MockFirmographics);
    }
    let mocked = MockFirmographics.firmographics(domain);
    Arc::new(FixedFirmographics::new(
        revenue.or(mocked.revenue),
        employees.or(mocked.employees),
    ))
}

fn lookup(config: &AppConfig) -> Result<Arc<dyn DomainLookup>> {
    Ok(match config.scraper.mode {
        ScraperMode::Canned => Arc::new(CannedSummaries),
        ScraperMode::Http => Arc::new(HttpSummaryLookup::new(&LookupOptions {
            timeout_secs: config.scraper.timeout_secs,
            use_https: true,
        })?),
    })
}

pub(crate) fn enricher(
    config: &AppConfig,
    firmographics: Arc<dyn FirmographicSource>,
) -> Result<Enricher> {
    Ok(Enricher::new(
        lookup(config)?,
        firmographics,
        Duration::from_secs(config.scraper.timeout_secs),
    ))
}

fn crm_backend(config: &AppConfig, dry_run: bool) -> Result<Arc<dyn CrmBackend>> {
    if dry_run {
        info!("dry run: syncing into an in-memory CRM");
        return Ok(Arc::new(InMemoryCrm::new()));
    }
    let token = resolve_api_key(&config.hubspot.api_key_env, HUBSPOT_KEY_MIN_LEN)?;
    Ok(Arc::new(HubSpotClient::new(
        token,
        &config.hubspot.base_url,
        Duration::from_secs(config.hubspot.timeout_secs),
    )?))
}

fn generation_service(config: &AppConfig) -> Result<Arc<dyn GenerationService>> {
    let key = resolve_api_key(&config.openai.api_key_env, OPENAI_KEY_MIN_LEN)?;
    // Shared by summary and crew; the HTTP timeout is the longer of the two.
    let timeout = config.openai.timeout_secs.max(config.crew.timeout_secs);
    Ok(Arc::new(OpenAiClient::new(
        key,
        &config.openai.base_url,
        Duration::from_secs(timeout),
    )?))
}

/// API keys are checked here, at startup, before any contact is processed.
pub(crate) fn pipeline(
    config: &AppConfig,
    firmographics: Arc<dyn FirmographicSource>,
    dry_run: bool,
) -> Result<Pipeline> {
    let generation = generation_service(config)?;
    let crm = CrmSync::new(
        crm_backend(config, dry_run)?,
        RetryPolicy::from(&config.hubspot),
        Duration::from_secs(config.hubspot.timeout_secs),
    );

    Ok(Pipeline::new(
        enricher(config, firmographics)?,
        config.targeting.revenue_threshold,
        crm,
        Summarizer::new(generation.clone(), SummaryConfig::from(&config.openai)),
        CrewRunner::new(generation, config.crew.clone()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_override_uses_mocked_values() {
        let source = firmographics("acme.com", None, None);
        assert_eq!(
            source.firmographics("acme.com"),
            MockFirmographics.firmographics("acme.com")
        );
    }

    #[test]
    fn partial_override_keeps_mocked_half() {
        let mocked = MockFirmographics.firmographics("acme.com");
        let source = firmographics("acme.com", Some(9_000_000), None);
        let values = source.firmographics("acme.com");
        assert_eq!(values.revenue, Some(9_000_000));
        assert_eq!(values.employees, mocked.employees);
    }

    #[test]
    fn dry_run_needs_no_hubspot_key() {
        let config = AppConfig::default();
        assert!(crm_backend(&config, true).is_ok());
    }

    #[test]
    fn missing_openai_key_fails_before_any_run() {
        let mut config = AppConfig::default();
        config.openai.api_key_env = "ABM_UNSET_OPENAI_KEY_FOR_SETUP_TEST".into();
        let result = pipeline(&config, firmographics("acme.com", None, None), true);
        assert!(result.is_err());
    }
}
