//! AI-written sales summary for a targeted contact.

use std::sync::Arc;
use std::time::Duration;

use abm_llm::{GenerationError, GenerationOptions, GenerationService, Prompt};
use abm_shared::{EnrichedContact, OpenAiConfig};
use tracing::{info, instrument, warn};

pub const SYSTEM_PROMPT: &str = "You are a sales assistant helping craft B2B outreach.";

/// Settings for [`Summarizer`], derived once from [`OpenAiConfig`].
#[derive(Debug, Clone)]
pub struct SummaryConfig {
    pub options: GenerationOptions,
    /// Bound on each generation attempt.
    pub timeout: Duration,
    /// Retries after the first attempt. Only rate limits and timeouts are retried.
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl From<&OpenAiConfig> for SummaryConfig {
    fn from(config: &OpenAiConfig) -> Self {
        Self {
            options: GenerationOptions {
                model: config.model.clone(),
                temperature: config.temperature,
                max_tokens: config.max_tokens,
            },
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SummaryError {
    #[error("missing required fields for summary: {}", .missing.join(", "))]
    Validation { missing: Vec<&'static str> },
    #[error("summary generation was rate limited")]
    RateLimited,
    #[error("summary generation timed out")]
    Timeout,
    #[error("summary service error: {0}")]
    Service(String),
    #[error("unexpected summary error: {0}")]
    Unexpected(String),
}

impl From<GenerationError> for SummaryError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::RateLimited => Self::RateLimited,
            GenerationError::Timeout => Self::Timeout,
            GenerationError::Service(message) => Self::Service(message),
        }
    }
}

fn present(value: &str) -> bool {
    !value.trim().is_empty()
}

/// Names of the prompt fields that are absent or empty.
pub fn missing_fields(enriched: &EnrichedContact) -> Vec<&'static str> {
    let checks = [
        ("name", present(enriched.name())),
        ("title", enriched.title().is_some_and(present)),
        ("company", present(enriched.company())),
        ("employees", enriched.employees.is_some()),
        ("revenue", enriched.revenue.is_some()),
        ("summary", present(&enriched.summary)),
    ];
    checks
        .into_iter()
        .filter(|(_, ok)| !ok)
        .map(|(field, _)| field)
        .collect()
}

/// `1234567` → `"1,234,567"`.
fn with_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// User prompt for a validated contact.
fn build_prompt(enriched: &EnrichedContact) -> Prompt {
    let user = format!(
        "Generate a sales summary for {name} ({title}) at {company} with {employees} employees \
         and ${revenue} in revenue. Company Summary: {summary}",
        name = enriched.name().trim(),
        title = enriched.title().unwrap_or_default().trim(),
        company = enriched.company().trim(),
        employees = enriched.employees.unwrap_or_default(),
        revenue = with_thousands(enriched.revenue.unwrap_or_default()),
        summary = enriched.summary.trim(),
    );
    Prompt::new(SYSTEM_PROMPT, user)
}

/// Summarization adapter. Owns its timeout and retry budget.
pub struct Summarizer {
    service: Arc<dyn GenerationService>,
    config: SummaryConfig,
}

impl Summarizer {
    pub fn new(service: Arc<dyn GenerationService>, config: SummaryConfig) -> Self {
        Self { service, config }
    }

    #[instrument(skip_all, fields(email = %enriched.email(), model = %self.config.options.model))]
    pub async fn summarize(&self, enriched: &EnrichedContact) -> Result<String, SummaryError> {
        let missing = missing_fields(enriched);
        if !missing.is_empty() {
            warn!(?missing, "summary skipped: required fields missing");
            return Err(SummaryError::Validation { missing });
        }

        let prompt = build_prompt(enriched);
        let mut attempt = 0;
        loop {
            let outcome = match tokio::time::timeout(
                self.config.timeout,
                self.service.generate(&prompt, &self.config.options),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(GenerationError::Timeout),
            };

            match outcome {
                Ok(text) => {
                    let text = text.trim();
                    if text.is_empty() {
                        return Err(SummaryError::Unexpected("empty completion".into()));
                    }
                    info!(chars = text.len(), "summary generated");
                    return Ok(text.to_string());
                }
                Err(err @ (GenerationError::RateLimited | GenerationError::Timeout))
                    if attempt < self.config.max_retries =>
                {
                    let delay = self.config.retry_backoff.saturating_mul(2u32.saturating_pow(attempt));
                    warn!(error = %err, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "retrying summary");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
