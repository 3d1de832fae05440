//! The per-run result record and the builder that produces it.
//!
//! A [`PipelineResult`] can only be produced by walking a [`RunBuilder`]
//! through its states, each transition consuming the previous one:
//!
//! ```text
//! RunBuilder<Started> ──enriched()──▶ RunBuilder<Enriched> ──evaluated()──▶ Evaluated
//!        │                                                                  ├─ Targeted(RunBuilder<Targeted>) ──finish()──▶ PipelineResult
//!        └─enrichment_failed()──▶ PipelineResult                            └─ Finished(PipelineResult)
//! ```
//!
//! Fields recorded by an earlier state are carried forward untouched, and the
//! finished record has no setters, so nothing recorded can be erased later.

use abm_shared::{
    Account, Contact, EnrichedContact, Result, StageResult, TargetingDecision, TargetingStatus,
};
use abm_storage::RunRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crew::{AgentError, CrewOutputs};
use crate::summary::SummaryError;

/// Terminal (or initial) status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Started,
    Failed,
    Skipped,
    Error,
    Targeted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Error => "error",
            Self::Targeted => "targeted",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one pipeline run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    run_id: String,
    status: RunStatus,
    reason: Option<String>,
    enriched_contact: Option<EnrichedContact>,
    targeting_status: Option<TargetingStatus>,
    targeting_reason: Option<String>,
    account_data: Option<Account>,
    hubspot_contact_result: Option<StageResult>,
    hubspot_company_result: Option<StageResult>,
    summary: Option<String>,
    summary_error: Option<String>,
    crew_outputs: Option<CrewOutputs>,
    crew_error: Option<String>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

impl PipelineResult {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn enriched_contact(&self) -> Option<&EnrichedContact> {
        self.enriched_contact.as_ref()
    }

    pub fn targeting_status(&self) -> Option<TargetingStatus> {
        self.targeting_status
    }

    pub fn targeting_reason(&self) -> Option<&str> {
        self.targeting_reason.as_deref()
    }

    pub fn account_data(&self) -> Option<&Account> {
        self.account_data.as_ref()
    }

    pub fn hubspot_contact_result(&self) -> Option<&StageResult> {
        self.hubspot_contact_result.as_ref()
    }

    pub fn hubspot_company_result(&self) -> Option<&StageResult> {
        self.hubspot_company_result.as_ref()
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn summary_error(&self) -> Option<&str> {
        self.summary_error.as_deref()
    }

    pub fn crew_outputs(&self) -> Option<&CrewOutputs> {
        self.crew_outputs.as_ref()
    }

    pub fn crew_error(&self) -> Option<&str> {
        self.crew_error.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    /// Row for the run-history store.
    pub fn to_run_record(&self, contact: &Contact) -> Result<RunRecord> {
        let result_json = serde_json::to_string(self)
            .map_err(|e| abm_shared::AbmError::parse(format!("failed to serialize run: {e}")))?;
        Ok(RunRecord {
            run_id: self.run_id.clone(),
            email: contact.email.clone(),
            company: contact.company.clone(),
            status: self.status.as_str().to_string(),
            reason: self.reason.clone().or_else(|| self.targeting_reason.clone()),
            started_at: self.started_at,
            finished_at: self.finished_at,
            result_json,
        })
    }
}

// ---------------------------------------------------------------------------
// Builder states
// ---------------------------------------------------------------------------

/// Nothing recorded yet.
#[derive(Debug)]
pub struct Started;

/// Enrichment succeeded.
#[derive(Debug)]
pub struct Enriched {
    enriched: EnrichedContact,
}

/// Targeting selected the account; downstream stages are due.
#[derive(Debug)]
pub struct Targeted {
    enriched: EnrichedContact,
    reason: String,
    account: Account,
}

/// Accumulates one run's result. See the module docs for the state graph.
#[derive(Debug)]
pub struct RunBuilder<S> {
    run_id: String,
    started_at: DateTime<Utc>,
    state: S,
}

/// Outcome of [`RunBuilder::evaluated`].
#[derive(Debug)]
pub enum Evaluated {
    Targeted(RunBuilder<Targeted>),
    Finished(PipelineResult),
}

/// Results of the stages that run for a targeted account.
#[derive(Debug)]
pub struct StageOutcomes {
    pub contact_sync: StageResult,
    pub company_sync: StageResult,
    pub summary: std::result::Result<String, SummaryError>,
    /// `None` when the crew was not requested.
    pub crew: Option<std::result::Result<CrewOutputs, AgentError>>,
}

impl<S> RunBuilder<S> {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn empty_result(&self, status: RunStatus, reason: Option<String>) -> PipelineResult {
        PipelineResult {
            run_id: self.run_id.clone(),
            status,
            reason,
            enriched_contact: None,
            targeting_status: None,
            targeting_reason: None,
            account_data: None,
            hubspot_contact_result: None,
            hubspot_company_result: None,
            summary: None,
            summary_error: None,
            crew_outputs: None,
            crew_error: None,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

impl RunBuilder<Started> {
    /// Start a run with a fresh time-ordered id.
    pub fn start() -> Self {
        Self {
            run_id: Uuid::now_v7().to_string(),
            started_at: Utc::now(),
            state: Started,
        }
    }

    pub fn enriched(self, enriched: EnrichedContact) -> RunBuilder<Enriched> {
        RunBuilder {
            run_id: self.run_id,
            started_at: self.started_at,
            state: Enriched { enriched },
        }
    }

    /// Finalize as `failed`; nothing else is recorded.
    pub fn enrichment_failed(self, error: impl std::fmt::Display) -> PipelineResult {
        self.empty_result(RunStatus::Failed, Some(format!("Enrichment error: {error}")))
    }
}

impl RunBuilder<Enriched> {
    pub fn enriched_contact(&self) -> &EnrichedContact {
        &self.state.enriched
    }

    /// Record the targeting decision. Skipped and error decisions finalize
    /// the run here.
    pub fn evaluated(self, decision: TargetingDecision) -> Evaluated {
        let status = decision.status();
        match decision {
            TargetingDecision::Targeted { reason, account } => Evaluated::Targeted(RunBuilder {
                run_id: self.run_id,
                started_at: self.started_at,
                state: Targeted {
                    enriched: self.state.enriched,
                    reason,
                    account,
                },
            }),
            TargetingDecision::Skipped { reason } => {
                let mut result = self.empty_result(RunStatus::Skipped, None);
                result.targeting_status = Some(status);
                result.targeting_reason = Some(reason);
                result.enriched_contact = Some(self.state.enriched);
                Evaluated::Finished(result)
            }
            TargetingDecision::Error { reason } => {
                let mut result = self.empty_result(
                    RunStatus::Error,
                    Some(format!("Target evaluation failed: {reason}")),
                );
                result.targeting_status = Some(status);
                result.targeting_reason = Some(reason);
                result.enriched_contact = Some(self.state.enriched);
                Evaluated::Finished(result)
            }
        }
    }
}

impl RunBuilder<Targeted> {
    pub fn enriched_contact(&self) -> &EnrichedContact {
        &self.state.enriched
    }

    pub fn account(&self) -> &Account {
        &self.state.account
    }

    /// Finalize as `targeted` with every downstream stage outcome.
    pub fn finish(self, outcomes: StageOutcomes) -> PipelineResult {
        let mut result = self.empty_result(RunStatus::Targeted, None);
        let Targeted {
            enriched,
            reason,
            account,
        } = self.state;

        result.enriched_contact = Some(enriched);
        result.targeting_status = Some(TargetingStatus::Targeted);
        result.targeting_reason = Some(reason);
        result.account_data = Some(account);
        result.hubspot_contact_result = Some(outcomes.contact_sync);
        result.hubspot_company_result = Some(outcomes.company_sync);

        match outcomes.summary {
            Ok(summary) => result.summary = Some(summary),
            Err(e) => result.summary_error = Some(e.to_string()),
        }
        match outcomes.crew {
            Some(Ok(outputs)) => result.crew_outputs = Some(outputs),
            Some(Err(e)) => result.crew_error = Some(e.to_string()),
            None => {}
        }
        result
    }
}
