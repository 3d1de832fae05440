//! End-to-end run: contact → enrich → evaluate → (sync + summarize + crew) → result.
//!
//! Only enrichment failure aborts a run. Once an account is targeted, CRM
//! sync, summarization and the optional crew run concurrently and each one's
//! failure is recorded in its own result field.

use abm_crm::CrmSync;
use abm_shared::Contact;
use tracing::{error, info, instrument, warn};

use crate::crew::CrewRunner;
use crate::enrichment::Enricher;
use crate::result::{Evaluated, PipelineResult, RunBuilder, StageOutcomes};
use crate::summary::Summarizer;
use crate::targeting;

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once with the finalized result.
    fn done(&self, result: &PipelineResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn done(&self, _result: &PipelineResult) {}
}

/// The assembled pipeline. Holds only immutable configuration and adapters,
/// so one instance can serve any number of concurrent runs.
pub struct Pipeline {
    enricher: Enricher,
    revenue_threshold: u64,
    crm: CrmSync,
    summarizer: Summarizer,
    crew: CrewRunner,
}

impl Pipeline {
    pub fn new(
        enricher: Enricher,
        revenue_threshold: u64,
        crm: CrmSync,
        summarizer: Summarizer,
        crew: CrewRunner,
    ) -> Self {
        Self {
            enricher,
            revenue_threshold,
            crm,
            summarizer,
            crew,
        }
    }

    pub fn revenue_threshold(&self) -> u64 {
        self.revenue_threshold
    }

    /// Run one contact through the pipeline.
    pub async fn run(&self, contact: &Contact, use_agents: bool) -> PipelineResult {
        self.run_with_progress(contact, use_agents, &SilentProgress).await
    }

    #[instrument(skip_all, fields(email = %contact.email, domain = %contact.domain, use_agents = use_agents))]
    pub async fn run_with_progress(
        &self,
        contact: &Contact,
        use_agents: bool,
        progress: &dyn ProgressReporter,
    ) -> PipelineResult {
        let run = RunBuilder::start();
        info!(run_id = run.run_id(), "starting ABM pipeline");

        // --- Stage 1: Enrichment ---
        progress.phase("Enriching contact");
        let run = match self.enricher.enrich(contact).await {
            Ok(enriched) => run.enriched(enriched),
            Err(e) => {
                error!(error = %e, "enrichment failed, aborting run");
                return self.finalize(run.enrichment_failed(e), progress);
            }
        };

        // --- Stage 2: Targeting ---
        progress.phase("Evaluating target account");
        let decision = targeting::evaluate(run.enriched_contact(), self.revenue_threshold);
        info!(status = %decision.status(), reason = decision.reason(), "target evaluation");

        let targeted = match run.evaluated(decision) {
            Evaluated::Targeted(targeted) => targeted,
            Evaluated::Finished(result) => return self.finalize(result, progress),
        };

        // --- Stages 3-5: CRM sync, summary, crew ---
        progress.phase(if use_agents {
            "Syncing CRM, summarizing and running crew"
        } else {
            "Syncing CRM and summarizing"
        });

        let enriched = targeted.enriched_contact();
        let account = targeted.account();

        let crew = async {
            if use_agents {
                Some(self.crew.run(enriched).await)
            } else {
                info!("crew execution skipped (not requested)");
                None
            }
        };

        let (contact_sync, company_sync, summary, crew) = tokio::join!(
            self.crm.upsert_contact(enriched),
            self.crm.upsert_account(account),
            self.summarizer.summarize(enriched),
            crew,
        );

        if let Some(message) = contact_sync.error_message() {
            warn!(error = message, "contact sync failed, continuing");
        }
        if let Some(message) = company_sync.error_message() {
            warn!(error = message, "company sync failed, continuing");
        }
        match &summary {
            Ok(_) => info!("summary stage succeeded"),
            Err(e) => warn!(error = %e, "summary stage failed, continuing"),
        }
        match &crew {
            Some(Ok(_)) => info!("crew stage succeeded"),
            Some(Err(e)) => warn!(error = %e, "crew stage failed, continuing"),
            None => {}
        }

        let result = targeted.finish(StageOutcomes {
            contact_sync,
            company_sync,
            summary,
            crew,
        });
        self.finalize(result, progress)
    }

    fn finalize(&self, result: PipelineResult, progress: &dyn ProgressReporter) -> PipelineResult {
        info!(
            run_id = result.run_id(),
            status = %result.status(),
            "pipeline finished"
        );
        progress.done(&result);
        result
    }
}
