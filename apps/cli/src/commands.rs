//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use abm_core::pipeline::ProgressReporter;
use abm_core::result::PipelineResult;
use abm_shared::{
    AppConfig, Contact, StageResult, init_config, load_config, load_config_from,
    resolve_db_path,
};
use abm_storage::Storage;
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::setup;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// ABM: enrich, target and sync B2B contacts.
#[derive(Parser)]
#[command(
    name = "abm",
    version,
    about = "Run contacts through the account-based-marketing pipeline.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.abm/abm.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Contact fields, given inline or as a JSON file.
#[derive(Args, Debug, Clone)]
pub(crate) struct ContactArgs {
    /// Read the contact from a JSON file instead of flags.
    #[arg(long, conflicts_with_all = ["name", "email", "company", "domain", "title", "phone"])]
    pub input: Option<PathBuf>,

    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub email: Option<String>,

    #[arg(long)]
    pub company: Option<String>,

    /// Company web domain, e.g. acme.com.
    #[arg(long)]
    pub domain: Option<String>,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub phone: Option<String>,

    /// Override the mocked annual revenue.
    #[arg(long)]
    pub revenue: Option<u64>,

    /// Override the mocked employee count.
    #[arg(long)]
    pub employees: Option<u64>,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run one contact through the full pipeline.
    Run {
        #[command(flatten)]
        contact: ContactArgs,

        /// Also run the strategist/analyst crew.
        #[arg(long)]
        use_agents: bool,

        /// Sync into an in-memory CRM instead of HubSpot.
        #[arg(long)]
        dry_run: bool,

        /// Do not record the run in history.
        #[arg(long)]
        no_save: bool,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Enrich a contact and print it with its provenance map.
    Enrich {
        #[command(flatten)]
        contact: ContactArgs,
    },

    /// List recorded runs, newest first.
    History {
        /// Maximum number of runs to list.
        #[arg(short, long, default_value = "20")]
        limit: u32,

        /// Print one run's full result instead of the list.
        #[arg(long)]
        run: Option<String>,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "abm=info",
        1 => "abm=debug",
        _ => "abm=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    match cli.command {
        Command::Run {
            contact,
            use_agents,
            dry_run,
            no_save,
            json,
        } => cmd_run(&config, &contact, use_agents, dry_run, no_save, json).await,
        Command::Enrich { contact } => cmd_enrich(&config, &contact).await,
        Command::History { limit, run } => cmd_history(&config, limit, run.as_deref()).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

impl ContactArgs {
    fn to_contact(&self) -> Result<Contact> {
        if let Some(path) = &self.input {
            let raw = std::fs::read_to_string(path)
                .wrap_err_with(|| format!("failed to read contact file {}", path.display()))?;
            return serde_json::from_str(&raw)
                .wrap_err_with(|| format!("invalid contact JSON in {}", path.display()));
        }

        let email = self
            .email
            .clone()
            .ok_or_else(|| eyre!("--email is required (or pass --input <FILE>)"))?;
        Ok(Contact {
            name: self.name.clone().unwrap_or_default(),
            email,
            company: self.company.clone().unwrap_or_default(),
            domain: self.domain.clone().unwrap_or_default(),
            title: self.title.clone(),
            phone: self.phone.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    config: &AppConfig,
    args: &ContactArgs,
    use_agents: bool,
    dry_run: bool,
    no_save: bool,
    json: bool,
) -> Result<()> {
    let contact = args.to_contact()?;
    let firmographics = setup::firmographics(&contact.domain, args.revenue, args.employees);
    let pipeline = setup::pipeline(config, firmographics, dry_run)?;

    info!(email = %contact.email, use_agents, dry_run, "running pipeline");

    let reporter = CliProgress::new();
    let result = tokio::select! {
        result = pipeline.run_with_progress(&contact, use_agents, &reporter) => result,
        _ = tokio::signal::ctrl_c() => {
            reporter.abandon();
            warn!("interrupted, abandoning run");
            return Err(eyre!("run interrupted; partial results were discarded"));
        }
    };

    if !no_save {
        if let Err(e) = save_run(config, &contact, &result).await {
            warn!(error = %e, "failed to record run history");
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(())
}

async fn save_run(config: &AppConfig, contact: &Contact, result: &PipelineResult) -> Result<()> {
    let path = resolve_db_path(config)?;
    let storage = Storage::open(&path).await?;
    storage.record_run(&result.to_run_record(contact)?).await?;
    info!(run_id = result.run_id(), db = %path.display(), "run recorded");
    Ok(())
}

fn stage_line(result: Option<&StageResult>) -> String {
    match result {
        None => "-".into(),
        Some(StageResult::Success { action, id, key }) => format!("{action:?} {key} (id {id})"),
        Some(StageResult::Error { message }) => format!("error: {message}"),
    }
}

fn print_result(result: &PipelineResult) {
    println!();
    println!("  Run:       {}", result.run_id());
    println!("  Status:    {}", result.status());
    if let Some(reason) = result.reason() {
        println!("  Reason:    {reason}");
    }
    if let (Some(status), Some(reason)) = (result.targeting_status(), result.targeting_reason()) {
        println!("  Targeting: {status} ({reason})");
    }
    if let Some(account) = result.account_data() {
        println!("  Account:   {} <{}> revenue {}", account.company, account.domain, account.revenue);
    }
    if result.hubspot_contact_result().is_some() || result.hubspot_company_result().is_some() {
        println!("  Contact:   {}", stage_line(result.hubspot_contact_result()));
        println!("  Company:   {}", stage_line(result.hubspot_company_result()));
    }
    match (result.summary(), result.summary_error()) {
        (Some(summary), _) => println!("\n  Summary:\n  {summary}"),
        (None, Some(err)) => println!("  Summary:   error: {err}"),
        (None, None) => {}
    }
    if let Some(crew) = result.crew_outputs() {
        println!("\n  Strategist:\n  {}", crew.strategist);
        match &crew.analyst_json {
            Some(json) => println!(
                "\n  Analyst:\n{}",
                serde_json::to_string_pretty(json).unwrap_or_else(|_| crew.analyst.clone())
            ),
            None => println!("\n  Analyst (raw):\n  {}", crew.analyst),
        }
    }
    if let Some(err) = result.crew_error() {
        println!("  Crew:      error: {err}");
    }
    let elapsed = result.finished_at() - result.started_at();
    println!("\n  Time:      {:.1}s", elapsed.num_milliseconds() as f64 / 1000.0);
    println!();
}

async fn cmd_enrich(config: &AppConfig, args: &ContactArgs) -> Result<()> {
    let contact = args.to_contact()?;
    let firmographics = setup::firmographics(&contact.domain, args.revenue, args.employees);
    let enriched = setup::enricher(config, firmographics)?.enrich(&contact).await?;
    println!("{}", serde_json::to_string_pretty(&enriched)?);
    Ok(())
}

async fn cmd_history(config: &AppConfig, limit: u32, run: Option<&str>) -> Result<()> {
    let path = resolve_db_path(config)?;
    let storage = Storage::open_readonly(&path).await?;

    if let Some(run_id) = run {
        let record = storage
            .get_run(run_id)
            .await?
            .ok_or_else(|| eyre!("no run with id '{run_id}'"))?;
        let value: serde_json::Value = serde_json::from_str(&record.result_json)?;
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let runs = storage.list_runs(limit).await?;
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }
    for run in runs {
        println!(
            "{}  {}  {:<9} {:<28} {}",
            run.run_id,
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.status,
            run.email,
            run.reason.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn abandon(&self) {
        self.spinner.abandon_with_message("interrupted");
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn done(&self, _result: &PipelineResult) {
        self.spinner.finish_and_clear();
    }
}
