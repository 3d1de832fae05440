//! Two-agent crew run for a targeted contact.
//!
//! A [`Crew`] is built from an enriched contact (fallibly, see [`BuildError`])
//! and kicked off against a [`GenerationService`]. Tasks run sequentially:
//!
//! 1. **strategist**: 2–4 sentence outreach angle; the contact profile is
//!    appended as implicit context.
//! 2. **analyst**: re-emits a fixed field set as a raw JSON object, reading
//!    only the source JSON embedded in its instructions.
//!
//! Task descriptions are templates. `{name}` placeholders are substituted,
//! `{{`/`}}` render as literal braces, so JSON embedded in a description must
//! have its braces doubled first.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use abm_llm::{GenerationOptions, GenerationService, Prompt};
use abm_shared::{CrewConfig, EnrichedContact};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

/// Fields the analyst must emit, in output order.
pub const ANALYST_FIELDS: [&str; 11] = [
    "name",
    "email",
    "title",
    "phone",
    "company",
    "domain",
    "revenue",
    "employees",
    "linkedin",
    "linkedin_company_page",
    "summary",
];

static JSON_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^```(?:json)?\s*(.*?)\s*```$").expect("valid regex")
});

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Crew construction failure. No crew exists when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("crew model is not configured")]
    MissingModel,
    #[error("failed to serialize contact for crew: {0}")]
    Serialize(String),
    #[error("failed to render {task} task: {message}")]
    Template { task: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    #[error("crew build failed: {0}")]
    Build(#[from] BuildError),
    #[error("crew task '{task}' failed: {message}")]
    Execution { task: &'static str, message: String },
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// Double every brace so `render_template` reproduces `text` verbatim.
pub fn escape_braces(text: &str) -> String {
    text.replace('{', "{{").replace('}', "}}")
}

/// Substitute `{key}` placeholders from `vars`. `{{` and `}}` become literal
/// braces; unknown keys and unbalanced braces are errors.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut key = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') | None => {
                            return Err(format!("unterminated placeholder '{{{key}'"));
                        }
                        Some(c) => key.push(c),
                    }
                }
                let value = vars
                    .iter()
                    .find(|(name, _)| *name == key)
                    .map(|(_, value)| *value)
                    .ok_or_else(|| format!("unknown placeholder '{{{key}}}'"))?;
                out.push_str(value);
            }
            '}' => return Err("unmatched '}'".into()),
            c => out.push(c),
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Analyst JSON
// ---------------------------------------------------------------------------

fn text_value(value: Option<&str>) -> Value {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map_or(Value::Null, |v| Value::String(v.to_string()))
}

/// The analyst's source data: exactly [`ANALYST_FIELDS`], with JSON `null`
/// for every absent or empty value.
pub fn analyst_source(enriched: &EnrichedContact) -> Value {
    let contact = &enriched.contact;
    let mut map = Map::new();
    for field in ANALYST_FIELDS {
        let value = match field {
            "name" => text_value(Some(contact.name.as_str())),
            "email" => text_value(Some(contact.email.as_str())),
            "title" => text_value(contact.title.as_deref()),
            "phone" => text_value(contact.phone.as_deref()),
            "company" => text_value(Some(contact.company.as_str())),
            "domain" => text_value(Some(contact.domain.as_str())),
            "revenue" => enriched.revenue.map_or(Value::Null, Value::from),
            "employees" => enriched.employees.map_or(Value::Null, Value::from),
            "linkedin" => text_value(enriched.linkedin.as_deref()),
            "linkedin_company_page" => text_value(enriched.linkedin_company_page.as_deref()),
            "summary" => text_value(Some(enriched.summary.as_str())),
            _ => Value::Null,
        };
        map.insert(field.to_string(), value);
    }
    Value::Object(map)
}

/// Parse analyst output for display. Surrounding whitespace and a ```json
/// fence are stripped first. `None` when the text is not a JSON object.
pub fn parse_analyst_output(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    let body = JSON_FENCE
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map_or(trimmed, |m| m.as_str());
    match serde_json::from_str::<Value>(body) {
        Ok(value @ Value::Object(_)) => Some(value),
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "analyst output is not JSON");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Agents and tasks
// ---------------------------------------------------------------------------

struct Agent {
    role: &'static str,
    goal: &'static str,
    backstory: &'static str,
}

impl Agent {
    fn system_prompt(&self) -> String {
        format!(
            "You are the {}. {}\n\nYour goal: {}",
            self.role, self.backstory, self.goal
        )
    }
}

const STRATEGIST: Agent = Agent {
    role: "B2B Sales Strategist for ABM",
    goal: "Analyze the provided target contact and company profile. Identify 2-3 likely business \
           pains or strategic opportunities based on their industry, size, revenue, role, and company \
           summary. Craft a concise (2-4 sentences) and highly relevant outreach angle connecting a \
           generic B2B SaaS solution (focused on growth, efficiency, data insights) to them.",
    backstory: "You are an expert B2B sales strategist specializing in Account-Based Marketing. \
                You quickly interpret company and contact data to formulate compelling, personalized \
                outreach angles that resonate with a buyer's most pressing challenges.",
};

const ANALYST: Agent = Agent {
    role: "Account Data Structuring Analyst",
    goal: "Extract key contact and firmographic data points accurately from the provided enriched \
           profile data and structure them into a standardized JSON object using the exact field \
           names requested.",
    backstory: "You are a meticulous data analyst focused on accuracy and adherence to structure. \
                You prepare clean, reliable data briefs in JSON format and pay close attention to \
                requested field names and output formats.",
};

const STRATEGIST_TASK: &str = "**Task: Develop Outreach Angle**

Context: the detailed profile for contact '{name}' at company '{company}' is provided below.

Instructions:
1. Carefully analyze the complete profile data in the context.
2. Identify 2-3 specific business challenges OR strategic opportunities relevant to this company, \
considering its summary, revenue ({revenue}) and employee count ({employees}).
3. Synthesize these insights into a concise (strictly 2-4 sentences) outreach angle that names the \
challenge or opportunity and hints at how a B2B SaaS solution could help.
4. Output *only* the angle text itself, nothing else.";

const STRATEGIST_EXPECTED: &str =
    "A short paragraph (2-4 sentences maximum) containing only the tailored outreach angle text.";

const ANALYST_TASK_HEAD: &str = "**Task: Extract and Structure Specific Account Data as JSON**

**Source Data:** You MUST use ONLY the following JSON data as your source:
```json
";

const ANALYST_TASK_TAIL: &str = "
```

**Instructions:**
1. Ignore any other context. Focus ONLY on the Source Data JSON above.
2. From the Source Data, extract the exact values for these fields: {fields}.
3. If a field is missing from the Source Data, or its value is null or an empty string, use the \
JSON value `null` (not the string \"null\") for that key.
4. Construct a single valid JSON object with exactly these keys: {fields}.
5. Your final output MUST be ONLY the raw JSON object. Do NOT include markdown fences, explanations \
or any surrounding text.";

const ANALYST_EXPECTED: &str = "A single, valid, raw JSON object containing key-value pairs ONLY for \
the requested fields, with values taken solely from the Source Data.";

/// One rendered task, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct CrewTask {
    pub name: &'static str,
    pub prompt: Prompt,
}

fn task_prompt(agent: &Agent, description: &str, expected: &str, context: Option<&str>) -> Prompt {
    let mut user = format!("{description}\n\nExpected output: {expected}");
    if let Some(context) = context {
        user.push_str("\n\nContext:\n");
        user.push_str(context);
    }
    Prompt::new(agent.system_prompt(), user)
}

// ---------------------------------------------------------------------------
// Crew
// ---------------------------------------------------------------------------

/// Outputs of a completed crew run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrewOutputs {
    pub strategist: String,
    pub analyst: String,
    /// The analyst output parsed as JSON, if it was valid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyst_json: Option<Value>,
}

/// A fully built, ready-to-run crew.
#[derive(Debug, Clone)]
pub struct Crew {
    tasks: [CrewTask; 2],
    options: GenerationOptions,
    task_timeout: Duration,
}

impl Crew {
    pub fn build(enriched: &EnrichedContact, config: &CrewConfig) -> Result<Self, BuildError> {
        if config.model.trim().is_empty() {
            return Err(BuildError::MissingModel);
        }

        let profile = serde_json::to_string_pretty(enriched)
            .map_err(|e| BuildError::Serialize(e.to_string()))?;
        let source = serde_json::to_string_pretty(&analyst_source(enriched))
            .map_err(|e| BuildError::Serialize(e.to_string()))?;

        let revenue = enriched.revenue.map_or_else(|| "N/A".to_string(), |r| r.to_string());
        let employees = enriched.employees.map_or_else(|| "N/A".to_string(), |e| e.to_string());
        let name = if enriched.name().trim().is_empty() { "N/A" } else { enriched.name() };
        let company = if enriched.company().trim().is_empty() { "N/A" } else { enriched.company() };

        let strategist = render_template(
            STRATEGIST_TASK,
            &[
                ("name", name),
                ("company", company),
                ("revenue", &revenue),
                ("employees", &employees),
            ],
        )
        .map_err(|message| BuildError::Template {
            task: "strategist",
            message,
        })?;

        let fields = ANALYST_FIELDS
            .iter()
            .map(|f| format!("'{f}'"))
            .collect::<Vec<_>>()
            .join(", ");
        let analyst_template = format!(
            "{ANALYST_TASK_HEAD}{}{ANALYST_TASK_TAIL}",
            escape_braces(&source)
        );
        let analyst = render_template(&analyst_template, &[("fields", &fields)]).map_err(|message| {
            BuildError::Template {
                task: "analyst",
                message,
            }
        })?;

        debug!(source_chars = source.len(), "crew tasks rendered");

        Ok(Self {
            tasks: [
                CrewTask {
                    name: "strategist",
                    prompt: task_prompt(&STRATEGIST, &strategist, STRATEGIST_EXPECTED, Some(&profile)),
                },
                CrewTask {
                    name: "analyst",
                    prompt: task_prompt(&ANALYST, &analyst, ANALYST_EXPECTED, None),
                },
            ],
            options: GenerationOptions {
                model: config.model.clone(),
                temperature: config.temperature,
                max_tokens: config.max_tokens,
            },
            task_timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    pub fn tasks(&self) -> &[CrewTask] {
        &self.tasks
    }

    /// Run both tasks in order. The first failure ends the run.
    pub async fn kickoff(&self, service: &dyn GenerationService) -> Result<CrewOutputs, AgentError> {
        let mut outputs = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            let reply = tokio::time::timeout(self.task_timeout, service.generate(&task.prompt, &self.options))
                .await
                .map_err(|_| AgentError::Execution {
                    task: task.name,
                    message: format!("timed out after {}s", self.task_timeout.as_secs()),
                })?
                .map_err(|e| AgentError::Execution {
                    task: task.name,
                    message: e.to_string(),
                })?;
            info!(task = task.name, chars = reply.len(), "crew task completed");
            outputs.push(reply.trim().to_string());
        }

        let analyst = outputs.pop().unwrap_or_default();
        let strategist = outputs.pop().unwrap_or_default();
        let analyst_json = parse_analyst_output(&analyst);
        if analyst_json.is_none() {
            warn!("analyst output is not a JSON object, keeping raw text");
        }

        Ok(CrewOutputs {
            strategist,
            analyst,
            analyst_json,
        })
    }
}

/// Builds and runs a crew per contact.
pub struct CrewRunner {
    service: Arc<dyn GenerationService>,
    config: CrewConfig,
}

impl CrewRunner {
    pub fn new(service: Arc<dyn GenerationService>, config: CrewConfig) -> Self {
        Self { service, config }
    }

    #[instrument(skip_all, fields(email = %enriched.email(), model = %self.config.model))]
    pub async fn run(&self, enriched: &EnrichedContact) -> Result<CrewOutputs, AgentError> {
        let crew = Crew::build(enriched, &self.config)?;
        crew.kickoff(self.service.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;
    use abm_llm::GenerationError;
    use abm_shared::Contact;
    use async_trait::async_trait;

    fn enriched() -> EnrichedContact {
        EnrichedContact {
            contact: Contact {
                name: "Jane Doe".into(),
                email: "jane@acme.com".into(),
                company: "Acme".into(),
                domain: "acme.com".into(),
                title: Some("VP Marketing".into()),
                phone: Some(String::new()),
            },
            linkedin: Some("https://linkedin.com/in/janedoe".into()),
            linkedin_company_page: None,
            revenue: Some(5_000_000),
            employees: Some(200),
            summary: "Acme {the leader} in automation.".into(),
            sources: BTreeMap::new(),
        }
    }

    /// Strategist gets a fixed angle; analyst echoes its Source Data block.
    struct EchoCrew {
        prompts: Mutex<Vec<Prompt>>,
        fence: bool,
    }

    impl EchoCrew {
        fn new(fence: bool) -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                fence,
            }
        }
    }

    #[async_trait]
    impl GenerationService for EchoCrew {
        async fn generate(
            &self,
            prompt: &Prompt,
            _options: &GenerationOptions,
        ) -> Result<String, GenerationError> {
            self.prompts.lock().unwrap().push(prompt.clone());
            let system = prompt.system.as_deref().unwrap_or_default();
            if system.contains("Strategist") {
                return Ok("Acme is scaling fast; pitch data-driven efficiency.".into());
            }
            let start = prompt.user.find("```json\n").unwrap() + "```json\n".len();
            let end = start + prompt.user[start..].find("\n```").unwrap();
            let json = &prompt.user[start..end];
            Ok(if self.fence {
                format!("```json\n{json}\n```")
            } else {
                json.to_string()
            })
        }
    }

    struct Failing;

    #[async_trait]
    impl GenerationService for Failing {
        async fn generate(
            &self,
            _prompt: &Prompt,
            _options: &GenerationOptions,
        ) -> Result<String, GenerationError> {
            Err(GenerationError::RateLimited)
        }
    }

    #[test]
    fn render_substitutes_and_unescapes() {
        let out = render_template("Hi {name}, {{literal}} }}", &[("name", "Jane")]).unwrap();
        assert_eq!(out, "Hi Jane, {literal} }");
    }

    #[test]
    fn render_rejects_unknown_and_unbalanced() {
        assert!(render_template("{missing}", &[]).unwrap_err().contains("missing"));
        assert!(render_template("open {name", &[("name", "x")]).is_err());
        assert!(render_template("close }", &[]).is_err());
    }

    #[test]
    fn escaped_json_renders_verbatim() {
        let json = r#"{"a": {"b": "{name}"}}"#;
        let out = render_template(&escape_braces(json), &[]).unwrap();
        assert_eq!(out, json);
    }

    #[test]
    fn analyst_source_uses_null_for_missing() {
        let source = analyst_source(&enriched());
        let map = source.as_object().unwrap();
        assert_eq!(map.len(), ANALYST_FIELDS.len());
        assert_eq!(map["phone"], Value::Null);
        assert_eq!(map["linkedin_company_page"], Value::Null);
        assert_eq!(map["revenue"], Value::from(5_000_000u64));
        assert_eq!(map["name"], "Jane Doe");
    }

    #[test]
    fn parse_strips_fence_and_whitespace() {
        let raw = "  ```json\n{\"name\": \"Jane\"}\n```  ";
        assert_eq!(parse_analyst_output(raw).unwrap()["name"], "Jane");
        assert_eq!(parse_analyst_output("{\"a\":1}").unwrap()["a"], 1);
        assert!(parse_analyst_output("not json").is_none());
        assert!(parse_analyst_output("[1, 2]").is_none());
    }

    #[test]
    fn build_requires_model() {
        let config = CrewConfig {
            model: " ".into(),
            ..CrewConfig::default()
        };
        assert_eq!(
            Crew::build(&enriched(), &config).unwrap_err(),
            BuildError::MissingModel
        );
    }

    #[test]
    fn tasks_carry_profile_and_source() {
        let crew = Crew::build(&enriched(), &CrewConfig::default()).unwrap();
        let [strategist, analyst] = crew.tasks() else {
            panic!("expected two tasks");
        };
        assert!(strategist.prompt.user.contains("contact 'Jane Doe' at company 'Acme'"));
        assert!(strategist.prompt.user.contains("revenue (5000000)"));
        assert!(strategist.prompt.user.contains("Context:\n"));
        assert!(analyst.prompt.user.contains("\"summary\": \"Acme {the leader} in automation.\""));
        assert!(analyst.prompt.user.contains("'linkedin_company_page'"));
        assert!(!analyst.prompt.user.contains("{{"));
    }

    #[tokio::test]
    async fn analyst_round_trip_recovers_fields() {
        for fence in [false, true] {
            let service = EchoCrew::new(fence);
            let crew = Crew::build(&enriched(), &CrewConfig::default()).unwrap();
            let outputs = crew.kickoff(&service).await.unwrap();

            assert!(outputs.strategist.contains("pitch"));
            let parsed = outputs.analyst_json.expect("analyst JSON parsed");
            assert_eq!(parsed, analyst_source(&enriched()));
            assert_eq!(parsed["phone"], Value::Null);
            assert_ne!(parsed["phone"], Value::String("null".into()));
            assert_eq!(service.prompts.lock().unwrap().len(), 2);
        }
    }

    #[tokio::test]
    async fn execution_failure_names_task() {
        let runner = CrewRunner::new(Arc::new(Failing), CrewConfig::default());
        let err = runner.run(&enriched()).await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::Execution {
                task: "strategist",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn build_failure_is_agent_error() {
        let runner = CrewRunner::new(
            Arc::new(EchoCrew::new(false)),
            CrewConfig {
                model: String::new(),
                ..CrewConfig::default()
            },
        );
        let err = runner.run(&enriched()).await.unwrap_err();
        assert_eq!(err, AgentError::Build(BuildError::MissingModel));
    }
}
