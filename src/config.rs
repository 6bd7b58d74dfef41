use crate::error::{ImportError, ImportResult};
use crate::mapping::model::{MappingOptions, MappingStrategy};
use crate::mapping::resolver::IdentifierResolvers;
use clap::{ArgAction, Parser};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use url::Url;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

#[derive(Parser, Debug, Default, Clone)]
#[command(name = "junit-import", version, about = "Import JUnit XML test results into Aqua")]
pub struct Cli {
    /// JSON configuration file.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    #[arg(long = "aqua-url", value_name = "URL")]
    pub aqua_url: Option<String>,
    #[arg(long)]
    pub username: Option<String>,
    #[arg(long)]
    pub password: Option<String>,
    #[arg(long, value_name = "ID")]
    pub project: Option<i32>,

    #[arg(long, value_enum)]
    pub strategy: Option<MappingStrategy>,
    /// Case id pattern; the first capture group holds the id.
    #[arg(long = "regex", value_name = "PATTERN")]
    pub regex: Option<String>,
    /// Scenario id pattern; the first capture group holds the id.
    #[arg(long = "scenario-regex", value_name = "PATTERN")]
    pub scenario_regex: Option<String>,
    #[arg(long)]
    pub prefix: Option<String>,
    #[arg(long = "digits-length")]
    pub digits_length: Option<i64>,

    #[arg(long = "skip-unmapped", action = ArgAction::Set, value_name = "BOOL")]
    pub skip_unmapped: Option<bool>,
    #[arg(long = "fail-on-unmapped")]
    pub fail_on_unmapped: bool,
    /// Parse and group without contacting Aqua.
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<i64>,
    #[arg(long)]
    pub retries: Option<i32>,

    /// Report file or directory, repeatable.
    #[arg(short = 'i', long = "input", value_name = "PATH")]
    pub inputs: Vec<String>,
    #[arg(long = "search-pattern", value_name = "GLOB")]
    pub search_pattern: Option<String>,
    #[arg(long, action = ArgAction::Set, value_name = "BOOL")]
    pub recursive: Option<bool>,
    /// Read a single report from stdin when no input paths are given.
    #[arg(long)]
    pub stdin: bool,

    #[arg(long = "run-name")]
    pub run_name: Option<String>,
    #[arg(long = "external-run-id")]
    pub external_run_id: Option<String>,
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AquaOptions {
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub project_id: Option<i32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct BehaviorOptions {
    pub skip_unmapped: bool,
    pub fail_on_unmapped: bool,
    pub dry_run: bool,
}

impl Default for BehaviorOptions {
    fn default() -> Self {
        BehaviorOptions {
            skip_unmapped: true,
            fail_on_unmapped: false,
            dry_run: false,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpOptions {
    pub timeout_seconds: i64,
    pub retries: i32,
}

impl Default for HttpOptions {
    fn default() -> Self {
        HttpOptions {
            timeout_seconds: 100,
            retries: 3,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct InputOptions {
    pub paths: Vec<String>,
    pub search_pattern: String,
    pub recursive: bool,
    pub read_from_stdin: bool,
}

impl Default for InputOptions {
    fn default() -> Self {
        InputOptions {
            paths: vec![],
            search_pattern: "*.xml".to_string(),
            recursive: true,
            read_from_stdin: false,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RunOptions {
    pub name: Option<String>,
    pub external_run_id: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingOptions {
    pub level: String,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        LoggingOptions {
            level: "Information".to_string(),
        }
    }
}

impl LoggingOptions {
    /// Accepts tracing level names and the `Information`/`Warning`/`Critical`/`None` spellings.
    /// Unknown values fall back to info.
    pub fn level_filter(&self) -> LevelFilter {
        match self.level.trim().to_ascii_lowercase().as_str() {
            "trace" => LevelFilter::TRACE,
            "debug" => LevelFilter::DEBUG,
            "warn" | "warning" => LevelFilter::WARN,
            "error" | "critical" => LevelFilter::ERROR,
            "none" | "off" => LevelFilter::OFF,
            _ => LevelFilter::INFO,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ImporterConfig {
    pub aqua: AquaOptions,
    pub mapping: MappingOptions,
    pub behavior: BehaviorOptions,
    pub http: HttpOptions,
    pub input: InputOptions,
    pub run: RunOptions,
    pub logging: LoggingOptions,
}

impl ImporterConfig {
    /// Loads from the process environment and `cli`, then validates.
    pub fn load(cli: &Cli) -> ImportResult<Self> {
        Self::load_with(cli, |key| std::env::var(key).ok())
    }

    pub fn load_with<F>(cli: &Cli, env: F) -> ImportResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut merged = serde_json::to_value(ImporterConfig::default())
            .map_err(|e| ImportError::config(format!("invalid defaults: {e}")))?;
        merge(&mut merged, env_layer(&env));
        if let Some(path) = &cli.config {
            merge(&mut merged, file_layer(path)?);
        }
        merge(&mut merged, cli_layer(cli));
        substitute_placeholders(&mut merged, &env);

        let config: ImporterConfig = serde_json::from_value(merged)
            .map_err(|e| ImportError::config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reports every problem at once.
    pub fn validate(&self) -> ImportResult<()> {
        let mut errors = vec![];

        if self.http.timeout_seconds <= 0 {
            errors.push("http.timeoutSeconds must be > 0".to_string());
        }
        if self.http.retries <= 0 {
            errors.push("http.retries must be > 0".to_string());
        }

        if !self.behavior.dry_run {
            match non_blank(&self.aqua.base_url) {
                None => errors.push("aqua.baseUrl is required unless dry-run is enabled".to_string()),
                Some(url) => match Url::parse(url) {
                    Ok(url) if url.scheme() == "https" => {}
                    _ => errors.push("aqua.baseUrl must be a valid HTTPS URL".to_string()),
                },
            }
            if non_blank(&self.aqua.username).is_none() {
                errors.push("aqua.username is required unless dry-run is enabled".to_string());
            }
            if non_blank(&self.aqua.password).is_none() {
                errors.push("aqua.password is required unless dry-run is enabled".to_string());
            }
        }

        if self.aqua.project_id.is_some_and(|id| id <= 0) {
            errors.push("aqua.projectId must be > 0 when specified".to_string());
        }
        if self.mapping.digits_length == Some(0) {
            errors.push("mapping.digitsLength must be > 0 when specified".to_string());
        }
        if let Err(e) = IdentifierResolvers::from_options(&self.mapping) {
            errors.push(match e {
                ImportError::Config { message } => message,
                other => other.to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ImportError::config(errors.join("; ")))
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn env_layer(env: &impl Fn(&str) -> Option<String>) -> Value {
    let mut layer = json!({});
    let mut set = |section: &str, key: &str, value: Value| {
        layer[section][key] = value;
    };
    if let Some(url) = env("AQUA_BASE_URL") {
        set("aqua", "baseUrl", json!(url));
    }
    if let Some(username) = env("AQUA_USERNAME") {
        set("aqua", "username", json!(username));
    }
    if let Some(password) = env("AQUA_PASSWORD") {
        set("aqua", "password", json!(password));
    }
    if let Some(project) = env("AQUA_PROJECT_ID") {
        // unparsable numbers surface as a configuration error when deserializing
        let value = project
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or(Value::String(project));
        set("aqua", "projectId", value);
    }
    if let Some(name) = env("IMPORTER_RUN_NAME") {
        set("run", "name", json!(name));
    }
    if let Some(id) = env("IMPORTER_EXTERNAL_RUN_ID") {
        set("run", "externalRunId", json!(id));
    }
    if let Some(level) = env("IMPORTER_LOG_LEVEL") {
        set("logging", "level", json!(level));
    }
    layer
}

fn file_layer(path: &std::path::Path) -> ImportResult<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ImportError::config(format!("failed to read config file {}: {e}", path.display()))
    })?;
    let value: Value = serde_json::from_str(&content).map_err(|e| {
        ImportError::config(format!("invalid config file {}: {e}", path.display()))
    })?;
    if !value.is_object() {
        return Err(ImportError::config(format!(
            "config file {} must contain a JSON object",
            path.display()
        )));
    }
    Ok(value)
}

fn cli_layer(cli: &Cli) -> Value {
    let mut layer = json!({});
    let mut set = |section: &str, key: &str, value: Option<Value>| {
        if let Some(value) = value {
            layer[section][key] = value;
        }
    };
    set("aqua", "baseUrl", cli.aqua_url.clone().map(Value::from));
    set("aqua", "username", cli.username.clone().map(Value::from));
    set("aqua", "password", cli.password.clone().map(Value::from));
    set("aqua", "projectId", cli.project.map(Value::from));
    set(
        "mapping",
        "strategy",
        cli.strategy.and_then(|s| serde_json::to_value(s).ok()),
    );
    set("mapping", "pattern", cli.regex.clone().map(Value::from));
    set("mapping", "scenarioPattern", cli.scenario_regex.clone().map(Value::from));
    set("mapping", "prefix", cli.prefix.clone().map(Value::from));
    set("mapping", "digitsLength", cli.digits_length.map(Value::from));
    set("behavior", "skipUnmapped", cli.skip_unmapped.map(Value::from));
    set("behavior", "failOnUnmapped", cli.fail_on_unmapped.then_some(Value::Bool(true)));
    set("behavior", "dryRun", cli.dry_run.then_some(Value::Bool(true)));
    set("http", "timeoutSeconds", cli.timeout.map(Value::from));
    set("http", "retries", cli.retries.map(Value::from));
    set(
        "input",
        "paths",
        (!cli.inputs.is_empty()).then(|| Value::from(cli.inputs.clone())),
    );
    set("input", "searchPattern", cli.search_pattern.clone().map(Value::from));
    set("input", "recursive", cli.recursive.map(Value::from));
    set("input", "readFromStdin", cli.stdin.then_some(Value::Bool(true)));
    set("run", "name", cli.run_name.clone().map(Value::from));
    set("run", "externalRunId", cli.external_run_id.clone().map(Value::from));
    set("logging", "level", cli.log_level.clone().map(Value::from));
    layer
}

/// Objects merge key by key; anything else in `overlay` replaces the base value.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Replaces `${VAR}` in every string; unset variables keep the placeholder.
fn substitute_placeholders(value: &mut Value, env: &impl Fn(&str) -> Option<String>) {
    match value {
        Value::String(text) => {
            if PLACEHOLDER.is_match(text) {
                *text = PLACEHOLDER
                    .replace_all(text, |caps: &Captures| {
                        env(&caps[1]).unwrap_or_else(|| caps[0].to_string())
                    })
                    .into_owned();
            }
        }
        Value::Array(items) => items
            .iter_mut()
            .for_each(|item| substitute_placeholders(item, env)),
        Value::Object(map) => map
            .values_mut()
            .for_each(|value| substitute_placeholders(value, env)),
        _ => {}
    }
}
