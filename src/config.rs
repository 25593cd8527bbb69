//! Configuration for the circuit-weaver factory.
//!
//! Configuration is layered: built-in defaults, then an optional YAML file,
//! then `WEAVER_*` environment variables, then command-line flags. The result
//! is checked with [`WeaverConfig::validate`] before any job starts.
//!
//! # Example
//!
//! ```rust,ignore
//! use circuit_weaver::config::WeaverConfig;
//!
//! let config = WeaverConfig::load(Some("weaver.yaml".as_ref()))?;
//! assert!(config.max_debug_rounds > 0);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::prompts::{default_epilogue, METADATA_FILE_NAME};

/// Default number of debug rounds before a job is abandoned.
pub const DEFAULT_MAX_DEBUG_ROUNDS: u32 = 20;

/// Default number of prior successful scripts pulled into generation context.
pub const DEFAULT_CREATIVE_K: usize = 3;

/// Default sandbox wall-clock limit.
pub const DEFAULT_SANDBOX_TIMEOUT_SECS: u64 = 120;

/// A single named generation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSpec {
    /// Name used in logs and in attempt directory labels.
    pub name: String,
    /// Model identifier; `None` falls back to the client's default model.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f64 {
    0.7
}

impl BackendSpec {
    pub fn new(name: impl Into<String>, temperature: f64) -> Self {
        Self {
            name: name.into(),
            model: None,
            temperature,
            max_tokens: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Backends used by the different stages of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendsConfig {
    /// Produces circuit concepts.
    pub planner: BackendSpec,
    /// Produces the initial candidate script.
    pub coder: BackendSpec,
    /// Extracts corrective records from resolved failure chains.
    pub miner: BackendSpec,
    /// Repair backends raced against each other in every debug round.
    pub fixers: Vec<BackendSpec>,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            planner: BackendSpec::new("planner", 0.9),
            coder: BackendSpec::new("coder", 0.4),
            miner: BackendSpec::new("miner", 0.1),
            fixers: (0..3)
                .map(|i| BackendSpec::new(format!("fixer-{}", i), 0.2 + i as f64 * 0.1))
                .collect(),
        }
    }
}

/// Filesystem locations of run artifacts and persistent stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// One sub-directory per job is created here.
    pub results_dir: PathBuf,
    /// SQLite database backing the corrective store.
    pub corrective_db: PathBuf,
    /// Human-readable markdown log of corrective records.
    pub solutions_log: PathBuf,
    /// Directory holding the creative store.
    pub success_repo_dir: PathBuf,
    /// JSONL file with the precomputed documentation index.
    pub docs_index: PathBuf,
    /// Optional replacement for the built-in style-guide sample.
    pub style_guide: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("results"),
            corrective_db: PathBuf::from("knowledge_base/solutions.db"),
            solutions_log: PathBuf::from("knowledge_base/solutions_log.md"),
            success_repo_dir: PathBuf::from("successful_circuits"),
            docs_index: PathBuf::from("corpus/docs_index.jsonl"),
            style_guide: None,
        }
    }
}

/// Complete factory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaverConfig {
    /// Debug rounds allowed before a job is abandoned.
    pub max_debug_rounds: u32,
    /// Prior successful scripts retrieved for initial generation.
    pub creative_k: usize,
    /// Documentation snippets retrieved per debug round.
    pub docs_k: usize,
    /// Corrective records retrieved per debug round.
    pub corrective_k: usize,
    pub sandbox_timeout_secs: u64,
    /// Interpreter used to run candidate scripts.
    pub interpreter: String,
    pub interpreter_args: Vec<String>,
    /// File name the candidate script is written to inside each attempt directory.
    pub script_file_name: String,
    /// Files that must exist after a run for it to count as a success.
    pub required_artifacts: Vec<String>,
    /// Files copied to the job root as `final_<name>` after finalization.
    pub final_artifacts: Vec<String>,
    /// Code appended to the winning script for the finalization run.
    /// `None` uses the built-in epilogue for the script language; an empty
    /// string disables it.
    pub finalize_epilogue: Option<String>,
    /// Maximum entries kept in a job's conversation log.
    pub conversation_limit: usize,
    /// Concurrent solution-mining tasks; `None` means twice the worker count.
    pub mining_concurrency: Option<usize>,
    /// Attempts made for each store write before giving up.
    pub store_write_retries: u32,
    pub paths: PathsConfig,
    pub backends: BackendsConfig,
}

impl Default for WeaverConfig {
    fn default() -> Self {
        Self {
            max_debug_rounds: DEFAULT_MAX_DEBUG_ROUNDS,
            creative_k: DEFAULT_CREATIVE_K,
            docs_k: 3,
            corrective_k: 3,
            sandbox_timeout_secs: DEFAULT_SANDBOX_TIMEOUT_SECS,
            interpreter: "python3".to_string(),
            interpreter_args: Vec::new(),
            script_file_name: "circuit.py".to_string(),
            required_artifacts: vec!["circuit_diagram.svg".to_string()],
            final_artifacts: vec![
                "circuit_diagram.svg".to_string(),
                METADATA_FILE_NAME.to_string(),
            ],
            finalize_epilogue: None,
            conversation_limit: 12,
            mining_concurrency: None,
            store_write_retries: 3,
            paths: PathsConfig::default(),
            backends: BackendsConfig::default(),
        }
    }
}

impl WeaverConfig {
    /// Load configuration: defaults, then the optional YAML file, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a YAML configuration file. Missing keys keep their defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Defaults overridden by `WEAVER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `WEAVER_*` overrides using the given variable lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("WEAVER_MAX_DEBUG_ROUNDS") {
            self.max_debug_rounds = parse_env_value(&val, "WEAVER_MAX_DEBUG_ROUNDS")?;
        }

        if let Some(val) = lookup("WEAVER_CREATIVE_K") {
            self.creative_k = parse_env_value(&val, "WEAVER_CREATIVE_K")?;
        }

        if let Some(val) = lookup("WEAVER_SANDBOX_TIMEOUT_SECS") {
            self.sandbox_timeout_secs = parse_env_value(&val, "WEAVER_SANDBOX_TIMEOUT_SECS")?;
        }

        if let Some(val) = lookup("WEAVER_INTERPRETER") {
            self.interpreter = val;
        }

        if let Some(val) = lookup("WEAVER_RESULTS_DIR") {
            self.paths.results_dir = PathBuf::from(val);
        }

        if let Some(val) = lookup("WEAVER_KNOWLEDGE_DIR") {
            let dir = PathBuf::from(val);
            self.paths.corrective_db = dir.join("solutions.db");
            self.paths.solutions_log = dir.join("solutions_log.md");
        }

        if let Some(val) = lookup("WEAVER_SUCCESS_REPO_DIR") {
            self.paths.success_repo_dir = PathBuf::from(val);
        }

        if let Some(val) = lookup("WEAVER_DOCS_INDEX") {
            self.paths.docs_index = PathBuf::from(val);
        }

        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sandbox_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "sandbox_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.interpreter.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "interpreter cannot be empty".to_string(),
            ));
        }

        if self.script_file_name.trim().is_empty() || self.script_file_name.contains('/') {
            return Err(ConfigError::ValidationFailed(
                "script_file_name must be a plain file name".to_string(),
            ));
        }

        if self.backends.fixers.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "at least one fixer backend is required".to_string(),
            ));
        }

        if self.conversation_limit == 0 {
            return Err(ConfigError::ValidationFailed(
                "conversation_limit must be greater than 0".to_string(),
            ));
        }

        if self.store_write_retries == 0 {
            return Err(ConfigError::ValidationFailed(
                "store_write_retries must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn sandbox_timeout(&self) -> Duration {
        Duration::from_secs(self.sandbox_timeout_secs)
    }

    /// Concurrent mining tasks for a factory with `workers` workers.
    pub fn mining_concurrency_for(&self, workers: usize) -> usize {
        self.mining_concurrency.unwrap_or(workers * 2).max(1)
    }

    /// Extension of the script file, used for files kept in the creative store.
    pub fn script_extension(&self) -> &str {
        Path::new(&self.script_file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("txt")
    }

    /// Code fence language tag for the script extension.
    pub fn script_language(&self) -> &str {
        match self.script_extension() {
            "py" => "python",
            "sh" => "sh",
            "js" => "javascript",
            "rb" => "ruby",
            other => other,
        }
    }

    /// Epilogue appended to the winner for finalization, if any.
    pub fn epilogue(&self) -> Option<&str> {
        match self.finalize_epilogue.as_deref() {
            Some(text) if text.trim().is_empty() => None,
            Some(text) => Some(text),
            None => default_epilogue(self.script_language()),
        }
    }
}

/// Parse an environment variable value.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = WeaverConfig::default();
        assert_eq!(config.max_debug_rounds, 20);
        assert_eq!(config.creative_k, 3);
        assert_eq!(config.sandbox_timeout_secs, 120);
        assert_eq!(config.backends.fixers.len(), 3);
        assert!((config.backends.fixers[2].temperature - 0.4).abs() < 1e-9);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_partial_override() {
        let yaml = r#"
max_debug_rounds: 5
interpreter: sh
script_file_name: circuit.sh
paths:
  results_dir: /tmp/weaver-results
backends:
  fixers:
    - name: fast
      model: small-model
      temperature: 0.3
"#;
        let config = WeaverConfig::from_yaml_str(yaml).expect("valid yaml");
        assert_eq!(config.max_debug_rounds, 5);
        assert_eq!(config.interpreter, "sh");
        assert_eq!(config.paths.results_dir, PathBuf::from("/tmp/weaver-results"));
        assert_eq!(config.paths.corrective_db, PathBuf::from("knowledge_base/solutions.db"));
        assert_eq!(config.backends.fixers.len(), 1);
        assert_eq!(config.backends.fixers[0].model.as_deref(), Some("small-model"));
        assert_eq!(config.backends.planner.name, "planner");
        assert_eq!(config.script_extension(), "sh");
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("WEAVER_MAX_DEBUG_ROUNDS", "7"),
            ("WEAVER_CREATIVE_K", "1"),
            ("WEAVER_KNOWLEDGE_DIR", "/data/kb"),
        ]
        .into_iter()
        .collect();

        let mut config = WeaverConfig::default();
        config
            .apply_env_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .expect("overrides apply");

        assert_eq!(config.max_debug_rounds, 7);
        assert_eq!(config.creative_k, 1);
        assert_eq!(config.paths.corrective_db, PathBuf::from("/data/kb/solutions.db"));
        assert_eq!(config.paths.solutions_log, PathBuf::from("/data/kb/solutions_log.md"));
    }

    #[test]
    fn test_env_override_invalid_number() {
        let mut config = WeaverConfig::default();
        let result = config.apply_env_overrides(|key| {
            (key == "WEAVER_SANDBOX_TIMEOUT_SECS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let config = WeaverConfig {
            sandbox_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_no_fixers() {
        let mut config = WeaverConfig::default();
        config.backends.fixers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mining_concurrency_default() {
        let config = WeaverConfig::default();
        assert_eq!(config.mining_concurrency_for(3), 6);
        assert_eq!(config.mining_concurrency_for(0), 1);
    }

    #[test]
    fn test_script_language_from_file_name() {
        let mut config = WeaverConfig::default();
        assert_eq!(config.script_extension(), "py");
        assert_eq!(config.script_language(), "python");

        config.script_file_name = "circuit.sh".to_string();
        assert_eq!(config.script_language(), "sh");
    }

    #[test]
    fn test_epilogue_defaults_by_language() {
        let mut config = WeaverConfig::default();
        let epilogue = config.epilogue().expect("python default");
        assert!(epilogue.contains(METADATA_FILE_NAME));
        assert!(config.final_artifacts.iter().any(|a| a == METADATA_FILE_NAME));

        config.finalize_epilogue = Some(String::new());
        assert!(config.epilogue().is_none());

        config.finalize_epilogue = None;
        config.script_file_name = "circuit.sh".to_string();
        assert!(config.epilogue().is_none());

        config.finalize_epilogue = Some("echo {} > meta.json".to_string());
        assert_eq!(config.epilogue(), Some("echo {} > meta.json"));
    }
}
