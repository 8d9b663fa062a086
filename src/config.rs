//! `config.toml` loading.
//!
//! A missing or broken config file never stops the binary: problems come back
//! as warnings and the defaults are used instead.

use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use promptgrid_core::{
    DiagnosticPolicy, EchoProvider, EvaluatorConfig, GenerationProvider, HttpProvider,
    HttpProviderConfig,
};

const MAX_CONFIG_FILE_BYTES: u64 = 1_048_576; // 1 MiB

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Http,
    Echo,
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(ProviderKind::Http),
            "echo" => Ok(ProviderKind::Echo),
            other => Err(format!("unknown provider '{}' (expected http or echo)", other)),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    provider: Option<ProviderSection>,
    defaults: Option<DefaultsSection>,
    evaluator: Option<EvaluatorSection>,
    log: Option<LogSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProviderSection {
    kind: Option<ProviderKind>,
    endpoint: Option<String>,
    api_key_env: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DefaultsSection {
    model: Option<String>,
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EvaluatorSection {
    diagnostic_policy: Option<String>,
    image_to_video_models: Option<Vec<String>>,
    cascade_loads_sheets: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LogSection {
    level: Option<String>,
}

/// Resolved binary configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub provider: ProviderKind,
    pub endpoint: Option<String>,
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub evaluator: EvaluatorConfig,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Http,
            endpoint: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 30,
            evaluator: EvaluatorConfig::default(),
            log_level: "warn".to_string(),
        }
    }
}

impl Config {
    /// Build the configured generation provider.
    pub fn build_provider(&self) -> anyhow::Result<Arc<dyn GenerationProvider>> {
        match self.provider {
            ProviderKind::Echo => Ok(Arc::new(EchoProvider)),
            ProviderKind::Http => {
                let mut http = HttpProviderConfig {
                    api_key: std::env::var(&self.api_key_env)
                        .ok()
                        .filter(|k| !k.trim().is_empty()),
                    timeout_secs: self.timeout_secs,
                    ..HttpProviderConfig::default()
                };
                if let Some(endpoint) = &self.endpoint {
                    http.endpoint = endpoint.clone();
                }
                if http.api_key.is_none() {
                    tracing::warn!(env = %self.api_key_env, "no API key set for http provider");
                }
                Ok(Arc::new(HttpProvider::new(http)?))
            }
        }
    }
}

fn parse_policy(value: &str) -> Option<DiagnosticPolicy> {
    match value.trim().to_ascii_lowercase().as_str() {
        "propagate" => Some(DiagnosticPolicy::Propagate),
        "fail-dependent" | "fail_dependent" => Some(DiagnosticPolicy::FailDependent),
        _ => None,
    }
}

fn user_config_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("", "", "promptgrid")?;
    let mut path = proj.config_dir().to_path_buf();
    path.push("config.toml");
    Some(path)
}

fn read_config_file(path: &Path, explicit: bool, warnings: &mut Vec<String>) -> Option<ConfigFile> {
    if !path.exists() {
        if explicit {
            warnings.push(format!("Config file not found: {}", path.display()));
        }
        return None;
    }
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > MAX_CONFIG_FILE_BYTES => {
            warnings.push(format!(
                "Refusing to read {}: file too large ({} bytes, max {})",
                path.display(),
                meta.len(),
                MAX_CONFIG_FILE_BYTES
            ));
            None
        }
        Ok(_) => match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<ConfigFile>(&content) {
                Ok(parsed) => Some(parsed),
                Err(err) => {
                    warnings.push(format!("Failed to parse {}: {}", path.display(), err));
                    None
                }
            },
            Err(err) => {
                warnings.push(format!("Failed to read {}: {}", path.display(), err));
                None
            }
        },
        Err(err) => {
            warnings.push(format!(
                "Failed to read metadata for {}: {}",
                path.display(),
                err
            ));
            None
        }
    }
}

/// Load `config_file`, or the user config file when none is given.
pub fn load_config(config_file: Option<&PathBuf>) -> (Config, Vec<String>) {
    let mut warnings = Vec::new();
    let path = config_file.cloned().or_else(user_config_path);
    let file = path
        .as_ref()
        .and_then(|p| read_config_file(p, config_file.is_some(), &mut warnings))
        .unwrap_or_default();
    let config = apply_config_file(file, &mut warnings);
    (config, warnings)
}

fn apply_config_file(file: ConfigFile, warnings: &mut Vec<String>) -> Config {
    let mut config = Config::default();

    if let Some(provider) = file.provider {
        if let Some(kind) = provider.kind {
            config.provider = kind;
        }
        config.endpoint = provider.endpoint.filter(|e| !e.trim().is_empty());
        if let Some(env) = provider.api_key_env.filter(|e| !e.trim().is_empty()) {
            config.api_key_env = env;
        }
        match provider.timeout_secs {
            Some(0) => warnings.push("provider.timeout_secs must be positive; using 30".to_string()),
            Some(secs) => config.timeout_secs = secs,
            None => {}
        }
    }
    config.evaluator.provider_timeout = Duration::from_secs(config.timeout_secs);

    if let Some(defaults) = file.defaults {
        if let Some(model) = defaults.model.filter(|m| !m.trim().is_empty()) {
            config.evaluator.default_model = model;
        }
        match defaults.temperature {
            Some(t) if (0.0..=2.0).contains(&t) => config.evaluator.default_temperature = t,
            Some(t) => warnings.push(format!(
                "defaults.temperature {} out of range (0.0 - 2.0); ignored",
                t
            )),
            None => {}
        }
    }

    if let Some(evaluator) = file.evaluator {
        if let Some(policy) = evaluator.diagnostic_policy {
            match parse_policy(&policy) {
                Some(policy) => config.evaluator.diagnostic_policy = policy,
                None => warnings.push(format!(
                    "Unknown diagnostic_policy '{}' (expected propagate or fail-dependent)",
                    policy
                )),
            }
        }
        if let Some(models) = evaluator.image_to_video_models {
            config.evaluator.image_to_video_models = models;
        }
        if let Some(load) = evaluator.cascade_loads_sheets {
            config.evaluator.cascade_loads_sheets = load;
        }
    }

    if let Some(level) = file.log.and_then(|l| l.level) {
        config.log_level = level;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> (Config, Vec<String>) {
        let mut warnings = Vec::new();
        let file: ConfigFile = toml::from_str(content).unwrap();
        let config = apply_config_file(file, &mut warnings);
        (config, warnings)
    }

    #[test]
    fn test_defaults_without_file() {
        let (config, warnings) = parse("");
        assert!(warnings.is_empty());
        assert_eq!(config.provider, ProviderKind::Http);
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.evaluator.provider_timeout, Duration::from_secs(30));
        assert_eq!(config.evaluator.diagnostic_policy, DiagnosticPolicy::Propagate);
    }

    #[test]
    fn test_full_file() {
        let (config, warnings) = parse(
            r#"
[provider]
kind = "echo"
endpoint = "http://localhost:8080/v1/chat/completions"
api_key_env = "LOCAL_KEY"
timeout_secs = 5

[defaults]
model = "llama3"
temperature = 0.2

[evaluator]
diagnostic_policy = "fail-dependent"
image_to_video_models = ["animate"]
cascade_loads_sheets = false

[log]
level = "debug"
"#,
        );
        assert!(warnings.is_empty());
        assert_eq!(config.provider, ProviderKind::Echo);
        assert_eq!(config.api_key_env, "LOCAL_KEY");
        assert_eq!(config.evaluator.provider_timeout, Duration::from_secs(5));
        assert_eq!(config.evaluator.default_model, "llama3");
        assert_eq!(config.evaluator.default_temperature, 0.2);
        assert_eq!(
            config.evaluator.diagnostic_policy,
            DiagnosticPolicy::FailDependent
        );
        assert_eq!(config.evaluator.image_to_video_models, vec!["animate"]);
        assert!(!config.evaluator.cascade_loads_sheets);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_bad_values_warn() {
        let (config, warnings) = parse(
            r#"
[defaults]
temperature = 9.0

[evaluator]
diagnostic_policy = "explode"
"#,
        );
        assert_eq!(warnings.len(), 2);
        assert_eq!(config.evaluator.diagnostic_policy, DiagnosticPolicy::Propagate);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(toml::from_str::<ConfigFile>("[provider]\nmodel = \"x\"\n").is_err());
    }

    #[test]
    fn test_missing_explicit_file_warns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let (config, warnings) = load_config(Some(&path));
        assert_eq!(config.provider, ProviderKind::Http);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("Config file not found"));
    }

    #[test]
    fn test_unparsable_file_warns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[log\nlevel=").unwrap();
        let (_, warnings) = load_config(Some(&path));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("Failed to parse"));
    }
}
