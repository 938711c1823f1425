//! Configuration management for forgeline
//!
//! Settings are loaded from environment variables with defaults, once, at
//! startup. The resulting [`ForgelineConfig`] is passed to every component
//! that needs it; nothing reads the environment after that.
//!
//! # Environment Variables
//!
//! - `FORGELINE_LANGUAGE`: Source-language tag served by this worker - default: "dotnet"
//! - `FORGELINE_AGENTS_PATH`: Agent toolchain root - default: "/opt/forgeline/agents"
//! - `FORGELINE_MODULES_PATH`: Module toolchain root - default: "/opt/forgeline/modules"
//! - `FORGELINE_BUILD_DIR`: Where finished payloads are collected - default: "<agents path>/build"
//! - `FORGELINE_ARTIFACT_STORE_URL`: Upload endpoint base - default: "http://api:5000/api/v1/payload"
//! - `FORGELINE_SHELL`: Shell used to run build commands - default: "/bin/bash"
//! - `FORGELINE_STAGE_TIMEOUT`: Per-stage deadline in seconds, 0 disables it - default: "0"
//! - `FORGELINE_UPLOAD_TIMEOUT`: Upload timeout in seconds - default: "300"
//! - `FORGELINE_MAX_CONCURRENT_BUILDS`: Requests handled at once - default: "4"
//! - `FORGELINE_SOURCE_LABEL`: `source` field of error notifications - default: "<language> build server"
//! - `FORGELINE_STRICT_TEMPLATE_VALUES`: Reject shell metacharacters in substituted values - default: "false"
//! - `FORGELINE_LOG_LEVEL`: Logging level - default: "info"
//!
//! # Example
//!
//! ```no_run
//! use forgeline::ForgelineConfig;
//!
//! let config = ForgelineConfig::default();
//! config.validate().expect("Invalid configuration");
//! println!("{}", config);
//! ```

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_LANGUAGE: &str = "dotnet";
const DEFAULT_AGENTS_PATH: &str = "/opt/forgeline/agents";
const DEFAULT_MODULES_PATH: &str = "/opt/forgeline/modules";
const DEFAULT_ARTIFACT_STORE_URL: &str = "http://api:5000/api/v1/payload";
const DEFAULT_SHELL: &str = "/bin/bash";
const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 0;
const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_CONCURRENT_BUILDS: usize = 4;
const DEFAULT_LOG_LEVEL: &str = "info";

const MAX_CONCURRENT_BUILDS_LIMIT: usize = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Worker configuration, built once at startup
#[derive(Debug, Clone)]
pub struct ForgelineConfig {
    /// Language tag; selects descriptor files and the module working directory
    pub language: String,

    pub agents_path: PathBuf,

    pub modules_path: PathBuf,

    /// Destination for relocated payload artifacts
    pub build_dir: PathBuf,

    /// Base URL; uploads go to `{base}/{record_id}/file/`
    pub artifact_store_url: String,

    pub shell: String,

    /// Per-stage deadline in seconds, 0 means none
    pub stage_timeout_secs: u64,

    pub upload_timeout_secs: u64,

    pub max_concurrent_builds: usize,

    /// Value of the `source` field on error notifications
    pub source_label: String,

    /// Reject shell metacharacters in request values spliced into command lines
    pub strict_template_values: bool,

    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ForgelineConfig {
    fn default() -> Self {
        let language = env_string("FORGELINE_LANGUAGE").unwrap_or_else(|| DEFAULT_LANGUAGE.into());

        let agents_path = env_string("FORGELINE_AGENTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_AGENTS_PATH));

        let modules_path = env_string("FORGELINE_MODULES_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODULES_PATH));

        let build_dir = env_string("FORGELINE_BUILD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| agents_path.join("build"));

        let artifact_store_url = env_string("FORGELINE_ARTIFACT_STORE_URL")
            .unwrap_or_else(|| DEFAULT_ARTIFACT_STORE_URL.to_string());

        let shell = env_string("FORGELINE_SHELL").unwrap_or_else(|| DEFAULT_SHELL.to_string());

        let stage_timeout_secs = env_parse("FORGELINE_STAGE_TIMEOUT")
            .unwrap_or(DEFAULT_STAGE_TIMEOUT_SECS);

        let upload_timeout_secs = env_parse("FORGELINE_UPLOAD_TIMEOUT")
            .unwrap_or(DEFAULT_UPLOAD_TIMEOUT_SECS);

        let max_concurrent_builds = env_parse("FORGELINE_MAX_CONCURRENT_BUILDS")
            .unwrap_or(DEFAULT_MAX_CONCURRENT_BUILDS);

        let source_label = env_string("FORGELINE_SOURCE_LABEL")
            .unwrap_or_else(|| format!("{} build server", language));

        let strict_template_values =
            env_parse("FORGELINE_STRICT_TEMPLATE_VALUES").unwrap_or(false);

        let log_level = env::var("FORGELINE_LOG_LEVEL")
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
            .to_lowercase();

        Self {
            language,
            agents_path,
            modules_path,
            build_dir,
            artifact_store_url,
            shell,
            stage_timeout_secs,
            upload_timeout_secs,
            max_concurrent_builds,
            source_label,
            strict_template_values,
            log_level,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.trim().parse::<T>().ok())
}

impl ForgelineConfig {
    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a value is empty, out of range or malformed
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.language.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Language must not be empty".to_string(),
            ));
        }
        if self
            .language
            .contains(['/', '\\', ':', '*', '?', '"', '<', '>', '|'])
        {
            return Err(ConfigError::ValidationFailed(format!(
                "Language '{}' must be usable as a directory name",
                self.language
            )));
        }

        if self.shell.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Shell must not be empty".to_string(),
            ));
        }

        if !self.artifact_store_url.starts_with("http://")
            && !self.artifact_store_url.starts_with("https://")
        {
            return Err(ConfigError::ValidationFailed(format!(
                "Artifact store URL must be http(s): {}",
                self.artifact_store_url
            )));
        }

        if self.upload_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Upload timeout must be at least 1 second".to_string(),
            ));
        }

        if self.max_concurrent_builds == 0 || self.max_concurrent_builds > MAX_CONCURRENT_BUILDS_LIMIT
        {
            return Err(ConfigError::ValidationFailed(format!(
                "Max concurrent builds must be between 1 and {}",
                MAX_CONCURRENT_BUILDS_LIMIT
            )));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        Ok(())
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        (self.stage_timeout_secs > 0).then(|| Duration::from_secs(self.stage_timeout_secs))
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn agent_descriptor_name(&self) -> String {
        format!("BuildAgent.{}.json", self.language)
    }

    pub fn module_descriptor_name(&self) -> String {
        format!("BuildModule.{}.json", self.language)
    }

    /// Working directory of an agent type's toolchain
    pub fn agent_working_dir(&self, agent_name: &str) -> PathBuf {
        self.agents_path.join(agent_name)
    }

    /// Working directory shared by every module of the configured language
    pub fn module_working_dir(&self) -> PathBuf {
        self.modules_path.join(&self.language)
    }
}

impl fmt::Display for ForgelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Forgeline Configuration:")?;
        writeln!(f, "  Language: {}", self.language)?;
        writeln!(f, "  Agents Path: {}", self.agents_path.display())?;
        writeln!(f, "  Modules Path: {}", self.modules_path.display())?;
        writeln!(f, "  Build Dir: {}", self.build_dir.display())?;
        writeln!(f, "  Artifact Store: {}", self.artifact_store_url)?;
        writeln!(f, "  Shell: {}", self.shell)?;
        match self.stage_timeout() {
            Some(timeout) => writeln!(f, "  Stage Timeout: {}s", timeout.as_secs())?,
            None => writeln!(f, "  Stage Timeout: none")?,
        }
        writeln!(f, "  Upload Timeout: {}s", self.upload_timeout_secs)?;
        writeln!(f, "  Max Concurrent Builds: {}", self.max_concurrent_builds)?;
        writeln!(f, "  Strict Template Values: {}", self.strict_template_values)?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}
