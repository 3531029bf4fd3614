use std::path::PathBuf;
use std::time::Duration;

use genpipe_core::error::CoreError;
use genpipe_core::theme::{self, Theme, DEFAULT_THEME_ID};
use genpipe_core::workflow::DEFAULT_PROMPT_NODE_ID;
use genpipe_pipeline::coordinator::{DEFAULT_DELAY, DEFAULT_QUEUE_CAPACITY};
use genpipe_pipeline::upload::DEFAULT_MAX_SIZE_KB;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Theme(#[from] CoreError),
}

/// Credentials for the Arkiv gateway.
#[derive(Debug, Clone)]
pub struct ArkivConfig {
    pub gateway_url: String,
    pub api_key: String,
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub theme: Theme,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub comfy_host: String,
    pub comfy_port: u16,
    pub workflow_path: PathBuf,
    pub prompt_node_id: String,
    pub generation_timeout: Duration,
    pub delay: Duration,
    pub upload_enabled: bool,
    pub queue_capacity: usize,
    pub max_image_size_kb: u64,
    pub arkiv_gateway_url: Option<String>,
    pub arkiv_api_key: Option<String>,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default          |
    /// |----------------------------------|------------------|
    /// | `THEME`                          | `cats`           |
    /// | `THEME_FILE`                     | -- (overrides `THEME`) |
    /// | `DATA_DIR`                       | `data`           |
    /// | `OUTPUT_DIR`                     | `output`         |
    /// | `COMFY_HOST`                     | `127.0.0.1`      |
    /// | `COMFY_PORT`                     | `8188`           |
    /// | `WORKFLOW_JSON`                  | `workflow.json`  |
    /// | `PROMPT_NODE_ID`                 | `6`              |
    /// | `GENERATION_TIMEOUT_SECS`        | `300`            |
    /// | `DELAY_BETWEEN_GENERATIONS_SECS` | `2`              |
    /// | `UPLOAD_ENABLED`                 | `true`           |
    /// | `UPLOAD_QUEUE_SIZE`              | `5`              |
    /// | `MAX_IMAGE_SIZE_KB`              | `117`            |
    /// | `ARKIV_GATEWAY_URL`              | --               |
    /// | `ARKIV_API_KEY`                  | --               |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let theme = match var("THEME_FILE") {
            Some(path) => theme::load_from_file(&PathBuf::from(path))?,
            None => theme::builtin(&var("THEME").unwrap_or_else(|| DEFAULT_THEME_ID.into()))?,
        };

        let queue_capacity: usize =
            parse_or(var("UPLOAD_QUEUE_SIZE"), "UPLOAD_QUEUE_SIZE", DEFAULT_QUEUE_CAPACITY)?;
        if queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                var: "UPLOAD_QUEUE_SIZE",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            theme,
            data_dir: var("DATA_DIR").unwrap_or_else(|| "data".into()).into(),
            output_dir: var("OUTPUT_DIR").unwrap_or_else(|| "output".into()).into(),
            comfy_host: var("COMFY_HOST").unwrap_or_else(|| "127.0.0.1".into()),
            comfy_port: parse_or(var("COMFY_PORT"), "COMFY_PORT", 8188)?,
            workflow_path: var("WORKFLOW_JSON")
                .unwrap_or_else(|| "workflow.json".into())
                .into(),
            prompt_node_id: var("PROMPT_NODE_ID").unwrap_or_else(|| DEFAULT_PROMPT_NODE_ID.into()),
            generation_timeout: Duration::from_secs(parse_or(
                var("GENERATION_TIMEOUT_SECS"),
                "GENERATION_TIMEOUT_SECS",
                300,
            )?),
            delay: Duration::from_secs(parse_or(
                var("DELAY_BETWEEN_GENERATIONS_SECS"),
                "DELAY_BETWEEN_GENERATIONS_SECS",
                DEFAULT_DELAY.as_secs(),
            )?),
            upload_enabled: parse_bool(var("UPLOAD_ENABLED"), "UPLOAD_ENABLED", true)?,
            queue_capacity,
            max_image_size_kb: parse_or(
                var("MAX_IMAGE_SIZE_KB"),
                "MAX_IMAGE_SIZE_KB",
                DEFAULT_MAX_SIZE_KB,
            )?,
            arkiv_gateway_url: var("ARKIV_GATEWAY_URL"),
            arkiv_api_key: var("ARKIV_API_KEY"),
        })
    }

    /// Gateway credentials, or an error naming the first missing variable.
    pub fn require_arkiv(&self) -> Result<ArkivConfig, ConfigError> {
        let gateway_url = self
            .arkiv_gateway_url
            .clone()
            .ok_or(ConfigError::Missing("ARKIV_GATEWAY_URL"))?;
        let api_key = self
            .arkiv_api_key
            .clone()
            .ok_or(ConfigError::Missing("ARKIV_API_KEY"))?;
        Ok(ArkivConfig {
            gateway_url,
            api_key,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        genpipe_db::database_path(&self.data_dir, &self.theme.id)
    }
}

fn parse_or<T>(raw: Option<String>, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

fn parse_bool(raw: Option<String>, var: &'static str, default: bool) -> Result<bool, ConfigError> {
    let Some(value) = raw else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value,
            reason: "expected true or false".into(),
        }),
    }
}
