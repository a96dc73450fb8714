//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::DEFAULT_STABLE_KEYS;

mod cli;

pub use cli::{
    BulkActionArg, CliArgs, Command, CreateProjectArgs, DeployArgs, GetArgs, LikeArgs, Overrides,
    ProjectsCommand, StatusArg, WriteArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "folio";
const DEFAULT_API_BASE: &str = "https://api.github.com";
const DEFAULT_DATA_DIR: &str = "src/data";
const DEFAULT_LOCAL_ROOT: &str = "content";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SYNCED_DISPLAY_MS: u64 = 1_500;
const DEFAULT_FAILED_DISPLAY_MS: u64 = 2_000;
const DEFAULT_RETRY_MAX_ATTEMPTS: u64 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
const DEFAULT_STANDARD_STALE_SECS: u64 = 60;
const DEFAULT_STABLE_STALE_SECS: u64 = 300;
const DEFAULT_CACHE_CAPACITY: u64 = 64;
const DEFAULT_PREFERENCES_PATH: &str = ".folio/preferences.json";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub content: ContentSettings,
    pub deploy: DeploySettings,
    pub retry: RetrySettings,
    pub cache: CacheSettings,
    pub preferences: PreferenceSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    GitHub,
    Local,
    Memory,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "github" => Ok(Backend::GitHub),
            "local" => Ok(Backend::Local),
            "memory" => Ok(Backend::Memory),
            other => Err(format!(
                "unknown backend `{other}`, expected github, local or memory"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContentSettings {
    pub backend: Backend,
    pub host: ContentHostSettings,
    pub local_root: PathBuf,
}

/// Credentials and location of the repository holding the documents.
#[derive(Clone)]
pub struct ContentHostSettings {
    pub api_base: Url,
    pub owner: String,
    pub repo: String,
    pub branch: Option<String>,
    pub token: Option<String>,
    pub data_dir: String,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for ContentHostSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentHostSettings")
            .field("api_base", &self.api_base.as_str())
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("data_dir", &self.data_dir)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct DeploySettings {
    pub hook_url: Option<Url>,
    pub synced_display: Duration,
    pub failed_display: Duration,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_attempts: NonZeroU32,
    pub delay: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub standard_stale: Duration,
    pub stable_stale: Duration,
    pub stable_keys: Vec<String>,
    pub capacity: usize,
    pub serialize_per_key: bool,
}

#[derive(Debug, Clone)]
pub struct PreferenceSettings {
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("FOLIO").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    content: RawContentSettings,
    deploy: RawDeploySettings,
    retry: RawRetrySettings,
    cache: RawCacheSettings,
    preferences: RawPreferenceSettings,
    logging: RawLoggingSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(backend) = overrides.backend.as_ref() {
            self.content.backend = Some(backend.clone());
        }
        if let Some(token) = overrides.github_token.as_ref() {
            self.content.token = Some(token.clone());
        }
        if let Some(owner) = overrides.github_owner.as_ref() {
            self.content.owner = Some(owner.clone());
        }
        if let Some(repo) = overrides.github_repo.as_ref() {
            self.content.repo = Some(repo.clone());
        }
        if let Some(branch) = overrides.github_branch.as_ref() {
            self.content.branch = Some(branch.clone());
        }
        if let Some(root) = overrides.local_root.as_ref() {
            self.content.local_root = Some(root.clone());
        }
        if let Some(url) = overrides.deploy_hook_url.as_ref() {
            self.deploy.hook_url = Some(url.clone());
        }
        if let Some(attempts) = overrides.retry_max_attempts {
            self.retry.max_attempts = Some(attempts.into());
        }
        if let Some(delay) = overrides.retry_delay_ms {
            self.retry.delay_ms = Some(delay);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            content,
            deploy,
            retry,
            cache,
            preferences,
            logging,
        } = raw;

        let content = build_content_settings(content)?;
        let deploy = build_deploy_settings(deploy)?;
        let retry = build_retry_settings(retry)?;
        let cache = build_cache_settings(cache)?;
        let preferences = build_preference_settings(preferences)?;
        let logging = build_logging_settings(logging)?;

        Ok(Self {
            content,
            deploy,
            retry,
            cache,
            preferences,
            logging,
        })
    }
}

fn build_content_settings(content: RawContentSettings) -> Result<ContentSettings, LoadError> {
    let backend = match content.backend {
        Some(value) => Backend::from_str(&value)
            .map_err(|reason| LoadError::invalid("content.backend", reason))?,
        None => Backend::GitHub,
    };

    let api_base = content
        .api_base
        .as_deref()
        .unwrap_or(DEFAULT_API_BASE)
        .trim()
        .to_string();
    let api_base = parse_url(&api_base, "content.api_base")?;

    let owner = non_blank(content.owner).unwrap_or_default();
    let repo = non_blank(content.repo).unwrap_or_default();
    if backend == Backend::GitHub {
        if owner.is_empty() {
            return Err(LoadError::invalid(
                "content.owner",
                "required for the github backend",
            ));
        }
        if repo.is_empty() {
            return Err(LoadError::invalid(
                "content.repo",
                "required for the github backend",
            ));
        }
    }

    let data_dir = non_blank(content.data_dir).unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
    let data_dir = data_dir.trim_matches('/').to_string();
    if data_dir.is_empty() {
        return Err(LoadError::invalid(
            "content.data_dir",
            "path must not be empty",
        ));
    }

    let timeout_secs = content
        .request_timeout_seconds
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "content.request_timeout_seconds",
            "must be greater than zero",
        ));
    }

    let local_root = content
        .local_root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_ROOT));
    if local_root.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "content.local_root",
            "path must not be empty",
        ));
    }

    Ok(ContentSettings {
        backend,
        host: ContentHostSettings {
            api_base,
            owner,
            repo,
            branch: non_blank(content.branch),
            token: non_blank(content.token),
            data_dir,
            request_timeout: Duration::from_secs(timeout_secs),
        },
        local_root,
    })
}

fn build_deploy_settings(deploy: RawDeploySettings) -> Result<DeploySettings, LoadError> {
    let hook_url = match non_blank(deploy.hook_url) {
        Some(value) => Some(parse_url(&value, "deploy.hook_url")?),
        None => None,
    };
    let synced_ms = deploy
        .synced_display_ms
        .unwrap_or(DEFAULT_SYNCED_DISPLAY_MS);
    let failed_ms = deploy
        .failed_display_ms
        .unwrap_or(DEFAULT_FAILED_DISPLAY_MS);
    let timeout_secs = deploy
        .request_timeout_seconds
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "deploy.request_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(DeploySettings {
        hook_url,
        synced_display: Duration::from_millis(synced_ms),
        failed_display: Duration::from_millis(failed_ms),
        request_timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_retry_settings(retry: RawRetrySettings) -> Result<RetrySettings, LoadError> {
    let attempts = retry.max_attempts.unwrap_or(DEFAULT_RETRY_MAX_ATTEMPTS);
    let max_attempts = non_zero_u32(attempts, "retry.max_attempts")?;
    let delay = Duration::from_millis(retry.delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS));
    Ok(RetrySettings {
        max_attempts,
        delay,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let standard_secs = cache
        .standard_stale_seconds
        .unwrap_or(DEFAULT_STANDARD_STALE_SECS);
    let stable_secs = cache
        .stable_stale_seconds
        .unwrap_or(DEFAULT_STABLE_STALE_SECS);

    let capacity_value = cache.capacity.unwrap_or(DEFAULT_CACHE_CAPACITY);
    if capacity_value == 0 {
        return Err(LoadError::invalid(
            "cache.capacity",
            "must be greater than zero",
        ));
    }
    let capacity = usize::try_from(capacity_value).map_err(|_| {
        LoadError::invalid("cache.capacity", "value exceeds supported range for usize")
    })?;

    let stable_keys = match cache.stable_keys {
        Some(keys) => keys
            .into_iter()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .collect(),
        None => DEFAULT_STABLE_KEYS.iter().map(|key| key.to_string()).collect(),
    };

    Ok(CacheSettings {
        standard_stale: Duration::from_secs(standard_secs),
        stable_stale: Duration::from_secs(stable_secs),
        stable_keys,
        capacity,
        serialize_per_key: cache.serialize_per_key.unwrap_or(false),
    })
}

fn build_preference_settings(
    preferences: RawPreferenceSettings,
) -> Result<PreferenceSettings, LoadError> {
    let path = preferences
        .path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PREFERENCES_PATH));
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "preferences.path",
            "path must not be empty",
        ));
    }
    Ok(PreferenceSettings { path })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawContentSettings {
    backend: Option<String>,
    api_base: Option<String>,
    owner: Option<String>,
    repo: Option<String>,
    branch: Option<String>,
    token: Option<String>,
    data_dir: Option<String>,
    request_timeout_seconds: Option<u64>,
    local_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDeploySettings {
    hook_url: Option<String>,
    synced_display_ms: Option<u64>,
    failed_display_ms: Option<u64>,
    request_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRetrySettings {
    max_attempts: Option<u64>,
    delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    standard_stale_seconds: Option<u64>,
    stable_stale_seconds: Option<u64>,
    stable_keys: Option<Vec<String>>,
    capacity: Option<u64>,
    serialize_per_key: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPreferenceSettings {
    path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn parse_url(value: &str, key: &'static str) -> Result<Url, LoadError> {
    let url = Url::parse(value).map_err(|err| LoadError::invalid(key, format!("{err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(LoadError::invalid(
            key,
            format!("unsupported scheme `{other}`"),
        )),
    }
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
