use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ids::ChannelId;
use crate::engine::{EngineSettings, DEFAULT_STAR_EMOJI};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub discord: DiscordConfig,
    pub starboard: StarboardConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DiscordConfig {
    pub bot_token: SecretString,
    pub api_base_url: String,
    pub gateway_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct StarboardConfig {
    pub channel_id: String,
    pub star_emoji: String,
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub create_if_missing: bool,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub bot_token: Option<String>,
    pub starboard_channel_id: Option<String>,
    pub star_emoji: Option<String>,
    pub store_path: Option<PathBuf>,
    pub create_store_if_missing: Option<bool>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            discord: DiscordConfig {
                bot_token: String::new().into(),
                api_base_url: "https://discord.com/api/v10".to_string(),
                gateway_url: "wss://gateway.discord.gg/?v=10&encoding=json".to_string(),
                request_timeout_secs: 10,
            },
            starboard: StarboardConfig {
                channel_id: String::new(),
                star_emoji: DEFAULT_STAR_EMOJI.to_string(),
            },
            store: StoreConfig {
                path: PathBuf::from("starboard_data.json"),
                create_if_missing: false,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("starboard.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Settings the highlight engine needs out of the loaded configuration.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            highlight_channel_id: ChannelId(self.starboard.channel_id.trim().to_string()),
            star_emoji: self.starboard.star_emoji.clone(),
            api_timeout: Duration::from_secs(self.discord.request_timeout_secs),
        }
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(discord) = patch.discord {
            if let Some(bot_token) = discord.bot_token {
                self.discord.bot_token = bot_token.into();
            }
            if let Some(api_base_url) = discord.api_base_url {
                self.discord.api_base_url = api_base_url;
            }
            if let Some(gateway_url) = discord.gateway_url {
                self.discord.gateway_url = gateway_url;
            }
            if let Some(request_timeout_secs) = discord.request_timeout_secs {
                self.discord.request_timeout_secs = request_timeout_secs;
            }
        }

        if let Some(starboard) = patch.starboard {
            if let Some(channel_id) = starboard.channel_id {
                self.starboard.channel_id = channel_id;
            }
            if let Some(star_emoji) = starboard.star_emoji {
                self.starboard.star_emoji = star_emoji;
            }
        }

        if let Some(store) = patch.store {
            if let Some(path) = store.path {
                self.store.path = path;
            }
            if let Some(create_if_missing) = store.create_if_missing {
                self.store.create_if_missing = create_if_missing;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("STARBOARD_DISCORD_BOT_TOKEN") {
            self.discord.bot_token = value.into();
        }
        if let Some(value) = read_env("STARBOARD_DISCORD_API_BASE_URL") {
            self.discord.api_base_url = value;
        }
        if let Some(value) = read_env("STARBOARD_DISCORD_GATEWAY_URL") {
            self.discord.gateway_url = value;
        }
        if let Some(value) = read_env("STARBOARD_DISCORD_REQUEST_TIMEOUT_SECS") {
            self.discord.request_timeout_secs =
                parse_u64("STARBOARD_DISCORD_REQUEST_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("STARBOARD_CHANNEL_ID") {
            self.starboard.channel_id = value;
        }
        if let Some(value) = read_env("STARBOARD_STAR_EMOJI") {
            self.starboard.star_emoji = value;
        }

        if let Some(value) = read_env("STARBOARD_STORE_PATH") {
            self.store.path = PathBuf::from(value);
        }
        if let Some(value) = read_env("STARBOARD_STORE_CREATE_IF_MISSING") {
            self.store.create_if_missing =
                parse_bool("STARBOARD_STORE_CREATE_IF_MISSING", &value)?;
        }

        let log_level =
            read_env("STARBOARD_LOGGING_LEVEL").or_else(|| read_env("STARBOARD_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("STARBOARD_LOGGING_FORMAT").or_else(|| read_env("STARBOARD_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(bot_token) = overrides.bot_token {
            self.discord.bot_token = bot_token.into();
        }
        if let Some(channel_id) = overrides.starboard_channel_id {
            self.starboard.channel_id = channel_id;
        }
        if let Some(star_emoji) = overrides.star_emoji {
            self.starboard.star_emoji = star_emoji;
        }
        if let Some(store_path) = overrides.store_path {
            self.store.path = store_path;
        }
        if let Some(create_if_missing) = overrides.create_store_if_missing {
            self.store.create_if_missing = create_if_missing;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_discord(&self.discord)?;
        validate_starboard(&self.starboard)?;
        validate_store(&self.store)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("starboard.toml"), PathBuf::from("config/starboard.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_discord(discord: &DiscordConfig) -> Result<(), ConfigError> {
    if discord.bot_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "discord.bot_token is required. Get it from https://discord.com/developers/applications > Your App > Bot".to_string(),
        ));
    }

    let base_url = discord.api_base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "discord.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    let gateway_url = discord.gateway_url.trim();
    if !gateway_url.starts_with("ws://") && !gateway_url.starts_with("wss://") {
        return Err(ConfigError::Validation(
            "discord.gateway_url must start with ws:// or wss://".to_string(),
        ));
    }

    if discord.request_timeout_secs == 0 || discord.request_timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "discord.request_timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    Ok(())
}

fn validate_starboard(starboard: &StarboardConfig) -> Result<(), ConfigError> {
    let channel_id = starboard.channel_id.trim();
    if channel_id.is_empty() {
        return Err(ConfigError::Validation(
            "starboard.channel_id is required (the channel highlights are posted to)".to_string(),
        ));
    }
    if !channel_id.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(ConfigError::Validation(format!(
            "starboard.channel_id must be a numeric channel id, got `{channel_id}`"
        )));
    }

    if starboard.star_emoji.trim().is_empty() {
        return Err(ConfigError::Validation("starboard.star_emoji must not be empty".to_string()));
    }

    Ok(())
}

fn validate_store(store: &StoreConfig) -> Result<(), ConfigError> {
    if store.path.as_os_str().is_empty() {
        return Err(ConfigError::Validation("store.path must not be empty".to_string()));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    discord: Option<DiscordPatch>,
    starboard: Option<StarboardPatch>,
    store: Option<StorePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DiscordPatch {
    bot_token: Option<String>,
    api_base_url: Option<String>,
    gateway_url: Option<String>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct StarboardPatch {
    channel_id: Option<String>,
    star_emoji: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StorePatch {
    path: Option<PathBuf>,
    create_if_missing: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
