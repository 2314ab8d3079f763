use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub queue: QueueConfig,
    pub bot: BotConfig,
    pub llm: LlmConfig,
    pub platform: PlatformConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub url: String,
    pub exchange: String,
    pub reconnect_interval_secs: u64,
    pub message_ttl_ms: u64,
}

#[derive(Clone, Debug)]
pub struct BotConfig {
    pub user_id: String,
    pub name: String,
    /// Enables follow-up questions for incomplete classifications.
    pub auto_handle: bool,
    pub max_questions: u32,
    pub context_window: u32,
    pub intents_path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub auth_url: String,
    pub base_url: String,
    pub client_id: Option<SecretString>,
    pub client_secret: Option<SecretString>,
    pub scope: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub timeout_secs: u64,
    pub token_ttl_secs: u64,
    pub compact_catalog: bool,
    pub max_prompt_examples: u32,
}

impl LlmConfig {
    pub fn has_credentials(&self) -> bool {
        non_blank(self.client_id.as_ref()) && non_blank(self.client_secret.as_ref())
    }
}

#[derive(Clone, Debug)]
pub struct PlatformConfig {
    pub api_url: String,
    pub api_key: SecretString,
    pub tenant_id: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
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
    pub log_level: Option<String>,
    pub bot_user_id: Option<String>,
    pub auto_handle: Option<bool>,
    pub max_questions: Option<u32>,
    pub intents_path: Option<PathBuf>,
    pub llm_model: Option<String>,
    pub platform_api_url: Option<String>,
    pub platform_api_key: Option<String>,
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
            queue: QueueConfig {
                url: "amqp://localhost:5672".to_string(),
                exchange: "chat3_updates".to_string(),
                reconnect_interval_secs: 30,
                message_ttl_ms: 3_600_000,
            },
            bot: BotConfig {
                user_id: "bot_helper".to_string(),
                name: "Helper Bot".to_string(),
                auto_handle: false,
                max_questions: 5,
                context_window: 10,
                intents_path: None,
            },
            llm: LlmConfig {
                auth_url: "https://ngw.devices.sberbank.ru:9443/api/v2/oauth".to_string(),
                base_url: "https://gigachat.devices.sberbank.ru/api/v1".to_string(),
                client_id: None,
                client_secret: None,
                scope: "GIGACHAT_API_PERS".to_string(),
                model: "GigaChat-2".to_string(),
                temperature: 0.1,
                max_tokens: 1500,
                top_p: 0.1,
                timeout_secs: 30,
                token_ttl_secs: 25 * 60,
                compact_catalog: false,
                max_prompt_examples: 2,
            },
            platform: PlatformConfig {
                api_url: "http://localhost:3000/api".to_string(),
                api_key: String::new().into(),
                tenant_id: "tnt_default".to_string(),
                timeout_secs: 15,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

fn non_blank(value: Option<&SecretString>) -> bool {
    value.is_some_and(|secret| !secret.expose_secret().trim().is_empty())
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("intentbot.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Routing and queue names derived from the bot identity.
    pub fn queue_name(&self) -> String {
        format!("bot_{}_updates", self.bot.user_id)
    }

    pub fn routing_key(&self) -> String {
        format!("update.dialog.bot.{}.*", self.bot.user_id)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(queue) = patch.queue {
            if let Some(url) = queue.url {
                self.queue.url = url;
            }
            if let Some(exchange) = queue.exchange {
                self.queue.exchange = exchange;
            }
            if let Some(reconnect_interval_secs) = queue.reconnect_interval_secs {
                self.queue.reconnect_interval_secs = reconnect_interval_secs;
            }
            if let Some(message_ttl_ms) = queue.message_ttl_ms {
                self.queue.message_ttl_ms = message_ttl_ms;
            }
        }

        if let Some(bot) = patch.bot {
            if let Some(user_id) = bot.user_id {
                self.bot.user_id = user_id;
            }
            if let Some(name) = bot.name {
                self.bot.name = name;
            }
            if let Some(auto_handle) = bot.auto_handle {
                self.bot.auto_handle = auto_handle;
            }
            if let Some(max_questions) = bot.max_questions {
                self.bot.max_questions = max_questions;
            }
            if let Some(context_window) = bot.context_window {
                self.bot.context_window = context_window;
            }
            if let Some(intents_path) = bot.intents_path {
                self.bot.intents_path = Some(intents_path);
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(auth_url) = llm.auth_url {
                self.llm.auth_url = auth_url;
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(llm_client_id_value) = llm.client_id {
                self.llm.client_id = Some(secret_value(llm_client_id_value));
            }
            if let Some(llm_client_secret_value) = llm.client_secret {
                self.llm.client_secret = Some(secret_value(llm_client_secret_value));
            }
            if let Some(scope) = llm.scope {
                self.llm.scope = scope;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
            if let Some(top_p) = llm.top_p {
                self.llm.top_p = top_p;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(token_ttl_secs) = llm.token_ttl_secs {
                self.llm.token_ttl_secs = token_ttl_secs;
            }
            if let Some(compact_catalog) = llm.compact_catalog {
                self.llm.compact_catalog = compact_catalog;
            }
            if let Some(max_prompt_examples) = llm.max_prompt_examples {
                self.llm.max_prompt_examples = max_prompt_examples;
            }
        }

        if let Some(platform) = patch.platform {
            if let Some(api_url) = platform.api_url {
                self.platform.api_url = api_url;
            }
            if let Some(platform_api_key_value) = platform.api_key {
                self.platform.api_key = secret_value(platform_api_key_value);
            }
            if let Some(tenant_id) = platform.tenant_id {
                self.platform.tenant_id = tenant_id;
            }
            if let Some(timeout_secs) = platform.timeout_secs {
                self.platform.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
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
        if let Some(value) = read_env("INTENTBOT_QUEUE_URL") {
            self.queue.url = value;
        }
        if let Some(value) = read_env("INTENTBOT_QUEUE_EXCHANGE") {
            self.queue.exchange = value;
        }
        if let Some(value) = read_env("INTENTBOT_QUEUE_RECONNECT_INTERVAL_SECS") {
            self.queue.reconnect_interval_secs =
                parse_u64("INTENTBOT_QUEUE_RECONNECT_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("INTENTBOT_QUEUE_MESSAGE_TTL_MS") {
            self.queue.message_ttl_ms = parse_u64("INTENTBOT_QUEUE_MESSAGE_TTL_MS", &value)?;
        }

        if let Some(value) = read_env("INTENTBOT_BOT_USER_ID") {
            self.bot.user_id = value;
        }
        if let Some(value) = read_env("INTENTBOT_BOT_NAME") {
            self.bot.name = value;
        }
        if let Some(value) = read_env("INTENTBOT_BOT_AUTO_HANDLE") {
            self.bot.auto_handle = parse_bool("INTENTBOT_BOT_AUTO_HANDLE", &value)?;
        }
        if let Some(value) = read_env("INTENTBOT_BOT_MAX_QUESTIONS") {
            self.bot.max_questions = parse_u32("INTENTBOT_BOT_MAX_QUESTIONS", &value)?;
        }
        if let Some(value) = read_env("INTENTBOT_BOT_CONTEXT_WINDOW") {
            self.bot.context_window = parse_u32("INTENTBOT_BOT_CONTEXT_WINDOW", &value)?;
        }
        if let Some(value) = read_env("INTENTBOT_BOT_INTENTS_PATH") {
            self.bot.intents_path = Some(PathBuf::from(value));
        }

        if let Some(value) = read_env("INTENTBOT_LLM_AUTH_URL") {
            self.llm.auth_url = value;
        }
        if let Some(value) = read_env("INTENTBOT_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("INTENTBOT_LLM_CLIENT_ID") {
            self.llm.client_id = Some(secret_value(value));
        }
        if let Some(value) = read_env("INTENTBOT_LLM_CLIENT_SECRET") {
            self.llm.client_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("INTENTBOT_LLM_SCOPE") {
            self.llm.scope = value;
        }
        if let Some(value) = read_env("INTENTBOT_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("INTENTBOT_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("INTENTBOT_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("INTENTBOT_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_u32("INTENTBOT_LLM_MAX_TOKENS", &value)?;
        }
        if let Some(value) = read_env("INTENTBOT_LLM_TOP_P") {
            self.llm.top_p = parse_f32("INTENTBOT_LLM_TOP_P", &value)?;
        }
        if let Some(value) = read_env("INTENTBOT_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("INTENTBOT_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("INTENTBOT_LLM_TOKEN_TTL_SECS") {
            self.llm.token_ttl_secs = parse_u64("INTENTBOT_LLM_TOKEN_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("INTENTBOT_LLM_COMPACT_CATALOG") {
            self.llm.compact_catalog = parse_bool("INTENTBOT_LLM_COMPACT_CATALOG", &value)?;
        }
        if let Some(value) = read_env("INTENTBOT_LLM_MAX_PROMPT_EXAMPLES") {
            self.llm.max_prompt_examples =
                parse_u32("INTENTBOT_LLM_MAX_PROMPT_EXAMPLES", &value)?;
        }

        if let Some(value) = read_env("INTENTBOT_PLATFORM_API_URL") {
            self.platform.api_url = value;
        }
        if let Some(value) = read_env("INTENTBOT_PLATFORM_API_KEY") {
            self.platform.api_key = secret_value(value);
        }
        if let Some(value) = read_env("INTENTBOT_PLATFORM_TENANT_ID") {
            self.platform.tenant_id = value;
        }
        if let Some(value) = read_env("INTENTBOT_PLATFORM_TIMEOUT_SECS") {
            self.platform.timeout_secs = parse_u64("INTENTBOT_PLATFORM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("INTENTBOT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("INTENTBOT_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("INTENTBOT_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("INTENTBOT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("INTENTBOT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("INTENTBOT_LOGGING_LEVEL").or_else(|| read_env("INTENTBOT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("INTENTBOT_LOGGING_FORMAT").or_else(|| read_env("INTENTBOT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(bot_user_id) = overrides.bot_user_id {
            self.bot.user_id = bot_user_id;
        }
        if let Some(auto_handle) = overrides.auto_handle {
            self.bot.auto_handle = auto_handle;
        }
        if let Some(max_questions) = overrides.max_questions {
            self.bot.max_questions = max_questions;
        }
        if let Some(intents_path) = overrides.intents_path {
            self.bot.intents_path = Some(intents_path);
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(platform_api_url) = overrides.platform_api_url {
            self.platform.api_url = platform_api_url;
        }
        if let Some(platform_api_key) = overrides.platform_api_key {
            self.platform.api_key = secret_value(platform_api_key);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_queue(&self.queue)?;
        validate_bot(&self.bot)?;
        validate_llm(&self.llm)?;
        validate_platform(&self.platform)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("intentbot.toml"), PathBuf::from("config/intentbot.toml")]
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

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn validate_queue(queue: &QueueConfig) -> Result<(), ConfigError> {
    let url = queue.url.trim();
    if !url.starts_with("amqp://") && !url.starts_with("amqps://") {
        return Err(ConfigError::Validation(
            "queue.url must be an AMQP URL (`amqp://...` or `amqps://...`)".to_string(),
        ));
    }

    if queue.exchange.trim().is_empty() {
        return Err(ConfigError::Validation("queue.exchange must not be empty".to_string()));
    }

    if queue.reconnect_interval_secs == 0 || queue.reconnect_interval_secs > 3600 {
        return Err(ConfigError::Validation(
            "queue.reconnect_interval_secs must be in range 1..=3600".to_string(),
        ));
    }

    if queue.message_ttl_ms == 0 {
        return Err(ConfigError::Validation(
            "queue.message_ttl_ms must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_bot(bot: &BotConfig) -> Result<(), ConfigError> {
    if bot.user_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "bot.user_id is required; it must match the bot user on the conversation platform"
                .to_string(),
        ));
    }

    if bot.max_questions > 50 {
        return Err(ConfigError::Validation(
            "bot.max_questions must be in range 0..=50".to_string(),
        ));
    }

    if bot.context_window == 0 || bot.context_window > 100 {
        return Err(ConfigError::Validation(
            "bot.context_window must be in range 1..=100".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if !is_http_url(&llm.auth_url) || !is_http_url(&llm.base_url) {
        return Err(ConfigError::Validation(
            "llm.auth_url and llm.base_url must start with http:// or https://".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&llm.top_p) {
        return Err(ConfigError::Validation("llm.top_p must be in range 0.0..=1.0".to_string()));
    }

    if llm.max_tokens == 0 {
        return Err(ConfigError::Validation(
            "llm.max_tokens must be greater than zero".to_string(),
        ));
    }

    if llm.token_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "llm.token_ttl_secs must be greater than zero".to_string(),
        ));
    }

    let has_id = non_blank(llm.client_id.as_ref());
    let has_secret = non_blank(llm.client_secret.as_ref());
    if has_id != has_secret {
        return Err(ConfigError::Validation(
            "llm.client_id and llm.client_secret must be configured together".to_string(),
        ));
    }

    Ok(())
}

fn validate_platform(platform: &PlatformConfig) -> Result<(), ConfigError> {
    if !is_http_url(&platform.api_url) {
        return Err(ConfigError::Validation(
            "platform.api_url must start with http:// or https://".to_string(),
        ));
    }

    if platform.api_key.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "platform.api_key is required. Set INTENTBOT_PLATFORM_API_KEY or [platform] api_key"
                .to_string(),
        ));
    }

    if platform.tenant_id.trim().is_empty() {
        return Err(ConfigError::Validation("platform.tenant_id must not be empty".to_string()));
    }

    if platform.timeout_secs == 0 || platform.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "platform.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
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

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid(key, value))
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| invalid(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| invalid(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    queue: Option<QueuePatch>,
    bot: Option<BotPatch>,
    llm: Option<LlmPatch>,
    platform: Option<PlatformPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct QueuePatch {
    url: Option<String>,
    exchange: Option<String>,
    reconnect_interval_secs: Option<u64>,
    message_ttl_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct BotPatch {
    user_id: Option<String>,
    name: Option<String>,
    auto_handle: Option<bool>,
    max_questions: Option<u32>,
    context_window: Option<u32>,
    intents_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    auth_url: Option<String>,
    base_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    scope: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    top_p: Option<f32>,
    timeout_secs: Option<u64>,
    token_ttl_secs: Option<u64>,
    compact_catalog: Option<bool>,
    max_prompt_examples: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct PlatformPatch {
    api_url: Option<String>,
    api_key: Option<String>,
    tenant_id: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_match_documented_values() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("INTENTBOT_PLATFORM_API_KEY", "key-defaults");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.queue.url == "amqp://localhost:5672", "default queue url")?;
            ensure(config.queue.exchange == "chat3_updates", "default exchange")?;
            ensure(config.bot.user_id == "bot_helper", "default bot user")?;
            ensure(!config.bot.auto_handle, "auto handle is off by default")?;
            ensure(config.bot.max_questions == 5, "default question budget")?;
            ensure(config.bot.context_window == 10, "default context window")?;
            ensure(config.llm.model == "GigaChat-2", "default model")?;
            ensure(config.llm.max_tokens == 1500, "default max tokens")?;
            ensure(!config.llm.has_credentials(), "no llm credentials by default")?;
            ensure(config.platform.tenant_id == "tnt_default", "default tenant")?;
            ensure(config.queue_name() == "bot_bot_helper_updates", "queue name")?;
            ensure(config.routing_key() == "update.dialog.bot.bot_helper.*", "routing key")?;
            Ok(())
        })();

        clear_vars(&["INTENTBOT_PLATFORM_API_KEY"]);
        result
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_PLATFORM_KEY", "platform-from-env");
        env::set_var("TEST_LLM_SECRET", "llm-secret-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("intentbot.toml");
            fs::write(
                &path,
                r#"
[platform]
api_key = "${TEST_PLATFORM_KEY}"

[llm]
client_id = "intentbot"
client_secret = "${TEST_LLM_SECRET}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.platform.api_key.expose_secret() == "platform-from-env",
                "platform key should be loaded from environment",
            )?;
            ensure(config.llm.has_credentials(), "llm credentials should be complete")?;
            Ok(())
        })();

        clear_vars(&["TEST_PLATFORM_KEY", "TEST_LLM_SECRET"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("INTENTBOT_PLATFORM_API_KEY", "key-logging");
        env::set_var("INTENTBOT_LOG_LEVEL", "warn");
        env::set_var("INTENTBOT_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["INTENTBOT_PLATFORM_API_KEY", "INTENTBOT_LOG_LEVEL", "INTENTBOT_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("INTENTBOT_BOT_USER_ID", "bot_from_env");
        env::set_var("INTENTBOT_PLATFORM_API_KEY", "key-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("intentbot.toml");
            fs::write(
                &path,
                r#"
[bot]
user_id = "bot_from_file"
max_questions = 3
auto_handle = true

[platform]
api_key = "key-from-file"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    max_questions: Some(2),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.bot.max_questions == 2, "override question budget should win")?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.bot.auto_handle, "file value should win over default")?;
            ensure(config.bot.user_id == "bot_from_env", "env bot id should win over file")?;
            ensure(
                config.platform.api_key.expose_secret() == "key-from-env",
                "env api key should win over file and defaults",
            )?;
            Ok(())
        })();

        clear_vars(&["INTENTBOT_BOT_USER_ID", "INTENTBOT_PLATFORM_API_KEY"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        clear_vars(&["INTENTBOT_PLATFORM_API_KEY"]);

        let error = match AppConfig::load(LoadOptions::default()) {
            Ok(_) => return Err("expected validation failure but config load succeeded".to_string()),
            Err(error) => error,
        };
        let has_message = matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("platform.api_key")
        );
        ensure(has_message, "validation failure should mention platform.api_key")
    }

    #[test]
    fn half_configured_llm_credentials_are_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("INTENTBOT_PLATFORM_API_KEY", "key-llm");
        env::set_var("INTENTBOT_LLM_CLIENT_ID", "intentbot");

        let result = match AppConfig::load(LoadOptions::default()) {
            Ok(_) => Err("expected validation failure for missing client secret".to_string()),
            Err(ConfigError::Validation(message)) => {
                ensure(message.contains("llm.client_secret"), "message should name the secret")
            }
            Err(other) => Err(format!("unexpected error: {other}")),
        };

        clear_vars(&["INTENTBOT_PLATFORM_API_KEY", "INTENTBOT_LLM_CLIENT_ID"]);
        result
    }

    #[test]
    fn malformed_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("INTENTBOT_PLATFORM_API_KEY", "key-numeric");
        env::set_var("INTENTBOT_BOT_MAX_QUESTIONS", "five");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => {
                ensure(key == "INTENTBOT_BOT_MAX_QUESTIONS", "error should name the variable")
            }
            Ok(_) => Err("expected invalid override error".to_string()),
            Err(other) => Err(format!("unexpected error: {other}")),
        };

        clear_vars(&["INTENTBOT_PLATFORM_API_KEY", "INTENTBOT_BOT_MAX_QUESTIONS"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("INTENTBOT_PLATFORM_API_KEY", "platform-secret-value");
        env::set_var("INTENTBOT_LLM_CLIENT_ID", "client-id-value");
        env::set_var("INTENTBOT_LLM_CLIENT_SECRET", "client-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("platform-secret-value"),
                "debug output should not contain platform key",
            )?;
            ensure(
                !debug.contains("client-secret-value"),
                "debug output should not contain llm client secret",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&[
            "INTENTBOT_PLATFORM_API_KEY",
            "INTENTBOT_LLM_CLIENT_ID",
            "INTENTBOT_LLM_CLIENT_SECRET",
        ]);
        result
    }
}
