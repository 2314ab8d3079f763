use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use intentbot_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

use super::{CommandResult, CONFIG_FAILURE};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::raw(CONFIG_FAILURE, format!("config validation failed: {error}"))
        }
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_key: &str| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let entries: Vec<(&str, &str, String)> = vec![
        ("queue.url", "INTENTBOT_QUEUE_URL", config.queue.url.clone()),
        ("queue.exchange", "INTENTBOT_QUEUE_EXCHANGE", config.queue.exchange.clone()),
        (
            "queue.reconnect_interval_secs",
            "INTENTBOT_QUEUE_RECONNECT_INTERVAL_SECS",
            config.queue.reconnect_interval_secs.to_string(),
        ),
        (
            "queue.message_ttl_ms",
            "INTENTBOT_QUEUE_MESSAGE_TTL_MS",
            config.queue.message_ttl_ms.to_string(),
        ),
        ("bot.user_id", "INTENTBOT_BOT_USER_ID", config.bot.user_id.clone()),
        ("bot.name", "INTENTBOT_BOT_NAME", config.bot.name.clone()),
        ("bot.auto_handle", "INTENTBOT_BOT_AUTO_HANDLE", config.bot.auto_handle.to_string()),
        ("bot.max_questions", "INTENTBOT_BOT_MAX_QUESTIONS", config.bot.max_questions.to_string()),
        (
            "bot.context_window",
            "INTENTBOT_BOT_CONTEXT_WINDOW",
            config.bot.context_window.to_string(),
        ),
        (
            "bot.intents_path",
            "INTENTBOT_BOT_INTENTS_PATH",
            config
                .bot
                .intents_path
                .as_ref()
                .map_or_else(|| "<built-in>".to_string(), |path| path.display().to_string()),
        ),
        ("llm.auth_url", "INTENTBOT_LLM_AUTH_URL", config.llm.auth_url.clone()),
        ("llm.base_url", "INTENTBOT_LLM_BASE_URL", config.llm.base_url.clone()),
        ("llm.client_id", "INTENTBOT_LLM_CLIENT_ID", redact_optional(config.llm.client_id.as_ref())),
        (
            "llm.client_secret",
            "INTENTBOT_LLM_CLIENT_SECRET",
            redact_optional(config.llm.client_secret.as_ref()),
        ),
        ("llm.scope", "INTENTBOT_LLM_SCOPE", config.llm.scope.clone()),
        ("llm.model", "INTENTBOT_LLM_MODEL", config.llm.model.clone()),
        ("llm.temperature", "INTENTBOT_LLM_TEMPERATURE", config.llm.temperature.to_string()),
        ("llm.max_tokens", "INTENTBOT_LLM_MAX_TOKENS", config.llm.max_tokens.to_string()),
        ("llm.top_p", "INTENTBOT_LLM_TOP_P", config.llm.top_p.to_string()),
        ("llm.timeout_secs", "INTENTBOT_LLM_TIMEOUT_SECS", config.llm.timeout_secs.to_string()),
        (
            "llm.compact_catalog",
            "INTENTBOT_LLM_COMPACT_CATALOG",
            config.llm.compact_catalog.to_string(),
        ),
        ("platform.api_url", "INTENTBOT_PLATFORM_API_URL", config.platform.api_url.clone()),
        (
            "platform.api_key",
            "INTENTBOT_PLATFORM_API_KEY",
            redact_secret(config.platform.api_key.expose_secret()),
        ),
        ("platform.tenant_id", "INTENTBOT_PLATFORM_TENANT_ID", config.platform.tenant_id.clone()),
        (
            "server.bind_address",
            "INTENTBOT_SERVER_BIND_ADDRESS",
            config.server.bind_address.clone(),
        ),
        (
            "server.health_check_port",
            "INTENTBOT_SERVER_HEALTH_CHECK_PORT",
            config.server.health_check_port.to_string(),
        ),
        ("logging.level", "INTENTBOT_LOGGING_LEVEL", config.logging.level.clone()),
        ("logging.format", "INTENTBOT_LOGGING_FORMAT", format!("{:?}", config.logging.format)),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(
        entries
            .into_iter()
            .map(|(key, env_key, value)| render_line(key, &value, source(key, env_key))),
    );
    lines.push(format!("- derived.queue = {}", config.queue_name()));
    lines.push(format!("- derived.routing_key = {}", config.routing_key()));

    CommandResult::raw(0, lines.join("\n"))
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("intentbot.toml"), PathBuf::from("config/intentbot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: &str) -> String {
    if secret.trim().is_empty() {
        "<empty>".to_string()
    } else {
        "<redacted>".to_string()
    }
}

fn redact_optional(secret: Option<&SecretString>) -> String {
    secret.map_or_else(|| "<unset>".to_string(), |secret| redact_secret(secret.expose_secret()))
}
