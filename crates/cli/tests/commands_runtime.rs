use std::env;
use std::sync::{Mutex, OnceLock};

use httpmock::prelude::*;
use intentbot_cli::commands::{catalog, classify, config, doctor};
use serde_json::{json, Value};

#[test]
fn config_redacts_secrets_and_attributes_env_sources() {
    with_env(
        &[("INTENTBOT_PLATFORM_API_KEY", "platform-secret-value"), ("INTENTBOT_BOT_USER_ID", "bot_router")],
        || {
            let result = config::run();
            assert_eq!(result.exit_code, 0);
            assert!(!result.output.contains("platform-secret-value"));
            assert!(result.output.contains(
                "- platform.api_key = <redacted> (source: env (INTENTBOT_PLATFORM_API_KEY))"
            ));
            assert!(result
                .output
                .contains("- bot.user_id = bot_router (source: env (INTENTBOT_BOT_USER_ID))"));
            assert!(result.output.contains("- llm.client_secret = <unset> (source: default)"));
            assert!(result.output.contains("- derived.queue = bot_bot_router_updates"));
        },
    );
}

#[test]
fn config_reports_validation_failure_without_platform_key() {
    with_env(&[], || {
        let result = config::run();
        assert_eq!(result.exit_code, 2);
        assert!(result.output.contains("platform.api_key"));
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_fails() {
    with_env(&[], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 1);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "fail");
        assert_eq!(payload["checks"][0]["name"], "config_validation");
        assert_eq!(payload["checks"][0]["status"], "fail");
        for index in 1..4 {
            assert_eq!(payload["checks"][index]["status"], "skipped");
        }
    });
}

#[test]
fn doctor_checks_platform_and_flags_missing_llm_credentials() {
    let server = MockServer::start();
    let lookup = server.mock(|when, then| {
        when.method(GET)
            .path("/api/users/bot_helper")
            .header("X-API-Key", "platform-key")
            .header("X-Tenant-ID", "tnt_default");
        then.status(200).json_body(json!({ "data": { "userId": "bot_helper" } }));
    });
    let api_url = server.url("/api");

    with_env(
        &[("INTENTBOT_PLATFORM_API_KEY", "platform-key"), ("INTENTBOT_PLATFORM_API_URL", api_url.as_str())],
        || {
            let result = doctor::run(true);
            let payload = parse_payload(&result.output);

            let status_of = |name: &str| {
                payload["checks"]
                    .as_array()
                    .and_then(|checks| checks.iter().find(|check| check["name"] == name))
                    .map(|check| check["status"].clone())
                    .unwrap_or(Value::Null)
            };
            assert_eq!(status_of("config_validation"), "pass");
            assert_eq!(status_of("intent_catalog"), "pass");
            assert_eq!(status_of("platform_reachability"), "pass");
            assert_eq!(status_of("llm_credentials"), "fail");
            assert_eq!(payload["overall_status"], "fail");
            assert_eq!(result.exit_code, 1);
        },
    );

    lookup.assert();
}

#[test]
fn doctor_human_output_marks_unreachable_platform() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/users/bot_helper");
        then.status(503);
    });
    let api_url = server.url("/api");

    with_env(
        &[("INTENTBOT_PLATFORM_API_KEY", "platform-key"), ("INTENTBOT_PLATFORM_API_URL", api_url.as_str())],
        || {
            let result = doctor::run(false);
            assert!(last_line(&result.output).starts_with("- [fail] llm_credentials"));
            assert!(result.output.contains(
                "- [fail] platform_reachability: bot user lookup failed: service unavailable: platform failure:"
            ));
        },
    );
}

#[test]
fn catalog_prints_compact_prompt_json() {
    with_env(&[("INTENTBOT_PLATFORM_API_KEY", "platform-key")], || {
        let result = catalog::run(true);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output.lines().count(), 1);

        let payload = parse_payload(&result.output);
        let ids: Vec<&str> = payload
            .as_array()
            .map(|intents| intents.iter().filter_map(|intent| intent["intent"].as_str()).collect())
            .unwrap_or_default();
        assert!(ids.contains(&"support_billing"));
        assert!(ids.contains(&"default_intent"));
    });
}

#[test]
fn catalog_reports_config_failure() {
    with_env(&[], || {
        let result = catalog::run(false);
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "catalog");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn catalog_reports_unreadable_intents_file() {
    with_env(
        &[
            ("INTENTBOT_PLATFORM_API_KEY", "platform-key"),
            ("INTENTBOT_BOT_INTENTS_PATH", "/nonexistent/intentbot/intents.toml"),
        ],
        || {
            let result = catalog::run(false);
            assert_eq!(result.exit_code, 1);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["error_class"], "catalog_validation");
            assert!(payload["message"]
                .as_str()
                .is_some_and(|message| message.starts_with("internal error:")));
        },
    );
}

#[test]
fn classify_without_credentials_returns_unknown_intent() {
    with_env(&[("INTENTBOT_PLATFORM_API_KEY", "platform-key")], || {
        let result = classify::run("Здравствуйте");
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "unknown_intent");
        assert_eq!(payload["intent"], "default_intent");
        assert!(payload["error"].is_string());
    });
}

#[test]
fn classify_runs_the_configured_model() {
    let server = MockServer::start();
    let token = server.mock(|when, then| {
        when.method(POST).path("/oauth").header_exists("RqUID");
        then.status(200).json_body(json!({ "access_token": "tok-1", "expires_at": 4_102_444_800_000_i64 }));
    });
    let completion = server.mock(|when, then| {
        when.method(POST)
            .path("/api/v1/chat/completions")
            .header("Authorization", "Bearer tok-1")
            .body_includes("списали деньги дважды");
        then.status(200).json_body(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "{\"status\":\"success\",\"intent\":\"support_billing\",\"data\":{\"order_id\":\"12345\",\"reason\":\"двойное списание\"}}"
                }
            }]
        }));
    });
    let auth_url = server.url("/oauth");
    let base_url = server.url("/api/v1");

    with_env(
        &[
            ("INTENTBOT_PLATFORM_API_KEY", "platform-key"),
            ("INTENTBOT_LLM_CLIENT_ID", "client"),
            ("INTENTBOT_LLM_CLIENT_SECRET", "secret"),
            ("INTENTBOT_LLM_AUTH_URL", auth_url.as_str()),
            ("INTENTBOT_LLM_BASE_URL", base_url.as_str()),
        ],
        || {
            let result = classify::run("По заказу 12345 списали деньги дважды");
            assert_eq!(result.exit_code, 0);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["status"], "success");
            assert_eq!(payload["intent"], "support_billing");
            assert_eq!(payload["data"]["order_id"], "12345");
        },
    );

    token.assert();
    completion.assert();
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn last_line(output: &str) -> &str {
    output.lines().last().unwrap_or_default()
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "INTENTBOT_QUEUE_URL",
        "INTENTBOT_QUEUE_EXCHANGE",
        "INTENTBOT_BOT_USER_ID",
        "INTENTBOT_BOT_NAME",
        "INTENTBOT_BOT_AUTO_HANDLE",
        "INTENTBOT_BOT_MAX_QUESTIONS",
        "INTENTBOT_BOT_INTENTS_PATH",
        "INTENTBOT_LLM_AUTH_URL",
        "INTENTBOT_LLM_BASE_URL",
        "INTENTBOT_LLM_CLIENT_ID",
        "INTENTBOT_LLM_CLIENT_SECRET",
        "INTENTBOT_LLM_MODEL",
        "INTENTBOT_LLM_COMPACT_CATALOG",
        "INTENTBOT_PLATFORM_API_URL",
        "INTENTBOT_PLATFORM_API_KEY",
        "INTENTBOT_PLATFORM_TENANT_ID",
        "INTENTBOT_LOGGING_LEVEL",
        "INTENTBOT_LOGGING_FORMAT",
        "INTENTBOT_LOG_LEVEL",
        "INTENTBOT_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        match value {
            Some(value) => env::set_var(key, value),
            None => env::remove_var(key),
        }
    }
}
