use intentbot_core::config::{AppConfig, LoadOptions};
use intentbot_core::{ApplicationError, IntentCatalog, UserId};
use intentbot_platform::{PlatformClient, PlatformClientConfig};
use serde::Serialize;

use super::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult::raw(exit_code, output);
    }

    CommandResult::raw(exit_code, render_human(&report))
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_catalog(&config));
            checks.push(check_platform(&config));
            checks.push(check_llm_credentials(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["intent_catalog", "platform_reachability", "llm_credentials"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_catalog(config: &AppConfig) -> DoctorCheck {
    match IntentCatalog::load(config.bot.intents_path.as_deref()) {
        Ok(catalog) => DoctorCheck {
            name: "intent_catalog",
            status: CheckStatus::Pass,
            details: format!("{} intents loaded", catalog.len()),
        },
        Err(error) => {
            DoctorCheck { name: "intent_catalog", status: CheckStatus::Fail, details: error.to_string() }
        }
    }
}

fn check_platform(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "platform_reachability",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let bot_user_id = UserId(config.bot.user_id.clone());
    let result = runtime.block_on(async {
        let client = PlatformClient::new(PlatformClientConfig::from_config(&config.platform))?;
        client.user_exists(&bot_user_id).await
    });

    match result {
        Ok(true) => DoctorCheck {
            name: "platform_reachability",
            status: CheckStatus::Pass,
            details: format!("bot user `{bot_user_id}` found at `{}`", config.platform.api_url),
        },
        Ok(false) => DoctorCheck {
            name: "platform_reachability",
            status: CheckStatus::Pass,
            details: format!("platform reachable; bot user `{bot_user_id}` will be created on start"),
        },
        Err(error) => DoctorCheck {
            name: "platform_reachability",
            status: CheckStatus::Fail,
            details: format!(
                "bot user lookup failed: {}",
                ApplicationError::from(error).into_interface("cli-doctor")
            ),
        },
    }
}

fn check_llm_credentials(config: &AppConfig) -> DoctorCheck {
    if config.llm.has_credentials() {
        DoctorCheck {
            name: "llm_credentials",
            status: CheckStatus::Pass,
            details: format!("client credentials configured for model `{}`", config.llm.model),
        }
    } else {
        DoctorCheck {
            name: "llm_credentials",
            status: CheckStatus::Fail,
            details: "INTENTBOT_LLM_CLIENT_ID / INTENTBOT_LLM_CLIENT_SECRET not set; every message would get the fallback reply"
                .to_string(),
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
