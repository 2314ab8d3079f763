use intentbot_agent::{gateway_from_config, ClassificationGateway};
use intentbot_core::config::{AppConfig, LoadOptions};
use intentbot_core::IntentCatalog;

use super::{CommandResult, CONFIG_FAILURE};

/// One classification without dialog context; prints the normalised result.
pub fn run(text: &str) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::from_application(
                "classify",
                "config_validation",
                error,
                CONFIG_FAILURE,
            )
        }
    };

    let catalog = match IntentCatalog::load(config.bot.intents_path.as_deref()) {
        Ok(catalog) => catalog,
        Err(error) => {
            return CommandResult::from_application("classify", "catalog_validation", error, 1)
        }
    };

    let gateway = match gateway_from_config(&config.llm) {
        Ok(gateway) => gateway,
        Err(error) => {
            return CommandResult::from_application("classify", "classifier_setup", error, 1)
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure("classify", "runtime", error.to_string(), 1);
        }
    };

    let result = runtime.block_on(gateway.classify(text, &[], &catalog));
    match serde_json::to_string_pretty(&result) {
        Ok(output) => CommandResult::raw(0, output),
        Err(error) => CommandResult::failure("classify", "serialization", error.to_string(), 1),
    }
}
