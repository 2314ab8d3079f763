use intentbot_core::config::{AppConfig, LoadOptions};
use intentbot_core::IntentCatalog;

use super::{CommandResult, CONFIG_FAILURE};

/// Renders the catalog exactly as the classifier prompt embeds it.
pub fn run(compact: bool) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::from_application(
                "catalog",
                "config_validation",
                error,
                CONFIG_FAILURE,
            )
        }
    };

    match IntentCatalog::load(config.bot.intents_path.as_deref()) {
        Ok(catalog) => CommandResult::raw(
            0,
            catalog.prompt_json(
                compact || config.llm.compact_catalog,
                config.llm.max_prompt_examples as usize,
            ),
        ),
        Err(error) => CommandResult::from_application("catalog", "catalog_validation", error, 1),
    }
}
