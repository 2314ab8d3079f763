use std::sync::Arc;

use intentbot_agent::llm::LlmError;
use intentbot_agent::{gateway_from_config, BotContext, ClassificationGateway, SlotFillingRuntime};
use intentbot_core::audit::TracingAuditSink;
use intentbot_core::config::{AppConfig, LlmConfig};
use intentbot_core::platform::{DialogPlatform, PlatformError, UserDirectory, UserLookup};
use intentbot_core::{ApplicationError, CatalogError, ConversationStateStore, IntentCatalog, UserId};
use intentbot_platform::{
    default_dispatcher, AmqpQueueTransport, PlatformClient, PlatformClientConfig, QueueBinding,
    QueueConsumer, QueueTransport, ReconnectPolicy,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::service::RuntimeMessageService;

pub struct Application {
    pub config: AppConfig,
    pub catalog: Arc<IntentCatalog>,
    pub classifier_mode: ClassifierMode,
    pub runtime: Arc<SlotFillingRuntime>,
    pub consumer: QueueConsumer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassifierMode {
    GigaChat,
    /// No credentials; every message gets the fallback reply.
    Unavailable,
}

impl ClassifierMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GigaChat => "gigachat",
            Self::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("platform client could not be created: {0}")]
    Platform(#[source] PlatformError),
    #[error("bot user `{user_id}` could not be registered: {reason}")]
    BotUser { user_id: String, reason: String },
    #[error("classifier could not be created: {0}")]
    Classifier(#[source] LlmError),
}

impl From<BootstrapError> for ApplicationError {
    fn from(value: BootstrapError) -> Self {
        match value {
            BootstrapError::Catalog(error) => Self::from(error),
            BootstrapError::Platform(error) => Self::Configuration(error.to_string()),
            error @ BootstrapError::BotUser { .. } => Self::Platform(error.to_string()),
            BootstrapError::Classifier(error) => Self::from(error),
        }
    }
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        bot_user_id = %config.bot.user_id,
        "starting application bootstrap"
    );

    let platform = PlatformClient::new(PlatformClientConfig::from_config(&config.platform))
        .map_err(BootstrapError::Platform)?;
    let transport = Arc::new(AmqpQueueTransport::new(format!("intentbot-{}", config.bot.user_id)));
    assemble(config, Arc::new(platform), transport).await
}

/// Wires the runtime over any platform adapter and queue transport.
pub async fn assemble<P>(
    config: AppConfig,
    platform: Arc<P>,
    transport: Arc<dyn QueueTransport>,
) -> Result<Application, BootstrapError>
where
    P: DialogPlatform + UserDirectory + 'static,
{
    let catalog = Arc::new(IntentCatalog::load(config.bot.intents_path.as_deref())?);
    info!(
        event_name = "system.bootstrap.catalog_loaded",
        correlation_id = "bootstrap",
        intents = catalog.len(),
        "intent catalog loaded"
    );

    let bot_user_id = UserId(config.bot.user_id.clone());
    match platform.find_or_create_user(&bot_user_id, &config.bot.name).await {
        UserLookup::Found | UserLookup::Created => {
            info!(
                event_name = "system.bootstrap.bot_user_ready",
                correlation_id = "bootstrap",
                bot_user_id = %bot_user_id,
                "bot user registered on platform"
            );
        }
        UserLookup::Failed(reason) => {
            return Err(BootstrapError::BotUser { user_id: bot_user_id.0, reason });
        }
    }

    let (gateway, classifier_mode) = classification_gateway(&config.llm)?;
    let state = ConversationStateStore::new(platform);
    let runtime = Arc::new(SlotFillingRuntime::new(
        BotContext::from_config(&config),
        state,
        gateway,
        catalog.clone(),
        Arc::new(TracingAuditSink),
    ));

    let dispatcher = default_dispatcher(RuntimeMessageService::new(runtime.clone()), bot_user_id);
    let consumer = QueueConsumer::new(
        transport,
        dispatcher,
        QueueBinding::from_config(&config),
        ReconnectPolicy::from_config(&config),
    );

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        classifier = classifier_mode.as_str(),
        transport = consumer.transport_kind(),
        auto_handle = config.bot.auto_handle,
        "application bootstrap complete"
    );

    Ok(Application { config, catalog, classifier_mode, runtime, consumer })
}

fn classification_gateway(
    llm: &LlmConfig,
) -> Result<(Arc<dyn ClassificationGateway>, ClassifierMode), BootstrapError> {
    let gateway = gateway_from_config(llm).map_err(BootstrapError::Classifier)?;
    if llm.has_credentials() {
        return Ok((gateway, ClassifierMode::GigaChat));
    }

    warn!(
        event_name = "system.bootstrap.classifier_unavailable",
        correlation_id = "bootstrap",
        "llm credentials missing; all messages will receive the fallback reply"
    );
    Ok((gateway, ClassifierMode::Unavailable))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use httpmock::prelude::*;
    use intentbot_core::config::AppConfig;
    use intentbot_core::platform::memory::InMemoryPlatform;
    use intentbot_core::platform::{UserDirectory, UserLookup};
    use intentbot_core::{ApplicationError, UserId};
    use intentbot_platform::NoopQueueTransport;

    use super::{assemble, bootstrap_with_config, BootstrapError, ClassifierMode};

    fn config_for(api_url: String) -> AppConfig {
        let mut config = AppConfig::default();
        config.platform.api_url = api_url;
        config.platform.api_key = "platform-key".to_owned().into();
        config
    }

    #[tokio::test]
    async fn bootstrap_registers_bot_user_and_runs_without_credentials() {
        let server = MockServer::start();
        let lookup = server.mock(|when, then| {
            when.method(GET).path("/api/users/bot_helper").header("X-API-Key", "platform-key");
            then.status(200).json_body(serde_json::json!({ "data": { "userId": "bot_helper" } }));
        });

        let app = bootstrap_with_config(config_for(server.url("/api")))
            .await
            .expect("bootstrap succeeds");

        lookup.assert();
        assert_eq!(app.classifier_mode, ClassifierMode::Unavailable);
        assert_eq!(app.consumer.transport_kind(), "amqp");
        assert_eq!(app.catalog.len(), 5);
    }

    #[tokio::test]
    async fn bootstrap_aborts_when_bot_user_cannot_be_registered() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/users/bot_helper");
            then.status(404);
        });
        server.mock(|when, then| {
            when.method(POST).path("/api/users");
            then.status(500).body("unavailable");
        });

        let error = bootstrap_with_config(config_for(server.url("/api")))
            .await
            .err()
            .expect("bootstrap fails");

        assert!(matches!(error, BootstrapError::BotUser { ref user_id, .. } if user_id == "bot_helper"));
        let failure = ApplicationError::from(error);
        assert_eq!(failure.class(), "platform");
        assert!(failure.into_interface("bootstrap").to_string().starts_with("service unavailable:"));
    }

    #[tokio::test]
    async fn assemble_creates_missing_bot_user() {
        let platform = Arc::new(InMemoryPlatform::new());
        let mut config = config_for("http://localhost:3000/api".to_owned());
        config.bot.user_id = "bot_router".to_owned();

        let app = assemble(config, platform.clone(), Arc::new(NoopQueueTransport)).await.expect("assembled");

        assert_eq!(app.runtime.bot().bot_user_id, UserId("bot_router".to_owned()));
        assert_eq!(app.consumer.transport_kind(), "noop");
        assert_eq!(
            platform.find_or_create_user(&UserId("bot_router".to_owned()), "Bot").await,
            UserLookup::Found
        );
    }

    #[tokio::test]
    async fn credentials_switch_on_the_gigachat_classifier() {
        let platform = Arc::new(InMemoryPlatform::new());
        let mut config = config_for("http://localhost:3000/api".to_owned());
        config.llm.client_id = Some("client".to_owned().into());
        config.llm.client_secret = Some("secret".to_owned().into());

        let app = assemble(config, platform, Arc::new(NoopQueueTransport)).await.expect("assembled");

        assert_eq!(app.classifier_mode, ClassifierMode::GigaChat);
    }
}
