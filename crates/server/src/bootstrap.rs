use std::sync::Arc;
use std::time::Duration;

use starboard_core::config::{AppConfig, ConfigError, LoadOptions};
use starboard_core::{ApiError, HighlightEngine, HighlightStore, StoreLoadError};
use starboard_gateway::events::starboard_dispatcher;
use starboard_gateway::rest::{DiscordRestClient, RestSettings};
use starboard_gateway::socket::{GatewayRunner, ReconnectPolicy};
use starboard_gateway::transport::{
    DiscordGatewayTransport, GatewaySettings, GUILD_MESSAGE_REACTIONS,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub engine: Arc<HighlightEngine<DiscordRestClient>>,
    pub gateway_runner: GatewayRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("highlight store could not be loaded: {0}")]
    Store(#[from] StoreLoadError),
    #[error("discord client could not be built: {0}")]
    Client(#[source] ApiError),
}

#[cfg(test)]
pub fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config)
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let store = if config.store.create_if_missing {
        HighlightStore::load_or_create(&config.store.path)?
    } else {
        HighlightStore::load(&config.store.path)?
    };
    let client = DiscordRestClient::new(RestSettings {
        base_url: config.discord.api_base_url.clone(),
        bot_token: config.discord.bot_token.clone(),
        timeout: Duration::from_secs(config.discord.request_timeout_secs),
    })
    .map_err(BootstrapError::Client)?;

    let engine = Arc::new(HighlightEngine::new(client, Arc::new(store), config.engine_settings()));
    let transport = DiscordGatewayTransport::new(GatewaySettings {
        url: config.discord.gateway_url.clone(),
        bot_token: config.discord.bot_token.clone(),
        intents: GUILD_MESSAGE_REACTIONS,
    });
    let gateway_runner = GatewayRunner::new(
        Arc::new(transport),
        Arc::new(starboard_dispatcher(Arc::clone(&engine))),
        ReconnectPolicy::default(),
    );

    info!(
        event_name = "system.bootstrap.engine_ready",
        correlation_id = "bootstrap",
        highlight_channel_id = %engine.settings().highlight_channel_id,
        star_emoji = %engine.settings().star_emoji,
        "highlight engine wired to gateway dispatcher"
    );

    Ok(Application { config, engine, gateway_runner })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use starboard_core::config::{ConfigOverrides, LoadOptions};
    use starboard_core::{
        ChannelId, CommunityId, IgnoreReason, MessageId, ReactionKind, ReactionSignal, SyncOutcome,
    };

    use super::{bootstrap, BootstrapError};

    fn options(store_path: &Path, create_if_missing: bool) -> LoadOptions {
        LoadOptions {
            config_path: Some(store_path.with_file_name("absent-starboard.toml")),
            require_file: false,
            overrides: ConfigOverrides {
                bot_token: Some("test-token".to_owned()),
                starboard_channel_id: Some("900".to_owned()),
                store_path: Some(store_path.to_path_buf()),
                create_store_if_missing: Some(create_if_missing),
                ..ConfigOverrides::default()
            },
        }
    }

    #[test]
    fn bootstrap_fails_fast_without_bot_token() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut options = options(&dir.path().join("starboard_data.json"), true);
        options.overrides.bot_token = Some(String::new());

        let result = bootstrap(options);
        assert!(matches!(result, Err(BootstrapError::Config(_))));
    }

    #[tokio::test]
    async fn missing_store_is_fatal_unless_creation_is_enabled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store_path = dir.path().join("starboard_data.json");

        let result = bootstrap(options(&store_path, false));
        assert!(matches!(result, Err(BootstrapError::Store(_))));
        assert!(!store_path.exists());

        let app = bootstrap(options(&store_path, true)).expect("bootstrap creates store");
        assert!(store_path.exists());
        assert_eq!(app.engine.store().snapshot().await.record_count(), 0);
    }

    #[test]
    fn corrupt_store_aborts_startup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store_path = dir.path().join("starboard_data.json");
        std::fs::write(&store_path, "{not json").expect("write corrupt store");

        let result = bootstrap(options(&store_path, true));
        assert!(matches!(result, Err(BootstrapError::Store(_))));
    }

    #[tokio::test]
    async fn wired_engine_filters_reactions_in_the_highlight_channel() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = bootstrap(options(&dir.path().join("starboard_data.json"), true))
            .expect("bootstrap");

        let outcome = app
            .engine
            .handle_reaction(&ReactionSignal {
                kind: ReactionKind::Added,
                emoji: "⭐".to_owned(),
                message_id: MessageId("1".to_owned()),
                channel_id: ChannelId("900".to_owned()),
                community_id: Some(CommunityId("100".to_owned())),
                user_id: None,
            })
            .await
            .expect("filtered reactions never error");

        assert_eq!(outcome, SyncOutcome::Ignored(IgnoreReason::HighlightChannel));
    }
}
