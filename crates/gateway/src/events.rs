use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;
use starboard_core::{
    ChannelId, ChatApi, CommunityId, HighlightEngine, MessageId, ReactionKind, ReactionSignal,
    SyncError, SyncOutcome, UserId,
};
use thiserror::Error;
use tracing::warn;

pub const REACTION_ADD_DISPATCH: &str = "MESSAGE_REACTION_ADD";
pub const REACTION_REMOVE_DISPATCH: &str = "MESSAGE_REACTION_REMOVE";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayEnvelope {
    pub envelope_id: String,
    pub event: GatewayEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GatewayEvent {
    ReactionAdded(ReactionEvent),
    ReactionRemoved(ReactionEvent),
    Unsupported { event_type: String },
}

impl GatewayEvent {
    pub fn event_type(&self) -> GatewayEventType {
        match self {
            Self::ReactionAdded(_) => GatewayEventType::ReactionAdded,
            Self::ReactionRemoved(_) => GatewayEventType::ReactionRemoved,
            Self::Unsupported { .. } => GatewayEventType::Unsupported,
        }
    }

    /// Decodes a gateway dispatch by its event name. Names other than the reaction
    /// add/remove dispatches become [`GatewayEvent::Unsupported`].
    pub fn from_dispatch(event_type: &str, data: serde_json::Value) -> Result<Self, serde_json::Error> {
        match event_type {
            REACTION_ADD_DISPATCH => {
                serde_json::from_value::<ReactionDispatch>(data).map(|raw| Self::ReactionAdded(raw.into()))
            }
            REACTION_REMOVE_DISPATCH => serde_json::from_value::<ReactionDispatch>(data)
                .map(|raw| Self::ReactionRemoved(raw.into())),
            other => Ok(Self::Unsupported { event_type: other.to_owned() }),
        }
    }

    pub fn reaction(&self) -> Option<&ReactionEvent> {
        match self {
            Self::ReactionAdded(event) | Self::ReactionRemoved(event) => Some(event),
            Self::Unsupported { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GatewayEventType {
    ReactionAdded,
    ReactionRemoved,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactionEvent {
    pub channel_id: String,
    pub message_id: String,
    pub guild_id: Option<String>,
    pub user_id: Option<String>,
    pub emoji: String,
}

impl ReactionEvent {
    pub fn to_signal(&self, kind: ReactionKind) -> ReactionSignal {
        ReactionSignal {
            kind,
            emoji: self.emoji.clone(),
            message_id: MessageId(self.message_id.clone()),
            channel_id: ChannelId(self.channel_id.clone()),
            community_id: self.guild_id.clone().map(CommunityId),
            user_id: self.user_id.clone().map(UserId),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReactionDispatch {
    channel_id: String,
    message_id: String,
    #[serde(default)]
    guild_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    emoji: DispatchEmoji,
}

#[derive(Debug, Deserialize)]
struct DispatchEmoji {
    #[serde(default)]
    name: Option<String>,
}

impl From<ReactionDispatch> for ReactionEvent {
    fn from(raw: ReactionDispatch) -> Self {
        Self {
            channel_id: raw.channel_id,
            message_id: raw.message_id,
            guild_id: raw.guild_id.filter(|id| !id.is_empty()),
            user_id: raw.user_id,
            emoji: raw.emoji.name.unwrap_or_default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Synchronized(SyncOutcome),
    Ignored,
}

#[derive(Debug, Error)]
pub enum EventHandlerError {
    #[error(transparent)]
    Sync(#[from] SyncError),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_types(&self) -> &'static [GatewayEventType];
    async fn handle(
        &self,
        envelope: &GatewayEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<GatewayEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        let handler: Arc<dyn EventHandler> = Arc::new(handler);
        for event_type in handler.event_types() {
            self.handlers.insert(*event_type, Arc::clone(&handler));
        }
    }

    pub async fn dispatch(
        &self,
        envelope: &GatewayEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Feeds star reactions into the highlight engine.
pub struct StarboardReactionHandler<A> {
    engine: Arc<HighlightEngine<A>>,
}

impl<A> StarboardReactionHandler<A>
where
    A: ChatApi,
{
    pub fn new(engine: Arc<HighlightEngine<A>>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl<A> EventHandler for StarboardReactionHandler<A>
where
    A: ChatApi + 'static,
{
    fn event_types(&self) -> &'static [GatewayEventType] {
        &[GatewayEventType::ReactionAdded, GatewayEventType::ReactionRemoved]
    }

    async fn handle(
        &self,
        envelope: &GatewayEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let signal = match &envelope.event {
            GatewayEvent::ReactionAdded(event) => event.to_signal(ReactionKind::Added),
            GatewayEvent::ReactionRemoved(event) => event.to_signal(ReactionKind::Removed),
            GatewayEvent::Unsupported { .. } => return Ok(HandlerResult::Ignored),
        };

        match self.engine.handle_reaction(&signal).await {
            Ok(outcome) => Ok(HandlerResult::Synchronized(outcome)),
            Err(error) => {
                warn!(
                    event_name = "starboard.sync.failed",
                    correlation_id = %ctx.correlation_id,
                    message_id = %signal.message_id,
                    error_kind = error.kind(),
                    permission_denied = error.is_permission_denied(),
                    error = %error,
                    "highlight synchronization aborted for this event"
                );
                Err(error.into())
            }
        }
    }
}

pub fn starboard_dispatcher<A>(engine: Arc<HighlightEngine<A>>) -> EventDispatcher
where
    A: ChatApi + 'static,
{
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(StarboardReactionHandler::new(engine));
    dispatcher
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        EventContext, EventDispatcher, GatewayEnvelope, GatewayEvent, GatewayEventType,
        HandlerResult, ReactionEvent, REACTION_ADD_DISPATCH, REACTION_REMOVE_DISPATCH,
    };
    use starboard_core::ReactionKind;

    #[test]
    fn decodes_reaction_add_dispatch() {
        let event = GatewayEvent::from_dispatch(
            REACTION_ADD_DISPATCH,
            json!({
                "user_id": "10",
                "channel_id": "20",
                "message_id": "30",
                "guild_id": "40",
                "emoji": { "id": null, "name": "⭐" },
                "burst": false
            }),
        )
        .expect("decode");

        assert_eq!(
            event,
            GatewayEvent::ReactionAdded(ReactionEvent {
                channel_id: "20".to_owned(),
                message_id: "30".to_owned(),
                guild_id: Some("40".to_owned()),
                user_id: Some("10".to_owned()),
                emoji: "⭐".to_owned(),
            })
        );
        assert_eq!(event.event_type(), GatewayEventType::ReactionAdded);
    }

    #[test]
    fn direct_message_reaction_has_no_community() {
        let event = GatewayEvent::from_dispatch(
            REACTION_REMOVE_DISPATCH,
            json!({ "user_id": "10", "channel_id": "20", "message_id": "30", "emoji": { "name": "⭐" } }),
        )
        .expect("decode");

        let signal = event.reaction().expect("reaction").to_signal(ReactionKind::Removed);
        assert_eq!(signal.community_id, None);
        assert_eq!(signal.kind, ReactionKind::Removed);
    }

    #[test]
    fn unknown_dispatch_is_unsupported_and_malformed_reaction_is_an_error() {
        let event = GatewayEvent::from_dispatch("TYPING_START", json!({})).expect("decode");
        assert_eq!(event, GatewayEvent::Unsupported { event_type: "TYPING_START".to_owned() });

        assert!(GatewayEvent::from_dispatch(REACTION_ADD_DISPATCH, json!({ "emoji": {} })).is_err());
    }

    #[tokio::test]
    async fn dispatcher_returns_ignored_when_no_handler_registered() {
        let dispatcher = EventDispatcher::new();
        let envelope = GatewayEnvelope {
            envelope_id: "env-1".to_owned(),
            event: GatewayEvent::Unsupported { event_type: "READY".to_owned() },
        };

        let result =
            dispatcher.dispatch(&envelope, &EventContext::default()).await.expect("dispatch");

        assert_eq!(result, HandlerResult::Ignored);
        assert_eq!(dispatcher.handler_count(), 0);
    }
}
