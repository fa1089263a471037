use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use starboard_core::{
    ApiError, ChannelId, ChatApi, CommunityId, EngineSettings, HighlightContent, HighlightEngine,
    HighlightStore, MemberProfile, MentionDirectory, MessageAuthor, MessageId, ReactionTally,
    SourceMessage, StarboardData, SyncOutcome, UserId,
};
use starboard_gateway::events::{
    starboard_dispatcher, EventContext, GatewayEnvelope, GatewayEvent, HandlerResult,
    REACTION_ADD_DISPATCH, REACTION_REMOVE_DISPATCH,
};
use starboard_gateway::socket::{GatewayRunner, GatewayTransport, ReconnectPolicy, TransportError};
use tokio::sync::Mutex;

const COMMUNITY: &str = "100";
const SOURCE_CHANNEL: &str = "200";
const HIGHLIGHT_CHANNEL: &str = "900";
const SOURCE_MESSAGE: &str = "500";

#[derive(Clone, Debug, PartialEq, Eq)]
enum Posted {
    Sent { header: String },
    Edited { id: String, header: String },
    Deleted { id: String },
}

#[derive(Default)]
struct RecordingApi {
    stars: Mutex<u32>,
    posted: Mutex<Vec<Posted>>,
}

impl RecordingApi {
    async fn set_stars(&self, count: u32) {
        *self.stars.lock().await = count;
    }

    async fn posted(&self) -> Vec<Posted> {
        self.posted.lock().await.clone()
    }
}

#[async_trait]
impl ChatApi for RecordingApi {
    async fn fetch_message(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<SourceMessage, ApiError> {
        let count = *self.stars.lock().await;
        Ok(SourceMessage {
            id: message_id.clone(),
            channel_id: channel_id.clone(),
            community_id: Some(CommunityId(COMMUNITY.to_owned())),
            author: MessageAuthor { id: UserId("300".to_owned()), username: "ada".to_owned() },
            content: "look at this".to_owned(),
            attachments: Vec::new(),
            reference: None,
            reactions: vec![ReactionTally { emoji: "⭐".to_owned(), count }],
            mentions: Vec::new(),
            mention_roles: Vec::new(),
            created_at: Utc::now(),
        })
    }

    async fn fetch_member(
        &self,
        _community_id: &CommunityId,
        user_id: &UserId,
    ) -> Result<MemberProfile, ApiError> {
        Ok(MemberProfile {
            user_id: user_id.clone(),
            username: "ada".to_owned(),
            nickname: None,
            avatar_url: "https://cdn.test/ada.png".to_owned(),
            roles: Vec::new(),
        })
    }

    async fn resolve_mentions(
        &self,
        _community_id: &CommunityId,
        message: &SourceMessage,
    ) -> Result<MentionDirectory, ApiError> {
        Ok(MentionDirectory::from_message(message))
    }

    async fn send_highlight(
        &self,
        _channel_id: &ChannelId,
        content: &HighlightContent,
    ) -> Result<MessageId, ApiError> {
        let mut posted = self.posted.lock().await;
        posted.push(Posted::Sent { header: content.header.clone() });
        Ok(MessageId(format!("h{}", posted.len())))
    }

    async fn edit_highlight(
        &self,
        _channel_id: &ChannelId,
        message_id: &MessageId,
        content: &HighlightContent,
    ) -> Result<(), ApiError> {
        self.posted
            .lock()
            .await
            .push(Posted::Edited { id: message_id.0.clone(), header: content.header.clone() });
        Ok(())
    }

    async fn delete_message(
        &self,
        _channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<(), ApiError> {
        self.posted.lock().await.push(Posted::Deleted { id: message_id.0.clone() });
        Ok(())
    }
}

fn reaction(dispatch: &str, envelope_id: &str) -> GatewayEnvelope {
    let event = GatewayEvent::from_dispatch(
        dispatch,
        json!({
            "user_id": "10",
            "channel_id": SOURCE_CHANNEL,
            "message_id": SOURCE_MESSAGE,
            "guild_id": COMMUNITY,
            "emoji": { "id": null, "name": "⭐" }
        }),
    )
    .expect("reaction dispatch decodes");
    GatewayEnvelope { envelope_id: envelope_id.to_owned(), event }
}

struct Harness {
    _dir: tempfile::TempDir,
    store_path: std::path::PathBuf,
    engine: Arc<HighlightEngine<Arc<RecordingApi>>>,
    api: Arc<RecordingApi>,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let store_path = dir.path().join("starboard_data.json");
    let store = HighlightStore::create(&store_path, StarboardData::default()).expect("store");
    let api = Arc::new(RecordingApi::default());
    let engine = Arc::new(HighlightEngine::new(
        Arc::clone(&api),
        Arc::new(store),
        EngineSettings::new(ChannelId(HIGHLIGHT_CHANNEL.to_owned())),
    ));
    Harness { _dir: dir, store_path, engine, api }
}

#[tokio::test]
async fn star_reactions_publish_update_and_retract_a_highlight() {
    let harness = harness();
    let dispatcher = starboard_dispatcher(Arc::clone(&harness.engine));
    let ctx = EventContext::default();

    harness.api.set_stars(2).await;
    let below = dispatcher.dispatch(&reaction(REACTION_ADD_DISPATCH, "e1"), &ctx).await.expect("e1");
    assert_eq!(below, HandlerResult::Synchronized(SyncOutcome::Unchanged { tally: 2 }));

    harness.api.set_stars(3).await;
    let published =
        dispatcher.dispatch(&reaction(REACTION_ADD_DISPATCH, "e2"), &ctx).await.expect("e2");
    assert_eq!(
        published,
        HandlerResult::Synchronized(SyncOutcome::Published {
            highlight_message_id: MessageId("h1".to_owned()),
            tally: 3,
        })
    );

    let on_disk = HighlightStore::load(&harness.store_path).expect("reload after publish");
    assert_eq!(
        on_disk.get(&CommunityId(COMMUNITY.to_owned()), &MessageId(SOURCE_MESSAGE.to_owned())).await,
        Some(MessageId("h1".to_owned()))
    );

    harness.api.set_stars(6).await;
    dispatcher.dispatch(&reaction(REACTION_ADD_DISPATCH, "e3"), &ctx).await.expect("e3");

    harness.api.set_stars(2).await;
    let retracted =
        dispatcher.dispatch(&reaction(REACTION_REMOVE_DISPATCH, "e4"), &ctx).await.expect("e4");
    assert_eq!(
        retracted,
        HandlerResult::Synchronized(SyncOutcome::Retracted {
            highlight_message_id: MessageId("h1".to_owned()),
            tally: 2,
        })
    );

    assert_eq!(
        harness.api.posted().await,
        vec![
            Posted::Sent { header: format!("⭐ **3** <#{SOURCE_CHANNEL}>") },
            Posted::Edited { id: "h1".to_owned(), header: format!("🌟 **6** <#{SOURCE_CHANNEL}>") },
            Posted::Deleted { id: "h1".to_owned() },
        ]
    );

    let on_disk = HighlightStore::load(&harness.store_path).expect("reload after retract");
    assert_eq!(on_disk.snapshot().await.record_count(), 0);
}

#[derive(Default)]
struct QueueTransport {
    envelopes: Mutex<VecDeque<GatewayEnvelope>>,
}

#[async_trait]
impl GatewayTransport for QueueTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<GatewayEnvelope>, TransportError> {
        Ok(self.envelopes.lock().await.pop_front())
    }

    async fn acknowledge(&self, _envelope_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[tokio::test]
async fn burst_of_reactions_through_runner_sends_one_highlight() {
    let harness = harness();
    harness.api.set_stars(4).await;

    let envelopes: VecDeque<GatewayEnvelope> =
        (0..6).map(|index| reaction(REACTION_ADD_DISPATCH, &format!("burst-{index}"))).collect();
    let transport = Arc::new(QueueTransport { envelopes: Mutex::new(envelopes) });

    let runner = GatewayRunner::new(
        transport,
        Arc::new(starboard_dispatcher(Arc::clone(&harness.engine))),
        ReconnectPolicy { max_retries: 0, base_delay_ms: 0, max_delay_ms: 0 },
    );
    runner.start().await.expect("runner");

    let posted = harness.api.posted().await;
    let sends = posted.iter().filter(|post| matches!(post, Posted::Sent { .. })).count();
    let edits = posted.iter().filter(|post| matches!(post, Posted::Edited { .. })).count();
    assert_eq!(sends, 1);
    assert_eq!(edits, 5);

    let mut expected = HashMap::new();
    expected.insert(MessageId(SOURCE_MESSAGE.to_owned()), MessageId("h1".to_owned()));
    let snapshot = HighlightStore::load(&harness.store_path).expect("reload").snapshot().await;
    let community = snapshot.community(&CommunityId(COMMUNITY.to_owned())).expect("community");
    assert_eq!(community.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<HashMap<_, _>>(), expected);
}
