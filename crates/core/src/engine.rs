use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::domain::highlight::{HighlightContent, HighlightRecord};
use crate::domain::ids::{ChannelId, CommunityId, MessageId, UserId};
use crate::domain::message::SourceMessage;
use crate::errors::{ApiError, FetchTarget, PersistenceError, SyncError};
use crate::locks::KeyedLocks;
use crate::mentions::{expand_mentions, MentionDirectory};
use crate::platform::ChatApi;
use crate::render::{render_highlight, RenderInput, ReplyContext};
use crate::store::HighlightStore;
use crate::threshold::{self, HighlightAction};

pub const DEFAULT_STAR_EMOJI: &str = "⭐";
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    pub highlight_channel_id: ChannelId,
    pub star_emoji: String,
    pub api_timeout: Duration,
}

impl EngineSettings {
    pub fn new(highlight_channel_id: ChannelId) -> Self {
        Self {
            highlight_channel_id,
            star_emoji: DEFAULT_STAR_EMOJI.to_owned(),
            api_timeout: DEFAULT_API_TIMEOUT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReactionKind {
    Added,
    Removed,
}

/// A reaction add or remove as delivered by the platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactionSignal {
    pub kind: ReactionKind,
    pub emoji: String,
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub community_id: Option<CommunityId>,
    pub user_id: Option<UserId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    NotStarEmoji,
    HighlightChannel,
    DirectMessage,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Ignored(IgnoreReason),
    Unchanged { tally: u32 },
    Published { highlight_message_id: MessageId, tally: u32 },
    Updated { highlight_message_id: MessageId, tally: u32 },
    Retracted { highlight_message_id: MessageId, tally: u32 },
}

type MessageKey = (CommunityId, MessageId);

/// Keeps highlight messages in step with the star tally of their source messages.
pub struct HighlightEngine<A> {
    api: A,
    store: Arc<HighlightStore>,
    settings: EngineSettings,
    locks: KeyedLocks<MessageKey>,
}

impl<A> HighlightEngine<A>
where
    A: ChatApi,
{
    pub fn new(api: A, store: Arc<HighlightStore>, settings: EngineSettings) -> Self {
        Self { api, store, settings, locks: KeyedLocks::new() }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn store(&self) -> &HighlightStore {
        &self.store
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Returns the community an event belongs to, or why the event is not ours.
    pub fn accept(&self, signal: &ReactionSignal) -> Result<CommunityId, IgnoreReason> {
        if signal.emoji != self.settings.star_emoji {
            return Err(IgnoreReason::NotStarEmoji);
        }
        if signal.channel_id == self.settings.highlight_channel_id {
            return Err(IgnoreReason::HighlightChannel);
        }
        signal.community_id.clone().ok_or(IgnoreReason::DirectMessage)
    }

    pub async fn handle_reaction(&self, signal: &ReactionSignal) -> Result<SyncOutcome, SyncError> {
        let community_id = match self.accept(signal) {
            Ok(community_id) => community_id,
            Err(reason) => {
                debug!(
                    event_name = "starboard.reaction.ignored",
                    message_id = %signal.message_id,
                    reason = ?reason,
                    "reaction ignored"
                );
                return Ok(SyncOutcome::Ignored(reason));
            }
        };

        self.store.ensure_community(&community_id).await;
        let _guard = self.locks.acquire((community_id.clone(), signal.message_id.clone())).await;
        self.synchronize(&community_id, &signal.channel_id, &signal.message_id).await
    }

    /// Re-evaluates one source message from live state. Callers must hold the
    /// message's lock.
    async fn synchronize(
        &self,
        community_id: &CommunityId,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<SyncOutcome, SyncError> {
        let message = self
            .call(self.api.fetch_message(channel_id, message_id))
            .await
            .map_err(|source| SyncError::Fetch {
                target: FetchTarget::Message,
                id: message_id.to_string(),
                source,
            })?;

        let tally = message.tally_for(&self.settings.star_emoji);
        let existing = self.store.get(community_id, message_id).await;
        let transition = threshold::evaluate(tally, existing.is_some());

        debug!(
            event_name = "starboard.threshold.evaluated",
            community_id = %community_id,
            message_id = %message_id,
            tally,
            from = ?transition.from,
            to = ?transition.to,
            action = %transition.action,
            "threshold evaluated"
        );

        match (transition.action, existing) {
            (HighlightAction::Create, None) => {
                let content = self.render(community_id, &message, tally).await?;
                self.publish(community_id, message_id, &content).await
            }
            (HighlightAction::Update, Some(highlight_message_id)) => {
                let content = self.render(community_id, &message, tally).await?;
                self.update(community_id, message_id, highlight_message_id, &content).await
            }
            (HighlightAction::Delete, Some(highlight_message_id)) => {
                self.retract(community_id, message_id, highlight_message_id, tally).await
            }
            _ => Ok(SyncOutcome::Unchanged { tally }),
        }
    }

    async fn publish(
        &self,
        community_id: &CommunityId,
        message_id: &MessageId,
        content: &HighlightContent,
    ) -> Result<SyncOutcome, SyncError> {
        let action = HighlightAction::Create;
        let highlight_message_id = self
            .call(self.api.send_highlight(&self.settings.highlight_channel_id, content))
            .await
            .map_err(|source| publish_error(action, message_id, source))?;

        info!(
            event_name = "starboard.highlight.created",
            community_id = %community_id,
            message_id = %message_id,
            highlight_message_id = %highlight_message_id,
            tally = content.tally,
            "highlight published"
        );

        self.store
            .insert(HighlightRecord {
                community_id: community_id.clone(),
                source_message_id: message_id.clone(),
                highlight_message_id: highlight_message_id.clone(),
            })
            .await
            .map_err(|source| persistence_error(action, message_id, source))?;

        Ok(SyncOutcome::Published { highlight_message_id, tally: content.tally })
    }

    async fn update(
        &self,
        community_id: &CommunityId,
        message_id: &MessageId,
        highlight_message_id: MessageId,
        content: &HighlightContent,
    ) -> Result<SyncOutcome, SyncError> {
        let action = HighlightAction::Update;
        let edited = self
            .call(self.api.edit_highlight(
                &self.settings.highlight_channel_id,
                &highlight_message_id,
                content,
            ))
            .await;

        match edited {
            Ok(()) => {}
            // The highlight was removed by hand while the message still qualifies.
            Err(ApiError::NotFound(detail)) => {
                warn!(
                    event_name = "starboard.highlight.republishing",
                    community_id = %community_id,
                    message_id = %message_id,
                    highlight_message_id = %highlight_message_id,
                    detail = %detail,
                    "highlight message is gone; publishing a replacement"
                );
                self.store
                    .remove(community_id, message_id)
                    .await
                    .map_err(|source| persistence_error(action, message_id, source))?;
                return self.publish(community_id, message_id, content).await;
            }
            Err(source) => return Err(publish_error(action, message_id, source)),
        }

        info!(
            event_name = "starboard.highlight.updated",
            message_id = %message_id,
            highlight_message_id = %highlight_message_id,
            tally = content.tally,
            "highlight updated"
        );

        self.store
            .flush()
            .await
            .map_err(|source| persistence_error(action, message_id, source))?;
        Ok(SyncOutcome::Updated { highlight_message_id, tally: content.tally })
    }

    async fn retract(
        &self,
        community_id: &CommunityId,
        message_id: &MessageId,
        highlight_message_id: MessageId,
        tally: u32,
    ) -> Result<SyncOutcome, SyncError> {
        let action = HighlightAction::Delete;
        match self
            .call(self.api.delete_message(&self.settings.highlight_channel_id, &highlight_message_id))
            .await
        {
            Ok(()) => {}
            // Someone already removed the highlight by hand; only the record is left.
            Err(ApiError::NotFound(detail)) => {
                warn!(
                    event_name = "starboard.highlight.already_gone",
                    message_id = %message_id,
                    highlight_message_id = %highlight_message_id,
                    detail = %detail,
                    "highlight message was already deleted"
                );
            }
            Err(source) => return Err(publish_error(action, message_id, source)),
        }

        info!(
            event_name = "starboard.highlight.deleted",
            community_id = %community_id,
            message_id = %message_id,
            highlight_message_id = %highlight_message_id,
            tally,
            "highlight retracted"
        );

        self.store
            .remove(community_id, message_id)
            .await
            .map_err(|source| persistence_error(action, message_id, source))?;
        Ok(SyncOutcome::Retracted { highlight_message_id, tally })
    }

    async fn render(
        &self,
        community_id: &CommunityId,
        message: &SourceMessage,
        tally: u32,
    ) -> Result<HighlightContent, SyncError> {
        let member = self
            .call(self.api.fetch_member(community_id, &message.author.id))
            .await
            .map_err(|source| SyncError::Fetch {
                target: FetchTarget::Member,
                id: message.author.id.to_string(),
                source,
            })?;

        let directory = match self.call(self.api.resolve_mentions(community_id, message)).await {
            Ok(directory) => directory,
            Err(error) => {
                warn!(
                    event_name = "starboard.render.mentions_unresolved",
                    message_id = %message.id,
                    error = %error,
                    "mention names unavailable; rendering with message mentions only"
                );
                MentionDirectory::from_message(message)
            }
        };
        let expanded_content = expand_mentions(&message.content, &directory);

        let reply = match &message.reference {
            Some(reference) => {
                let referenced = self
                    .call(self.api.fetch_message(&reference.channel_id, &reference.message_id))
                    .await;
                match referenced {
                    Ok(referenced) => Some(ReplyContext {
                        channel_id: referenced.channel_id,
                        message_id: referenced.id,
                        author_id: referenced.author.id,
                    }),
                    Err(error) => {
                        debug!(
                            event_name = "starboard.render.reply_unresolved",
                            message_id = %message.id,
                            referenced_message_id = %reference.message_id,
                            error = %error,
                            "replied-to message unavailable; omitting reply line"
                        );
                        None
                    }
                }
            }
            None => None,
        };

        Ok(render_highlight(&RenderInput {
            community_id,
            message,
            expanded_content: &expanded_content,
            reply: reply.as_ref(),
            member: &member,
            tally,
        }))
    }

    async fn call<T, F>(&self, request: F) -> Result<T, ApiError>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        match tokio::time::timeout(self.settings.api_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout(self.settings.api_timeout)),
        }
    }
}

fn publish_error(action: HighlightAction, message_id: &MessageId, source: ApiError) -> SyncError {
    SyncError::Publish { action, message_id: message_id.clone(), source }
}

fn persistence_error(
    action: HighlightAction,
    message_id: &MessageId,
    source: PersistenceError,
) -> SyncError {
    SyncError::Persistence { action, message_id: message_id.clone(), source }
}
