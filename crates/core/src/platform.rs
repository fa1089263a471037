use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::highlight::HighlightContent;
use crate::domain::ids::{ChannelId, CommunityId, MessageId, UserId};
use crate::domain::member::MemberProfile;
use crate::domain::message::SourceMessage;
use crate::errors::ApiError;
use crate::mentions::MentionDirectory;

/// The slice of the chat platform the highlight engine talks to.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn fetch_message(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<SourceMessage, ApiError>;

    /// Member profile with roles resolved to their position and color.
    async fn fetch_member(
        &self,
        community_id: &CommunityId,
        user_id: &UserId,
    ) -> Result<MemberProfile, ApiError>;

    async fn resolve_mentions(
        &self,
        community_id: &CommunityId,
        message: &SourceMessage,
    ) -> Result<MentionDirectory, ApiError>;

    async fn send_highlight(
        &self,
        channel_id: &ChannelId,
        content: &HighlightContent,
    ) -> Result<MessageId, ApiError>;

    async fn edit_highlight(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
        content: &HighlightContent,
    ) -> Result<(), ApiError>;

    async fn delete_message(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<(), ApiError>;
}

#[async_trait]
impl<T> ChatApi for Arc<T>
where
    T: ChatApi + ?Sized,
{
    async fn fetch_message(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<SourceMessage, ApiError> {
        (**self).fetch_message(channel_id, message_id).await
    }

    async fn fetch_member(
        &self,
        community_id: &CommunityId,
        user_id: &UserId,
    ) -> Result<MemberProfile, ApiError> {
        (**self).fetch_member(community_id, user_id).await
    }

    async fn resolve_mentions(
        &self,
        community_id: &CommunityId,
        message: &SourceMessage,
    ) -> Result<MentionDirectory, ApiError> {
        (**self).resolve_mentions(community_id, message).await
    }

    async fn send_highlight(
        &self,
        channel_id: &ChannelId,
        content: &HighlightContent,
    ) -> Result<MessageId, ApiError> {
        (**self).send_highlight(channel_id, content).await
    }

    async fn edit_highlight(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
        content: &HighlightContent,
    ) -> Result<(), ApiError> {
        (**self).edit_highlight(channel_id, message_id, content).await
    }

    async fn delete_message(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<(), ApiError> {
        (**self).delete_message(channel_id, message_id).await
    }
}
