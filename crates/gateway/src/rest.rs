//! Discord REST implementation of the [`ChatApi`] port.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use starboard_core::mentions::channel_mentions;
use starboard_core::{
    ApiError, Attachment, ChannelId, ChatApi, CommunityId, HighlightContent, MemberProfile,
    MentionDirectory, MentionedUser, MessageAuthor, MessageId, MessageReference, ReactionTally,
    Role, RoleId, SourceMessage, UserId,
};
use tracing::debug;

use crate::embed::highlight_payload;

const CDN_BASE: &str = "https://cdn.discordapp.com";

#[derive(Clone, Debug)]
pub struct RestSettings {
    pub base_url: String,
    pub bot_token: SecretString,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct DiscordRestClient {
    client: Client,
    settings: RestSettings,
}

impl DiscordRestClient {
    pub fn new(settings: RestSettings) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!(
                "DiscordBot (https://github.com/starboard-rs/starboard, ",
                env!("CARGO_PKG_VERSION"),
                ")"
            ))
            .build()
            .map_err(|error| ApiError::Transport(error.to_string()))?;
        Ok(Self { client, settings })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{path}", self.settings.base_url.trim_end_matches('/'));
        self.client
            .request(method, url)
            .header("Authorization", format!("Bot {}", self.settings.bot_token.expose_secret()))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request.send().await.map_err(|error| self.transport_error(error))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, body))
    }

    async fn get_json<T>(&self, path: &str) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let response = self.send(self.request(Method::GET, path)).await?;
        response.json::<T>().await.map_err(|error| ApiError::Decode(error.to_string()))
    }

    async fn community_roles(&self, community_id: &CommunityId) -> Result<Vec<WireRole>, ApiError> {
        self.get_json(&format!("/guilds/{community_id}/roles")).await
    }

    fn transport_error(&self, error: reqwest::Error) -> ApiError {
        if error.is_timeout() {
            ApiError::Timeout(self.settings.timeout)
        } else {
            ApiError::Transport(error.to_string())
        }
    }
}

fn status_error(status: StatusCode, body: String) -> ApiError {
    match status {
        StatusCode::NOT_FOUND => ApiError::NotFound(body),
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => ApiError::Forbidden(body),
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after_ms = serde_json::from_str::<RateLimitBody>(&body)
                .map(|limit| (limit.retry_after * 1000.0).ceil() as u64)
                .unwrap_or(0);
            ApiError::RateLimited { retry_after_ms }
        }
        other => ApiError::Http { status: other.as_u16(), message: body },
    }
}

#[async_trait]
impl ChatApi for DiscordRestClient {
    async fn fetch_message(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<SourceMessage, ApiError> {
        let wire: WireMessage =
            self.get_json(&format!("/channels/{channel_id}/messages/{message_id}")).await?;
        Ok(wire.into_source_message())
    }

    async fn fetch_member(
        &self,
        community_id: &CommunityId,
        user_id: &UserId,
    ) -> Result<MemberProfile, ApiError> {
        let member: WireMember =
            self.get_json(&format!("/guilds/{community_id}/members/{user_id}")).await?;
        let community_roles = self.community_roles(community_id).await?;

        let roles = community_roles
            .into_iter()
            .filter(|role| member.roles.contains(&role.id))
            .map(WireRole::into_role)
            .collect();

        let user = member.user.unwrap_or_else(|| WireUser::unknown(user_id));
        let avatar_url = match &member.avatar {
            Some(hash) => format!(
                "{CDN_BASE}/guilds/{community_id}/users/{}/avatars/{hash}.{}",
                user.id,
                avatar_extension(hash)
            ),
            None => user.avatar_url(),
        };

        Ok(MemberProfile {
            user_id: UserId(user.id.clone()),
            username: user.username.clone(),
            nickname: member.nick,
            avatar_url,
            roles,
        })
    }

    async fn resolve_mentions(
        &self,
        community_id: &CommunityId,
        message: &SourceMessage,
    ) -> Result<MentionDirectory, ApiError> {
        let mut directory = MentionDirectory::from_message(message);

        if !message.mention_roles.is_empty() {
            for role in self.community_roles(community_id).await? {
                let id = RoleId(role.id);
                if message.mention_roles.contains(&id) {
                    directory = directory.with_role(id, role.name);
                }
            }
        }

        for channel_id in channel_mentions(&message.content) {
            match self.get_json::<WireChannel>(&format!("/channels/{channel_id}")).await {
                Ok(channel) => {
                    if let Some(name) = channel.name {
                        directory = directory.with_channel(channel_id, name);
                    }
                }
                Err(error) => {
                    debug!(
                        channel_id = %channel_id,
                        error = %error,
                        "channel mention left unexpanded"
                    );
                }
            }
        }

        Ok(directory)
    }

    async fn send_highlight(
        &self,
        channel_id: &ChannelId,
        content: &HighlightContent,
    ) -> Result<MessageId, ApiError> {
        let request = self
            .request(Method::POST, &format!("/channels/{channel_id}/messages"))
            .json(&highlight_payload(content));
        let created: WireCreated = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|error| ApiError::Decode(error.to_string()))?;
        Ok(MessageId(created.id))
    }

    async fn edit_highlight(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
        content: &HighlightContent,
    ) -> Result<(), ApiError> {
        let request = self
            .request(Method::PATCH, &format!("/channels/{channel_id}/messages/{message_id}"))
            .json(&highlight_payload(content));
        self.send(request).await.map(|_| ())
    }

    async fn delete_message(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<(), ApiError> {
        let request =
            self.request(Method::DELETE, &format!("/channels/{channel_id}/messages/{message_id}"));
        self.send(request).await.map(|_| ())
    }
}

fn avatar_extension(hash: &str) -> &'static str {
    if hash.starts_with("a_") {
        "gif"
    } else {
        "png"
    }
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

#[derive(Debug, Deserialize)]
struct WireCreated {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WireChannel {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: String,
    username: String,
    #[serde(default)]
    global_name: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
}

impl WireUser {
    fn unknown(user_id: &UserId) -> Self {
        Self { id: user_id.0.clone(), username: user_id.0.clone(), global_name: None, avatar: None }
    }

    fn avatar_url(&self) -> String {
        match &self.avatar {
            Some(hash) => format!("{CDN_BASE}/avatars/{}/{hash}.{}", self.id, avatar_extension(hash)),
            None => {
                let index = self.id.parse::<u64>().map(|id| (id >> 22) % 6).unwrap_or(0);
                format!("{CDN_BASE}/embed/avatars/{index}.png")
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireMentionMember {
    #[serde(default)]
    nick: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMention {
    #[serde(flatten)]
    user: WireUser,
    #[serde(default)]
    member: Option<WireMentionMember>,
}

impl WireMention {
    fn into_mentioned_user(self) -> MentionedUser {
        let display_name = self
            .member
            .and_then(|member| member.nick)
            .or(self.user.global_name)
            .unwrap_or(self.user.username);
        MentionedUser { id: UserId(self.user.id), display_name }
    }
}

#[derive(Debug, Deserialize)]
struct WireMember {
    #[serde(default)]
    user: Option<WireUser>,
    #[serde(default)]
    nick: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WireRole {
    id: String,
    name: String,
    position: i32,
    color: u32,
}

impl WireRole {
    fn into_role(self) -> Role {
        Role { id: RoleId(self.id), name: self.name, position: self.position, color: self.color }
    }
}

#[derive(Debug, Deserialize)]
struct WireAttachment {
    url: String,
    filename: String,
}

#[derive(Debug, Deserialize)]
struct WireEmoji {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireReaction {
    count: u32,
    emoji: WireEmoji,
}

#[derive(Debug, Deserialize)]
struct WireReference {
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    guild_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    id: String,
    channel_id: String,
    #[serde(default)]
    guild_id: Option<String>,
    author: WireUser,
    #[serde(default)]
    content: String,
    #[serde(default)]
    attachments: Vec<WireAttachment>,
    #[serde(default)]
    reactions: Vec<WireReaction>,
    #[serde(default)]
    mentions: Vec<WireMention>,
    #[serde(default)]
    mention_roles: Vec<String>,
    #[serde(default)]
    message_reference: Option<WireReference>,
    timestamp: DateTime<Utc>,
}

impl WireMessage {
    fn into_source_message(self) -> SourceMessage {
        let channel_id = ChannelId(self.channel_id);
        let reference = self.message_reference.and_then(|reference| {
            let message_id = reference.message_id?;
            Some(MessageReference {
                channel_id: reference.channel_id.map(ChannelId).unwrap_or_else(|| channel_id.clone()),
                message_id: MessageId(message_id),
            })
        });

        SourceMessage {
            id: MessageId(self.id),
            channel_id,
            community_id: self.guild_id.map(CommunityId),
            author: MessageAuthor { id: UserId(self.author.id), username: self.author.username },
            content: self.content,
            attachments: self
                .attachments
                .into_iter()
                .map(|attachment| Attachment::new(attachment.url, attachment.filename))
                .collect(),
            reference,
            reactions: self
                .reactions
                .into_iter()
                .filter_map(|reaction| {
                    reaction.emoji.name.map(|emoji| ReactionTally { emoji, count: reaction.count })
                })
                .collect(),
            mentions: self.mentions.into_iter().map(WireMention::into_mentioned_user).collect(),
            mention_roles: self.mention_roles.into_iter().map(RoleId).collect(),
            created_at: self.timestamp,
        }
    }
}
