use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ids::{ChannelId, CommunityId, MessageId, RoleId, UserId};

const SPOILER_PREFIX: &str = "SPOILER_";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Other,
}

impl MediaKind {
    pub fn from_filename(filename: &str) -> Self {
        let extension = filename
            .rsplit_once('.')
            .map(|(_, extension)| extension.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "gif" | "png" | "jpg" | "jpeg" | "webp" | "svg" | "psd" | "bmp" | "tif" | "jfif" => {
                Self::Image
            }
            "mp4" | "mov" | "webm" | "mkv" => Self::Video,
            "mp3" | "ogg" | "wav" | "flac" | "m4a" => Self::Audio,
            _ => Self::Other,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
    pub media_kind: MediaKind,
}

impl Attachment {
    pub fn new(url: impl Into<String>, filename: impl Into<String>) -> Self {
        let filename = filename.into();
        Self { url: url.into(), media_kind: MediaKind::from_filename(&filename), filename }
    }

    /// Uploads hidden behind a spoiler carry a `SPOILER_` filename prefix.
    pub fn is_spoiler(&self) -> bool {
        self.filename
            .get(..SPOILER_PREFIX.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(SPOILER_PREFIX))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReference {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionTally {
    pub emoji: String,
    pub count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAuthor {
    pub id: UserId,
    pub username: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionedUser {
    pub id: UserId,
    pub display_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub community_id: Option<CommunityId>,
    pub author: MessageAuthor,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub reference: Option<MessageReference>,
    pub reactions: Vec<ReactionTally>,
    pub mentions: Vec<MentionedUser>,
    pub mention_roles: Vec<RoleId>,
    pub created_at: DateTime<Utc>,
}

impl SourceMessage {
    /// Current count for `emoji` as reported by the platform, zero when absent.
    pub fn tally_for(&self, emoji: &str) -> u32 {
        self.reactions
            .iter()
            .find(|reaction| reaction.emoji == emoji)
            .map(|reaction| reaction.count)
            .unwrap_or(0)
    }
}
