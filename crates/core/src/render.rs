//! Highlight rendering.
//!
//! Everything here is pure: identical inputs always produce an identical
//! [`HighlightContent`]. Fetching the member, the replied-to message and mention
//! names happens before rendering, in the engine.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::highlight::{HighlightAuthor, HighlightContent, HighlightField};
use crate::domain::ids::{ChannelId, CommunityId, MessageId, UserId};
use crate::domain::member::{MemberProfile, Role, DEFAULT_ROLE_COLOR};
use crate::domain::message::{MediaKind, SourceMessage};
use crate::threshold::Tier;

pub const SPOILER_NOTE: &str = "**Spoilered Image**";
pub const SOURCE_FIELD_NAME: &str = "Source";

const MESSAGE_LINK_BASE: &str = "https://discord.com/channels";

/// The message a source message replies to, resolved before rendering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyContext {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub author_id: UserId,
}

#[derive(Clone, Copy, Debug)]
pub struct RenderInput<'a> {
    pub community_id: &'a CommunityId,
    pub message: &'a SourceMessage,
    pub expanded_content: &'a str,
    pub reply: Option<&'a ReplyContext>,
    pub member: &'a MemberProfile,
    pub tally: u32,
}

pub fn render_highlight(input: &RenderInput<'_>) -> HighlightContent {
    let message = input.message;
    let tier = Tier::for_tally(input.tally);

    let mut description = String::new();
    if let Some(reply) = input.reply {
        description.push_str(&format!(
            "**[Replying]({link}) to <@{author}>**\n",
            link = message_link(input.community_id, &reply.channel_id, &reply.message_id),
            author = reply.author_id,
        ));
    }
    description.push_str(input.expanded_content);

    let mut image_url = find_image_url(input.expanded_content).map(str::to_owned);
    if let Some(attachment) = message.attachments.first() {
        if attachment.is_spoiler() {
            if !description.is_empty() {
                description.push('\n');
            }
            description.push_str(SPOILER_NOTE);
        } else if image_url.is_none()
            && attachment.media_kind == MediaKind::Image
            && is_image_url(&attachment.url)
        {
            image_url = Some(attachment.url.clone());
        }
    }

    HighlightContent {
        header: format!("{} **{}** <#{}>", tier.icon(), input.tally, message.channel_id),
        tier,
        tally: input.tally,
        description,
        color: resolve_accent_color(&input.member.roles),
        image_url,
        author: HighlightAuthor {
            name: input.member.display_name().to_owned(),
            icon_url: input.member.avatar_url.clone(),
        },
        fields: vec![HighlightField {
            name: SOURCE_FIELD_NAME.to_owned(),
            value: format!(
                "[Jump!]({})",
                message_link(input.community_id, &message.channel_id, &message.id)
            ),
            inline: false,
        }],
        timestamp: message.created_at,
    }
}

/// First non-default color among the roles, highest position first.
pub fn resolve_accent_color(roles: &[Role]) -> u32 {
    let mut ranked: Vec<&Role> = roles.iter().collect();
    ranked.sort_by(|left, right| right.position.cmp(&left.position));
    ranked.into_iter().find(|role| role.has_color()).map(|role| role.color).unwrap_or(DEFAULT_ROLE_COLOR)
}

pub fn message_link(community_id: &CommunityId, channel_id: &ChannelId, message_id: &MessageId) -> String {
    format!("{MESSAGE_LINK_BASE}/{community_id}/{channel_id}/{message_id}")
}

fn image_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)https?://[^\s/<>]+/[^\s<>]*?\.(?:gif|png|jpg|jpeg|webp|svg|psd|bmp|tif|jfif)\b(?:\?[^\s<>()]*)?",
        )
        .expect("image pattern is a valid regex")
    })
}

pub fn find_image_url(text: &str) -> Option<&str> {
    image_pattern().find(text).map(|found| found.as_str())
}

pub fn is_image_url(url: &str) -> bool {
    image_pattern().is_match(url)
}
