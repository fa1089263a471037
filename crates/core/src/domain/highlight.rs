use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ids::{CommunityId, MessageId};
use crate::threshold::Tier;

/// Persisted link from a source message to the highlight posted for it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightRecord {
    pub community_id: CommunityId,
    pub source_message_id: MessageId,
    pub highlight_message_id: MessageId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightAuthor {
    pub name: String,
    pub icon_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Fully rendered highlight. Recomputed on every publish or update and sent as a
/// whole replacement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightContent {
    pub header: String,
    pub tier: Tier,
    pub tally: u32,
    pub description: String,
    pub color: u32,
    pub image_url: Option<String>,
    pub author: HighlightAuthor,
    pub fields: Vec<HighlightField>,
    pub timestamp: DateTime<Utc>,
}
