use serde::Serialize;
use starboard_core::HighlightContent;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EmbedAuthor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EmbedImage {
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Embed {
    pub description: String,
    pub color: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<EmbedAuthor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedImage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AllowedMentions {
    pub parse: Vec<String>,
}

/// Body for create and edit message calls. Edits send the same body so the previous
/// highlight is replaced wholesale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessagePayload {
    pub content: String,
    pub embeds: Vec<Embed>,
    pub allowed_mentions: AllowedMentions,
}

pub struct EmbedBuilder {
    embed: Embed,
}

impl EmbedBuilder {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            embed: Embed {
                description: description.into(),
                color: 0,
                author: None,
                image: None,
                fields: Vec::new(),
                timestamp: None,
            },
        }
    }

    pub fn color(mut self, color: u32) -> Self {
        self.embed.color = color;
        self
    }

    pub fn author(mut self, name: impl Into<String>, icon_url: impl Into<String>) -> Self {
        let icon_url = icon_url.into();
        self.embed.author = Some(EmbedAuthor {
            name: name.into(),
            icon_url: (!icon_url.is_empty()).then_some(icon_url),
        });
        self
    }

    pub fn image(mut self, url: Option<impl Into<String>>) -> Self {
        self.embed.image = url.map(|url| EmbedImage { url: url.into() });
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.embed.fields.push(EmbedField { name: name.into(), value: value.into(), inline });
        self
    }

    pub fn timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.embed.timestamp = Some(timestamp.into());
        self
    }

    pub fn build(self) -> Embed {
        self.embed
    }
}

pub fn highlight_payload(content: &HighlightContent) -> MessagePayload {
    let embed = content
        .fields
        .iter()
        .fold(
            EmbedBuilder::new(content.description.clone())
                .color(content.color)
                .author(content.author.name.clone(), content.author.icon_url.clone())
                .image(content.image_url.clone()),
            |builder, field| builder.field(field.name.clone(), field.value.clone(), field.inline),
        )
        .timestamp(content.timestamp.to_rfc3339())
        .build();

    MessagePayload {
        content: content.header.clone(),
        embeds: vec![embed],
        allowed_mentions: AllowedMentions::default(),
    }
}
