use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::domain::ids::{ChannelId, RoleId, UserId};
use crate::domain::message::SourceMessage;

/// Display names for the raw mention tokens in a message body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MentionDirectory {
    pub users: HashMap<UserId, String>,
    pub roles: HashMap<RoleId, String>,
    pub channels: HashMap<ChannelId, String>,
}

impl MentionDirectory {
    /// Seeds user names from the mentions the platform already attached to the message.
    pub fn from_message(message: &SourceMessage) -> Self {
        let users = message
            .mentions
            .iter()
            .map(|user| (user.id.clone(), user.display_name.clone()))
            .collect();
        Self { users, ..Self::default() }
    }

    pub fn with_role(mut self, id: RoleId, name: impl Into<String>) -> Self {
        self.roles.insert(id, name.into());
        self
    }

    pub fn with_channel(mut self, id: ChannelId, name: impl Into<String>) -> Self {
        self.channels.insert(id, name.into());
        self
    }
}

fn mention_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"<(@!?|@&|#)(\d+)>").expect("mention pattern is a valid regex")
    })
}

/// Channel ids referenced by `<#id>` tokens, in order of first appearance.
pub fn channel_mentions(content: &str) -> Vec<ChannelId> {
    let mut ids: Vec<ChannelId> = Vec::new();
    for captures in mention_pattern().captures_iter(content) {
        if &captures[1] != "#" {
            continue;
        }
        let id = ChannelId(captures[2].to_owned());
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

/// Replaces user, role and channel mention tokens with `@name` / `#name`. Tokens
/// missing from the directory are left untouched.
pub fn expand_mentions(content: &str, directory: &MentionDirectory) -> String {
    mention_pattern()
        .replace_all(content, |captures: &Captures<'_>| {
            let id = &captures[2];
            let resolved = match &captures[1] {
                "#" => directory.channels.get(&ChannelId(id.to_owned())).map(|name| format!("#{name}")),
                "@&" => directory.roles.get(&RoleId(id.to_owned())).map(|name| format!("@{name}")),
                _ => directory.users.get(&UserId(id.to_owned())).map(|name| format!("@{name}")),
            };
            resolved.unwrap_or_else(|| captures[0].to_owned())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::{channel_mentions, expand_mentions, MentionDirectory};
    use crate::domain::ids::{ChannelId, RoleId, UserId};

    fn directory() -> MentionDirectory {
        let mut directory = MentionDirectory::default()
            .with_role(RoleId("20".to_owned()), "mods")
            .with_channel(ChannelId("30".to_owned()), "general");
        directory.users.insert(UserId("10".to_owned()), "ada".to_owned());
        directory
    }

    #[test]
    fn expands_user_role_and_channel_tokens() {
        let expanded =
            expand_mentions("hey <@10> and <@!10>, ping <@&20> in <#30>", &directory());
        assert_eq!(expanded, "hey @ada and @ada, ping @mods in #general");
    }

    #[test]
    fn unknown_tokens_are_left_as_is() {
        let expanded = expand_mentions("<@99> <#98> <@&97>", &directory());
        assert_eq!(expanded, "<@99> <#98> <@&97>");
    }

    #[test]
    fn channel_mentions_are_deduplicated_in_order() {
        let ids = channel_mentions("<#2> <@1> <#3> <#2>");
        assert_eq!(ids, vec![ChannelId("2".to_owned()), ChannelId("3".to_owned())]);
    }
}
