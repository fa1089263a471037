use serde::{Deserialize, Serialize};

use crate::domain::ids::{RoleId, UserId};

/// Role color value the platform uses for "no color".
pub const DEFAULT_ROLE_COLOR: u32 = 0;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub position: i32,
    pub color: u32,
}

impl Role {
    pub fn has_color(&self) -> bool {
        self.color != DEFAULT_ROLE_COLOR
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberProfile {
    pub user_id: UserId,
    pub username: String,
    pub nickname: Option<String>,
    pub avatar_url: String,
    pub roles: Vec<Role>,
}

impl MemberProfile {
    pub fn display_name(&self) -> &str {
        match self.nickname.as_deref() {
            Some(nickname) if !nickname.is_empty() => nickname,
            _ => &self.username,
        }
    }
}
