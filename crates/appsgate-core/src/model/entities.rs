/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Chat-server entities, as returned by its REST API.
//!
//! Every field is optional on the wire so that a stripped entity serializes
//! to exactly the fields its expand level allows.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::{is_false, is_zero};

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct User {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub create_at: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub update_at: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub delete_at: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default, skip_serializing)]
    pub auth_data: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auth_service: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub email_verified: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nickname: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub first_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub position: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub roles: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_bot: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bot_description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub locale: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub timezone: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub mfa_active: bool,
    #[serde(default, skip_serializing)]
    pub mfa_secret: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub last_password_update: i64,
}

impl User {
    #[must_use]
    pub fn is_system_admin(&self) -> bool {
        self.roles.split_whitespace().any(|r| r == "system_admin")
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Channel {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub create_at: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub update_at: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub delete_at: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub team_id: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub channel_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub header: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub purpose: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub last_post_at: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub total_msg_count: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub creator_id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ChannelMember {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub roles: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub last_viewed_at: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub msg_count: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub mention_count: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub notify_props: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub last_update_at: i64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub scheme_user: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub scheme_admin: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Team {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub create_at: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub update_at: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub delete_at: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub team_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub company_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub allowed_domains: String,
    #[serde(default, skip_serializing)]
    pub invite_id: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub allow_open_invite: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct TeamMember {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub team_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub roles: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub delete_at: i64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub scheme_user: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub scheme_admin: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Post {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub create_at: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub update_at: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub edit_at: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub delete_at: i64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_pinned: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub root_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub original_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub post_type: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub props: Map<String, Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hashtags: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_ids: Vec<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_secrets_never_serialize() {
        let user: User = serde_json::from_value(json!({
            "id": "u1",
            "username": "alice",
            "password": "$2a$10$hash",
            "mfa_secret": "JBSWY3DP",
            "auth_data": "ldap-id",
        }))
        .unwrap();
        assert_eq!(user.password, "$2a$10$hash");
        let out = serde_json::to_value(&user).unwrap();
        assert_eq!(out, json!({"id": "u1", "username": "alice"}));
    }

    #[test]
    fn test_channel_type_field_name() {
        let ch: Channel =
            serde_json::from_value(json!({"id": "c1", "team_id": "t1", "type": "O"})).unwrap();
        assert_eq!(ch.channel_type, "O");
        assert_eq!(serde_json::to_value(&ch).unwrap()["type"], "O");
    }

    #[test]
    fn test_team_invite_id_hidden() {
        let team = Team {
            id: "t1".into(),
            invite_id: "secret-invite".into(),
            ..Team::default()
        };
        let out = serde_json::to_string(&team).unwrap();
        assert!(!out.contains("secret-invite"));
    }

    #[test]
    fn test_system_admin_role() {
        let user = User {
            roles: "system_user system_admin".into(),
            ..User::default()
        };
        assert!(user.is_system_admin());
        assert!(!User::default().is_system_admin());
    }
}
