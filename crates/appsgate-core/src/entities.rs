/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Read access to chat-server entities.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::ProxyError;
use crate::model::{Channel, ChannelMember, Post, Team, TeamMember, User};

#[async_trait::async_trait]
pub trait EntityStore: Send + Sync {
    async fn user(&self, user_id: &str) -> Result<User, ProxyError>;
    async fn channel(&self, channel_id: &str) -> Result<Channel, ProxyError>;
    async fn channel_member(&self, channel_id: &str, user_id: &str)
        -> Result<ChannelMember, ProxyError>;
    async fn team(&self, team_id: &str) -> Result<Team, ProxyError>;
    async fn team_member(&self, team_id: &str, user_id: &str) -> Result<TeamMember, ProxyError>;
    async fn post(&self, post_id: &str) -> Result<Post, ProxyError>;
}

// ---------------------------------------------------------------------------
// REST client
// ---------------------------------------------------------------------------

/// Chat-server REST client authenticated with a service token.
pub struct HttpEntityStore {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl HttpEntityStore {
    pub fn new(base_url: &str, token: String, timeout: Duration) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProxyError::Internal(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    async fn get<T: DeserializeOwned>(&self, what: &str, path: &str) -> Result<T, ProxyError> {
        let url = format!("{}/api/v4{path}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ProxyError::Upstream(format!("chat server request failed: {e}")))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProxyError::NotFound(what.to_string()));
        }
        if !resp.status().is_success() {
            return Err(ProxyError::Upstream(format!(
                "chat server returned {} for {what}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| ProxyError::Upstream(format!("chat server parse error: {e}")))
    }
}

#[async_trait::async_trait]
impl EntityStore for HttpEntityStore {
    async fn user(&self, user_id: &str) -> Result<User, ProxyError> {
        self.get(&format!("user {user_id}"), &format!("/users/{user_id}"))
            .await
    }

    async fn channel(&self, channel_id: &str) -> Result<Channel, ProxyError> {
        self.get(&format!("channel {channel_id}"), &format!("/channels/{channel_id}"))
            .await
    }

    async fn channel_member(
        &self,
        channel_id: &str,
        user_id: &str,
    ) -> Result<ChannelMember, ProxyError> {
        self.get(
            &format!("channel member {user_id} of {channel_id}"),
            &format!("/channels/{channel_id}/members/{user_id}"),
        )
        .await
    }

    async fn team(&self, team_id: &str) -> Result<Team, ProxyError> {
        self.get(&format!("team {team_id}"), &format!("/teams/{team_id}"))
            .await
    }

    async fn team_member(&self, team_id: &str, user_id: &str) -> Result<TeamMember, ProxyError> {
        self.get(
            &format!("team member {user_id} of {team_id}"),
            &format!("/teams/{team_id}/members/{user_id}"),
        )
        .await
    }

    async fn post(&self, post_id: &str) -> Result<Post, ProxyError> {
        self.get(&format!("post {post_id}"), &format!("/posts/{post_id}"))
            .await
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Entity store backed by maps. Used when no chat server is configured and
/// in tests.
#[derive(Default)]
pub struct MemoryEntityStore {
    users: RwLock<HashMap<String, User>>,
    channels: RwLock<HashMap<String, Channel>>,
    channel_members: RwLock<HashMap<(String, String), ChannelMember>>,
    teams: RwLock<HashMap<String, Team>>,
    team_members: RwLock<HashMap<(String, String), TeamMember>>,
    posts: RwLock<HashMap<String, Post>>,
}

fn lookup<K, V>(map: &RwLock<HashMap<K, V>>, key: &K, what: impl FnOnce() -> String) -> Result<V, ProxyError>
where
    K: std::hash::Hash + Eq,
    V: Clone,
{
    map.read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(key)
        .cloned()
        .ok_or_else(|| ProxyError::NotFound(what()))
}

fn insert<K: std::hash::Hash + Eq, V>(map: &RwLock<HashMap<K, V>>, key: K, value: V) {
    map.write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(key, value);
}

impl MemoryEntityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: User) {
        insert(&self.users, user.id.clone(), user);
    }

    pub fn insert_channel(&self, channel: Channel) {
        insert(&self.channels, channel.id.clone(), channel);
    }

    pub fn insert_channel_member(&self, member: ChannelMember) {
        let key = (member.channel_id.clone(), member.user_id.clone());
        insert(&self.channel_members, key, member);
    }

    pub fn remove_channel_member(&self, channel_id: &str, user_id: &str) {
        self.channel_members
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(channel_id.to_string(), user_id.to_string()));
    }

    pub fn insert_team(&self, team: Team) {
        insert(&self.teams, team.id.clone(), team);
    }

    pub fn insert_team_member(&self, member: TeamMember) {
        let key = (member.team_id.clone(), member.user_id.clone());
        insert(&self.team_members, key, member);
    }

    pub fn insert_post(&self, post: Post) {
        insert(&self.posts, post.id.clone(), post);
    }
}

#[async_trait::async_trait]
impl EntityStore for MemoryEntityStore {
    async fn user(&self, user_id: &str) -> Result<User, ProxyError> {
        lookup(&self.users, &user_id.to_string(), || format!("user {user_id}"))
    }

    async fn channel(&self, channel_id: &str) -> Result<Channel, ProxyError> {
        lookup(&self.channels, &channel_id.to_string(), || {
            format!("channel {channel_id}")
        })
    }

    async fn channel_member(
        &self,
        channel_id: &str,
        user_id: &str,
    ) -> Result<ChannelMember, ProxyError> {
        let key = (channel_id.to_string(), user_id.to_string());
        lookup(&self.channel_members, &key, || {
            format!("channel member {user_id} of {channel_id}")
        })
    }

    async fn team(&self, team_id: &str) -> Result<Team, ProxyError> {
        lookup(&self.teams, &team_id.to_string(), || format!("team {team_id}"))
    }

    async fn team_member(&self, team_id: &str, user_id: &str) -> Result<TeamMember, ProxyError> {
        let key = (team_id.to_string(), user_id.to_string());
        lookup(&self.team_members, &key, || {
            format!("team member {user_id} of {team_id}")
        })
    }

    async fn post(&self, post_id: &str) -> Result<Post, ProxyError> {
        lookup(&self.posts, &post_id.to_string(), || format!("post {post_id}"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testutil;

    #[tokio::test]
    async fn test_memory_store_lookups() {
        let store = MemoryEntityStore::new();
        store.insert_user(testutil::user("u1", "alice"));
        store.insert_channel_member(testutil::channel_member("c1", "u1"));

        assert_eq!(store.user("u1").await.unwrap().username, "alice");
        assert!(store.channel_member("c1", "u1").await.is_ok());
        assert_eq!(
            store.user("nobody").await.unwrap_err(),
            ProxyError::NotFound("user nobody".into())
        );

        store.remove_channel_member("c1", "u1");
        assert!(matches!(
            store.channel_member("c1", "u1").await,
            Err(ProxyError::NotFound(_))
        ));
    }

    #[test]
    fn test_http_store_trims_base_url() {
        let store =
            HttpEntityStore::new("http://chat.local/", "tok".into(), Duration::from_secs(1))
                .unwrap();
        assert_eq!(store.base_url, "http://chat.local");
    }
}
