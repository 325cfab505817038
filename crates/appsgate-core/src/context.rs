/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! The raw, fully-loaded request context that expansion redacts.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::entities::EntityStore;
use crate::error::ProxyError;
use crate::expand::Expand;
use crate::model::{
    Channel, ChannelMember, Post, Subject, Team, TeamMember, User, UserAgentContext,
};

/// Everything known about a request before redaction. Never serialized.
#[derive(Clone, Debug, Default)]
pub struct RawContext {
    pub user_agent: UserAgentContext,
    pub subject: Option<Subject>,
    pub acting_user_id: String,
    /// The user an event is about, when different from the acting user.
    pub user_id: String,
    pub acting_user_access_token: String,

    pub acting_user: Option<User>,
    pub user: Option<User>,
    pub channel: Option<Channel>,
    pub channel_member: Option<ChannelMember>,
    pub team: Option<Team>,
    pub team_member: Option<TeamMember>,
    pub post: Option<Post>,
    pub root_post: Option<Post>,
    pub oauth2_user: Option<Value>,
}

impl RawContext {
    pub fn new(user_agent: UserAgentContext, acting_user_id: impl Into<String>) -> Self {
        Self {
            user_agent,
            acting_user_id: acting_user_id.into(),
            ..Self::default()
        }
    }

    /// The user whose memberships are looked up.
    #[must_use]
    pub fn member_user_id(&self) -> &str {
        if self.user_id.is_empty() {
            &self.acting_user_id
        } else {
            &self.user_id
        }
    }

    #[must_use]
    pub fn channel_id(&self) -> &str {
        if !self.user_agent.channel_id.is_empty() {
            return &self.user_agent.channel_id;
        }
        self.post.as_ref().map_or("", |p| p.channel_id.as_str())
    }

    #[must_use]
    pub fn team_id(&self) -> &str {
        if !self.user_agent.team_id.is_empty() {
            return &self.user_agent.team_id;
        }
        self.channel.as_ref().map_or("", |c| c.team_id.as_str())
    }

    fn root_post_id(&self) -> &str {
        if !self.user_agent.root_post_id.is_empty() {
            return &self.user_agent.root_post_id;
        }
        self.post.as_ref().map_or("", |p| p.root_id.as_str())
    }
}

/// Loads the entities an expand needs, skipping slots at `none`.
#[derive(Clone)]
pub struct ContextLoader {
    entities: Arc<dyn EntityStore>,
}

async fn fetch<T, F>(wanted: bool, id: &str, f: F) -> Option<T>
where
    F: std::future::Future<Output = Result<T, ProxyError>>,
{
    if !wanted || id.is_empty() {
        return None;
    }
    match f.await {
        Ok(v) => Some(v),
        Err(e) => {
            debug!(id = %id, error = %e, "context entity unavailable");
            None
        }
    }
}

impl ContextLoader {
    pub fn new(entities: Arc<dyn EntityStore>) -> Self {
        Self { entities }
    }

    #[must_use]
    pub fn entities(&self) -> &Arc<dyn EntityStore> {
        &self.entities
    }

    /// Fills in `raw`'s entities for every slot `expand` asks for. Lookup
    /// failures leave the entity absent; required slots fail later, in
    /// resolution.
    pub async fn load(&self, mut raw: RawContext, expand: &Expand) -> RawContext {
        let es = &self.entities;

        let (acting_user, user, post) = tokio::join!(
            fetch(
                !expand.acting_user.is_none() || !expand.locale.is_none(),
                &raw.acting_user_id,
                es.user(&raw.acting_user_id)
            ),
            fetch(!expand.user.is_none(), &raw.user_id, es.user(&raw.user_id)),
            fetch(
                !expand.post.is_none() || !expand.root_post.is_none(),
                &raw.user_agent.post_id,
                es.post(&raw.user_agent.post_id)
            ),
        );
        raw.acting_user = raw.acting_user.or(acting_user);
        raw.user = raw.user.or(user);
        raw.post = raw.post.or(post);

        let channel_id = raw.channel_id().to_string();
        let root_post_id = raw.root_post_id().to_string();
        let member_id = raw.member_user_id().to_string();
        let (channel, channel_member, root_post) = tokio::join!(
            fetch(
                !expand.channel.is_none() || !expand.team.is_none() || !expand.team_member.is_none(),
                &channel_id,
                es.channel(&channel_id)
            ),
            fetch(
                !expand.channel_member.is_none() && !member_id.is_empty(),
                &channel_id,
                es.channel_member(&channel_id, &member_id)
            ),
            fetch(!expand.root_post.is_none(), &root_post_id, es.post(&root_post_id)),
        );
        raw.channel = raw.channel.or(channel);
        raw.channel_member = raw.channel_member.or(channel_member);
        raw.root_post = raw.root_post.or(root_post);

        let team_id = raw.team_id().to_string();
        let (team, team_member) = tokio::join!(
            fetch(!expand.team.is_none(), &team_id, es.team(&team_id)),
            fetch(
                !expand.team_member.is_none() && !member_id.is_empty(),
                &team_id,
                es.team_member(&team_id, &member_id)
            ),
        );
        raw.team = raw.team.or(team);
        raw.team_member = raw.team_member.or(team_member);
        raw
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entities::MemoryEntityStore;
    use crate::expand::{ExpandLevel, Level};
    use crate::testutil;

    fn store() -> Arc<MemoryEntityStore> {
        let s = Arc::new(MemoryEntityStore::new());
        s.insert_user(testutil::user("u1", "alice"));
        s.insert_channel(testutil::channel("c1", "t1"));
        s.insert_team(testutil::team("t1"));
        s.insert_team_member(testutil::team_member("t1", "u1"));
        s.insert_post(testutil::post("p1", "c1", "u1", "hello"));
        s
    }

    #[tokio::test]
    async fn test_load_follows_ids_from_post_to_team() {
        let loader = ContextLoader::new(store());
        let raw = RawContext::new(
            UserAgentContext {
                post_id: "p1".into(),
                ..UserAgentContext::default()
            },
            "u1",
        );
        let expand = Expand {
            post: Level::optional(ExpandLevel::All),
            channel: Level::optional(ExpandLevel::Id),
            team: Level::optional(ExpandLevel::Summary),
            team_member: Level::optional(ExpandLevel::Id),
            ..Expand::default()
        };
        let raw = loader.load(raw, &expand).await;
        assert_eq!(raw.post.unwrap().id, "p1");
        assert_eq!(raw.channel.unwrap().id, "c1");
        assert_eq!(raw.team.unwrap().id, "t1");
        assert_eq!(raw.team_member.unwrap().user_id, "u1");
        assert!(raw.acting_user.is_none());
    }

    #[tokio::test]
    async fn test_load_skips_unrequested_and_missing() {
        let loader = ContextLoader::new(store());
        let raw = RawContext::new(
            UserAgentContext {
                channel_id: "missing".into(),
                ..UserAgentContext::default()
            },
            "u1",
        );
        let expand = Expand {
            acting_user: Level::optional(ExpandLevel::Summary),
            channel: Level::required(ExpandLevel::All),
            ..Expand::default()
        };
        let raw = loader.load(raw, &expand).await;
        assert_eq!(raw.acting_user.unwrap().username, "alice");
        assert!(raw.channel.is_none());
        assert!(raw.post.is_none());
    }
}
