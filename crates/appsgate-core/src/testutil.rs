/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Fixtures and a scripted upstream shared by the engine tests.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use appsgate_config::ProxyConfig;
use appsgate_runtime::BreakerSet;

use crate::entities::MemoryEntityStore;
use crate::error::ProxyError;
use crate::expand::{ExpandEnv, StripOptions};
use crate::model::{
    App, Binding, CallRequest, CallResponse, Channel, ChannelMember, DeployType, HttpDeploy,
    Location, Manifest, Permission, Permissions, Post, Team, TeamMember, User,
};
use crate::proxy::{Proxy, ProxyDeps};
use crate::store::{AppStore, KvBackend, MemoryKv};
use crate::upstream::{Upstream, Upstreams};

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

pub fn user(id: &str, username: &str) -> User {
    User {
        id: id.into(),
        username: username.into(),
        email: format!("{username}@example.com"),
        first_name: "First".into(),
        last_name: "Last".into(),
        nickname: username.into(),
        locale: "en".into(),
        roles: "system_user".into(),
        create_at: 1,
        update_at: 2,
        ..User::default()
    }
}

pub fn channel(id: &str, team_id: &str) -> Channel {
    Channel {
        id: id.into(),
        team_id: team_id.into(),
        channel_type: "O".into(),
        display_name: format!("Channel {id}"),
        name: id.into(),
        header: "header".into(),
        purpose: "purpose".into(),
        creator_id: "creator".into(),
        create_at: 1,
        ..Channel::default()
    }
}

pub fn channel_member(channel_id: &str, user_id: &str) -> ChannelMember {
    ChannelMember {
        channel_id: channel_id.into(),
        user_id: user_id.into(),
        roles: "channel_user".into(),
        msg_count: 3,
        last_viewed_at: 1,
        ..ChannelMember::default()
    }
}

pub fn team(id: &str) -> Team {
    Team {
        id: id.into(),
        display_name: format!("Team {id}"),
        name: id.into(),
        description: "description".into(),
        email: format!("{id}@example.com"),
        team_type: "O".into(),
        company_name: "Example".into(),
        create_at: 1,
        ..Team::default()
    }
}

pub fn team_member(team_id: &str, user_id: &str) -> TeamMember {
    TeamMember {
        team_id: team_id.into(),
        user_id: user_id.into(),
        roles: "team_user".into(),
        ..TeamMember::default()
    }
}

pub fn post(id: &str, channel_id: &str, user_id: &str, message: &str) -> Post {
    Post {
        id: id.into(),
        channel_id: channel_id.into(),
        user_id: user_id.into(),
        message: message.into(),
        create_at: 1,
        ..Post::default()
    }
}

// ---------------------------------------------------------------------------
// Apps and environment
// ---------------------------------------------------------------------------

/// An enabled HTTP app granted `act_as_bot` and every root location.
pub fn app(id: &str) -> App {
    App {
        manifest: Manifest {
            app_id: id.into(),
            version: "v1.0.0".into(),
            display_name: format!("App {id}"),
            homepage_url: format!("https://{id}.example.com"),
            http: Some(HttpDeploy {
                root_url: format!("https://{id}.example.com/app"),
                use_jwt: false,
            }),
            ..Manifest::default()
        },
        deploy_type: Some(DeployType::Http),
        secret: format!("secret-{id}"),
        webhook_secret: format!("whsec-{id}"),
        bot_user_id: format!("bot-{id}"),
        bot_username: format!("{id}-bot"),
        bot_access_token: format!("bot-token-{id}"),
        granted_permissions: Permissions(vec![Permission::ActAsBot]),
        granted_locations: Location::ROOTS.iter().map(|r| Location::new(*r)).collect(),
        ..App::default()
    }
}

pub fn env() -> ExpandEnv {
    ExpandEnv {
        site_url: "http://localhost:8065".into(),
        plugin_path: "/plugins/com.mattermost.apps".into(),
        developer_mode: false,
        default_locale: "en".into(),
        strip: StripOptions::default(),
    }
}

// ---------------------------------------------------------------------------
// Scripted upstream
// ---------------------------------------------------------------------------

type Script = HashMap<(String, String), Result<CallResponse, ProxyError>>;

/// Answers calls from a per-(app, path) script and records every request.
/// Unscripted paths answer with an empty `ok`.
#[derive(Default)]
pub struct ScriptedUpstream {
    responses: Mutex<Script>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<(String, CallRequest)>>,
}

impl ScriptedUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self, app_id: &str, path: &str, result: Result<CallResponse, ProxyError>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((app_id.to_string(), path.to_string()), result);
    }

    pub fn respond(&self, app_id: &str, path: &str, resp: CallResponse) {
        self.script(app_id, path, Ok(resp));
    }

    pub fn fail(&self, app_id: &str, path: &str, err: ProxyError) {
        self.script(app_id, path, Err(err));
    }

    /// Scripts the app's `/bindings` answer.
    pub fn bindings(&self, app_id: &str, bindings: Vec<Binding>) {
        let data = serde_json::to_value(bindings).unwrap();
        self.respond(app_id, "/bindings", CallResponse::data(data));
    }

    pub fn delay(&self, app_id: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(app_id.to_string(), delay);
    }

    /// Requests received by `app_id`, in arrival order.
    pub fn calls(&self, app_id: &str) -> Vec<CallRequest> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(id, _)| id == app_id)
            .map(|(_, creq)| creq.clone())
            .collect()
    }

    pub fn paths(&self, app_id: &str) -> Vec<String> {
        self.calls(app_id).into_iter().map(|c| c.call.path).collect()
    }
}

#[async_trait::async_trait]
impl Upstream for ScriptedUpstream {
    async fn roundtrip(
        &self,
        app: &App,
        creq: &CallRequest,
        _acting_user_id: &str,
    ) -> Result<CallResponse, ProxyError> {
        let app_id = app.id().to_string();
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((app_id.clone(), creq.clone()));
        let delay = self
            .delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&app_id)
            .copied()
            .unwrap_or_default();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(app_id, creq.call.path.clone()))
            .cloned()
            .unwrap_or_else(|| Ok(CallResponse::default()))
    }
}

// ---------------------------------------------------------------------------
// Assembled proxy
// ---------------------------------------------------------------------------

pub struct Harness {
    pub proxy: Proxy,
    pub entities: Arc<MemoryEntityStore>,
    pub script: Arc<ScriptedUpstream>,
}

pub fn proxy_config() -> ProxyConfig {
    ProxyConfig {
        call_timeout_ms: 500,
        ..ProxyConfig::default()
    }
}

/// A proxy over in-memory stores with `apps` already installed. Every
/// HTTP app is served by the returned script.
pub async fn harness(apps: Vec<App>) -> Harness {
    harness_with(&proxy_config(), apps).await
}

pub async fn harness_with(cfg: &ProxyConfig, apps: Vec<App>) -> Harness {
    let backend: Arc<dyn KvBackend> = Arc::new(MemoryKv::new());
    let store = Arc::new(AppStore::load(Arc::clone(&backend)).await.unwrap());
    for (seq, mut app) in apps.into_iter().enumerate() {
        app.install_seq = seq as u64 + 1;
        store.save(app).await.unwrap();
    }
    let entities = Arc::new(MemoryEntityStore::new());
    let script = Arc::new(ScriptedUpstream::new());
    let upstreams = Upstreams::new(
        Duration::from_millis(cfg.call_timeout_ms),
        BreakerSet::new(cfg.breaker_threshold, cfg.breaker_half_open_secs),
    )
    .with(DeployType::Http, Arc::clone(&script) as Arc<dyn Upstream>);
    let proxy = Proxy::new(
        cfg,
        ProxyDeps {
            apps: store,
            backend,
            entities: Arc::clone(&entities) as _,
            upstreams,
        },
    );
    Harness {
        proxy,
        entities,
        script,
    }
}
