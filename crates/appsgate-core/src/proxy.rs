/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! The process-wide proxy value. Operations live next to their concern
//! (`dispatch`, `bindings::aggregate`, `notify`, `lifecycle`, `services`)
//! as `impl Proxy` blocks.

use std::sync::Arc;

use appsgate_config::ProxyConfig;
use tracing::{info, warn};

use crate::authz::Caller;
use crate::context::{ContextLoader, RawContext};
use crate::entities::EntityStore;
use crate::error::ProxyError;
use crate::expand::{Expand, ExpandEnv, ExpandLevel, StripOptions};
use crate::model::{App, DeployType, Manifest, UserAgentContext};
use crate::store::{AppKvStore, AppStore, KvBackend, OAuth2Store, SubscriptionStore};
use crate::upstream::Upstreams;

/// Collaborators the proxy is assembled from.
pub struct ProxyDeps {
    pub apps: Arc<AppStore>,
    pub backend: Arc<dyn KvBackend>,
    pub entities: Arc<dyn EntityStore>,
    pub upstreams: Upstreams,
}

pub struct Proxy {
    pub(crate) apps: Arc<AppStore>,
    pub(crate) subscriptions: SubscriptionStore,
    pub(crate) kv: AppKvStore,
    pub(crate) oauth2: OAuth2Store,
    pub(crate) loader: ContextLoader,
    pub(crate) upstreams: Upstreams,
    pub(crate) env: ExpandEnv,
    pub(crate) bindings_concurrency: usize,
    pub(crate) notify_concurrency: usize,
}

impl Proxy {
    #[must_use]
    pub fn new(cfg: &ProxyConfig, deps: ProxyDeps) -> Self {
        let env = ExpandEnv {
            site_url: cfg.site_url.trim_end_matches('/').to_string(),
            plugin_path: cfg.plugin_path.clone(),
            developer_mode: cfg.developer_mode,
            default_locale: cfg.default_locale.clone(),
            strip: StripOptions {
                show_email: cfg.show_email,
                show_full_name: cfg.show_full_name,
            },
        };
        Self {
            apps: deps.apps,
            subscriptions: SubscriptionStore::new(Arc::clone(&deps.backend)),
            kv: AppKvStore::new(Arc::clone(&deps.backend)),
            oauth2: OAuth2Store::new(deps.backend),
            loader: ContextLoader::new(deps.entities),
            upstreams: deps.upstreams,
            env,
            bindings_concurrency: cfg.bindings_concurrency.max(1),
            notify_concurrency: cfg.notify_concurrency.max(1),
        }
    }

    #[must_use]
    pub fn apps(&self) -> &AppStore {
        &self.apps
    }

    #[must_use]
    pub fn env(&self) -> &ExpandEnv {
        &self.env
    }

    /// Registers in-process apps. They are granted everything they request,
    /// keep their install position across restarts, and run no hooks.
    pub async fn install_builtins(&self, manifests: Vec<Manifest>) -> Result<(), ProxyError> {
        for manifest in manifests {
            manifest.validate()?;
            let _guard = self.apps.lock(&manifest.app_id).await;
            let existing = self.apps.get(&manifest.app_id).ok();
            let install_seq = existing
                .as_ref()
                .map_or_else(|| self.apps.next_install_seq(), |a| a.install_seq);
            let app = App {
                deploy_type: Some(DeployType::Builtin),
                disabled: existing.as_ref().is_some_and(|a| a.disabled),
                install_seq,
                granted_permissions: manifest.requested_permissions.clone(),
                granted_locations: manifest.requested_locations.clone(),
                manifest,
                ..App::default()
            };
            let app = self.apps.save(app).await?;
            info!(app_id = %app.id(), version = %app.manifest.version, "builtin app registered");
        }
        Ok(())
    }

    /// Loads the chat-server entities `expand` needs for a call made by
    /// `caller` to `app`.
    pub(crate) async fn load_context(
        &self,
        caller: &Caller,
        user_agent: UserAgentContext,
        app: &App,
        expand: &Expand,
    ) -> RawContext {
        let mut raw = RawContext::new(user_agent, caller.user_id.clone());
        if caller.identity.is_user() {
            raw.acting_user_access_token = caller.token.clone().unwrap_or_default();
        }
        self.load_oauth2_user(&mut raw, caller, app, expand).await;
        self.loader.load(raw, expand).await
    }

    pub(crate) async fn load_oauth2_user(
        &self,
        raw: &mut RawContext,
        caller: &Caller,
        app: &App,
        expand: &Expand,
    ) {
        if expand.oauth2_user.level != ExpandLevel::All || !caller.identity.is_user() {
            return;
        }
        match self.oauth2.get_user(app.id(), &caller.user_id).await {
            Ok(user) => raw.oauth2_user = user,
            Err(e) => warn!(app_id = %app.id(), error = %e, "failed to load OAuth2 user"),
        }
    }
}
