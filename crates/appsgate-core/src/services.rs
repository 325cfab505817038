/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Services apps call back into: KV storage, remote OAuth2 bookkeeping and
//! the app listing.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::authz::{require, Caller, Capability};
use crate::error::ProxyError;
use crate::expand::resolver::app_view;
use crate::expand::ExpandLevel;
use crate::model::{App, AppView, OAuth2App, Permission};
use crate::proxy::Proxy;

fn require_grant(app: &App, p: Permission) -> Result<(), ProxyError> {
    if app.grants(p) {
        Ok(())
    } else {
        Err(ProxyError::Forbidden(format!("{} is not granted {p}", app.id())))
    }
}

impl Proxy {
    fn caller_app(&self, caller: &Caller) -> Result<Arc<App>, ProxyError> {
        let app_id = caller
            .app_id
            .as_ref()
            .ok_or_else(|| ProxyError::InvalidInput("app_id is not set".to_string()))?;
        let app = self.apps.get(app_id)?;
        app.ensure_enabled()?;
        Ok(app)
    }

    // --- KV ---

    pub async fn kv_get(
        &self,
        caller: &Caller,
        prefix: &str,
        key: &str,
    ) -> Result<Option<Value>, ProxyError> {
        let app = self.caller_app(caller)?;
        self.kv.get(app.id(), &caller.actor_key(), prefix, key).await
    }

    pub async fn kv_set(
        &self,
        caller: &Caller,
        prefix: &str,
        key: &str,
        value: Value,
    ) -> Result<(), ProxyError> {
        let app = self.caller_app(caller)?;
        self.kv
            .set(app.id(), &caller.actor_key(), prefix, key, value)
            .await
    }

    pub async fn kv_delete(&self, caller: &Caller, prefix: &str, key: &str) -> Result<bool, ProxyError> {
        let app = self.caller_app(caller)?;
        self.kv.delete(app.id(), &caller.actor_key(), prefix, key).await
    }

    pub async fn kv_list(&self, caller: &Caller, prefix: &str) -> Result<Vec<String>, ProxyError> {
        let app = self.caller_app(caller)?;
        self.kv.list(app.id(), &caller.actor_key(), prefix).await
    }

    // --- Remote OAuth2 ---

    /// Records the app's OAuth2 client credentials with the remote service.
    pub async fn store_oauth2_app(&self, caller: &Caller, oauth2: OAuth2App) -> Result<(), ProxyError> {
        let app = self.caller_app(caller)?;
        require_grant(&app, Permission::RemoteOAuth2)?;
        require(caller, Capability::OAuth2ClientSecret, &app)?;

        let _guard = self.apps.lock(app.id()).await;
        let current = self.apps.get(app.id())?;
        self.apps
            .save(App {
                remote_oauth2: oauth2,
                ..(*current).clone()
            })
            .await?;
        info!(app_id = %app.id(), "stored OAuth2 app credentials");
        Ok(())
    }

    pub async fn store_oauth2_user(&self, caller: &Caller, data: Value) -> Result<(), ProxyError> {
        let app = self.caller_app(caller)?;
        require_grant(&app, Permission::RemoteOAuth2)?;
        require(caller, Capability::OAuth2UserWrite, &app)?;
        self.oauth2.save_user(app.id(), &caller.user_id, &data).await
    }

    pub async fn get_oauth2_user(&self, caller: &Caller) -> Result<Option<Value>, ProxyError> {
        let app = self.caller_app(caller)?;
        require_grant(&app, Permission::RemoteOAuth2)?;
        require(caller, Capability::OAuth2UserRead, &app)?;
        self.oauth2.get_user(app.id(), &caller.user_id).await
    }

    /// A one-shot state for the caller's OAuth2 connect flow.
    pub async fn create_oauth2_state(&self, caller: &Caller) -> Result<String, ProxyError> {
        let app = self.caller_app(caller)?;
        require_grant(&app, Permission::RemoteOAuth2)?;
        if !caller.identity.is_user() {
            return Err(ProxyError::Unauthorized(
                "OAuth2 state is only issued to users".to_string(),
            ));
        }
        self.oauth2.create_state(app.id(), &caller.user_id).await
    }

    pub async fn validate_oauth2_state(&self, caller: &Caller, state: &str) -> Result<(), ProxyError> {
        let app = self.caller_app(caller)?;
        self.oauth2
            .validate_state_once(app.id(), &caller.user_id, state)
            .await
    }

    // --- Apps ---

    /// Installed apps as the caller may see them: admins get the full view.
    #[must_use]
    pub fn list_apps(&self, caller: &Caller) -> Vec<AppView> {
        let level = if caller.is_admin() {
            ExpandLevel::All
        } else {
            ExpandLevel::Summary
        };
        self.apps
            .list()
            .iter()
            .filter(|a| caller.is_admin() || a.is_enabled())
            .filter_map(|a| app_view(a, level, caller))
            .collect()
    }
}
