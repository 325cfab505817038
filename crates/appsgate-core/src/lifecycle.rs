/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Install, uninstall, enable and disable.
//!
//! Every transition holds the app's lock for its whole duration and fires
//! the matching manifest hook through the unguarded dispatcher. Hook
//! failures are logged; they never undo the transition.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::authz::Caller;
use crate::error::{MultiError, ProxyError};
use crate::model::{
    App, AppId, Call, CallRequest, Location, Manifest, Permissions, UserAgentContext,
};
use crate::proxy::Proxy;

const PING_PATH: &str = "/ping";

/// Admin request to install (or upgrade) an app.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct InstallRequest {
    pub manifest: Manifest,
    /// Defaults to everything the manifest requests.
    #[serde(default)]
    pub granted_permissions: Option<Permissions>,
    #[serde(default)]
    pub granted_locations: Option<Vec<Location>>,
    /// The app's bot account, created by the chat-server front.
    #[serde(default)]
    pub bot_user_id: String,
    #[serde(default)]
    pub bot_username: String,
    #[serde(default)]
    pub bot_access_token: String,
}

fn require_admin(caller: &Caller, what: &str) -> Result<(), ProxyError> {
    if caller.is_admin() {
        Ok(())
    } else {
        Err(ProxyError::Unauthorized(format!("only a system admin may {what} apps")))
    }
}

fn new_secret() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn check_grants(req: &InstallRequest) -> Result<(Permissions, Vec<Location>), ProxyError> {
    let manifest = &req.manifest;
    let mut errs = MultiError::new();
    let permissions = req
        .granted_permissions
        .clone()
        .unwrap_or_else(|| manifest.requested_permissions.clone());
    for p in &permissions.0 {
        if !manifest.requested_permissions.contains(*p) {
            errs.push(format!("permission {p} was not requested"));
        }
    }
    if let Err(e) = permissions.validate() {
        errs.push(e);
    }
    let locations = req
        .granted_locations
        .clone()
        .unwrap_or_else(|| manifest.requested_locations.clone());
    for loc in &locations {
        if !manifest.requested_locations.iter().any(|r| loc.is_within(r)) {
            errs.push(format!("location {loc} was not requested"));
        }
    }
    errs.into_result()
        .map_err(|e| ProxyError::InvalidInput(e.to_string()))?;
    Ok((permissions, locations))
}

impl Proxy {
    /// Installs a new app or upgrades an installed one. Upgrades keep the
    /// app's secrets, install position and enabled state.
    pub async fn install(&self, caller: &Caller, req: InstallRequest) -> Result<Arc<App>, ProxyError> {
        require_admin(caller, "install")?;
        req.manifest.validate()?;
        if req.manifest.builtin {
            return Err(ProxyError::InvalidInput(
                "builtin apps cannot be installed".to_string(),
            ));
        }
        let (granted_permissions, granted_locations) = check_grants(&req)?;

        let _guard = self.apps.lock(&req.manifest.app_id).await;
        let existing = self.apps.get(&req.manifest.app_id).ok();
        let previous_version = existing.as_ref().map(|a| a.manifest.version.clone());
        let app = App {
            deploy_type: req.manifest.deploy_type(),
            disabled: existing.as_ref().is_some_and(|a| a.disabled),
            install_seq: existing
                .as_ref()
                .map_or_else(|| self.apps.next_install_seq(), |a| a.install_seq),
            secret: existing.as_ref().map_or_else(new_secret, |a| a.secret.clone()),
            webhook_secret: existing
                .as_ref()
                .map_or_else(new_secret, |a| a.webhook_secret.clone()),
            remote_oauth2: existing
                .as_ref()
                .map(|a| a.remote_oauth2.clone())
                .unwrap_or_default(),
            bot_user_id: req.bot_user_id,
            bot_username: req.bot_username,
            bot_access_token: req.bot_access_token,
            granted_permissions,
            granted_locations,
            manifest: req.manifest,
        };
        let app = self.apps.save(app).await?;
        self.upstreams.reset(&app);
        info!(app_id = %app.id(), version = %app.manifest.version, "app installed");

        if let Err(e) = self.internal_call(&app, caller, Call::new(PING_PATH)).await {
            warn!(app_id = %app.id(), error = %e, "app did not answer ping");
        }
        let hook = match previous_version {
            None => ("on_install", app.manifest.on_install.clone()),
            Some(v) if v != app.manifest.version => {
                ("on_version_changed", app.manifest.on_version_changed.clone())
            }
            Some(_) => ("on_install", None),
        };
        self.run_hook(&app, caller, hook).await;
        Ok(app)
    }

    /// Removes an app and everything stored on its behalf.
    pub async fn uninstall(&self, caller: &Caller, app_id: &AppId) -> Result<(), ProxyError> {
        require_admin(caller, "uninstall")?;
        let _guard = self.apps.lock(app_id).await;
        let app = self.apps.get(app_id)?;
        if app.manifest.builtin {
            return Err(ProxyError::InvalidInput(format!(
                "{app_id} is a builtin app and cannot be uninstalled"
            )));
        }
        if app.is_enabled() {
            self.run_hook(&app, caller, ("on_uninstall", app.manifest.on_uninstall.clone()))
                .await;
        }

        let _removal = self.apps.removal_lock(app_id).await;
        let subs = self.subscriptions.delete_app(app_id).await?;
        let kv = self.kv.delete_app(app_id).await?;
        let oauth2 = self.oauth2.delete_app(app_id).await?;
        self.apps.delete(app_id).await?;
        self.upstreams.reset(&app);
        info!(app_id = %app_id, subscriptions = subs, kv_keys = kv, oauth2_records = oauth2, "app uninstalled");
        Ok(())
    }

    pub async fn enable(&self, caller: &Caller, app_id: &AppId) -> Result<Arc<App>, ProxyError> {
        require_admin(caller, "enable")?;
        let _guard = self.apps.lock(app_id).await;
        let current = self.apps.get(app_id)?;
        if current.is_enabled() {
            return Ok(current);
        }
        let app = self
            .apps
            .save(App {
                disabled: false,
                ..(*current).clone()
            })
            .await?;
        self.upstreams.reset(&app);
        info!(app_id = %app_id, "app enabled");
        self.run_hook(&app, caller, ("on_enable", app.manifest.on_enable.clone()))
            .await;
        Ok(app)
    }

    pub async fn disable(&self, caller: &Caller, app_id: &AppId) -> Result<Arc<App>, ProxyError> {
        require_admin(caller, "disable")?;
        let _guard = self.apps.lock(app_id).await;
        let current = self.apps.get(app_id)?;
        if !current.is_enabled() {
            return Ok(current);
        }
        // The hook runs while the app can still be called.
        self.run_hook(&current, caller, ("on_disable", current.manifest.on_disable.clone()))
            .await;
        let app = self
            .apps
            .save(App {
                disabled: true,
                ..(*current).clone()
            })
            .await?;
        info!(app_id = %app_id, "app disabled");
        Ok(app)
    }

    async fn run_hook(&self, app: &App, caller: &Caller, (name, call): (&str, Option<Call>)) {
        let Some(call) = call else {
            return;
        };
        match self.internal_call(app, caller, call).await {
            Ok(resp) if resp.is_error() => {
                warn!(app_id = %app.id(), hook = name, error = %resp.text, "lifecycle hook failed");
            }
            Ok(_) => info!(app_id = %app.id(), hook = name, "lifecycle hook ran"),
            Err(e) => warn!(app_id = %app.id(), hook = name, error = %e, "lifecycle hook failed"),
        }
    }

    /// A proxy-originated call: no path guard.
    async fn internal_call(
        &self,
        app: &App,
        caller: &Caller,
        call: Call,
    ) -> Result<crate::model::CallResponse, ProxyError> {
        let expand = call.expand.clone().unwrap_or_default();
        let user_agent = UserAgentContext {
            app_id: app.id().clone(),
            ..UserAgentContext::default()
        };
        let raw = self
            .load_context(caller, user_agent.clone(), app, &expand)
            .await;
        self.dispatch(app, CallRequest::new(call, user_agent), &raw, caller, None)
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{HttpDeploy, Permission, Subject, Subscription};
    use crate::testutil;
    use serde_json::json;

    fn admin() -> Caller {
        Caller::admin("root", Some("admin-token".into()))
    }

    fn manifest(id: &str, version: &str) -> Manifest {
        Manifest {
            app_id: id.into(),
            version: version.into(),
            homepage_url: format!("https://{id}.example.com"),
            http: Some(HttpDeploy {
                root_url: format!("https://{id}.example.com/app"),
                use_jwt: true,
            }),
            on_install: Some(Call::new("/installed")),
            on_version_changed: Some(Call::new("/upgraded")),
            on_uninstall: Some(Call::new("/uninstalled")),
            on_enable: Some(Call::new("/enabled")),
            on_disable: Some(Call::new("/disabled")),
            requested_permissions: Permissions(vec![Permission::ActAsBot]),
            requested_locations: vec![Location::new("/command"), Location::new("/post_menu")],
            ..Manifest::default()
        }
    }

    fn request(m: Manifest) -> InstallRequest {
        InstallRequest {
            manifest: m,
            bot_user_id: "bot-new".into(),
            bot_username: "new-bot".into(),
            bot_access_token: "bot-token-new".into(),
            ..InstallRequest::default()
        }
    }

    #[tokio::test]
    async fn test_install_mints_secrets_and_runs_hooks() {
        let h = testutil::harness(vec![testutil::app("existing")]).await;
        let app = h.proxy.install(&admin(), request(manifest("new-app", "v1"))).await.unwrap();
        assert_eq!(app.install_seq, 2);
        assert_eq!(app.secret.len(), 32);
        assert_ne!(app.secret, app.webhook_secret);
        assert_eq!(app.granted_locations.len(), 2);
        assert!(app.grants(Permission::ActAsBot));
        assert_eq!(h.script.paths("new-app"), vec!["/ping", "/installed"]);

        let upgraded = h.proxy.install(&admin(), request(manifest("new-app", "v2"))).await.unwrap();
        assert_eq!(upgraded.secret, app.secret);
        assert_eq!(upgraded.install_seq, 2);
        assert_eq!(
            h.script.paths("new-app"),
            vec!["/ping", "/installed", "/ping", "/upgraded"]
        );
    }

    #[tokio::test]
    async fn test_install_rejects_unrequested_grants_and_non_admins() {
        let h = testutil::harness(vec![]).await;
        let err = h
            .proxy
            .install(&Caller::user("u1", None), request(manifest("new-app", "v1")))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Unauthorized(_)));

        let mut req = request(manifest("new-app", "v1"));
        req.granted_permissions = Some(Permissions(vec![Permission::ActAsUser]));
        req.granted_locations = Some(vec![Location::new("/channel_header")]);
        let err = h.proxy.install(&admin(), req).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("permission act_as_user was not requested"));
        assert!(msg.contains("location /channel_header was not requested"));

        let mut req = request(manifest("new-app", "v1"));
        req.granted_locations = Some(vec![Location::new("/command/sub")]);
        let app = h.proxy.install(&admin(), req).await.unwrap();
        assert_eq!(app.granted_locations, vec![Location::new("/command/sub")]);
    }

    #[tokio::test]
    async fn test_hook_failure_does_not_undo_install() {
        let h = testutil::harness(vec![]).await;
        h.script.respond(
            "new-app",
            "/installed",
            crate::model::CallResponse::error("setup failed"),
        );
        h.script.fail("new-app", "/ping", ProxyError::NotFound("new-app/ping".into()));
        let app = h.proxy.install(&admin(), request(manifest("new-app", "v1"))).await.unwrap();
        assert!(h.proxy.apps().get(app.id()).is_ok());
    }

    #[tokio::test]
    async fn test_uninstall_cascades() {
        let mut app = testutil::app("hello");
        app.manifest.on_uninstall = Some(Call::new("/uninstalled"));
        let h = testutil::harness(vec![app.clone()]).await;
        h.entities
            .insert_channel_member(testutil::channel_member("c1", "u1"));
        let user = Caller::user("u1", None).with_app(app.id().clone());
        h.proxy
            .subscribe(
                &user,
                Subscription {
                    subject: Some(Subject::UserJoinedChannel),
                    channel_id: "c1".into(),
                    call: Call::new("/notify"),
                    ..Subscription::default()
                },
            )
            .await
            .unwrap();
        h.proxy.kv_set(&user, "p", "k", json!(1)).await.unwrap();

        h.proxy.uninstall(&admin(), app.id()).await.unwrap();
        assert_eq!(h.script.paths("hello"), vec!["/uninstalled"]);
        assert!(matches!(h.proxy.apps().get(app.id()), Err(ProxyError::NotFound(_))));
        assert!(h.proxy.get_subscriptions(&user).await.unwrap().is_empty());
        assert!(h.proxy.kv.get(app.id(), &user.actor_key(), "p", "k").await.unwrap().is_none());
        assert!(matches!(
            h.proxy.uninstall(&admin(), app.id()).await,
            Err(ProxyError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_enable_disable_hooks_and_idempotence() {
        let mut app = testutil::app("hello");
        app.manifest.on_enable = Some(Call::new("/enabled"));
        app.manifest.on_disable = Some(Call::new("/disabled"));
        let h = testutil::harness(vec![app.clone()]).await;

        let off = h.proxy.disable(&admin(), app.id()).await.unwrap();
        assert!(!off.is_enabled());
        h.proxy.disable(&admin(), app.id()).await.unwrap();
        let on = h.proxy.enable(&admin(), app.id()).await.unwrap();
        assert!(on.is_enabled());
        assert_eq!(h.script.paths("hello"), vec!["/disabled", "/enabled"]);

        let err = h
            .proxy
            .disable(&Caller::user("u1", None), app.id())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Unauthorized(_)));
    }
}
