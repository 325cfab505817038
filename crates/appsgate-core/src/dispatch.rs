/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! User-facing call entry point and the forbidden-path guard.
//!
//! Lifecycle hooks and proxy-owned endpoints can only be reached from
//! inside the proxy (`lifecycle`, `notify`); anything arriving through
//! [`Proxy::call`] that targets them is refused before the app sees it.

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::authz::Caller;
use crate::bindings::form::clean_form;
use crate::context::RawContext;
use crate::error::ProxyError;
use crate::expand::resolve;
use crate::model::{App, AppMetadata, CallRequest, CallResponse, Context, Manifest};
use crate::proxy::Proxy;

/// Proxy-owned endpoints, blocked together with everything below them.
const RESERVED_PATHS: [&str; 4] = ["/ping", "/oauth2/connect", "/oauth2/complete", "/webhook"];

/// Normalizes a call path: leading `/`, no empty or `.` segments, no `..`.
pub fn clean_path(path: &str) -> Result<String, ProxyError> {
    if !path.starts_with('/') {
        return Err(ProxyError::InvalidInput(format!(
            "call path {path:?} must start with /"
        )));
    }
    let mut out = String::with_capacity(path.len());
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                return Err(ProxyError::InvalidInput(format!(
                    "call path {path:?} may not contain .."
                )))
            }
            s => {
                out.push('/');
                out.push_str(s);
            }
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

/// Refuses reserved proxy endpoints and the paths of the manifest's
/// lifecycle hooks. `path` must already be clean.
pub fn check_forbidden(manifest: &Manifest, path: &str) -> Result<(), ProxyError> {
    let reserved = RESERVED_PATHS
        .iter()
        .any(|r| path == *r || path.strip_prefix(r).is_some_and(|rest| rest.starts_with('/')));
    let lifecycle = manifest
        .lifecycle_calls()
        .any(|(_, call)| clean_path(&call.path).is_ok_and(|p| p == path));
    if reserved || lifecycle {
        return Err(ProxyError::Forbidden(format!("{path} is a forbidden call path")));
    }
    Ok(())
}

impl Proxy {
    /// Executes a call on behalf of `caller`. Every failure, including
    /// those before the app is reached, comes back as an error response.
    pub async fn call(
        &self,
        caller: &Caller,
        creq: CallRequest,
        deadline: Option<Instant>,
    ) -> CallResponse {
        let app_id = creq.context.user_agent.app_id.clone();
        let path = creq.call.path.clone();
        match self.try_call(caller, creq, deadline).await {
            Ok(resp) => resp,
            Err(e) => {
                debug!(app_id = %app_id, path = %path, kind = e.kind(), error = %e, "call failed");
                CallResponse::from_error(&e)
            }
        }
    }

    async fn try_call(
        &self,
        caller: &Caller,
        mut creq: CallRequest,
        deadline: Option<Instant>,
    ) -> Result<CallResponse, ProxyError> {
        let app_id = creq.context.user_agent.app_id.clone();
        if app_id.is_empty() {
            return Err(ProxyError::InvalidInput(
                "app_id is not set in Context, don't know what app to call".to_string(),
            ));
        }
        let app = self.apps.get(&app_id)?;
        app.ensure_enabled()?;

        creq.call.path = clean_path(&creq.call.path)?;
        check_forbidden(&app.manifest, &creq.call.path)?;

        let expand = creq.call.expand.clone().unwrap_or_default();
        let raw = self
            .load_context(caller, creq.context.user_agent.clone(), &app, &expand)
            .await;
        self.dispatch(&app, creq, &raw, caller, deadline).await
    }

    /// Expands the context for `app`, sends the call and checks the answer.
    /// No guard: internal callers reach lifecycle hooks through here.
    pub(crate) async fn dispatch(
        &self,
        app: &App,
        mut creq: CallRequest,
        raw: &RawContext,
        caller: &Caller,
        deadline: Option<Instant>,
    ) -> Result<CallResponse, ProxyError> {
        let expand = creq.call.expand.clone().unwrap_or_default();
        let expanded = resolve(raw, app, &expand, caller, &self.env)?;
        creq.context = Context {
            user_agent: creq.context.user_agent.outgoing(),
            subject: raw.subject,
            expanded: Some(expanded),
        };

        let mut resp = self
            .upstreams
            .invoke(app, &creq, &raw.acting_user_id, deadline)
            .await?;
        resp.validate()?;

        if let Some(form) = resp.form.take() {
            let (form, errs) = clean_form(form)?;
            if !errs.is_empty() {
                warn!(app_id = %app.id(), path = %creq.call.path, errors = %errs, "invalid form fields dropped");
            }
            resp.form = Some(form);
        }
        resp.app_metadata = Some(AppMetadata {
            bot_user_id: app.bot_user_id.clone(),
            bot_username: app.bot_username.clone(),
        });
        Ok(resp)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::expand::{Expand, ExpandLevel, Level};
    use crate::model::{
        Call, CallResponseType, Field, Form, Permission, Permissions, UserAgentContext,
    };
    use crate::testutil;
    use serde_json::json;

    fn request(app_id: &str, path: &str) -> CallRequest {
        CallRequest::new(
            Call::new(path),
            UserAgentContext {
                app_id: app_id.into(),
                channel_id: "c1".into(),
                ..UserAgentContext::default()
            },
        )
    }

    fn lifecycle_app() -> crate::model::App {
        let mut app = testutil::app("hello");
        app.manifest.on_install = Some(Call::new("/on_install"));
        app.manifest.on_uninstall = Some(Call::new("/lifecycle/uninstalled"));
        app
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path("/a//b/./c/").unwrap(), "/a/b/c");
        assert_eq!(clean_path("/").unwrap(), "/");
        assert!(clean_path("a/b").is_err());
        assert!(clean_path("/a/../on_install").is_err());
    }

    #[test]
    fn test_forbidden_paths() {
        let app = lifecycle_app();
        for path in ["/on_install", "/lifecycle/uninstalled", "/ping", "/webhook/gh", "/oauth2/complete"] {
            let err = check_forbidden(&app.manifest, path).unwrap_err();
            assert!(err.to_string().contains("forbidden call path"), "{path}");
        }
        for path in ["/on_install/x", "/pinger", "/send"] {
            assert!(check_forbidden(&app.manifest, path).is_ok(), "{path}");
        }
    }

    #[tokio::test]
    async fn test_lifecycle_path_never_reaches_app() {
        let h = testutil::harness(vec![lifecycle_app()]).await;
        h.script
            .respond("hello", "/on_install", CallResponse::text("installed!"));
        for path in ["/on_install", "//on_install", "/./on_install"] {
            let resp = h
                .proxy
                .call(&Caller::user("u1", None), request("hello", path), None)
                .await;
            assert_eq!(resp.response_type, CallResponseType::Error);
            assert!(resp.text.contains("forbidden call path"), "{}", resp.text);
        }
        assert!(h.script.calls("hello").is_empty());
    }

    #[tokio::test]
    async fn test_call_requires_app_and_enabled() {
        let mut off = testutil::app("off-app");
        off.disabled = true;
        let h = testutil::harness(vec![off]).await;
        let caller = Caller::user("u1", None);

        let resp = h.proxy.call(&caller, request("", "/send"), None).await;
        assert!(resp.text.contains("app_id is not set"));
        let resp = h.proxy.call(&caller, request("missing", "/send"), None).await;
        assert!(resp.text.contains("not found"));
        let resp = h.proxy.call(&caller, request("off-app", "/send"), None).await;
        assert!(resp.text.contains("off-app is disabled"));
    }

    #[tokio::test]
    async fn test_required_expand_failure_never_calls_app() {
        let h = testutil::harness(vec![testutil::app("hello")]).await;
        let mut creq = request("hello", "/send");
        creq.call.expand = Some(Expand {
            acting_user: Level::required(ExpandLevel::Summary),
            ..Expand::default()
        });
        // u1 is unknown to the entity store.
        let resp = h.proxy.call(&Caller::user("u1", None), creq, None).await;
        assert!(resp.is_error());
        assert!(resp.text.contains("acting_user: required but not available"));
        assert!(h.script.calls("hello").is_empty());
    }

    #[tokio::test]
    async fn test_outgoing_context_and_metadata() {
        let mut app = testutil::app("hello");
        app.granted_permissions = Permissions(vec![Permission::ActAsBot, Permission::ActAsUser]);
        let h = testutil::harness(vec![app]).await;
        h.entities.insert_user(testutil::user("u1", "alice"));
        h.entities.insert_channel(testutil::channel("c1", "t1"));
        h.script.respond("hello", "/send", CallResponse::text("sent"));

        let mut creq = request("hello", "/send");
        creq.call.expand = Some(Expand {
            acting_user: Level::optional(ExpandLevel::Id),
            channel: Level::optional(ExpandLevel::Summary),
            acting_user_access_token: Level::optional(ExpandLevel::All),
            ..Expand::default()
        });
        creq.values = Some(json!({"message": "hi"}).as_object().unwrap().clone());
        let resp = h
            .proxy
            .call(&Caller::user("u1", Some("user-token".into())), creq, None)
            .await;
        assert_eq!(resp.text, "sent");
        let meta = resp.app_metadata.unwrap();
        assert_eq!(meta.bot_user_id, "bot-hello");
        assert_eq!(meta.bot_username, "hello-bot");

        let sent = &h.script.calls("hello")[0];
        assert!(sent.context.user_agent.channel_id.is_empty());
        assert_eq!(sent.context.user_agent.app_id.as_str(), "hello");
        let exp = sent.context.expanded.as_ref().unwrap();
        assert_eq!(exp.acting_user.as_ref().unwrap().id, "u1");
        assert!(exp.acting_user.as_ref().unwrap().username.is_empty());
        assert_eq!(exp.channel.as_ref().unwrap().display_name, "Channel c1");
        assert_eq!(exp.acting_user_access_token, "user-token");
        assert_eq!(exp.bot_access_token, "bot-token-hello");
        assert_eq!(exp.app_path, "/plugins/com.mattermost.apps/apps/hello");
        assert_eq!(sent.values.as_ref().unwrap()["message"], "hi");
    }

    #[tokio::test]
    async fn test_bot_caller_never_gets_user_token() {
        let mut app = testutil::app("hello");
        app.granted_permissions = Permissions(vec![Permission::ActAsBot, Permission::ActAsUser]);
        let h = testutil::harness(vec![app.clone()]).await;
        let mut creq = request("hello", "/send");
        creq.call.expand = Some(Expand {
            acting_user_access_token: Level::optional(ExpandLevel::All),
            ..Expand::default()
        });
        let resp = h.proxy.call(&Caller::bot(&app), creq, None).await;
        assert!(!resp.is_error(), "{}", resp.text);
        let exp = h.script.calls("hello")[0].context.expanded.clone().unwrap();
        assert!(exp.acting_user_access_token.is_empty());
    }

    #[tokio::test]
    async fn test_upstream_failures_become_error_responses() {
        let h = testutil::harness(vec![testutil::app("hello")]).await;
        h.script.fail(
            "hello",
            "/broken",
            ProxyError::Upstream("hello: connection refused".into()),
        );
        let resp: CallResponse =
            serde_json::from_value(json!({"type": "call", "text": "?"})).unwrap();
        h.script.respond("hello", "/odd", resp);

        let caller = Caller::user("u1", None);
        let resp = h.proxy.call(&caller, request("hello", "/broken"), None).await;
        assert!(resp.is_error());
        assert!(resp.text.contains("connection refused"));

        let resp = h.proxy.call(&caller, request("hello", "/odd"), None).await;
        assert!(resp.is_error());
        assert!(resp.text.contains("unknown response type"));
    }

    #[tokio::test]
    async fn test_form_responses_are_cleaned() {
        let h = testutil::harness(vec![testutil::app("hello")]).await;
        let field = |name: &str| Field {
            name: name.into(),
            ..Field::default()
        };
        let form = Form {
            submit: Some(Call::new("/submit")),
            fields: vec![field("a"), field("a"), field("b")],
            ..Form::default()
        };
        h.script.respond("hello", "/form", CallResponse::form(form));
        let resp = h
            .proxy
            .call(&Caller::user("u1", None), request("hello", "/form"), None)
            .await;
        assert_eq!(resp.response_type, CallResponseType::Form);
        assert_eq!(resp.form.unwrap().fields.len(), 2);
    }
}
