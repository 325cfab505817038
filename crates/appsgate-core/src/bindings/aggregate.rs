/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

use std::collections::BTreeMap;

use futures::stream::{self, StreamExt};
use serde::{Serialize, Serializer};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{clean_app_bindings, merge, CleanCtx};
use crate::authz::Caller;
use crate::context::RawContext;
use crate::error::{MultiError, ProxyError};
use crate::expand::Expand;
use crate::model::{App, AppId, Binding, CallRequest, CallResponseType, UserAgentContext};
use crate::proxy::Proxy;

/// The merged binding tree plus what each app lost along the way.
#[derive(Serialize, Debug, Default)]
pub struct BindingsOutcome {
    pub bindings: Vec<Binding>,
    #[serde(
        skip_serializing_if = "BTreeMap::is_empty",
        serialize_with = "errors_as_text"
    )]
    pub errors: BTreeMap<AppId, MultiError>,
}

fn errors_as_text<S: Serializer>(
    errors: &BTreeMap<AppId, MultiError>,
    s: S,
) -> Result<S::Ok, S::Error> {
    s.collect_map(errors.iter().map(|(id, e)| (id, e.to_string())))
}

impl Proxy {
    /// Asks every enabled app for its bindings, concurrently, and merges
    /// what survives cleaning. A failing app contributes nothing; its error
    /// is kept in the outcome and logged.
    pub async fn get_bindings(
        &self,
        caller: &Caller,
        user_agent: UserAgentContext,
        deadline: Option<Instant>,
    ) -> BindingsOutcome {
        let apps = self.apps.enabled();
        let expand = apps.iter().fold(Expand::default(), |acc, app| {
            acc.union(&app.manifest.bindings_call().expand.unwrap_or_default())
        });

        let mut raw = RawContext::new(user_agent, caller.user_id.clone());
        if caller.identity.is_user() {
            raw.acting_user_access_token = caller.token.clone().unwrap_or_default();
        }
        let raw = self.loader.load(raw, &expand).await;

        let results: Vec<_> = stream::iter(apps)
            .map(|app| {
                let raw = &raw;
                async move {
                    let result = self.app_bindings(&app, caller, raw, deadline).await;
                    (app, result)
                }
            })
            .buffered(self.bindings_concurrency)
            .collect()
            .await;

        let mut errors: BTreeMap<AppId, MultiError> = BTreeMap::new();
        let mut per_app = Vec::with_capacity(results.len());
        for (app, result) in results {
            match result {
                Ok(bindings) => {
                    let ctx = CleanCtx {
                        app: &app,
                        env: &self.env,
                        user_agent: &raw.user_agent.user_agent,
                    };
                    let (cleaned, errs) = clean_app_bindings(&ctx, bindings);
                    if !errs.is_empty() {
                        errors.insert(app.id().clone(), errs);
                    }
                    per_app.push((app.id().clone(), cleaned));
                }
                Err(e) => {
                    errors.entry(app.id().clone()).or_default().push(e);
                }
            }
        }

        let bindings = merge(per_app, &mut errors);
        for (app_id, errs) in &errors {
            warn!(app_id = %app_id, errors = %errs, "bindings problems");
        }
        debug!(roots = bindings.len(), failed_apps = errors.len(), "bindings aggregated");
        BindingsOutcome { bindings, errors }
    }

    async fn app_bindings(
        &self,
        app: &App,
        caller: &Caller,
        raw: &RawContext,
        deadline: Option<Instant>,
    ) -> Result<Vec<Binding>, ProxyError> {
        if app.granted_locations.is_empty() {
            return Err(ProxyError::Forbidden("no location granted to bind to".to_string()));
        }
        let call = app.manifest.bindings_call();
        let expand = call.expand.clone().unwrap_or_default();
        let mut raw = raw.clone();
        self.load_oauth2_user(&mut raw, caller, app, &expand).await;

        let mut user_agent = raw.user_agent.clone();
        user_agent.app_id = app.id().clone();
        let creq = CallRequest::new(call, user_agent);
        let resp = self.dispatch(app, creq, &raw, caller, deadline).await?;
        match resp.response_type {
            CallResponseType::Ok => match resp.data {
                None | Some(Value::Null) => Ok(Vec::new()),
                Some(data) => serde_json::from_value(data)
                    .map_err(|e| ProxyError::Upstream(format!("invalid bindings: {e}"))),
            },
            CallResponseType::Error => Err(ProxyError::Upstream(resp.text)),
            other => Err(ProxyError::Upstream(format!(
                "unexpected response type {other} for bindings"
            ))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::expand::{ExpandLevel, Level};
    use crate::model::{Call, CallResponse, Location};
    use crate::testutil;
    use std::time::Duration;

    fn leaf(label: &str) -> Binding {
        Binding {
            label: label.into(),
            icon: "icon.png".into(),
            submit: Some(Call::new("/submit")),
            ..Binding::default()
        }
    }

    fn root(location: &str, children: Vec<Binding>) -> Binding {
        Binding {
            bindings: children,
            ..Binding::root(location)
        }
    }

    fn webapp() -> UserAgentContext {
        UserAgentContext {
            user_agent: "webapp".into(),
            channel_id: "c1".into(),
            ..UserAgentContext::default()
        }
    }

    #[tokio::test]
    async fn test_ungranted_locations_single_error_per_app() {
        let mut app = testutil::app("hello");
        app.granted_locations = vec![Location::new(Location::COMMAND)];
        let h = testutil::harness(vec![app]).await;
        h.script.bindings(
            "hello",
            vec![
                root("/command", vec![leaf("hello")]),
                root("/channel_header", vec![leaf("Hello")]),
                root("/post_menu", vec![leaf("Hello")]),
            ],
        );
        let out = h
            .proxy
            .get_bindings(&Caller::user("u1", None), webapp(), None)
            .await;
        assert_eq!(out.bindings.len(), 1);
        assert_eq!(out.bindings[0].location.as_str(), "/command");
        assert_eq!(out.errors.len(), 1);
        let errs = &out.errors[&AppId::from("hello")];
        assert_eq!(errs.len(), 2);
        let msg = errs.to_string();
        assert!(msg.contains("/channel_header"));
        assert!(msg.contains("/post_menu"));
    }

    #[tokio::test]
    async fn test_failing_app_does_not_block_others() {
        let cfg = appsgate_config::ProxyConfig {
            call_timeout_ms: 50,
            ..testutil::proxy_config()
        };
        let h = testutil::harness_with(
            &cfg,
            vec![testutil::app("slow"), testutil::app("broken"), testutil::app("good")],
        )
        .await;
        h.script.delay("slow", Duration::from_secs(5));
        h.script.respond("broken", "/bindings", CallResponse::error("boom"));
        h.script
            .bindings("good", vec![root("/post_menu", vec![leaf("Good")])]);

        let started = std::time::Instant::now();
        let out = h
            .proxy
            .get_bindings(&Caller::user("u1", None), webapp(), None)
            .await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(out.bindings.len(), 1);
        assert_eq!(out.bindings[0].bindings[0].app_id.as_str(), "good");
        assert!(out.errors[&AppId::from("slow")].to_string().contains("timed out"));
        assert!(out.errors[&AppId::from("broken")].to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_no_granted_location_skips_app() {
        let mut app = testutil::app("hello");
        app.granted_locations.clear();
        let h = testutil::harness(vec![app]).await;
        let out = h
            .proxy
            .get_bindings(&Caller::user("u1", None), webapp(), None)
            .await;
        assert!(out.bindings.is_empty());
        assert!(out.errors[&AppId::from("hello")]
            .to_string()
            .contains("no location granted to bind to"));
        assert!(h.script.calls("hello").is_empty());
    }

    #[tokio::test]
    async fn test_install_order_decides_conflicts() {
        let h = testutil::harness(vec![testutil::app("zz-first"), testutil::app("aa-second")]).await;
        h.script
            .bindings("zz-first", vec![root("/command", vec![leaf("weather")])]);
        h.script
            .bindings("aa-second", vec![root("/command", vec![leaf("weather"), leaf("news")])]);
        for _ in 0..5 {
            let out = h
                .proxy
                .get_bindings(&Caller::user("u1", None), webapp(), None)
                .await;
            let kids = &out.bindings[0].bindings;
            let owners: Vec<_> = kids
                .iter()
                .map(|b| (b.label.as_str(), b.app_id.as_str()))
                .collect();
            assert_eq!(owners, vec![("weather", "zz-first"), ("news", "aa-second")]);
            assert!(out.errors[&AppId::from("aa-second")]
                .to_string()
                .contains("duplicate label"));
        }
    }

    #[tokio::test]
    async fn test_bindings_call_gets_declared_expand() {
        let mut app = testutil::app("hello");
        app.manifest.bindings = Some(Call::new("/bindings").with_expand(Expand {
            acting_user: Level::optional(ExpandLevel::Summary),
            channel: Level::optional(ExpandLevel::Id),
            ..Expand::default()
        }));
        let h = testutil::harness(vec![app, testutil::app("plain")]).await;
        h.entities.insert_user(testutil::user("u1", "alice"));
        h.entities.insert_channel(testutil::channel("c1", "t1"));

        let out = h
            .proxy
            .get_bindings(&Caller::user("u1", None), webapp(), None)
            .await;
        assert!(out.errors.is_empty(), "{:?}", out.errors);

        let sent = h.script.calls("hello");
        let exp = sent[0].context.expanded.as_ref().unwrap();
        assert_eq!(exp.acting_user.as_ref().unwrap().username, "alice");
        assert_eq!(exp.channel.as_ref().unwrap().id, "c1");

        let plain = h.script.calls("plain");
        let exp = plain[0].context.expanded.as_ref().unwrap();
        assert!(exp.acting_user.is_none());
        assert!(exp.channel.is_none());
    }

    #[tokio::test]
    async fn test_disabled_apps_not_asked() {
        let mut off = testutil::app("off-app");
        off.disabled = true;
        let h = testutil::harness(vec![off]).await;
        let out = h
            .proxy
            .get_bindings(&Caller::user("u1", None), webapp(), None)
            .await;
        assert!(out.bindings.is_empty());
        assert!(out.errors.is_empty());
        assert!(h.script.calls("off-app").is_empty());
    }

    #[test]
    fn test_outcome_wire_shape() {
        let mut errors = BTreeMap::new();
        errors.insert(AppId::from("hello"), ["a", "b"].into_iter().collect::<MultiError>());
        let out = BindingsOutcome {
            bindings: Vec::new(),
            errors,
        };
        let v = serde_json::to_value(&out).unwrap();
        assert_eq!(v["errors"]["hello"], "2 errors occurred:\n\t* a\n\t* b");
        let empty = serde_json::to_value(BindingsOutcome::default()).unwrap();
        assert!(empty.get("errors").is_none());
    }
}
