/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Subscriptions and event delivery.
//!
//! Each matching subscription is delivered on its own: its stored expand,
//! its stored identity, its own upstream call. Delivery is at most once;
//! failures are reported and logged, never retried.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use futures::stream::{self, StreamExt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::authz::{Caller, IdentityClass};
use crate::context::RawContext;
use crate::error::ProxyError;
use crate::model::{
    App, AppId, CallRequest, Event, Subject, SubjectScope, Subscription, UserAgentContext,
};
use crate::proxy::Proxy;
use crate::store::subscriptions::StoredSubscription;

static MENTION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\B@([[:alnum:]][[:alnum:]\.\-_:]*)").ok());

/// `@name` mentions in a post message, without the `@` and any trailing
/// punctuation.
fn mentions(message: &str) -> HashSet<String> {
    let Some(re) = MENTION.as_ref() else {
        return HashSet::new();
    };
    re.captures_iter(message)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches(['.', '-', '_', ':']).to_string())
        .collect()
}

/// A chat-server event as reported by the event source.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChatEvent {
    pub subject: Subject,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub channel_id: String,
    /// The user the event is about (who joined, who was created).
    #[serde(default)]
    pub user_id: String,
    /// Who caused it. Defaults to `user_id`.
    #[serde(default)]
    pub acting_user_id: String,
    #[serde(default)]
    pub post_id: String,
}

impl ChatEvent {
    fn acting_user_id(&self) -> &str {
        if self.acting_user_id.is_empty() {
            &self.user_id
        } else {
            &self.acting_user_id
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct NotifyFailure {
    pub app_id: AppId,
    pub user_id: String,
    pub error: String,
}

#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct NotifyReport {
    pub delivered: usize,
    /// Subscriptions that matched but no longer apply: disabled app,
    /// subscriber no longer a member.
    pub skipped: usize,
    pub errors: Vec<NotifyFailure>,
}

struct Target {
    app: Arc<App>,
    sub: StoredSubscription,
    subject: Subject,
}

enum Delivery {
    Delivered,
    Skipped,
    Failed(NotifyFailure),
}

impl Proxy {
    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    fn subscribing_app(&self, caller: &Caller) -> Result<Arc<App>, ProxyError> {
        let app_id = caller
            .app_id
            .as_ref()
            .ok_or_else(|| ProxyError::InvalidInput("app_id is not set".to_string()))?;
        let app = self.apps.get(app_id)?;
        app.ensure_enabled()?;
        Ok(app)
    }

    /// Subscribes `caller` on behalf of its app, replacing any earlier
    /// subscription of the same (app, user) to the same event.
    ///
    /// The app's removal lock is held from the existence check to the
    /// write, so a concurrent uninstall either rejects this call or removes
    /// the new record.
    pub async fn subscribe(&self, caller: &Caller, mut sub: Subscription) -> Result<(), ProxyError> {
        let app_id = caller
            .app_id
            .as_ref()
            .ok_or_else(|| ProxyError::InvalidInput("app_id is not set".to_string()))?;
        let _removal = self.apps.removal_lock(app_id).await;
        let app = self.subscribing_app(caller)?;
        sub.app_id = app.id().clone();
        sub.user_id.clone_from(&caller.user_id);
        sub.validate()?;
        if let Some(expand) = &sub.call.expand {
            expand.validate()?;
        }
        let event = sub.event()?;

        if !caller.is_admin() {
            self.check_membership(&event, &caller.user_id).await.map_err(|e| {
                ProxyError::Forbidden(format!("no permission to subscribe to {event}: {e}"))
            })?;
        }

        self.subscriptions
            .put(
                &event,
                StoredSubscription {
                    app_id: sub.app_id.clone(),
                    user_id: sub.user_id.clone(),
                    identity: caller.identity,
                    call: sub.call,
                },
            )
            .await?;
        info!(app_id = %sub.app_id, user_id = %sub.user_id, event = %event, "subscribed");
        Ok(())
    }

    pub async fn unsubscribe(&self, caller: &Caller, sub: &Subscription) -> Result<(), ProxyError> {
        let app_id = caller
            .app_id
            .as_ref()
            .ok_or_else(|| ProxyError::InvalidInput("app_id is not set".to_string()))?;
        let event = sub.event()?;
        self.subscriptions
            .delete(&event, app_id, &caller.user_id)
            .await?;
        info!(app_id = %app_id, user_id = %caller.user_id, event = %event, "unsubscribed");
        Ok(())
    }

    /// The caller's subscriptions, limited to the caller's app when set.
    pub async fn get_subscriptions(&self, caller: &Caller) -> Result<Vec<Subscription>, ProxyError> {
        self.subscriptions
            .list(|s| {
                s.user_id == caller.user_id
                    && caller.app_id.as_ref().map_or(true, |id| *id == s.app_id)
            })
            .await
    }

    async fn check_membership(&self, event: &Event, user_id: &str) -> Result<(), ProxyError> {
        let entities = self.loader.entities();
        match event.subject.scope() {
            SubjectScope::Global => Ok(()),
            SubjectScope::Team => entities.team_member(&event.team_id, user_id).await.map(|_| ()),
            SubjectScope::Channel => entities
                .channel_member(&event.channel_id, user_id)
                .await
                .map(|_| ()),
        }
    }

    // -----------------------------------------------------------------------
    // Delivery
    // -----------------------------------------------------------------------

    /// Delivers `event` to every matching subscription.
    pub async fn notify(&self, event: &ChatEvent) -> Result<NotifyReport, ProxyError> {
        let targets = self.targets(event).await?;
        debug!(subject = %event.subject, targets = targets.len(), "notifying");

        let outcomes: Vec<Delivery> = stream::iter(targets)
            .map(|t| self.deliver(event, t))
            .buffer_unordered(self.notify_concurrency)
            .collect()
            .await;

        let mut report = NotifyReport::default();
        for outcome in outcomes {
            match outcome {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Skipped => report.skipped += 1,
                Delivery::Failed(f) => report.errors.push(f),
            }
        }
        report
            .errors
            .sort_by(|a, b| (&a.app_id, &a.user_id).cmp(&(&b.app_id, &b.user_id)));
        Ok(report)
    }

    async fn targets(&self, event: &ChatEvent) -> Result<Vec<Target>, ProxyError> {
        let mut targets = Vec::new();
        let direct = Event::new(event.subject, event.team_id.as_str(), event.channel_id.as_str())?;
        let bot_only = event.subject.is_bot_subject();
        self.collect(&direct, &mut targets, |app| {
            !bot_only || (!app.bot_user_id.is_empty() && app.bot_user_id == event.user_id)
        })
        .await?;

        if let Some(bot_subject) = event.subject.bot_counterpart() {
            let bot_event = Event::new(bot_subject, "", "")?;
            self.collect(&bot_event, &mut targets, |app| {
                !app.bot_user_id.is_empty() && app.bot_user_id == event.user_id
            })
            .await?;
        }

        if event.subject == Subject::PostCreated && !event.post_id.is_empty() {
            match self.loader.entities().post(&event.post_id).await {
                Ok(post) => {
                    let mentioned = mentions(&post.message);
                    if !mentioned.is_empty() {
                        let ev = Event::new(Subject::BotMentioned, "", "")?;
                        self.collect(&ev, &mut targets, |app| {
                            !app.bot_username.is_empty() && mentioned.contains(&app.bot_username)
                        })
                        .await?;
                    }
                }
                Err(e) => debug!(post_id = %event.post_id, error = %e, "post unavailable for mentions"),
            }
        }
        Ok(targets)
    }

    async fn collect(
        &self,
        event: &Event,
        targets: &mut Vec<Target>,
        matches: impl Fn(&App) -> bool,
    ) -> Result<(), ProxyError> {
        for sub in self.subscriptions.get(event).await? {
            match self.apps.get(&sub.app_id) {
                Ok(app) if matches(&app) => targets.push(Target {
                    app,
                    sub,
                    subject: event.subject,
                }),
                Ok(_) => {}
                Err(e) => debug!(app_id = %sub.app_id, error = %e, "subscription of a missing app"),
            }
        }
        Ok(())
    }

    async fn deliver(&self, event: &ChatEvent, target: Target) -> Delivery {
        let Target { app, sub, subject } = target;
        if !app.is_enabled() {
            return Delivery::Skipped;
        }
        let caller = match sub.identity {
            IdentityClass::Bot => Caller::bot(&app),
            IdentityClass::ActingUser => Caller::user(sub.user_id.clone(), None).with_app(app.id().clone()),
            IdentityClass::Admin => Caller::admin(sub.user_id.clone(), None).with_app(app.id().clone()),
        };
        let scoped = Event {
            subject,
            team_id: event.team_id.clone(),
            channel_id: event.channel_id.clone(),
        };
        if let Err(e) = self.check_membership(&scoped, &caller.user_id).await {
            debug!(app_id = %app.id(), user_id = %caller.user_id, error = %e, "subscriber no longer a member");
            return Delivery::Skipped;
        }

        let user_agent = UserAgentContext {
            app_id: app.id().clone(),
            channel_id: event.channel_id.clone(),
            team_id: event.team_id.clone(),
            post_id: event.post_id.clone(),
            ..UserAgentContext::default()
        };
        let expand = sub.call.expand.clone().unwrap_or_default();
        let mut raw = RawContext::new(user_agent.clone(), event.acting_user_id());
        raw.subject = Some(subject);
        raw.user_id.clone_from(&event.user_id);
        self.load_oauth2_user(&mut raw, &caller, &app, &expand).await;
        let raw = self.loader.load(raw, &expand).await;

        let creq = CallRequest::new(sub.call.clone(), user_agent);
        let failure = match self.dispatch(&app, creq, &raw, &caller, None).await {
            Ok(resp) if !resp.is_error() => return Delivery::Delivered,
            Ok(resp) => resp.text,
            Err(e) => e.to_string(),
        };
        warn!(app_id = %app.id(), user_id = %sub.user_id, subject = %subject, error = %failure, "notification failed");
        Delivery::Failed(NotifyFailure {
            app_id: app.id().clone(),
            user_id: sub.user_id,
            error: failure,
        })
    }
}
