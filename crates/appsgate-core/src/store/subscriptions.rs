/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Subscriptions, stored one record per (event, app, user).
//!
//! Key layout: `subs/{subject}/{team}/{channel}/{app}/{user}`, IDs hashed and
//! `-` for an unused scope ID, so that all subscriptions for an event share a
//! prefix.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{get_json, hashed, set_json, KeyedLocks, KvBackend};
use crate::authz::IdentityClass;
use crate::error::ProxyError;
use crate::model::{AppId, Call, Event, Subscription};

const SUBS_PREFIX: &str = "subs/";

/// A subscription as persisted: who created it and with what identity.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StoredSubscription {
    pub app_id: AppId,
    pub user_id: String,
    pub identity: IdentityClass,
    pub call: Call,
}

#[derive(Serialize, Deserialize)]
struct Record {
    event: Event,
    sub: StoredSubscription,
}

impl StoredSubscription {
    #[must_use]
    pub fn to_subscription(&self, event: &Event) -> Subscription {
        Subscription {
            app_id: self.app_id.clone(),
            user_id: self.user_id.clone(),
            subject: Some(event.subject),
            team_id: event.team_id.clone(),
            channel_id: event.channel_id.clone(),
            call: self.call.clone(),
        }
    }
}

fn scope_part(id: &str) -> String {
    if id.is_empty() {
        "-".to_string()
    } else {
        hashed(id)
    }
}

fn event_prefix(event: &Event) -> String {
    format!(
        "{SUBS_PREFIX}{}/{}/{}/",
        event.subject,
        scope_part(&event.team_id),
        scope_part(&event.channel_id)
    )
}

fn record_key(event: &Event, app_id: &AppId, user_id: &str) -> String {
    format!("{}{}/{}", event_prefix(event), hashed(app_id.as_str()), hashed(user_id))
}

pub struct SubscriptionStore {
    backend: Arc<dyn KvBackend>,
    locks: KeyedLocks,
}

impl SubscriptionStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            backend,
            locks: KeyedLocks::new(),
        }
    }

    fn lock_key(app_id: &AppId, user_id: &str) -> String {
        format!("{app_id}/{user_id}")
    }

    /// Adds or replaces the (app, user) subscription to `event`.
    pub async fn put(&self, event: &Event, sub: StoredSubscription) -> Result<(), ProxyError> {
        let _guard = self.locks.lock(&Self::lock_key(&sub.app_id, &sub.user_id)).await;
        let key = record_key(event, &sub.app_id, &sub.user_id);
        let record = Record {
            event: event.clone(),
            sub,
        };
        set_json(self.backend.as_ref(), &key, &record).await
    }

    pub async fn delete(&self, event: &Event, app_id: &AppId, user_id: &str) -> Result<(), ProxyError> {
        let _guard = self.locks.lock(&Self::lock_key(app_id, user_id)).await;
        if self.backend.delete(&record_key(event, app_id, user_id)).await? {
            Ok(())
        } else {
            Err(ProxyError::NotFound(format!(
                "subscription of {app_id} for {user_id} to {event}"
            )))
        }
    }

    /// Subscriptions for `event`, ordered by (app, user).
    pub async fn get(&self, event: &Event) -> Result<Vec<StoredSubscription>, ProxyError> {
        let mut subs: Vec<StoredSubscription> = self
            .records(&event_prefix(event))
            .await?
            .into_iter()
            .map(|r| r.sub)
            .collect();
        subs.sort_by(|a, b| (&a.app_id, &a.user_id).cmp(&(&b.app_id, &b.user_id)));
        Ok(subs)
    }

    /// Every subscription matching `filter`, across all events.
    pub async fn list(
        &self,
        filter: impl Fn(&StoredSubscription) -> bool,
    ) -> Result<Vec<Subscription>, ProxyError> {
        let mut out: Vec<Subscription> = self
            .records(SUBS_PREFIX)
            .await?
            .into_iter()
            .filter(|r| filter(&r.sub))
            .map(|r| r.sub.to_subscription(&r.event))
            .collect();
        out.sort_by(|a, b| {
            (&a.app_id, &a.user_id, a.subject, &a.team_id, &a.channel_id).cmp(&(
                &b.app_id,
                &b.user_id,
                b.subject,
                &b.team_id,
                &b.channel_id,
            ))
        });
        Ok(out)
    }

    /// Drops every subscription owned by `app_id`.
    pub async fn delete_app(&self, app_id: &AppId) -> Result<usize, ProxyError> {
        let app_part = hashed(app_id.as_str());
        let mut removed = 0;
        for key in self.backend.list(SUBS_PREFIX).await? {
            let owner = key.rsplit('/').nth(1);
            if owner == Some(app_part.as_str()) && self.backend.delete(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn records(&self, prefix: &str) -> Result<Vec<Record>, ProxyError> {
        let mut out = Vec::new();
        for key in self.backend.list(prefix).await? {
            if let Some(r) = get_json::<Record>(self.backend.as_ref(), &key).await? {
                out.push(r);
            }
        }
        Ok(out)
    }
}
