/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Remote OAuth2 data: per-user tokens and one-shot connect states.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{delete_prefix, get_json, hashed, set_json, KvBackend};
use crate::error::ProxyError;
use crate::model::AppId;

const USER_PREFIX: &str = ".u/";
const STATE_PREFIX: &str = ".s/";
const STATE_TTL_MINUTES: i64 = 15;

#[derive(Serialize, Deserialize)]
struct StateRecord {
    expires_at: DateTime<Utc>,
}

pub struct OAuth2Store {
    backend: Arc<dyn KvBackend>,
}

impl OAuth2Store {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    fn user_key(app_id: &AppId, user_id: &str) -> String {
        format!("{USER_PREFIX}{app_id}/{}", hashed(user_id))
    }

    fn state_key(app_id: &AppId, state: &str) -> String {
        format!("{STATE_PREFIX}{app_id}/{}", hashed(state))
    }

    pub async fn save_user(&self, app_id: &AppId, user_id: &str, data: &Value) -> Result<(), ProxyError> {
        set_json(self.backend.as_ref(), &Self::user_key(app_id, user_id), data).await
    }

    pub async fn get_user(&self, app_id: &AppId, user_id: &str) -> Result<Option<Value>, ProxyError> {
        get_json(self.backend.as_ref(), &Self::user_key(app_id, user_id)).await
    }

    /// Mints a `{random}.{user_id}` state, valid for one use within 15
    /// minutes.
    pub async fn create_state(&self, app_id: &AppId, user_id: &str) -> Result<String, ProxyError> {
        self.create_state_at(app_id, user_id, Utc::now()).await
    }

    async fn create_state_at(
        &self,
        app_id: &AppId,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<String, ProxyError> {
        let state = format!("{}.{user_id}", uuid::Uuid::new_v4().simple());
        let record = StateRecord {
            expires_at: now + Duration::minutes(STATE_TTL_MINUTES),
        };
        set_json(self.backend.as_ref(), &Self::state_key(app_id, &state), &record).await?;
        Ok(state)
    }

    /// Consumes `state`. It must exist, be unexpired and belong to `user_id`.
    pub async fn validate_state_once(
        &self,
        app_id: &AppId,
        user_id: &str,
        state: &str,
    ) -> Result<(), ProxyError> {
        self.validate_state_at(app_id, user_id, state, Utc::now()).await
    }

    async fn validate_state_at(
        &self,
        app_id: &AppId,
        user_id: &str,
        state: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ProxyError> {
        let owner = state.split_once('.').map(|(_, u)| u);
        if owner != Some(user_id) {
            return Err(ProxyError::Forbidden("OAuth2 state does not belong to the user".to_string()));
        }
        let key = Self::state_key(app_id, state);
        let record: Option<StateRecord> = get_json(self.backend.as_ref(), &key).await?;
        let Some(record) = record else {
            return Err(ProxyError::Forbidden("OAuth2 state not found or already used".to_string()));
        };
        self.backend.delete(&key).await?;
        if record.expires_at < now {
            return Err(ProxyError::Forbidden("OAuth2 state expired".to_string()));
        }
        Ok(())
    }

    pub async fn delete_app(&self, app_id: &AppId) -> Result<usize, ProxyError> {
        let users = delete_prefix(self.backend.as_ref(), &format!("{USER_PREFIX}{app_id}/")).await?;
        let states = delete_prefix(self.backend.as_ref(), &format!("{STATE_PREFIX}{app_id}/")).await?;
        Ok(users + states)
    }
}
