/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Per-app key/value storage, partitioned by (app, actor, prefix).
//!
//! Storage key: `.k/{app}/{hash(actor)}/{hash(prefix)}/{hash(key)}`. The
//! original key is kept in the record so listings can return it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{delete_prefix, get_json, hashed, set_json, KvBackend};
use crate::error::ProxyError;
use crate::model::AppId;

const KV_PREFIX: &str = ".k/";
const MAX_KEY_LENGTH: usize = 256;

#[derive(Serialize, Deserialize)]
struct Entry {
    key: String,
    value: Value,
}

pub struct AppKvStore {
    backend: Arc<dyn KvBackend>,
}

impl AppKvStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    fn partition(app_id: &AppId, actor: &str, prefix: &str) -> String {
        format!("{KV_PREFIX}{app_id}/{}/{}/", hashed(actor), hashed(prefix))
    }

    fn storage_key(app_id: &AppId, actor: &str, prefix: &str, key: &str) -> Result<String, ProxyError> {
        if key.is_empty() {
            return Err(ProxyError::InvalidInput("key must not be empty".to_string()));
        }
        if key.len() > MAX_KEY_LENGTH {
            return Err(ProxyError::InvalidInput(format!(
                "key is longer than {MAX_KEY_LENGTH} bytes"
            )));
        }
        Ok(format!("{}{}", Self::partition(app_id, actor, prefix), hashed(key)))
    }

    pub async fn get(
        &self,
        app_id: &AppId,
        actor: &str,
        prefix: &str,
        key: &str,
    ) -> Result<Option<Value>, ProxyError> {
        let skey = Self::storage_key(app_id, actor, prefix, key)?;
        Ok(get_json::<Entry>(self.backend.as_ref(), &skey)
            .await?
            .map(|e| e.value))
    }

    pub async fn set(
        &self,
        app_id: &AppId,
        actor: &str,
        prefix: &str,
        key: &str,
        value: Value,
    ) -> Result<(), ProxyError> {
        let skey = Self::storage_key(app_id, actor, prefix, key)?;
        let entry = Entry {
            key: key.to_string(),
            value,
        };
        set_json(self.backend.as_ref(), &skey, &entry).await
    }

    /// Returns whether the key existed.
    pub async fn delete(
        &self,
        app_id: &AppId,
        actor: &str,
        prefix: &str,
        key: &str,
    ) -> Result<bool, ProxyError> {
        let skey = Self::storage_key(app_id, actor, prefix, key)?;
        self.backend.delete(&skey).await
    }

    /// Original keys stored under `prefix`, sorted.
    pub async fn list(&self, app_id: &AppId, actor: &str, prefix: &str) -> Result<Vec<String>, ProxyError> {
        let partition = Self::partition(app_id, actor, prefix);
        let mut keys = Vec::new();
        for skey in self.backend.list(&partition).await? {
            if let Some(e) = get_json::<Entry>(self.backend.as_ref(), &skey).await? {
                keys.push(e.key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Removes everything any actor stored for `app_id`.
    pub async fn delete_app(&self, app_id: &AppId) -> Result<usize, ProxyError> {
        delete_prefix(self.backend.as_ref(), &format!("{KV_PREFIX}{app_id}/")).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> AppKvStore {
        AppKvStore::new(Arc::new(crate::store::MemoryKv::new()))
    }

    #[tokio::test]
    async fn test_bot_and_user_partitions_do_not_collide() {
        let kv = store();
        let app = AppId::new("hello");
        kv.set(&app, "b:bot1", "p", "k", json!("bot")).await.unwrap();
        kv.set(&app, "u:bot1", "p", "k", json!("user")).await.unwrap();
        assert_eq!(kv.get(&app, "b:bot1", "p", "k").await.unwrap(), Some(json!("bot")));
        assert_eq!(kv.get(&app, "u:bot1", "p", "k").await.unwrap(), Some(json!("user")));
        assert_eq!(kv.get(&app, "u:other", "p", "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_prefix_and_app_isolation() {
        let kv = store();
        let a = AppId::new("app-a");
        let b = AppId::new("app-b");
        kv.set(&a, "u:1", "p1", "k", json!(1)).await.unwrap();
        kv.set(&a, "u:1", "p2", "k", json!(2)).await.unwrap();
        kv.set(&b, "u:1", "p1", "k", json!(3)).await.unwrap();
        assert_eq!(kv.get(&a, "u:1", "p1", "k").await.unwrap(), Some(json!(1)));
        assert_eq!(kv.get(&b, "u:1", "p1", "k").await.unwrap(), Some(json!(3)));

        assert_eq!(kv.delete_app(&a).await.unwrap(), 2);
        assert_eq!(kv.get(&a, "u:1", "p2", "k").await.unwrap(), None);
        assert_eq!(kv.get(&b, "u:1", "p1", "k").await.unwrap(), Some(json!(3)));
    }

    #[tokio::test]
    async fn test_list_returns_original_keys() {
        let kv = store();
        let app = AppId::new("hello");
        kv.set(&app, "u:1", "p", "zeta", json!(null)).await.unwrap();
        kv.set(&app, "u:1", "p", "alpha/with/slashes", json!(true)).await.unwrap();
        assert_eq!(
            kv.list(&app, "u:1", "p").await.unwrap(),
            vec!["alpha/with/slashes", "zeta"]
        );
        assert!(kv.delete(&app, "u:1", "p", "zeta").await.unwrap());
        assert!(!kv.delete(&app, "u:1", "p", "zeta").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let kv = store();
        let err = kv.set(&AppId::new("hello"), "u:1", "", "", json!(1)).await.unwrap_err();
        assert!(matches!(err, ProxyError::InvalidInput(_)));
    }
}
