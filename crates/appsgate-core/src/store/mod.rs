/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Persistence: a byte-oriented key/value backend and the typed stores
//! built over it.

pub mod apps;
pub mod kv;
pub mod locks;
pub mod oauth2;
pub mod subscriptions;

pub use apps::AppStore;
pub use kv::AppKvStore;
pub use locks::KeyedLocks;
pub use oauth2::OAuth2Store;
pub use subscriptions::SubscriptionStore;

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::error::ProxyError;

#[async_trait::async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ProxyError>;
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), ProxyError>;
    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, ProxyError>;
    /// Keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, ProxyError>;
}

/// Process-local backend. State does not survive a restart.
#[derive(Default)]
pub struct MemoryKv {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl KvBackend for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ProxyError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), ProxyError> {
        self.data.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, ProxyError> {
        Ok(self.data.write().await.remove(key).is_some())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, ProxyError> {
        Ok(self
            .data
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

pub(crate) async fn get_json<T: DeserializeOwned>(
    backend: &dyn KvBackend,
    key: &str,
) -> Result<Option<T>, ProxyError> {
    match backend.get(key).await? {
        None => Ok(None),
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| ProxyError::Store(format!("corrupt record at {key}: {e}"))),
    }
}

pub(crate) async fn set_json<T: Serialize + ?Sized>(
    backend: &dyn KvBackend,
    key: &str,
    value: &T,
) -> Result<(), ProxyError> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| ProxyError::Internal(format!("failed to encode {key}: {e}")))?;
    backend.set(key, bytes).await
}

pub(crate) async fn delete_prefix(backend: &dyn KvBackend, prefix: &str) -> Result<usize, ProxyError> {
    let keys = backend.list(prefix).await?;
    for key in &keys {
        backend.delete(key).await?;
    }
    Ok(keys.len())
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Fixed-width key component: user-supplied strings never contain `/`.
pub(crate) fn hashed(s: &str) -> String {
    hex_encode(&Sha256::digest(s.as_bytes()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_kv_prefix_listing() {
        let kv = MemoryKv::new();
        kv.set("apps/a", b"1".to_vec()).await.unwrap();
        kv.set("apps/b", b"2".to_vec()).await.unwrap();
        kv.set("appsx", b"3".to_vec()).await.unwrap();
        kv.set("subs/x", b"4".to_vec()).await.unwrap();
        assert_eq!(kv.list("apps/").await.unwrap(), vec!["apps/a", "apps/b"]);
        assert!(kv.delete("apps/a").await.unwrap());
        assert!(!kv.delete("apps/a").await.unwrap());
        assert_eq!(delete_prefix(&kv, "apps").await.unwrap(), 2);
        assert_eq!(kv.list("").await.unwrap(), vec!["subs/x"]);
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let kv = MemoryKv::new();
        set_json(&kv, "k", &vec![1, 2, 3]).await.unwrap();
        let v: Option<Vec<u32>> = get_json(&kv, "k").await.unwrap();
        assert_eq!(v, Some(vec![1, 2, 3]));
        kv.set("bad", b"{".to_vec()).await.unwrap();
        let err = get_json::<Vec<u32>>(&kv, "bad").await.unwrap_err();
        assert_eq!(err.kind(), "store");
        assert!(get_json::<u8>(&kv, "none").await.unwrap().is_none());
    }

    #[test]
    fn test_hashed_is_fixed_width_hex() {
        let h = hashed("some/key with spaces");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(h, hashed("some/key with space"));
    }
}
