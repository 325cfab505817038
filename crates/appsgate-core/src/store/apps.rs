/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::OwnedMutexGuard;
use tracing::info;

use super::{get_json, set_json, KeyedLocks, KvBackend};
use crate::error::ProxyError;
use crate::model::{App, AppId};

const APPS_PREFIX: &str = "apps/";

/// Installed-app registry: a read-mostly in-memory index over the backend.
///
/// Reads never touch the backend. Writes go through per-app locks taken
/// with [`AppStore::lock`], so operations on different apps proceed
/// independently.
pub struct AppStore {
    backend: Arc<dyn KvBackend>,
    apps: RwLock<BTreeMap<AppId, Arc<App>>>,
    locks: KeyedLocks,
    removal: KeyedLocks,
}

impl AppStore {
    /// Loads every persisted app into the index.
    pub async fn load(backend: Arc<dyn KvBackend>) -> Result<Self, ProxyError> {
        let mut apps = BTreeMap::new();
        for key in backend.list(APPS_PREFIX).await? {
            if let Some(app) = get_json::<App>(backend.as_ref(), &key).await? {
                apps.insert(app.id().clone(), Arc::new(app));
            }
        }
        info!(count = apps.len(), "loaded installed apps");
        Ok(Self {
            backend,
            apps: RwLock::new(apps),
            locks: KeyedLocks::new(),
            removal: KeyedLocks::new(),
        })
    }

    fn key(app_id: &AppId) -> String {
        format!("{APPS_PREFIX}{app_id}")
    }

    pub async fn lock(&self, app_id: &AppId) -> OwnedMutexGuard<()> {
        self.locks.lock(app_id.as_str()).await
    }

    /// Held while an app's records are removed, and by writers that store
    /// records on the app's behalf. Unlike [`AppStore::lock`] it is never
    /// held across calls to the app, so the app may call back in while a
    /// lifecycle hook runs.
    pub async fn removal_lock(&self, app_id: &AppId) -> OwnedMutexGuard<()> {
        self.removal.lock(app_id.as_str()).await
    }

    pub fn get(&self, app_id: &AppId) -> Result<Arc<App>, ProxyError> {
        self.apps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(app_id)
            .cloned()
            .ok_or_else(|| ProxyError::NotFound(format!("app {app_id}")))
    }

    /// All installed apps in install order.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<App>> {
        let mut apps: Vec<_> = self
            .apps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        apps.sort_by(|a, b| a.install_seq.cmp(&b.install_seq).then_with(|| a.id().cmp(b.id())));
        apps
    }

    #[must_use]
    pub fn enabled(&self) -> Vec<Arc<App>> {
        self.list().into_iter().filter(|a| a.is_enabled()).collect()
    }

    /// Sequence number for a newly installed app.
    #[must_use]
    pub fn next_install_seq(&self) -> u64 {
        self.apps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|a| a.install_seq)
            .max()
            .map_or(1, |s| s + 1)
    }

    /// Persists `app` then publishes it. Callers hold the app's lock.
    pub async fn save(&self, app: App) -> Result<Arc<App>, ProxyError> {
        set_json(self.backend.as_ref(), &Self::key(app.id()), &app).await?;
        let app = Arc::new(app);
        self.apps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(app.id().clone(), Arc::clone(&app));
        Ok(app)
    }

    pub async fn delete(&self, app_id: &AppId) -> Result<(), ProxyError> {
        self.backend.delete(&Self::key(app_id)).await?;
        let removed = self
            .apps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(app_id);
        if removed.is_none() {
            return Err(ProxyError::NotFound(format!("app {app_id}")));
        }
        Ok(())
    }
}
