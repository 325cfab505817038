/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

use std::collections::BTreeMap;
use std::sync::Arc;

use super::Upstream;
use crate::error::ProxyError;
use crate::model::{App, AppId, CallRequest, CallResponse, Manifest};

/// An app compiled into the proxy.
#[async_trait::async_trait]
pub trait BuiltinApp: Send + Sync {
    fn manifest(&self) -> Manifest;

    async fn call(&self, creq: &CallRequest) -> Result<CallResponse, ProxyError>;
}

/// Dispatches to in-process apps by ID.
#[derive(Default)]
pub struct BuiltinUpstream {
    apps: BTreeMap<AppId, Arc<dyn BuiltinApp>>,
}

impl BuiltinUpstream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, app: Arc<dyn BuiltinApp>) -> Self {
        self.apps.insert(app.manifest().app_id, app);
        self
    }

    #[must_use]
    pub fn manifests(&self) -> Vec<Manifest> {
        self.apps.values().map(|a| a.manifest()).collect()
    }
}

#[async_trait::async_trait]
impl Upstream for BuiltinUpstream {
    async fn roundtrip(
        &self,
        app: &App,
        creq: &CallRequest,
        _acting_user_id: &str,
    ) -> Result<CallResponse, ProxyError> {
        let builtin = self
            .apps
            .get(app.id())
            .ok_or_else(|| ProxyError::NotFound(format!("builtin app {}", app.id())))?;
        builtin.call(creq).await
    }
}
