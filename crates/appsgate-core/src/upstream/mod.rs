/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Transports to installed apps, one per deploy type.

pub mod builtin;
pub mod http;
pub mod lambda;

pub use builtin::{BuiltinApp, BuiltinUpstream};
pub use http::HttpUpstream;
pub use lambda::LambdaUpstream;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use appsgate_runtime::BreakerSet;
use tokio::time::Instant;
use tracing::warn;

use crate::error::ProxyError;
use crate::model::{App, CallRequest, CallResponse, DeployType};

#[async_trait::async_trait]
pub trait Upstream: Send + Sync {
    /// Sends `creq` to `app` and returns its decoded response.
    async fn roundtrip(
        &self,
        app: &App,
        creq: &CallRequest,
        acting_user_id: &str,
    ) -> Result<CallResponse, ProxyError>;
}

/// Deploy-type registry with a per-app circuit breaker and call timeout.
pub struct Upstreams {
    by_type: HashMap<DeployType, Arc<dyn Upstream>>,
    breakers: BreakerSet,
    timeout: Duration,
}

impl Upstreams {
    #[must_use]
    pub fn new(timeout: Duration, breakers: BreakerSet) -> Self {
        Self {
            by_type: HashMap::new(),
            breakers,
            timeout,
        }
    }

    #[must_use]
    pub fn with(mut self, deploy_type: DeployType, upstream: Arc<dyn Upstream>) -> Self {
        self.by_type.insert(deploy_type, upstream);
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn reset(&self, app: &App) {
        self.breakers.reset(app.id().as_str());
    }

    /// Calls `app`, giving up at the earlier of `deadline` and the
    /// configured timeout.
    ///
    /// Transport failures and hitting the configured timeout count against
    /// the app's breaker. Any other answer, including an application-level
    /// error such as a 404, counts as the app being reachable. Running out
    /// of the caller's own deadline records nothing.
    pub async fn invoke(
        &self,
        app: &App,
        creq: &CallRequest,
        acting_user_id: &str,
        deadline: Option<Instant>,
    ) -> Result<CallResponse, ProxyError> {
        let deploy_type = app
            .deploy_type
            .or_else(|| app.manifest.deploy_type())
            .ok_or_else(|| ProxyError::InvalidInput(format!("{} has no deploy type", app.id())))?;
        let upstream = self.by_type.get(&deploy_type).ok_or_else(|| {
            ProxyError::Internal(format!("no upstream for deploy type {deploy_type}"))
        })?;

        let breaker = self.breakers.get(app.id().as_str());
        // Dropping the permit, on any early return or cancellation, frees a
        // half-open probe slot.
        let permit = breaker
            .acquire()
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;

        let timeout_at = Instant::now() + self.timeout;
        let (limit, timeout_binds) = match deadline {
            Some(d) if d < timeout_at => (d, false),
            _ => (timeout_at, true),
        };
        match tokio::time::timeout_at(limit, upstream.roundtrip(app, creq, acting_user_id)).await {
            Ok(Ok(resp)) => {
                permit.success();
                Ok(resp)
            }
            Ok(Err(e)) => {
                if matches!(e, ProxyError::Upstream(_)) {
                    permit.failure();
                } else {
                    permit.success();
                }
                Err(e)
            }
            Err(_) if timeout_binds => {
                permit.failure();
                warn!(app_id = %app.id(), path = %creq.call.path, "app call timed out");
                Err(ProxyError::Upstream(format!(
                    "{}: call to {} timed out",
                    app.id(),
                    creq.call.path
                )))
            }
            Err(_) => {
                drop(permit);
                warn!(app_id = %app.id(), path = %creq.call.path, "request deadline passed during app call");
                Err(ProxyError::Upstream(format!(
                    "{}: call to {} timed out at the request deadline",
                    app.id(),
                    creq.call.path
                )))
            }
        }
    }
}
