/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

use std::sync::Arc;

use appsgate_core::lifecycle::InstallRequest;
use appsgate_core::{
    App, AppId, AppView, BindingsOutcome, CallRequest, CallResponse, ChatEvent, NotifyReport,
    OAuth2App, ProxyError, Subscription, UserAgentContext,
};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::auth::caller;
use crate::error::ServerError;
use crate::{AppState, SERVICE_NAME, SERVICE_VERSION};

type Result<T> = std::result::Result<T, ServerError>;

fn deadline(state: &AppState) -> Instant {
    Instant::now() + state.request_deadline
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub apps: usize,
}

pub async fn handler_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        version: SERVICE_VERSION,
        apps: state.proxy.apps().list().len(),
    })
}

// ---------------------------------------------------------------------------
// Bindings and calls
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
pub struct TestFlag {
    #[serde(default)]
    pub test: bool,
}

/// GET /bindings. Per-app errors are only returned in test mode.
pub async fn handler_bindings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(user_agent): Query<UserAgentContext>,
    Query(flag): Query<TestFlag>,
) -> Result<Json<BindingsOutcome>> {
    let caller = caller(&state, &headers)?;
    let mut outcome = state
        .proxy
        .get_bindings(&caller, user_agent, Some(deadline(&state)))
        .await;
    if !(flag.test || state.developer_mode) {
        outcome.errors.clear();
    }
    Ok(Json(outcome))
}

/// POST /call. Failures travel inside the response as an `error` type.
pub async fn handler_call(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(creq): Json<CallRequest>,
) -> Result<Json<CallResponse>> {
    let caller = caller(&state, &headers)?;
    let resp = state
        .proxy
        .call(&caller, creq, Some(deadline(&state)))
        .await;
    Ok(Json(resp))
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

pub async fn handler_subscribe(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(sub): Json<Subscription>,
) -> Result<StatusCode> {
    let caller = caller(&state, &headers)?;
    state.proxy.subscribe(&caller, sub).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn handler_unsubscribe(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(sub): Json<Subscription>,
) -> Result<StatusCode> {
    let caller = caller(&state, &headers)?;
    state.proxy.unsubscribe(&caller, &sub).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn handler_subscriptions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Subscription>>> {
    let caller = caller(&state, &headers)?;
    Ok(Json(state.proxy.get_subscriptions(&caller).await?))
}

/// POST /notify: the event source reports a chat-server event.
pub async fn handler_notify(
    State(state): State<Arc<AppState>>,
    Json(event): Json<ChatEvent>,
) -> Result<Json<NotifyReport>> {
    Ok(Json(state.proxy.notify(&event).await?))
}

// ---------------------------------------------------------------------------
// KV
// ---------------------------------------------------------------------------

pub async fn handler_kv_get(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((prefix, key)): Path<(String, String)>,
) -> Result<Json<Value>> {
    let caller = caller(&state, &headers)?;
    let value = state.proxy.kv_get(&caller, &prefix, &key).await?;
    value
        .map(Json)
        .ok_or_else(|| ProxyError::NotFound(format!("key {key}")).into())
}

pub async fn handler_kv_set(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((prefix, key)): Path<(String, String)>,
    Json(value): Json<Value>,
) -> Result<StatusCode> {
    let caller = caller(&state, &headers)?;
    state.proxy.kv_set(&caller, &prefix, &key, value).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn handler_kv_delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((prefix, key)): Path<(String, String)>,
) -> Result<StatusCode> {
    let caller = caller(&state, &headers)?;
    if state.proxy.kv_delete(&caller, &prefix, &key).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}

pub async fn handler_kv_list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(prefix): Path<String>,
) -> Result<Json<Vec<String>>> {
    let caller = caller(&state, &headers)?;
    Ok(Json(state.proxy.kv_list(&caller, &prefix).await?))
}

// ---------------------------------------------------------------------------
// Remote OAuth2
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
pub struct StateBody {
    pub state: String,
}

pub async fn handler_oauth2_user_get(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let caller = caller(&state, &headers)?;
    let data = state.proxy.get_oauth2_user(&caller).await?;
    Ok(Json(data.unwrap_or(Value::Null)))
}

pub async fn handler_oauth2_user_put(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(data): Json<Value>,
) -> Result<StatusCode> {
    let caller = caller(&state, &headers)?;
    state.proxy.store_oauth2_user(&caller, data).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn handler_oauth2_app_put(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(oauth2): Json<OAuth2App>,
) -> Result<StatusCode> {
    let caller = caller(&state, &headers)?;
    state.proxy.store_oauth2_app(&caller, oauth2).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn handler_oauth2_state_create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StateBody>> {
    let caller = caller(&state, &headers)?;
    let oauth2_state = state.proxy.create_oauth2_state(&caller).await?;
    Ok(Json(StateBody {
        state: oauth2_state,
    }))
}

pub async fn handler_oauth2_state_validate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<StateBody>,
) -> Result<StatusCode> {
    let caller = caller(&state, &headers)?;
    state
        .proxy
        .validate_oauth2_state(&caller, &body.state)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Apps and admin
// ---------------------------------------------------------------------------

/// What lifecycle endpoints report back. Secrets stay server-side.
#[derive(Serialize)]
pub struct LifecycleResponse {
    pub app_id: AppId,
    pub version: String,
    pub disabled: bool,
}

impl From<&App> for LifecycleResponse {
    fn from(app: &App) -> Self {
        Self {
            app_id: app.id().clone(),
            version: app.manifest.version.clone(),
            disabled: app.disabled,
        }
    }
}

pub async fn handler_apps(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<AppView>>> {
    let caller = caller(&state, &headers)?;
    Ok(Json(state.proxy.list_apps(&caller)))
}

pub async fn handler_install(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<InstallRequest>,
) -> Result<Json<LifecycleResponse>> {
    let caller = caller(&state, &headers)?;
    let app = state.proxy.install(&caller, req).await?;
    Ok(Json(LifecycleResponse::from(app.as_ref())))
}

pub async fn handler_uninstall(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(app_id): Path<String>,
) -> Result<StatusCode> {
    let caller = caller(&state, &headers)?;
    state.proxy.uninstall(&caller, &AppId::from(app_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn handler_enable(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(app_id): Path<String>,
) -> Result<Json<LifecycleResponse>> {
    let caller = caller(&state, &headers)?;
    let app = state.proxy.enable(&caller, &AppId::from(app_id)).await?;
    Ok(Json(LifecycleResponse::from(app.as_ref())))
}

pub async fn handler_disable(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(app_id): Path<String>,
) -> Result<Json<LifecycleResponse>> {
    let caller = caller(&state, &headers)?;
    let app = state.proxy.disable(&caller, &AppId::from(app_id)).await?;
    Ok(Json(LifecycleResponse::from(app.as_ref())))
}
