/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod auth;
mod error;
mod handlers;

use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use appsgate_config::Config;
use appsgate_core::builtin::AppsBuiltin;
use appsgate_core::entities::{EntityStore, HttpEntityStore, MemoryEntityStore};
use appsgate_core::store::{AppStore, KvBackend, MemoryKv};
use appsgate_core::upstream::{
    BuiltinApp, BuiltinUpstream, HttpUpstream, LambdaUpstream, Upstreams,
};
use appsgate_core::{DeployType, Proxy, ProxyDeps, ProxyError};
use appsgate_runtime::BreakerSet;
use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, Method};
use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info, warn};

pub(crate) const SERVICE_NAME: &str = "appsgate-server";
pub(crate) const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub proxy: Proxy,
    pub api_key: String,
    pub request_deadline: Duration,
    pub developer_mode: bool,
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("fatal: failed to load config: {e}");
        process::exit(1);
    });

    let _telemetry_guard = appsgate_telemetry::init_telemetry(SERVICE_NAME, &config.telemetry)
        .unwrap_or_else(|e| {
            eprintln!("fatal: telemetry init failed: {e}");
            process::exit(1);
        });

    info!(service = SERVICE_NAME, version = SERVICE_VERSION, "starting");

    let state = match init_state(&config).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "fatal: failed to initialise");
            process::exit(1);
        }
    };

    let app = build_router(Arc::new(state), &config);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(addr = %addr, "listening");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "failed to bind");
            process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(appsgate_runtime::shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
        process::exit(1);
    }

    info!("shutdown complete");
}

fn env_secret(name: &str) -> Result<String, ProxyError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ProxyError::InvalidInput(format!("environment variable {name} is not set")))
}

async fn init_state(config: &Config) -> Result<AppState, ProxyError> {
    let api_key = env_secret(&config.server.api_key_name)?;

    let entities: Arc<dyn EntityStore> = if config.chat_server.url.is_empty() {
        warn!("no chat server configured, using an empty in-memory entity store");
        Arc::new(MemoryEntityStore::new())
    } else {
        let token = env_secret(&config.chat_server.token_name)?;
        Arc::new(HttpEntityStore::new(
            &config.chat_server.url,
            token,
            Duration::from_millis(config.chat_server.timeout_ms),
        )?)
    };

    // TODO: persist to the chat server's KV store once it exposes a service API.
    let backend: Arc<dyn KvBackend> = Arc::new(MemoryKv::new());
    let apps = Arc::new(AppStore::load(Arc::clone(&backend)).await?);

    let builtin: Arc<dyn BuiltinApp> = Arc::new(AppsBuiltin::new(Arc::clone(&apps)));
    let builtins = BuiltinUpstream::new().with(builtin);
    let manifests = builtins.manifests();

    let pcfg = &config.proxy;
    let timeout = Duration::from_millis(pcfg.call_timeout_ms);
    let mut upstreams = Upstreams::new(
        timeout,
        BreakerSet::new(pcfg.breaker_threshold, pcfg.breaker_half_open_secs),
    )
    .with(DeployType::Http, Arc::new(HttpUpstream::new(timeout)?))
    .with(DeployType::Builtin, Arc::new(builtins));
    if let Some(invoke_url) = &config.lambda.invoke_url {
        upstreams = upstreams.with(
            DeployType::AwsLambda,
            Arc::new(LambdaUpstream::new(invoke_url, timeout)?),
        );
        info!(invoke_url = %invoke_url, "lambda upstream enabled");
    }

    let proxy = Proxy::new(
        pcfg,
        ProxyDeps {
            apps,
            backend,
            entities,
            upstreams,
        },
    );
    proxy.install_builtins(manifests).await?;

    Ok(AppState {
        proxy,
        api_key,
        request_deadline: Duration::from_millis(config.server.request_deadline_ms),
        developer_mode: pcfg.developer_mode,
    })
}

// ---------------------------------------------------------------------------
// Router construction
// ---------------------------------------------------------------------------

fn build_router(state: Arc<AppState>, config: &Config) -> Router {
    let cors = build_cors_layer(&config.server.cors_origins);

    let api_routes = Router::new()
        .route("/bindings", get(handlers::handler_bindings))
        .route("/call", post(handlers::handler_call))
        .route("/subscribe", post(handlers::handler_subscribe))
        .route("/unsubscribe", post(handlers::handler_unsubscribe))
        .route("/subscriptions", get(handlers::handler_subscriptions))
        .route("/notify", post(handlers::handler_notify))
        .route(
            "/kv/:prefix/:key",
            get(handlers::handler_kv_get)
                .put(handlers::handler_kv_set)
                .delete(handlers::handler_kv_delete),
        )
        .route("/kv/:prefix", get(handlers::handler_kv_list))
        .route(
            "/oauth2/user",
            get(handlers::handler_oauth2_user_get).put(handlers::handler_oauth2_user_put),
        )
        .route("/oauth2/app", put(handlers::handler_oauth2_app_put))
        .route("/oauth2/state", post(handlers::handler_oauth2_state_create))
        .route(
            "/oauth2/state/validate",
            post(handlers::handler_oauth2_state_validate),
        )
        .route("/apps", get(handlers::handler_apps))
        .route("/admin/install", post(handlers::handler_install))
        .route("/admin/:app_id/uninstall", post(handlers::handler_uninstall))
        .route("/admin/:app_id/enable", post(handlers::handler_enable))
        .route("/admin/:app_id/disable", post(handlers::handler_disable))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::api_key_middleware,
        ))
        .with_state(Arc::clone(&state));

    Router::new()
        .route("/health", get(handlers::handler_health))
        .with_state(state)
        .nest("/api/v1", api_routes)
        .layer(DefaultBodyLimit::max(config.server.max_body_bytes))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors)
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allowed_headers = [
        header::CONTENT_TYPE,
        HeaderName::from_static(auth::API_KEY_HEADER),
        HeaderName::from_static(auth::USER_ID_HEADER),
        HeaderName::from_static(auth::USER_TOKEN_HEADER),
        HeaderName::from_static(auth::ADMIN_HEADER),
        HeaderName::from_static(auth::APP_ID_HEADER),
    ];
    let methods = [Method::GET, Method::POST, Method::PUT, Method::DELETE];

    if origins.is_empty() {
        return CorsLayer::new()
            .allow_methods(methods)
            .allow_headers(allowed_headers);
    }

    let parsed: Vec<header::HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods(methods)
        .allow_headers(allowed_headers)
}
