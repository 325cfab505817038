/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Front-end authentication. The chat-server front holds the shared API
//! key and vouches for the acting user through identity headers.

use std::sync::Arc;

use appsgate_core::{AppId, Caller};
use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ServerError;
use crate::AppState;

pub const API_KEY_HEADER: &str = "x-appsgate-api-key";
pub const USER_ID_HEADER: &str = "x-appsgate-user-id";
pub const USER_TOKEN_HEADER: &str = "x-appsgate-user-token";
pub const ADMIN_HEADER: &str = "x-appsgate-admin";
pub const APP_ID_HEADER: &str = "x-appsgate-app-id";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub async fn api_key_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ServerError> {
    let provided = header(&headers, API_KEY_HEADER)
        .ok_or_else(|| ServerError::Auth("missing X-Appsgate-Api-Key header".to_string()))?;
    if provided != state.api_key {
        return Err(ServerError::Auth("invalid API key".to_string()));
    }
    Ok(next.run(req).await)
}

/// The caller the identity headers describe.
///
/// A user ID equal to the bot account of the app named in
/// `X-Appsgate-App-Id` authenticates as that app's bot.
pub fn caller(state: &AppState, headers: &HeaderMap) -> Result<Caller, ServerError> {
    let user_id = header(headers, USER_ID_HEADER)
        .ok_or_else(|| ServerError::Auth("missing X-Appsgate-User-Id header".to_string()))?;
    let token = header(headers, USER_TOKEN_HEADER).map(str::to_string);
    let admin = header(headers, ADMIN_HEADER).is_some_and(|v| v.eq_ignore_ascii_case("true"));

    let Some(app_id) = header(headers, APP_ID_HEADER).map(AppId::from) else {
        return Ok(if admin {
            Caller::admin(user_id, token)
        } else {
            Caller::user(user_id, token)
        });
    };

    if let Ok(app) = state.proxy.apps().get(&app_id) {
        if !app.bot_user_id.is_empty() && app.bot_user_id == user_id {
            return Ok(Caller::bot(&app));
        }
    }
    let caller = if admin {
        Caller::admin(user_id, token)
    } else {
        Caller::user(user_id, token)
    };
    Ok(caller.with_app(app_id))
}
