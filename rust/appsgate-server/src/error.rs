/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

use appsgate_core::ProxyError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{error, warn};
use uuid::Uuid;

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    #[error("auth error: {0}")]
    Auth(String),
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Proxy(e) => match e {
                ProxyError::InvalidInput(_) | ProxyError::Aggregate(_) => StatusCode::BAD_REQUEST,
                ProxyError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                ProxyError::Forbidden(_) => StatusCode::FORBIDDEN,
                ProxyError::NotFound(_) => StatusCode::NOT_FOUND,
                ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
                ProxyError::Store(_) | ProxyError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let trace_id = Uuid::new_v4().to_string();
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, trace_id = %trace_id, "internal error");
            "internal error".to_string()
        } else {
            warn!(error = %self, status = status.as_u16(), trace_id = %trace_id, "request failed");
            self.to_string()
        };

        let body = serde_json::json!({
            "error": message,
            "trace_id": trace_id,
        });
        (status, Json(body)).into_response()
    }
}
