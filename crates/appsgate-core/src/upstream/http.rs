/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::Upstream;
use crate::error::ProxyError;
use crate::model::{App, CallRequest, CallResponse};

pub const OUTGOING_AUTH_HEADER: &str = "Mattermost-App-Authorization";
const JWT_TTL_SECS: u64 = 15 * 60;

/// Claims of the JWT sent to HTTP apps that opt into `use_jwt`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Claims {
    pub exp: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub acting_user_id: String,
}

/// HS256 token signed with the app's install-time secret.
pub fn sign_jwt(secret: &str, acting_user_id: &str) -> Result<String, ProxyError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let claims = Claims {
        exp: now + JWT_TTL_SECS,
        acting_user_id: acting_user_id.to_string(),
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ProxyError::Internal(format!("failed to sign JWT: {e}")))
}

/// POSTs calls as JSON to `root_url + path`.
pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    pub fn new(timeout: Duration) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProxyError::Internal(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Upstream for HttpUpstream {
    async fn roundtrip(
        &self,
        app: &App,
        creq: &CallRequest,
        acting_user_id: &str,
    ) -> Result<CallResponse, ProxyError> {
        let http = app
            .manifest
            .http
            .as_ref()
            .ok_or_else(|| ProxyError::InvalidInput(format!("{} is not an HTTP app", app.id())))?;
        let url = format!("{}{}", http.root_url.trim_end_matches('/'), creq.call.path);

        let mut req = self.client.post(&url).json(creq);
        if http.use_jwt {
            let token = sign_jwt(&app.secret, acting_user_id)?;
            req = req.header(OUTGOING_AUTH_HEADER, format!("Bearer {token}"));
        }
        let resp = req
            .send()
            .await
            .map_err(|e| ProxyError::Upstream(format!("{}: request failed: {e}", app.id())))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProxyError::NotFound(format!("{}{}", app.id(), creq.call.path)));
        }
        if status != reqwest::StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProxyError::Upstream(format!("{}: {status}: {body}", app.id())));
        }
        resp.json()
            .await
            .map_err(|e| ProxyError::Upstream(format!("{}: invalid response: {e}", app.id())))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_jwt_round_trip() {
        let token = sign_jwt("s3cret", "u1").unwrap();
        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.required_spec_claims.insert("exp".to_string());
        let data = jsonwebtoken::decode::<Claims>(
            &token,
            &jsonwebtoken::DecodingKey::from_secret(b"s3cret"),
            &validation,
        )
        .unwrap();
        assert_eq!(data.claims.acting_user_id, "u1");
    }

    #[test]
    fn test_jwt_wrong_secret_rejected() {
        let token = sign_jwt("s3cret", "u1").unwrap();
        let validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        assert!(jsonwebtoken::decode::<Claims>(
            &token,
            &jsonwebtoken::DecodingKey::from_secret(b"other"),
            &validation,
        )
        .is_err());
    }

    #[tokio::test]
    async fn test_non_http_app_rejected() {
        let up = HttpUpstream::new(Duration::from_secs(1)).unwrap();
        let mut app = crate::testutil::app("hello");
        app.manifest.http = None;
        let err = up
            .roundtrip(&app, &CallRequest::default(), "u1")
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::InvalidInput(_)));
    }
}
