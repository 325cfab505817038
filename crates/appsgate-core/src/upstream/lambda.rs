/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! AWS Lambda apps, invoked through a Lambda Invoke API endpoint with an
//! API-Gateway-shaped request envelope.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::Upstream;
use crate::error::ProxyError;
use crate::model::{App, CallRequest, CallResponse, LambdaFunction};
use crate::store::hex_encode;

const MAX_FUNCTION_NAME_LENGTH: usize = 64;

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct InvokeEnvelope<'a> {
    path: &'a str,
    http_method: &'a str,
    headers: BTreeMap<&'a str, &'a str>,
    body: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct InvokeResult {
    #[serde(default)]
    status_code: u16,
    #[serde(default)]
    body: String,
}

/// The manifest function whose `path` is the longest prefix of `call_path`.
#[must_use]
pub fn match_function<'a>(functions: &'a [LambdaFunction], call_path: &str) -> Option<&'a LambdaFunction> {
    functions
        .iter()
        .filter(|f| {
            call_path == f.path
                || f.path == "/"
                || (call_path.starts_with(&f.path) && call_path[f.path.len()..].starts_with('/'))
        })
        .max_by_key(|f| f.path.len())
}

/// Deployed function name: `{app}_{version}_{function}` with dots replaced,
/// shortened with a hash suffix when over Lambda's 64-character limit.
#[must_use]
pub fn function_name(app: &App, function: &str) -> String {
    let name = format!("{}_{}_{function}", app.id(), app.manifest.version).replace('.', "-");
    if name.len() <= MAX_FUNCTION_NAME_LENGTH {
        return name;
    }
    let base = format!("{}_{}_", app.id(), app.manifest.version).replace('.', "-");
    let digest = hex_encode(&Sha256::digest(name.as_bytes()));
    let room = MAX_FUNCTION_NAME_LENGTH.saturating_sub(base.len());
    format!("{base}{}", &digest[..room.min(digest.len())])
}

pub struct LambdaUpstream {
    client: reqwest::Client,
    invoke_url: String,
}

impl LambdaUpstream {
    pub fn new(invoke_url: &str, timeout: Duration) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProxyError::Internal(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            invoke_url: invoke_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl Upstream for LambdaUpstream {
    async fn roundtrip(
        &self,
        app: &App,
        creq: &CallRequest,
        _acting_user_id: &str,
    ) -> Result<CallResponse, ProxyError> {
        let functions = app
            .manifest
            .aws_lambda
            .as_ref()
            .map(|l| l.functions.as_slice())
            .ok_or_else(|| ProxyError::InvalidInput(format!("{} is not a Lambda app", app.id())))?;
        let function = match_function(functions, &creq.call.path).ok_or_else(|| {
            ProxyError::NotFound(format!("{}: no function for {}", app.id(), creq.call.path))
        })?;

        let envelope = InvokeEnvelope {
            path: &creq.call.path,
            http_method: "POST",
            headers: BTreeMap::from([("Content-Type", "application/json")]),
            body: serde_json::to_string(creq)
                .map_err(|e| ProxyError::Internal(format!("failed to encode call: {e}")))?,
        };
        let url = format!(
            "{}/2015-03-31/functions/{}/invocations",
            self.invoke_url,
            function_name(app, &function.name)
        );
        let resp = self
            .client
            .post(&url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| ProxyError::Upstream(format!("{}: invoke failed: {e}", app.id())))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProxyError::Upstream(format!("{}: invoke {status}: {body}", app.id())));
        }
        let result: InvokeResult = resp
            .json()
            .await
            .map_err(|e| ProxyError::Upstream(format!("{}: invalid invoke result: {e}", app.id())))?;
        match result.status_code {
            200 => serde_json::from_str(&result.body).map_err(|e| {
                ProxyError::Upstream(format!("{}: invalid response: {e}", app.id()))
            }),
            404 => Err(ProxyError::NotFound(format!("{}{}", app.id(), creq.call.path))),
            code => Err(ProxyError::Upstream(format!("{}: {code}: {}", app.id(), result.body))),
        }
    }
}
