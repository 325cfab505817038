/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

use serde::{Deserialize, Serialize};
use std::fmt;

use super::call::Call;
use super::is_false;
use crate::error::{MultiError, ProxyError};

pub const MIN_APP_ID_LENGTH: usize = 3;
pub const MAX_APP_ID_LENGTH: usize = 32;
const MAX_VERSION_LENGTH: usize = 10;

pub const DEFAULT_BINDINGS_PATH: &str = "/bindings";
pub const DEFAULT_PING_PATH: &str = "/ping";

fn is_id_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | '.')
}

// ---------------------------------------------------------------------------
// AppId
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct AppId(String);

impl AppId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn validate(&self) -> Result<(), ProxyError> {
        let mut errs = MultiError::new();
        let len = self.0.len();
        if len < MIN_APP_ID_LENGTH {
            errs.push(format!(
                "app_id {:?} too short, should be at least {MIN_APP_ID_LENGTH} bytes",
                self.0
            ));
        }
        if len > MAX_APP_ID_LENGTH {
            errs.push(format!(
                "app_id {:?} too long, should be at most {MAX_APP_ID_LENGTH} bytes",
                self.0
            ));
        }
        if let Some(c) = self.0.chars().find(|c| !is_id_char(*c)) {
            errs.push(format!("app_id {:?} contains invalid character {c:?}", self.0));
        }
        errs.into_result()
            .map_err(|e| ProxyError::InvalidInput(e.to_string()))
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AppId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AppId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ActAsBot,
    ActAsUser,
    #[serde(rename = "remote_oauth2")]
    RemoteOAuth2,
    RemoteWebhooks,
}

impl Permission {
    /// Another permission that must be granted alongside this one.
    #[must_use]
    pub fn requires(self) -> Option<Permission> {
        match self {
            Self::RemoteWebhooks => Some(Self::ActAsBot),
            Self::RemoteOAuth2 => Some(Self::ActAsUser),
            Self::ActAsBot | Self::ActAsUser => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ActAsBot => "act_as_bot",
            Self::ActAsUser => "act_as_user",
            Self::RemoteOAuth2 => "remote_oauth2",
            Self::RemoteWebhooks => "remote_webhooks",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct Permissions(pub Vec<Permission>);

impl Permissions {
    #[must_use]
    pub fn contains(&self, p: Permission) -> bool {
        self.0.contains(&p)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn validate(&self) -> Result<(), ProxyError> {
        let missing: MultiError = self
            .0
            .iter()
            .filter_map(|p| p.requires().filter(|dep| !self.contains(*dep)).map(|dep| (p, dep)))
            .map(|(p, dep)| format!("permission {p} requires {dep}"))
            .collect();
        missing
            .into_result()
            .map_err(|e| ProxyError::InvalidInput(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Locations
// ---------------------------------------------------------------------------

/// A binding location. Top-level locations are absolute (`/command`); nested
/// bindings use relative names that [`Location::sub`] joins.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct Location(String);

impl Location {
    pub const COMMAND: &'static str = "/command";
    pub const CHANNEL_HEADER: &'static str = "/channel_header";
    pub const POST_MENU: &'static str = "/post_menu";
    pub const ROOTS: [&'static str; 3] = [Self::COMMAND, Self::CHANNEL_HEADER, Self::POST_MENU];

    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn sub(&self, child: &str) -> Location {
        let child = child.trim_matches('/');
        if self.0.is_empty() {
            return Location(format!("/{child}"));
        }
        Location(format!("{}/{child}", self.0.trim_end_matches('/')))
    }

    /// `self` equals `other` or is nested under it.
    #[must_use]
    pub fn is_within(&self, other: &Location) -> bool {
        self.0 == other.0
            || (self.0.starts_with(&other.0) && self.0[other.0.len()..].starts_with('/'))
    }

    /// The root (`/command`, ...) this location lives under, if any.
    #[must_use]
    pub fn root(&self) -> Option<&'static str> {
        Self::ROOTS
            .into_iter()
            .find(|r| self.is_within(&Location::new(*r)))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Location {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Deploy
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeployType {
    Http,
    AwsLambda,
    Builtin,
}

impl fmt::Display for DeployType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Http => "http",
            Self::AwsLambda => "aws_lambda",
            Self::Builtin => "builtin",
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct HttpDeploy {
    pub root_url: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub use_jwt: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct LambdaFunction {
    /// Calls whose path has this as the longest prefix go to this function.
    pub path: String,
    pub name: String,
    #[serde(default)]
    pub handler: String,
    #[serde(default)]
    pub runtime: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct LambdaDeploy {
    #[serde(default)]
    pub functions: Vec<LambdaFunction>,
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Manifest {
    pub app_id: AppId,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub homepage_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub icon: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bindings: Option<Call>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_install: Option<Call>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_version_changed: Option<Call>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_uninstall: Option<Call>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_enable: Option<Call>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_disable: Option<Call>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get_oauth2_connect_url: Option<Call>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_oauth2_complete: Option<Call>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_remote_webhook: Option<Call>,

    #[serde(default, skip_serializing_if = "Permissions::is_empty")]
    pub requested_permissions: Permissions,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requested_locations: Vec<Location>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpDeploy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_lambda: Option<LambdaDeploy>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub builtin: bool,
}

impl Manifest {
    #[must_use]
    pub fn deploy_type(&self) -> Option<DeployType> {
        if self.builtin {
            Some(DeployType::Builtin)
        } else if self.http.is_some() {
            Some(DeployType::Http)
        } else if self.aws_lambda.is_some() {
            Some(DeployType::AwsLambda)
        } else {
            None
        }
    }

    /// The `/bindings` call, defaulted when the manifest does not declare one.
    #[must_use]
    pub fn bindings_call(&self) -> Call {
        self.bindings
            .clone()
            .unwrap_or_else(|| Call::new(DEFAULT_BINDINGS_PATH))
    }

    /// Lifecycle hooks declared by the app, by manifest field name.
    pub fn lifecycle_calls(&self) -> impl Iterator<Item = (&'static str, &Call)> {
        [
            ("on_install", self.on_install.as_ref()),
            ("on_version_changed", self.on_version_changed.as_ref()),
            ("on_uninstall", self.on_uninstall.as_ref()),
            ("on_enable", self.on_enable.as_ref()),
            ("on_disable", self.on_disable.as_ref()),
            ("get_oauth2_connect_url", self.get_oauth2_connect_url.as_ref()),
            ("on_oauth2_complete", self.on_oauth2_complete.as_ref()),
            ("on_remote_webhook", self.on_remote_webhook.as_ref()),
        ]
        .into_iter()
        .filter_map(|(name, call)| call.map(|c| (name, c)))
    }

    pub fn validate(&self) -> Result<(), ProxyError> {
        let mut errs = MultiError::new();
        if let Err(e) = self.app_id.validate() {
            errs.push(e);
        }
        if self.version.len() > MAX_VERSION_LENGTH {
            errs.push(format!("version {:?} too long", self.version));
        }
        if let Some(c) = self.version.chars().find(|c| !is_id_char(*c)) {
            errs.push(format!("version {:?} contains invalid character {c:?}", self.version));
        }
        if !self.builtin && self.homepage_url.is_empty() {
            errs.push("homepage_url is empty");
        }
        if self.deploy_type().is_none() {
            errs.push("manifest declares no deploy type");
        }
        if let Some(http) = &self.http {
            if !(http.root_url.starts_with("http://") || http.root_url.starts_with("https://")) {
                errs.push(format!("http.root_url {:?} is not an http(s) URL", http.root_url));
            }
        }
        if let Some(lambda) = &self.aws_lambda {
            if lambda.functions.is_empty() {
                errs.push("aws_lambda must declare at least one function");
            }
            for f in &lambda.functions {
                if f.path.is_empty() || f.name.is_empty() {
                    errs.push("aws_lambda function requires path and name");
                }
            }
        }
        if let Err(e) = self.requested_permissions.validate() {
            errs.push(e);
        }
        for loc in &self.requested_locations {
            if loc.root().is_none() {
                errs.push(format!("requested location {loc} is not bindable"));
            }
        }
        for (name, call) in self.lifecycle_calls() {
            if !call.path.starts_with('/') {
                errs.push(format!("{name}.path {:?} must start with /", call.path));
            }
        }
        errs.into_result()
            .map_err(|e| ProxyError::InvalidInput(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Installed app
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct OAuth2App {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
}

/// An installed app: manifest plus everything granted and minted at install.
///
/// This is the storage form and carries secrets; callers see
/// [`crate::model::AppView`] instead.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct App {
    pub manifest: Manifest,
    pub deploy_type: Option<DeployType>,
    #[serde(default)]
    pub disabled: bool,
    /// Position in install order; bindings and notifications iterate by it.
    #[serde(default)]
    pub install_seq: u64,
    /// JWT signing secret shared with HTTP apps.
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub webhook_secret: String,
    #[serde(default)]
    pub bot_user_id: String,
    #[serde(default)]
    pub bot_username: String,
    #[serde(default)]
    pub bot_access_token: String,
    #[serde(default)]
    pub granted_permissions: Permissions,
    #[serde(default)]
    pub granted_locations: Vec<Location>,
    #[serde(default)]
    pub remote_oauth2: OAuth2App,
}

impl App {
    #[must_use]
    pub fn id(&self) -> &AppId {
        &self.manifest.app_id
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.disabled
    }

    #[must_use]
    pub fn grants(&self, p: Permission) -> bool {
        self.granted_permissions.contains(p)
    }

    pub fn ensure_enabled(&self) -> Result<(), ProxyError> {
        if self.disabled {
            return Err(ProxyError::Forbidden(format!("{} is disabled", self.id())));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn http_manifest() -> Manifest {
        serde_json::from_value(json!({
            "app_id": "hello-world",
            "version": "v1.0.0",
            "homepage_url": "https://example.com/hello",
            "requested_permissions": ["act_as_bot"],
            "requested_locations": ["/command", "/channel_header"],
            "http": {"root_url": "https://hello.example.com"},
            "on_install": {"path": "/install"},
        }))
        .unwrap()
    }

    #[test]
    fn test_manifest_valid() {
        let m = http_manifest();
        m.validate().unwrap();
        assert_eq!(m.deploy_type(), Some(DeployType::Http));
        assert_eq!(m.bindings_call().path, "/bindings");
        let hooks: Vec<_> = m.lifecycle_calls().map(|(n, c)| (n, c.path.clone())).collect();
        assert_eq!(hooks, vec![("on_install", "/install".to_string())]);
    }

    #[test]
    fn test_manifest_collects_all_problems() {
        let mut m = http_manifest();
        m.app_id = AppId::new("x!");
        m.requested_permissions = Permissions(vec![Permission::RemoteOAuth2]);
        m.requested_locations.push(Location::new("/elsewhere"));
        let err = m.validate().unwrap_err().to_string();
        assert!(err.contains("too short"));
        assert!(err.contains("invalid character"));
        assert!(err.contains("permission remote_oauth2 requires act_as_user"));
        assert!(err.contains("/elsewhere"));
    }

    #[test]
    fn test_manifest_requires_deploy() {
        let mut m = http_manifest();
        m.http = None;
        assert!(m.validate().unwrap_err().to_string().contains("no deploy type"));
    }

    #[test]
    fn test_permission_wire_names() {
        let p: Permissions =
            serde_json::from_value(json!(["act_as_user", "remote_oauth2", "remote_webhooks"]))
                .unwrap();
        assert!(p.contains(Permission::RemoteOAuth2));
        assert_eq!(
            serde_json::to_value(Permission::RemoteOAuth2).unwrap(),
            json!("remote_oauth2")
        );
        let err = p.validate().unwrap_err().to_string();
        assert!(err.contains("remote_webhooks requires act_as_bot"));
    }

    #[test]
    fn test_location_sub_and_within() {
        let cmd = Location::new(Location::COMMAND);
        let sub = cmd.sub("hello").sub("send");
        assert_eq!(sub.as_str(), "/command/hello/send");
        assert!(sub.is_within(&cmd));
        assert!(!Location::new("/commander").is_within(&cmd));
        assert_eq!(sub.root(), Some(Location::COMMAND));
        assert_eq!(Location::default().sub("/post_menu").as_str(), "/post_menu");
    }

    #[test]
    fn test_disabled_app() {
        let app = App {
            manifest: http_manifest(),
            disabled: true,
            ..App::default()
        };
        assert_eq!(
            app.ensure_enabled().unwrap_err(),
            ProxyError::Forbidden("hello-world is disabled".into())
        );
    }
}
