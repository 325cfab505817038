/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::app::{AppId, Location, Permission};
use super::binding::Form;
use super::entities::{Channel, ChannelMember, Post, Team, TeamMember, User};
use super::is_false;
use super::subscription::Subject;
use crate::error::ProxyError;
use crate::expand::Expand;

// ---------------------------------------------------------------------------
// Call / CallRequest
// ---------------------------------------------------------------------------

/// A reference to an app path plus what context the app wants with it.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Call {
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expand: Option<Expand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
}

impl Call {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_expand(mut self, expand: Expand) -> Self {
        self.expand = Some(expand);
        self
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CallRequest {
    #[serde(flatten)]
    pub call: Call,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Map<String, Value>>,
    #[serde(default)]
    pub context: Context,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw_command: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub selected_field: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub query: String,
}

impl CallRequest {
    #[must_use]
    pub fn new(call: Call, user_agent: UserAgentContext) -> Self {
        Self {
            call,
            context: Context {
                user_agent,
                ..Context::default()
            },
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// What the client (webapp, mobile, slash command parser) tells us about
/// where the call originated.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct UserAgentContext {
    #[serde(default, skip_serializing_if = "AppId::is_empty")]
    pub app_id: AppId,
    #[serde(default, skip_serializing_if = "Location::is_empty")]
    pub location: Location,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_agent: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub track_as_submit: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub team_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub post_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub root_post_id: String,
}

impl UserAgentContext {
    /// The form sent to apps: raw IDs only travel inside `expanded`, through
    /// their slots.
    #[must_use]
    pub fn outgoing(&self) -> Self {
        Self {
            app_id: self.app_id.clone(),
            location: self.location.clone(),
            user_agent: self.user_agent.clone(),
            track_as_submit: self.track_as_submit,
            ..Self::default()
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Context {
    #[serde(flatten)]
    pub user_agent: UserAgentContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Subject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expanded: Option<ExpandedContext>,
}

/// Redacted app view placed in `expanded.app`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct AppView {
    pub app_id: AppId,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub homepage_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bot_user_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bot_username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub webhook_secret: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub granted_permissions: Vec<Permission>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub granted_locations: Vec<Location>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disabled: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct OAuth2Context {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_secret: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub connect_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub complete_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
}

/// The wire-safe projection of a raw context for one app and one call.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ExpandedContext {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mattermost_site_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bot_user_id: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub developer_mode: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bot_access_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub acting_user_access_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub admin_access_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub locale: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<AppView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acting_user: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_member: Option<ChannelMember>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<Team>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_member: Option<TeamMember>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post: Option<Post>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_post: Option<Post>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth2: Option<OAuth2Context>,
}

// ---------------------------------------------------------------------------
// CallResponse
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum CallResponseType {
    /// Also what an empty `type` decodes to.
    #[default]
    Ok,
    Error,
    Form,
    Navigate,
    Unknown(String),
}

impl From<String> for CallResponseType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "" | "ok" => Self::Ok,
            "error" => Self::Error,
            "form" => Self::Form,
            "navigate" => Self::Navigate,
            _ => Self::Unknown(s),
        }
    }
}

impl From<CallResponseType> for String {
    fn from(t: CallResponseType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for CallResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::Error => f.write_str("error"),
            Self::Form => f.write_str("form"),
            Self::Navigate => f.write_str("navigate"),
            Self::Unknown(s) => f.write_str(s),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct AppMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bot_user_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bot_username: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CallResponse {
    #[serde(rename = "type", default)]
    pub response_type: CallResponseType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub navigate_to_url: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub use_external_browser: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form: Option<Form>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_metadata: Option<AppMetadata>,
}

impl CallResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            response_type: CallResponseType::Error,
            text: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn from_error(err: &ProxyError) -> Self {
        Self::error(err.to_string())
    }

    #[must_use]
    pub fn form(form: Form) -> Self {
        Self {
            response_type: CallResponseType::Form,
            form: Some(form),
            ..Self::default()
        }
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        Self {
            response_type: CallResponseType::Navigate,
            navigate_to_url: url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.response_type == CallResponseType::Error
    }

    /// Rejects response types outside ok/error/form/navigate and responses
    /// missing the payload their type promises.
    pub fn validate(&self) -> Result<(), ProxyError> {
        match &self.response_type {
            CallResponseType::Ok | CallResponseType::Error => Ok(()),
            CallResponseType::Form if self.form.is_none() => Err(ProxyError::Upstream(
                "form response without a form".to_string(),
            )),
            CallResponseType::Navigate if self.navigate_to_url.is_empty() => Err(
                ProxyError::Upstream("navigate response without navigate_to_url".to_string()),
            ),
            CallResponseType::Form | CallResponseType::Navigate => Ok(()),
            CallResponseType::Unknown(t) => {
                Err(ProxyError::Upstream(format!("unknown response type {t:?}")))
            }
        }
    }
}
