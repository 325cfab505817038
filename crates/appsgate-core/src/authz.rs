/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Who is calling, and which capabilities that identity unlocks.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProxyError;
use crate::model::{App, AppId};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IdentityClass {
    Bot,
    ActingUser,
    Admin,
}

impl IdentityClass {
    #[must_use]
    pub fn is_user(self) -> bool {
        matches!(self, Self::ActingUser | Self::Admin)
    }
}

impl fmt::Display for IdentityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bot => "bot",
            Self::ActingUser => "acting_user",
            Self::Admin => "admin",
        })
    }
}

/// The authenticated principal behind a request.
///
/// For a bot caller, `user_id` is the bot user and `app_id` the app that
/// owns it. For users, `app_id` is the app the request is about, if any.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    pub identity: IdentityClass,
    pub user_id: String,
    pub app_id: Option<AppId>,
    pub token: Option<String>,
}

impl Caller {
    pub fn user(user_id: impl Into<String>, token: Option<String>) -> Self {
        Self {
            identity: IdentityClass::ActingUser,
            user_id: user_id.into(),
            app_id: None,
            token,
        }
    }

    pub fn admin(user_id: impl Into<String>, token: Option<String>) -> Self {
        Self {
            identity: IdentityClass::Admin,
            ..Self::user(user_id, token)
        }
    }

    /// An app acting through its own bot account.
    #[must_use]
    pub fn bot(app: &App) -> Self {
        Self {
            identity: IdentityClass::Bot,
            user_id: app.bot_user_id.clone(),
            app_id: Some(app.id().clone()),
            token: (!app.bot_access_token.is_empty()).then(|| app.bot_access_token.clone()),
        }
    }

    #[must_use]
    pub fn with_app(mut self, app_id: AppId) -> Self {
        self.app_id = Some(app_id);
        self
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.identity == IdentityClass::Admin
    }

    #[must_use]
    pub fn is_bot(&self) -> bool {
        self.identity == IdentityClass::Bot
    }

    /// True for the bot account of `app` itself.
    #[must_use]
    pub fn is_own_bot(&self, app: &App) -> bool {
        self.is_bot() && self.app_id.as_ref() == Some(app.id())
    }

    /// KV partition for this caller: bots and users never share one.
    #[must_use]
    pub fn actor_key(&self) -> String {
        match self.identity {
            IdentityClass::Bot => format!("b:{}", self.user_id),
            IdentityClass::ActingUser | IdentityClass::Admin => format!("u:{}", self.user_id),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    BotAccessToken,
    ActingUserAccessToken,
    AdminAccessToken,
    WebhookSecret,
    OAuth2ClientSecret,
    OAuth2UserRead,
    OAuth2UserWrite,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BotAccessToken => "bot access token",
            Self::ActingUserAccessToken => "acting user access token",
            Self::AdminAccessToken => "admin access token",
            Self::WebhookSecret => "webhook secret",
            Self::OAuth2ClientSecret => "OAuth2 client secret",
            Self::OAuth2UserRead => "OAuth2 user read",
            Self::OAuth2UserWrite => "OAuth2 user write",
        })
    }
}

/// Whether `caller` may receive `cap` for `app`.
#[must_use]
pub fn authorize(caller: &Caller, cap: Capability, app: &App) -> bool {
    match cap {
        Capability::BotAccessToken => true,
        Capability::ActingUserAccessToken | Capability::OAuth2UserRead => {
            caller.identity.is_user()
        }
        Capability::AdminAccessToken => caller.is_admin(),
        Capability::WebhookSecret | Capability::OAuth2ClientSecret => {
            caller.is_admin() || caller.is_own_bot(app)
        }
        Capability::OAuth2UserWrite => caller.identity.is_user() || caller.is_own_bot(app),
    }
}

/// [`authorize`], as an `Unauthorized` error on denial.
pub fn require(caller: &Caller, cap: Capability, app: &App) -> Result<(), ProxyError> {
    if authorize(caller, cap, app) {
        Ok(())
    } else {
        Err(ProxyError::Unauthorized(format!(
            "{} caller may not access the {cap} of {}",
            caller.identity,
            app.id()
        )))
    }
}
