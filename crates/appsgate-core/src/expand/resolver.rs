/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Raw context + expand + caller -> [`ExpandedContext`].
//!
//! Entity slots go through the stripper; token and secret slots go through
//! [`authorize`]. All required-slot failures are collected before returning,
//! so an app author sees every missing requirement at once.

use super::{strip, Expand, ExpandLevel, Level, StripOptions};
use crate::authz::{authorize, Caller, Capability};
use crate::context::RawContext;
use crate::error::{MultiError, ProxyError};
use crate::model::{App, AppId, AppView, ExpandedContext, OAuth2Context, Permission};

/// Deployment facts that every expanded context carries.
#[derive(Clone, Debug, Default)]
pub struct ExpandEnv {
    pub site_url: String,
    pub plugin_path: String,
    pub developer_mode: bool,
    pub default_locale: String,
    pub strip: StripOptions,
}

impl ExpandEnv {
    #[must_use]
    pub fn app_path(&self, app_id: &AppId) -> String {
        format!("{}/apps/{app_id}", self.plugin_path)
    }

    /// Absolute URL of an app's path as served through the proxy.
    #[must_use]
    pub fn app_url(&self, app_id: &AppId, path: &str) -> String {
        format!(
            "{}{}{path}",
            self.site_url.trim_end_matches('/'),
            self.app_path(app_id)
        )
    }
}

#[derive(Default)]
struct Failures {
    unauthorized: MultiError,
    missing: MultiError,
}

impl Failures {
    fn check<T>(&mut self, slot: &str, level: Level, value: Option<&T>) {
        if level.required && value.is_none() {
            self.missing
                .push(format!("{slot}: required but not available"));
        }
    }

    fn deny(&mut self, slot: &str, level: Level, reason: &str) {
        if level.required {
            self.unauthorized.push(format!("{slot}: {reason}"));
        }
    }

    fn into_result(self) -> Result<(), ProxyError> {
        if !self.unauthorized.is_empty() {
            let mut all = self.unauthorized;
            all.extend(self.missing);
            return Err(ProxyError::Unauthorized(all.to_string()));
        }
        self.missing
            .into_result()
            .map_err(|e| ProxyError::InvalidInput(e.to_string()))
    }
}

pub(crate) fn app_view(app: &App, level: ExpandLevel, caller: &Caller) -> Option<AppView> {
    if level == ExpandLevel::None {
        return None;
    }
    let mut view = AppView {
        app_id: app.id().clone(),
        bot_user_id: app.bot_user_id.clone(),
        ..AppView::default()
    };
    if level >= ExpandLevel::Summary {
        view.version.clone_from(&app.manifest.version);
        view.display_name.clone_from(&app.manifest.display_name);
        view.bot_username.clone_from(&app.bot_username);
    }
    if level == ExpandLevel::All {
        view.homepage_url.clone_from(&app.manifest.homepage_url);
        view.granted_permissions.clone_from(&app.granted_permissions.0);
        view.granted_locations.clone_from(&app.granted_locations);
        view.disabled = app.disabled;
        if authorize(caller, Capability::WebhookSecret, app) {
            view.webhook_secret.clone_from(&app.webhook_secret);
        }
    }
    Some(view)
}

/// Post, channel and member records must describe the same place.
fn check_consistency(raw: &RawContext) -> Result<(), ProxyError> {
    let mut errs = MultiError::new();
    let member_users = [raw.acting_user_id.as_str(), raw.user_id.as_str()];

    if let (Some(post), Some(channel)) = (&raw.post, &raw.channel) {
        if post.channel_id != channel.id {
            errs.push(format!("post {} is not in channel {}", post.id, channel.id));
        }
    }
    if let (Some(channel), Some(team)) = (&raw.channel, &raw.team) {
        if !channel.team_id.is_empty() && channel.team_id != team.id {
            errs.push(format!("channel {} is not in team {}", channel.id, team.id));
        }
    }
    if let Some(cm) = &raw.channel_member {
        if raw.channel.as_ref().is_some_and(|c| c.id != cm.channel_id) {
            errs.push(format!("channel member record is for channel {}", cm.channel_id));
        }
        if !member_users.contains(&cm.user_id.as_str()) {
            errs.push(format!("channel member record is for user {}", cm.user_id));
        }
    }
    if let Some(tm) = &raw.team_member {
        if raw.team.as_ref().is_some_and(|t| t.id != tm.team_id) {
            errs.push(format!("team member record is for team {}", tm.team_id));
        }
        if !member_users.contains(&tm.user_id.as_str()) {
            errs.push(format!("team member record is for user {}", tm.user_id));
        }
    }
    errs.into_result()
        .map_err(|e| ProxyError::InvalidInput(e.to_string()))
}

/// Builds the context `app` receives for one call made by `caller`.
///
/// Deterministic and side-effect free.
pub fn resolve(
    raw: &RawContext,
    app: &App,
    expand: &Expand,
    caller: &Caller,
    env: &ExpandEnv,
) -> Result<ExpandedContext, ProxyError> {
    expand.validate()?;
    check_consistency(raw)?;

    let opts = env.strip;
    let app_path = env.app_path(app.id());
    let mut fail = Failures::default();

    let mut out = ExpandedContext {
        mattermost_site_url: env.site_url.clone(),
        app_path: app_path.clone(),
        bot_user_id: app.bot_user_id.clone(),
        developer_mode: env.developer_mode,
        ..ExpandedContext::default()
    };

    if app.grants(Permission::ActAsBot)
        && !app.bot_user_id.is_empty()
        && authorize(caller, Capability::BotAccessToken, app)
    {
        out.bot_access_token.clone_from(&app.bot_access_token);
    }

    out.app = app_view(app, expand.app.level, caller);

    out.acting_user = strip(raw.acting_user.as_ref(), expand.acting_user.level, opts);
    fail.check("acting_user", expand.acting_user, out.acting_user.as_ref());

    if expand.acting_user_access_token.level == ExpandLevel::All {
        let slot = "acting_user_access_token";
        let level = expand.acting_user_access_token;
        if !authorize(caller, Capability::ActingUserAccessToken, app) {
            fail.deny(
                slot,
                level,
                &format!("not available to a {} caller", caller.identity),
            );
        } else if !app.grants(Permission::ActAsUser) {
            fail.deny(slot, level, "app is not granted act_as_user");
        } else if raw.acting_user_access_token.is_empty() {
            fail.check::<String>(slot, level, None);
        } else {
            out.acting_user_access_token
                .clone_from(&raw.acting_user_access_token);
            if authorize(caller, Capability::AdminAccessToken, app) {
                out.admin_access_token
                    .clone_from(&raw.acting_user_access_token);
            }
        }
    }

    if !expand.locale.is_none() {
        out.locale = raw
            .acting_user
            .as_ref()
            .map(|u| u.locale.clone())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| env.default_locale.clone());
    }

    out.user = strip(raw.user.as_ref(), expand.user.level, opts);
    fail.check("user", expand.user, out.user.as_ref());
    out.channel = strip(raw.channel.as_ref(), expand.channel.level, opts);
    fail.check("channel", expand.channel, out.channel.as_ref());
    out.channel_member = strip(raw.channel_member.as_ref(), expand.channel_member.level, opts);
    fail.check("channel_member", expand.channel_member, out.channel_member.as_ref());
    out.team = strip(raw.team.as_ref(), expand.team.level, opts);
    fail.check("team", expand.team, out.team.as_ref());
    out.team_member = strip(raw.team_member.as_ref(), expand.team_member.level, opts);
    fail.check("team_member", expand.team_member, out.team_member.as_ref());
    out.post = strip(raw.post.as_ref(), expand.post.level, opts);
    fail.check("post", expand.post, out.post.as_ref());
    out.root_post = strip(raw.root_post.as_ref(), expand.root_post.level, opts);
    fail.check("root_post", expand.root_post, out.root_post.as_ref());

    let mut oauth2: Option<OAuth2Context> = None;
    if expand.oauth2_app.level == ExpandLevel::All {
        if app.grants(Permission::RemoteOAuth2) {
            let mut ctx = OAuth2Context {
                client_id: app.remote_oauth2.client_id.clone(),
                connect_url: format!("{}{app_path}/oauth2/remote/connect", env.site_url),
                complete_url: format!("{}{app_path}/oauth2/remote/complete", env.site_url),
                ..OAuth2Context::default()
            };
            if authorize(caller, Capability::OAuth2ClientSecret, app) {
                ctx.client_secret.clone_from(&app.remote_oauth2.client_secret);
            }
            oauth2 = Some(ctx);
        } else {
            fail.deny("oauth2_app", expand.oauth2_app, "app is not granted remote_oauth2");
        }
    }
    if expand.oauth2_user.level == ExpandLevel::All {
        let slot = "oauth2_user";
        if !authorize(caller, Capability::OAuth2UserRead, app) {
            fail.deny(
                slot,
                expand.oauth2_user,
                &format!("not available to a {} caller", caller.identity),
            );
        } else if !app.grants(Permission::RemoteOAuth2) {
            fail.deny(slot, expand.oauth2_user, "app is not granted remote_oauth2");
        } else {
            fail.check(slot, expand.oauth2_user, raw.oauth2_user.as_ref());
            if let Some(user) = &raw.oauth2_user {
                oauth2.get_or_insert_with(OAuth2Context::default).user = Some(user.clone());
            }
        }
    }
    out.oauth2 = oauth2;

    fail.into_result()?;
    Ok(out)
}
