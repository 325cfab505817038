/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Context expansion: which facts an app asked for, how much of each, and
//! the redaction that produces the wire-safe [`ExpandedContext`].
//!
//! [`ExpandedContext`]: crate::model::ExpandedContext

mod level;
pub mod resolver;
pub mod strip;

pub use level::{ExpandLevel, Level};
pub use resolver::{resolve, ExpandEnv};
pub use strip::{strip, Strip, StripOptions};

use serde::{Deserialize, Serialize};

use crate::error::{MultiError, ProxyError};

/// Per-slot expansion request, declared by an app on its calls and
/// subscriptions.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Expand {
    #[serde(skip_serializing_if = "Level::is_none")]
    pub app: Level,
    #[serde(skip_serializing_if = "Level::is_none")]
    pub acting_user: Level,
    #[serde(skip_serializing_if = "Level::is_none")]
    pub acting_user_access_token: Level,
    #[serde(skip_serializing_if = "Level::is_none")]
    pub locale: Level,
    #[serde(skip_serializing_if = "Level::is_none")]
    pub channel: Level,
    #[serde(skip_serializing_if = "Level::is_none")]
    pub channel_member: Level,
    #[serde(skip_serializing_if = "Level::is_none")]
    pub team: Level,
    #[serde(skip_serializing_if = "Level::is_none")]
    pub team_member: Level,
    #[serde(skip_serializing_if = "Level::is_none")]
    pub post: Level,
    #[serde(skip_serializing_if = "Level::is_none")]
    pub root_post: Level,
    #[serde(skip_serializing_if = "Level::is_none")]
    pub user: Level,
    #[serde(rename = "oauth2_app", skip_serializing_if = "Level::is_none")]
    pub oauth2_app: Level,
    #[serde(rename = "oauth2_user", skip_serializing_if = "Level::is_none")]
    pub oauth2_user: Level,
}

impl Expand {
    /// Token and OAuth2 slots are all-or-nothing.
    pub fn validate(&self) -> Result<(), ProxyError> {
        let all_or_none = [
            ("acting_user_access_token", self.acting_user_access_token),
            ("oauth2_app", self.oauth2_app),
            ("oauth2_user", self.oauth2_user),
        ];
        let errs: MultiError = all_or_none
            .into_iter()
            .filter(|(_, l)| !matches!(l.level, ExpandLevel::None | ExpandLevel::All))
            .map(|(name, l)| format!("{name}: expand level {} is not supported, use none or all", l.level))
            .collect();
        errs.into_result()
            .map_err(|e| ProxyError::InvalidInput(e.to_string()))
    }

    /// Slot-wise union. Used to load one raw context that serves several
    /// apps' expands.
    #[must_use]
    pub fn union(&self, other: &Expand) -> Expand {
        Expand {
            app: self.app.union(other.app),
            acting_user: self.acting_user.union(other.acting_user),
            acting_user_access_token: self
                .acting_user_access_token
                .union(other.acting_user_access_token),
            locale: self.locale.union(other.locale),
            channel: self.channel.union(other.channel),
            channel_member: self.channel_member.union(other.channel_member),
            team: self.team.union(other.team),
            team_member: self.team_member.union(other.team_member),
            post: self.post.union(other.post),
            root_post: self.root_post.union(other.root_post),
            user: self.user.union(other.user),
            oauth2_app: self.oauth2_app.union(other.oauth2_app),
            oauth2_user: self.oauth2_user.union(other.oauth2_user),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expand_decodes_sparse() {
        let e: Expand =
            serde_json::from_value(json!({"acting_user": "+summary", "channel": "id"})).unwrap();
        assert_eq!(e.acting_user, Level::required(ExpandLevel::Summary));
        assert_eq!(e.channel, Level::optional(ExpandLevel::Id));
        assert!(e.team.is_none());
        assert_eq!(
            serde_json::to_value(&e).unwrap(),
            json!({"acting_user": "+summary", "channel": "id"})
        );
    }

    #[test]
    fn test_token_slots_all_or_nothing() {
        let e = Expand {
            acting_user_access_token: Level::optional(ExpandLevel::Summary),
            oauth2_user: Level::optional(ExpandLevel::Id),
            ..Expand::default()
        };
        let err = e.validate().unwrap_err().to_string();
        assert!(err.contains("acting_user_access_token"));
        assert!(err.contains("oauth2_user"));
        Expand {
            acting_user_access_token: Level::required(ExpandLevel::All),
            ..Expand::default()
        }
        .validate()
        .unwrap();
    }

    #[test]
    fn test_union_takes_richer_slot() {
        let a = Expand {
            acting_user: Level::optional(ExpandLevel::Id),
            ..Expand::default()
        };
        let b = Expand {
            acting_user: Level::optional(ExpandLevel::All),
            post: Level::optional(ExpandLevel::Summary),
            ..Expand::default()
        };
        let u = a.union(&b);
        assert_eq!(u.acting_user.level, ExpandLevel::All);
        assert_eq!(u.post.level, ExpandLevel::Summary);
    }
}
