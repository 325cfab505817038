/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

use serde::{Deserialize, Serialize};
use std::fmt;

use super::app::AppId;
use super::call::Call;
use crate::error::{MultiError, ProxyError};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    UserCreated,
    UserJoinedChannel,
    UserLeftChannel,
    UserJoinedTeam,
    UserLeftTeam,
    BotJoinedChannel,
    BotLeftChannel,
    BotJoinedTeam,
    BotLeftTeam,
    ChannelCreated,
    PostCreated,
    BotMentioned,
}

/// Which scoping ID a subject's subscriptions are keyed by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubjectScope {
    Global,
    Team,
    Channel,
}

impl Subject {
    pub const ALL: [Subject; 12] = [
        Self::UserCreated,
        Self::UserJoinedChannel,
        Self::UserLeftChannel,
        Self::UserJoinedTeam,
        Self::UserLeftTeam,
        Self::BotJoinedChannel,
        Self::BotLeftChannel,
        Self::BotJoinedTeam,
        Self::BotLeftTeam,
        Self::ChannelCreated,
        Self::PostCreated,
        Self::BotMentioned,
    ];

    #[must_use]
    pub fn scope(self) -> SubjectScope {
        match self {
            Self::UserJoinedChannel | Self::UserLeftChannel | Self::PostCreated => {
                SubjectScope::Channel
            }
            Self::UserJoinedTeam | Self::UserLeftTeam | Self::ChannelCreated => SubjectScope::Team,
            Self::UserCreated
            | Self::BotJoinedChannel
            | Self::BotLeftChannel
            | Self::BotJoinedTeam
            | Self::BotLeftTeam
            | Self::BotMentioned => SubjectScope::Global,
        }
    }

    /// The bot-side subject fired alongside a user membership subject.
    #[must_use]
    pub fn bot_counterpart(self) -> Option<Subject> {
        match self {
            Self::UserJoinedChannel => Some(Self::BotJoinedChannel),
            Self::UserLeftChannel => Some(Self::BotLeftChannel),
            Self::UserJoinedTeam => Some(Self::BotJoinedTeam),
            Self::UserLeftTeam => Some(Self::BotLeftTeam),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_bot_subject(self) -> bool {
        matches!(
            self,
            Self::BotJoinedChannel
                | Self::BotLeftChannel
                | Self::BotJoinedTeam
                | Self::BotLeftTeam
                | Self::BotMentioned
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserCreated => "user_created",
            Self::UserJoinedChannel => "user_joined_channel",
            Self::UserLeftChannel => "user_left_channel",
            Self::UserJoinedTeam => "user_joined_team",
            Self::UserLeftTeam => "user_left_team",
            Self::BotJoinedChannel => "bot_joined_channel",
            Self::BotLeftChannel => "bot_left_channel",
            Self::BotJoinedTeam => "bot_joined_team",
            Self::BotLeftTeam => "bot_left_team",
            Self::ChannelCreated => "channel_created",
            Self::PostCreated => "post_created",
            Self::BotMentioned => "bot_mentioned",
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription lookup key: a subject plus the IDs its scope uses.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Event {
    pub subject: Subject,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub team_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel_id: String,
}

impl Event {
    /// Builds the key for `subject`, dropping IDs its scope does not use.
    pub fn new(
        subject: Subject,
        team_id: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Result<Self, ProxyError> {
        let (team_id, channel_id) = (team_id.into(), channel_id.into());
        let (team_id, channel_id) = match subject.scope() {
            SubjectScope::Global => (String::new(), String::new()),
            SubjectScope::Team if team_id.is_empty() => {
                return Err(ProxyError::InvalidInput(format!(
                    "{subject} requires team_id"
                )))
            }
            SubjectScope::Team => (team_id, String::new()),
            SubjectScope::Channel if channel_id.is_empty() => {
                return Err(ProxyError::InvalidInput(format!(
                    "{subject} requires channel_id"
                )))
            }
            SubjectScope::Channel => (String::new(), channel_id),
        };
        Ok(Self {
            subject,
            team_id,
            channel_id,
        })
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.subject)?;
        if !self.team_id.is_empty() {
            write!(f, " team {}", self.team_id)?;
        }
        if !self.channel_id.is_empty() {
            write!(f, " channel {}", self.channel_id)?;
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Subscription {
    /// Set from the caller, never trusted from the request body.
    #[serde(default, skip_serializing_if = "AppId::is_empty")]
    pub app_id: AppId,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    pub subject: Option<Subject>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub team_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel_id: String,
    #[serde(default)]
    pub call: Call,
}

impl Subscription {
    pub fn validate(&self) -> Result<(), ProxyError> {
        let mut errs = MultiError::new();
        if self.app_id.is_empty() {
            errs.push("app_id is empty");
        }
        if self.user_id.is_empty() {
            errs.push("user_id is empty");
        }
        match self.subject {
            None => errs.push("subject is empty"),
            Some(s) => {
                if let Err(e) = Event::new(s, self.team_id.as_str(), self.channel_id.as_str()) {
                    errs.push(e);
                }
            }
        }
        if !self.call.path.starts_with('/') {
            errs.push(format!("call.path {:?} must start with /", self.call.path));
        }
        errs.into_result()
            .map_err(|e| ProxyError::InvalidInput(e.to_string()))
    }

    pub fn event(&self) -> Result<Event, ProxyError> {
        let subject = self
            .subject
            .ok_or_else(|| ProxyError::InvalidInput("subject is empty".to_string()))?;
        Event::new(subject, self.team_id.as_str(), self.channel_id.as_str())
    }
}
