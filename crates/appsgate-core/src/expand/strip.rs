/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Per-entity field selection for each [`ExpandLevel`].
//!
//! Stripping never fabricates: an absent entity stays absent at every level.
//! Secrets (password hash, MFA secret, auth data, team invite ID) are not
//! copied at any level and additionally never serialize.

use super::ExpandLevel;
use crate::model::{Channel, ChannelMember, Post, Team, TeamMember, User};

/// Chat-server privacy settings that widen user and team summaries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StripOptions {
    pub show_email: bool,
    pub show_full_name: bool,
}

pub trait Strip: Sized {
    /// Copy of `self` holding only the fields `level` allows. `level` is
    /// never `None`.
    fn strip_to(&self, level: ExpandLevel, opts: StripOptions) -> Self;
}

/// `None` for an absent entity or a `None` level, never an empty value.
#[must_use]
pub fn strip<T: Strip>(entity: Option<&T>, level: ExpandLevel, opts: StripOptions) -> Option<T> {
    match (entity, level) {
        (None, _) | (_, ExpandLevel::None) => None,
        (Some(e), level) => Some(e.strip_to(level, opts)),
    }
}

impl Strip for User {
    fn strip_to(&self, level: ExpandLevel, opts: StripOptions) -> Self {
        match level {
            ExpandLevel::None | ExpandLevel::Id => User {
                id: self.id.clone(),
                ..User::default()
            },
            ExpandLevel::Summary => {
                let mut u = User {
                    id: self.id.clone(),
                    delete_at: self.delete_at,
                    username: self.username.clone(),
                    nickname: self.nickname.clone(),
                    locale: self.locale.clone(),
                    roles: self.roles.clone(),
                    timezone: self.timezone.clone(),
                    is_bot: self.is_bot,
                    bot_description: self.bot_description.clone(),
                    ..User::default()
                };
                if opts.show_email {
                    u.email.clone_from(&self.email);
                }
                if opts.show_full_name {
                    u.first_name.clone_from(&self.first_name);
                    u.last_name.clone_from(&self.last_name);
                }
                u
            }
            ExpandLevel::All => User {
                password: String::new(),
                auth_data: None,
                mfa_secret: String::new(),
                ..self.clone()
            },
        }
    }
}

impl Strip for Channel {
    fn strip_to(&self, level: ExpandLevel, _: StripOptions) -> Self {
        match level {
            ExpandLevel::None | ExpandLevel::Id => Channel {
                id: self.id.clone(),
                team_id: self.team_id.clone(),
                ..Channel::default()
            },
            ExpandLevel::Summary => Channel {
                id: self.id.clone(),
                team_id: self.team_id.clone(),
                delete_at: self.delete_at,
                channel_type: self.channel_type.clone(),
                display_name: self.display_name.clone(),
                name: self.name.clone(),
                ..Channel::default()
            },
            ExpandLevel::All => self.clone(),
        }
    }
}

impl Strip for ChannelMember {
    fn strip_to(&self, level: ExpandLevel, _: StripOptions) -> Self {
        let id = ChannelMember {
            channel_id: self.channel_id.clone(),
            user_id: self.user_id.clone(),
            ..ChannelMember::default()
        };
        match level {
            ExpandLevel::None | ExpandLevel::Id => id,
            ExpandLevel::Summary => ChannelMember {
                roles: self.roles.clone(),
                scheme_user: self.scheme_user,
                scheme_admin: self.scheme_admin,
                last_viewed_at: self.last_viewed_at,
                msg_count: self.msg_count,
                mention_count: self.mention_count,
                ..id
            },
            ExpandLevel::All => self.clone(),
        }
    }
}

impl Strip for Team {
    fn strip_to(&self, level: ExpandLevel, opts: StripOptions) -> Self {
        match level {
            ExpandLevel::None | ExpandLevel::Id => Team {
                id: self.id.clone(),
                ..Team::default()
            },
            ExpandLevel::Summary => {
                let mut t = Team {
                    id: self.id.clone(),
                    display_name: self.display_name.clone(),
                    name: self.name.clone(),
                    description: self.description.clone(),
                    team_type: self.team_type.clone(),
                    delete_at: self.delete_at,
                    ..Team::default()
                };
                if opts.show_email {
                    t.email.clone_from(&self.email);
                }
                t
            }
            ExpandLevel::All => Team {
                invite_id: String::new(),
                ..self.clone()
            },
        }
    }
}

impl Strip for TeamMember {
    fn strip_to(&self, level: ExpandLevel, _: StripOptions) -> Self {
        match level {
            ExpandLevel::None | ExpandLevel::Id => TeamMember {
                team_id: self.team_id.clone(),
                user_id: self.user_id.clone(),
                ..TeamMember::default()
            },
            ExpandLevel::Summary | ExpandLevel::All => self.clone(),
        }
    }
}

impl Strip for Post {
    fn strip_to(&self, level: ExpandLevel, _: StripOptions) -> Self {
        let id = Post {
            id: self.id.clone(),
            channel_id: self.channel_id.clone(),
            ..Post::default()
        };
        match level {
            ExpandLevel::None | ExpandLevel::Id => id,
            ExpandLevel::Summary => Post {
                post_type: self.post_type.clone(),
                user_id: self.user_id.clone(),
                root_id: self.root_id.clone(),
                message: self.message.clone(),
                delete_at: self.delete_at,
                ..id
            },
            ExpandLevel::All => self.clone(),
        }
    }
}
