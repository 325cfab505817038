/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProxyError;

/// How much of an entity an app receives. Each level is a superset of the
/// one below it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExpandLevel {
    #[default]
    None,
    Id,
    Summary,
    All,
}

impl ExpandLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Id => "id",
            Self::Summary => "summary",
            Self::All => "all",
        }
    }
}

impl fmt::Display for ExpandLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `Expand` slot: a level and whether its absence fails the call.
///
/// Wire form is a string: `""`, `none`, `id`, `summary` or `all`, with a
/// leading `+` for required.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct Level {
    pub level: ExpandLevel,
    pub required: bool,
}

impl Level {
    pub const NONE: Level = Level::optional(ExpandLevel::None);

    #[must_use]
    pub const fn optional(level: ExpandLevel) -> Self {
        Self {
            level,
            required: false,
        }
    }

    #[must_use]
    pub const fn required(level: ExpandLevel) -> Self {
        Self {
            level,
            required: true,
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        self.level == ExpandLevel::None
    }

    pub fn parse(s: &str) -> Result<Self, ProxyError> {
        let (required, rest) = match s.trim().strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, s.trim()),
        };
        let level = match rest.to_ascii_lowercase().as_str() {
            "" | "none" => ExpandLevel::None,
            "id" => ExpandLevel::Id,
            "summary" => ExpandLevel::Summary,
            "all" => ExpandLevel::All,
            other => {
                return Err(ProxyError::InvalidInput(format!(
                    "{other:?} is not a known expand level"
                )))
            }
        };
        Ok(Self { level, required })
    }

    /// The richer of two slots; required if either is.
    #[must_use]
    pub fn union(self, other: Level) -> Level {
        Level {
            level: self.level.max(other.level),
            required: self.required || other.required,
        }
    }
}

impl TryFrom<String> for Level {
    type Error = ProxyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Level> for String {
    fn from(l: Level) -> Self {
        l.to_string()
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.required {
            f.write_str("+")?;
        }
        f.write_str(self.level.as_str())
    }
}
