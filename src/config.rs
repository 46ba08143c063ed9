// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Filter-rule configuration applied to registered loggers.
//!
//! Rules pair a logger-name prefix with a level and are applied in list
//! order; later rules override earlier matches and the empty prefix matches
//! every logger.

use crate::error::Error;
use crate::level::Level;
use serde::{Deserialize, Serialize};

/// One `(name-prefix, level)` filter entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    /// Logger-name prefix this rule applies to; `""` matches all.
    pub prefix: String,

    /// Level assigned to every matching logger.
    pub level: Level,
}

impl FilterRule {
    pub fn new(prefix: impl Into<String>, level: Level) -> Self {
        Self {
            prefix: prefix.into(),
            level,
        }
    }

    /// Parse a `prefix:level` pair as found on command lines and in config
    /// files. The prefix may be empty (`:debug` narrows everything); the
    /// level accepts the usual aliases.
    pub fn parse(spec: &str) -> Result<Self, Error> {
        let (prefix, level) = spec
            .rsplit_once(':')
            .ok_or_else(|| Error::config(format!("bad filter rule (want prefix:level): {spec}")))?;
        Ok(Self {
            prefix: prefix.to_string(),
            level: Level::from_name(level)?,
        })
    }
}

impl std::fmt::Display for FilterRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.prefix, self.level)
    }
}
