// Severity levels for records (12 levels, lower is more severe)

use crate::error::Error;
use serde::{Deserialize, Serialize};

/// Record severity. A record is emitted only if its level is numerically
/// less than or equal to the logger's configured level.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Unrecoverable condition, the process is about to die
    Panic = 0,
    /// Immediate operator action required
    Alert = 1,
    /// Critical conditions (fatal signal received, subsystem lost)
    Critical = 2,
    /// Error conditions
    Error = 3,
    /// Warning conditions
    Warning = 4,
    /// Significant normal condition
    Notice = 5,
    /// Program output routed through the log
    Output = 6,
    /// Informational
    Info = 7,
    /// Debug-level messages
    Debug = 8,
    /// Fine-grained debug
    Fine = 9,
    /// Per-iteration tracing
    Trace = 10,
    /// Everything, including the subsystem's own chatter
    Lowest = 11,
}

const LEVEL_CHARS: [char; 12] = ['P', 'A', 'C', 'E', 'W', 'N', 'O', 'I', 'D', 'F', 'T', 'L'];

const LEVEL_NAMES: [&str; 12] = [
    "panic", "alert", "critical", "error", "warning", "notice", "output", "info", "debug", "fine",
    "trace", "lowest",
];

impl Level {
    /// Get level as u8 (0-11)
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Single-character tag used in rendered output lines
    pub const fn as_char(self) -> char {
        LEVEL_CHARS[self as usize]
    }

    /// Canonical lowercase name
    pub const fn as_str(self) -> &'static str {
        LEVEL_NAMES[self as usize]
    }

    /// Create from u8 value (returns None if out of range)
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Level::Panic),
            1 => Some(Level::Alert),
            2 => Some(Level::Critical),
            3 => Some(Level::Error),
            4 => Some(Level::Warning),
            5 => Some(Level::Notice),
            6 => Some(Level::Output),
            7 => Some(Level::Info),
            8 => Some(Level::Debug),
            9 => Some(Level::Fine),
            10 => Some(Level::Trace),
            11 => Some(Level::Lowest),
            _ => None,
        }
    }

    /// Parse a level from its name or a documented alias, case-insensitive.
    ///
    /// Aliases: `emergency` -> Panic, `crit` -> Critical, `err` -> Error,
    /// `warn` -> Warning, `out` -> Output.
    pub fn from_name(name: &str) -> Result<Self, Error> {
        let lower = name.to_ascii_lowercase();
        let level = match lower.as_str() {
            "panic" | "emergency" => Level::Panic,
            "alert" => Level::Alert,
            "critical" | "crit" => Level::Critical,
            "error" | "err" => Level::Error,
            "warning" | "warn" => Level::Warning,
            "notice" => Level::Notice,
            "output" | "out" => Level::Output,
            "info" => Level::Info,
            "debug" => Level::Debug,
            "fine" => Level::Fine,
            "trace" => Level::Trace,
            "lowest" => Level::Lowest,
            _ => return Err(Error::config(format!("bad log level name: {name}"))),
        };
        Ok(level)
    }

    /// The 12 canonical names, most severe first.
    pub const fn all_names() -> &'static [&'static str; 12] {
        &LEVEL_NAMES
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
