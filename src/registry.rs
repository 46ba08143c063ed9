// SPDX-License-Identifier: Apache-2.0 OR MIT
// Named loggers and the process-wide registry used for level filtering

use crate::config::FilterRule;
use crate::level::Level;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

/// Logger name used for the subsystem's own producer-side records.
pub(crate) const INTERNAL_LOGGER_NAME: &str = "relaylog";

/// A named filter. The name is immutable; the level is read lock-free on
/// every log call and rewritten by `configure`.
pub struct Logger {
    name: String,
    level: AtomicU8,
}

impl Logger {
    /// Create a logger and register it. New loggers start wide open at
    /// `Lowest` until `configure` narrows them.
    pub fn new(name: impl Into<String>) -> Arc<Logger> {
        let logger = Arc::new(Logger {
            name: name.into(),
            level: AtomicU8::new(Level::Lowest.as_u8()),
        });
        register(&logger);
        logger
    }

    /// Create a logger without touching the registry. Useful for scoped
    /// loggers that should not take part in `configure`.
    pub fn detached(name: impl Into<String>, level: Level) -> Arc<Logger> {
        Arc::new(Logger {
            name: name.into(),
            level: AtomicU8::new(level.as_u8()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> Level {
        // A torn read is impossible on an AtomicU8; a racing reconfigure
        // mis-filters at most one record.
        Level::from_u8(self.level.load(Ordering::Relaxed)).unwrap_or(Level::Lowest)
    }

    pub fn set_level(&self, level: Level) {
        self.level.store(level.as_u8(), Ordering::Relaxed);
    }

    /// Lock-free filter check, callable on every log call site.
    #[inline]
    pub fn is_enabled_for(&self, level: Level) -> bool {
        level.as_u8() <= self.level.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.name)
            .field("level", &self.level())
            .finish()
    }
}

fn registered() -> MutexGuard<'static, Vec<Arc<Logger>>> {
    static REGISTERED: OnceLock<Mutex<Vec<Arc<Logger>>>> = OnceLock::new();
    REGISTERED
        .get_or_init(|| Mutex::new(Vec::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Register a logger so `configure` can reach it. Names need not be unique;
/// duplicates simply get reconfigured together.
pub fn register(logger: &Arc<Logger>) {
    registered().push(Arc::clone(logger));
}

/// Remove a logger from the registry. An unknown logger is reported on
/// stderr, not an error.
pub fn unregister(logger: &Arc<Logger>) {
    let mut loggers = registered();
    let before = loggers.len();
    loggers.retain(|l| !Arc::ptr_eq(l, logger));
    if loggers.len() == before {
        eprintln!("[W] can't find registered logger: {}", logger.name());
    }
}

/// A stable copy of the registered-logger set.
pub fn snapshot() -> Vec<Arc<Logger>> {
    registered().clone()
}

/// Apply filter rules in list order: every registered logger whose name
/// starts with the rule prefix takes the rule's level, so the last matching
/// rule wins. The empty prefix matches all loggers. O(rules x loggers);
/// reconfiguration is rare.
pub fn configure(rules: &[FilterRule]) {
    let loggers = registered();
    for rule in rules {
        for logger in loggers.iter() {
            if logger.name().starts_with(&rule.prefix) {
                logger.set_level(rule.level);
            }
        }
    }
}

/// The logger used for the subsystem's own records (retry warnings, fatal
/// signal reports from producer threads).
pub(crate) fn internal_logger() -> &'static Arc<Logger> {
    static INTERNAL: OnceLock<Arc<Logger>> = OnceLock::new();
    INTERNAL.get_or_init(|| Logger::new(INTERNAL_LOGGER_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_logger_starts_open() {
        let logger = Logger::detached("test.open", Level::Lowest);
        assert!(logger.is_enabled_for(Level::Trace));
        assert!(logger.is_enabled_for(Level::Panic));
    }

    #[test]
    fn test_is_enabled_for_threshold() {
        let logger = Logger::detached("test.threshold", Level::Warning);
        assert!(logger.is_enabled_for(Level::Error));
        assert!(logger.is_enabled_for(Level::Warning));
        assert!(!logger.is_enabled_for(Level::Notice));
        assert!(!logger.is_enabled_for(Level::Debug));
    }

    #[test]
    fn test_register_snapshot_unregister() {
        let logger = Logger::new("test.registry.member");
        assert!(snapshot().iter().any(|l| Arc::ptr_eq(l, &logger)));
        unregister(&logger);
        assert!(!snapshot().iter().any(|l| Arc::ptr_eq(l, &logger)));
    }

    #[test]
    fn test_configure_prefix_rules() {
        let a_b_x = Logger::new("cfgtest.a.b.x");
        let a_c = Logger::new("cfgtest.a.c");
        let a_b = Logger::new("cfgtest.a.b");
        let z = Logger::new("cfgtest.z");

        configure(&[
            FilterRule::new("", Level::Lowest),
            FilterRule::new("cfgtest.a", Level::Output),
            FilterRule::new("cfgtest.a.b", Level::Warning),
        ]);

        // Last matching rule wins.
        assert!(!a_b_x.is_enabled_for(Level::Info));
        assert!(!a_c.is_enabled_for(Level::Debug));
        assert!(a_c.is_enabled_for(Level::Output));
        assert!(a_b.is_enabled_for(Level::Warning));
        assert!(z.is_enabled_for(Level::Debug));

        for logger in [&a_b_x, &a_c, &a_b, &z] {
            unregister(logger);
        }
    }

    #[test]
    fn test_configure_duplicate_names() {
        let one = Logger::new("cfgdup.same");
        let two = Logger::new("cfgdup.same");
        configure(&[FilterRule::new("cfgdup.same", Level::Error)]);
        assert_eq!(one.level(), Level::Error);
        assert_eq!(two.level(), Level::Error);
        unregister(&one);
        unregister(&two);
    }
}
