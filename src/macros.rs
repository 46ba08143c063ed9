// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logging macros for convenient logging

/// Log a message with panic severity
///
/// # Examples
/// ```ignore
/// log_panic!(logger, "state machine corrupted: {:?}", state);
/// ```
#[macro_export]
macro_rules! log_panic {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log_at!($logger, $crate::Level::Panic, $($arg)+)
    };
}

/// Log a message with alert severity
#[macro_export]
macro_rules! log_alert {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log_at!($logger, $crate::Level::Alert, $($arg)+)
    };
}

/// Log a message with critical severity
///
/// # Examples
/// ```ignore
/// log_critical!(logger, "worker {} crashed", id);
/// ```
#[macro_export]
macro_rules! log_critical {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log_at!($logger, $crate::Level::Critical, $($arg)+)
    };
}

/// Log a message with error severity
#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log_at!($logger, $crate::Level::Error, $($arg)+)
    };
}

/// Log a message with warning severity
#[macro_export]
macro_rules! log_warning {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log_at!($logger, $crate::Level::Warning, $($arg)+)
    };
}

/// Log a message with notice severity
#[macro_export]
macro_rules! log_notice {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log_at!($logger, $crate::Level::Notice, $($arg)+)
    };
}

/// Log a message with output severity (program output routed via the log)
#[macro_export]
macro_rules! log_output {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log_at!($logger, $crate::Level::Output, $($arg)+)
    };
}

/// Log a message with info severity
///
/// # Examples
/// ```ignore
/// log_info!(logger, "listening on {}", addr);
/// ```
#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log_at!($logger, $crate::Level::Info, $($arg)+)
    };
}

/// Log a message with debug severity
#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log_at!($logger, $crate::Level::Debug, $($arg)+)
    };
}

/// Log a message with fine severity
#[macro_export]
macro_rules! log_fine {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log_at!($logger, $crate::Level::Fine, $($arg)+)
    };
}

/// Log a message with trace severity
#[macro_export]
macro_rules! log_trace {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log_at!($logger, $crate::Level::Trace, $($arg)+)
    };
}

/// Log a message with lowest severity
#[macro_export]
macro_rules! log_lowest {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log_at!($logger, $crate::Level::Lowest, $($arg)+)
    };
}

/// Log at an explicit level, capturing the call site. The level check is
/// lock-free and happens before any formatting work.
#[macro_export]
macro_rules! log_at {
    ($logger:expr, $level:expr, $($arg:tt)+) => {{
        let logger = &$logger;
        if logger.is_enabled_for($level) {
            $crate::log(
                logger,
                $level,
                file!(),
                line!(),
                module_path!(),
                format_args!($($arg)+),
            )
        } else {
            Ok(())
        }
    }};
}

/// Log an error and its cause chain with a context message
///
/// # Examples
/// ```ignore
/// log_report!(logger, Level::Error, &err, "rule {} rejected", rule_id);
/// ```
#[macro_export]
macro_rules! log_report {
    ($logger:expr, $level:expr, $err:expr, $($arg:tt)+) => {
        $crate::report(
            &$logger,
            $level,
            file!(),
            line!(),
            module_path!(),
            $err,
            format_args!($($arg)+),
        )
    };
}

/// Assert a condition, routing the failure through the logger so the
/// evidence is flushed to the sink before the process panics.
#[macro_export]
macro_rules! log_assert {
    ($logger:expr, $cond:expr) => {
        if !$cond {
            let err = $crate::assert_failed(
                &$logger,
                file!(),
                line!(),
                module_path!(),
                stringify!($cond),
            );
            panic!("{err}");
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::{Level, Logger};

    // The subsystem is not initialized in unit tests, so every call takes
    // the silent-discard path; these check that the macros expand, borrow
    // and return as intended.

    #[test]
    fn test_level_macros_expand() {
        let logger = Logger::detached("macrotest", Level::Lowest);
        log_panic!(logger, "p").unwrap();
        log_alert!(logger, "a").unwrap();
        log_critical!(logger, "c").unwrap();
        log_error!(logger, "e {}", 1).unwrap();
        log_warning!(logger, "w").unwrap();
        log_notice!(logger, "n").unwrap();
        log_output!(logger, "o").unwrap();
        log_info!(logger, "i {}-{}", 1, 2).unwrap();
        log_debug!(logger, "d").unwrap();
        log_fine!(logger, "f").unwrap();
        log_trace!(logger, "t").unwrap();
        log_lowest!(logger, "l").unwrap();
    }

    #[test]
    fn test_disabled_level_short_circuits() {
        let logger = Logger::detached("macrotest.quiet", Level::Error);
        // Formatting a type whose Display panics proves the filter runs
        // before the format.
        struct Bomb;
        impl std::fmt::Display for Bomb {
            fn fmt(&self, _f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                panic!("formatted a filtered-out record")
            }
        }
        log_debug!(logger, "{}", Bomb).unwrap();
    }

    #[test]
    fn test_log_report_macro() {
        let logger = Logger::detached("macrotest.report", Level::Lowest);
        let err = crate::Error::config("boom");
        log_report!(logger, Level::Error, &err, "while testing {}", "macros").unwrap();
    }

    #[test]
    fn test_log_assert_passes() {
        let logger = Logger::detached("macrotest.assert", Level::Lowest);
        log_assert!(logger, 1 + 1 == 2);
    }

    #[test]
    #[should_panic(expected = "assertion")]
    fn test_log_assert_panics_on_false() {
        let logger = Logger::detached("macrotest.assert2", Level::Lowest);
        log_assert!(logger, 1 + 1 == 3);
    }
}
