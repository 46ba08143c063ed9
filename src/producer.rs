// SPDX-License-Identifier: Apache-2.0 OR MIT
// Producer-side submission path: per-thread state, message formatting and
// the non-blocking enqueue with bounded retries.

use crate::channel::Channels;
use crate::error::Error;
use crate::level::Level;
use crate::lifecycle::{self, State};
use crate::record::{self, Frame};
use crate::registry::{internal_logger, Logger, INTERNAL_LOGGER_NAME};
use std::cell::RefCell;
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

/// Non-blocking enqueue attempts before the blocking fallback engages.
pub const SEND_RETRIES_MAX: u32 = 3;

/// Pause between enqueue retries.
pub const SEND_RETRY_DELAY: Duration = Duration::from_micros(500);

/// Initial per-thread scratch buffer size. Oversized messages grow it on
/// demand; the buffer shrinks back after the send.
pub(crate) const DEFAULT_MSG_BUF: usize = 128;

/// Kernel thread id of the calling thread, where the platform has one.
#[cfg(target_os = "linux")]
pub(crate) fn current_tid() -> Option<i32> {
    Some(unsafe { libc::gettid() })
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn current_tid() -> Option<i32> {
    None
}

/// Everything a producer thread owns: allocated lazily on the first log
/// attempt, released when the thread exits.
struct ThreadState {
    scratch: String,
    tid: Option<i32>,
    rank: u16,
    epoch: u64,
    channels: Option<Arc<Channels>>,
}

impl ThreadState {
    fn new() -> Self {
        Self {
            scratch: String::with_capacity(DEFAULT_MSG_BUF),
            tid: current_tid(),
            rank: 0,
            epoch: 0,
            channels: None,
        }
    }

    /// Channel handles for the current lifecycle epoch; cached handles from
    /// a previous init/finalize cycle are refreshed.
    fn channels(&mut self) -> Option<Arc<Channels>> {
        let epoch = lifecycle::epoch();
        if self.channels.is_none() || self.epoch != epoch {
            match lifecycle::channels() {
                Some((epoch, channels)) => {
                    self.epoch = epoch;
                    self.channels = Some(channels);
                }
                None => self.channels = None,
            }
        }
        self.channels.clone()
    }
}

thread_local! {
    static TSD: RefCell<ThreadState> = RefCell::new(ThreadState::new());
}

/// Submit one record. Outside the `Initialized` state this discards
/// silently and succeeds, so logging from static initializers and during
/// shutdown stays safe.
pub fn log(
    logger: &Logger,
    level: Level,
    file: &str,
    line: u32,
    func: &str,
    args: fmt::Arguments<'_>,
) -> Result<(), Error> {
    if lifecycle::state() != State::Initialized {
        return Ok(());
    }

    TSD.try_with(|cell| {
        // A formatting impl that logs would re-enter here; that inner
        // record is dropped rather than deadlocking the thread.
        let Ok(mut tsd) = cell.try_borrow_mut() else {
            return Ok(());
        };
        let Some(channels) = tsd.channels() else {
            return Ok(());
        };

        tsd.scratch.clear();
        // Writing into a String cannot fail.
        let _ = tsd.scratch.write_fmt(args);

        let frame = record::encode(
            level,
            record::wall_clock(),
            tsd.tid,
            tsd.rank,
            file,
            line,
            func,
            logger.name(),
            &tsd.scratch,
        );

        if tsd.scratch.capacity() > DEFAULT_MSG_BUF {
            tsd.scratch.shrink_to(DEFAULT_MSG_BUF);
        }
        let (tid, rank) = (tsd.tid, tsd.rank);
        drop(tsd);

        send_frame(&channels, frame, tid, rank)
    })
    // The thread-local is gone during thread teardown; nothing to log to.
    .unwrap_or(Ok(()))
}

/// Enqueue with bounded retries, then a blocking fallback. Records are
/// never silently dropped on back-pressure.
fn send_frame(
    channels: &Channels,
    mut frame: Frame,
    tid: Option<i32>,
    rank: u16,
) -> Result<(), Error> {
    for _ in 0..=SEND_RETRIES_MAX {
        match channels.data.try_send(frame) {
            Ok(()) => return Ok(()),
            Err(back) => {
                frame = back;
                std::thread::sleep(SEND_RETRY_DELAY);
            }
        }
    }

    loop {
        match channels.data.try_send(frame) {
            Ok(()) => break,
            Err(back) => {
                frame = back;
                std::thread::sleep(SEND_RETRY_DELAY);
            }
        }
    }
    report_retry_pressure(channels, tid, rank);
    Ok(())
}

/// Recursive self-report about back-pressure. Subject to the same
/// non-blocking discipline as any other record: dropped when the queue is
/// still full, never a deadlock.
fn report_retry_pressure(channels: &Channels, tid: Option<i32>, rank: u16) {
    if !internal_logger().is_enabled_for(Level::Warning) {
        return;
    }
    let err = Error::retries_exhausted(SEND_RETRIES_MAX);
    let msg = format!("{err}; record delivered via blocking fallback");
    let frame = record::encode(
        Level::Warning,
        record::wall_clock(),
        tid,
        rank,
        file!(),
        line!(),
        "report_retry_pressure",
        INTERNAL_LOGGER_NAME,
        &msg,
    );
    let _ = channels.data.try_send(frame);
}

/// Tag the calling thread with a 16-bit rank shown in output lines. The
/// default rank is 0; ranks are never derived from thread handles.
pub fn set_thread_rank(rank: u16) {
    let _ = TSD.try_with(|cell| cell.borrow_mut().rank = rank);
}

/// The calling thread's current rank.
pub fn thread_rank() -> u16 {
    TSD.try_with(|cell| cell.borrow().rank).unwrap_or(0)
}

/// Log an error with its whole cause chain under a custom context message.
pub fn report(
    logger: &Logger,
    level: Level,
    file: &str,
    line: u32,
    func: &str,
    err: &Error,
    context: fmt::Arguments<'_>,
) -> Result<(), Error> {
    if !logger.is_enabled_for(level) {
        return Ok(());
    }
    log(
        logger,
        level,
        file,
        line,
        func,
        format_args!("{}: {}", context, err.display_chain()),
    )
}

/// Record a failed assertion at `Critical` and flush, so the evidence is
/// durable before the caller aborts. Returns the assertion error.
pub fn assert_failed(logger: &Logger, file: &str, line: u32, func: &str, expr: &str) -> Error {
    let err = Error::assertion(format!("{file}:{line}: assertion '{expr}' is false"));
    let _ = log(
        logger,
        Level::Critical,
        file,
        line,
        func,
        format_args!("{err}"),
    );
    let _ = lifecycle::flush();
    err
}
