// SPDX-License-Identifier: Apache-2.0 OR MIT
// Lifecycle controller: the process-wide state machine around the internal
// handler thread, plus the init/finalize/flush entry points.
//
// Normal path:
//   Unset -> init() -> Initializing -> Initialized
//   Initialized -> finalize() -> Finalizing -> Finalized
//   Finalized -> init() -> ...
// fork() support adds:
//   (Unset, Finalized) -> fork -> unchanged
//   Initialized -> pre-fork -> Finalizing -> Finalized -> Forked
//     parent: Forked -> Finalized -> Initializing -> Initialized
//     child:  Forked -> Finalized
//   (Initializing, Finalizing) -> fork -> abort

use crate::channel::{Channels, EXIT_REQ, FLUSH_REP, FLUSH_REQ, READY_REP, READY_REQ};
use crate::error::{accumulate, Error, ErrorKind};
use crate::fork;
use crate::handler::{self, HandlerConfig, Sink};
use nix::errno::Errno;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread::JoinHandle;

/// Lifecycle states. Mutated only under the lifecycle mutex; lock-free
/// reads are advisory.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unset = 0,
    Initializing = 1,
    Initialized = 2,
    Finalizing = 3,
    Finalized = 4,
    Forked = 5,
    Illegal = 6,
}

impl State {
    fn from_u8(value: u8) -> State {
        match value {
            0 => State::Unset,
            1 => State::Initializing,
            2 => State::Initialized,
            3 => State::Finalizing,
            4 => State::Finalized,
            5 => State::Forked,
            _ => State::Illegal,
        }
    }
}

static STATE: AtomicU8 = AtomicU8::new(State::Unset as u8);

/// Bumped on every successful channel-set creation so producer threads can
/// notice stale cached handles after a finalize/init cycle.
static EPOCH: AtomicU64 = AtomicU64::new(0);

struct Inner {
    handler: Option<JoinHandle<Result<(), Error>>>,
    channels: Option<Arc<Channels>>,
    sink_cfg: Option<HandlerConfig>,
}

fn inner() -> MutexGuard<'static, Inner> {
    static INNER: OnceLock<Mutex<Inner>> = OnceLock::new();
    INNER
        .get_or_init(|| {
            Mutex::new(Inner {
                handler: None,
                channels: None,
                sink_cfg: None,
            })
        })
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Advisory lock-free read of the lifecycle state.
pub fn state() -> State {
    State::from_u8(STATE.load(Ordering::Acquire))
}

fn set_state(state: State) {
    STATE.store(state as u8, Ordering::Release);
}

pub(crate) fn epoch() -> u64 {
    EPOCH.load(Ordering::Acquire)
}

/// Current channel set with its epoch, if one exists.
pub(crate) fn channels() -> Option<(u64, Arc<Channels>)> {
    let guard = inner();
    guard
        .channels
        .as_ref()
        .map(|channels| (epoch(), Arc::clone(channels)))
}

/// Ask the handler to drain and stop without touching the state machine.
/// Used by the fatal-signal path, which cannot run a full finalize.
pub(crate) fn request_handler_exit() {
    if let Some((_, channels)) = channels() {
        let _ = channels.control.request_no_reply(EXIT_REQ);
    }
}

/// Bring the subsystem up: create the queue context, spawn the internal
/// handler, wait for its readiness reply and publish `Initialized`.
///
/// `filename` selects the sink: `-` for stdout, `+` for stderr, any other
/// value a file opened append-only.
pub fn init(progname: &str, filename: &str) -> Result<(), Error> {
    let mut guard = inner();
    let current = state();
    if current != State::Unset && current != State::Finalized {
        return Err(Error::illegal_state(current));
    }
    if filename.is_empty() {
        return Err(Error::config("empty sink filename"));
    }
    let cfg = HandlerConfig {
        progname: progname.to_string(),
        filename: filename.to_string(),
    };
    init_locked(&mut guard, cfg)
}

fn init_locked(guard: &mut Inner, cfg: HandlerConfig) -> Result<(), Error> {
    let prev = state();
    set_state(State::Initializing);

    // Opening the sink here lets a bad path fail the call instead of
    // deadlocking the readiness handshake below.
    let sink = match Sink::open(&cfg.filename) {
        Ok(sink) => sink,
        Err(err) => {
            set_state(prev);
            return Err(err);
        }
    };

    let channels = match Channels::new() {
        Ok(channels) => Arc::new(channels),
        Err(err) => {
            set_state(State::Illegal);
            return Err(err);
        }
    };

    guard.channels = Some(Arc::clone(&channels));
    guard.sink_cfg = Some(cfg.clone());
    EPOCH.fetch_add(1, Ordering::AcqRel);

    let thread_channels = Arc::clone(&channels);
    let handle = std::thread::Builder::new()
        .name("relaylog-handler".to_string())
        .spawn(move || handler::run(thread_channels, cfg, sink));
    let handle = match handle {
        Ok(handle) => handle,
        Err(err) => {
            set_state(State::Illegal);
            return Err(Error::platform(
                "thread spawn",
                Errno::from_raw(err.raw_os_error().unwrap_or(0)),
            ));
        }
    };
    guard.handler = Some(handle);

    fork::install_once();

    let reply = match channels.control.request(READY_REQ) {
        Ok(reply) => reply,
        Err(err) => {
            set_state(State::Illegal);
            return Err(err);
        }
    };
    if reply != READY_REP {
        set_state(State::Illegal);
        return Err(Error::protocol(READY_REP, reply));
    }

    set_state(State::Initialized);
    Ok(())
}

/// Tear the subsystem down: ask the handler to exit, join it, destroy the
/// queue context and publish `Finalized`. Returns the first error the
/// handler observed, with subsequent errors chained.
pub fn finalize() -> Result<(), Error> {
    let mut guard = inner();
    let current = state();
    if current != State::Initialized {
        return Err(Error::illegal_state(current));
    }
    let result = finalize_locked(&mut guard);
    guard.sink_cfg = None;
    set_state(State::Finalized);
    result
}

/// Shared by `finalize` and the pre-fork hook: stop and join the handler,
/// drop the channel set, leave the sink config for a possible re-init.
/// The caller publishes the follow-up state.
fn finalize_locked(guard: &mut Inner) -> Result<(), Error> {
    set_state(State::Finalizing);
    let mut acc = None;

    if let Some(channels) = &guard.channels {
        if let Err(err) = channels.control.request_no_reply(EXIT_REQ) {
            accumulate(&mut acc, err);
        }
    }
    if let Some(handle) = guard.handler.take() {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => accumulate(&mut acc, err),
            Err(_) => accumulate(&mut acc, Error::new(ErrorKind::HandlerPanicked)),
        }
    }
    guard.channels = None;

    match acc {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Block until every record enqueued before this call is durably in the
/// sink. A no-op in any state but `Initialized`.
pub fn flush() -> Result<(), Error> {
    if state() != State::Initialized {
        return Ok(());
    }
    let Some((_, channels)) = channels() else {
        return Ok(());
    };
    let reply = channels.control.request(FLUSH_REQ)?;
    if reply != FLUSH_REP {
        return Err(Error::protocol(FLUSH_REP, reply));
    }
    Ok(())
}

// ---- fork integration, called from the pthread_atfork hooks ----

pub(crate) fn fork_prepare() {
    match state() {
        State::Initializing | State::Finalizing => {
            eprintln!(
                "[E] fork() while the logging subsystem is in state {:?}; aborting.",
                state()
            );
            std::process::abort();
        }
        State::Initialized => {
            let mut guard = inner();
            if let Err(err) = finalize_locked(&mut guard) {
                eprintln!("[W] pre-fork finalize: {}", err.display_chain());
            }
            set_state(State::Forked);
        }
        // Unset and Finalized survive a fork unchanged.
        _ => {}
    }
}

pub(crate) fn fork_parent() {
    if state() != State::Forked {
        return;
    }
    let mut guard = inner();
    set_state(State::Finalized);
    let Some(cfg) = guard.sink_cfg.clone() else {
        return;
    };
    if let Err(err) = init_locked(&mut guard, cfg) {
        eprintln!("[W] post-fork re-init failed: {}", err.display_chain());
    }
}

pub(crate) fn fork_child() {
    if state() != State::Forked {
        return;
    }
    let mut guard = inner();
    // The handler thread was not copied into the child and the inherited
    // queue context is unusable; drop everything and require an explicit
    // init() before the child may log.
    guard.handler = None;
    guard.channels = None;
    guard.sink_cfg = None;
    set_state(State::Finalized);
}
