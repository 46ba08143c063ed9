// SPDX-License-Identifier: Apache-2.0 OR MIT
// Fatal-signal pipeline.
//
// Two regimes. Inside the handler thread, synchronous faults arrive through
// a signalfd included in its poll loop. Every other thread gets a
// process-wide sigaction that logs a backtrace, asks the handler to drain,
// and re-raises with the default disposition.

use crate::error::Error;
use crate::level::Level;
use crate::lifecycle;
use crate::producer;
use crate::registry;
use nix::sys::signal::{
    pthread_sigmask, sigaction, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal,
};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use std::io::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Signals the internal handler thread keeps blocked so they never preempt
/// the writer.
const HANDLER_BLOCKED: [Signal; 7] = [
    Signal::SIGSEGV,
    Signal::SIGBUS,
    Signal::SIGFPE,
    Signal::SIGILL,
    Signal::SIGQUIT,
    Signal::SIGTERM,
    Signal::SIGINT,
];

/// Synchronous faults routed to the handler thread through its signalfd.
const HANDLER_FAULTS: [Signal; 4] = [
    Signal::SIGSEGV,
    Signal::SIGBUS,
    Signal::SIGFPE,
    Signal::SIGILL,
];

/// Signals covered by the process-wide handler. SIGQUIT is left alone as a
/// user-invoked core-dump escape hatch.
const PROCESS_SIGNALS: [Signal; 6] = [
    Signal::SIGSEGV,
    Signal::SIGBUS,
    Signal::SIGFPE,
    Signal::SIGILL,
    Signal::SIGINT,
    Signal::SIGTERM,
];

/// Single-shot re-entry guard for the process-wide handler.
static FATAL_IN_PROGRESS: AtomicBool = AtomicBool::new(false);

fn sigset_of(signals: &[Signal]) -> SigSet {
    let mut set = SigSet::empty();
    for sig in signals {
        set.add(*sig);
    }
    set
}

fn signal_name(signo: i32) -> &'static str {
    Signal::try_from(signo).map_or("UNKNOWN", Signal::as_str)
}

/// Human-readable description of a delivered signal, suitable for one log
/// record. Sender identity is only meaningful for asynchronous signals.
pub fn signal_display(signo: i32, code: i32, pid: u32, uid: u32) -> String {
    let name = signal_name(signo);
    match Signal::try_from(signo) {
        Ok(Signal::SIGTERM) | Ok(Signal::SIGINT) => match code {
            libc::SI_USER => {
                format!("Signal={signo} ('{name}'), Sender PID:UID='{pid}:{uid}'")
            }
            libc::SI_KERNEL => format!("Signal={signo} ('{name}'), Sender=KERNEL"),
            _ => format!("Signal={signo} ('{name}'), Sender=Unknown"),
        },
        Ok(Signal::SIGABRT) | Ok(Signal::SIGILL) | Ok(Signal::SIGFPE) | Ok(Signal::SIGSEGV)
        | Ok(Signal::SIGBUS) => {
            format!("Signal={signo} ('{name}'), Signal Code={code} (man 2 sigaction)")
        }
        _ => format!("Signal={signo} ('{name}'), This should not happen!"),
    }
}

/// Handler-thread setup: block the asynchronous set on this thread and open
/// a signalfd carrying the synchronous faults. Must run on the handler
/// thread itself, before its first poll.
pub(crate) fn install_fault_watch() -> Result<SignalFd, Error> {
    let blocked = sigset_of(&HANDLER_BLOCKED);
    pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&blocked), None)
        .map_err(|errno| Error::platform("pthread_sigmask", errno))?;

    let faults = sigset_of(&HANDLER_FAULTS);
    SignalFd::with_flags(&faults, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)
        .map_err(|errno| Error::platform("signalfd", errno))
}

/// Undo the handler-thread mask and restore the default disposition for one
/// signal, so a re-raise terminates the thread the way the kernel intended.
pub(crate) fn restore_default_disposition(signo: i32) -> Result<(), Error> {
    let empty = SigSet::empty();
    pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&empty), None)
        .map_err(|errno| Error::platform("pthread_sigmask", errno))?;

    let sig = Signal::try_from(signo).map_err(|errno| Error::platform("signal", errno))?;
    let dfl = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    unsafe { sigaction(sig, &dfl) }.map_err(|errno| Error::platform("sigaction", errno))?;
    Ok(())
}

/// Re-deliver a signal to the calling thread.
pub(crate) fn reraise(signo: i32) -> Result<(), Error> {
    let sig = Signal::try_from(signo).map_err(|errno| Error::platform("signal", errno))?;
    nix::sys::pthread::pthread_kill(nix::sys::pthread::pthread_self(), sig)
        .map_err(|errno| Error::platform("pthread_kill", errno))
}

/// Install the process-wide sigaction for faults plus SIGINT/SIGTERM on the
/// calling (non-handler) threads. Call once after `init`.
pub fn install_sighandler() -> Result<(), Error> {
    let mask = sigset_of(&PROCESS_SIGNALS);
    let action = SigAction::new(
        SigHandler::SigAction(fatal_signal_handler),
        SaFlags::SA_SIGINFO,
        mask,
    );
    for sig in PROCESS_SIGNALS {
        unsafe { sigaction(sig, &action) }
            .map_err(|errno| Error::platform("sigaction", errno))?;
    }
    Ok(())
}

/// Sleep for the full duration even when interrupted by signal delivery.
fn sleep_uninterrupted(total: Duration) {
    let deadline = Instant::now() + total;
    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(deadline - now);
    }
}

extern "C" fn fatal_signal_handler(
    signo: libc::c_int,
    info: *mut libc::siginfo_t,
    _ctx: *mut libc::c_void,
) {
    // This handler covers several signals; handling one can fault again.
    // The second entry must not recurse into the logging machinery.
    if FATAL_IN_PROGRESS.swap(true, Ordering::SeqCst) {
        unsafe { libc::_exit(128 + signo) };
    }

    let (code, pid, uid) = if info.is_null() {
        (0, 0, 0)
    } else {
        unsafe { ((*info).si_code, (*info).si_pid() as u32, (*info).si_uid()) }
    };

    let description = signal_display(signo, code, pid, uid);
    let trace = backtrace::Backtrace::new();
    let report = format!("{description} - {trace:?}");

    {
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(report.as_bytes());
        let _ = stderr.write_all(b"\n");
    }

    let _ = producer::log(
        registry::internal_logger(),
        Level::Critical,
        file!(),
        line!(),
        "fatal_signal_handler",
        format_args!("{report}"),
    );

    // Ask the handler thread to drain and stop; give it up to a second.
    lifecycle::request_handler_exit();
    sleep_uninterrupted(Duration::from_secs(1));

    if restore_default_disposition(signo).is_err() {
        unsafe { libc::_exit(128 + signo) };
    }
    if reraise(signo).is_err() {
        unsafe { libc::_exit(128 + signo) };
    }
}
