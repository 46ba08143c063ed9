// SPDX-License-Identifier: Apache-2.0 OR MIT
// The internal handler: the single consumer thread that owns the sink.
//
// One poll loop multiplexes three inputs: the data doorbell (record frames
// to write), the control doorbell (ready/flush/exit requests) and a
// signalfd carrying synchronous faults. A 500 ms timeout paces durable
// flushes when nothing arrives.

use crate::channel::{Channels, EXIT_REQ, FLUSH_REP, FLUSH_REQ, READY_REP, READY_REQ};
use crate::error::{accumulate, Error, ErrorKind, MAX_ERR_DEPTH};
use crate::level::Level;
use crate::producer::current_tid;
use crate::record::{self, Frame, RecordHead};
use crate::signals;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signalfd::SignalFd;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::os::fd::AsRawFd;
use std::os::fd::IntoRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::sync::Arc;

/// Poll timeout pacing the handler's idle flushes.
pub const POLL_TIMEOUT_MS: u16 = 500;

/// Logger name stamped on records the handler emits about itself.
pub(crate) const HANDLER_LOGGER_NAME: &str = "relaylog.handler";

/// The opaque byte stream records are appended to.
#[derive(Debug)]
pub(crate) enum Sink {
    Stdout,
    Stderr,
    File(std::fs::File),
}

impl Sink {
    /// `-` is standard output, `+` standard error, anything else a file
    /// opened write-only, created if needed, append-only, mode 0644.
    pub(crate) fn open(path: &str) -> Result<Self, Error> {
        match path {
            "-" => Ok(Sink::Stdout),
            "+" => Ok(Sink::Stderr),
            _ => OpenOptions::new()
                .write(true)
                .create(true)
                .append(true)
                .mode(0o644)
                .open(path)
                .map(Sink::File)
                .map_err(|err| Error::config(format!("can't open {path}: {err}"))),
        }
    }

    fn write(&self, buf: &[u8]) -> nix::Result<usize> {
        match self {
            Sink::Stdout => nix::unistd::write(std::io::stdout(), buf),
            Sink::Stderr => nix::unistd::write(std::io::stderr(), buf),
            Sink::File(file) => nix::unistd::write(file, buf),
        }
    }

    /// Durable-write primitive. EROFS and EINVAL mean the descriptor does
    /// not support synchronisation (stdout, stderr, odd filesystems) and
    /// count as success.
    fn sync(&self) -> Result<(), Error> {
        let result = match self {
            Sink::Stdout => nix::unistd::fdatasync(std::io::stdout().as_raw_fd()),
            Sink::Stderr => nix::unistd::fdatasync(std::io::stderr().as_raw_fd()),
            Sink::File(file) => nix::unistd::fdatasync(file.as_raw_fd()),
        };
        match result {
            Ok(()) | Err(Errno::EROFS) | Err(Errno::EINVAL) => Ok(()),
            Err(errno) => Err(Error::platform("fdatasync", errno)),
        }
    }
}

/// Per-run configuration handed to the handler thread by `init`.
#[derive(Clone)]
pub(crate) struct HandlerConfig {
    pub(crate) progname: String,
    pub(crate) filename: String,
}

/// What one pass through poll(2) reported.
#[derive(Default, Clone, Copy)]
struct Readiness {
    data: bool,
    control: bool,
    signal: bool,
    signal_err: bool,
    timeout: bool,
}

enum LoopAction {
    Continue,
    Exit,
}

struct Handler {
    channels: Arc<Channels>,
    sink: Sink,
    watch: Option<SignalFd>,
    cfg: HandlerConfig,
    pid: u32,
    tid: Option<i32>,
    line_buf: String,
}

/// Thread entry point. Returns the first error observed with all later
/// errors chained onto it.
pub(crate) fn run(channels: Arc<Channels>, cfg: HandlerConfig, sink: Sink) -> Result<(), Error> {
    let mut handler = Handler {
        channels,
        sink,
        watch: None,
        cfg,
        pid: std::process::id(),
        tid: current_tid(),
        line_buf: String::with_capacity(256),
    };

    // A missing fault watch degrades signal reporting, not logging.
    handler.watch = match signals::install_fault_watch() {
        Ok(watch) => Some(watch),
        Err(err) => {
            eprintln!("[W] internal handler runs without fault watch: {err}");
            None
        }
    };

    let mut acc = handler.main_loop();
    if let Err(err) = handler.shutdown() {
        accumulate(&mut acc, err);
    }
    match acc {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

impl Handler {
    fn main_loop(&mut self) -> Option<Error> {
        let mut acc: Option<Error> = None;
        loop {
            let ready = match self.poll_inputs() {
                Ok(ready) => ready,
                Err(Errno::EINTR) => continue,
                Err(errno) => {
                    let quit = note_error(&mut acc, Err(Error::platform("poll", errno)));
                    let _ = self.sink.sync();
                    if quit {
                        break;
                    }
                    continue;
                }
            };

            if ready.timeout {
                if note_error(&mut acc, self.flush()) {
                    break;
                }
                continue;
            }
            if ready.data {
                if note_error(&mut acc, self.process_data()) {
                    break;
                }
            }
            if ready.control {
                let (action, err) = self.process_control();
                let quit = match err {
                    Some(err) => note_error(&mut acc, Err(err)),
                    None => false,
                };
                if quit || matches!(action, LoopAction::Exit) {
                    break;
                }
            }
            if ready.signal {
                // Everything already enqueued must land before the record
                // that explains why the process is about to die.
                if note_error(&mut acc, self.drain_data()) {
                    break;
                }
                if note_error(&mut acc, self.process_signal()) {
                    break;
                }
            }
            if ready.signal_err {
                if note_error(&mut acc, self.flush()) {
                    break;
                }
            }
        }
        acc
    }

    fn poll_inputs(&self) -> nix::Result<Readiness> {
        let mut fds = Vec::with_capacity(3);
        fds.push(PollFd::new(
            self.channels.data.doorbell().fd(),
            PollFlags::POLLIN,
        ));
        fds.push(PollFd::new(
            self.channels.control.doorbell().fd(),
            PollFlags::POLLIN,
        ));
        if let Some(watch) = &self.watch {
            use std::os::fd::AsFd;
            fds.push(PollFd::new(watch.as_fd(), PollFlags::POLLIN));
        }

        let n = poll(&mut fds, PollTimeout::from(POLL_TIMEOUT_MS))?;

        let pollin = |fd: &PollFd<'_>| {
            fd.revents()
                .is_some_and(|revents| revents.contains(PollFlags::POLLIN))
        };
        let pollerr = |fd: &PollFd<'_>| {
            fd.revents()
                .is_some_and(|revents| revents.contains(PollFlags::POLLERR))
        };

        Ok(Readiness {
            timeout: n == 0,
            data: pollin(&fds[0]),
            control: pollin(&fds[1]),
            signal: fds.len() > 2 && pollin(&fds[2]),
            signal_err: fds.len() > 2 && pollerr(&fds[2]),
        })
    }

    /// Dequeue and write everything the producers have pushed so far.
    fn process_data(&mut self) -> Result<(), Error> {
        self.channels.data.doorbell().drain();
        while let Some(frame) = self.channels.data.try_recv() {
            self.write_record(&frame)?;
        }
        Ok(())
    }

    fn write_record(&mut self, frame: &Frame) -> Result<(), Error> {
        let (head, file, func, logger, msg) = record::decode(frame)?;
        let file = record::basename(file);
        // A multi-line message produces one output line per segment, all
        // sharing the same head.
        for segment in msg.split('\n') {
            self.line_buf.clear();
            record::render_line(
                &mut self.line_buf,
                &head,
                &self.cfg.progname,
                self.pid,
                file,
                func,
                logger,
                segment,
            );
            self.write_line();
        }
        Ok(())
    }

    /// Append the rendered line to the sink. A short or failed write falls
    /// back to standard error with an explanatory note; the record is never
    /// silently lost.
    fn write_line(&mut self) {
        let line = self.line_buf.as_bytes();
        loop {
            match self.sink.write(line) {
                Ok(n) if n == line.len() => return,
                Err(Errno::EINTR) => continue,
                Ok(_) | Err(_) => break,
            }
        }
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "[W] can't write to {}, writing to stderr instead.",
            self.cfg.filename
        );
        let _ = stderr.write_all(line);
    }

    fn process_control(&mut self) -> (LoopAction, Option<Error>) {
        self.channels.control.doorbell().drain();
        let mut first_err: Option<Error> = None;
        while let Some(request) = self.channels.control.try_recv() {
            match request.msg.as_str() {
                READY_REQ => {
                    let _ = request.reply.send(READY_REP.to_string());
                }
                FLUSH_REQ => {
                    if let Err(err) = self.flush() {
                        accumulate(&mut first_err, err);
                    }
                    let _ = request.reply.send(FLUSH_REP.to_string());
                }
                EXIT_REQ => {
                    // No reply by protocol; the requester joins the thread.
                    if let Err(err) = self.flush() {
                        accumulate(&mut first_err, err);
                    }
                    return (LoopAction::Exit, first_err);
                }
                other => {
                    accumulate(
                        &mut first_err,
                        Error::protocol("ready?/flush?/exit?", other),
                    );
                }
            }
        }
        (LoopAction::Continue, first_err)
    }

    /// A synchronous fault reached the handler thread. Record it, make the
    /// sink durable and die by re-raising with the default disposition.
    fn process_signal(&mut self) -> Result<(), Error> {
        let Some(watch) = self.watch.as_mut() else {
            return Ok(());
        };
        let info = match watch.read_signal() {
            Ok(Some(info)) => info,
            Ok(None) => return Ok(()),
            Err(errno) => return Err(Error::platform("signalfd read", errno)),
        };

        let signo = info.ssi_signo as i32;
        let description =
            signals::signal_display(signo, info.ssi_code as i32, info.ssi_pid, info.ssi_uid);
        self.log_own(Level::Critical, &description);
        self.flush()?;

        signals::restore_default_disposition(signo)?;
        // Does not return for fatal signals: the thread unwinds from the
        // re-raise with the default disposition in place.
        signals::reraise(signo)?;
        Ok(())
    }

    /// Write a record about the handler itself, bypassing the data channel.
    fn log_own(&mut self, level: Level, msg: &str) {
        let (secs, nanos) = record::wall_clock();
        let head = RecordHead {
            level,
            secs,
            nanos,
            tid: self.tid,
            rank: 0,
            line: line!(),
        };
        let file = record::basename(file!());
        for segment in msg.split('\n') {
            self.line_buf.clear();
            record::render_line(
                &mut self.line_buf,
                &head,
                &self.cfg.progname,
                self.pid,
                file,
                "log_own",
                HANDLER_LOGGER_NAME,
                segment,
            );
            self.write_line();
        }
    }

    fn drain_data(&mut self) -> Result<(), Error> {
        self.process_data()
    }

    /// Flush is complete when the data queue was observed empty and the
    /// sink's durable-write primitive has returned.
    fn flush(&mut self) -> Result<(), Error> {
        loop {
            self.drain_data()?;
            if self.channels.data.is_empty() {
                break;
            }
        }
        self.sink.sync()
    }

    fn shutdown(&mut self) -> Result<(), Error> {
        let mut acc = None;
        if let Err(err) = self.flush() {
            accumulate(&mut acc, err);
        }
        if let Sink::File(file) = std::mem::replace(&mut self.sink, Sink::Stderr) {
            let fd = file.into_raw_fd();
            if unsafe { libc::close(fd) } != 0 {
                accumulate(
                    &mut acc,
                    Error::platform("close", Errno::last()),
                );
            }
        }
        match acc {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Feed one result into the accumulated error chain. Returns true when the
/// chain got too deep and the loop must abort.
fn note_error(acc: &mut Option<Error>, result: Result<(), Error>) -> bool {
    let Err(err) = result else {
        return false;
    };
    accumulate(acc, err);
    let depth = acc.as_ref().map_or(0, Error::depth);
    if depth > MAX_ERR_DEPTH {
        accumulate(acc, Error::new(ErrorKind::TooManyErrors { depth }));
        return true;
    }
    if let Some(err) = acc.as_ref() {
        eprintln!("[W] internal handler: {}", err.display_chain());
    }
    false
}
