// SPDX-License-Identifier: Apache-2.0 OR MIT
//! High-throughput, low-contention logging core for multi-threaded
//! processes.
//!
//! Producer threads format records locally and push them onto a bounded
//! in-process data channel; a single internal handler thread drains the
//! channel, renders one line per message segment and appends to the sink
//! (a file, stdout or stderr). A request/reply control channel carries the
//! readiness handshake plus explicit flush and shutdown requests, and a
//! signalfd lets the same poll loop react to synchronous faults so the log
//! is durable before the process dies.
//!
//! ```no_run
//! use relaylog::Logger;
//!
//! relaylog::init("demo", "-").unwrap();
//! let logger = Logger::new("demo.main");
//! relaylog::log_info!(logger, "hello from thread rank {}", relaylog::thread_rank()).unwrap();
//! relaylog::flush().unwrap();
//! relaylog::finalize().unwrap();
//! ```
//!
//! `fork()` is survived by tearing the subsystem down in the pre-fork hook
//! and rebuilding it in the parent afterwards; the child stays finalized
//! until it calls [`init`] itself.

mod channel;
pub mod config;
mod error;
mod fork;
mod handler;
mod level;
mod lifecycle;
#[macro_use]
mod macros;
mod producer;
mod record;
mod registry;
mod signals;

pub use channel::DATA_CHANNEL_CAPACITY;
pub use config::FilterRule;
pub use error::{Error, ErrorKind, MAX_ERR_DEPTH};
pub use handler::POLL_TIMEOUT_MS;
pub use level::Level;
pub use lifecycle::{finalize, flush, init, state, State};
pub use producer::{
    assert_failed, log, report, set_thread_rank, thread_rank, SEND_RETRIES_MAX, SEND_RETRY_DELAY,
};
pub use record::{basename, decode, encode, render_line, Frame, RecordHead};
pub use registry::{configure, register, snapshot, unregister, Logger};
pub use signals::{install_sighandler, signal_display};
