// SPDX-License-Identifier: Apache-2.0 OR MIT
// In-process conduits between producer threads and the internal handler:
// a bounded lossy data queue and a request/reply control channel, each
// paired with an eventfd doorbell so the handler can poll(2) for both.

use crate::error::Error;
use crate::record::Frame;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use crossbeam_queue::ArrayQueue;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

/// Frames the data queue can hold before producers hit back-pressure.
pub const DATA_CHANNEL_CAPACITY: usize = 16384;

// Control-channel wire tags, case-sensitive.
pub(crate) const READY_REQ: &str = "BC->IH: ready?";
pub(crate) const READY_REP: &str = "IH->BC: ready!";
pub(crate) const EXIT_REQ: &str = "BC->IH: exit?";
pub(crate) const FLUSH_REQ: &str = "BC->IH: flush?";
pub(crate) const FLUSH_REP: &str = "IH->BC: flushed!";

/// A non-blocking eventfd the producer side rings after every enqueue and
/// the handler polls for readability.
pub(crate) struct Doorbell {
    fd: OwnedFd,
}

impl Doorbell {
    pub(crate) fn new() -> Result<Self, Error> {
        let raw = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if raw < 0 {
            return Err(Error::platform("eventfd", nix::errno::Errno::last()));
        }
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(raw) },
        })
    }

    /// Add one to the counter, retrying on EINTR. EAGAIN means the counter
    /// is saturated, which still leaves the fd readable, so the wakeup is
    /// already guaranteed.
    pub(crate) fn ring(&self) {
        let value: u64 = 1;
        let bytes = value.to_ne_bytes();
        loop {
            let ret = unsafe {
                libc::write(
                    self.fd.as_raw_fd(),
                    bytes.as_ptr() as *const libc::c_void,
                    bytes.len(),
                )
            };
            if ret == bytes.len() as isize {
                break;
            }
            let err = std::io::Error::last_os_error();
            match err.kind() {
                std::io::ErrorKind::Interrupted => continue,
                std::io::ErrorKind::WouldBlock => break,
                _ => {
                    eprintln!("[W] doorbell ring failed: {err}");
                    break;
                }
            }
        }
    }

    /// Read the counter back to zero. Returns how many rings were pending.
    pub(crate) fn drain(&self) -> u64 {
        let mut buf = [0u8; 8];
        loop {
            let ret = unsafe {
                libc::read(self.fd.as_raw_fd(), buf.as_mut_ptr() as *mut libc::c_void, 8)
            };
            if ret == 8 {
                return u64::from_ne_bytes(buf);
            }
            let err = std::io::Error::last_os_error();
            match err.kind() {
                std::io::ErrorKind::Interrupted => continue,
                // Nothing pending.
                std::io::ErrorKind::WouldBlock => return 0,
                _ => {
                    eprintln!("[W] doorbell drain failed: {err}");
                    return 0;
                }
            }
        }
    }

    pub(crate) fn fd(&self) -> BorrowedFd<'_> {
        use std::os::fd::AsFd;
        self.fd.as_fd()
    }
}

/// Many-producer, one-consumer conduit of encoded record frames. Lossy on
/// overrun at the producer side (the producer retries, then blocks).
pub(crate) struct DataChannel {
    queue: ArrayQueue<Frame>,
    bell: Doorbell,
}

impl DataChannel {
    pub(crate) fn new(capacity: usize) -> Result<Self, Error> {
        Ok(Self {
            queue: ArrayQueue::new(capacity),
            bell: Doorbell::new()?,
        })
    }

    /// Non-blocking enqueue. On a full queue the frame is handed back to
    /// the caller for retry.
    pub(crate) fn try_send(&self, frame: Frame) -> Result<(), Frame> {
        self.queue.push(frame)?;
        self.bell.ring();
        Ok(())
    }

    pub(crate) fn try_recv(&self) -> Option<Frame> {
        self.queue.pop()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn doorbell(&self) -> &Doorbell {
        &self.bell
    }
}

/// One request traveling producer -> handler, with its private reply slot.
pub(crate) struct ControlRequest {
    pub(crate) msg: String,
    pub(crate) reply: Sender<String>,
}

/// Request/reply conduit. A producer issues one request and blocks until
/// the single reply arrives; the wait is deliberately unbounded.
pub(crate) struct ControlChannel {
    tx: Sender<ControlRequest>,
    rx: Receiver<ControlRequest>,
    bell: Doorbell,
}

impl ControlChannel {
    pub(crate) fn new() -> Result<Self, Error> {
        let (tx, rx) = unbounded();
        Ok(Self {
            tx,
            rx,
            bell: Doorbell::new()?,
        })
    }

    /// Send a request and block until the handler replies.
    pub(crate) fn request(&self, msg: &str) -> Result<String, Error> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(ControlRequest {
                msg: msg.to_string(),
                reply: reply_tx,
            })
            .map_err(|_| Error::protocol(msg, "<control channel closed>"))?;
        self.bell.ring();
        reply_rx
            .recv()
            .map_err(|_| Error::protocol(msg, "<handler dropped request>"))
    }

    /// Send a request the handler never answers (`exit?`).
    pub(crate) fn request_no_reply(&self, msg: &str) -> Result<(), Error> {
        let (reply_tx, _reply_rx) = bounded(1);
        self.tx
            .send(ControlRequest {
                msg: msg.to_string(),
                reply: reply_tx,
            })
            .map_err(|_| Error::protocol(msg, "<control channel closed>"))?;
        self.bell.ring();
        Ok(())
    }

    pub(crate) fn try_recv(&self) -> Option<ControlRequest> {
        self.rx.try_recv().ok()
    }

    pub(crate) fn doorbell(&self) -> &Doorbell {
        &self.bell
    }
}

/// The queue context created by `init` and torn down by `finalize`.
pub(crate) struct Channels {
    pub(crate) data: DataChannel,
    pub(crate) control: ControlChannel,
}

impl Channels {
    pub(crate) fn new() -> Result<Self, Error> {
        Ok(Self {
            data: DataChannel::new(DATA_CHANNEL_CAPACITY)?,
            control: ControlChannel::new()?,
        })
    }
}
