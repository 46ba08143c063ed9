// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Fork safety: pthread_atfork hooks around the internal handler.
//!
//! The handler thread is not copied into the child and the in-process
//! queues are not fork-safe, so the only correct strategy is a
//! deterministic tear-down in the parent before the fork and a rebuild
//! (parent) or reset (child) afterwards.

use crate::lifecycle;
use std::sync::Once;

static ATFORK_ONCE: Once = Once::new();

extern "C" fn prepare() {
    lifecycle::fork_prepare();
}

extern "C" fn parent() {
    lifecycle::fork_parent();
}

extern "C" fn child() {
    lifecycle::fork_child();
}

/// Register the fork hooks with the platform. Called from `init`; the
/// registration itself happens once per process.
pub(crate) fn install_once() {
    ATFORK_ONCE.call_once(|| {
        // pthread_atfork cannot be unregistered, hence the Once.
        let rc = unsafe { libc::pthread_atfork(Some(prepare), Some(parent), Some(child)) };
        if rc != 0 {
            eprintln!("[W] pthread_atfork failed (rc={rc}); fork() will not be safe");
        }
    });
}
