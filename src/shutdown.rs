//! Process-wide shutdown and initialization state.
//!
//! A real deployment flips the shutdown flag from whatever signal handler
//! or lifecycle hook owns process teardown, and flips the initialized flag
//! once node startup (name resolution, graph registration, etc.) has
//! completed. `publish()` consults both: initialization state decides
//! whether a pre-startup publish is a reportable error, shutdown state
//! decides whether a post-close operation is a silent no-op or a
//! reportable error.

use std::sync::atomic::{AtomicBool, Ordering};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);
static INITIALIZED: AtomicBool = AtomicBool::new(true);

pub fn is_shutdown() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

pub fn set_shutdown(flag: bool) {
    SHUTDOWN.store(flag, Ordering::SeqCst);
}

/// Whether the owning process has finished whatever startup it requires
/// before topics may publish. Defaults to `true` so the crate is usable
/// standalone, in tests, and in any host that has no separate init phase;
/// a host with one flips this false until its own startup completes.
pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::SeqCst)
}

pub fn set_initialized(flag: bool) {
    INITIALIZED.store(flag, Ordering::SeqCst);
}
