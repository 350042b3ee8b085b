//! Process-wide credential envelope for peer operations.
//!
//! Dolt's remote credentials are read from environment variables by the
//! MySQL-wire-protocol client, which makes them process-global state. Any
//! two peer operations running concurrently in the same process would
//! stomp on each other's credentials, so every credential-bearing operation
//! must run inside this envelope: a single process-wide mutex serializes
//! entry, the env vars are set, the operation runs, and the vars are
//! cleared again -- even if the operation panics.

use std::sync::Mutex;

use tracing::{debug, warn};

/// Guards the set-run-clear critical section across the whole process.
static CREDENTIAL_LOCK: Mutex<()> = Mutex::new(());

const USER_VAR: &str = "BEADS_DOLT_REMOTE_USER";
const PASS_VAR: &str = "BEADS_DOLT_REMOTE_PASSWORD";

/// RAII guard that clears the credential env vars on drop, including on
/// unwind from a panic inside the critical section.
struct EnvGuard;

impl Drop for EnvGuard {
    fn drop(&mut self) {
        // SAFETY: see `with_credentials` -- the process-wide mutex we hold
        // for the guard's whole lifetime serializes all access to these vars.
        unsafe {
            std::env::remove_var(USER_VAR);
            std::env::remove_var(PASS_VAR);
        }
        debug!("federation credential envelope cleared");
    }
}

/// Runs `f` with `BEADS_DOLT_REMOTE_USER`/`BEADS_DOLT_REMOTE_PASSWORD` set
/// in the environment, holding the process-wide credential mutex for the
/// duration. The vars are cleared before returning, including when `f`
/// panics.
///
/// # Safety
///
/// Mutating process environment variables is inherently racy with any code
/// elsewhere in the process that reads or writes the environment outside
/// this envelope. Every federation code path that needs Dolt remote
/// credentials MUST go through this function rather than setting the vars
/// directly.
pub fn with_credentials<T>(peer: &str, username: &str, password: &str, f: impl FnOnce() -> T) -> T {
    let guard = CREDENTIAL_LOCK.lock().unwrap_or_else(|poisoned| {
        warn!(peer, "credential envelope mutex was poisoned, recovering");
        poisoned.into_inner()
    });

    debug!(peer, "federation credential envelope entered");
    // SAFETY: `guard` holds the process-wide mutex for the duration of this
    // scope, so no other thread can observe or mutate these vars concurrently.
    unsafe {
        std::env::set_var(USER_VAR, username);
        std::env::set_var(PASS_VAR, password);
    }

    let _clear_on_exit = EnvGuard;
    let result = f();
    drop(guard);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn sets_and_clears_vars() {
        with_credentials("origin", "alice", "hunter2", || {
            assert_eq!(std::env::var(USER_VAR).unwrap(), "alice");
            assert_eq!(std::env::var(PASS_VAR).unwrap(), "hunter2");
        });
        assert!(std::env::var(USER_VAR).is_err());
        assert!(std::env::var(PASS_VAR).is_err());
    }

    #[test]
    fn clears_vars_on_panic() {
        let result = std::panic::catch_unwind(|| {
            with_credentials("origin", "alice", "hunter2", || {
                panic!("boom");
            });
        });
        assert!(result.is_err());
        assert!(std::env::var(USER_VAR).is_err());
        assert!(std::env::var(PASS_VAR).is_err());
    }

    #[test]
    fn serializes_concurrent_entries() {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for i in 0..4 {
                scope.spawn(move || {
                    with_credentials(&format!("peer-{i}"), "u", "p", || {
                        let before = COUNTER.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(before, 0, "no other thread should be inside the envelope");
                        std::thread::sleep(std::time::Duration::from_millis(5));
                        COUNTER.fetch_sub(1, Ordering::SeqCst);
                    });
                });
            }
        });
    }
}
