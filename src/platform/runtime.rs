// Process-wide window-system lifetime
//
// Initialized by the first window, terminated when the last guard goes away.
// `init`/`terminate` are idempotent so early-exit paths can call them freely.

use parking_lot::{const_mutex, Mutex};

static RUNTIME: Mutex<Runtime> = const_mutex(Runtime::new());

#[derive(Debug, Default)]
struct Runtime {
    initialized: bool,
    users: usize,
}

impl Runtime {
    const fn new() -> Self {
        Self {
            initialized: false,
            users: 0,
        }
    }

    fn init(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        log::info!("Window system initialized");
    }

    fn terminate(&mut self) {
        if !self.initialized {
            return;
        }
        self.initialized = false;
        log::info!("Window system terminated");
    }

    fn acquire(&mut self) {
        self.init();
        self.users += 1;
    }

    /// Returns true when this was the last user
    fn release(&mut self) -> bool {
        self.users = self.users.saturating_sub(1);
        if self.users == 0 {
            self.terminate();
            true
        } else {
            false
        }
    }
}

pub fn init() {
    RUNTIME.lock().init();
}

pub fn terminate() {
    RUNTIME.lock().terminate();
}

#[cfg(test)]
pub fn is_initialized() -> bool {
    RUNTIME.lock().initialized
}

/// Keeps the window system alive; the last guard dropped terminates it
#[derive(Debug)]
pub struct RuntimeGuard {
    _private: (),
}

impl RuntimeGuard {
    pub fn acquire() -> Self {
        RUNTIME.lock().acquire();
        Self { _private: () }
    }
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        RUNTIME.lock().release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_and_terminate_are_idempotent() {
        let mut runtime = Runtime::new();
        runtime.init();
        runtime.init();
        assert!(runtime.initialized);

        runtime.terminate();
        runtime.terminate();
        assert!(!runtime.initialized);
    }

    #[test]
    fn last_release_terminates() {
        let mut runtime = Runtime::new();
        runtime.acquire();
        runtime.acquire();

        assert!(!runtime.release());
        assert!(runtime.initialized);
        assert!(runtime.release());
        assert!(!runtime.initialized);
    }

    #[test]
    fn release_without_users_does_not_underflow() {
        let mut runtime = Runtime::new();
        assert!(runtime.release());
        assert_eq!(runtime.users, 0);
    }

    #[test]
    fn guard_keeps_global_runtime_alive() {
        let outer = RuntimeGuard::acquire();
        assert!(is_initialized());
        {
            let _inner = RuntimeGuard::acquire();
            assert!(is_initialized());
        }
        assert!(is_initialized());
        drop(outer);
    }
}
