use parking_lot::Mutex;
use std::fmt;
use tracing::{debug, warn};

type Hook = Box<dyn FnOnce() + Send>;

/// Callbacks to run once when the process shuts down.
///
/// Owned by whoever assembles the application; hooks run in registration
/// order, and only on the first [`run_all`](Self::run_all).
#[derive(Default)]
pub struct ExitHooks {
    state: Mutex<HookState>,
}

#[derive(Default)]
struct HookState {
    hooks: Vec<Hook>,
    ran: bool,
}

impl ExitHooks {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `hook`.
    ///
    /// Returns `false`, dropping the hook, once the hooks have run.
    pub fn register<F>(&self, hook: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.ran {
            warn!("exit hook registered after shutdown, ignoring it");
            return false;
        }
        state.hooks.push(Box::new(hook));
        true
    }

    /// Returns the number of hooks waiting to run.
    pub fn len(&self) -> usize {
        self.state.lock().hooks.len()
    }

    /// Returns whether no hook is waiting to run.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs every registered hook in order and returns how many ran.
    ///
    /// Later calls run nothing. The lock is not held while hooks run, so a
    /// hook may call back into the registry.
    pub fn run_all(&self) -> usize {
        let hooks = {
            let mut state = self.state.lock();
            if state.ran {
                return 0;
            }
            state.ran = true;
            std::mem::take(&mut state.hooks)
        };

        let count = hooks.len();
        debug!(count, "running exit hooks");
        for hook in hooks {
            hook();
        }
        count
    }

    /// Runs the hooks, then exits the process with `code`.
    pub fn exit(&self, code: i32) -> ! {
        self.run_all();
        std::process::exit(code)
    }
}

impl fmt::Debug for ExitHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ExitHooks")
            .field("pending", &state.hooks.len())
            .field("ran", &state.ran)
            .finish()
    }
}
