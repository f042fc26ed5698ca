use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

type WakeHook = Box<dyn Fn() + Send + Sync>;

struct CancelNode {
    cancelled: AtomicBool,
    /// Run once on cancellation, used to wake threads parked on their own
    /// condition variables.
    on_cancel: Mutex<Vec<WakeHook>>,
}

impl CancelNode {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            on_cancel: Mutex::new(Vec::new()),
        })
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let hooks = std::mem::take(&mut *self.on_cancel.lock());
        for hook in hooks {
            hook();
        }
    }
}

/// Cancellation token shared by the engine threads.
///
/// Wake hooks registered on a token run exactly once, on the thread that
/// cancels it.
#[derive(Clone)]
pub struct CancelToken {
    node: Arc<CancelNode>,
}

impl CancelToken {
    pub fn new_root() -> Self {
        Self {
            node: CancelNode::new(),
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.node.is_cancelled()
    }

    pub fn cancel(&self) {
        self.node.cancel();
    }

    /// Registers `hook` to run when this token is cancelled. Runs it
    /// immediately if the token is already cancelled.
    pub fn on_cancel(&self, hook: impl Fn() + Send + Sync + 'static) {
        let mut hooks = self.node.on_cancel.lock();
        if self.node.cancelled.load(Ordering::Acquire) {
            drop(hooks);
            hook();
            return;
        }
        hooks.push(Box::new(hook));
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("is_cancelled", &self.is_cancelled())
            .finish()
    }
}
