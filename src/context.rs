//! Serialising execution contexts.
//!
//! A [`Context`] runs submitted tasks one at a time on a dedicated tokio
//! task, so every handler registered on it observes single-threaded
//! execution. Handler panics are caught per task and routed to the context's
//! exception sink instead of killing the worker.

use core::mem;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

static CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

type Task = Box<dyn FnOnce() + Send + 'static>;
type ExceptionHandler = Arc<dyn Fn(anyhow::Error) + Send + Sync>;

/// Key identifying a close hook, so a hook can be detached again when its
/// registration is removed before the context closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HookKey {
    pub(crate) address: String,
    pub(crate) registration: u64,
}

struct CloseHook {
    key: HookKey,
    run: Box<dyn FnOnce() + Send>,
}

struct ContextInner {
    id: u64,
    /// Taken on close so the worker sees the channel end and exits.
    tasks: Mutex<Option<mpsc::UnboundedSender<Task>>>,
    hooks: Mutex<Vec<CloseHook>>,
    exception_handler: RwLock<Option<ExceptionHandler>>,
    closed: AtomicBool,
}

/// Handle to a serialising execution context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Spawns the context worker on the current tokio runtime.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let inner = Arc::new(ContextInner {
            id: CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            tasks: Mutex::new(Some(tx)),
            hooks: Mutex::new(Vec::new()),
            exception_handler: RwLock::new(None),
            closed: AtomicBool::new(false),
        });

        // The worker holds only a weak handle: once every Context clone is
        // gone the sender drops, recv returns None and the worker exits.
        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
                    report(&weak, panic_to_error(panic));
                }
            }
        });

        Self { inner }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Enqueues a task. Tasks run in submission order, one at a time.
    /// Dropped silently once the context is closed.
    pub fn run(&self, task: impl FnOnce() + Send + 'static) {
        let delivered = match &*self.inner.tasks.lock() {
            Some(tx) => tx.send(Box::new(task)).is_ok(),
            None => false,
        };
        if !delivered {
            debug!("context {}: task dropped, context closed", self.inner.id);
        }
    }

    /// Installs the sink receiving handler panics and receive-path failures.
    pub fn set_exception_handler(&self, handler: impl Fn(anyhow::Error) + Send + Sync + 'static) {
        *self.inner.exception_handler.write() = Some(Arc::new(handler));
    }

    /// Fires remaining close hooks, stops accepting tasks and shuts the
    /// worker down: already-queued tasks drain, then it exits.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let hooks = mem::take(&mut *self.inner.hooks.lock());
        for hook in hooks {
            (hook.run)();
        }
        self.inner.tasks.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub(crate) fn report(&self, err: anyhow::Error) {
        report(&Arc::downgrade(&self.inner), err);
    }

    pub(crate) fn add_close_hook(&self, key: HookKey, run: impl FnOnce() + Send + 'static) {
        self.inner.hooks.lock().push(CloseHook {
            key,
            run: Box::new(run),
        });
    }

    pub(crate) fn remove_close_hook(&self, key: &HookKey) {
        self.inner.hooks.lock().retain(|hook| &hook.key != key);
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Context {}

fn report(inner: &Weak<ContextInner>, err: anyhow::Error) {
    if let Some(inner) = inner.upgrade() {
        let handler = inner.exception_handler.read().clone();
        if let Some(handler) = handler {
            handler(err);
            return;
        }
        error!("unhandled failure on context {}: {:?}", inner.id, err);
        return;
    }
    error!("unhandled failure on dropped context: {:?}", err);
}

fn panic_to_error(panic: Box<dyn core::any::Any + Send>) -> anyhow::Error {
    let msg = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_owned());
    anyhow::anyhow!("handler panicked: {msg}")
}
