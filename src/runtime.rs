use crate::config::EngineConfig;
use crate::control::controller::{Controller, ControllerResult};
use crate::control::inputs::Input;
use crate::dispatch::Dispatcher;
use crate::error::EventError;
use crate::event::Event;
use crate::scheduler::SchedulerId;
use crate::timer::TimerManager;
use crate::utils::{CancelToken, HealthFlag, pin_if_requested};
use anyhow::{Context, Result, anyhow};
use crossbeam::channel::{Receiver, Sender, unbounded};
use crossbeam::utils::CachePadded;
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::flag;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

struct EngineShared {
    input_tx: Sender<Input>,
    /// Events submitted and not yet delivered.
    pending: CachePadded<AtomicUsize>,
    dispatch_thread: OnceLock<ThreadId>,
    timers: Arc<TimerManager>,
    next_scheduler: AtomicUsize,
    cancel: CancelToken,
    health: HealthFlag,
    cfg: EngineConfig,
}

/// Shared reference to a running engine, held by channels and handed to
/// handlers through their dispatch context.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<EngineShared>,
}

impl EngineHandle {
    /// True on the engine's dispatch thread, where handlers run.
    #[inline]
    pub fn is_dispatch_thread(&self) -> bool {
        self.shared
            .dispatch_thread
            .get()
            .is_some_and(|id| *id == thread::current().id())
    }

    pub fn is_running(&self) -> bool {
        self.shared.health.get()
    }

    /// True once shutdown was requested or the dispatch loop has ended.
    pub fn is_stopped(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Events submitted to the engine and not yet delivered.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Polls until nothing is pending. Armed timers do not count.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pending() > 0 {
            if Instant::now() >= deadline || self.is_stopped() {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    pub fn timers(&self) -> &TimerManager {
        &self.shared.timers
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.cfg
    }

    /// Stops the dispatch loop. Queued events are dropped.
    pub fn request_shutdown(&self) {
        self.shared.cancel.cancel();
        self.shared.input_tx.send(Input::Shutdown).ok();
    }

    pub fn ptr_eq(&self, other: &EngineHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Hands an initialized event to the dispatch thread.
    pub(crate) fn submit(&self, event: Event) -> Result<(), EventError> {
        if self.is_stopped() {
            return Err(EventError::EngineStopped);
        }
        self.submitted();
        if self.shared.input_tx.send(Input::Event(event)).is_err() {
            self.consumed();
            return Err(EventError::EngineStopped);
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn submitted(&self) {
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn consumed(&self) {
        self.shared.pending.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn next_scheduler(&self) -> SchedulerId {
        SchedulerId(self.shared.next_scheduler.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("running", &self.is_running())
            .field("pending", &self.pending())
            .finish()
    }
}

/// An engine: one dispatch thread running every handler and one timer
/// thread. Dropping it stops both threads.
pub struct Engine {
    handle: EngineHandle,
    dispatch: Option<JoinHandle<Result<()>>>,
    timer: Option<JoinHandle<()>>,
}

impl Engine {
    /// Spawns the timer and dispatch threads.
    pub fn spawn(cfg: EngineConfig) -> Result<Self> {
        let (timers, timer) = TimerManager::spawn(&cfg, Box::new(Event::reinject))?;
        let (input_tx, input_rx) = unbounded();
        let cancel = CancelToken::new_root();
        cancel.on_cancel({
            let timers = timers.clone();
            move || timers.shutdown()
        });

        let handle = EngineHandle {
            shared: Arc::new(EngineShared {
                input_tx,
                pending: CachePadded::new(AtomicUsize::new(0)),
                dispatch_thread: OnceLock::new(),
                timers: timers.clone(),
                next_scheduler: AtomicUsize::new(0),
                cancel,
                health: HealthFlag::new(false),
                cfg,
            }),
        };

        let spawned = thread::Builder::new()
            .name(handle.config().thread_name().to_string())
            .spawn({
                let handle = handle.clone();
                move || dispatch_loop(handle, input_rx)
            })
            .context("failed to spawn dispatch thread");

        let dispatch = match spawned {
            Ok(join) => join,
            Err(e) => {
                timers.shutdown();
                timer.join().ok();
                return Err(e);
            }
        };
        handle
            .shared
            .dispatch_thread
            .set(dispatch.thread().id())
            .ok();

        Ok(Self {
            handle,
            dispatch: Some(dispatch),
            timer: Some(timer),
        })
    }

    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// Blocks until the dispatch loop ends, by shutdown request, termination
    /// signal or handler fault.
    pub fn run_blocking(mut self) -> Result<()> {
        self.join()
    }

    /// Requests shutdown and waits for both threads.
    pub fn shutdown(mut self) -> Result<()> {
        self.handle.request_shutdown();
        self.join()
    }

    fn join(&mut self) -> Result<()> {
        let result = match self.dispatch.take() {
            Some(join) => join
                .join()
                .map_err(|_| anyhow!("dispatch thread panicked"))
                .and_then(|r| r),
            None => Ok(()),
        };
        self.handle.timers().shutdown();
        if let Some(timer) = self.timer.take() {
            timer.join().ok();
        }
        result
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.handle.request_shutdown();
        // Joining from a handler would wait on itself.
        if self.handle.is_dispatch_thread() {
            return;
        }
        if let Err(e) = self.join() {
            tracing::error!("[Engine] stopped with error: {:#}", e);
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine").field("handle", &self.handle).finish()
    }
}

fn dispatch_loop(handle: EngineHandle, input_rx: Receiver<Input>) -> Result<()> {
    let shared = handle.shared.clone();
    shared.dispatch_thread.set(thread::current().id()).ok();

    let term_flag = Arc::new(AtomicBool::new(false));
    if shared.cfg.handle_term_signals {
        for sig in TERM_SIGNALS {
            if let Err(e) = flag::register(*sig, term_flag.clone()) {
                tracing::warn!("[Engine] cannot register signal {}: {}", sig, e);
            }
        }
    }
    pin_if_requested("Engine", shared.cfg.core_id);

    let max_drain = shared.cfg.max_inputs_drain();
    let idle_park = shared.cfg.idle_park();
    let mut controller = Controller::new(input_rx);
    let mut dispatcher = Dispatcher::new(handle);

    shared.health.up();
    tracing::info!("[Engine] dispatch thread started");

    let result = loop {
        if term_flag.load(Ordering::Relaxed) {
            tracing::warn!("[Engine] termination signal received");
            break Ok(());
        }
        if shared.cancel.is_cancelled() {
            break Ok(());
        }

        let drained = match controller.drain_inputs(max_drain, &mut dispatcher) {
            ControllerResult::Empty => false,
            ControllerResult::Processed => true,
            ControllerResult::Shutdown => break Ok(()),
            ControllerResult::Disconnected => {
                tracing::error!("[Engine] injection channel disconnected");
                break Ok(());
            }
        };

        match dispatcher.run_round() {
            Ok(true) => {}
            Ok(false) if drained => {}
            Ok(false) => match controller.park(idle_park, &mut dispatcher) {
                ControllerResult::Shutdown => break Ok(()),
                ControllerResult::Disconnected => {
                    tracing::error!("[Engine] injection channel disconnected");
                    break Ok(());
                }
                ControllerResult::Empty | ControllerResult::Processed => {}
            },
            Err(fault) => break Err(anyhow::Error::new(fault)),
        }
    };

    shared.health.down();
    shared.cancel.cancel();
    shared.timers.shutdown();

    let dropped = dispatcher.queued();
    match &result {
        Ok(()) => tracing::info!(dropped, "[Engine] dispatch thread stopped"),
        Err(e) => tracing::error!(dropped, "[Engine] dispatch thread stopped: {:#}", e),
    }
    result
}
