use crate::control::inputs::Input;
use crate::dispatch::Dispatcher;
use crossbeam::channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::ops::ControlFlow;
use std::time::Duration;

/// Outcome of a single injection drain cycle.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy)]
pub(crate) enum ControllerResult {
    /// No inputs were available.
    Empty,
    /// At least one event moved into a scheduler.
    Processed,
    /// A shutdown request was received.
    Shutdown,
    /// Every sender is gone.
    Disconnected,
}

/// Moves injected inputs from the engine's channel into the schedulers.
pub(crate) struct Controller {
    input_rx: Receiver<Input>,
}

impl Controller {
    pub(crate) fn new(input_rx: Receiver<Input>) -> Self {
        Self { input_rx }
    }

    /// Drains up to `max` inputs without blocking.
    #[inline(always)]
    pub(crate) fn drain_inputs(&mut self, max: usize, dispatcher: &mut Dispatcher) -> ControllerResult {
        let mut processed = false;
        for _ in 0..max {
            match self.input_rx.try_recv() {
                Ok(input) => {
                    if let ControlFlow::Break(r) = Self::handle(input, dispatcher) {
                        return r;
                    }
                    processed = true;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return ControllerResult::Disconnected,
            }
        }

        if processed {
            ControllerResult::Processed
        } else {
            ControllerResult::Empty
        }
    }

    /// Blocks for at most `timeout` waiting for one input.
    pub(crate) fn park(&mut self, timeout: Duration, dispatcher: &mut Dispatcher) -> ControllerResult {
        match self.input_rx.recv_timeout(timeout) {
            Ok(input) => match Self::handle(input, dispatcher) {
                ControlFlow::Continue(()) => ControllerResult::Processed,
                ControlFlow::Break(r) => r,
            },
            Err(RecvTimeoutError::Timeout) => ControllerResult::Empty,
            Err(RecvTimeoutError::Disconnected) => ControllerResult::Disconnected,
        }
    }

    #[inline(always)]
    fn handle(input: Input, dispatcher: &mut Dispatcher) -> ControlFlow<ControllerResult> {
        match input {
            Input::Event(event) => {
                dispatcher.enqueue_injected(event);
                ControlFlow::Continue(())
            }
            Input::Shutdown => {
                tracing::info!("[Engine] shutdown signal received");
                ControlFlow::Break(ControllerResult::Shutdown)
            }
        }
    }
}
