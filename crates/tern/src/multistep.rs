//
// multistep.rs
//
// Cooperative, cancellable work split into steps
//

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::host::{ServerHost, TimerId};

/// What a step asks for when it yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep<S> {
    /// Run `S` as soon as pending input has been handled.
    Immediate(S),
    /// Run `S` after the delay.
    Delay(Duration, S),
    /// The operation is finished.
    Done,
}

#[derive(Debug)]
enum Pending<S> {
    Immediate(S),
    Timer(TimerId, S),
    Running,
}

#[derive(Debug)]
struct Running<S> {
    request_id: u64,
    token: CancellationToken,
    pending: Pending<S>,
}

/// The single current multi-step operation.
///
/// Starting a new operation completes the previous one; its pending step
/// is dropped and never runs. The owner executes steps handed out by
/// [`take_ready`](Self::take_ready) and [`on_timer`](Self::on_timer), and
/// reports each step's outcome through [`advance`](Self::advance).
#[derive(Debug)]
pub struct MultistepOperation<S> {
    current: Option<Running<S>>,
}

impl<S> Default for MultistepOperation<S> {
    fn default() -> Self {
        Self { current: None }
    }
}

impl<S> MultistepOperation<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new operation for `request_id`. Returns the request id of
    /// the operation it superseded, if any.
    pub fn start_new(&mut self, host: &dyn ServerHost, request_id: u64, first: NextStep<S>) -> Option<u64> {
        let superseded = self.complete(host);
        if let Some(previous) = superseded {
            log::trace!("Request {} superseded by {}", previous, request_id);
        }
        self.current = Some(Running {
            request_id,
            token: CancellationToken::new(),
            pending: Pending::Running,
        });
        if let Some(done) = self.advance(host, first) {
            log::trace!("Request {} finished without steps", done);
        }
        superseded
    }

    /// Record the step that follows the one just executed. Returns the
    /// request id when the operation finished.
    pub fn advance(&mut self, host: &dyn ServerHost, next: NextStep<S>) -> Option<u64> {
        let running = self.current.as_mut()?;
        match next {
            NextStep::Immediate(step) => running.pending = Pending::Immediate(step),
            NextStep::Delay(delay, step) => {
                let timer = host.set_timeout(delay);
                running.pending = Pending::Timer(timer, step);
            }
            NextStep::Done => return self.complete(host),
        }
        None
    }

    /// Take the immediate step, if one is waiting.
    pub fn take_ready(&mut self) -> Option<(S, CancellationToken)> {
        let running = self.current.as_mut()?;
        if !matches!(running.pending, Pending::Immediate(_)) {
            return None;
        }
        match std::mem::replace(&mut running.pending, Pending::Running) {
            Pending::Immediate(step) => Some((step, running.token.clone())),
            _ => None,
        }
    }

    /// Take the delayed step whose timer fired.
    pub fn on_timer(&mut self, timer: TimerId) -> Option<(S, CancellationToken)> {
        let running = self.current.as_mut()?;
        if !matches!(running.pending, Pending::Timer(t, _) if t == timer) {
            return None;
        }
        match std::mem::replace(&mut running.pending, Pending::Running) {
            Pending::Timer(_, step) => Some((step, running.token.clone())),
            _ => None,
        }
    }

    pub fn has_immediate(&self) -> bool {
        matches!(
            self.current,
            Some(Running {
                pending: Pending::Immediate(_),
                ..
            })
        )
    }

    pub fn is_running(&self) -> bool {
        self.current.is_some()
    }

    pub fn request_id(&self) -> Option<u64> {
        self.current.as_ref().map(|running| running.request_id)
    }

    /// Signal cancellation to the current operation if it serves
    /// `request_id`. Its next step observes the token and ends it.
    pub fn cancel(&mut self, request_id: u64) -> bool {
        match &self.current {
            Some(running) if running.request_id == request_id => {
                running.token.cancel();
                true
            }
            _ => false,
        }
    }

    /// End the current operation, dropping its pending step. Returns the
    /// request id it served.
    pub fn complete(&mut self, host: &dyn ServerHost) -> Option<u64> {
        let running = self.current.take()?;
        if let Pending::Timer(timer, _) = running.pending {
            host.clear_timeout(timer);
        }
        running.token.cancel();
        Some(running.request_id)
    }
}
