//! Delayed flush trigger.
//!
//! A [`FlushTimer`] owns at most one armed sleeping task. Each arming gets a
//! fresh ticket; the task, once its delay elapses, must claim the ticket with
//! [`FlushTimer::disarm_if`] under the same lock that guards arming before it
//! acts. [`FlushTimer::cancel`] therefore only ever aborts tasks that are still
//! sleeping, never one that has claimed its ticket and started writing.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;

#[derive(Debug)]
struct Armed {
    ticket: u64,
    handle: AbortHandle,
}

#[derive(Debug, Default)]
pub(crate) struct FlushTimer {
    armed: Option<Armed>,
    next_ticket: u64,
}

impl FlushTimer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Spawns `fire(ticket)` to run after `delay`, unless already armed.
    ///
    /// An armed timer is never pushed back: returns `false` and leaves the
    /// existing deadline untouched.
    pub(crate) fn arm<F, Fut>(&mut self, runtime: &Handle, delay: Duration, fire: F) -> bool
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.armed.is_some() {
            return false;
        }
        let ticket = self.next_ticket;
        self.next_ticket = self.next_ticket.wrapping_add(1);
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            fire(ticket).await;
        });
        self.armed = Some(Armed {
            ticket,
            handle: task.abort_handle(),
        });
        true
    }

    /// Aborts the pending task, if any. Returns whether one was armed.
    pub(crate) fn cancel(&mut self) -> bool {
        match self.armed.take() {
            Some(armed) => {
                armed.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Called by a fired task: succeeds only if `ticket` is still the armed
    /// one, in which case the timer becomes idle.
    pub(crate) fn disarm_if(&mut self, ticket: u64) -> bool {
        if self.armed.as_ref().is_some_and(|a| a.ticket == ticket) {
            self.armed = None;
            true
        } else {
            false
        }
    }
}
