//! Recurring and one-shot tasks on a reactor handle
//!
//! A scheduler-level companion to the connection timeouts: spawn a
//! callback with a delay, let the callback decide whether to run again,
//! and keep a [`TimerTask`](struct.TimerTask.html) handle that can
//! cancel the job or re-arm its next firing without waiting out the
//! current period. The session-expiry sweep of the `sessions` demo is
//! the typical user.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::task::{self, Task};
use futures::{Async, Future, Poll};
use tokio_core::reactor::{Handle, Timeout};


struct Inner {
    cancelled: bool,
    deadline: Instant,
    period: Duration,
    task: Option<Task>,
}

/// Handle to a task spawned with [`spawn`](fn.spawn.html)
///
/// The handle is independent of the task's lifetime: cancelling or
/// rescheduling a task that already stopped is a no-op. Cloning gives
/// another handle to the same task.
#[derive(Clone)]
pub struct TimerTask {
    inner: Arc<Mutex<Inner>>,
}

impl TimerTask {
    /// Prevent any further invocation of the callback
    pub fn cancel(&self) {
        let mut inner = self.inner.lock()
            .expect("timer state is never poisoned");
        inner.cancelled = true;
        if let Some(task) = inner.task.take() {
            task.notify();
        }
    }

    /// Re-arm the next firing to `delay` from now
    ///
    /// Takes effect immediately; the current period does not have to
    /// elapse first. Subsequent reschedules (by the callback returning
    /// true) use `delay` as the new period.
    pub fn reschedule(&self, delay: Duration) {
        let mut inner = self.inner.lock()
            .expect("timer state is never poisoned");
        inner.deadline = Instant::now() + delay;
        inner.period = delay;
        if let Some(task) = inner.task.take() {
            task.notify();
        }
    }
}

struct TimerFuture<F> {
    inner: Arc<Mutex<Inner>>,
    timeout: Timeout,
    callback: F,
}

impl<F: FnMut() -> bool> Future for TimerFuture<F> {
    type Item = ();
    type Error = ();

    fn poll(&mut self) -> Poll<(), ()> {
        loop {
            let deadline = {
                let mut inner = self.inner.lock()
                    .expect("timer state is never poisoned");
                if inner.cancelled {
                    return Ok(Async::Ready(()));
                }
                inner.task = Some(task::current());
                inner.deadline
            };
            if Instant::now() >= deadline {
                if !(self.callback)() {
                    return Ok(Async::Ready(()));
                }
                let mut inner = self.inner.lock()
                    .expect("timer state is never poisoned");
                if inner.cancelled {
                    return Ok(Async::Ready(()));
                }
                // a reschedule() racing with the callback wins
                if inner.deadline <= Instant::now() {
                    inner.deadline = Instant::now() + inner.period;
                }
                let deadline = inner.deadline;
                drop(inner);
                self.timeout.reset(deadline);
            } else {
                self.timeout.reset(deadline);
                match self.timeout.poll().map_err(|_| ())? {
                    Async::Ready(()) => continue,
                    Async::NotReady => return Ok(Async::NotReady),
                }
            }
        }
    }
}

/// Run `callback` after `delay`, and keep running it at that period
/// for as long as it returns true
///
/// The callback runs on the reactor of `handle`; it must not block.
/// Returns a [`TimerTask`](struct.TimerTask.html) for cancellation and
/// rescheduling.
pub fn spawn<F>(handle: &Handle, delay: Duration, callback: F) -> TimerTask
    where F: FnMut() -> bool + 'static,
{
    let deadline = Instant::now() + delay;
    let inner = Arc::new(Mutex::new(Inner {
        cancelled: false,
        deadline: deadline,
        period: delay,
        task: None,
    }));
    let timeout = Timeout::new_at(deadline, handle)
        .expect("reactor can create timeouts");
    handle.spawn(TimerFuture {
        inner: inner.clone(),
        timeout: timeout,
        callback: callback,
    });
    TimerTask { inner: inner }
}
