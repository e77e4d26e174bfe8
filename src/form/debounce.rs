use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use futures::executor::ThreadPool;
use futures::future::{AbortHandle, abortable};
use futures::task::{SpawnError, SpawnExt};
use futures_timer::Delay;
use tracing::warn;

use super::controller::{FormError, FormResult};

/// Cooperative queue that runs debounced calls once their delay elapses.
///
/// Backed by a single worker thread, so fired calls never run in parallel
/// with each other.
#[derive(Clone)]
pub struct TimerQueue {
    pool: ThreadPool,
}

impl TimerQueue {
    pub fn new() -> FormResult<Self> {
        let pool = ThreadPool::builder()
            .pool_size(1)
            .name_prefix("calmform-timer-")
            .create()
            .map_err(|error| FormError::TimerQueue(error.to_string()))?;
        Ok(Self { pool })
    }

    /// Process-wide queue shared by forms that were not given their own.
    pub fn shared() -> FormResult<Self> {
        static SHARED: OnceLock<TimerQueue> = OnceLock::new();
        if let Some(queue) = SHARED.get() {
            return Ok(queue.clone());
        }
        let queue = Self::new()?;
        Ok(SHARED.get_or_init(|| queue).clone())
    }

    fn schedule(
        &self,
        wait: Duration,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<AbortHandle, SpawnError> {
        let (delay, handle) = abortable(Delay::new(wait));
        self.pool.spawn(async move {
            if delay.await.is_ok() {
                task();
            }
        })?;
        Ok(handle)
    }
}

impl Debug for TimerQueue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerQueue").finish_non_exhaustive()
    }
}

struct PendingCall<A> {
    ticket: u64,
    args: A,
    abort: AbortHandle,
}

struct DebounceSlot<A> {
    next_ticket: u64,
    pending: Option<PendingCall<A>>,
}

/// A function wrapped so that calls within `wait` of each other collapse
/// into one trailing call carrying the latest arguments.
pub struct Debounced<A: Send + 'static> {
    f: Arc<dyn Fn(A) + Send + Sync>,
    wait: Duration,
    queue: TimerQueue,
    slot: Arc<Mutex<DebounceSlot<A>>>,
}

impl<A: Send + 'static> Clone for Debounced<A> {
    fn clone(&self) -> Self {
        Self {
            f: self.f.clone(),
            wait: self.wait,
            queue: self.queue.clone(),
            slot: self.slot.clone(),
        }
    }
}

pub fn debounce<A, F>(f: F, wait: Duration, queue: &TimerQueue) -> Debounced<A>
where
    A: Send + 'static,
    F: Fn(A) + Send + Sync + 'static,
{
    Debounced {
        f: Arc::new(f),
        wait,
        queue: queue.clone(),
        slot: Arc::new(Mutex::new(DebounceSlot {
            next_ticket: 0,
            pending: None,
        })),
    }
}

impl<A: Send + 'static> Debounced<A> {
    pub fn wait(&self) -> Duration {
        self.wait
    }

    /// Zero wait runs `f` immediately on the calling thread.
    pub fn call(&self, args: A) {
        if self.wait.is_zero() {
            (self.f)(args);
            return;
        }

        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.pending.take() {
            previous.abort.abort();
        }
        slot.next_ticket += 1;
        let ticket = slot.next_ticket;

        let f = self.f.clone();
        let fired_slot = self.slot.clone();
        let scheduled = self.queue.schedule(self.wait, move || {
            let args = {
                let mut slot = fired_slot.lock().unwrap_or_else(PoisonError::into_inner);
                match slot.pending.take() {
                    Some(pending) if pending.ticket == ticket => pending.args,
                    other => {
                        slot.pending = other;
                        return;
                    }
                }
            };
            f(args);
        });
        let rejected = settle(&mut slot, ticket, args, scheduled);
        drop(slot);
        if let Some(args) = rejected {
            (self.f)(args);
        }
    }

    pub fn cancel(&self) {
        let pending = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .take();
        if let Some(pending) = pending {
            pending.abort.abort();
        }
    }

    /// Runs the pending call now, if there is one.
    pub fn flush(&self) {
        let pending = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .take();
        if let Some(pending) = pending {
            pending.abort.abort();
            (self.f)(pending.args);
        }
    }

    pub fn is_pending(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .is_some()
    }
}

/// Records a scheduled call as pending. When the queue refused the timer the
/// slot stays empty and the arguments come back to run immediately.
fn settle<A>(
    slot: &mut DebounceSlot<A>,
    ticket: u64,
    args: A,
    scheduled: Result<AbortHandle, SpawnError>,
) -> Option<A> {
    match scheduled {
        Ok(abort) => {
            slot.pending = Some(PendingCall {
                ticket,
                args,
                abort,
            });
            None
        }
        Err(error) => {
            warn!(%error, "timer queue rejected debounced call; running it now");
            Some(args)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn counting(queue: &TimerQueue, wait_ms: u64) -> (Debounced<usize>, Arc<Mutex<Vec<usize>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let debounced = debounce(
            move |value: usize| sink.lock().expect("lock calls").push(value),
            Duration::from_millis(wait_ms),
            queue,
        );
        (debounced, calls)
    }

    #[test]
    fn collapses_rapid_calls_into_one_trailing_call() {
        let queue = TimerQueue::new().expect("timer queue");
        let (debounced, calls) = counting(&queue, 20);

        debounced.call(1);
        debounced.call(2);
        debounced.call(3);
        assert!(calls.lock().expect("lock calls").is_empty());

        thread::sleep(Duration::from_millis(150));
        debounced.call(4);
        debounced.call(5);
        debounced.call(6);
        assert_eq!(*calls.lock().expect("lock calls"), vec![3]);

        thread::sleep(Duration::from_millis(150));
        assert_eq!(*calls.lock().expect("lock calls"), vec![3, 6]);
    }

    #[test]
    fn zero_wait_runs_synchronously_every_time() {
        let queue = TimerQueue::new().expect("timer queue");
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let debounced = debounce(
            move |_: ()| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            Duration::ZERO,
            &queue,
        );
        debounced.call(());
        debounced.call(());
        debounced.call(());
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(!debounced.is_pending());
    }

    #[test]
    fn cancel_discards_pending_call() {
        let queue = TimerQueue::new().expect("timer queue");
        let (debounced, calls) = counting(&queue, 20);

        debounced.call(1);
        debounced.call(2);
        assert!(debounced.is_pending());
        debounced.cancel();
        assert!(!debounced.is_pending());

        thread::sleep(Duration::from_millis(120));
        assert!(calls.lock().expect("lock calls").is_empty());
    }

    #[test]
    fn flush_runs_pending_call_immediately_once() {
        let queue = TimerQueue::new().expect("timer queue");
        let (debounced, calls) = counting(&queue, 50);

        debounced.call(7);
        debounced.flush();
        assert_eq!(*calls.lock().expect("lock calls"), vec![7]);

        thread::sleep(Duration::from_millis(150));
        assert_eq!(*calls.lock().expect("lock calls"), vec![7]);

        debounced.flush();
        assert_eq!(*calls.lock().expect("lock calls"), vec![7]);
    }

    #[test]
    fn shared_queue_is_reused() {
        let first = TimerQueue::shared().expect("shared queue");
        let (debounced, calls) = counting(&first, 10);
        debounced.call(1);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(*calls.lock().expect("lock calls"), vec![1]);
        let _second = TimerQueue::shared().expect("shared queue again");
    }

    #[test]
    fn rejected_timer_leaves_nothing_pending() {
        let mut slot = DebounceSlot {
            next_ticket: 1,
            pending: None,
        };
        let rejected = settle(&mut slot, 1, 9_usize, Err(SpawnError::shutdown()));
        assert_eq!(rejected, Some(9));
        assert!(slot.pending.is_none());

        let (abort, _) = AbortHandle::new_pair();
        assert_eq!(settle(&mut slot, 2, 10_usize, Ok(abort)), None);
        assert_eq!(slot.pending.as_ref().map(|pending| pending.ticket), Some(2));
    }
}
