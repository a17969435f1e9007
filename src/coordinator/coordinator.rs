// ABOUTME: Keyed request coordinator with de-duplication and a FIFO overflow queue.
// ABOUTME: Caps concurrent operations and shares in-flight outcomes across callers.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, broadcast, oneshot};
use tracing::{debug, warn};

use crate::error::SubmitError;

/// Default concurrency ceiling.
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Outcome shared between every caller attached to one in-flight key.
type Outcome<T> = Result<T, Arc<anyhow::Error>>;

/// A deferred unit of work, boxed so it can sit in the queue.
type BoxOperation<T> = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<T>> + Send>;

/// A request deferred because the concurrency ceiling was reached.
struct QueuedRequest<T> {
    key: String,
    operation: BoxOperation<T>,
    slot: oneshot::Sender<Outcome<T>>,
}

/// Mutable coordinator state, protected by a single mutex.
struct State<T> {
    pending: HashMap<String, broadcast::Sender<Outcome<T>>>,
    queue: VecDeque<QueuedRequest<T>>,
    active: usize,
}

/// How a `submit` call observes its outcome.
enum Waiter<T> {
    /// Attached to an in-flight entry (either freshly admitted or joined).
    Attached(broadcast::Receiver<Outcome<T>>),
    /// Parked in the FIFO queue until a slot frees up.
    Queued(oneshot::Receiver<Outcome<T>>),
}

/// Coordinator for keyed asynchronous requests.
///
/// Guarantees two things for a stream of named operations:
///
/// - **De-duplication:** at most one operation runs per logical key. Callers
///   submitting a key that is already in flight attach to the existing
///   request and observe the same outcome, success or failure alike.
/// - **Concurrency ceiling:** no more than `max_concurrent` operations run
///   at once across all keys. Excess submissions wait in a FIFO queue and
///   are admitted strictly in the order they were deferred.
///
/// The coordinator performs no I/O of its own; it only invokes the
/// caller-supplied operations. Once admitted, an operation runs to
/// settlement — there is no cancellation. Callers needing a timeout should
/// build it into the operation itself and treat it as a normal failure.
pub struct RequestCoordinator<T> {
    state: Arc<Mutex<State<T>>>,
    max_concurrent: usize,
}

impl<T> Default for RequestCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

impl<T> RequestCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a coordinator with the given concurrency ceiling.
    ///
    /// # Arguments
    ///
    /// * `max_concurrent` - Maximum number of operations running at once.
    ///
    /// # Panics
    ///
    /// Panics if `max_concurrent` is zero.
    pub fn new(max_concurrent: usize) -> Self {
        assert!(max_concurrent > 0, "max_concurrent must be positive");

        Self {
            state: Arc::new(Mutex::new(State {
                pending: HashMap::new(),
                queue: VecDeque::new(),
                active: 0,
            })),
            max_concurrent,
        }
    }

    /// The configured concurrency ceiling.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Submit a keyed operation and wait for its outcome.
    ///
    /// If `key` is already in flight, the operation is dropped unused and
    /// this call resolves with the in-flight request's outcome. If a slot is
    /// free, the operation runs immediately. Otherwise the request joins the
    /// FIFO queue and runs once earlier requests settle.
    ///
    /// # Arguments
    ///
    /// * `key` - Logical request identity, e.g. derived from endpoint plus
    ///   parameters. Callers choosing colliding keys for distinct requests
    ///   will share outcomes between them.
    /// * `operation` - The unit of work to run, at most once per in-flight
    ///   key.
    pub async fn submit<F, Fut>(&self, key: &str, operation: F) -> Result<T, SubmitError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let operation: BoxOperation<T> = Box::new(move || operation().boxed());

        let waiter = {
            let mut state = self.state.lock().await;

            if let Some(inflight) = state.pending.get(key) {
                debug!(key, "attaching to in-flight request");
                Waiter::Attached(inflight.subscribe())
            } else if state.active < self.max_concurrent {
                let rx = admit(
                    &mut state,
                    &self.state,
                    self.max_concurrent,
                    key.to_string(),
                    operation,
                );
                Waiter::Attached(rx)
            } else {
                debug!(key, depth = state.queue.len() + 1, "ceiling reached, queueing");
                let (tx, rx) = oneshot::channel();
                state.queue.push_back(QueuedRequest {
                    key: key.to_string(),
                    operation,
                    slot: tx,
                });
                Waiter::Queued(rx)
            }
        };

        let outcome = match waiter {
            Waiter::Attached(mut rx) => rx.recv().await.map_err(|_| SubmitError::Abandoned)?,
            Waiter::Queued(rx) => rx.await.map_err(|_| SubmitError::Abandoned)?,
        };

        outcome.map_err(SubmitError::Operation)
    }
}

/// Register `key` as pending, consume a slot, and drive the operation to
/// settlement on a background task.
///
/// Must be called with the state lock held. The returned receiver observes
/// the outcome.
fn admit<T>(
    state: &mut State<T>,
    shared: &Arc<Mutex<State<T>>>,
    max_concurrent: usize,
    key: String,
    operation: BoxOperation<T>,
) -> broadcast::Receiver<Outcome<T>>
where
    T: Clone + Send + Sync + 'static,
{
    let (tx, rx) = broadcast::channel(1);
    state.pending.insert(key.clone(), tx.clone());
    state.active += 1;
    debug!(key = %key, active = state.active, "request admitted");

    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        // Contain panics so a panicking operation settles like a failing
        // one and cannot leak its slot.
        let outcome = match AssertUnwindSafe(operation()).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => {
                warn!(key = %key, %error, "operation failed");
                Err(Arc::new(error))
            }
            Err(_) => {
                warn!(key = %key, "operation panicked");
                Err(Arc::new(anyhow::anyhow!(
                    "operation for key '{key}' panicked"
                )))
            }
        };

        let mut state = shared.lock().await;
        state.pending.remove(&key);
        state.active -= 1;
        // Send after removal: everyone holding a receiver subscribed while
        // the entry was pending, and no one can attach to a settled entry.
        let _ = tx.send(outcome);
        drain_queue(&mut state, &shared, max_concurrent);
    });

    rx
}

/// Admit queued requests while slots are free, in FIFO order.
///
/// Must be called with the state lock held. A dequeued request whose key
/// went pending in the meantime attaches to that entry instead of running
/// its own operation, and consumes no slot.
fn drain_queue<T>(state: &mut State<T>, shared: &Arc<Mutex<State<T>>>, max_concurrent: usize)
where
    T: Clone + Send + Sync + 'static,
{
    while state.active < max_concurrent {
        let Some(request) = state.queue.pop_front() else {
            break;
        };

        if let Some(inflight) = state.pending.get(&request.key) {
            debug!(key = %request.key, "dequeued request joining in-flight entry");
            forward(inflight.subscribe(), request.slot);
        } else {
            let rx = admit(state, shared, max_concurrent, request.key, request.operation);
            forward(rx, request.slot);
        }
    }
}

/// Bridge a broadcast subscription to a queued caller's completion slot.
fn forward<T>(mut rx: broadcast::Receiver<Outcome<T>>, slot: oneshot::Sender<Outcome<T>>)
where
    T: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        if let Ok(outcome) = rx.recv().await {
            let _ = slot.send(outcome);
        }
        // A closed channel drops the slot, which surfaces as Abandoned.
    });
}
