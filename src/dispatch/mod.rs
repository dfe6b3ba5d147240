//! Request correlation for broker adapters.
//!
//! An adapter talking to a remote broker tags every outbound request with an id and receives
//! inbound events tagged with the same id. [Dispatcher] keeps a table from id to the party
//! waiting on it: a one-shot future for request/response exchanges, or a channel for streaming
//! subscriptions such as market data. Inbound events are routed straight to that party.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};

use crate::error::{Result, SimError};

pub type RequestId = u64;

enum Waiter<T> {
    Once(oneshot::Sender<Result<T>>),
    Stream(mpsc::UnboundedSender<T>),
}

pub struct Dispatcher<T> {
    waiters: Mutex<HashMap<RequestId, Waiter<T>>>,
    next_id: AtomicU64,
}

impl<T: Send + 'static> Default for Dispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Dispatcher<T> {
    pub fn new() -> Self {
        Self {
            waiters: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Registers a request that expects exactly one response.
    pub fn request(&self) -> (RequestId, oneshot::Receiver<Result<T>>) {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().unwrap().insert(id, Waiter::Once(tx));
        (id, rx)
    }

    /// Registers a subscription that receives every event for its id until cancelled.
    pub fn subscribe(&self) -> (RequestId, mpsc::UnboundedReceiver<T>) {
        let id = self.next_id();
        let (tx, rx) = mpsc::unbounded_channel();
        self.waiters.lock().unwrap().insert(id, Waiter::Stream(tx));
        (id, rx)
    }

    /// Routes an inbound event. Returns false if nobody is waiting on `id`.
    pub fn resolve(&self, id: RequestId, value: T) -> bool {
        let mut waiters = self.waiters.lock().unwrap();
        match waiters.remove(&id) {
            Some(Waiter::Once(tx)) => {
                //The requester may have given up, that is not an error here
                let _ = tx.send(Ok(value));
                true
            }
            Some(Waiter::Stream(tx)) => {
                if tx.send(value).is_ok() {
                    waiters.insert(id, Waiter::Stream(tx));
                } else {
                    debug!("DISPATCH: Subscription {} closed by receiver", id);
                }
                true
            }
            None => {
                debug!("DISPATCH: No waiter for {}", id);
                false
            }
        }
    }

    /// Fails a request, or ends a subscription. Subscribers see their channel close.
    pub fn fail(&self, id: RequestId, error: SimError) -> bool {
        match self.waiters.lock().unwrap().remove(&id) {
            Some(Waiter::Once(tx)) => {
                let _ = tx.send(Err(error));
                true
            }
            Some(Waiter::Stream(_)) => {
                warn!("DISPATCH: Subscription {} failed: {}", id, error);
                true
            }
            None => false,
        }
    }

    /// Fails everything outstanding, used when the connection behind the adapter drops.
    pub fn fail_all(&self, error: SimError) {
        let drained: Vec<(RequestId, Waiter<T>)> = self.waiters.lock().unwrap().drain().collect();
        for (id, waiter) in drained {
            match waiter {
                Waiter::Once(tx) => {
                    let _ = tx.send(Err(error.clone()));
                }
                Waiter::Stream(_) => warn!("DISPATCH: Subscription {} failed: {}", id, error),
            }
        }
    }

    pub fn cancel(&self, id: RequestId) -> bool {
        self.waiters.lock().unwrap().remove(&id).is_some()
    }

    pub fn outstanding(&self) -> usize {
        self.waiters.lock().unwrap().len()
    }
}

/// Waits for a response, a timeout or a dropped request both surface as
/// [SimError::DataUnavailable].
pub async fn await_response<T>(rx: oneshot::Receiver<Result<T>>, timeout: Duration) -> Result<T> {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(res)) => res,
        Ok(Err(_)) => Err(SimError::data_unavailable("request dropped before a response")),
        Err(_) => Err(SimError::data_unavailable(format!(
            "no response within {:?}",
            timeout
        ))),
    }
}
