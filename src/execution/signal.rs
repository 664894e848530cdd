use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// A one-way latch: once raised it stays raised, and every waiter (present
/// or future) observes it.
#[derive(Clone)]
pub struct Signal {
    tx: Arc<watch::Sender<bool>>,
}

impl Signal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raises the signal. Returns true only for the call that raised it.
    pub fn raise(&self) -> bool {
        self.tx.send_if_modified(|raised| {
            if *raised {
                false
            } else {
                *raised = true;
                true
            }
        })
    }

    pub fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }

    /// Completes once the signal is raised.
    pub async fn raised(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|raised| *raised).await;
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("raised", &self.is_raised())
            .finish()
    }
}

/// The pair of signals an operator (or one of its helper tasks) must watch:
/// its own stop and the query-wide stop.
#[derive(Clone, Debug)]
pub struct Stopper {
    operator: Signal,
    query: Signal,
}

impl Stopper {
    pub fn new(operator: Signal, query: Signal) -> Self {
        Self { operator, query }
    }

    pub fn is_stopped(&self) -> bool {
        self.operator.is_raised() || self.query.is_raised()
    }

    pub async fn stopped(&self) {
        tokio::select! {
            _ = self.operator.raised() => {}
            _ = self.query.raised() => {}
        }
    }
}
