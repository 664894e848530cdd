//! Lifecycle shared by every operator.
//!
//! An operator's work body runs at most once. Whatever way it ends (normal
//! return, reported error, caught panic, cancellation, or the future being
//! dropped) the completion sequence runs exactly once and in order:
//! 1. close the output stream
//! 2. notify registered listeners
//! 3. raise the operator's stop signal so its helper tasks wind down

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use parking_lot::Mutex;

use super::context::Context;
use super::signal::{Signal, Stopper};
use super::stream::{item_channel, ItemReceiver, ItemSender};
use crate::config::DEFAULT_PIPELINE_CAP;
use crate::plan::PlanNode;
use crate::value::AnnotatedValue;

/// Receives a callback when an operator it registered with has finished.
pub trait Listener: Send + Sync {
    fn child_stopped(&self, child: &str);
}

#[derive(Default)]
struct Listeners {
    notified: bool,
    pending: Vec<Arc<dyn Listener>>,
}

pub struct OperatorBase {
    capacity: usize,
    output: Mutex<Option<ItemSender>>,
    receiver: Mutex<Option<ItemReceiver>>,
    closed: AtomicBool,
    stop: Signal,
    done: Signal,
    once: AtomicBool,
    listeners: Mutex<Listeners>,
    chan_time: AtomicU64,
}

impl OperatorBase {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_PIPELINE_CAP)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = item_channel(capacity);
        Self {
            capacity,
            output: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
            closed: AtomicBool::new(false),
            stop: Signal::new(),
            done: Signal::new(),
            once: AtomicBool::new(false),
            listeners: Mutex::new(Listeners::default()),
            chan_time: AtomicU64::new(0),
        }
    }

    /// A fresh, not-yet-run base with the same stream capacity.
    pub fn copy(&self) -> Self {
        Self::with_capacity(self.capacity)
    }

    /// Hands the consumer side of the output stream to the one consumer.
    pub fn take_output(&self) -> Option<ItemReceiver> {
        self.receiver.lock().take()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        self.done.is_raised()
    }

    /// Waits for the work body and the completion sequence to finish.
    pub async fn wait_done(&self) {
        self.done.raised().await
    }

    /// Stops this operator. Idempotent.
    pub fn stop(&self) {
        self.stop.raise();
    }

    pub fn stopper(&self, ctx: &Context) -> Stopper {
        Stopper::new(self.stop.clone(), ctx.stop_signal())
    }

    pub fn is_stopped(&self, ctx: &Context) -> bool {
        self.stop.is_raised() || ctx.is_stopped()
    }

    /// Completes when either this operator or the query is stopped.
    pub async fn stopped(&self, ctx: &Context) {
        self.stopper(ctx).stopped().await
    }

    /// Registers `listener` for this operator's completion. If the operator
    /// has already finished the listener is called right away.
    pub fn add_listener(&self, listener: Arc<dyn Listener>, name: &str) {
        {
            let mut listeners = self.listeners.lock();
            if !listeners.notified {
                listeners.pending.push(listener);
                return;
            }
        }
        listener.child_stopped(name);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().pending.len()
    }

    /// Time spent blocked on the downstream consumer.
    pub fn chan_time(&self) -> Duration {
        Duration::from_nanos(self.chan_time.load(Ordering::Relaxed))
    }

    /// Sends one item downstream, racing the send against stop. Returns false
    /// if the item was not delivered (stopped, closed, or consumer gone).
    pub async fn send_item(&self, ctx: &Context, item: AnnotatedValue) -> bool {
        if self.is_stopped(ctx) {
            return false;
        }
        let sender = match self.output.lock().clone() {
            Some(s) => s,
            None => return false,
        };
        let start = Instant::now();
        let sent = tokio::select! {
            biased;
            _ = self.stopped(ctx) => false,
            ok = sender.send(item) => ok,
        };
        let blocked = u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.chan_time.fetch_add(blocked, Ordering::Relaxed);
        sent
    }

    /// Starts timing a work body against `plan`. The busy time (elapsed minus
    /// time blocked downstream) is recorded once, when the timer drops.
    pub fn time_phase<'a>(&'a self, ctx: &'a Context, plan: &'a PlanNode) -> PhaseTimer<'a> {
        PhaseTimer {
            base: self,
            ctx,
            plan,
            start: Instant::now(),
        }
    }

    /// Runs `body` as this operator's work, at most once.
    ///
    /// A second caller does not run `body`; it waits for the first run's
    /// completion sequence instead. Panics inside `body` are caught and
    /// recorded on `ctx`.
    pub async fn run_once<F>(&self, ctx: &Context, name: &'static str, body: F)
    where
        F: Future<Output = ()> + Send,
    {
        if self
            .once
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.done.raised().await;
            return;
        }

        let _completion = Completion { base: self, name };
        ctx.add_phase_operator(name);
        tracing::debug!("{}: started (request {})", name, ctx.request_id());

        if let Err(payload) = AssertUnwindSafe(body).catch_unwind().await {
            ctx.recover(name, payload);
        }
    }

    fn close(&self) {
        if self.output.lock().take().is_some() {
            self.closed.store(true, Ordering::Release);
        }
    }

    fn notify(&self, name: &str) {
        let pending = {
            let mut listeners = self.listeners.lock();
            listeners.notified = true;
            std::mem::take(&mut listeners.pending)
        };
        for listener in pending {
            listener.child_stopped(name);
        }
    }

    fn complete(&self, name: &str) {
        self.close();
        self.notify(name);
        self.stop.raise();
        tracing::debug!("{}: finished", name);
        self.done.raise();
    }
}

impl Default for OperatorBase {
    fn default() -> Self {
        Self::new()
    }
}

struct Completion<'a> {
    base: &'a OperatorBase,
    name: &'static str,
}

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        self.base.complete(self.name);
    }
}

pub struct PhaseTimer<'a> {
    base: &'a OperatorBase,
    ctx: &'a Context,
    plan: &'a PlanNode,
    start: Instant,
}

impl Drop for PhaseTimer<'_> {
    fn drop(&mut self) {
        let busy = self.start.elapsed().saturating_sub(self.base.chan_time());
        self.ctx.add_phase_time(self.plan.name(), busy);
        self.plan.add_time(busy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl Listener for Counting {
        fn child_stopped(&self, _child: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_body_runs_once() {
        let base = OperatorBase::with_capacity(4);
        let ctx = Context::new();
        let runs = AtomicUsize::new(0);

        for _ in 0..3 {
            base.run_once(&ctx, "Test", async {
                runs.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(base.is_closed());
        assert!(base.is_done());
        assert_eq!(ctx.phase_operators("Test"), 1);
    }

    #[tokio::test]
    async fn test_listener_after_completion_is_called() {
        let base = OperatorBase::new();
        let ctx = Context::new();
        let early = Arc::new(Counting::default());
        base.add_listener(early.clone(), "Test");
        assert_eq!(base.listener_count(), 1);

        base.run_once(&ctx, "Test", async {}).await;
        assert_eq!(early.0.load(Ordering::SeqCst), 1);
        assert_eq!(base.listener_count(), 0);

        let late = Arc::new(Counting::default());
        base.add_listener(late.clone(), "Test");
        assert_eq!(late.0.load(Ordering::SeqCst), 1);
        assert_eq!(early.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_send_after_close_is_rejected() {
        let base = OperatorBase::new();
        let ctx = Context::new();
        let mut rx = base.take_output().unwrap();
        assert!(base.take_output().is_none());

        base.run_once(&ctx, "Test", async {
            assert!(base.send_item(&ctx, AnnotatedValue::new(1)).await);
        })
        .await;
        assert!(!base.send_item(&ctx, AnnotatedValue::new(2)).await);

        assert_eq!(rx.recv().await, Some(AnnotatedValue::new(1)));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let base = OperatorBase::new();
        let ctx = Context::new();
        let listener = Arc::new(Counting::default());
        base.add_listener(listener.clone(), "Test");

        base.run_once(&ctx, "Test", async {
            let divisor = ctx.error_count();
            let _ = 10 / divisor;
        })
        .await;

        assert_eq!(ctx.error_count(), 1);
        assert!(base.is_closed());
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_send_blocked_until_stop() {
        let base = OperatorBase::with_capacity(1);
        let ctx = Context::new();
        let _rx = base.take_output().unwrap();

        assert!(base.send_item(&ctx, AnnotatedValue::new(1)).await);
        let stop = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            base.stop();
        };
        let (sent, _) = tokio::join!(base.send_item(&ctx, AnnotatedValue::new(2)), stop);
        assert!(!sent);
        assert!(base.chan_time() >= Duration::from_millis(15));
    }
}
