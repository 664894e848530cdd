//! Item streams between operators.

use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use super::context::Context;
use crate::value::AnnotatedValue;

/// Create a bounded item stream.
///
/// Backpressure: when the consumer is slow and the buffer fills up,
/// `send(..).await` waits until there is capacity again.
pub fn item_channel(capacity: usize) -> (ItemSender, ItemReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ItemSender { tx }, ItemReceiver { rx })
}

/// Producer side of an item stream. The stream ends when every sender is
/// dropped.
#[derive(Clone, Debug)]
pub struct ItemSender {
    tx: mpsc::Sender<AnnotatedValue>,
}

impl ItemSender {
    /// Returns false if the consumer is gone.
    pub async fn send(&self, item: AnnotatedValue) -> bool {
        self.tx.send(item).await.is_ok()
    }
}

/// Consumer side of an item stream.
#[derive(Debug)]
pub struct ItemReceiver {
    rx: mpsc::Receiver<AnnotatedValue>,
}

impl ItemReceiver {
    /// Next item, or `None` once the producer has closed the stream.
    pub async fn recv(&mut self) -> Option<AnnotatedValue> {
        self.rx.recv().await
    }

    /// Like [`recv`](Self::recv) but gives up as soon as the query is stopped.
    pub async fn recv_or_stop(&mut self, ctx: &Context) -> Option<AnnotatedValue> {
        if ctx.is_stopped() {
            return None;
        }
        tokio::select! {
            biased;
            _ = ctx.stopped() => None,
            item = self.rx.recv() => item,
        }
    }

    /// Drains the stream until the producer closes it.
    pub async fn drain(mut self) -> Vec<AnnotatedValue> {
        let mut items = Vec::new();
        while let Some(item) = self.rx.recv().await {
            items.push(item);
        }
        items
    }
}

impl Stream for ItemReceiver {
    type Item = AnnotatedValue;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
