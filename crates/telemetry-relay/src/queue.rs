// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded dispatch queue between the ingestion loop and the worker pool.
//!
//! Enqueue never waits: when the queue is full the newest packet is rejected and the caller
//! drops it. UDP has no flow control, so pushing back on the socket would only move the loss
//! into the kernel buffer.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::packet::Packet;

/// Creates a queue holding at most `capacity` packets.
///
/// `capacity` must be at least 1; [`crate::config::RelayConfig::validate`] guarantees this for
/// configured values.
pub fn dispatch_queue(capacity: usize) -> (QueueProducer, QueueConsumer) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        QueueProducer { tx },
        QueueConsumer {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Sending half, owned by the ingestion loop. Dropping it closes the queue.
#[derive(Debug)]
pub struct QueueProducer {
    tx: mpsc::Sender<Packet>,
}

impl QueueProducer {
    /// Offers a packet without waiting. Returns `false` when the queue is at capacity.
    pub fn enqueue(&self, packet: Packet) -> bool {
        match self.tx.try_send(packet) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => false,
            // The consumer side is gone, which only happens once every worker has exited.
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Marks the end of input. Buffered packets are still handed out; afterwards every
    /// [`QueueConsumer::dequeue`] returns `None`.
    pub fn close(self) {
        drop(self);
    }

    /// A cloneable view used to observe queue depth without being able to enqueue.
    pub fn probe(&self) -> QueueProbe {
        QueueProbe {
            tx: self.tx.downgrade(),
        }
    }
}

/// Read-only depth probe that does not keep the queue open.
#[derive(Debug, Clone)]
pub struct QueueProbe {
    tx: mpsc::WeakSender<Packet>,
}

impl QueueProbe {
    /// Current number of buffered packets, or `None` once the queue has been closed.
    pub fn len(&self) -> Option<usize> {
        self.tx
            .upgrade()
            .map(|tx| tx.max_capacity() - tx.capacity())
    }
}

/// Receiving half, shared by every worker.
#[derive(Debug, Clone)]
pub struct QueueConsumer {
    rx: Arc<Mutex<mpsc::Receiver<Packet>>>,
}

impl QueueConsumer {
    /// Waits for the next packet. Returns `None` once the queue is closed and drained.
    ///
    /// Waiters queue up on the receiver lock in FIFO order, so packets are handed out in the
    /// order they were enqueued.
    pub async fn dequeue(&self) -> Option<Packet> {
        self.rx.lock().await.recv().await
    }

    /// Non-blocking variant, `None` when nothing is buffered right now or another worker holds
    /// the receiver.
    pub fn try_dequeue(&self) -> Option<Packet> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }
}
