// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed-size pool of forwarding workers.
//!
//! Every worker runs the same loop: take the next packet off the dispatch queue, hand it to the
//! forwarder, repeat. A worker exits once the queue reports closed-and-drained, so the pool needs
//! no cancellation of its own: closing the queue is the stop signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::errors::RelayError;
use crate::forwarder::Forward;
use crate::queue::QueueConsumer;

pub struct WorkerPool {
    workers: JoinSet<()>,
}

impl WorkerPool {
    /// Starts `size` workers draining `consumer` into `forwarder`.
    pub fn spawn(size: usize, consumer: QueueConsumer, forwarder: Arc<dyn Forward>) -> Self {
        let mut workers = JoinSet::new();
        for id in 0..size {
            let consumer = consumer.clone();
            let forwarder = Arc::clone(&forwarder);
            workers.spawn(async move {
                debug!("Worker {id} started");
                while let Some(packet) = consumer.dequeue().await {
                    forwarder.forward(packet).await;
                }
                debug!("Worker {id} exited: queue closed and drained");
            });
        }
        WorkerPool { workers }
    }

    /// Number of workers that have not exited yet.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Resolves once every worker has observed queue closure and finished its in-flight forward.
    pub async fn join(mut self) {
        wait_all(&mut self.workers).await;
    }

    /// Like [`WorkerPool::join`], but gives up after `limit`. Workers still running at that point
    /// are aborted and their in-flight packets are lost.
    pub async fn join_timeout(mut self, limit: Duration) -> Result<(), RelayError> {
        let drained = tokio::time::timeout(limit, wait_all(&mut self.workers)).await;

        match drained {
            Ok(()) => Ok(()),
            Err(_) => {
                let remaining = self.workers.len();
                warn!(
                    "Worker drain exceeded {} ms, aborting {remaining} workers",
                    limit.as_millis()
                );
                self.workers.shutdown().await;
                Err(RelayError::DrainTimeout { remaining })
            }
        }
    }
}

async fn wait_all(workers: &mut JoinSet<()>) {
    while let Some(finished) = workers.join_next().await {
        if let Err(e) = finished {
            if e.is_panic() {
                error!("Worker panicked: {e:?}");
            }
        }
    }
}
