// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wires the pipeline together and drives its ordered shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::RelayConfig;
use crate::errors::{Listener, RelayError};
use crate::forwarder::{DiscardForwarder, Forward, HttpForwarder};
use crate::http_server;
use crate::ingest::{IngestLoop, IngestState};
use crate::metrics::Registry;
use crate::queue::{dispatch_queue, QueueProbe};
use crate::worker_pool::WorkerPool;

pub struct Relay {
    config: RelayConfig,
    registry: Arc<Registry>,
}

impl Relay {
    pub fn new(config: RelayConfig, registry: Arc<Registry>) -> Self {
        Relay { config, registry }
    }

    /// Binds both listeners and starts every component. Nothing is spawned unless both binds
    /// succeed.
    pub async fn start(self) -> Result<RelayHandle, RelayError> {
        let Relay { config, registry } = self;
        config.validate()?;

        let forwarder: Arc<dyn Forward> = match &config.forward_url {
            Some(url) => Arc::new(HttpForwarder::new(
                url.clone(),
                config.forward_timeout,
                registry.clone(),
            )?),
            None => {
                info!("FORWARD_URL not set, packets will be discarded after ingestion");
                Arc::new(DiscardForwarder)
            }
        };

        let socket = UdpSocket::bind(config.udp_addr)
            .await
            .map_err(|source| bind_error(Listener::Udp, config.udp_addr, source))?;
        let udp_addr = socket
            .local_addr()
            .map_err(|source| bind_error(Listener::Udp, config.udp_addr, source))?;
        let listener = TcpListener::bind(config.http_addr)
            .await
            .map_err(|source| bind_error(Listener::Http, config.http_addr, source))?;
        let http_addr = listener
            .local_addr()
            .map_err(|source| bind_error(Listener::Http, config.http_addr, source))?;

        let http_cancel = CancellationToken::new();
        let http_task = tokio::spawn(http_server::serve(
            listener,
            registry.clone(),
            http_cancel.clone(),
            config.shutdown_grace,
        ));

        let (producer, consumer) = dispatch_queue(config.queue_capacity);
        let queue = producer.probe();
        let pool = WorkerPool::spawn(config.workers, consumer, forwarder);

        let ingest_cancel = CancellationToken::new();
        let ingest = IngestLoop::new(
            socket,
            producer,
            registry.clone(),
            config.read_timeout,
            ingest_cancel.clone(),
        );
        let ingest_state = ingest.state();
        let ingest_task = tokio::spawn(ingest.spin());

        info!(
            "Relay started: udp={udp_addr} http={http_addr} workers={} queue_size={} sink={}",
            config.workers,
            config.queue_capacity,
            config
                .forward_url
                .as_ref()
                .map_or("none", |url| url.as_str())
        );

        Ok(RelayHandle {
            udp_addr,
            http_addr,
            registry,
            queue,
            ingest_state,
            ingest_cancel,
            ingest_task,
            pool,
            drain_timeout: config.drain_timeout,
            http_cancel,
            http_task,
        })
    }
}

fn bind_error(listener: Listener, addr: SocketAddr, source: std::io::Error) -> RelayError {
    RelayError::Bind {
        listener,
        addr,
        source,
    }
}

/// A running relay. Dropping the handle leaves the tasks running; call
/// [`RelayHandle::shutdown`] to stop them.
pub struct RelayHandle {
    udp_addr: SocketAddr,
    http_addr: SocketAddr,
    registry: Arc<Registry>,
    queue: QueueProbe,
    ingest_state: watch::Receiver<IngestState>,
    ingest_cancel: CancellationToken,
    ingest_task: JoinHandle<()>,
    pool: WorkerPool,
    drain_timeout: Duration,
    http_cancel: CancellationToken,
    http_task: JoinHandle<()>,
}

impl RelayHandle {
    /// Address the datagram socket actually bound to.
    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn ingest_state(&self) -> watch::Receiver<IngestState> {
        self.ingest_state.clone()
    }

    /// Packets waiting in the dispatch queue, or `None` once ingestion has closed it.
    pub fn queue_len(&self) -> Option<usize> {
        self.queue.len()
    }

    /// Stops ingestion, waits for the workers to drain the queue, then closes the HTTP surface.
    ///
    /// The HTTP surface is shut down even when the drain times out; the timeout is still
    /// reported, ahead of any task that failed along the way.
    pub async fn shutdown(self) -> Result<(), RelayError> {
        let RelayHandle {
            mut ingest_state,
            ingest_cancel,
            ingest_task,
            pool,
            drain_timeout,
            http_cancel,
            http_task,
            ..
        } = self;

        let mut task_failure = None;

        info!("Shutdown requested, stopping UDP ingestion");
        ingest_cancel.cancel();
        if let Err(e) = ingest_task.await {
            error!("Ingestion task failed: {e}");
            task_failure = Some(RelayError::Runtime(format!("ingestion task failed: {e}")));
        }
        // The task exiting normally publishes Stopped; a failed task dropped the producer, which
        // closes the queue all the same.
        let _ = ingest_state
            .wait_for(|state| *state == IngestState::Stopped)
            .await;
        debug!("Ingestion stopped, dispatch queue closed");

        info!("Waiting for {} workers to drain the queue", pool.len());
        let drained = pool.join_timeout(drain_timeout).await;

        info!("Stopping HTTP surface");
        http_cancel.cancel();
        if let Err(e) = http_task.await {
            error!("HTTP task failed: {e}");
            task_failure.get_or_insert(RelayError::Runtime(format!("HTTP task failed: {e}")));
        }

        drained?;
        match task_failure {
            Some(failure) => Err(failure),
            None => {
                info!("Relay stopped");
                Ok(())
            }
        }
    }
}
