// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! UDP ingestion loop.
//!
//! The loop owns the datagram socket and the producing half of the dispatch queue. Reads are
//! bounded by a timeout so the loop can notice a shutdown request on a quiet socket; the request
//! is only checked between reads, never by abandoning a read in flight.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::metrics::{MetricsSink, RelayCounter};
use crate::packet::{self, MAX_DATAGRAM_SIZE};
use crate::queue::QueueProducer;

/// Lifecycle of the ingestion loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    /// Reading and enqueueing.
    Running,
    /// Shutdown observed; consuming datagrams the kernel already buffered.
    Draining,
    /// Socket no longer read and the dispatch queue is closed.
    Stopped,
}

pub struct IngestLoop {
    socket: UdpSocket,
    producer: QueueProducer,
    metrics: Arc<dyn MetricsSink>,
    read_timeout: Duration,
    cancel_token: CancellationToken,
    state_tx: watch::Sender<IngestState>,
}

impl IngestLoop {
    pub fn new(
        socket: UdpSocket,
        producer: QueueProducer,
        metrics: Arc<dyn MetricsSink>,
        read_timeout: Duration,
        cancel_token: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(IngestState::Running);
        IngestLoop {
            socket,
            producer,
            metrics,
            read_timeout,
            cancel_token,
            state_tx,
        }
    }

    /// Subscribes to state transitions. The receiver stays usable after the loop has returned.
    pub fn state(&self) -> watch::Receiver<IngestState> {
        self.state_tx.subscribe()
    }

    /// Reads until shutdown is requested, then drains and closes the dispatch queue.
    pub async fn spin(self) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            match tokio::time::timeout(self.read_timeout, self.socket.recv_from(&mut buf)).await {
                // Poll point only: a quiet socket is not an error.
                Err(_) => {}
                Ok(Ok((len, src))) => self.handle_datagram(&buf[..len], src),
                Ok(Err(e)) => error!("UDP read error: {e}"),
            }
            if self.cancel_token.is_cancelled() {
                break;
            }
        }

        self.state_tx.send_replace(IngestState::Draining);
        let drained = self.drain_buffered(&mut buf);
        debug!("Drained {drained} buffered datagrams before stopping");

        let IngestLoop {
            producer, state_tx, ..
        } = self;
        producer.close();
        state_tx.send_replace(IngestState::Stopped);
        info!("UDP ingestion stopped");
    }

    /// Consumes datagrams already queued in the socket without waiting for new ones. Bounded by
    /// the queue capacity so a sender flooding the port cannot hold shutdown open.
    fn drain_buffered(&self, buf: &mut [u8]) -> usize {
        let mut drained = 0;
        while drained < self.producer.capacity() {
            match self.socket.try_recv_from(buf) {
                Ok((len, src)) => {
                    self.handle_datagram(&buf[..len], src);
                    drained += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("UDP read error while draining: {e}");
                    break;
                }
            }
        }
        drained
    }

    fn handle_datagram(&self, payload: &[u8], src: SocketAddr) {
        self.metrics
            .add(RelayCounter::UdpBytes, payload.len() as u64);
        self.metrics.incr(RelayCounter::Ingested);

        let packet = match packet::decode(payload) {
            Ok(packet) => packet,
            Err(e) => {
                self.metrics.incr(RelayCounter::ParseErrors);
                debug!("Failed to decode datagram from {src}: {e}");
                return;
            }
        };

        debug!(
            "Received packet seq={} source={} values={:?}",
            packet.seq, packet.source, packet.values
        );
        let seq = packet.seq;
        if !self.producer.enqueue(packet) {
            self.metrics.incr(RelayCounter::Dropped);
            debug!("Dispatch queue full, dropped packet seq={seq} from {src}");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::metrics::Registry;
    use crate::queue::{dispatch_queue, QueueConsumer};
    use tracing_test::traced_test;

    struct Harness {
        ingest: IngestLoop,
        consumer: QueueConsumer,
        registry: Arc<Registry>,
        cancel_token: CancellationToken,
        sender: UdpSocket,
        target: SocketAddr,
    }

    async fn harness(capacity: usize, read_timeout: Duration) -> Harness {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = socket.local_addr().unwrap();
        let (producer, consumer) = dispatch_queue(capacity);
        let registry = Arc::new(Registry::new());
        let cancel_token = CancellationToken::new();
        let ingest = IngestLoop::new(
            socket,
            producer,
            registry.clone(),
            read_timeout,
            cancel_token.clone(),
        );
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        Harness {
            ingest,
            consumer,
            registry,
            cancel_token,
            sender,
            target,
        }
    }

    async fn send(h: &Harness, payload: &[u8]) {
        h.sender.send_to(payload, h.target).await.unwrap();
    }

    async fn wait_for_counter(registry: &Registry, counter: RelayCounter, expected: u64) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while registry.get(counter) < expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_valid_datagram_is_enqueued() {
        let h = harness(8, Duration::from_millis(50)).await;
        let payload = br#"{"seq":1,"source":"s1","values":{"t":1.0}}"#;
        send(&h, payload).await;

        let Harness {
            ingest,
            consumer,
            registry,
            cancel_token,
            ..
        } = h;
        let task = tokio::spawn(ingest.spin());

        let packet = consumer.dequeue().await.unwrap();
        assert_eq!(packet.seq, 1);
        assert_eq!(packet.source, "s1");
        assert_eq!(registry.get(RelayCounter::Ingested), 1);
        assert_eq!(
            registry.get(RelayCounter::UdpBytes),
            payload.len() as u64
        );
        assert_eq!(registry.get(RelayCounter::ParseErrors), 0);

        cancel_token.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    #[traced_test]
    async fn test_malformed_datagram_is_counted_and_discarded() {
        let h = harness(8, Duration::from_millis(50)).await;
        send(&h, br#"{"seq":1,"source":"s1","val"#).await;

        let task = tokio::spawn(h.ingest.spin());
        wait_for_counter(&h.registry, RelayCounter::ParseErrors, 1).await;

        assert_eq!(h.registry.get(RelayCounter::Ingested), 1);
        assert!(h.consumer.try_dequeue().is_none());
        assert!(logs_contain("Failed to decode datagram"));

        h.cancel_token.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_full_queue_drops_newest() {
        let h = harness(1, Duration::from_millis(50)).await;
        send(&h, br#"{"seq":1,"source":"s"}"#).await;
        send(&h, br#"{"seq":2,"source":"s"}"#).await;

        let task = tokio::spawn(h.ingest.spin());
        wait_for_counter(&h.registry, RelayCounter::Ingested, 2).await;

        assert_eq!(h.registry.get(RelayCounter::Dropped), 1);
        assert_eq!(h.consumer.try_dequeue().unwrap().seq, 1);

        h.cancel_token.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_observed_at_read_timeout_and_closes_queue() {
        let h = harness(8, Duration::from_millis(100)).await;
        let mut state = h.ingest.state();
        assert_eq!(*state.borrow(), IngestState::Running);

        let task = tokio::spawn(h.ingest.spin());
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.cancel_token.cancel();

        tokio::time::timeout(
            Duration::from_secs(1),
            state.wait_for(|s| *s == IngestState::Stopped),
        )
        .await
        .unwrap()
        .unwrap();
        task.await.unwrap();

        assert!(h.consumer.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn test_buffered_datagrams_drained_on_shutdown() {
        let h = harness(8, Duration::from_millis(50)).await;
        for seq in 1..=3 {
            send(&h, format!(r#"{{"seq":{seq}}}"#).as_bytes()).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Already cancelled: the first read completes, then the rest are drained.
        h.cancel_token.cancel();
        h.ingest.spin().await;

        let mut seqs = Vec::new();
        while let Some(packet) = h.consumer.dequeue().await {
            seqs.push(packet.seq);
        }
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(h.registry.get(RelayCounter::Ingested), 3);
    }

    /// Notes the published ingest state each time a datagram is counted.
    #[derive(Default)]
    struct StateRecorder {
        state: std::sync::Mutex<Option<watch::Receiver<IngestState>>>,
        seen: std::sync::Mutex<Vec<IngestState>>,
    }

    impl MetricsSink for StateRecorder {
        fn add(&self, counter: RelayCounter, _amount: u64) {
            if counter != RelayCounter::Ingested {
                return;
            }
            if let Some(state) = self.state.lock().unwrap().as_ref() {
                self.seen.lock().unwrap().push(*state.borrow());
            }
        }

        fn observe_forward_latency(&self, _elapsed: Duration) {}
    }

    #[tokio::test]
    async fn test_draining_is_published_before_stopped() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = socket.local_addr().unwrap();
        let (producer, consumer) = dispatch_queue(8);
        let recorder = Arc::new(StateRecorder::default());
        let cancel_token = CancellationToken::new();
        let ingest = IngestLoop::new(
            socket,
            producer,
            recorder.clone(),
            Duration::from_millis(50),
            cancel_token.clone(),
        );
        let state = ingest.state();
        *recorder.state.lock().unwrap() = Some(ingest.state());

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for seq in 1..=3 {
            sender
                .send_to(format!(r#"{{"seq":{seq}}}"#).as_bytes(), target)
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        cancel_token.cancel();
        ingest.spin().await;

        // The first datagram is read while running, the buffered rest while draining.
        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![
                IngestState::Running,
                IngestState::Draining,
                IngestState::Draining
            ]
        );
        assert_eq!(*state.borrow(), IngestState::Stopped);
        assert!(consumer.try_dequeue().is_some());
    }
}
