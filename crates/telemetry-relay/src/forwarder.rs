// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, StatusCode, Url};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

use crate::errors::RelayError;
use crate::http_utils::build_client;
use crate::metrics::{MetricsSink, RelayCounter};
use crate::packet::{self, Packet};

/// Result of one delivery attempt. Every variant other than `Success` means the packet is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    HttpError(StatusCode),
    TransportError,
    /// No sink is configured; the packet was consumed without a network call.
    Discarded,
}

#[async_trait]
pub trait Forward: Send + Sync {
    /// Makes a single delivery attempt for `packet`. Never retries.
    async fn forward(&self, packet: Packet) -> Outcome;
}

/// Posts each packet as JSON to the configured sink.
pub struct HttpForwarder {
    client: reqwest::Client,
    url: Url,
    metrics: Arc<dyn MetricsSink>,
}

impl HttpForwarder {
    pub fn new(
        url: Url,
        timeout: Duration,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, RelayError> {
        let client = build_client(timeout).map_err(|e| RelayError::Client(e.to_string()))?;
        Ok(HttpForwarder {
            client,
            url,
            metrics,
        })
    }

    fn classify(&self, response: Result<StatusCode, reqwest::Error>) -> Outcome {
        match response {
            Ok(status) if status.is_success() => {
                self.metrics.incr(RelayCounter::Forwarded);
                Outcome::Success
            }
            Ok(status) => {
                error!("Forwarder | Sink rejected packet with status {status}");
                self.metrics.incr(RelayCounter::ForwardErrors);
                Outcome::HttpError(status)
            }
            Err(e) => {
                error!("Forwarder | Network error: {e}");
                self.metrics.incr(RelayCounter::ForwardErrors);
                Outcome::TransportError
            }
        }
    }
}

#[async_trait]
impl Forward for HttpForwarder {
    async fn forward(&self, packet: Packet) -> Outcome {
        let payload = match packet::encode(&packet) {
            Ok(payload) => payload,
            Err(e) => {
                // Nothing was sent, but the packet is lost all the same.
                error!("Forwarder | Failed to encode packet seq={}: {e}", packet.seq);
                self.metrics.incr(RelayCounter::ForwardErrors);
                return Outcome::TransportError;
            }
        };

        let start = Instant::now();
        let response = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await;

        let status = match response {
            Ok(response) => {
                let status = response.status();
                if let Err(e) = response.bytes().await {
                    debug!("Forwarder | Failed to read sink response body: {e}");
                }
                Ok(status)
            }
            Err(e) => Err(e),
        };
        let elapsed = start.elapsed();
        self.metrics.observe_forward_latency(elapsed);

        let outcome = self.classify(status);
        trace!(
            "Forwarder | seq={} source={} outcome={:?} in {} ms",
            packet.seq,
            packet.source,
            outcome,
            elapsed.as_millis()
        );
        outcome
    }
}

/// Used when no sink is configured, so the queue keeps draining.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardForwarder;

#[async_trait]
impl Forward for DiscardForwarder {
    async fn forward(&self, packet: Packet) -> Outcome {
        trace!("Discarding packet seq={} source={}", packet.seq, packet.source);
        Outcome::Discarded
    }
}
