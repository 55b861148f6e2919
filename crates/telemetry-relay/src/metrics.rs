// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Relay counters and the forward latency histogram.
//!
//! The pipeline only sees the [`MetricsSink`] trait, so tests can run it against a fresh
//! [`Registry`] instead of process-wide state. [`Registry`] keeps everything in atomics and renders
//! the Prometheus text exposition format for `GET /metrics`.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Prometheus client default buckets, in seconds.
pub const LATENCY_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

const FORWARD_LATENCY_NAME: &str = "telemetry_forward_seconds";
const FORWARD_LATENCY_HELP: &str = "HTTP forward latency";

/// Counters maintained by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCounter {
    Ingested,
    ParseErrors,
    Dropped,
    Forwarded,
    ForwardErrors,
    UdpBytes,
}

impl RelayCounter {
    pub const ALL: [RelayCounter; 6] = [
        RelayCounter::Ingested,
        RelayCounter::ParseErrors,
        RelayCounter::Dropped,
        RelayCounter::Forwarded,
        RelayCounter::ForwardErrors,
        RelayCounter::UdpBytes,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Ingested => "telemetry_ingested_total",
            Self::ParseErrors => "telemetry_parse_errors_total",
            Self::Dropped => "telemetry_dropped_total",
            Self::Forwarded => "telemetry_forwarded_total",
            Self::ForwardErrors => "telemetry_forward_errors_total",
            Self::UdpBytes => "telemetry_udp_bytes_total",
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            Self::Ingested => "packets received",
            Self::ParseErrors => "json parse errors",
            Self::Dropped => "packets dropped because the dispatch queue was full",
            Self::Forwarded => "packets forwarded",
            Self::ForwardErrors => "http forward errors",
            Self::UdpBytes => "udp payload bytes",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Capability the pipeline reports its outcomes to.
pub trait MetricsSink: Send + Sync {
    fn add(&self, counter: RelayCounter, amount: u64);

    fn incr(&self, counter: RelayCounter) {
        self.add(counter, 1);
    }

    fn observe_forward_latency(&self, elapsed: Duration);
}

/// Atomic counter wrapper
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    #[inline]
    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Fixed-bucket latency histogram.
///
/// Buckets hold non-cumulative counts; observations above the last bound only show up in `count`.
/// Updates are relaxed, so a scrape racing an observation may see `count` one ahead of the buckets.
#[derive(Debug, Default)]
pub struct LatencyHistogram {
    buckets: [Counter; LATENCY_BUCKETS.len()],
    count: Counter,
    sum_nanos: Counter,
}

impl LatencyHistogram {
    pub fn observe(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if let Some(i) = LATENCY_BUCKETS.iter().position(|bound| secs <= *bound) {
            self.buckets[i].add(1);
        }
        self.count.add(1);
        self.sum_nanos
            .add(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX));
    }

    pub fn count(&self) -> u64 {
        self.count.get()
    }

    pub fn sum(&self) -> Duration {
        Duration::from_nanos(self.sum_nanos.get())
    }

    /// Cumulative `(upper bound, count)` pairs, excluding `+Inf`.
    pub fn cumulative_buckets(&self) -> Vec<(f64, u64)> {
        let mut running = 0;
        LATENCY_BUCKETS
            .iter()
            .zip(self.buckets.iter())
            .map(|(bound, bucket)| {
                running += bucket.get();
                (*bound, running)
            })
            .collect()
    }
}

/// In-process registry backing the metrics endpoint.
#[derive(Debug, Default)]
pub struct Registry {
    counters: [Counter; RelayCounter::ALL.len()],
    forward_latency: LatencyHistogram,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, counter: RelayCounter) -> u64 {
        self.counters[counter.index()].get()
    }

    pub fn forward_latency(&self) -> &LatencyHistogram {
        &self.forward_latency
    }

    /// Renders every series in the Prometheus text exposition format (version 0.0.4).
    pub fn render(&self) -> String {
        let mut out = String::new();
        for counter in RelayCounter::ALL {
            let _ = writeln!(out, "# HELP {} {}", counter.name(), counter.help());
            let _ = writeln!(out, "# TYPE {} counter", counter.name());
            let _ = writeln!(out, "{} {}", counter.name(), self.get(counter));
        }

        let histogram = &self.forward_latency;
        let _ = writeln!(out, "# HELP {FORWARD_LATENCY_NAME} {FORWARD_LATENCY_HELP}");
        let _ = writeln!(out, "# TYPE {FORWARD_LATENCY_NAME} histogram");
        for (bound, cumulative) in histogram.cumulative_buckets() {
            let _ = writeln!(
                out,
                "{FORWARD_LATENCY_NAME}_bucket{{le=\"{bound}\"}} {cumulative}"
            );
        }
        let _ = writeln!(
            out,
            "{FORWARD_LATENCY_NAME}_bucket{{le=\"+Inf\"}} {}",
            histogram.count()
        );
        let _ = writeln!(
            out,
            "{FORWARD_LATENCY_NAME}_sum {}",
            histogram.sum().as_secs_f64()
        );
        let _ = writeln!(out, "{FORWARD_LATENCY_NAME}_count {}", histogram.count());
        out
    }
}

impl MetricsSink for Registry {
    fn add(&self, counter: RelayCounter, amount: u64) {
        self.counters[counter.index()].add(amount);
    }

    fn observe_forward_latency(&self, elapsed: Duration) {
        self.forward_latency.observe(elapsed);
    }
}
