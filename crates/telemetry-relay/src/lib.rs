// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! UDP telemetry relay.
//!
//! Packets arrive as JSON datagrams, are decoded and buffered in a bounded dispatch queue, and a
//! fixed pool of workers forwards each one to an HTTP sink. Liveness and Prometheus counters are
//! served from a separate HTTP listener.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod errors;
pub mod forwarder;
pub mod http_server;
pub mod http_utils;
pub mod ingest;
pub mod metrics;
pub mod packet;
pub mod queue;
pub mod relay;
pub mod worker_pool;
