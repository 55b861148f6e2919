// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;

/// Failure to turn a datagram into a [`crate::packet::Packet`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed packet: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("packet is not a JSON object")]
    NotAnObject,
}

/// Which of the two listeners a bind error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listener {
    Udp,
    Http,
}

impl std::fmt::Display for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Udp => write!(f, "udp"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// Errors that can occur while configuring, starting or stopping the relay
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to bind {listener} listener on {addr}: {source}")]
    Bind {
        listener: Listener,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build forwarding client: {0}")]
    Client(String),

    #[error("Worker drain timed out with {remaining} workers still running")]
    DrainTimeout { remaining: usize },

    #[error("Runtime error: {0}")]
    Runtime(String),
}
