// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::Url;
use std::env;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use crate::errors::RelayError;

pub const DEFAULT_UDP_ADDR: &str = ":9000";
pub const DEFAULT_HTTP_ADDR: &str = ":8080";
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_SIZE: usize = 1024;
pub const DEFAULT_FORWARD_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 3_000;
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_LOG_LEVEL: &str = "info";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    pub udp_addr: SocketAddr,
    pub http_addr: SocketAddr,
    /// Sink for forwarded packets. `None` runs the relay in discard-only mode.
    pub forward_url: Option<Url>,
    pub workers: usize,
    pub queue_capacity: usize,
    pub forward_timeout: Duration,
    pub read_timeout: Duration,
    pub shutdown_grace: Duration,
    /// Upper bound on waiting for workers to empty the queue at shutdown.
    pub drain_timeout: Duration,
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            udp_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            forward_url: None,
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_SIZE,
            forward_timeout: Duration::from_millis(DEFAULT_FORWARD_TIMEOUT_MS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
            drain_timeout: Duration::from_millis(DEFAULT_DRAIN_TIMEOUT_MS),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, RelayError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable source. Empty values count as unset and
    /// unparsable numbers fall back to their default; the result is validated before returning.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RelayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|val| val.trim().to_string())
                .filter(|val| !val.is_empty())
        };
        let number = |name: &str, default: u64| {
            var(name)
                .and_then(|val| val.parse::<u64>().ok())
                .unwrap_or(default)
        };
        let count = |name: &str, default: usize| {
            var(name)
                .and_then(|val| val.parse::<usize>().ok())
                .unwrap_or(default)
        };

        let udp_addr = parse_addr(
            "UDP_ADDR",
            var("UDP_ADDR").as_deref().unwrap_or(DEFAULT_UDP_ADDR),
        )?;
        let http_addr = parse_addr(
            "HTTP_ADDR",
            var("HTTP_ADDR").as_deref().unwrap_or(DEFAULT_HTTP_ADDR),
        )?;
        let forward_url = var("FORWARD_URL")
            .map(|raw| {
                Url::parse(&raw).map_err(|e| {
                    RelayError::InvalidConfig(format!("FORWARD_URL \"{raw}\" is not a URL: {e}"))
                })
            })
            .transpose()?;

        let config = RelayConfig {
            udp_addr,
            http_addr,
            forward_url,
            workers: count("WORKERS", DEFAULT_WORKERS),
            queue_capacity: count("QUEUE_SIZE", DEFAULT_QUEUE_SIZE),
            forward_timeout: Duration::from_millis(number(
                "FORWARD_TIMEOUT_MS",
                DEFAULT_FORWARD_TIMEOUT_MS,
            )),
            read_timeout: Duration::from_millis(number(
                "READ_TIMEOUT_MS",
                DEFAULT_READ_TIMEOUT_MS,
            )),
            shutdown_grace: Duration::from_millis(number(
                "SHUTDOWN_GRACE_MS",
                DEFAULT_SHUTDOWN_GRACE_MS,
            )),
            drain_timeout: Duration::from_millis(number(
                "DRAIN_TIMEOUT_MS",
                DEFAULT_DRAIN_TIMEOUT_MS,
            )),
            log_level: var("LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.workers == 0 {
            return Err(invalid("WORKERS must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("QUEUE_SIZE must be at least 1"));
        }
        for (name, value) in [
            ("FORWARD_TIMEOUT_MS", self.forward_timeout),
            ("READ_TIMEOUT_MS", self.read_timeout),
            ("SHUTDOWN_GRACE_MS", self.shutdown_grace),
            ("DRAIN_TIMEOUT_MS", self.drain_timeout),
        ] {
            if value.is_zero() {
                return Err(invalid(&format!("{name} must be greater than zero")));
            }
        }
        if let Some(url) = &self.forward_url {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(invalid(&format!(
                    "FORWARD_URL must use http or https, got \"{}\"",
                    url.scheme()
                )));
            }
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(invalid(&format!(
                "LOG_LEVEL \"{}\" is not one of {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            )));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> RelayError {
    RelayError::InvalidConfig(message.to_string())
}

/// Parses a listen address. A bare `:port` binds every interface.
fn parse_addr(name: &str, raw: &str) -> Result<SocketAddr, RelayError> {
    let candidate = if raw.starts_with(':') {
        format!("0.0.0.0{raw}")
    } else {
        raw.to_string()
    };
    if let Ok(addr) = candidate.parse::<SocketAddr>() {
        return Ok(addr);
    }
    candidate
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| invalid(&format!("{name} \"{raw}\" is not a valid address")))
}
