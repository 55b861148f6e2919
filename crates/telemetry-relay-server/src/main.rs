// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, process, sync::Arc};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use telemetry_relay::{
    config::{RelayConfig, DEFAULT_LOG_LEVEL},
    errors::RelayError,
    metrics::Registry,
    relay::Relay,
};

#[tokio::main]
pub async fn main() {
    let log_level = env::var("LOG_LEVEL")
        .map(|val| val.trim().to_lowercase())
        .ok()
        .filter(|val| !val.is_empty())
        .unwrap_or(DEFAULT_LOG_LEVEL.to_string());

    let env_filter = format!("h2=off,hyper=off,reqwest=off,rustls=off,{log_level}");
    let env_filter = EnvFilter::try_new(env_filter).unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "h2=off,hyper=off,reqwest=off,rustls=off,{DEFAULT_LOG_LEVEL}"
        ))
    });

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
    }

    debug!("Logging subsystem enabled");

    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };

    let handle = match Relay::new(config, Arc::new(Registry::new())).start().await {
        Ok(handle) => handle,
        Err(e) => {
            error!("Relay failed to start: {e}");
            process::exit(1);
        }
    };

    wait_for_termination().await;

    match handle.shutdown().await {
        Ok(()) => info!("graceful shutdown complete"),
        Err(RelayError::DrainTimeout { remaining }) => {
            error!("shutdown finished with {remaining} workers aborted mid-forward");
        }
        Err(e) => error!("shutdown error: {e}"),
    }
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                wait_for_ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            () = wait_for_ctrl_c() => {},
            _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
        }
    }

    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating shutdown"),
        Err(e) => {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    }
}
