// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sends a synthetic thermal reading to the relay every tick until interrupted.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

use std::collections::HashMap;
use std::{env, process, time::Duration};

use chrono::Utc;
use rand::Rng;
use tokio::net::UdpSocket;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use telemetry_relay::packet::{self, Packet};

const DEFAULT_TARGET: &str = "127.0.0.1:9000";
const DEFAULT_SOURCE: &str = "stage1";
const DEFAULT_INTERVAL_MS: u64 = 500;
const SIGNAL_TYPE: &str = "thermal";

fn env_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|val| !val.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn synthetic_packet<R: Rng>(rng: &mut R, source: &str, seq: u64) -> Packet {
    Packet {
        timestamp: Some(Utc::now()),
        source: source.to_string(),
        signal: Some(SIGNAL_TYPE.to_string()),
        seq,
        crc_ok: true,
        values: HashMap::from([
            ("tank_temp_c".to_string(), rng.gen_range(10.0..15.0)),
            ("pump_rpm".to_string(), rng.gen_range(5000.0..5200.0)),
        ]),
    }
}

#[tokio::main]
pub async fn main() {
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::new(env_or("LOG_LEVEL", "info")))
        .with_target(false)
        .without_time()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
    }

    let target = env_or("UDP_ADDR", DEFAULT_TARGET);
    let source = env_or("SOURCE", DEFAULT_SOURCE);
    let interval = env::var("SEND_INTERVAL_MS")
        .ok()
        .and_then(|val| val.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .unwrap_or(DEFAULT_INTERVAL_MS);

    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(socket) => socket,
        Err(e) => {
            error!("Failed to bind UDP socket: {e}");
            process::exit(1);
        }
    };
    if let Err(e) = socket.connect(&target).await {
        error!("Failed to resolve {target}: {e}");
        process::exit(1);
    }
    info!("Sending packets from {source} to {target} every {interval} ms");

    let mut rng = rand::thread_rng();
    let mut ticker = tokio::time::interval(Duration::from_millis(interval));
    let mut seq: u64 = 0;
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            _ = ticker.tick() => {},
            _ = &mut interrupted => {
                info!("Stopped after {seq} packets");
                return;
            },
        }

        seq += 1;
        let payload = match packet::encode(&synthetic_packet(&mut rng, &source, seq)) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode packet seq={seq}: {e}");
                continue;
            }
        };
        match socket.send(&payload).await {
            Ok(sent) => debug!("Sent seq={seq} ({sent} bytes)"),
            // No listener yet is expected when the relay is down; keep going.
            Err(e) => debug!("Send failed for seq={seq}: {e}"),
        }
    }
}
