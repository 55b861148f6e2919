// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::time::Duration;
use telemetry_relay::config::RelayConfig;
use telemetry_relay::metrics::{Registry, RelayCounter};
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// Config bound to ephemeral loopback ports with short timeouts.
pub fn test_config(forward_url: Option<&str>) -> RelayConfig {
    RelayConfig {
        udp_addr: "127.0.0.1:0".parse().unwrap(),
        http_addr: "127.0.0.1:0".parse().unwrap(),
        forward_url: forward_url.map(|url| url.parse().unwrap()),
        workers: 2,
        queue_capacity: 64,
        forward_timeout: Duration::from_millis(500),
        read_timeout: Duration::from_millis(50),
        shutdown_grace: Duration::from_millis(200),
        drain_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

pub async fn send_datagrams(target: SocketAddr, payloads: &[&[u8]]) {
    let socket = UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("unable to bind UDP socket");
    for payload in payloads {
        socket
            .send_to(payload, target)
            .await
            .expect("unable to send datagram");
    }
}

pub fn packet_json(source: &str, seq: u64) -> Vec<u8> {
    format!(r#"{{"source":"{source}","seq":{seq},"crc_ok":true,"values":{{"tank_temp_c":12.5}}}}"#)
        .into_bytes()
}

pub async fn wait_for_counter(registry: &Registry, counter: RelayCounter, expected: u64) {
    timeout(Duration::from_secs(5), async {
        while registry.get(counter) < expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "{} stayed at {} (wanted {expected})",
            counter.name(),
            registry.get(counter)
        )
    });
}

/// Sends a request to the relay's HTTP surface and returns the status and body.
pub async fn http_request(
    addr: SocketAddr,
    method: &str,
    path: &str,
) -> Result<(StatusCode, String), Box<dyn std::error::Error>> {
    let stream = timeout(Duration::from_secs(2), tokio::net::TcpStream::connect(addr)).await??;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

    tokio::spawn(async move {
        let _ = conn.await;
    });

    let request = Request::builder()
        .uri(path)
        .method(method)
        .header("Host", addr.to_string())
        .body(Empty::<Bytes>::new())?;
    let response = timeout(Duration::from_secs(2), sender.send_request(request)).await??;
    let status = response.status();
    let body = response.into_body().collect().await?.to_bytes();
    Ok((status, String::from_utf8(body.to_vec())?))
}
