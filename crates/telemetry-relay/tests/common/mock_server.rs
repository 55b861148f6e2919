// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Counting HTTP sink for forwarding tests

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{body::Incoming, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;

#[derive(Clone, Debug)]
pub struct ReceivedRequest {
    pub method: String,
    pub path: String,
    pub content_type: Option<String>,
    pub body: serde_json::Value,
}

#[derive(Clone)]
pub struct MockSink {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<ReceivedRequest>>>,
    arrivals: Arc<Notify>,
}

impl MockSink {
    /// Sink answering every POST with `status` after waiting `delay`. The request is recorded
    /// when it arrives, before the delay.
    pub async fn start(status: StatusCode, delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock sink");
        let addr = listener.local_addr().expect("Failed to get local addr");

        let received = Arc::new(Mutex::new(Vec::new()));
        let arrivals = Arc::new(Notify::new());
        let received_clone = received.clone();
        let arrivals_clone = arrivals.clone();

        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };

                let io = TokioIo::new(stream);
                let received = received_clone.clone();
                let arrivals = arrivals_clone.clone();

                tokio::spawn(async move {
                    let service = hyper::service::service_fn(move |req: Request<Incoming>| {
                        let received = received.clone();
                        let arrivals = arrivals.clone();
                        async move {
                            let method = req.method().to_string();
                            let path = req.uri().path().to_string();
                            let content_type = req
                                .headers()
                                .get("content-type")
                                .and_then(|v| v.to_str().ok())
                                .map(str::to_string);
                            let body_bytes = req
                                .into_body()
                                .collect()
                                .await
                                .map(|collected| collected.to_bytes())
                                .unwrap_or_default();
                            let body =
                                serde_json::from_slice(&body_bytes).unwrap_or(serde_json::Value::Null);

                            received.lock().unwrap().push(ReceivedRequest {
                                method,
                                path,
                                content_type,
                                body,
                            });
                            arrivals.notify_waiters();

                            tokio::time::sleep(delay).await;
                            Ok::<_, hyper::http::Error>(
                                Response::builder()
                                    .status(status)
                                    .body(Full::new(Bytes::new()))
                                    .unwrap(),
                            )
                        }
                    });

                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        MockSink {
            addr,
            received,
            arrivals,
        }
    }

    pub async fn ok() -> Self {
        Self::start(StatusCode::OK, Duration::ZERO).await
    }

    pub fn url(&self) -> String {
        format!("http://{}/ingest", self.addr)
    }

    pub fn requests(&self) -> Vec<ReceivedRequest> {
        self.received.lock().unwrap().clone()
    }

    /// Number of times each `(source, seq)` pair reached the sink.
    pub fn receipts(&self) -> HashMap<(String, u64), usize> {
        let mut receipts = HashMap::new();
        for req in self.received.lock().unwrap().iter() {
            let source = req.body["source"].as_str().unwrap_or_default().to_string();
            let seq = req.body["seq"].as_u64().unwrap_or_default();
            *receipts.entry((source, seq)).or_default() += 1;
        }
        receipts
    }

    /// Waits until at least `count` requests have arrived.
    pub async fn wait_for_requests(&self, count: usize, limit: Duration) {
        tokio::time::timeout(limit, async {
            loop {
                let notified = self.arrivals.notified();
                if self.received.lock().unwrap().len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .expect("mock sink did not receive enough requests in time");
    }
}
