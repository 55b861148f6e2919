// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Liveness and metrics endpoints.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::service::service_fn;
use hyper::{http, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::http_utils::{log_and_create_http_response, HttpResponse};
use crate::metrics::Registry;

pub const HEALTHZ_PATH: &str = "/healthz";
pub const METRICS_PATH: &str = "/metrics";
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Serves requests on `listener` until `cancel_token` fires. Open connections are then asked to
/// close and given `grace` to do so before they are aborted.
pub async fn serve(
    listener: TcpListener,
    registry: Arc<Registry>,
    cancel_token: CancellationToken,
    grace: Duration,
) {
    let server = hyper::server::conn::http1::Builder::new();
    let graceful = GracefulShutdown::new();
    let mut joinset = tokio::task::JoinSet::new();

    let service = service_fn(move |req: Request<hyper::body::Incoming>| {
        let registry = Arc::clone(&registry);
        async move { route(&req, &registry) }
    });

    loop {
        let conn = tokio::select! {
            () = cancel_token.cancelled() => break,
            con_res = listener.accept() => match con_res {
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    error!("HTTP accept error: {e}");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
                Ok((conn, _)) => conn,
            },
            finished = async {
                match joinset.join_next().await {
                    Some(finished) => finished,
                    None => std::future::pending().await,
                }
            } => match finished {
                Err(e) if e.is_panic() => {
                    error!("Connection handler panicked: {:?}", e);
                    continue;
                },
                Ok(()) | Err(_) => continue,
            },
        };
        let conn = TokioIo::new(conn);
        let watched = graceful.watch(server.serve_connection(conn, service.clone()));
        joinset.spawn(async move {
            if let Err(e) = watched.await {
                debug!("HTTP connection error: {e}");
            }
        });
    }

    drop(listener);
    debug!("HTTP listener closed, {} connections open", joinset.len());

    tokio::select! {
        () = graceful.shutdown() => {
            debug!("HTTP connections closed gracefully");
        },
        () = tokio::time::sleep(grace) => {
            warn!(
                "HTTP connections still open after {} ms, aborting",
                grace.as_millis()
            );
            joinset.abort_all();
        },
    }
    while joinset.join_next().await.is_some() {}
}

pub fn route<B>(req: &Request<B>, registry: &Registry) -> http::Result<HttpResponse> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, HEALTHZ_PATH) => Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::new())),
        (&Method::GET, METRICS_PATH) => Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, METRICS_CONTENT_TYPE)
            .body(Full::new(Bytes::from(registry.render()))),
        (method, path @ (HEALTHZ_PATH | METRICS_PATH)) => {
            let mut response = log_and_create_http_response(
                &format!("Method {method} not allowed on {path}"),
                StatusCode::METHOD_NOT_ALLOWED,
            )?;
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("GET"));
            Ok(response)
        }
        (_, path) => {
            log_and_create_http_response(&format!("Not found: {path}"), StatusCode::NOT_FOUND)
        }
    }
}
