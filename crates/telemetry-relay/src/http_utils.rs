// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use core::time::Duration;
use http_body_util::Full;
use hyper::{http, Response, StatusCode};
use serde_json::json;
use std::error::Error;
use tracing::{debug, error};

pub type HttpResponse = Response<Full<Bytes>>;

/// Does two things:
/// 1. Logs the given message. A success status code (within 200-299) will cause a debug log to be
///    written, otherwise error will be written.
/// 2. Returns the given message in the body of JSON response with the given status code.
///
/// Response body format:
/// {
///     "message": message
/// }
pub fn log_and_create_http_response(
    message: &str,
    status: StatusCode,
) -> http::Result<HttpResponse> {
    if status.is_success() {
        debug!("{message}");
    } else {
        error!("{message}");
    }
    let body = json!({ "message": message }).to_string();
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
}

/// Builds the reqwest client used to reach the forwarding sink. Every request made with it is
/// bounded by `timeout`, connect time included.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, Box<dyn Error + Send + Sync>> {
    Ok(reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()?)
}
