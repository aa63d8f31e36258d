//! HTTP exchanges with a push endpoint.
//!
//! [`PushTransport`] is the seam between the [`DeliveryAgent`](crate::DeliveryAgent)
//! and the network. [`HyperTransport`] is the production implementation; it
//! never follows redirects on its own, since the agent has to see each 302.

use std::future::Future;
use std::io;

use bytes::Bytes;
use futures_util::TryStreamExt;
use http::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION};
use http::{Method, Request, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio_util::io::ReaderStream;
use tracing::debug;
use url::Url;

use crate::error::TransportResult;
use crate::receiver::ByteBody;

const OCTET_STREAM: &str = "application/octet-stream";

/// Status, redirect target and body text of a push endpoint response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushResponse {
    pub status: StatusCode,
    pub location: Option<String>,
    pub message: String,
}

impl PushResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            location: None,
            message: String::new(),
        }
    }

    pub fn redirect(location: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FOUND,
            location: Some(location.into()),
            message: String::new(),
        }
    }
}

/// Sends probes and stream bodies to push endpoints.
pub trait PushTransport: Send + Sync + 'static {
    /// Zero-body HEAD asking whether `url` is ready for the stream.
    fn probe(&self, url: &Url) -> impl Future<Output = TransportResult<PushResponse>> + Send;

    /// POST the whole stream to `url`.
    fn push(
        &self,
        url: &Url,
        body: ByteBody,
    ) -> impl Future<Output = TransportResult<PushResponse>> + Send;
}

type PushBody = UnsyncBoxBody<Bytes, io::Error>;

/// hyper-based [`PushTransport`] over plain HTTP/1.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpConnector, PushBody>,
    bearer: Option<String>,
}

impl HyperTransport {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            client,
            bearer: None,
        }
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    async fn send(&self, method: Method, url: &Url, body: PushBody) -> TransportResult<PushResponse> {
        let mut builder = Request::builder()
            .method(method.clone())
            .uri(url.as_str())
            .header(CONTENT_TYPE, OCTET_STREAM);
        if let Some(token) = &self.bearer {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = builder.body(body)?;

        let resp = self.client.request(req).await?;
        let status = resp.status();
        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        debug!(%method, %url, %status, "push endpoint answered");

        let message = if status.is_success() || status.is_redirection() {
            String::new()
        } else {
            read_message(resp.into_body()).await?
        };

        Ok(PushResponse {
            status,
            location,
            message,
        })
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl PushTransport for HyperTransport {
    async fn probe(&self, url: &Url) -> TransportResult<PushResponse> {
        let body = Empty::<Bytes>::new()
            .map_err(|never| match never {})
            .boxed_unsync();
        self.send(Method::HEAD, url, body).await
    }

    async fn push(&self, url: &Url, body: ByteBody) -> TransportResult<PushResponse> {
        let frames = ReaderStream::new(body).map_ok(Frame::data);
        self.send(Method::POST, url, StreamBody::new(frames).boxed_unsync())
            .await
    }
}

async fn read_message(body: Incoming) -> TransportResult<String> {
    let bytes = body.collect().await?.to_bytes();
    Ok(String::from_utf8_lossy(&bytes).trim().to_string())
}
