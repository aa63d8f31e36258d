//! JSON-RPC client for the upstream node's HTTP endpoint.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{Method, Request};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::envelope::{RpcRequest, RpcResponse};
use crate::error::{RpcError, RpcResult};
use crate::param::{Param, ParamEncoder, encode_params};

const JSON: &str = "application/json";

#[derive(Clone)]
pub struct RpcClient {
    endpoint: Url,
    bearer: Option<String>,
    http: Client<HttpConnector, Full<Bytes>>,
    encoder: Option<Arc<dyn ParamEncoder>>,
}

impl RpcClient {
    pub fn new(endpoint: &str) -> RpcResult<Self> {
        let endpoint = Url::parse(endpoint).map_err(|source| RpcError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            source,
        })?;
        Ok(Self {
            endpoint,
            bearer: None,
            http: Client::builder(TokioExecutor::new()).build_http(),
            encoder: None,
        })
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    /// Register the encoder used for every [`Param::Stream`].
    pub fn with_param_encoder(mut self, encoder: Arc<dyn ParamEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Encode `params` and send one call, returning the upstream response as is.
    pub async fn call(
        &self,
        method: &str,
        params: Vec<Param>,
        id: Value,
    ) -> RpcResult<RpcResponse> {
        let params = encode_params(params, self.encoder.as_deref())?;
        let request = RpcRequest::new(method, params, id);
        let payload = serde_json::to_vec(&request)?;

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.as_str())
            .header(CONTENT_TYPE, JSON);
        if let Some(token) = &self.bearer {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = builder.body(Full::new(Bytes::from(payload)))?;

        let resp = self.http.request(req).await?;
        let status = resp.status();
        let body = resp.into_body().collect().await?.to_bytes();
        debug!(method, %status, bytes = body.len(), "upstream answered");

        if !status.is_success() {
            return Err(RpcError::Status {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&body).trim().to_string(),
            });
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

impl fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("has_encoder", &self.encoder.is_some())
            .finish_non_exhaustive()
    }
}
