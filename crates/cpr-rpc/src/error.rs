//! RPC error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("invalid rpc endpoint {endpoint}: {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("stream parameter without a registered encoder")]
    NoStreamEncoder,

    #[error("stream error: {0}")]
    Stream(#[from] cpr_stream::StreamError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("building request: {0}")]
    Request(#[from] http::Error),

    #[error("sending request: {0}")]
    Client(#[from] hyper_util::client::legacy::Error),

    #[error("reading response: {0}")]
    Body(#[from] hyper::Error),

    #[error("upstream answered {status}: '{message}'")]
    Status { status: u16, message: String },
}

pub type RpcResult<T> = Result<T, RpcError>;
