//! cpr-api — HTTP surface of the cpr gateway.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/rpc/v0` | Forward a JSON-RPC call upstream |
//! | POST | `/rpc/v1` | Same as `/rpc/v0` |
//! | HEAD | `/rpc/streams/v0/push/{id}` | Probe whether stream `id` is wanted |
//! | POST | `/rpc/streams/v0/push/{id}` | Push the bytes of stream `id` |
//!
//! Every route sits behind [`auth::require_bearer`].

pub mod auth;
pub mod proxy;
pub mod push;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::middleware;
use axum::routing::{head, post};
use cpr_rpc::{ParamDecoder, RpcClient};
use cpr_stream::StreamRegistry;

/// Shared state for the JSON-RPC handlers.
#[derive(Clone)]
pub struct ApiState {
    pub decoder: ParamDecoder,
    pub upstream: Arc<RpcClient>,
}

/// Shared state for the push handler.
#[derive(Clone)]
pub struct PushState {
    pub registry: StreamRegistry,
    pub handoff_timeout: Duration,
}

/// Router serving only the push endpoint, without authentication.
pub fn push_router(registry: StreamRegistry, handoff_timeout: Duration) -> Router {
    let state = PushState {
        registry,
        handoff_timeout,
    };
    Router::new()
        .route(
            "/rpc/streams/v0/push/{id}",
            head(push::push_stream).post(push::push_stream),
        )
        .with_state(state)
}

/// Build the complete gateway router.
pub fn build_router(state: ApiState) -> Router {
    let push = push_router(
        state.decoder.registry().clone(),
        state.decoder.handoff_timeout(),
    );

    Router::new()
        .route("/rpc/v0", post(proxy::forward_call))
        .route("/rpc/v1", post(proxy::forward_call))
        .with_state(state)
        .merge(push)
        .layer(middleware::from_fn(auth::require_bearer))
}
