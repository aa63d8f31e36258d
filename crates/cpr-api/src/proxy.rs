//! JSON-RPC forwarding handler.

use axum::Json;
use axum::extract::State;
use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, warn};

use cpr_rpc::{RpcRequest, RpcResponse};
use cpr_rpc::envelope::{INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, PARSE_ERROR};

use crate::ApiState;

/// POST /rpc/v0, /rpc/v1
///
/// Stream params are claimed locally and re-encoded against the upstream
/// push endpoint, so an unread stream is redirected straight to the node.
pub async fn forward_call(State(state): State<ApiState>, body: Bytes) -> Json<RpcResponse> {
    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(response) => return Json(response),
    };
    let id = request.id.unwrap_or(Value::Null);
    let method = request.method;

    let params = match state.decoder.decode(request.params).await {
        Ok(params) => params,
        Err(e) => {
            warn!(%method, error = %e, "decoding params failed");
            return Json(RpcResponse::error(id, INVALID_PARAMS, e.to_string()));
        }
    };

    match state.upstream.call(&method, params, id.clone()).await {
        Ok(mut response) => {
            response.id = id;
            Json(response)
        }
        Err(e) => {
            warn!(%method, error = %e, "upstream call failed");
            Json(RpcResponse::error(id, INTERNAL_ERROR, e.to_string()))
        }
    }
}

/// Split envelope failures into the JSON-RPC error they deserve.
///
/// Only positional params are forwarded; by-name params are answered
/// with `INVALID_PARAMS` under the caller's id.
fn parse_request(body: &[u8]) -> Result<RpcRequest, RpcResponse> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        debug!(error = %e, "malformed json-rpc request");
        RpcResponse::error(Value::Null, PARSE_ERROR, e.to_string())
    })?;
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    let by_name = value
        .get("params")
        .is_some_and(|params| !params.is_array() && !params.is_null());

    serde_json::from_value(value).map_err(|e| {
        if by_name {
            RpcResponse::error(id, INVALID_PARAMS, "params must be positional")
        } else {
            debug!(error = %e, "invalid json-rpc request");
            RpcResponse::error(id, INVALID_REQUEST, e.to_string())
        }
    })
}
