//! Push endpoint handler.
//!
//! HEAD is a probe, POST carries the stream body. Each arrival becomes a
//! [`Handoff`] for the stream's receiver; the HTTP status reports the
//! outcome that receiver chose.

use std::io;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures_util::TryStreamExt;
use tokio::sync::oneshot;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};
use uuid::Uuid;

use cpr_stream::{Handoff, Outcome};

use crate::PushState;

/// HEAD|POST /rpc/streams/v0/push/{id}
pub async fn push_stream(
    State(state): State<PushState>,
    method: Method,
    Path(id): Path<String>,
    body: Body,
) -> Response {
    let Ok(id) = Uuid::parse_str(&id) else {
        return (StatusCode::BAD_REQUEST, "invalid stream id").into_response();
    };

    let is_probe = method == Method::HEAD;
    let (handoff, outcome) = if is_probe {
        Handoff::probe()
    } else {
        let bytes = body.into_data_stream().map_err(io::Error::other);
        Handoff::with_body(Box::new(StreamReader::new(Box::pin(bytes))))
    };

    if let Err(e) = state
        .registry
        .deliver(id, handoff, state.handoff_timeout)
        .await
    {
        warn!(stream_id = %id, %method, error = %e, "stream handoff failed");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    answer(id, is_probe, outcome.await)
}

fn answer(
    id: Uuid,
    is_probe: bool,
    outcome: Result<Outcome, oneshot::error::RecvError>,
) -> Response {
    match (outcome, is_probe) {
        // Receiver finished without a message: drained or no longer wanted.
        (Err(_), true) => StatusCode::NO_CONTENT.into_response(),
        (Err(_), false) => StatusCode::OK.into_response(),
        (Ok(Outcome::Ready), true) => StatusCode::OK.into_response(),
        (Ok(Outcome::Redirect(to)), true) => {
            debug!(stream_id = %id, target = %to, "redirecting stream sender");
            (StatusCode::FOUND, [(header::LOCATION, to)]).into_response()
        }
        (Ok(Outcome::Error(msg)), _) => {
            warn!(stream_id = %id, is_probe, error = %msg, "stream receiver failed");
            (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response()
        }
        (Ok(unexpected), false) => {
            warn!(stream_id = %id, outcome = ?unexpected, "unexpected outcome for stream body");
            (StatusCode::INTERNAL_SERVER_ERROR, "unexpected stream outcome").into_response()
        }
    }
}
