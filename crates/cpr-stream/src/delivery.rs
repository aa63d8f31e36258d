//! Delivery agent — pushes one stream argument to its destination.
//!
//! Protocol, per stream:
//!
//! 1. HEAD the destination.
//! 2. `302 Found` → follow `Location` and probe again, as often as needed.
//! 3. `204 No Content` → the destination closed before needing data; stop.
//! 4. Any other non-200 → stop and report.
//! 5. `200 OK` → POST the bytes to the last resolved URL.
//!
//! The agent owns the stream body and drops it on every exit path. Nothing
//! is retried apart from following redirects.

use std::sync::Arc;

use http::StatusCode;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{StreamError, StreamResult};
use crate::receiver::ByteBody;
use crate::transport::PushTransport;

/// How a delivery ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The bytes were accepted at `url`.
    Delivered { url: Url },
    /// The destination at `url` answered 204; no bytes were sent.
    NotNeeded { url: Url },
}

/// Delivers one stream to a push endpoint.
pub struct DeliveryAgent<T> {
    transport: Arc<T>,
    url: Url,
    body: ByteBody,
}

impl<T: PushTransport> DeliveryAgent<T> {
    pub fn new(transport: Arc<T>, url: Url, body: ByteBody) -> Self {
        Self {
            transport,
            url,
            body,
        }
    }

    /// Run the agent as a background task. Failures are logged.
    pub fn spawn(self) -> JoinHandle<StreamResult<DeliveryOutcome>> {
        tokio::spawn(async move {
            let start = self.url.clone();
            let result = self.run().await;
            match &result {
                Ok(DeliveryOutcome::Delivered { url }) => {
                    debug!(%start, %url, "stream delivered");
                }
                Ok(DeliveryOutcome::NotNeeded { url }) => {
                    debug!(%start, %url, "stream not needed by destination");
                }
                Err(e) => warn!(%start, error = %e, "sending stream param failed"),
            }
            result
        })
    }

    /// Probe, follow redirects, then push.
    pub async fn run(self) -> StreamResult<DeliveryOutcome> {
        let Self {
            transport,
            mut url,
            body,
        } = self;

        loop {
            let resp = transport.probe(&url).await?;
            match resp.status {
                StatusCode::FOUND => {
                    let location = resp.location.ok_or_else(|| StreamError::MissingLocation {
                        url: url.to_string(),
                    })?;
                    let next = url.join(&location).map_err(|source| StreamError::InvalidLocation {
                        location: location.clone(),
                        source,
                    })?;
                    info!(from = %url, to = %next, "stream redirected");
                    url = next;
                }
                StatusCode::NO_CONTENT => return Ok(DeliveryOutcome::NotNeeded { url }),
                StatusCode::OK => break,
                status => {
                    return Err(StreamError::PushRejected {
                        url: url.to_string(),
                        status: status.as_u16(),
                        message: resp.message,
                    });
                }
            }
        }

        let resp = transport.push(&url, body).await?;
        if resp.status != StatusCode::OK {
            return Err(StreamError::PushRejected {
                url: url.to_string(),
                status: resp.status.as_u16(),
                message: resp.message,
            });
        }

        Ok(DeliveryOutcome::Delivered { url })
    }
}
