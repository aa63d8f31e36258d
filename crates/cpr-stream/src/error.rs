//! Stream handoff error types.

use std::io;

use thiserror::Error;
use uuid::Uuid;

/// Errors raised while encoding, handing off or delivering a stream.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("parsing push address {address}: {source}")]
    InvalidPushAddress {
        address: String,
        #[source]
        source: url::ParseError,
    },

    #[error("push address has no path to extend: {0}")]
    OpaquePushAddress(String),

    #[error("stream {0} already claimed")]
    AlreadyClaimed(Uuid),

    #[error("timed out handing off stream {0}")]
    HandoffTimeout(Uuid),

    #[error("stream {0} handoff rejected: receiver is gone")]
    HandoffRejected(Uuid),

    #[error("stream {0} handoff channel closed")]
    HandoffClosed(Uuid),

    #[error("push to {url} answered {status}: '{message}'")]
    PushRejected {
        url: String,
        status: u16,
        message: String,
    },

    #[error("redirect from {url} carried no location")]
    MissingLocation { url: String },

    #[error("parsing redirect location {location}: {source}")]
    InvalidLocation {
        location: String,
        #[source]
        source: url::ParseError,
    },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type StreamResult<T> = Result<T, StreamError>;

/// Failures of a single HTTP exchange with a push endpoint.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("building request: {0}")]
    Request(#[from] http::Error),

    #[error("sending request: {0}")]
    Client(#[from] hyper_util::client::legacy::Error),

    #[error("reading response: {0}")]
    Body(#[from] hyper::Error),

    #[error("stream body: {0}")]
    Io(#[from] io::Error),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Conditions a consumer observes when reading a [`StreamReceiver`](crate::StreamReceiver).
///
/// Reads surface these wrapped in an [`io::Error`]; use
/// [`ReceiveError::from_io`] to recover them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiveError {
    #[error("reader can't be read directly; marked as must-redirect to {target}")]
    MustRedirect { target: String },

    #[error("reader already closed or redirected")]
    Closed,
}

impl ReceiveError {
    /// Extract a `ReceiveError` carried inside an I/O error, if any.
    pub fn from_io(err: &io::Error) -> Option<&ReceiveError> {
        err.get_ref().and_then(|inner| inner.downcast_ref::<ReceiveError>())
    }
}

impl From<ReceiveError> for io::Error {
    fn from(err: ReceiveError) -> Self {
        io::Error::other(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receive_error_survives_io_wrapping() {
        let err: io::Error = ReceiveError::MustRedirect {
            target: "http://next/push/1".to_string(),
        }
        .into();

        assert_eq!(
            ReceiveError::from_io(&err),
            Some(&ReceiveError::MustRedirect {
                target: "http://next/push/1".to_string()
            })
        );
    }

    #[test]
    fn plain_io_error_is_not_a_receive_error() {
        let err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        assert!(ReceiveError::from_io(&err).is_none());
    }

    #[test]
    fn push_rejected_display() {
        let err = StreamError::PushRejected {
            url: "http://h/push/x".to_string(),
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "push to http://h/push/x answered 500: 'boom'");
    }
}
