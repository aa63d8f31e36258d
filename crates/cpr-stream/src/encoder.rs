//! Calling-side stream parameter encoder.
//!
//! Turns a [`StreamArg`] into the [`StreamDescriptor`] that travels in the
//! RPC payload and starts whatever delivery the stream needs. Encoding
//! returns as soon as delivery is started; it never waits for the transfer.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::delivery::{DeliveryAgent, DeliveryOutcome};
use crate::descriptor::StreamDescriptor;
use crate::error::StreamResult;
use crate::push_url::stream_url;
use crate::receiver::{ByteBody, StreamReceiver};
use crate::transport::PushTransport;

/// A placeholder stream that declares a length and yields no bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NullReader {
    len: u64,
}

impl NullReader {
    pub fn new(len: u64) -> Self {
        Self { len }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl AsyncRead for NullReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// A stream-typed RPC argument.
pub enum StreamArg {
    /// Reserves `len` bytes without sending any.
    Null(NullReader),
    /// Any local byte source.
    Reader(ByteBody),
    /// A stream received from an upstream hop; eligible for redirect.
    Receiver(StreamReceiver),
}

impl StreamArg {
    pub fn null(len: u64) -> Self {
        Self::Null(NullReader::new(len))
    }

    pub fn reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self::Reader(Box::new(reader))
    }
}

impl From<StreamReceiver> for StreamArg {
    fn from(receiver: StreamReceiver) -> Self {
        Self::Receiver(receiver)
    }
}

impl From<NullReader> for StreamArg {
    fn from(reader: NullReader) -> Self {
        Self::Null(reader)
    }
}

impl fmt::Debug for StreamArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null(r) => f.debug_tuple("Null").field(r).finish(),
            Self::Reader(_) => f.write_str("Reader(..)"),
            Self::Receiver(r) => f.debug_tuple("Receiver").field(r).finish(),
        }
    }
}

/// What the encoder started for a stream.
#[derive(Debug)]
pub enum Delivery {
    /// Nothing to send.
    Inline,
    /// The upstream sender was told to deliver straight to this URL.
    Redirected(Url),
    /// A delivery agent is pushing the bytes.
    Agent(JoinHandle<StreamResult<DeliveryOutcome>>),
}

/// A descriptor plus the delivery started for it.
#[derive(Debug)]
pub struct EncodedStream {
    pub descriptor: StreamDescriptor,
    pub delivery: Delivery,
}

/// Encodes stream arguments against one push base address.
pub struct StreamEncoder<T> {
    push_base: String,
    transport: Arc<T>,
}

impl<T: PushTransport> StreamEncoder<T> {
    pub fn new(push_base: impl Into<String>, transport: Arc<T>) -> Self {
        Self {
            push_base: push_base.into(),
            transport,
        }
    }

    pub fn push_base(&self) -> &str {
        &self.push_base
    }

    /// Encode one stream argument.
    ///
    /// Placeholders become `NoData` with no network action. Everything else
    /// gets a fresh stream id; a [`StreamReceiver`] is redirected to the new
    /// push URL when still possible, otherwise a [`DeliveryAgent`] is spawned.
    /// A malformed push base fails here, before anything is sent.
    pub fn encode(&self, arg: StreamArg) -> StreamResult<EncodedStream> {
        match arg {
            StreamArg::Null(reader) => Ok(EncodedStream {
                descriptor: StreamDescriptor::no_data(reader.len()),
                delivery: Delivery::Inline,
            }),
            StreamArg::Receiver(receiver) => self.encode_receiver(receiver),
            StreamArg::Reader(body) => {
                let id = Uuid::new_v4();
                let url = stream_url(&self.push_base, &id)?;
                Ok(self.spawn_agent(id, url, body))
            }
        }
    }

    fn encode_receiver(&self, receiver: StreamReceiver) -> StreamResult<EncodedStream> {
        let id = Uuid::new_v4();
        let url = stream_url(&self.push_base, &id)?;

        // Collapse the chain: let the original sender push straight to the next hop.
        if receiver.redirect(url.as_str()) {
            debug!(upstream = ?receiver.id(), stream_id = %id, %url, "redirected upstream stream");
            return Ok(EncodedStream {
                descriptor: StreamDescriptor::push(id),
                delivery: Delivery::Redirected(url),
            });
        }

        debug!(upstream = ?receiver.id(), stream_id = %id, "redirect refused; proxying stream bytes");
        Ok(self.spawn_agent(id, url, Box::new(receiver)))
    }

    fn spawn_agent(&self, id: Uuid, url: Url, body: ByteBody) -> EncodedStream {
        debug!(stream_id = %id, %url, "starting stream delivery");
        let handle = DeliveryAgent::new(self.transport.clone(), url, body).spawn();
        EncodedStream {
            descriptor: StreamDescriptor::push(id),
            delivery: Delivery::Agent(handle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use http::StatusCode;
    use tokio::io::AsyncReadExt;
    use tokio::sync::mpsc;

    use crate::delivery::tests::ScriptedTransport;
    use crate::descriptor::StreamKind;
    use crate::error::StreamError;
    use crate::receiver::{Handoff, Outcome, ReceiverState};
    use crate::transport::PushResponse;

    const BASE: &str = "http://node:2345/rpc/streams/v0/push";

    fn encoder(transport: &Arc<ScriptedTransport>) -> StreamEncoder<ScriptedTransport> {
        StreamEncoder::new(BASE, transport.clone())
    }

    #[tokio::test]
    async fn null_reader_encodes_inline_without_network() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let encoded = encoder(&transport).encode(StreamArg::null(4096)).unwrap();

        assert_eq!(encoded.descriptor, StreamDescriptor::no_data(4096));
        assert!(matches!(encoded.delivery, Delivery::Inline));
        tokio::task::yield_now().await;
        assert_eq!(transport.probe_count(), 0);
        assert_eq!(transport.push_count(), 0);
    }

    #[tokio::test]
    async fn null_reader_reads_nothing() {
        let mut reader = NullReader::new(10);
        let mut out = Vec::new();
        assert_eq!(reader.read_to_end(&mut out).await.unwrap(), 0);
        assert_eq!(reader.len(), 10);
    }

    #[tokio::test]
    async fn reader_spawns_agent_pushing_to_fresh_id() {
        let transport = Arc::new(ScriptedTransport::new([PushResponse::new(StatusCode::OK)]));
        let encoded = encoder(&transport)
            .encode(StreamArg::reader(Cursor::new(b"12345".to_vec())))
            .unwrap();

        assert_eq!(encoded.descriptor.kind(), StreamKind::PushStream);
        let id = encoded.descriptor.stream_id().unwrap();

        let Delivery::Agent(handle) = encoded.delivery else {
            panic!("expected a delivery agent");
        };
        let outcome = handle.await.unwrap().unwrap();
        let expected = Url::parse(&format!("{BASE}/{id}")).unwrap();
        assert_eq!(outcome, DeliveryOutcome::Delivered { url: expected.clone() });
        assert_eq!(
            transport.pushes.lock().unwrap()[0],
            (expected, b"12345".to_vec())
        );
    }

    #[tokio::test]
    async fn each_encode_uses_a_new_id() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let enc = encoder(&transport);
        let a = enc.encode(StreamArg::reader(Cursor::new(Vec::new()))).unwrap();
        let b = enc.encode(StreamArg::reader(Cursor::new(Vec::new()))).unwrap();
        assert_ne!(a.descriptor.stream_id(), b.descriptor.stream_id());
    }

    #[tokio::test]
    async fn malformed_push_base_fails_before_network() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let enc = StreamEncoder::new("::not a url::", transport.clone());

        let err = enc
            .encode(StreamArg::reader(Cursor::new(b"x".to_vec())))
            .unwrap_err();
        assert!(matches!(err, StreamError::InvalidPushAddress { .. }));
        tokio::task::yield_now().await;
        assert_eq!(transport.probe_count(), 0);
    }

    #[tokio::test]
    async fn unread_receiver_is_redirected_without_agent() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let (_handoffs, rx) = mpsc::channel(1);
        let (probe, probe_outcome) = Handoff::probe();
        let receiver = StreamReceiver::new(probe, rx);

        let encoded = encoder(&transport).encode(receiver.into()).unwrap();
        let id = encoded.descriptor.stream_id().unwrap();
        let Delivery::Redirected(url) = encoded.delivery else {
            panic!("expected a redirect");
        };
        assert_eq!(url.as_str(), format!("{BASE}/{id}"));
        assert_eq!(
            probe_outcome.await.unwrap(),
            Outcome::Redirect(url.to_string())
        );

        tokio::task::yield_now().await;
        assert_eq!(transport.probe_count(), 0);
    }

    #[tokio::test]
    async fn receiver_without_listener_falls_back_to_agent() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let (_handoffs, rx) = mpsc::channel(1);
        let (probe, probe_outcome) = Handoff::probe();
        drop(probe_outcome);
        let receiver = StreamReceiver::new(probe, rx);

        let encoded = encoder(&transport).encode(receiver.into()).unwrap();
        let Delivery::Agent(handle) = encoded.delivery else {
            panic!("expected a delivery agent");
        };
        // Nothing answers the fresh push URL, so the agent fails fast.
        assert!(handle.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn bound_receiver_is_proxied_by_agent() {
        let transport = Arc::new(ScriptedTransport::new([PushResponse::new(StatusCode::OK)]));
        let (_handoffs, rx) = mpsc::channel(1);
        let (push, push_outcome) = Handoff::with_body(Box::new(Cursor::new(b"relay".to_vec())));
        let receiver = StreamReceiver::new(push, rx);
        assert_eq!(receiver.state(), ReceiverState::Bound);

        let encoded = encoder(&transport).encode(receiver.into()).unwrap();
        let Delivery::Agent(handle) = encoded.delivery else {
            panic!("expected a delivery agent");
        };
        handle.await.unwrap().unwrap();

        assert_eq!(transport.pushes.lock().unwrap()[0].1, b"relay".to_vec());
        // Upstream push completes once the relayed body is drained.
        assert!(push_outcome.await.is_err());
    }
}
