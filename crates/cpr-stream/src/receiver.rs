//! Serving-side stand-in for a stream argument.
//!
//! A [`StreamReceiver`] is handed to the RPC method in place of the real
//! stream. Two actors touch it: the method reading it, and the push handler
//! that supplies a [`Handoff`] and waits for an [`Outcome`].
//!
//! All transitions go through one mutex-guarded state machine:
//!
//! ```text
//!            first read (begin gate)          handoff with body
//! Unbound ───────────────────────────► AwaitingBinding ──────────► Bound
//!    │  emits Outcome::Ready                                         │
//!    │ redirect (only while Unbound, before begin)                   │ EOF
//!    ▼                                                               ▼
//! Redirected ◄── emits Outcome::Redirect                 completion closed
//!
//! any state ──close()──► Closed
//! ```
//!
//! The completion signal is a `oneshot::Sender<Outcome>` held in an
//! `Option`; taking it out is the completion gate, so it fires at most once
//! whichever path gets there first. A dropped sender with no message tells
//! the push handler "done" (204 on a probe, 200 on a body push).

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ReceiveError;
use crate::registry::SlotGuard;

/// A boxed byte source used as a stream body.
pub type ByteBody = Box<dyn AsyncRead + Send + Unpin>;

/// What the push handler learns from a receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The consumer started reading; send the body now.
    Ready,
    /// Don't send anything here; fetch from this URL instead.
    Redirect(String),
    /// Abort, something failed on the consumer side.
    Error(String),
}

/// One arrival at the push endpoint for a stream.
///
/// Probes carry no body, data pushes carry the request body. The outcome
/// sender is the completion signal for that arrival.
pub struct Handoff {
    body: Option<ByteBody>,
    outcome: oneshot::Sender<Outcome>,
    taken: Option<oneshot::Sender<()>>,
}

impl Handoff {
    pub fn new(body: Option<ByteBody>) -> (Self, oneshot::Receiver<Outcome>) {
        let (outcome, rx) = oneshot::channel();
        let handoff = Self {
            body,
            outcome,
            taken: None,
        };
        (handoff, rx)
    }

    /// A bodyless arrival (HEAD).
    pub fn probe() -> (Self, oneshot::Receiver<Outcome>) {
        Self::new(None)
    }

    /// An arrival carrying the stream bytes (POST).
    pub fn with_body(body: ByteBody) -> (Self, oneshot::Receiver<Outcome>) {
        Self::new(Some(body))
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Resolve the returned receiver once a receiver takes this handoff.
    pub(crate) fn notify_on_take(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.taken = Some(tx);
        rx
    }

    fn take(mut self) -> (Option<ByteBody>, oneshot::Sender<Outcome>) {
        if let Some(taken) = self.taken.take() {
            let _ = taken.send(());
        }
        (self.body, self.outcome)
    }
}

impl fmt::Debug for Handoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handoff")
            .field("has_body", &self.body.is_some())
            .finish_non_exhaustive()
    }
}

/// Lifecycle state of a [`StreamReceiver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverState {
    Unbound,
    AwaitingBinding,
    Bound,
    Redirected(String),
    Closed,
}

struct Gates {
    state: ReceiverState,
    /// Begin gate; also set by redirect and close so begin never runs after them.
    begun: bool,
    /// Completion gate; `None` once finalized.
    done: Option<oneshot::Sender<Outcome>>,
}

impl Gates {
    fn finalize(&mut self, outcome: Option<Outcome>) {
        if let (Some(done), Some(outcome)) = (self.done.take(), outcome) {
            let _ = done.send(outcome);
        }
    }

    /// Returns true when the caller must now wait for a handoff.
    fn begin(&mut self) -> bool {
        if std::mem::replace(&mut self.begun, true) {
            return false;
        }
        match &self.state {
            ReceiverState::Redirected(target) => {
                let outcome = Outcome::Redirect(target.clone());
                self.finalize(Some(outcome));
                false
            }
            ReceiverState::Unbound => {
                let signalled = self
                    .done
                    .take()
                    .is_some_and(|done| done.send(Outcome::Ready).is_ok());
                if signalled {
                    self.state = ReceiverState::AwaitingBinding;
                } else {
                    // The probe that created us is gone; nobody will push.
                    self.state = ReceiverState::Closed;
                }
                signalled
            }
            _ => false,
        }
    }

    fn redirect(&mut self, to: &str) -> bool {
        if self.begun || self.state != ReceiverState::Unbound || self.done.is_none() {
            return false;
        }
        self.begun = true;
        let delivered = self
            .done
            .take()
            .is_some_and(|done| done.send(Outcome::Redirect(to.to_string())).is_ok());
        self.state = if delivered {
            ReceiverState::Redirected(to.to_string())
        } else {
            // Nobody is left to follow the redirect.
            ReceiverState::Closed
        };
        delivered
    }

    fn close(&mut self) {
        self.begun = true;
        self.finalize(None);
        if !matches!(self.state, ReceiverState::Redirected(_)) {
            self.state = ReceiverState::Closed;
        }
    }
}

fn lock(gates: &Mutex<Gates>) -> MutexGuard<'_, Gates> {
    gates.lock().expect("receiver gates lock")
}

/// Read-blocking stand-in for a stream argument on the serving side.
///
/// The first read emits [`Outcome::Ready`] to the probe that created the
/// receiver and suspends until a handoff carrying the body arrives. The
/// first such handoff is authoritative; the receiver is never re-bound.
pub struct StreamReceiver {
    id: Option<Uuid>,
    gates: Arc<Mutex<Gates>>,
    body: Option<ByteBody>,
    handoffs: Option<mpsc::Receiver<Handoff>>,
    eof: bool,
    _slot: Option<SlotGuard>,
}

impl StreamReceiver {
    /// Build a receiver from the first arrival and the channel later arrivals come on.
    pub fn new(first: Handoff, handoffs: mpsc::Receiver<Handoff>) -> Self {
        Self::from_parts(None, first, handoffs, None)
    }

    pub(crate) fn from_parts(
        id: Option<Uuid>,
        first: Handoff,
        handoffs: mpsc::Receiver<Handoff>,
        slot: Option<SlotGuard>,
    ) -> Self {
        let (body, done) = first.take();
        // A bound receiver never takes another handoff.
        let (state, handoffs) = if body.is_some() {
            (ReceiverState::Bound, None)
        } else {
            (ReceiverState::Unbound, Some(handoffs))
        };
        Self {
            id,
            gates: Arc::new(Mutex::new(Gates {
                state,
                begun: false,
                done: Some(done),
            })),
            body,
            handoffs,
            eof: false,
            _slot: slot,
        }
    }

    pub fn id(&self) -> Option<Uuid> {
        self.id
    }

    pub fn state(&self) -> ReceiverState {
        lock(&self.gates).state.clone()
    }

    /// A handle that can redirect this receiver from another task.
    pub fn gate(&self) -> RedirectGate {
        RedirectGate {
            gates: self.gates.clone(),
        }
    }

    /// See [`RedirectGate::redirect`].
    pub fn redirect(&self, to: &str) -> bool {
        let accepted = lock(&self.gates).redirect(to);
        if accepted {
            debug!(stream_id = ?self.id, target = to, "stream redirected");
        }
        accepted
    }

    /// Finalize the receiver. Idempotent.
    ///
    /// A receiver closed before its first read never emits
    /// [`Outcome::Ready`]; its probe is answered "done" instead.
    pub fn close(&mut self) {
        lock(&self.gates).close();
        self.body = None;
        self.handoffs = None;
    }

    fn poll_handoff(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        let next = match self.handoffs.as_mut() {
            Some(handoffs) => ready!(handoffs.poll_recv(cx)),
            None => None,
        };
        self.handoffs = None;

        let mut gates = lock(&self.gates);
        match next.map(Handoff::take) {
            Some((Some(body), done)) => {
                debug!(stream_id = ?self.id, "stream body bound");
                gates.done = Some(done);
                gates.state = ReceiverState::Bound;
                self.body = Some(body);
            }
            Some((None, done)) => {
                warn!(stream_id = ?self.id, "handoff after ready carried no body");
                gates.done = Some(done);
                gates.state = ReceiverState::Closed;
                gates.finalize(Some(Outcome::Error("expected a stream body".to_string())));
            }
            None => {
                debug!(stream_id = ?self.id, "handoff channel closed before binding");
                gates.state = ReceiverState::Closed;
            }
        }
        Poll::Ready(())
    }
}

impl AsyncRead for StreamReceiver {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        let awaiting = {
            let mut gates = lock(&this.gates);
            if gates.begin() {
                debug!(stream_id = ?this.id, "stream ready to receive");
            }
            gates.state == ReceiverState::AwaitingBinding
        };
        if awaiting {
            ready!(this.poll_handoff(cx));
        }

        if this.eof {
            return Poll::Ready(Ok(()));
        }

        if let ReceiverState::Redirected(target) = &lock(&this.gates).state {
            return Poll::Ready(Err(ReceiveError::MustRedirect {
                target: target.clone(),
            }
            .into()));
        }

        let Some(body) = this.body.as_mut() else {
            return Poll::Ready(Err(ReceiveError::Closed.into()));
        };

        let before = buf.filled().len();
        match ready!(Pin::new(body).poll_read(cx, buf)) {
            Ok(()) => {
                if buf.filled().len() == before && buf.remaining() > 0 {
                    this.eof = true;
                    lock(&this.gates).finalize(None);
                }
                Poll::Ready(Ok(()))
            }
            Err(e) => {
                lock(&this.gates).finalize(Some(Outcome::Error(e.to_string())));
                Poll::Ready(Err(e))
            }
        }
    }
}

impl Drop for StreamReceiver {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for StreamReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamReceiver")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("eof", &self.eof)
            .finish()
    }
}

/// Redirect handle for a [`StreamReceiver`].
#[derive(Clone)]
pub struct RedirectGate {
    gates: Arc<Mutex<Gates>>,
}

impl RedirectGate {
    /// Ask the original sender to deliver to `to` instead of this hop.
    ///
    /// Accepted at most once, and only while the receiver is unbound and
    /// unread. Once the first read has emitted [`Outcome::Ready`] the sender
    /// is already committed to pushing here, so this returns `false` and the
    /// caller must proxy the bytes itself.
    pub fn redirect(&self, to: &str) -> bool {
        lock(&self.gates).redirect(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::AsyncReadExt;
    use tokio::sync::oneshot::error::TryRecvError;

    fn probed() -> (
        StreamReceiver,
        oneshot::Receiver<Outcome>,
        mpsc::Sender<Handoff>,
    ) {
        let (tx, rx) = mpsc::channel(1);
        let (probe, outcome) = Handoff::probe();
        (StreamReceiver::new(probe, rx), outcome, tx)
    }

    fn body(bytes: &'static [u8]) -> ByteBody {
        Box::new(Cursor::new(bytes))
    }

    fn receive_error(err: &io::Error) -> ReceiveError {
        ReceiveError::from_io(err).cloned().expect("receive error")
    }

    #[tokio::test]
    async fn first_read_signals_ready_then_reads_bound_body() {
        let (mut receiver, probe_outcome, handoffs) = probed();

        let reader = tokio::spawn(async move {
            let mut out = Vec::new();
            receiver.read_to_end(&mut out).await.map(|_| out)
        });

        assert_eq!(probe_outcome.await.unwrap(), Outcome::Ready);

        let (push, push_outcome) = Handoff::with_body(body(b"hello"));
        handoffs.send(push).await.unwrap();

        assert_eq!(reader.await.unwrap().unwrap(), b"hello");
        // Completion closes without a message once the body is drained.
        assert!(push_outcome.await.is_err());
    }

    #[tokio::test]
    async fn receiver_created_bound_reads_directly() {
        let (_tx, rx) = mpsc::channel(1);
        let (push, mut outcome) = Handoff::with_body(body(b"abc"));
        let mut receiver = StreamReceiver::new(push, rx);
        assert_eq!(receiver.state(), ReceiverState::Bound);

        let mut out = Vec::new();
        receiver.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"abc");
        assert_eq!(outcome.try_recv(), Err(TryRecvError::Closed));
    }

    #[tokio::test]
    async fn reads_after_eof_keep_returning_eof() {
        let (_tx, rx) = mpsc::channel(1);
        let (push, _outcome) = Handoff::with_body(body(b"x"));
        let mut receiver = StreamReceiver::new(push, rx);

        let mut out = Vec::new();
        receiver.read_to_end(&mut out).await.unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(receiver.read(&mut buf).await.unwrap(), 0);
        receiver.close();
        assert_eq!(receiver.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn redirect_before_read_succeeds() {
        let (mut receiver, mut probe_outcome, _handoffs) = probed();

        assert!(receiver.redirect("http://next/push/abc"));
        assert_eq!(
            probe_outcome.try_recv().unwrap(),
            Outcome::Redirect("http://next/push/abc".to_string())
        );
        assert_eq!(
            receiver.state(),
            ReceiverState::Redirected("http://next/push/abc".to_string())
        );

        let mut buf = [0u8; 4];
        let err = receiver.read(&mut buf).await.unwrap_err();
        assert_eq!(
            receive_error(&err),
            ReceiveError::MustRedirect {
                target: "http://next/push/abc".to_string()
            }
        );
    }

    #[tokio::test]
    async fn redirect_is_accepted_once() {
        let (receiver, _outcome, _handoffs) = probed();
        let gate = receiver.gate();
        assert!(gate.redirect("http://a"));
        assert!(!gate.redirect("http://b"));
        assert_eq!(receiver.state(), ReceiverState::Redirected("http://a".to_string()));
    }

    #[tokio::test]
    async fn redirect_after_read_began_is_rejected() {
        let (mut receiver, probe_outcome, handoffs) = probed();
        let gate = receiver.gate();

        let reader = tokio::spawn(async move {
            let mut out = Vec::new();
            receiver.read_to_end(&mut out).await.map(|_| out)
        });

        assert_eq!(probe_outcome.await.unwrap(), Outcome::Ready);
        assert!(!gate.redirect("http://elsewhere"));

        let (push, _push_outcome) = Handoff::with_body(body(b"data"));
        handoffs.send(push).await.unwrap();
        assert_eq!(reader.await.unwrap().unwrap(), b"data");
    }

    #[tokio::test]
    async fn redirect_rejected_when_bound() {
        let (_tx, rx) = mpsc::channel(1);
        let (push, mut outcome) = Handoff::with_body(body(b"abc"));
        let receiver = StreamReceiver::new(push, rx);

        assert!(!receiver.redirect("http://elsewhere"));
        assert_eq!(outcome.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test]
    async fn close_before_read_never_signals_ready() {
        let (mut receiver, mut probe_outcome, _handoffs) = probed();
        receiver.close();
        receiver.close();

        assert_eq!(probe_outcome.try_recv(), Err(TryRecvError::Closed));
        assert_eq!(receiver.state(), ReceiverState::Closed);

        let mut buf = [0u8; 4];
        let err = receiver.read(&mut buf).await.unwrap_err();
        assert_eq!(receive_error(&err), ReceiveError::Closed);
    }

    #[tokio::test]
    async fn drop_closes_receiver() {
        let (receiver, mut probe_outcome, _handoffs) = probed();
        drop(receiver);
        assert_eq!(probe_outcome.try_recv(), Err(TryRecvError::Closed));
    }

    #[tokio::test]
    async fn redirect_after_close_is_rejected() {
        let (mut receiver, _outcome, _handoffs) = probed();
        receiver.close();
        assert!(!receiver.redirect("http://elsewhere"));
    }

    #[tokio::test]
    async fn close_after_redirect_keeps_redirect_condition() {
        let (mut receiver, _outcome, _handoffs) = probed();
        assert!(receiver.redirect("http://next"));
        receiver.close();

        let mut buf = [0u8; 4];
        let err = receiver.read(&mut buf).await.unwrap_err();
        assert!(matches!(
            receive_error(&err),
            ReceiveError::MustRedirect { .. }
        ));
    }

    #[tokio::test]
    async fn read_fails_when_probe_went_away() {
        let (mut receiver, probe_outcome, _handoffs) = probed();
        drop(probe_outcome);

        let mut buf = [0u8; 4];
        let err = receiver.read(&mut buf).await.unwrap_err();
        assert_eq!(receive_error(&err), ReceiveError::Closed);
    }

    #[tokio::test]
    async fn redirect_refused_when_listener_went_away() {
        let (mut receiver, probe_outcome, _handoffs) = probed();
        drop(probe_outcome);

        assert!(!receiver.redirect("http://node/push/x"));
        assert_eq!(receiver.state(), ReceiverState::Closed);

        let mut buf = [0u8; 4];
        let err = receiver.read(&mut buf).await.unwrap_err();
        assert_eq!(receive_error(&err), ReceiveError::Closed);
    }

    #[tokio::test]
    async fn handoff_channel_closing_fails_the_read() {
        let (mut receiver, probe_outcome, handoffs) = probed();

        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 4];
            receiver.read(&mut buf).await
        });
        assert_eq!(probe_outcome.await.unwrap(), Outcome::Ready);
        drop(handoffs);

        let err = reader.await.unwrap().unwrap_err();
        assert_eq!(receive_error(&err), ReceiveError::Closed);
    }

    #[tokio::test]
    async fn bodyless_handoff_after_ready_is_an_error_outcome() {
        let (mut receiver, probe_outcome, handoffs) = probed();

        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 4];
            receiver.read(&mut buf).await
        });
        assert_eq!(probe_outcome.await.unwrap(), Outcome::Ready);

        let (second_probe, second_outcome) = Handoff::probe();
        handoffs.send(second_probe).await.unwrap();

        assert!(matches!(second_outcome.await, Ok(Outcome::Error(_))));
        let err = reader.await.unwrap().unwrap_err();
        assert_eq!(receive_error(&err), ReceiveError::Closed);
    }

    #[tokio::test]
    async fn body_error_finalizes_with_error_outcome() {
        struct Failing;
        impl AsyncRead for Failing {
            fn poll_read(
                self: Pin<&mut Self>,
                _cx: &mut Context<'_>,
                _buf: &mut ReadBuf<'_>,
            ) -> Poll<io::Result<()>> {
                Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")))
            }
        }

        let (_tx, rx) = mpsc::channel(1);
        let (push, outcome) = Handoff::with_body(Box::new(Failing));
        let mut receiver = StreamReceiver::new(push, rx);

        let mut buf = [0u8; 4];
        let err = receiver.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert!(matches!(outcome.await, Ok(Outcome::Error(_))));
    }

    #[tokio::test]
    async fn racing_redirects_and_reads_settle_exactly_once() {
        for _ in 0..64 {
            let (mut receiver, probe_outcome, handoffs) = probed();
            let gate = receiver.gate();

            let reader = tokio::spawn(async move {
                let mut out = Vec::new();
                let res = receiver.read_to_end(&mut out).await;
                (res, out)
            });
            let redirector = tokio::spawn(async move { gate.redirect("http://next") });

            let redirected = redirector.await.unwrap();
            let signal = probe_outcome.await.unwrap();

            if redirected {
                assert_eq!(signal, Outcome::Redirect("http://next".to_string()));
                let (res, _) = reader.await.unwrap();
                let err = res.unwrap_err();
                assert!(matches!(
                    receive_error(&err),
                    ReceiveError::MustRedirect { .. }
                ));
            } else {
                assert_eq!(signal, Outcome::Ready);
                let (push, _push_outcome) = Handoff::with_body(body(b"ok"));
                handoffs.send(push).await.unwrap();
                let (res, out) = reader.await.unwrap();
                res.unwrap();
                assert_eq!(out, b"ok");
            }
        }
    }
}
