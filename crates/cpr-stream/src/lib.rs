//! cpr-stream — out-of-band stream handoff for the cpr RPC gateway.
//!
//! Stream arguments never travel inside an RPC payload. The calling side
//! swaps each one for a [`StreamDescriptor`] and pushes the bytes over a
//! separate HTTP channel; the serving side hands the RPC method a
//! [`StreamReceiver`] that blocks until those bytes arrive.
//!
//! # Architecture
//!
//! ```text
//! calling side                         serving side
//! ────────────                         ────────────
//! StreamEncoder                        push handler (HEAD/POST)
//!   ├── NullReader → NoData{len}         └── StreamRegistry::deliver(Handoff)
//!   ├── StreamReceiver → RedirectGate             │
//!   └── DeliveryAgent ──HEAD/302/204/200──►  StreamRegistry::accept
//!            └──────────── POST bytes ───►     └── StreamReceiver (AsyncRead)
//! ```
//!
//! # Chain collapsing
//!
//! When an intermediate hop re-encodes a [`StreamReceiver`] it received from
//! upstream, the encoder first tries [`RedirectGate::redirect`]. If the
//! receiver has not been read yet, the original sender's probe is answered
//! with a 302 pointing at the next hop and the bytes skip this hop entirely.
//! Otherwise the hop falls back to proxying the bytes with its own
//! [`DeliveryAgent`].

pub mod delivery;
pub mod descriptor;
pub mod encoder;
pub mod error;
pub mod push_url;
pub mod receiver;
pub mod registry;
pub mod transport;

pub use delivery::{DeliveryAgent, DeliveryOutcome};
pub use descriptor::{StreamDescriptor, StreamKind};
pub use encoder::{Delivery, EncodedStream, NullReader, StreamArg, StreamEncoder};
pub use error::{ReceiveError, StreamError, StreamResult, TransportError, TransportResult};
pub use push_url::{push_url_for, stream_url};
pub use receiver::{ByteBody, Handoff, Outcome, ReceiverState, RedirectGate, StreamReceiver};
pub use registry::StreamRegistry;
pub use transport::{HyperTransport, PushResponse, PushTransport};
