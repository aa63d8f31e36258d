//! cpr-rpc — JSON-RPC plumbing for the cpr gateway.
//!
//! The gateway does not know the remote node's methods. It forwards calls
//! as JSON and only cares about stream parameters:
//!
//! - **Serving side**: [`ParamDecoder`] spots stream descriptors in an
//!   inbound call and rebuilds them as [`cpr_stream::StreamArg`]s.
//! - **Calling side**: [`RpcClient`] runs every [`Param::Stream`] through
//!   its registered [`ParamEncoder`] before serializing the call.

pub mod client;
pub mod decode;
pub mod envelope;
pub mod error;
pub mod param;

pub use client::RpcClient;
pub use decode::ParamDecoder;
pub use envelope::{RpcErrorObject, RpcRequest, RpcResponse};
pub use error::{RpcError, RpcResult};
pub use param::{Param, ParamEncoder};
