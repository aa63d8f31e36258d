//! Typed RPC parameters and the stream encoding hook.

use serde_json::Value;
use tracing::debug;

use cpr_stream::{
    Delivery, PushTransport, StreamArg, StreamDescriptor, StreamEncoder, StreamResult,
};

use crate::error::{RpcError, RpcResult};

/// One positional parameter of an outgoing or decoded call.
#[derive(Debug)]
pub enum Param {
    Value(Value),
    Stream(StreamArg),
}

impl From<Value> for Param {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<StreamArg> for Param {
    fn from(arg: StreamArg) -> Self {
        Self::Stream(arg)
    }
}

/// Replaces a stream argument with the descriptor that goes on the wire.
///
/// Delivery, if any, keeps running after this returns.
pub trait ParamEncoder: Send + Sync {
    fn encode_stream(&self, arg: StreamArg) -> StreamResult<StreamDescriptor>;
}

impl<T: PushTransport> ParamEncoder for StreamEncoder<T> {
    fn encode_stream(&self, arg: StreamArg) -> StreamResult<StreamDescriptor> {
        let encoded = self.encode(arg)?;
        // Agents run detached and log their own failures.
        if let Delivery::Redirected(url) = &encoded.delivery {
            debug!(%url, "stream parameter redirected");
        }
        Ok(encoded.descriptor)
    }
}

/// Serialize `params`, encoding stream arguments with `encoder`.
pub fn encode_params(
    params: Vec<Param>,
    encoder: Option<&dyn ParamEncoder>,
) -> RpcResult<Vec<Value>> {
    params
        .into_iter()
        .map(|param| match param {
            Param::Value(value) => Ok(value),
            Param::Stream(arg) => {
                let encoder = encoder.ok_or(RpcError::NoStreamEncoder)?;
                let descriptor = encoder.encode_stream(arg)?;
                Ok(serde_json::to_value(descriptor)?)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use serde_json::json;
    use uuid::Uuid;

    /// Records what it was asked to encode and answers with fixed ids.
    struct FixedEncoder {
        seen: Mutex<Vec<String>>,
    }

    impl ParamEncoder for FixedEncoder {
        fn encode_stream(&self, arg: StreamArg) -> StreamResult<StreamDescriptor> {
            self.seen.lock().unwrap().push(format!("{arg:?}"));
            Ok(match arg {
                StreamArg::Null(r) => StreamDescriptor::no_data(r.len()),
                _ => StreamDescriptor::push(Uuid::nil()),
            })
        }
    }

    #[test]
    fn plain_values_pass_through() {
        let out = encode_params(vec![json!(1).into(), json!({"a": "b"}).into()], None).unwrap();
        assert_eq!(out, vec![json!(1), json!({"a": "b"})]);
    }

    #[test]
    fn stream_without_encoder_fails() {
        let err = encode_params(vec![StreamArg::null(3).into()], None).unwrap_err();
        assert!(matches!(err, RpcError::NoStreamEncoder));
    }

    #[test]
    fn streams_become_descriptors_in_place() {
        let encoder = FixedEncoder {
            seen: Mutex::new(Vec::new()),
        };
        let out = encode_params(
            vec![
                json!("before").into(),
                StreamArg::null(42).into(),
                StreamArg::reader(std::io::Cursor::new(b"x".to_vec())).into(),
            ],
            Some(&encoder),
        )
        .unwrap();

        assert_eq!(
            out,
            vec![
                json!("before"),
                json!({"Type": "null", "Info": "42"}),
                json!({"Type": "push", "Info": Uuid::nil().to_string()}),
            ]
        );
        assert_eq!(encoder.seen.lock().unwrap().len(), 2);
    }
}
