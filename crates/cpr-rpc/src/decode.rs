//! Serving-side decoding of stream parameters.
//!
//! A positional param is treated as a stream only when it is an object with
//! exactly the two descriptor keys and a known `Type`. Anything else is
//! passed through untouched.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use cpr_stream::{StreamArg, StreamDescriptor, StreamKind, StreamRegistry};

use crate::error::{RpcError, RpcResult};
use crate::param::Param;

#[derive(Clone)]
pub struct ParamDecoder {
    registry: StreamRegistry,
    handoff_timeout: Duration,
}

impl ParamDecoder {
    pub fn new(registry: StreamRegistry, handoff_timeout: Duration) -> Self {
        Self {
            registry,
            handoff_timeout,
        }
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    pub fn handoff_timeout(&self) -> Duration {
        self.handoff_timeout
    }

    /// Decode every param, awaiting the first handoff of each push stream.
    pub async fn decode(&self, params: Vec<Value>) -> RpcResult<Vec<Param>> {
        let mut decoded = Vec::with_capacity(params.len());
        for value in params {
            let param = match as_descriptor(&value) {
                Some(descriptor) => Param::Stream(self.open(descriptor).await?),
                None => Param::Value(value),
            };
            decoded.push(param);
        }
        Ok(decoded)
    }

    async fn open(&self, descriptor: StreamDescriptor) -> RpcResult<StreamArg> {
        match descriptor.kind() {
            StreamKind::NoData => {
                let len = descriptor.declared_len().ok_or_else(|| {
                    RpcError::InvalidParams(format!(
                        "null stream length '{}' is not a number",
                        descriptor.token()
                    ))
                })?;
                Ok(StreamArg::null(len))
            }
            StreamKind::PushStream => {
                let id = descriptor.stream_id().ok_or_else(|| {
                    RpcError::InvalidParams(format!(
                        "push stream id '{}' is not a uuid",
                        descriptor.token()
                    ))
                })?;
                let receiver = self.registry.accept(id, self.handoff_timeout).await?;
                debug!(stream_id = %id, state = ?receiver.state(), "decoded push stream");
                Ok(receiver.into())
            }
        }
    }
}

fn as_descriptor(value: &Value) -> Option<StreamDescriptor> {
    let object = value.as_object()?;
    if object.len() != 2 || !object.contains_key("Type") || !object.contains_key("Info") {
        return None;
    }
    serde_json::from_value(value.clone()).ok()
}
