//! Push address derivation.
//!
//! An RPC endpoint such as `ws://node:2345/rpc/v0` pushes its streams to the
//! sibling `http://node:2345/rpc/streams/v0/push`, and each stream lives at
//! `<push base>/<stream id>`.

use url::Url;
use uuid::Uuid;

use crate::error::{StreamError, StreamResult};

/// Derive the push base URL from an RPC endpoint URL.
pub fn push_url_for(rpc_addr: &str) -> StreamResult<Url> {
    let mut url = parse(rpc_addr)?;

    let scheme = match url.scheme() {
        "ws" => Some("http"),
        "wss" => Some("https"),
        _ => None,
    };
    if let Some(scheme) = scheme {
        url.set_scheme(scheme)
            .map_err(|()| StreamError::OpaquePushAddress(rpc_addr.to_string()))?;
    }

    let mut segments: Vec<String> = url
        .path_segments()
        .ok_or_else(|| StreamError::OpaquePushAddress(rpc_addr.to_string()))?
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    segments.pop();
    segments.extend(["streams", "v0", "push"].map(String::from));

    url.set_path(&format!("/{}", segments.join("/")));
    Ok(url)
}

/// Join a stream identifier onto a push base address.
pub fn stream_url(push_base: &str, id: &Uuid) -> StreamResult<Url> {
    let mut url = parse(push_base)?;
    url.path_segments_mut()
        .map_err(|()| StreamError::OpaquePushAddress(push_base.to_string()))?
        .pop_if_empty()
        .push(&id.to_string());
    Ok(url)
}

fn parse(address: &str) -> StreamResult<Url> {
    Url::parse(address).map_err(|source| StreamError::InvalidPushAddress {
        address: address.to_string(),
        source,
    })
}
