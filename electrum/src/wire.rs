// SPDX-License-Identifier: CC0-1.0

//! The two frame shapes the server can send: an RPC reply (keyed by `id`) or
//! a subscription push (keyed by `method` ending in `.subscribe`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An outgoing JSON-RPC 2.0 request.
#[derive(Serialize)]
pub struct Request<'a> {
    pub jsonrpc: &'a str,
    pub id: u64,
    pub method: &'a str,
    pub params: &'a [Value],
}

impl<'a> Request<'a> {
    pub fn new(id: u64, method: &'a str, params: &'a [Value]) -> Self {
        Request { jsonrpc: "2.0", id, method, params }
    }
}

/// A single incoming frame, before we know which of the two shapes it is.
#[derive(Deserialize)]
pub struct Frame {
    pub id: Option<u64>,
    pub method: Option<String>,
    #[serde(default)]
    pub params: Value,
    pub result: Option<Value>,
    pub error: Option<Value>,
}

/// What a decoded [`Frame`] turned out to be.
pub enum Decoded {
    /// A subscription push: `method` ends in `.subscribe`.
    Notification { method: String, params: Value },
    /// An RPC reply matching a pending request by `id`.
    Reply { id: u64, result: Result<Value, Value> },
    /// A frame naming neither a known notification nor an `id` we recognise
    /// the shape of (`id` missing and `method` doesn't look like a push).
    Malformed,
}

impl Frame {
    pub fn decode(self) -> Decoded {
        if let Some(method) = self.method {
            if method.ends_with(".subscribe") {
                return Decoded::Notification { method, params: self.params };
            }
        }
        match self.id {
            Some(id) => {
                let result = match self.error {
                    Some(err) => Err(err),
                    None => Ok(self.result.unwrap_or(Value::Null)),
                };
                Decoded::Reply { id, result }
            }
            None => Decoded::Malformed,
        }
    }
}
