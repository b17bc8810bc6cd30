//! Keyward wire protocol
//!
//! Frames are MessagePack maps carried in WebSocket binary messages. Both
//! frames double-encode their payload: the per-action parameter map (and the
//! per-action result value) travel as a nested MessagePack document inside a
//! `data` binary field.
//!
//! ```text
//! Action: { id: str, action: "crypto/subtle/sign", provider?: str, data?: bin }
//! Result: { id: str, data?: bin, error?: { code: str, message: str } }
//! ```

pub mod action;
pub mod params;
pub mod result;

use rmpv::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use action::{decode_action, encode_action, Action, ActionCode, FrameError};
pub use result::{decode_result, encode_result, ErrorCode, ResultFrame, WireError};

/// An empty MessagePack map, the parameter document of actions sent without
/// `data`.
const EMPTY_MAP: &[u8] = &[0x80];

/// Decode a per-action parameter document. Unknown fields are ignored.
pub fn decode_params<T: DeserializeOwned>(data: &[u8]) -> Result<T, rmp_serde::decode::Error> {
    if data.is_empty() {
        rmp_serde::from_slice(EMPTY_MAP)
    } else {
        rmp_serde::from_slice(data)
    }
}

/// Encode a per-action parameter or result document with field names.
pub fn encode_data<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec_named(value)
}

/// Get a field from a MessagePack map
fn get_field<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .map(|(_, v)| v)
}

/// Get a string field from a MessagePack map
fn get_string_field(map: &[(Value, Value)], key: &str) -> Option<String> {
    get_field(map, key).and_then(Value::as_str).map(str::to_string)
}

/// Encode a rmpv::Value to MessagePack bytes.
fn encode_value(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = rmpv::encode::write_value(&mut buf, value);
    buf
}
