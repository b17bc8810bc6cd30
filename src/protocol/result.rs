//! Result frames and wire error codes

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use rmpv::Value;
use serde::{Deserialize, Serialize};

use super::{encode_value, get_field, get_string_field};
use crate::types::KeywardError;

/// Wire error symbols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    ActionNotImplemented,
    ProviderNotFound,
    BadParameters,
    HandleNotFound,
    NotAuthenticated,
    InvalidAccess,
    ProviderOperationFailed,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ActionNotImplemented => "ActionNotImplemented",
            ErrorCode::ProviderNotFound => "ProviderNotFound",
            ErrorCode::BadParameters => "BadParameters",
            ErrorCode::HandleNotFound => "HandleNotFound",
            ErrorCode::NotAuthenticated => "NotAuthenticated",
            ErrorCode::InvalidAccess => "InvalidAccess",
            ErrorCode::ProviderOperationFailed => "ProviderOperationFailed",
            ErrorCode::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = KeywardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            ErrorCode::ActionNotImplemented,
            ErrorCode::ProviderNotFound,
            ErrorCode::BadParameters,
            ErrorCode::HandleNotFound,
            ErrorCode::NotAuthenticated,
            ErrorCode::InvalidAccess,
            ErrorCode::ProviderOperationFailed,
            ErrorCode::Internal,
        ]
        .into_iter()
        .find(|code| code.as_str() == s)
        .ok_or_else(|| KeywardError::Codec(format!("unknown error code '{s}'")))
    }
}

/// Error envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireError {
    pub code: ErrorCode,
    pub message: String,
}

/// A result frame: exactly one of data or error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultFrame {
    pub id: String,
    pub outcome: Result<Vec<u8>, WireError>,
}

/// Encode a result frame.
pub fn encode_result(frame: &ResultFrame) -> Vec<u8> {
    let mut map = vec![(
        Value::String("id".into()),
        Value::String(frame.id.as_str().into()),
    )];
    match &frame.outcome {
        Ok(data) => map.push((Value::String("data".into()), Value::Binary(data.clone()))),
        Err(error) => map.push((
            Value::String("error".into()),
            Value::Map(vec![
                (
                    Value::String("code".into()),
                    Value::String(error.code.as_str().into()),
                ),
                (
                    Value::String("message".into()),
                    Value::String(error.message.as_str().into()),
                ),
            ]),
        )),
    }
    encode_value(&Value::Map(map))
}

/// Parse a result frame (clients and tests).
pub fn decode_result(frame: &[u8]) -> Result<ResultFrame, KeywardError> {
    let mut cursor = Cursor::new(frame);
    let value = rmpv::decode::read_value(&mut cursor)
        .map_err(|e| KeywardError::Codec(format!("Failed to decode result frame: {e}")))?;

    let Value::Map(ref map) = value else {
        return Err(KeywardError::Codec("Result frame must be a map".into()));
    };
    let id = get_string_field(map, "id")
        .ok_or_else(|| KeywardError::Codec("Result frame is missing 'id'".into()))?;

    if let Some(Value::Map(error)) = get_field(map, "error") {
        let code = get_string_field(error, "code")
            .ok_or_else(|| KeywardError::Codec("Error envelope is missing 'code'".into()))?
            .parse()?;
        let message = get_string_field(error, "message").unwrap_or_default();
        return Ok(ResultFrame {
            id,
            outcome: Err(WireError { code, message }),
        });
    }

    match get_field(map, "data") {
        Some(Value::Binary(data)) => Ok(ResultFrame {
            id,
            outcome: Ok(data.clone()),
        }),
        _ => Err(KeywardError::Codec(
            "Result frame carries neither data nor error".into(),
        )),
    }
}
