//! Action frames and the action-code table

use std::fmt;
use std::io::Cursor;

use rmpv::Value;

use super::result::ErrorCode;
use super::{encode_value, get_field, get_string_field};

/// Every action the server understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionCode {
    // crypto/subtle
    Digest,
    GenerateKey,
    ImportKey,
    ExportKey,
    Encrypt,
    Decrypt,
    Sign,
    Verify,
    DeriveBits,
    DeriveKey,
    WrapKey,
    UnwrapKey,

    // crypto/keyStorage
    KeyStorageGetItem,
    KeyStorageSetItem,
    KeyStorageRemoveItem,
    KeyStorageKeys,
    KeyStorageIndexOf,
    KeyStorageClear,

    // crypto/certStorage
    CertStorageGetItem,
    CertStorageSetItem,
    CertStorageRemoveItem,
    CertStorageKeys,
    CertStorageIndexOf,
    CertStorageClear,

    // crypto/cert
    CertImport,
    CertExport,

    // provider
    ProviderInfo,
    ProviderLogin,
    ProviderLogout,
    ProviderIsLoggedIn,

    // server
    ServerRelease,
    ServerPing,
}

impl ActionCode {
    pub const ALL: [ActionCode; 32] = [
        ActionCode::Digest,
        ActionCode::GenerateKey,
        ActionCode::ImportKey,
        ActionCode::ExportKey,
        ActionCode::Encrypt,
        ActionCode::Decrypt,
        ActionCode::Sign,
        ActionCode::Verify,
        ActionCode::DeriveBits,
        ActionCode::DeriveKey,
        ActionCode::WrapKey,
        ActionCode::UnwrapKey,
        ActionCode::KeyStorageGetItem,
        ActionCode::KeyStorageSetItem,
        ActionCode::KeyStorageRemoveItem,
        ActionCode::KeyStorageKeys,
        ActionCode::KeyStorageIndexOf,
        ActionCode::KeyStorageClear,
        ActionCode::CertStorageGetItem,
        ActionCode::CertStorageSetItem,
        ActionCode::CertStorageRemoveItem,
        ActionCode::CertStorageKeys,
        ActionCode::CertStorageIndexOf,
        ActionCode::CertStorageClear,
        ActionCode::CertImport,
        ActionCode::CertExport,
        ActionCode::ProviderInfo,
        ActionCode::ProviderLogin,
        ActionCode::ProviderLogout,
        ActionCode::ProviderIsLoggedIn,
        ActionCode::ServerRelease,
        ActionCode::ServerPing,
    ];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionCode::Digest => "crypto/subtle/digest",
            ActionCode::GenerateKey => "crypto/subtle/generateKey",
            ActionCode::ImportKey => "crypto/subtle/importKey",
            ActionCode::ExportKey => "crypto/subtle/exportKey",
            ActionCode::Encrypt => "crypto/subtle/encrypt",
            ActionCode::Decrypt => "crypto/subtle/decrypt",
            ActionCode::Sign => "crypto/subtle/sign",
            ActionCode::Verify => "crypto/subtle/verify",
            ActionCode::DeriveBits => "crypto/subtle/deriveBits",
            ActionCode::DeriveKey => "crypto/subtle/deriveKey",
            ActionCode::WrapKey => "crypto/subtle/wrapKey",
            ActionCode::UnwrapKey => "crypto/subtle/unwrapKey",
            ActionCode::KeyStorageGetItem => "crypto/keyStorage/getItem",
            ActionCode::KeyStorageSetItem => "crypto/keyStorage/setItem",
            ActionCode::KeyStorageRemoveItem => "crypto/keyStorage/removeItem",
            ActionCode::KeyStorageKeys => "crypto/keyStorage/keys",
            ActionCode::KeyStorageIndexOf => "crypto/keyStorage/indexOf",
            ActionCode::KeyStorageClear => "crypto/keyStorage/clear",
            ActionCode::CertStorageGetItem => "crypto/certStorage/getItem",
            ActionCode::CertStorageSetItem => "crypto/certStorage/setItem",
            ActionCode::CertStorageRemoveItem => "crypto/certStorage/removeItem",
            ActionCode::CertStorageKeys => "crypto/certStorage/keys",
            ActionCode::CertStorageIndexOf => "crypto/certStorage/indexOf",
            ActionCode::CertStorageClear => "crypto/certStorage/clear",
            ActionCode::CertImport => "crypto/cert/import",
            ActionCode::CertExport => "crypto/cert/export",
            ActionCode::ProviderInfo => "provider/info",
            ActionCode::ProviderLogin => "provider/login",
            ActionCode::ProviderLogout => "provider/logout",
            ActionCode::ProviderIsLoggedIn => "provider/isLoggedIn",
            ActionCode::ServerRelease => "server/release",
            ActionCode::ServerPing => "server/ping",
        }
    }

    /// Look up a wire name.
    pub fn parse(name: &str) -> Option<ActionCode> {
        ActionCode::ALL.into_iter().find(|code| code.as_str() == name)
    }

    /// Whether the action targets a provider and must carry a resolvable
    /// `provider` id.
    pub fn requires_provider(&self) -> bool {
        !matches!(
            self,
            ActionCode::ProviderInfo | ActionCode::ServerRelease | ActionCode::ServerPing
        )
    }

    /// Whether a login-gated provider needs an authenticated session first.
    pub fn requires_auth(&self) -> bool {
        !matches!(
            self,
            ActionCode::Digest
                | ActionCode::ProviderInfo
                | ActionCode::ProviderLogin
                | ActionCode::ProviderLogout
                | ActionCode::ProviderIsLoggedIn
                | ActionCode::ServerRelease
                | ActionCode::ServerPing
        )
    }
}

impl fmt::Display for ActionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded action frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    /// Correlation id echoed on the result
    pub id: String,
    pub code: ActionCode,
    pub provider_id: Option<String>,
    /// Nested parameter document (may be empty)
    pub data: Vec<u8>,
}

/// A frame that could not be turned into an [`Action`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameError {
    /// Correlation id, when it could be salvaged from the frame
    pub id: Option<String>,
    pub code: ErrorCode,
    pub message: String,
}

impl FrameError {
    fn bad(id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            id,
            code: ErrorCode::BadParameters,
            message: message.into(),
        }
    }
}

/// Parse a MessagePack-encoded action frame.
pub fn decode_action(frame: &[u8]) -> Result<Action, FrameError> {
    let mut cursor = Cursor::new(frame);
    let envelope = rmpv::decode::read_value(&mut cursor)
        .map_err(|e| FrameError::bad(None, format!("Failed to decode action frame: {e}")))?;

    let Value::Map(ref map) = envelope else {
        return Err(FrameError::bad(None, "Action frame must be a map"));
    };

    // Accept string or integer correlation ids; always echo them as strings.
    let id = match get_field(map, "id") {
        Some(Value::String(s)) => s.as_str().map(str::to_string),
        Some(Value::Integer(n)) => Some(n.to_string()),
        _ => None,
    }
    .ok_or_else(|| FrameError::bad(None, "Action frame is missing 'id'"))?;

    let name = get_string_field(map, "action")
        .ok_or_else(|| FrameError::bad(Some(id.clone()), "Action frame is missing 'action'"))?;

    let code = ActionCode::parse(&name).ok_or_else(|| FrameError {
        id: Some(id.clone()),
        code: ErrorCode::ActionNotImplemented,
        message: format!("Action '{name}' is not implemented"),
    })?;

    let provider_id = match get_field(map, "provider") {
        None | Some(Value::Nil) => None,
        Some(Value::String(s)) => s.as_str().map(str::to_string),
        Some(_) => {
            return Err(FrameError::bad(Some(id), "'provider' must be a string"));
        }
    };

    let data = match get_field(map, "data") {
        None | Some(Value::Nil) => Vec::new(),
        Some(Value::Binary(bytes)) => bytes.clone(),
        // Tolerate an inline parameter map.
        Some(inline @ Value::Map(_)) => encode_value(inline),
        Some(_) => {
            return Err(FrameError::bad(Some(id), "'data' must be binary"));
        }
    };

    Ok(Action {
        id,
        code,
        provider_id,
        data,
    })
}

/// Encode an action frame (clients and tests).
pub fn encode_action(action: &Action) -> Vec<u8> {
    let mut map = vec![
        (Value::String("id".into()), Value::String(action.id.as_str().into())),
        (
            Value::String("action".into()),
            Value::String(action.code.as_str().into()),
        ),
    ];
    if let Some(provider) = &action.provider_id {
        map.push((
            Value::String("provider".into()),
            Value::String(provider.as_str().into()),
        ));
    }
    if !action.data.is_empty() {
        map.push((Value::String("data".into()), Value::Binary(action.data.clone())));
    }
    encode_value(&Value::Map(map))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names_are_unique() {
        let mut names: Vec<_> = ActionCode::ALL.iter().map(|c| c.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), ActionCode::ALL.len());
        for code in ActionCode::ALL {
            assert_eq!(ActionCode::parse(code.as_str()), Some(code));
        }
    }

    #[test]
    fn test_decode_encoded_action() {
        let action = Action {
            id: "7".into(),
            code: ActionCode::Sign,
            provider_id: Some("software".into()),
            data: vec![0x80],
        };
        assert_eq!(decode_action(&encode_action(&action)).unwrap(), action);
    }

    #[test]
    fn test_unknown_action_names_the_code() {
        let frame = encode_value(&Value::Map(vec![
            (Value::String("id".into()), Value::Integer(4.into())),
            (
                Value::String("action".into()),
                Value::String("crypto/subtle/frobnicate".into()),
            ),
        ]));
        let err = decode_action(&frame).unwrap_err();
        assert_eq!(err.id.as_deref(), Some("4"));
        assert_eq!(err.code, ErrorCode::ActionNotImplemented);
        assert!(err.message.contains("crypto/subtle/frobnicate"));
    }

    #[test]
    fn test_garbage_is_bad_parameters() {
        let err = decode_action(&[0xc1]).unwrap_err();
        assert_eq!(err.code, ErrorCode::BadParameters);
        assert!(err.id.is_none());

        let err = decode_action(&encode_value(&Value::Array(vec![]))).unwrap_err();
        assert_eq!(err.code, ErrorCode::BadParameters);
    }

    #[test]
    fn test_auth_exemptions() {
        assert!(!ActionCode::Digest.requires_auth());
        assert!(ActionCode::Digest.requires_provider());
        assert!(ActionCode::Sign.requires_auth());
        assert!(!ActionCode::ProviderInfo.requires_provider());
    }
}
