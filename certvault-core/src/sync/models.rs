//! Sync data models: the secret record and the HTTP wire format.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of a stored secret. Opaque to the server, used by clients to decide
/// how to render the decrypted payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretKind {
    LoginPassword,
    Text,
    Binary,
    Card,
}

impl SecretKind {
    /// Convert the kind to its wire/storage string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoginPassword => "login_password",
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Card => "card",
        }
    }

    pub const ALL: [SecretKind; 4] = [Self::LoginPassword, Self::Text, Self::Binary, Self::Card];
}

impl fmt::Display for SecretKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown secret kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown secret type: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for SecretKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "login_password" => Ok(Self::LoginPassword),
            "text" => Ok(Self::Text),
            "binary" => Ok(Self::Binary),
            "card" => Ok(Self::Card),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

/// A single secret as it travels between client, server and cache file.
///
/// `payload` is `nonce(12) || ciphertext || auth_tag(16)` produced on the
/// client; the server never sees the key. The owner is implied by the
/// authenticated connection and never serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    /// Client-generated identifier, stable across devices and never reused.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SecretKind,
    #[serde(rename = "data", with = "base64_bytes")]
    pub payload: Vec<u8>,
    /// Free-text label, stored in clear.
    #[serde(default)]
    pub comment: String,
    /// Non-decreasing per secret; seeded from unix seconds.
    pub version: i64,
    /// Tombstone flag.
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Request body for `POST /api/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub login: String,
}

/// Response body for `POST /api/register`: the freshly issued leaf.
#[derive(Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub cert: String,
    pub key: String,
}

impl fmt::Debug for RegisterResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterResponse")
            .field("cert", &self.cert)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Response body for `POST /api/login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub status: String,
    pub user: String,
}

/// Request body for `POST /api/sync`.
///
/// `versions` maps every secret id the client knows about to the version it
/// holds; the server answers with everything newer or unknown.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncRequest {
    #[serde(default)]
    pub secrets: Vec<Secret>,
    #[serde(default)]
    pub versions: HashMap<String, i64>,
}

/// Response body for `POST /api/sync`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Highest version held by the server for this owner after the writes.
    pub version: i64,
    #[serde(default)]
    pub secrets: Vec<Secret>,
    #[serde(default)]
    pub updated: Vec<String>,
    #[serde(default)]
    pub skipped: Vec<String>,
}

/// Error body returned by the server on any non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(deleted: bool) -> Secret {
        Secret {
            id: "a1".to_string(),
            kind: SecretKind::LoginPassword,
            payload: vec![1, 2, 3, 255],
            comment: "bank".to_string(),
            version: 1_700_000_000,
            deleted,
        }
    }

    #[test]
    fn secret_wire_field_names() {
        let json = serde_json::to_value(secret(false)).unwrap();
        assert_eq!(json["id"], "a1");
        assert_eq!(json["type"], "login_password");
        assert_eq!(json["data"], "AQID/w==");
        assert_eq!(json["version"], 1_700_000_000i64);
        // live secrets omit the tombstone flag
        assert!(json.get("deleted").is_none());
    }

    #[test]
    fn tombstone_flag_serialized() {
        let json = serde_json::to_value(secret(true)).unwrap();
        assert_eq!(json["deleted"], true);
    }

    #[test]
    fn missing_optional_fields_default() {
        let s: Secret =
            serde_json::from_str(r#"{"id":"x","type":"card","data":"","version":5}"#).unwrap();
        assert_eq!(s.kind, SecretKind::Card);
        assert!(s.payload.is_empty());
        assert!(s.comment.is_empty());
        assert!(!s.deleted);
    }

    #[test]
    fn invalid_base64_rejected() {
        let res: Result<Secret, _> =
            serde_json::from_str(r#"{"id":"x","type":"text","data":"!!","version":1}"#);
        assert!(res.is_err());
    }

    #[test]
    fn kind_parse_matches_as_str() {
        for kind in SecretKind::ALL {
            assert_eq!(kind.as_str().parse::<SecretKind>().unwrap(), kind);
        }
        assert_eq!(
            "password".parse::<SecretKind>(),
            Err(UnknownKind("password".to_string()))
        );
    }

    #[test]
    fn sync_request_accepts_empty_body() {
        let req: SyncRequest = serde_json::from_str("{}").unwrap();
        assert!(req.secrets.is_empty());
        assert!(req.versions.is_empty());
    }

    #[test]
    fn register_response_debug_hides_key() {
        let resp = RegisterResponse {
            cert: "CERT".to_string(),
            key: "TOPSECRET".to_string(),
        };
        assert!(!format!("{:?}", resp).contains("TOPSECRET"));
    }
}
