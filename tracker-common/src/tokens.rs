//! Opaque identifiers: download tokens, upload batch ids, session tokens
//!
//! All of them are random UUIDv4 values so that none of them can be guessed
//! from a neighbouring value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Generate a new download token
pub fn new_download_token() -> Uuid {
    Uuid::new_v4()
}

/// Parse a download token from its external (URL) form
pub fn parse_download_token(s: &str) -> Result<Uuid, uuid::Error> {
    Uuid::parse_str(s.trim())
}

/// Generate a new session token
pub fn new_session_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Generate a new bundle identifier
pub fn new_bundle_id() -> String {
    Uuid::new_v4().to_string()
}

/// Identifier of one upload staging batch (one per form render)
///
/// Only random identifiers are accepted: a batch id is the sole access key of
/// its staged files, so a sequential or hand-picked value is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BatchId(Uuid);

impl BatchId {
    /// Generate a fresh batch id
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a client-supplied batch id; `None` when it is not a random UUID
    pub fn parse(s: &str) -> Option<Self> {
        let uuid = Uuid::parse_str(s.trim()).ok()?;
        (uuid.get_version_num() == 4).then_some(Self(uuid))
    }

    /// Use the client-supplied id when valid, otherwise start a new batch
    pub fn from_client_or_new(s: Option<&str>) -> Self {
        s.and_then(Self::parse).unwrap_or_else(Self::generate)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for BatchId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Invalid upload batch id: {}", s))
    }
}

impl TryFrom<String> for BatchId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BatchId> for String {
    fn from(value: BatchId) -> Self {
        value.to_string()
    }
}
