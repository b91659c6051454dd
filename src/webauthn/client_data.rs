//! Collected client data (`clientDataJSON`)

use serde::Deserialize;

use super::errors::CeremonyError;

pub const TYPE_CREATE: &str = "webauthn.create";
pub const TYPE_GET: &str = "webauthn.get";

/// The browser-assembled JSON the authenticator signs over (by hash)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectedClientData {
    #[serde(rename = "type")]
    pub ceremony_type: String,
    /// Base64url challenge as echoed by the client
    pub challenge: String,
    pub origin: String,
    #[serde(default)]
    pub cross_origin: Option<bool>,
}

impl CollectedClientData {
    /// Parse the raw client data JSON bytes
    ///
    /// # Errors
    /// Returns `MalformedPayload` if the bytes are not JSON with the required members.
    pub fn parse(bytes: &[u8]) -> Result<Self, CeremonyError> {
        serde_json::from_slice(bytes)
            .map_err(|err| CeremonyError::malformed(format!("invalid client data JSON: {err}")))
    }

    /// Whether the ceremony ran inside a cross-origin iframe
    #[must_use]
    pub fn is_cross_origin(&self) -> bool {
        self.cross_origin.unwrap_or(false)
    }
}
