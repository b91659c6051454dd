//! `WebAuthn` core types
//!
//! Wire structures exchanged with the client, the records the stores keep,
//! and the results handed back to callers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::crypto::{decode_b64url, encode_b64url};
use super::errors::CeremonyError;
use super::user::UserHandle;

/// Which ceremony a challenge was issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CeremonyPurpose {
    Registration,
    Authentication,
}

impl CeremonyPurpose {
    /// The `clientDataJSON` type matching this ceremony
    #[must_use]
    pub fn client_data_type(self) -> &'static str {
        match self {
            CeremonyPurpose::Registration => super::client_data::TYPE_CREATE,
            CeremonyPurpose::Authentication => super::client_data::TYPE_GET,
        }
    }
}

/// Opaque credential identifier, base64url on the wire and on disk
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CredentialId(Vec<u8>);

impl CredentialId {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Decode from base64url
    ///
    /// # Errors
    /// Returns `MalformedPayload` for invalid base64url or an empty id.
    pub fn from_b64url(encoded: &str) -> Result<Self, CeremonyError> {
        let bytes = decode_b64url(encoded, "credential id")?;
        if bytes.is_empty() {
            return Err(CeremonyError::malformed("credential id is empty"));
        }
        Ok(Self(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn to_b64url(&self) -> String {
        encode_b64url(&self.0)
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_b64url())
    }
}

impl fmt::Debug for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialId({})", self.to_b64url())
    }
}

impl Serialize for CredentialId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_b64url())
    }
}

impl<'de> Deserialize<'de> for CredentialId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_b64url(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter storing raw bytes as base64url strings
mod b64url_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode_b64url(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        super::decode_b64url(&encoded, "bytes").map_err(serde::de::Error::custom)
    }
}

/// A registered public key credential
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StoredCredential {
    pub credential_id: CredentialId,
    pub owner: UserHandle,
    #[serde(with = "b64url_bytes")]
    pub public_key: Vec<u8>, // COSE-encoded, as the authenticator produced it
    pub algorithm: i64,          // COSE algorithm identifier
    pub signature_counter: u32,
    #[serde(with = "b64url_bytes")]
    pub aaguid: Vec<u8>,
    pub backup_eligible: bool,
    pub backup_state: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// A challenge as recorded by the challenge store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedChallenge {
    /// Opaque lookup handle returned to the caller
    pub token: String,
    /// Random bytes the authenticator must sign over
    pub value: Vec<u8>,
    pub subject: UserHandle,
    pub purpose: CeremonyPurpose,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IssuedChallenge {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// What a `begin_*` call hands back: the token to echo plus client options
#[derive(Serialize, Clone, Debug)]
pub struct ChallengePayload<T> {
    pub token: String,
    #[serde(rename = "publicKey")]
    pub options: T,
}

/// `WebAuthn` registration options sent to the client
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RegistrationOptions {
    pub challenge: String, // Base64URL-encoded random challenge
    pub rp: RelyingParty,
    pub user: UserEntity,
    #[serde(rename = "pubKeyCredParams")]
    pub public_key_params: Vec<PublicKeyCredentialParameters>,
    pub timeout: u64, // Milliseconds
    pub attestation: String,
    #[serde(rename = "authenticatorSelection")]
    pub authenticator_selection: AuthenticatorSelectionCriteria,
    #[serde(rename = "excludeCredentials")]
    pub exclude_credentials: Vec<PublicKeyCredentialDescriptor>,
}

/// `WebAuthn` authentication options sent to the client
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthenticationOptions {
    pub challenge: String,
    pub timeout: u64,
    #[serde(rename = "rpId")]
    pub rp_id: String,
    #[serde(rename = "allowCredentials")]
    pub allow_credentials: Vec<PublicKeyCredentialDescriptor>,
    #[serde(rename = "userVerification")]
    pub user_verification: String, // "required", "preferred", "discouraged"
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RelyingParty {
    pub id: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UserEntity {
    pub id: String, // Base64URL-encoded user handle bytes
    pub name: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PublicKeyCredentialParameters {
    #[serde(rename = "type")]
    pub r#type: String, // Always "public-key"
    pub alg: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthenticatorSelectionCriteria {
    #[serde(rename = "residentKey")]
    pub resident_key: String,
    #[serde(rename = "userVerification")]
    pub user_verification: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PublicKeyCredentialDescriptor {
    #[serde(rename = "type")]
    pub r#type: String, // Always "public-key"
    pub id: String,     // Base64URL-encoded credential ID
}

impl PublicKeyCredentialDescriptor {
    #[must_use]
    pub fn public_key(id: &CredentialId) -> Self {
        Self {
            r#type: "public-key".to_string(),
            id: id.to_b64url(),
        }
    }
}

/// Registration response from client
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RegistrationResponse {
    pub id: String,
    #[serde(rename = "rawId", alias = "raw_id")]
    pub raw_id: String,
    #[serde(rename = "type")]
    pub r#type: String,
    pub response: AuthenticatorAttestationResponse,
}

/// Authentication response from client
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthenticationResponse {
    pub id: String,
    #[serde(rename = "rawId", alias = "raw_id")]
    pub raw_id: String,
    #[serde(rename = "type")]
    pub r#type: String,
    pub response: AuthenticatorAssertionResponse,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthenticatorAttestationResponse {
    #[serde(rename = "clientDataJSON", alias = "client_data_json")]
    pub client_data_json: String,
    #[serde(rename = "attestationObject", alias = "attestation_object")]
    pub attestation_object: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthenticatorAssertionResponse {
    #[serde(rename = "clientDataJSON", alias = "client_data_json")]
    pub client_data_json: String,
    #[serde(rename = "authenticatorData", alias = "authenticator_data")]
    pub authenticator_data: String,
    pub signature: String,
    #[serde(rename = "userHandle", alias = "user_handle", default)]
    pub user_handle: Option<String>,
}

/// Registration response plus the challenge token it answers
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RegistrationSubmission {
    pub token: String,
    pub credential: RegistrationResponse,
}

/// Authentication response plus the challenge token it answers
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthenticationSubmission {
    pub token: String,
    pub credential: AuthenticationResponse,
}

/// Outcome of a successful registration
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct RegisteredCredential {
    pub user: UserHandle,
    pub credential_id: CredentialId,
}

/// Outcome of a successful authentication
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user: UserHandle,
    pub credential_id: CredentialId,
    pub signature_counter: u32,
    pub authenticated_at: DateTime<Utc>,
}
