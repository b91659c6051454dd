//! Authenticator data parsing
//!
//! Layout: `rpIdHash (32) | flags (1) | signCount (4, big-endian)`, followed
//! by attested credential data when the AT flag is set
//! (`aaguid (16) | credIdLen (2) | credId | COSE key`) and a CBOR extensions
//! map when the ED flag is set.

use ciborium::value::Value;

use super::cose::CosePublicKey;
use super::errors::CeremonyError;

pub const FLAG_USER_PRESENT: u8 = 0x01;
pub const FLAG_USER_VERIFIED: u8 = 0x04;
pub const FLAG_BACKUP_ELIGIBLE: u8 = 0x08;
pub const FLAG_BACKUP_STATE: u8 = 0x10;
pub const FLAG_ATTESTED_CREDENTIAL: u8 = 0x40;
pub const FLAG_EXTENSIONS: u8 = 0x80;

const HEADER_LENGTH: usize = 37;
const AAGUID_LENGTH: usize = 16;

/// Credential material attached to authenticator data during registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredentialData {
    pub aaguid: [u8; AAGUID_LENGTH],
    pub credential_id: Vec<u8>,
    pub public_key: CosePublicKey,
    /// The COSE key exactly as the authenticator encoded it
    pub public_key_cbor: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub sign_count: u32,
    pub attested_credential: Option<AttestedCredentialData>,
}

impl AuthenticatorData {
    /// Parse raw authenticator data bytes
    ///
    /// # Errors
    /// Returns `MalformedPayload` if the buffer is truncated, carries trailing
    /// bytes, or holds an undecodable credential key or extensions map.
    pub fn parse(bytes: &[u8]) -> Result<Self, CeremonyError> {
        if bytes.len() < HEADER_LENGTH {
            return Err(CeremonyError::malformed("authenticator data too short"));
        }

        let mut rp_id_hash = [0u8; 32];
        rp_id_hash.copy_from_slice(&bytes[..32]);
        let flags = bytes[32];
        let sign_count = u32::from_be_bytes([bytes[33], bytes[34], bytes[35], bytes[36]]);

        let mut rest = &bytes[HEADER_LENGTH..];

        let attested_credential = if flags & FLAG_ATTESTED_CREDENTIAL != 0 {
            let (credential, consumed) = parse_attested_credential(rest)?;
            rest = &rest[consumed..];
            Some(credential)
        } else {
            None
        };

        if flags & FLAG_EXTENSIONS != 0 {
            let mut cursor = rest;
            let extensions: Value = ciborium::de::from_reader(&mut cursor)
                .map_err(|_| CeremonyError::malformed("invalid extensions map"))?;
            if !matches!(extensions, Value::Map(_)) {
                return Err(CeremonyError::malformed("extensions must be a map"));
            }
            rest = cursor;
        }

        if !rest.is_empty() {
            return Err(CeremonyError::malformed(
                "trailing bytes in authenticator data",
            ));
        }

        Ok(Self {
            rp_id_hash,
            flags,
            sign_count,
            attested_credential,
        })
    }

    #[must_use]
    pub fn user_present(&self) -> bool {
        self.flags & FLAG_USER_PRESENT != 0
    }

    #[must_use]
    pub fn user_verified(&self) -> bool {
        self.flags & FLAG_USER_VERIFIED != 0
    }

    #[must_use]
    pub fn backup_eligible(&self) -> bool {
        self.flags & FLAG_BACKUP_ELIGIBLE != 0
    }

    #[must_use]
    pub fn backup_state(&self) -> bool {
        self.flags & FLAG_BACKUP_STATE != 0
    }
}

fn parse_attested_credential(
    bytes: &[u8],
) -> Result<(AttestedCredentialData, usize), CeremonyError> {
    if bytes.len() < AAGUID_LENGTH + 2 {
        return Err(CeremonyError::malformed("attested credential data too short"));
    }

    let mut aaguid = [0u8; AAGUID_LENGTH];
    aaguid.copy_from_slice(&bytes[..AAGUID_LENGTH]);
    let id_length =
        usize::from(u16::from_be_bytes([bytes[AAGUID_LENGTH], bytes[AAGUID_LENGTH + 1]]));

    let id_start = AAGUID_LENGTH + 2;
    let key_start = id_start + id_length;
    if id_length == 0 || bytes.len() < key_start {
        return Err(CeremonyError::malformed("invalid credential id length"));
    }
    let credential_id = bytes[id_start..key_start].to_vec();

    let (public_key, key_length) = CosePublicKey::decode_prefix(&bytes[key_start..])?;
    let public_key_cbor = bytes[key_start..key_start + key_length].to_vec();

    Ok((
        AttestedCredentialData {
            aaguid,
            credential_id,
            public_key,
            public_key_cbor,
        },
        key_start + key_length,
    ))
}

/// Serialize authenticator data fields back into the wire layout
///
/// Only used to fabricate authenticator output; the ceremonies always verify
/// the bytes the client sent.
#[cfg(any(test, feature = "testing"))]
#[must_use]
pub fn encode(
    rp_id_hash: &[u8; 32],
    flags: u8,
    sign_count: u32,
    attested: Option<(&[u8; AAGUID_LENGTH], &[u8], &[u8])>,
) -> Vec<u8> {
    let mut data = Vec::with_capacity(HEADER_LENGTH + 128);
    data.extend_from_slice(rp_id_hash);
    data.push(flags);
    data.extend_from_slice(&sign_count.to_be_bytes());
    if let Some((aaguid, credential_id, cose_key)) = attested {
        let id_length = u16::try_from(credential_id.len()).unwrap_or(u16::MAX);
        data.extend_from_slice(aaguid);
        data.extend_from_slice(&id_length.to_be_bytes());
        data.extend_from_slice(credential_id);
        data.extend_from_slice(cose_key);
    }
    data
}
