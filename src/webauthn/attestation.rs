//! `WebAuthn` attestation processing
//!
//! Decodes the attestation object returned at registration and checks its
//! statement. Packed self-attestation is verified against the new credential
//! key; certificate-chain attestation is recorded but not chain-validated.

use ciborium::value::Value;
use log::info;

use super::authenticator_data::AuthenticatorData;
use super::cose::CosePublicKey;
use super::crypto;
use super::errors::CeremonyError;

/// Attestation statement, reduced to what verification needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttestationStatement {
    /// `fmt = "none"`
    None,
    /// `fmt = "packed"` signed by the credential key itself
    PackedSelf { algorithm: i64, signature: Vec<u8> },
    /// `fmt = "packed"` signed by an attestation certificate
    PackedCertificate { algorithm: i64, chain_length: usize },
    /// Any other statement format
    Unverified(String),
}

#[derive(Debug, Clone)]
pub struct AttestationObject {
    pub statement: AttestationStatement,
    /// Raw authenticator data, needed again for the signature base
    pub auth_data_bytes: Vec<u8>,
    pub auth_data: AuthenticatorData,
}

impl AttestationObject {
    /// Decode a CBOR attestation object
    ///
    /// # Errors
    /// Returns `MalformedPayload` if any structural element is missing or of
    /// the wrong CBOR type, or the authenticator data carries no credential.
    pub fn decode(bytes: &[u8]) -> Result<Self, CeremonyError> {
        let value: Value = ciborium::de::from_reader(bytes)
            .map_err(|_| CeremonyError::malformed("invalid CBOR in attestation object"))?;
        let Value::Map(map) = value else {
            return Err(CeremonyError::malformed("attestation object is not a map"));
        };

        let fmt = match text_lookup(&map, "fmt") {
            Some(Value::Text(fmt)) => fmt.clone(),
            _ => return Err(CeremonyError::malformed("missing attestation format")),
        };
        let auth_data_bytes = match text_lookup(&map, "authData") {
            Some(Value::Bytes(bytes)) => bytes.clone(),
            _ => return Err(CeremonyError::malformed("missing authenticator data")),
        };
        let Some(Value::Map(att_stmt)) = text_lookup(&map, "attStmt") else {
            return Err(CeremonyError::malformed("missing attestation statement"));
        };

        let statement = match fmt.as_str() {
            "none" => AttestationStatement::None,
            "packed" => decode_packed(att_stmt)?,
            other => AttestationStatement::Unverified(other.to_string()),
        };

        let auth_data = AuthenticatorData::parse(&auth_data_bytes)?;
        if auth_data.attested_credential.is_none() {
            return Err(CeremonyError::malformed(
                "registration carries no attested credential",
            ));
        }

        Ok(Self {
            statement,
            auth_data_bytes,
            auth_data,
        })
    }

    /// Check the attestation statement
    ///
    /// # Errors
    /// * `InvalidSignature` if a packed self-attestation does not verify with
    ///   `credential_key` or names a different algorithm than the key.
    /// * `MalformedPayload` if `require_self_attestation` is set and the
    ///   statement is not a packed self-attestation.
    pub fn verify(
        &self,
        credential_key: &CosePublicKey,
        client_data_json: &[u8],
        require_self_attestation: bool,
    ) -> Result<(), CeremonyError> {
        match &self.statement {
            AttestationStatement::PackedSelf {
                algorithm,
                signature,
            } => {
                if *algorithm != credential_key.algorithm {
                    return Err(CeremonyError::InvalidSignature);
                }
                let message = crypto::signed_message(&self.auth_data_bytes, client_data_json);
                if crypto::verify_signature(credential_key, *algorithm, &message, signature)? {
                    Ok(())
                } else {
                    Err(CeremonyError::InvalidSignature)
                }
            }
            _ if require_self_attestation => Err(CeremonyError::malformed(
                "self attestation required",
            )),
            AttestationStatement::None => Ok(()),
            AttestationStatement::PackedCertificate {
                algorithm,
                chain_length,
            } => {
                info!(
                    "Accepting packed attestation (alg {algorithm}, {chain_length} certificates) without chain validation"
                );
                Ok(())
            }
            AttestationStatement::Unverified(fmt) => {
                info!("Accepting unverified attestation format '{fmt}'");
                Ok(())
            }
        }
    }
}

fn decode_packed(att_stmt: &[(Value, Value)]) -> Result<AttestationStatement, CeremonyError> {
    let algorithm = match text_lookup(att_stmt, "alg") {
        Some(Value::Integer(alg)) => i64::try_from(*alg)
            .map_err(|_| CeremonyError::malformed("attestation algorithm out of range"))?,
        _ => return Err(CeremonyError::malformed("packed attestation without alg")),
    };
    let signature = match text_lookup(att_stmt, "sig") {
        Some(Value::Bytes(sig)) => sig.clone(),
        _ => return Err(CeremonyError::malformed("packed attestation without sig")),
    };

    match text_lookup(att_stmt, "x5c") {
        None => Ok(AttestationStatement::PackedSelf {
            algorithm,
            signature,
        }),
        Some(Value::Array(chain)) if !chain.is_empty() => {
            Ok(AttestationStatement::PackedCertificate {
                algorithm,
                chain_length: chain.len(),
            })
        }
        Some(_) => Err(CeremonyError::malformed("invalid x5c in packed attestation")),
    }
}

fn text_lookup<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter().find_map(|(k, v)| match k {
        Value::Text(text) if text == key => Some(v),
        _ => None,
    })
}
