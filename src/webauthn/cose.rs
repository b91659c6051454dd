//! COSE key processing for `WebAuthn`
//!
//! Credential public keys travel as CBOR-encoded `COSE_Key` maps inside the
//! attested credential data. This module decodes them into [`CosePublicKey`],
//! checks the key material is usable, and encodes keys back for storage.

use std::fmt;
use std::str::FromStr;

use ciborium::value::Value;
use serde::{Deserialize, Serialize};

use super::errors::CeremonyError;

// COSE_Key map labels (RFC 9053)
const LABEL_KTY: i64 = 1;
const LABEL_ALG: i64 = 3;
const LABEL_CRV: i64 = -1;
const LABEL_X: i64 = -2;
const LABEL_Y: i64 = -3;
const LABEL_RSA_N: i64 = -1;
const LABEL_RSA_E: i64 = -2;

const KTY_OKP: i64 = 1;
const KTY_EC2: i64 = 2;
const KTY_RSA: i64 = 3;

const CRV_P256: i64 = 1;
const CRV_ED25519: i64 = 6;

/// Smallest RSA modulus accepted, in bits
pub const RSA_MIN_MODULUS_BITS: usize = 2048;
/// Largest RSA modulus accepted, in bits
pub const RSA_MAX_MODULUS_BITS: usize = 8192;

/// Signature algorithms this crate can verify
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum CoseAlgorithm {
    /// ECDSA over P-256 with SHA-256
    Es256,
    /// Ed25519
    EdDsa,
    /// RSASSA-PKCS1-v1_5 with SHA-256
    Rs256,
}

impl CoseAlgorithm {
    /// COSE algorithm identifier
    #[must_use]
    pub fn id(self) -> i64 {
        match self {
            CoseAlgorithm::Es256 => -7,
            CoseAlgorithm::EdDsa => -8,
            CoseAlgorithm::Rs256 => -257,
        }
    }

    #[must_use]
    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            -7 => Some(CoseAlgorithm::Es256),
            -8 => Some(CoseAlgorithm::EdDsa),
            -257 => Some(CoseAlgorithm::Rs256),
            _ => None,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            CoseAlgorithm::Es256 => "ES256",
            CoseAlgorithm::EdDsa => "EdDSA",
            CoseAlgorithm::Rs256 => "RS256",
        }
    }
}

impl fmt::Display for CoseAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CoseAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ES256" => Ok(CoseAlgorithm::Es256),
            "EDDSA" | "ED25519" => Ok(CoseAlgorithm::EdDsa),
            "RS256" => Ok(CoseAlgorithm::Rs256),
            other => Err(format!("unknown signature algorithm '{other}'")),
        }
    }
}

impl TryFrom<i64> for CoseAlgorithm {
    type Error = String;

    fn try_from(id: i64) -> Result<Self, Self::Error> {
        Self::from_id(id).ok_or_else(|| format!("unknown COSE algorithm {id}"))
    }
}

impl From<CoseAlgorithm> for i64 {
    fn from(alg: CoseAlgorithm) -> Self {
        alg.id()
    }
}

/// Public key material by COSE key type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    /// Elliptic curve key with both coordinates
    Ec2 { curve: i64, x: Vec<u8>, y: Vec<u8> },
    /// Octet key pair (Edwards curves)
    Okp { curve: i64, x: Vec<u8> },
    /// RSA modulus and public exponent, big-endian
    Rsa { n: Vec<u8>, e: Vec<u8> },
}

/// A decoded `COSE_Key`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CosePublicKey {
    /// Algorithm identifier declared in the key (label 3)
    pub algorithm: i64,
    pub material: KeyMaterial,
}

impl CosePublicKey {
    /// Decode a complete CBOR buffer holding exactly one `COSE_Key`
    ///
    /// # Errors
    /// Returns `MalformedPayload` if the buffer is not a single well-formed key.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, CeremonyError> {
        let (key, consumed) = Self::decode_prefix(bytes)?;
        if consumed != bytes.len() {
            return Err(CeremonyError::malformed("trailing bytes after COSE key"));
        }
        Ok(key)
    }

    /// Decode a `COSE_Key` at the start of `bytes`, returning it together
    /// with the number of bytes it occupied
    ///
    /// # Errors
    /// Returns `MalformedPayload` if the prefix is not a well-formed key.
    pub fn decode_prefix(bytes: &[u8]) -> Result<(Self, usize), CeremonyError> {
        let mut rest = bytes;
        let value: Value = ciborium::de::from_reader(&mut rest)
            .map_err(|_| CeremonyError::malformed("invalid CBOR in COSE key"))?;
        let consumed = bytes.len() - rest.len();

        let Value::Map(map) = value else {
            return Err(CeremonyError::malformed("COSE key is not a map"));
        };

        let kty = int_field(&map, LABEL_KTY, "kty")?;
        let algorithm = int_field(&map, LABEL_ALG, "alg")?;

        let material = match kty {
            KTY_EC2 => KeyMaterial::Ec2 {
                curve: int_field(&map, LABEL_CRV, "crv")?,
                x: bytes_field(&map, LABEL_X, "x")?.to_vec(),
                y: bytes_field(&map, LABEL_Y, "y")?.to_vec(),
            },
            KTY_OKP => KeyMaterial::Okp {
                curve: int_field(&map, LABEL_CRV, "crv")?,
                x: bytes_field(&map, LABEL_X, "x")?.to_vec(),
            },
            KTY_RSA => KeyMaterial::Rsa {
                n: bytes_field(&map, LABEL_RSA_N, "n")?.to_vec(),
                e: bytes_field(&map, LABEL_RSA_E, "e")?.to_vec(),
            },
            other => {
                return Err(CeremonyError::malformed(format!(
                    "unsupported COSE key type {other}"
                )))
            }
        };

        Ok((Self { algorithm, material }, consumed))
    }

    /// The only algorithm a key of this material can verify with
    #[must_use]
    pub fn native_algorithm(&self) -> CoseAlgorithm {
        match &self.material {
            KeyMaterial::Ec2 { .. } => CoseAlgorithm::Es256,
            KeyMaterial::Okp { .. } => CoseAlgorithm::EdDsa,
            KeyMaterial::Rsa { .. } => CoseAlgorithm::Rs256,
        }
    }

    /// Check the key material is a usable public key of its declared type
    ///
    /// # Errors
    /// * `UnsupportedAlgorithm` when the `alg` label does not belong to the
    ///   key type (ES256 needs EC2, EdDSA needs OKP, RS256 needs RSA).
    /// * `MalformedPayload` when the key is structurally valid CBOR but not
    ///   a usable key (point off the curve, wrong lengths, tiny modulus).
    pub fn validate(&self) -> Result<(), CeremonyError> {
        if self.algorithm != self.native_algorithm().id() {
            return Err(CeremonyError::UnsupportedAlgorithm(self.algorithm));
        }
        match &self.material {
            KeyMaterial::Ec2 { curve, .. } => {
                if *curve != CRV_P256 {
                    return Err(CeremonyError::malformed(format!(
                        "unsupported EC2 curve {curve}"
                    )));
                }
                let sec1 = self.sec1_point()?;
                p256::PublicKey::from_sec1_bytes(&sec1)
                    .map_err(|_| CeremonyError::malformed("EC2 point is not on P-256"))?;
                Ok(())
            }
            KeyMaterial::Okp { curve, x } => {
                if *curve != CRV_ED25519 {
                    return Err(CeremonyError::malformed(format!(
                        "unsupported OKP curve {curve}"
                    )));
                }
                if x.len() != 32 {
                    return Err(CeremonyError::malformed("Ed25519 key must be 32 bytes"));
                }
                Ok(())
            }
            KeyMaterial::Rsa { n, e } => {
                let modulus = rsa::BigUint::from_bytes_be(n);
                let bits = modulus.bits();
                if bits < RSA_MIN_MODULUS_BITS {
                    return Err(CeremonyError::malformed(format!(
                        "RSA modulus of {bits} bits is too small"
                    )));
                }
                rsa::RsaPublicKey::new_with_max_size(
                    modulus,
                    rsa::BigUint::from_bytes_be(e),
                    RSA_MAX_MODULUS_BITS,
                )
                .map_err(|err| CeremonyError::malformed(format!("invalid RSA key: {err}")))?;
                Ok(())
            }
        }
    }

    /// Uncompressed SEC1 encoding (`0x04 || x || y`) of an EC2 key
    ///
    /// # Errors
    /// Returns `MalformedPayload` for non-EC2 keys or coordinates that are not 32 bytes.
    pub fn sec1_point(&self) -> Result<Vec<u8>, CeremonyError> {
        let KeyMaterial::Ec2 { x, y, .. } = &self.material else {
            return Err(CeremonyError::malformed("not an EC2 key"));
        };
        if x.len() != 32 || y.len() != 32 {
            return Err(CeremonyError::malformed("EC2 coordinates must be 32 bytes"));
        }
        let mut point = Vec::with_capacity(65);
        point.push(0x04); // Uncompressed point format
        point.extend_from_slice(x);
        point.extend_from_slice(y);
        Ok(point)
    }

    /// Encode back into a CBOR `COSE_Key` map
    ///
    /// # Errors
    /// Returns `MalformedPayload` if CBOR serialization fails.
    pub fn to_cbor(&self) -> Result<Vec<u8>, CeremonyError> {
        let mut entries = Vec::with_capacity(5);
        match &self.material {
            KeyMaterial::Ec2 { curve, x, y } => {
                entries.push((int(LABEL_KTY), int(KTY_EC2)));
                entries.push((int(LABEL_ALG), int(self.algorithm)));
                entries.push((int(LABEL_CRV), int(*curve)));
                entries.push((int(LABEL_X), Value::Bytes(x.clone())));
                entries.push((int(LABEL_Y), Value::Bytes(y.clone())));
            }
            KeyMaterial::Okp { curve, x } => {
                entries.push((int(LABEL_KTY), int(KTY_OKP)));
                entries.push((int(LABEL_ALG), int(self.algorithm)));
                entries.push((int(LABEL_CRV), int(*curve)));
                entries.push((int(LABEL_X), Value::Bytes(x.clone())));
            }
            KeyMaterial::Rsa { n, e } => {
                entries.push((int(LABEL_KTY), int(KTY_RSA)));
                entries.push((int(LABEL_ALG), int(self.algorithm)));
                entries.push((int(LABEL_RSA_N), Value::Bytes(n.clone())));
                entries.push((int(LABEL_RSA_E), Value::Bytes(e.clone())));
            }
        }

        let mut buf = Vec::new();
        ciborium::ser::into_writer(&Value::Map(entries), &mut buf)
            .map_err(|_| CeremonyError::malformed("failed to encode COSE key"))?;
        Ok(buf)
    }
}

fn int(v: i64) -> Value {
    Value::Integer(v.into())
}

fn lookup(map: &[(Value, Value)], label: i64) -> Option<&Value> {
    map.iter().find_map(|(k, v)| match k {
        Value::Integer(i) if i128::from(*i) == i128::from(label) => Some(v),
        _ => None,
    })
}

fn int_field(map: &[(Value, Value)], label: i64, name: &str) -> Result<i64, CeremonyError> {
    match lookup(map, label) {
        Some(Value::Integer(i)) => i64::try_from(*i)
            .map_err(|_| CeremonyError::malformed(format!("COSE {name} out of range"))),
        _ => Err(CeremonyError::malformed(format!(
            "missing or invalid COSE {name}"
        ))),
    }
}

fn bytes_field<'a>(
    map: &'a [(Value, Value)],
    label: i64,
    name: &str,
) -> Result<&'a [u8], CeremonyError> {
    match lookup(map, label) {
        Some(Value::Bytes(bytes)) => Ok(bytes.as_slice()),
        _ => Err(CeremonyError::malformed(format!(
            "missing or invalid COSE {name}"
        ))),
    }
}
