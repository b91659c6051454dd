//! `WebAuthn` cryptography operations
//!
//! Signature verification for the supported COSE algorithms, plus the
//! hashing, randomness and base64url helpers the ceremonies need. Nothing in
//! here performs I/O or holds state.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use ring::signature::{self, RsaPublicKeyComponents, UnparsedPublicKey};
use sha2::{Digest, Sha256};

use super::cose::{CoseAlgorithm, CosePublicKey, KeyMaterial};
use super::errors::CeremonyError;

/// Number of random bytes in every issued challenge
pub const CHALLENGE_LENGTH: usize = 32;

/// Hash data using SHA-256
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Generate a fresh random challenge value
#[must_use]
pub fn generate_challenge() -> [u8; CHALLENGE_LENGTH] {
    let mut bytes = [0u8; CHALLENGE_LENGTH];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}

/// Encode bytes as unpadded base64url
#[must_use]
pub fn encode_b64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode an unpadded base64url field of a client payload
///
/// # Errors
/// Returns `MalformedPayload` naming `field` if the input is not valid base64url.
pub fn decode_b64url(value: &str, field: &str) -> Result<Vec<u8>, CeremonyError> {
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|_| CeremonyError::malformed(format!("{field} is not valid base64url")))
}

/// Verify `signature` over `signed_bytes` with a credential public key
///
/// Returns `Ok(false)` when the signature does not verify.
///
/// # Errors
/// Returns `UnsupportedAlgorithm` if `algorithm` is unknown or does not match
/// the key type, and `MalformedPayload` if the key material is unusable.
pub fn verify_signature(
    public_key: &CosePublicKey,
    algorithm: i64,
    signed_bytes: &[u8],
    signature: &[u8],
) -> Result<bool, CeremonyError> {
    let alg =
        CoseAlgorithm::from_id(algorithm).ok_or(CeremonyError::UnsupportedAlgorithm(algorithm))?;

    match (alg, &public_key.material) {
        (CoseAlgorithm::Es256, KeyMaterial::Ec2 { .. }) => {
            let point = public_key.sec1_point()?;
            let key = UnparsedPublicKey::new(&signature::ECDSA_P256_SHA256_ASN1, &point);
            Ok(key.verify(signed_bytes, signature).is_ok())
        }
        (CoseAlgorithm::EdDsa, KeyMaterial::Okp { x, .. }) => {
            let key = UnparsedPublicKey::new(&signature::ED25519, x);
            Ok(key.verify(signed_bytes, signature).is_ok())
        }
        (CoseAlgorithm::Rs256, KeyMaterial::Rsa { n, e }) => {
            let components = RsaPublicKeyComponents {
                n: strip_leading_zeros(n),
                e: strip_leading_zeros(e),
            };
            Ok(components
                .verify(&signature::RSA_PKCS1_2048_8192_SHA256, signed_bytes, signature)
                .is_ok())
        }
        _ => Err(CeremonyError::UnsupportedAlgorithm(algorithm)),
    }
}

/// Build the message an authenticator signs: `authData || SHA-256(clientDataJSON)`
#[must_use]
pub fn signed_message(authenticator_data: &[u8], client_data_json: &[u8]) -> Vec<u8> {
    let client_data_hash = sha256(client_data_json);
    let mut message = Vec::with_capacity(authenticator_data.len() + client_data_hash.len());
    message.extend_from_slice(authenticator_data);
    message.extend_from_slice(&client_data_hash);
    message
}

// ring rejects big-endian integers with leading zero bytes
fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(bytes.len().saturating_sub(1));
    &bytes[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::rand::SystemRandom;
    use ring::signature::{
        EcdsaKeyPair, Ed25519KeyPair, KeyPair, ECDSA_P256_SHA256_ASN1_SIGNING,
    };

    fn ec2_pair() -> (EcdsaKeyPair, CosePublicKey) {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng).unwrap();
        let pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &rng)
                .unwrap();
        let point = pair.public_key().as_ref().to_vec();
        let key = CosePublicKey {
            algorithm: -7,
            material: KeyMaterial::Ec2 {
                curve: 1,
                x: point[1..33].to_vec(),
                y: point[33..65].to_vec(),
            },
        };
        (pair, key)
    }

    #[test]
    fn test_es256_signature_verifies() {
        let rng = SystemRandom::new();
        let (pair, key) = ec2_pair();
        let message = signed_message(b"authenticator-data", b"{\"type\":\"webauthn.get\"}");
        let sig = pair.sign(&rng, &message).unwrap();

        assert!(verify_signature(&key, -7, &message, sig.as_ref()).unwrap());
        assert!(!verify_signature(&key, -7, b"something else", sig.as_ref()).unwrap());
    }

    #[test]
    fn test_ed25519_signature_verifies() {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
        let key = CosePublicKey {
            algorithm: -8,
            material: KeyMaterial::Okp {
                curve: 6,
                x: pair.public_key().as_ref().to_vec(),
            },
        };
        let sig = pair.sign(b"hello");

        assert!(verify_signature(&key, -8, b"hello", sig.as_ref()).unwrap());
        assert!(!verify_signature(&key, -8, b"hullo", sig.as_ref()).unwrap());
    }

    #[test]
    fn test_algorithm_must_match_key_type() {
        let (_, key) = ec2_pair();
        assert_eq!(
            verify_signature(&key, -257, b"m", b"s"),
            Err(CeremonyError::UnsupportedAlgorithm(-257))
        );
        assert_eq!(
            verify_signature(&key, -35, b"m", b"s"),
            Err(CeremonyError::UnsupportedAlgorithm(-35))
        );
    }

    #[test]
    fn test_garbage_signature_is_false_not_error() {
        let (_, key) = ec2_pair();
        assert!(!verify_signature(&key, -7, b"m", &[0u8; 8]).unwrap());
    }

    #[test]
    fn test_challenges_are_random() {
        assert_ne!(generate_challenge(), generate_challenge());
    }

    #[test]
    fn test_base64url_helpers() {
        let encoded = encode_b64url(&[0xfb, 0xff, 0x00]);
        assert_eq!(encoded, "-_8A");
        assert_eq!(decode_b64url(&encoded, "x").unwrap(), vec![0xfb, 0xff, 0x00]);
        assert_eq!(decode_b64url("-_8A", "x").unwrap().len(), 3);
        assert!(matches!(
            decode_b64url("not base64!", "signature"),
            Err(CeremonyError::MalformedPayload(msg)) if msg.contains("signature")
        ));
    }

    #[test]
    fn test_strip_leading_zeros() {
        assert_eq!(strip_leading_zeros(&[0, 0, 1, 2]), &[1, 2]);
        assert_eq!(strip_leading_zeros(&[0, 0]), &[0]);
        assert_eq!(strip_leading_zeros(&[5]), &[5]);
    }
}
