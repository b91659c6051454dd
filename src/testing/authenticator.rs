//! Software authenticator
//!
//! Produces attestation and assertion responses the way a browser and a
//! platform authenticator would, signing with real keys. Test code can then
//! tamper with individual pieces of a response.

use ciborium::value::Value;
use rand::RngCore;
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, Ed25519KeyPair, KeyPair, ECDSA_P256_SHA256_ASN1_SIGNING};
use rsa::signature::{SignatureEncoding, Signer};
use rsa::traits::PublicKeyParts;
use serde_json::json;
use sha2::Sha256;

use crate::webauthn::authenticator_data::{
    self, FLAG_ATTESTED_CREDENTIAL, FLAG_USER_PRESENT, FLAG_USER_VERIFIED,
};
use crate::webauthn::client_data::{TYPE_CREATE, TYPE_GET};
use crate::webauthn::crypto::{encode_b64url, sha256, signed_message};
use crate::webauthn::{
    AuthenticationOptions, AuthenticationResponse, AuthenticatorAssertionResponse,
    AuthenticatorAttestationResponse, CoseAlgorithm, CosePublicKey, CredentialId, KeyMaterial,
    RegistrationOptions, RegistrationResponse,
};

enum SigningKey {
    Es256(EcdsaKeyPair),
    Ed25519(Ed25519KeyPair),
    Rs256(Box<rsa::pkcs1v15::SigningKey<Sha256>>),
}

pub struct SoftAuthenticator {
    rp_id_hash: [u8; 32],
    origin: String,
    credential_id: Vec<u8>,
    aaguid: [u8; 16],
    key: SigningKey,
    public_key: CosePublicKey,
    rng: SystemRandom,
    counter: u32,
    counter_step: u32,
    flags: u8,
    self_attestation: bool,
    cross_origin: bool,
    user_handle: Option<String>,
}

impl SoftAuthenticator {
    /// Authenticator holding a fresh P-256 key
    ///
    /// # Panics
    /// Panics if key generation fails.
    #[must_use]
    pub fn es256(rp_id: &str, origin: &str) -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
            .expect("generate P-256 key");
        let pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &rng)
            .expect("load P-256 key");
        let point = pair.public_key().as_ref();
        let public_key = CosePublicKey {
            algorithm: CoseAlgorithm::Es256.id(),
            material: KeyMaterial::Ec2 {
                curve: 1,
                x: point[1..33].to_vec(),
                y: point[33..65].to_vec(),
            },
        };
        Self::with_key(rp_id, origin, SigningKey::Es256(pair), public_key, rng)
    }

    /// Authenticator holding a fresh Ed25519 key
    ///
    /// # Panics
    /// Panics if key generation fails.
    #[must_use]
    pub fn ed25519(rp_id: &str, origin: &str) -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).expect("generate Ed25519 key");
        let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).expect("load Ed25519 key");
        let public_key = CosePublicKey {
            algorithm: CoseAlgorithm::EdDsa.id(),
            material: KeyMaterial::Okp {
                curve: 6,
                x: pair.public_key().as_ref().to_vec(),
            },
        };
        Self::with_key(rp_id, origin, SigningKey::Ed25519(pair), public_key, rng)
    }

    /// Authenticator holding a fresh 2048-bit RSA key
    ///
    /// # Panics
    /// Panics if key generation fails.
    #[must_use]
    pub fn rs256(rp_id: &str, origin: &str) -> Self {
        let private = rsa::RsaPrivateKey::new(&mut rsa::rand_core::OsRng, 2048)
            .expect("generate RSA key");
        let public_key = CosePublicKey {
            algorithm: CoseAlgorithm::Rs256.id(),
            material: KeyMaterial::Rsa {
                n: private.n().to_bytes_be(),
                e: private.e().to_bytes_be(),
            },
        };
        let key = SigningKey::Rs256(Box::new(rsa::pkcs1v15::SigningKey::<Sha256>::new(private)));
        Self::with_key(rp_id, origin, key, public_key, SystemRandom::new())
    }

    fn with_key(
        rp_id: &str,
        origin: &str,
        key: SigningKey,
        public_key: CosePublicKey,
        rng: SystemRandom,
    ) -> Self {
        let mut credential_id = vec![0u8; 16];
        rand::rng().fill_bytes(&mut credential_id);
        Self {
            rp_id_hash: sha256(rp_id.as_bytes()),
            origin: origin.to_string(),
            credential_id,
            aaguid: [0u8; 16],
            key,
            public_key,
            rng,
            counter: 0,
            counter_step: 1,
            flags: FLAG_USER_PRESENT | FLAG_USER_VERIFIED,
            self_attestation: false,
            cross_origin: false,
            user_handle: None,
        }
    }

    /// Override the UP/UV/BE/BS flag bits reported
    #[must_use]
    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    /// How much the counter grows per assertion; zero mimics counterless authenticators
    #[must_use]
    pub fn with_counter_step(mut self, step: u32) -> Self {
        self.counter_step = step;
        self
    }

    #[must_use]
    pub fn with_credential_id(mut self, id: &[u8]) -> Self {
        self.credential_id = id.to_vec();
        self
    }

    /// Sign registrations with a packed self-attestation
    #[must_use]
    pub fn with_self_attestation(mut self) -> Self {
        self.self_attestation = true;
        self
    }

    /// Claim the ceremony ran in a cross-origin iframe
    #[must_use]
    pub fn with_cross_origin(mut self) -> Self {
        self.cross_origin = true;
        self
    }

    /// Report `alg` in the COSE key instead of the key's own algorithm
    #[must_use]
    pub fn with_algorithm_label(mut self, alg: i64) -> Self {
        self.public_key.algorithm = alg;
        self
    }

    /// Set the current counter; the next assertion reports `value + step`
    pub fn set_counter(&mut self, value: u32) {
        self.counter = value;
    }

    /// Origin the simulated browser writes into client data
    pub fn set_origin(&mut self, origin: &str) {
        self.origin = origin.to_string();
    }

    #[must_use]
    pub fn credential_id(&self) -> CredentialId {
        CredentialId::new(self.credential_id.clone())
    }

    #[must_use]
    pub fn public_key(&self) -> &CosePublicKey {
        &self.public_key
    }

    /// Answer `navigator.credentials.create()`
    pub fn register(&mut self, options: &RegistrationOptions) -> RegistrationResponse {
        self.user_handle = Some(options.user.id.clone());
        self.attest(&options.challenge, TYPE_CREATE)
    }

    /// Answer `navigator.credentials.get()`
    pub fn authenticate(&mut self, options: &AuthenticationOptions) -> AuthenticationResponse {
        self.assert(&options.challenge, TYPE_GET)
    }

    /// Build a registration response over `challenge` with an arbitrary client data type
    ///
    /// # Panics
    /// Panics if CBOR encoding or signing fails.
    #[must_use]
    pub fn attest(&self, challenge: &str, ceremony_type: &str) -> RegistrationResponse {
        let client_data_json = self.client_data(challenge, ceremony_type);
        let cose_key = self.public_key.to_cbor().expect("encode COSE key");
        let auth_data = authenticator_data::encode(
            &self.rp_id_hash,
            self.flags | FLAG_ATTESTED_CREDENTIAL,
            self.counter,
            Some((&self.aaguid, &self.credential_id, &cose_key)),
        );

        let (fmt, att_stmt) = if self.self_attestation {
            let signature = self.sign(&signed_message(&auth_data, &client_data_json));
            (
                "packed",
                vec![
                    (
                        Value::Text("alg".to_string()),
                        Value::Integer(self.public_key.algorithm.into()),
                    ),
                    (Value::Text("sig".to_string()), Value::Bytes(signature)),
                ],
            )
        } else {
            ("none", Vec::new())
        };

        let object = Value::Map(vec![
            (Value::Text("fmt".to_string()), Value::Text(fmt.to_string())),
            (Value::Text("attStmt".to_string()), Value::Map(att_stmt)),
            (Value::Text("authData".to_string()), Value::Bytes(auth_data)),
        ]);
        let mut attestation_object = Vec::new();
        ciborium::ser::into_writer(&object, &mut attestation_object)
            .expect("encode attestation object");

        let id = encode_b64url(&self.credential_id);
        RegistrationResponse {
            id: id.clone(),
            raw_id: id,
            r#type: "public-key".to_string(),
            response: AuthenticatorAttestationResponse {
                client_data_json: encode_b64url(&client_data_json),
                attestation_object: encode_b64url(&attestation_object),
            },
        }
    }

    /// Build an assertion over `challenge` with an arbitrary client data type
    ///
    /// Advances the counter by the configured step before signing.
    pub fn assert(&mut self, challenge: &str, ceremony_type: &str) -> AuthenticationResponse {
        self.counter = self.counter.wrapping_add(self.counter_step);
        let client_data_json = self.client_data(challenge, ceremony_type);
        let auth_data =
            authenticator_data::encode(&self.rp_id_hash, self.flags, self.counter, None);
        let signature = self.sign(&signed_message(&auth_data, &client_data_json));

        let id = encode_b64url(&self.credential_id);
        AuthenticationResponse {
            id: id.clone(),
            raw_id: id,
            r#type: "public-key".to_string(),
            response: AuthenticatorAssertionResponse {
                client_data_json: encode_b64url(&client_data_json),
                authenticator_data: encode_b64url(&auth_data),
                signature: encode_b64url(&signature),
                user_handle: self.user_handle.clone(),
            },
        }
    }

    fn client_data(&self, challenge: &str, ceremony_type: &str) -> Vec<u8> {
        json!({
            "type": ceremony_type,
            "challenge": challenge,
            "origin": self.origin,
            "crossOrigin": self.cross_origin,
        })
        .to_string()
        .into_bytes()
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        match &self.key {
            SigningKey::Es256(pair) => pair
                .sign(&self.rng, message)
                .expect("ECDSA signing")
                .as_ref()
                .to_vec(),
            SigningKey::Ed25519(pair) => pair.sign(message).as_ref().to_vec(),
            SigningKey::Rs256(key) => key.sign(message).to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webauthn::attestation::AttestationObject;
    use crate::webauthn::authenticator_data::AuthenticatorData;
    use crate::webauthn::crypto::{decode_b64url, verify_signature};

    #[test]
    fn test_assertions_verify_and_count() {
        let mut authenticator = SoftAuthenticator::es256("example.com", "https://example.com");
        let response = authenticator.assert("Y2hhbGxlbmdl", TYPE_GET);

        let auth_data = decode_b64url(&response.response.authenticator_data, "ad").unwrap();
        let client_data = decode_b64url(&response.response.client_data_json, "cd").unwrap();
        let signature = decode_b64url(&response.response.signature, "sig").unwrap();

        let parsed = AuthenticatorData::parse(&auth_data).unwrap();
        assert_eq!(parsed.sign_count, 1);
        assert_eq!(parsed.rp_id_hash, sha256(b"example.com"));
        assert!(verify_signature(
            authenticator.public_key(),
            -7,
            &signed_message(&auth_data, &client_data),
            &signature
        )
        .unwrap());
    }

    #[test]
    fn test_rs256_assertions_verify() {
        let mut authenticator = SoftAuthenticator::rs256("example.com", "https://example.com");
        assert!(authenticator.public_key().validate().is_ok());
        let response = authenticator.assert("Y2hhbGxlbmdl", TYPE_GET);

        let auth_data = decode_b64url(&response.response.authenticator_data, "ad").unwrap();
        let client_data = decode_b64url(&response.response.client_data_json, "cd").unwrap();
        let signature = decode_b64url(&response.response.signature, "sig").unwrap();
        assert!(verify_signature(
            authenticator.public_key(),
            -257,
            &signed_message(&auth_data, &client_data),
            &signature
        )
        .unwrap());
    }

    #[test]
    fn test_self_attested_registration_decodes() {
        let authenticator =
            SoftAuthenticator::ed25519("example.com", "https://example.com").with_self_attestation();
        let response = authenticator.attest("Y2hhbGxlbmdl", TYPE_CREATE);

        let bytes = decode_b64url(&response.response.attestation_object, "ao").unwrap();
        let client_data = decode_b64url(&response.response.client_data_json, "cd").unwrap();
        let object = AttestationObject::decode(&bytes).unwrap();
        assert!(object
            .verify(authenticator.public_key(), &client_data, true)
            .is_ok());
        assert_eq!(
            object.auth_data.attested_credential.unwrap().credential_id,
            authenticator.credential_id().as_bytes()
        );
    }
}
