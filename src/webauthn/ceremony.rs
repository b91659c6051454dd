//! Registration and authentication ceremonies
//!
//! [`CeremonyEngine`] ties the policy, the challenge store, the credential
//! store and the verifier together. Each `finish_*` call first decodes the
//! client payload completely; only a well-formed payload gets to consume its
//! challenge. From there every check fails fast, and no store is mutated
//! unless every check passed.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{error, info, warn};

use super::attestation::AttestationObject;
use super::authenticator_data::AuthenticatorData;
use super::challenge_store::{ChallengeStore, Clock, SystemClock};
use super::client_data::CollectedClientData;
use super::cose::CosePublicKey;
use super::credential_store::{counter_advances, CredentialStore};
use super::crypto::{self, decode_b64url, encode_b64url};
use super::errors::CeremonyError;
use super::policy::RelyingPartyPolicy;
use super::types::{
    AuthenticatedUser, AuthenticationOptions, AuthenticationSubmission,
    AuthenticatorSelectionCriteria, CeremonyPurpose, ChallengePayload, CredentialId,
    IssuedChallenge, PublicKeyCredentialDescriptor, PublicKeyCredentialParameters,
    RegisteredCredential, RegistrationOptions, RegistrationSubmission, RelyingParty,
    StoredCredential, UserEntity,
};
use super::user::UserHandle;

/// Log target for events that may indicate a cloned or compromised authenticator
pub const SECURITY_LOG_TARGET: &str = "passkey_ceremony::security";

const PUBLIC_KEY_TYPE: &str = "public-key";

/// Checks shared by both ceremonies once the challenge has been consumed
struct ClientEvidence<'a> {
    client_data: &'a CollectedClientData,
    client_challenge: &'a [u8],
    auth_data: &'a AuthenticatorData,
}

/// A registration response decoded into its parts
struct DecodedRegistration {
    raw_id: CredentialId,
    client_data_json: Vec<u8>,
    client_data: CollectedClientData,
    client_challenge: Vec<u8>,
    attestation: AttestationObject,
}

/// An authentication response decoded into its parts
struct DecodedAssertion {
    raw_id: CredentialId,
    client_data_json: Vec<u8>,
    client_data: CollectedClientData,
    client_challenge: Vec<u8>,
    auth_data_bytes: Vec<u8>,
    auth_data: AuthenticatorData,
    signature: Vec<u8>,
    user_handle: Option<Vec<u8>>,
}

/// Held while a registration checks and claims its user name
struct EnrollmentClaim<'a> {
    enrolling: &'a DashMap<UserHandle, ()>,
    user: UserHandle,
}

impl Drop for EnrollmentClaim<'_> {
    fn drop(&mut self) {
        self.enrolling.remove(&self.user);
    }
}

pub struct CeremonyEngine {
    policy: Arc<RelyingPartyPolicy>,
    challenges: Arc<dyn ChallengeStore>,
    credentials: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    enrolling: DashMap<UserHandle, ()>,
}

impl CeremonyEngine {
    #[must_use]
    pub fn new(
        policy: Arc<RelyingPartyPolicy>,
        challenges: Arc<dyn ChallengeStore>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            policy,
            challenges,
            credentials,
            clock: Arc::new(SystemClock),
            enrolling: DashMap::new(),
        }
    }

    /// Replace the clock used for credential and authentication timestamps
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn policy(&self) -> &RelyingPartyPolicy {
        &self.policy
    }

    #[must_use]
    pub fn challenge_store(&self) -> &Arc<dyn ChallengeStore> {
        &self.challenges
    }

    /// Issue a registration challenge for a user name nobody owns yet
    ///
    /// # Errors
    /// Returns `UserAlreadyRegistered` if `user` already has credentials and
    /// `Storage` if a store fails.
    pub fn begin_registration(
        &self,
        user: &UserHandle,
    ) -> Result<ChallengePayload<RegistrationOptions>, CeremonyError> {
        if !self.credentials.find_by_owner(user)?.is_empty() {
            log_rejection("registration", user, &CeremonyError::UserAlreadyRegistered);
            return Err(CeremonyError::UserAlreadyRegistered);
        }
        let challenge = self.issue(user, CeremonyPurpose::Registration)?;
        let policy = &self.policy;

        let options = RegistrationOptions {
            challenge: encode_b64url(&challenge.value),
            rp: RelyingParty {
                id: policy.relying_party_id().to_string(),
                name: policy.relying_party_name().to_string(),
            },
            user: UserEntity {
                id: encode_b64url(user.as_str().as_bytes()),
                name: user.to_string(),
                display_name: user.to_string(),
            },
            public_key_params: policy
                .allowed_algorithms()
                .iter()
                .map(|alg| PublicKeyCredentialParameters {
                    r#type: PUBLIC_KEY_TYPE.to_string(),
                    alg: alg.id(),
                })
                .collect(),
            timeout: self.timeout_millis(),
            attestation: if policy.require_self_attestation() {
                "direct".to_string()
            } else {
                "none".to_string()
            },
            authenticator_selection: AuthenticatorSelectionCriteria {
                resident_key: "preferred".to_string(),
                user_verification: policy.user_verification().as_str().to_string(),
            },
            exclude_credentials: Vec::new(),
        };

        Ok(ChallengePayload {
            token: challenge.token,
            options,
        })
    }

    /// Verify a registration response and store the new credential
    ///
    /// `observed_origin` is the origin the transport saw (the HTTP `Origin`
    /// header); when given, the client-declared origin must equal it.
    ///
    /// # Errors
    /// Returns the first failed check as a [`CeremonyError`]. On any error no
    /// credential has been stored.
    pub fn finish_registration(
        &self,
        user: &UserHandle,
        submission: &RegistrationSubmission,
        observed_origin: Option<&str>,
    ) -> Result<RegisteredCredential, CeremonyError> {
        let result = self.verify_registration(user, submission, observed_origin);
        match &result {
            Ok(registered) => info!(
                "Registered credential {} for '{user}'",
                registered.credential_id
            ),
            Err(err) => log_rejection("registration", user, err),
        }
        result
    }

    /// Issue an authentication challenge for `user`
    ///
    /// # Errors
    /// Returns `UnknownUser` if the user has no credentials and
    /// `Storage` if a store fails.
    pub fn begin_authentication(
        &self,
        user: &UserHandle,
    ) -> Result<ChallengePayload<AuthenticationOptions>, CeremonyError> {
        let credentials = self.credentials.find_by_owner(user)?;
        if credentials.is_empty() {
            log_rejection("authentication", user, &CeremonyError::UnknownUser);
            return Err(CeremonyError::UnknownUser);
        }

        let challenge = self.issue(user, CeremonyPurpose::Authentication)?;
        let options = AuthenticationOptions {
            challenge: encode_b64url(&challenge.value),
            timeout: self.timeout_millis(),
            rp_id: self.policy.relying_party_id().to_string(),
            allow_credentials: credentials
                .iter()
                .map(|c| PublicKeyCredentialDescriptor::public_key(&c.credential_id))
                .collect(),
            user_verification: self.policy.user_verification().as_str().to_string(),
        };

        Ok(ChallengePayload {
            token: challenge.token,
            options,
        })
    }

    /// Verify an authentication response and advance the credential's counter
    ///
    /// # Errors
    /// Returns the first failed check as a [`CeremonyError`]. On any error the
    /// stored counter is unchanged.
    pub fn finish_authentication(
        &self,
        user: &UserHandle,
        submission: &AuthenticationSubmission,
        observed_origin: Option<&str>,
    ) -> Result<AuthenticatedUser, CeremonyError> {
        let result = self.verify_authentication(user, submission, observed_origin);
        match &result {
            Ok(authenticated) => info!(
                "Authenticated '{user}' with credential {} (counter {})",
                authenticated.credential_id, authenticated.signature_counter
            ),
            Err(err) => log_rejection("authentication", user, err),
        }
        result
    }

    fn verify_registration(
        &self,
        user: &UserHandle,
        submission: &RegistrationSubmission,
        observed_origin: Option<&str>,
    ) -> Result<RegisteredCredential, CeremonyError> {
        let decoded = decode_registration(submission)?;
        let attested = decoded
            .attestation
            .auth_data
            .attested_credential
            .as_ref()
            .ok_or_else(|| CeremonyError::malformed("registration carries no credential"))?;

        let challenge = self.consume(&submission.token, user)?;
        self.check_evidence(
            &challenge,
            &ClientEvidence {
                client_data: &decoded.client_data,
                client_challenge: &decoded.client_challenge,
                auth_data: &decoded.attestation.auth_data,
            },
            observed_origin,
            CeremonyPurpose::Registration,
        )?;

        let key = &attested.public_key;
        if !self.policy.allows_algorithm(key.algorithm) {
            return Err(CeremonyError::UnsupportedAlgorithm(key.algorithm));
        }

        decoded.attestation.verify(
            key,
            &decoded.client_data_json,
            self.policy.require_self_attestation(),
        )?;

        if decoded.raw_id.as_bytes() != attested.credential_id.as_slice() {
            return Err(CeremonyError::malformed(
                "credential id does not match attested credential",
            ));
        }
        if self.credentials.find_by_id(&decoded.raw_id)?.is_some() {
            return Err(CeremonyError::DuplicateCredential);
        }

        // The name may have been taken since the challenge was issued
        let _claim = self.claim_enrollment(&challenge.subject)?;
        if !self.credentials.find_by_owner(&challenge.subject)?.is_empty() {
            return Err(CeremonyError::UserAlreadyRegistered);
        }

        let auth_data = &decoded.attestation.auth_data;
        let credential = StoredCredential {
            credential_id: decoded.raw_id.clone(),
            owner: challenge.subject.clone(),
            public_key: attested.public_key_cbor.clone(),
            algorithm: key.algorithm,
            signature_counter: auth_data.sign_count,
            aaguid: attested.aaguid.to_vec(),
            backup_eligible: auth_data.backup_eligible(),
            backup_state: auth_data.backup_state(),
            created_at: self.clock.now(),
            last_used_at: None,
        };
        // A concurrent registration of the same id surfaces as DuplicateCredential
        self.credentials.create(credential)?;

        Ok(RegisteredCredential {
            user: challenge.subject,
            credential_id: decoded.raw_id,
        })
    }

    fn verify_authentication(
        &self,
        user: &UserHandle,
        submission: &AuthenticationSubmission,
        observed_origin: Option<&str>,
    ) -> Result<AuthenticatedUser, CeremonyError> {
        let decoded = decode_assertion(submission)?;

        let stored = self
            .credentials
            .find_by_id(&decoded.raw_id)?
            .filter(|c| &c.owner == user)
            .ok_or(CeremonyError::UnknownCredential)?;
        if let Some(handle) = &decoded.user_handle {
            if handle.as_slice() != user.as_str().as_bytes() {
                return Err(CeremonyError::UnknownCredential);
            }
        }

        let challenge = self.consume(&submission.token, user)?;
        self.check_evidence(
            &challenge,
            &ClientEvidence {
                client_data: &decoded.client_data,
                client_challenge: &decoded.client_challenge,
                auth_data: &decoded.auth_data,
            },
            observed_origin,
            CeremonyPurpose::Authentication,
        )?;

        if !self.policy.allows_algorithm(stored.algorithm) {
            return Err(CeremonyError::UnsupportedAlgorithm(stored.algorithm));
        }
        let key = CosePublicKey::from_cbor(&stored.public_key).map_err(|_| {
            CeremonyError::Storage(format!(
                "stored public key of {} is unreadable",
                stored.credential_id
            ))
        })?;
        let message = crypto::signed_message(&decoded.auth_data_bytes, &decoded.client_data_json);
        if !crypto::verify_signature(&key, stored.algorithm, &message, &decoded.signature)? {
            return Err(CeremonyError::InvalidSignature);
        }

        let received = decoded.auth_data.sign_count;
        if !counter_advances(stored.signature_counter, received) {
            return Err(CeremonyError::CounterRegression {
                stored: stored.signature_counter,
                received,
            });
        }
        self.credentials
            .update_counter(&stored.credential_id, stored.signature_counter, received)?;

        Ok(AuthenticatedUser {
            user: challenge.subject,
            credential_id: stored.credential_id,
            signature_counter: received,
            authenticated_at: self.clock.now(),
        })
    }

    /// Claim `user` for one in-flight registration
    fn claim_enrollment(&self, user: &UserHandle) -> Result<EnrollmentClaim<'_>, CeremonyError> {
        match self.enrolling.entry(user.clone()) {
            Entry::Occupied(_) => Err(CeremonyError::UserAlreadyRegistered),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(EnrollmentClaim {
                    enrolling: &self.enrolling,
                    user: user.clone(),
                })
            }
        }
    }

    fn issue(
        &self,
        user: &UserHandle,
        purpose: CeremonyPurpose,
    ) -> Result<IssuedChallenge, CeremonyError> {
        Ok(self
            .challenges
            .issue(user, purpose, self.policy.challenge_ttl())?)
    }

    /// Consume the challenge behind `token`; it must have been issued to `user`
    fn consume(&self, token: &str, user: &UserHandle) -> Result<IssuedChallenge, CeremonyError> {
        match self.challenges.consume(token)? {
            Some(challenge) if &challenge.subject == user => Ok(challenge),
            _ => Err(CeremonyError::ChallengeInvalidOrExpired),
        }
    }

    fn check_evidence(
        &self,
        challenge: &IssuedChallenge,
        evidence: &ClientEvidence<'_>,
        observed_origin: Option<&str>,
        purpose: CeremonyPurpose,
    ) -> Result<(), CeremonyError> {
        if evidence.client_challenge != challenge.value.as_slice() {
            return Err(CeremonyError::ChallengeMismatch);
        }

        let origin = evidence.client_data.origin.as_str();
        let transport_agrees = observed_origin
            .map_or(true, |observed| observed.trim_end_matches('/') == origin);
        // Ceremonies embedded in a foreign frame are not accepted
        if !self.policy.is_expected_origin(origin)
            || !transport_agrees
            || evidence.client_data.is_cross_origin()
        {
            return Err(CeremonyError::OriginMismatch);
        }

        if evidence.client_data.ceremony_type != purpose.client_data_type()
            || challenge.purpose != purpose
        {
            return Err(CeremonyError::CeremonyTypeMismatch);
        }

        let auth_data = evidence.auth_data;
        if &auth_data.rp_id_hash != self.policy.rp_id_hash() {
            return Err(CeremonyError::RelyingPartyMismatch);
        }
        if !auth_data.user_present() {
            return Err(CeremonyError::UserPresenceRequired);
        }
        if self.policy.requires_user_verification() && !auth_data.user_verified() {
            return Err(CeremonyError::UserVerificationRequired);
        }
        Ok(())
    }

    fn timeout_millis(&self) -> u64 {
        u64::try_from(self.policy.challenge_ttl().as_millis()).unwrap_or(u64::MAX)
    }
}

fn decode_registration(
    submission: &RegistrationSubmission,
) -> Result<DecodedRegistration, CeremonyError> {
    let credential = &submission.credential;
    if credential.r#type != PUBLIC_KEY_TYPE {
        return Err(CeremonyError::malformed("credential type must be public-key"));
    }
    let raw_id = CredentialId::from_b64url(&credential.raw_id)?;

    let client_data_json = decode_b64url(&credential.response.client_data_json, "clientDataJSON")?;
    let client_data = CollectedClientData::parse(&client_data_json)?;
    let client_challenge = decode_b64url(&client_data.challenge, "client data challenge")?;

    let attestation_bytes =
        decode_b64url(&credential.response.attestation_object, "attestationObject")?;
    let attestation = AttestationObject::decode(&attestation_bytes)?;
    if let Some(attested) = &attestation.auth_data.attested_credential {
        attested.public_key.validate()?;
    }

    Ok(DecodedRegistration {
        raw_id,
        client_data_json,
        client_data,
        client_challenge,
        attestation,
    })
}

fn decode_assertion(
    submission: &AuthenticationSubmission,
) -> Result<DecodedAssertion, CeremonyError> {
    let credential = &submission.credential;
    if credential.r#type != PUBLIC_KEY_TYPE {
        return Err(CeremonyError::malformed("credential type must be public-key"));
    }
    let raw_id = CredentialId::from_b64url(&credential.raw_id)?;
    let response = &credential.response;

    let client_data_json = decode_b64url(&response.client_data_json, "clientDataJSON")?;
    let client_data = CollectedClientData::parse(&client_data_json)?;
    let client_challenge = decode_b64url(&client_data.challenge, "client data challenge")?;

    let auth_data_bytes = decode_b64url(&response.authenticator_data, "authenticatorData")?;
    let auth_data = AuthenticatorData::parse(&auth_data_bytes)?;
    let signature = decode_b64url(&response.signature, "signature")?;
    let user_handle = response
        .user_handle
        .as_deref()
        .filter(|handle| !handle.is_empty())
        .map(|handle| decode_b64url(handle, "userHandle"))
        .transpose()?;

    Ok(DecodedAssertion {
        raw_id,
        client_data_json,
        client_data,
        client_challenge,
        auth_data_bytes,
        auth_data,
        signature,
        user_handle,
    })
}

fn log_rejection(ceremony: &str, user: &UserHandle, err: &CeremonyError) {
    match err {
        CeremonyError::CounterRegression { stored, received } => error!(
            target: SECURITY_LOG_TARGET,
            "Signature counter regression for '{user}': stored {stored}, received {received}; possible cloned authenticator"
        ),
        err if err.is_internal() => error!("{ceremony} for '{user}' failed: {err}"),
        err => warn!("{ceremony} for '{user}' rejected: {}", err.kind()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::{self, ORIGIN};
    use crate::testing::SoftAuthenticator;
    use crate::webauthn::authenticator_data::FLAG_USER_PRESENT;
    use std::time::Duration;

    fn alice() -> UserHandle {
        fixtures::user("alice")
    }

    #[test]
    fn test_registration_then_authentication() {
        let bed = fixtures::test_bed();
        let mut authenticator = SoftAuthenticator::es256(fixtures::RP_ID, ORIGIN);

        let begin = bed.engine.begin_registration(&alice()).unwrap();
        assert!(begin.options.exclude_credentials.is_empty());
        let response = authenticator.register(&begin.options);
        let registered = bed
            .engine
            .finish_registration(
                &alice(),
                &RegistrationSubmission {
                    token: begin.token,
                    credential: response,
                },
                Some(ORIGIN),
            )
            .unwrap();
        assert_eq!(registered.credential_id, authenticator.credential_id());

        let begin = bed.engine.begin_authentication(&alice()).unwrap();
        assert_eq!(begin.options.allow_credentials.len(), 1);
        let response = authenticator.authenticate(&begin.options);
        let authenticated = bed
            .engine
            .finish_authentication(
                &alice(),
                &AuthenticationSubmission {
                    token: begin.token,
                    credential: response,
                },
                Some(ORIGIN),
            )
            .unwrap();
        assert_eq!(authenticated.user, alice());
        assert_eq!(authenticated.signature_counter, 1);
    }

    #[test]
    fn test_malformed_payload_does_not_consume_challenge() {
        let bed = fixtures::test_bed();
        let mut authenticator = SoftAuthenticator::es256(fixtures::RP_ID, ORIGIN);
        let begin = bed.engine.begin_registration(&alice()).unwrap();

        let mut broken = authenticator.register(&begin.options);
        broken.response.attestation_object = "%%%".to_string();
        let err = bed
            .engine
            .finish_registration(
                &alice(),
                &RegistrationSubmission {
                    token: begin.token.clone(),
                    credential: broken,
                },
                None,
            )
            .unwrap_err();
        assert!(matches!(err, CeremonyError::MalformedPayload(_)));

        // The untouched challenge still completes the ceremony
        let response = authenticator.register(&begin.options);
        assert!(bed
            .engine
            .finish_registration(
                &alice(),
                &RegistrationSubmission {
                    token: begin.token,
                    credential: response,
                },
                None,
            )
            .is_ok());
    }

    #[test]
    fn test_challenge_for_another_user_is_invalid() {
        let bed = fixtures::test_bed();
        let mut authenticator = SoftAuthenticator::es256(fixtures::RP_ID, ORIGIN);
        let begin = bed.engine.begin_registration(&alice()).unwrap();
        let response = authenticator.register(&begin.options);

        let err = bed
            .engine
            .finish_registration(
                &fixtures::user("mallory"),
                &RegistrationSubmission {
                    token: begin.token,
                    credential: response,
                },
                None,
            )
            .unwrap_err();
        assert_eq!(err, CeremonyError::ChallengeInvalidOrExpired);
        assert!(bed.credentials.is_empty());
    }

    #[test]
    fn test_expired_challenge_is_rejected() {
        let bed = fixtures::test_bed();
        let mut authenticator = SoftAuthenticator::es256(fixtures::RP_ID, ORIGIN);
        let begin = bed.engine.begin_registration(&alice()).unwrap();
        let response = authenticator.register(&begin.options);

        bed.clock.advance(Duration::from_secs(301));
        let err = bed
            .engine
            .finish_registration(
                &alice(),
                &RegistrationSubmission {
                    token: begin.token,
                    credential: response,
                },
                None,
            )
            .unwrap_err();
        assert_eq!(err, CeremonyError::ChallengeInvalidOrExpired);
    }

    #[test]
    fn test_transport_origin_must_agree() {
        let bed = fixtures::test_bed();
        let mut authenticator = SoftAuthenticator::es256(fixtures::RP_ID, ORIGIN);
        let begin = bed.engine.begin_registration(&alice()).unwrap();
        let response = authenticator.register(&begin.options);

        let err = bed
            .engine
            .finish_registration(
                &alice(),
                &RegistrationSubmission {
                    token: begin.token,
                    credential: response,
                },
                Some("https://evil.example"),
            )
            .unwrap_err();
        assert_eq!(err, CeremonyError::OriginMismatch);
    }

    #[test]
    fn test_wrong_relying_party_is_rejected() {
        let bed = fixtures::test_bed();
        let mut authenticator = SoftAuthenticator::es256("other.example", ORIGIN);
        let begin = bed.engine.begin_registration(&alice()).unwrap();
        let response = authenticator.register(&begin.options);

        let err = bed
            .engine
            .finish_registration(
                &alice(),
                &RegistrationSubmission {
                    token: begin.token,
                    credential: response,
                },
                None,
            )
            .unwrap_err();
        assert_eq!(err, CeremonyError::RelyingPartyMismatch);
    }

    #[test]
    fn test_presence_and_verification_flags() {
        let bed = fixtures::test_bed();

        let mut absent = SoftAuthenticator::es256(fixtures::RP_ID, ORIGIN).with_flags(0);
        let begin = bed.engine.begin_registration(&alice()).unwrap();
        let err = bed
            .engine
            .finish_registration(
                &alice(),
                &RegistrationSubmission {
                    token: begin.token,
                    credential: absent.register(&begin.options),
                },
                None,
            )
            .unwrap_err();
        assert_eq!(err, CeremonyError::UserPresenceRequired);

        let mut unverified =
            SoftAuthenticator::es256(fixtures::RP_ID, ORIGIN).with_flags(FLAG_USER_PRESENT);
        let begin = bed.engine.begin_registration(&alice()).unwrap();
        let err = bed
            .engine
            .finish_registration(
                &alice(),
                &RegistrationSubmission {
                    token: begin.token,
                    credential: unverified.register(&begin.options),
                },
                None,
            )
            .unwrap_err();
        assert_eq!(err, CeremonyError::UserVerificationRequired);
    }

    #[test]
    fn test_disallowed_algorithm_is_rejected() {
        let mut settings = fixtures::settings();
        settings.relying_party.algorithms = vec!["ES256".to_string()];
        let bed = fixtures::test_bed_with(&settings);

        let mut authenticator = SoftAuthenticator::ed25519(fixtures::RP_ID, ORIGIN);
        let begin = bed.engine.begin_registration(&alice()).unwrap();
        let err = bed
            .engine
            .finish_registration(
                &alice(),
                &RegistrationSubmission {
                    token: begin.token,
                    credential: authenticator.register(&begin.options),
                },
                None,
            )
            .unwrap_err();
        assert_eq!(err, CeremonyError::UnsupportedAlgorithm(-8));
    }

    #[test]
    fn test_required_self_attestation() {
        let mut settings = fixtures::settings();
        settings.relying_party.require_self_attestation = true;
        let bed = fixtures::test_bed_with(&settings);

        let mut plain = SoftAuthenticator::es256(fixtures::RP_ID, ORIGIN);
        let begin = bed.engine.begin_registration(&alice()).unwrap();
        assert_eq!(begin.options.attestation, "direct");
        let err = bed
            .engine
            .finish_registration(
                &alice(),
                &RegistrationSubmission {
                    token: begin.token,
                    credential: plain.register(&begin.options),
                },
                None,
            )
            .unwrap_err();
        assert!(matches!(err, CeremonyError::MalformedPayload(_)));

        let mut attesting =
            SoftAuthenticator::es256(fixtures::RP_ID, ORIGIN).with_self_attestation();
        let begin = bed.engine.begin_registration(&alice()).unwrap();
        assert!(bed
            .engine
            .finish_registration(
                &alice(),
                &RegistrationSubmission {
                    token: begin.token,
                    credential: attesting.register(&begin.options),
                },
                None,
            )
            .is_ok());
    }

    #[test]
    fn test_begin_authentication_requires_credentials() {
        let bed = fixtures::test_bed();
        assert_eq!(
            bed.engine.begin_authentication(&alice()).unwrap_err(),
            CeremonyError::UnknownUser
        );
        assert_eq!(bed.challenges.len(), 0);
    }

    #[test]
    fn test_registered_name_cannot_be_claimed_again() {
        let bed = fixtures::test_bed();
        let mut owner = SoftAuthenticator::es256(fixtures::RP_ID, ORIGIN);
        fixtures::register(&bed.engine, &alice(), &mut owner).unwrap();

        let mut mallorys = SoftAuthenticator::es256(fixtures::RP_ID, ORIGIN);
        assert_eq!(
            fixtures::register(&bed.engine, &alice(), &mut mallorys).unwrap_err(),
            CeremonyError::UserAlreadyRegistered
        );
        assert_eq!(bed.challenges.len(), 0);
        assert_eq!(bed.credentials.len(), 1);

        assert_eq!(
            fixtures::authenticate(&bed.engine, &alice(), &mut mallorys).unwrap_err(),
            CeremonyError::UnknownCredential
        );
        assert!(fixtures::authenticate(&bed.engine, &alice(), &mut owner).is_ok());
    }

    #[test]
    fn test_pending_registration_loses_to_completed_one() {
        let bed = fixtures::test_bed();
        let first = bed.engine.begin_registration(&alice()).unwrap();
        let second = bed.engine.begin_registration(&alice()).unwrap();

        let mut winner = SoftAuthenticator::es256(fixtures::RP_ID, ORIGIN);
        bed.engine
            .finish_registration(
                &alice(),
                &RegistrationSubmission {
                    token: first.token,
                    credential: winner.register(&first.options),
                },
                None,
            )
            .unwrap();

        let mut late = SoftAuthenticator::ed25519(fixtures::RP_ID, ORIGIN);
        let err = bed
            .engine
            .finish_registration(
                &alice(),
                &RegistrationSubmission {
                    token: second.token,
                    credential: late.register(&second.options),
                },
                None,
            )
            .unwrap_err();
        assert_eq!(err, CeremonyError::UserAlreadyRegistered);
        assert_eq!(bed.credentials.len(), 1);
        assert!(bed.credentials.find_by_id(&late.credential_id()).unwrap().is_none());
    }

    #[test]
    fn test_concurrent_registrations_of_one_name_store_one_credential() {
        let bed = fixtures::test_bed();
        let submissions: Vec<RegistrationSubmission> = (0..4)
            .map(|_| {
                let mut authenticator = SoftAuthenticator::es256(fixtures::RP_ID, ORIGIN);
                let begin = bed.engine.begin_registration(&alice()).unwrap();
                RegistrationSubmission {
                    token: begin.token,
                    credential: authenticator.register(&begin.options),
                }
            })
            .collect();

        let user = alice();
        let outcomes: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = submissions
                .iter()
                .map(|submission| {
                    let engine = &bed.engine;
                    let user = &user;
                    scope.spawn(move || engine.finish_registration(user, submission, None))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect()
        });

        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .filter(|o| o.is_err())
            .all(|o| o == &Err(CeremonyError::UserAlreadyRegistered)));
        assert_eq!(bed.credentials.len(), 1);
    }

    #[test]
    fn test_mislabelled_key_is_rejected_at_registration() {
        let bed = fixtures::test_bed();
        let mut authenticator =
            SoftAuthenticator::es256(fixtures::RP_ID, ORIGIN).with_algorithm_label(-8);
        let begin = bed.engine.begin_registration(&alice()).unwrap();
        let err = bed
            .engine
            .finish_registration(
                &alice(),
                &RegistrationSubmission {
                    token: begin.token,
                    credential: authenticator.register(&begin.options),
                },
                None,
            )
            .unwrap_err();
        assert_eq!(err, CeremonyError::UnsupportedAlgorithm(-8));
        assert!(bed.credentials.is_empty());
    }

    #[test]
    fn test_cross_origin_ceremony_is_rejected() {
        let bed = fixtures::test_bed();
        let mut framed = SoftAuthenticator::es256(fixtures::RP_ID, ORIGIN).with_cross_origin();
        let begin = bed.engine.begin_registration(&alice()).unwrap();
        let err = bed
            .engine
            .finish_registration(
                &alice(),
                &RegistrationSubmission {
                    token: begin.token,
                    credential: framed.register(&begin.options),
                },
                Some(ORIGIN),
            )
            .unwrap_err();
        assert_eq!(err, CeremonyError::OriginMismatch);
        assert!(bed.credentials.is_empty());
    }

    #[test]
    fn test_credential_of_another_user_is_unknown() {
        let bed = fixtures::test_bed();
        let mut bobs = SoftAuthenticator::es256(fixtures::RP_ID, ORIGIN);
        fixtures::register(&bed.engine, &fixtures::user("bob"), &mut bobs).unwrap();
        let mut alices = SoftAuthenticator::es256(fixtures::RP_ID, ORIGIN);
        fixtures::register(&bed.engine, &alice(), &mut alices).unwrap();

        let begin = bed.engine.begin_authentication(&alice()).unwrap();
        let err = bed
            .engine
            .finish_authentication(
                &alice(),
                &AuthenticationSubmission {
                    token: begin.token.clone(),
                    credential: bobs.authenticate(&begin.options),
                },
                None,
            )
            .unwrap_err();
        assert_eq!(err, CeremonyError::UnknownCredential);

        // The challenge was not consumed by the unknown-credential rejection
        assert!(bed
            .engine
            .finish_authentication(
                &alice(),
                &AuthenticationSubmission {
                    token: begin.token,
                    credential: alices.authenticate(&begin.options),
                },
                None,
            )
            .is_ok());
    }

    #[test]
    fn test_counter_regression_leaves_stored_counter() {
        let bed = fixtures::test_bed();
        let mut authenticator = SoftAuthenticator::es256(fixtures::RP_ID, ORIGIN);
        fixtures::register(&bed.engine, &alice(), &mut authenticator).unwrap();
        authenticator.set_counter(10);
        fixtures::authenticate(&bed.engine, &alice(), &mut authenticator).unwrap();

        authenticator.set_counter(4);
        let err = fixtures::authenticate(&bed.engine, &alice(), &mut authenticator).unwrap_err();
        assert_eq!(
            err,
            CeremonyError::CounterRegression {
                stored: 11,
                received: 5
            }
        );
        let stored = bed
            .credentials
            .find_by_id(&authenticator.credential_id())
            .unwrap()
            .unwrap();
        assert_eq!(stored.signature_counter, 11);
    }

    #[test]
    fn test_zero_counter_authenticator_keeps_working() {
        let bed = fixtures::test_bed();
        let mut authenticator =
            SoftAuthenticator::es256(fixtures::RP_ID, ORIGIN).with_counter_step(0);
        fixtures::register(&bed.engine, &alice(), &mut authenticator).unwrap();

        for _ in 0..3 {
            let authenticated =
                fixtures::authenticate(&bed.engine, &alice(), &mut authenticator).unwrap();
            assert_eq!(authenticated.signature_counter, 0);
        }
    }

    #[test]
    fn test_tampered_signature_is_invalid() {
        let bed = fixtures::test_bed();
        let mut authenticator = SoftAuthenticator::ed25519(fixtures::RP_ID, ORIGIN);
        fixtures::register(&bed.engine, &alice(), &mut authenticator).unwrap();

        let begin = bed.engine.begin_authentication(&alice()).unwrap();
        let mut response = authenticator.authenticate(&begin.options);
        let mut signature = decode_b64url(&response.response.signature, "sig").unwrap();
        signature[0] ^= 0x01;
        response.response.signature = encode_b64url(&signature);

        let err = bed
            .engine
            .finish_authentication(
                &alice(),
                &AuthenticationSubmission {
                    token: begin.token,
                    credential: response,
                },
                None,
            )
            .unwrap_err();
        assert_eq!(err, CeremonyError::InvalidSignature);
    }
}
