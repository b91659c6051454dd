//! Test fixtures providing pre-built test objects
//!
//! The relying party used throughout is `example.com` served from
//! `https://example.com`, with all three algorithms allowed and user
//! verification required.

use std::sync::Arc;

use chrono::Utc;

use super::authenticator::SoftAuthenticator;
use super::clock::ManualClock;
use crate::settings::Settings;
use crate::webauthn::{
    AuthenticatedUser, AuthenticationSubmission, CeremonyEngine, CeremonyError, CosePublicKey,
    CredentialId, KeyMaterial, MemoryChallengeStore, MemoryCredentialStore, RegisteredCredential,
    RegistrationSubmission, RelyingPartyPolicy, StoredCredential, UserHandle,
};

pub const RP_ID: &str = "example.com";
pub const ORIGIN: &str = "https://example.com";

/// An engine over in-memory stores sharing one manual clock
pub struct TestBed {
    pub engine: Arc<CeremonyEngine>,
    pub clock: Arc<ManualClock>,
    pub challenges: Arc<MemoryChallengeStore>,
    pub credentials: Arc<MemoryCredentialStore>,
}

/// # Panics
/// Panics if `name` is not a valid handle.
#[must_use]
pub fn user(name: &str) -> UserHandle {
    UserHandle::parse(name).expect("valid test user name")
}

#[must_use]
pub fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.relying_party.id = RP_ID.to_string();
    settings.relying_party.name = "Example".to_string();
    settings.relying_party.origins = vec![ORIGIN.to_string()];
    settings.relying_party.algorithms =
        vec!["ES256".to_string(), "EdDSA".to_string(), "RS256".to_string()];
    settings
}

/// # Panics
/// Panics if the settings do not form a valid policy.
#[must_use]
pub fn policy(settings: &Settings) -> RelyingPartyPolicy {
    RelyingPartyPolicy::from_settings(&settings.relying_party, &settings.challenges)
        .expect("valid test policy")
}

#[must_use]
pub fn test_bed() -> TestBed {
    test_bed_with(&settings())
}

#[must_use]
pub fn test_bed_with(settings: &Settings) -> TestBed {
    let clock = Arc::new(ManualClock::default());
    let challenges = Arc::new(MemoryChallengeStore::with_clock(clock.clone()));
    let credentials = Arc::new(MemoryCredentialStore::with_clock(clock.clone()));
    let engine = CeremonyEngine::new(
        Arc::new(policy(settings)),
        challenges.clone(),
        credentials.clone(),
    )
    .with_clock(clock.clone());

    TestBed {
        engine: Arc::new(engine),
        clock,
        challenges,
        credentials,
    }
}

/// Run a full registration ceremony for `user` with `authenticator`
///
/// # Errors
/// Returns whatever the engine rejects the ceremony with.
pub fn register(
    engine: &CeremonyEngine,
    user: &UserHandle,
    authenticator: &mut SoftAuthenticator,
) -> Result<RegisteredCredential, CeremonyError> {
    let begin = engine.begin_registration(user)?;
    let submission = RegistrationSubmission {
        token: begin.token,
        credential: authenticator.register(&begin.options),
    };
    engine.finish_registration(user, &submission, None)
}

/// Run a full authentication ceremony for `user` with `authenticator`
///
/// # Errors
/// Returns whatever the engine rejects the ceremony with.
pub fn authenticate(
    engine: &CeremonyEngine,
    user: &UserHandle,
    authenticator: &mut SoftAuthenticator,
) -> Result<AuthenticatedUser, CeremonyError> {
    let begin = engine.begin_authentication(user)?;
    let submission = AuthenticationSubmission {
        token: begin.token,
        credential: authenticator.authenticate(&begin.options),
    };
    engine.finish_authentication(user, &submission, None)
}

/// A stored credential record with a placeholder Ed25519 key
///
/// # Panics
/// Panics if `owner` is not a valid handle.
#[must_use]
pub fn stored_credential(owner: &str, id: &[u8], counter: u32) -> StoredCredential {
    let public_key = CosePublicKey {
        algorithm: -8,
        material: KeyMaterial::Okp {
            curve: 6,
            x: vec![0x5a; 32],
        },
    }
    .to_cbor()
    .expect("encode placeholder key");

    StoredCredential {
        credential_id: CredentialId::new(id.to_vec()),
        owner: user(owner),
        public_key,
        algorithm: -8,
        signature_counter: counter,
        aaguid: vec![0; 16],
        backup_eligible: false,
        backup_state: false,
        created_at: Utc::now(),
        last_used_at: None,
    }
}
