//! `WebAuthn` ceremony engine
//!
//! Challenge issuance, registration and assertion verification, and the
//! signature-counter rule, implemented over pluggable stores with
//! `ring`, `p256` and `rsa` doing the cryptography.

pub mod attestation;
pub mod authenticator_data;
mod ceremony;
pub mod challenge_store;
pub mod client_data;
pub mod cose;
pub mod credential_store;
pub mod crypto;
mod errors;
mod policy;
mod types;
mod user;

// Re-exports for public use
pub use ceremony::{CeremonyEngine, SECURITY_LOG_TARGET};
pub use challenge_store::{ChallengeStore, Clock, MemoryChallengeStore, SystemClock};
pub use cose::{CoseAlgorithm, CosePublicKey, KeyMaterial};
pub use credential_store::{
    counter_advances, CredentialStore, JsonFileCredentialStore, MemoryCredentialStore,
};
pub use crypto::verify_signature;
pub use errors::{CeremonyError, StoreError};
pub use policy::{PolicyError, RelyingPartyPolicy, UserVerification};
pub use types::*;
pub use user::UserHandle;
