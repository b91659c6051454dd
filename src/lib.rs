#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![deny(warnings)]
#![allow(clippy::multiple_crate_versions)]

/// Version of the passkey ceremony service
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod handlers;
pub mod settings;
pub mod webauthn;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Re-export commonly used items
pub use handlers::{configure_services, health};
pub use settings::Settings;
pub use webauthn::{
    AuthenticatedUser, CeremonyEngine, CeremonyError, ChallengeStore, CredentialStore,
    JsonFileCredentialStore, MemoryChallengeStore, MemoryCredentialStore, RegisteredCredential,
    RelyingPartyPolicy, UserHandle,
};
