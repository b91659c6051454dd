//! Error taxonomy for `WebAuthn` ceremonies
//!
//! Every failure a ceremony can end in maps to exactly one [`CeremonyError`]
//! variant. Callers facing the end user should collapse all of them into a
//! single generic rejection and keep [`CeremonyError::kind`] for the logs.

use thiserror::Error;

/// Failures raised by the challenge and credential stores
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A credential with the same identifier is already stored
    #[error("credential already exists")]
    Duplicate,

    /// The addressed record does not exist
    #[error("record not found")]
    NotFound,

    /// Compare-and-set on the signature counter lost, or the counter did not advance
    #[error("signature counter regression: stored {stored}, received {received}")]
    CounterRegression { stored: u32, received: u32 },

    /// The backing medium failed (I/O, serialization)
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Reasons a registration or authentication ceremony is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CeremonyError {
    /// The client payload could not be decoded into the expected schema
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The supplied user name does not normalize into a valid handle
    #[error("invalid user handle: {0}")]
    InvalidUserHandle(String),

    /// The challenge token is unknown, already used, expired, or issued to someone else
    #[error("challenge is invalid or expired")]
    ChallengeInvalidOrExpired,

    /// The challenge echoed in the client data differs from the issued one
    #[error("challenge mismatch")]
    ChallengeMismatch,

    /// The origin declared by the client is not accepted
    #[error("origin mismatch")]
    OriginMismatch,

    /// The response belongs to the other ceremony type
    #[error("ceremony type mismatch")]
    CeremonyTypeMismatch,

    /// The authenticator data is scoped to another relying party
    #[error("relying party mismatch")]
    RelyingPartyMismatch,

    /// The authenticator did not report user presence
    #[error("user presence required")]
    UserPresenceRequired,

    /// Policy requires user verification and the authenticator did not perform it
    #[error("user verification required")]
    UserVerificationRequired,

    #[error("credential already registered")]
    DuplicateCredential,

    /// The user name is taken; only its owner may add credentials to it
    #[error("user already registered")]
    UserAlreadyRegistered,

    #[error("unknown user")]
    UnknownUser,

    #[error("unknown credential")]
    UnknownCredential,

    #[error("invalid signature")]
    InvalidSignature,

    /// COSE algorithm identifier that is unknown or not allowed by policy
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(i64),

    /// The signature counter did not advance; possible cloned authenticator
    #[error("signature counter regression: stored {stored}, received {received}")]
    CounterRegression { stored: u32, received: u32 },

    /// A store failed for reasons unrelated to the ceremony itself
    #[error("storage failure: {0}")]
    Storage(String),
}

impl CeremonyError {
    /// Stable label for logs and metrics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            CeremonyError::MalformedPayload(_) => "malformed_payload",
            CeremonyError::InvalidUserHandle(_) => "invalid_user_handle",
            CeremonyError::ChallengeInvalidOrExpired => "challenge_invalid_or_expired",
            CeremonyError::ChallengeMismatch => "challenge_mismatch",
            CeremonyError::OriginMismatch => "origin_mismatch",
            CeremonyError::CeremonyTypeMismatch => "ceremony_type_mismatch",
            CeremonyError::RelyingPartyMismatch => "relying_party_mismatch",
            CeremonyError::UserPresenceRequired => "user_presence_required",
            CeremonyError::UserVerificationRequired => "user_verification_required",
            CeremonyError::DuplicateCredential => "duplicate_credential",
            CeremonyError::UserAlreadyRegistered => "user_already_registered",
            CeremonyError::UnknownUser => "unknown_user",
            CeremonyError::UnknownCredential => "unknown_credential",
            CeremonyError::InvalidSignature => "invalid_signature",
            CeremonyError::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            CeremonyError::CounterRegression { .. } => "counter_regression",
            CeremonyError::Storage(_) => "storage",
        }
    }

    /// Whether the failure is a server fault rather than a rejected ceremony
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, CeremonyError::Storage(_))
    }

    pub(crate) fn malformed(what: impl Into<String>) -> Self {
        CeremonyError::MalformedPayload(what.into())
    }
}

impl From<StoreError> for CeremonyError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate => CeremonyError::DuplicateCredential,
            StoreError::NotFound => CeremonyError::UnknownCredential,
            StoreError::CounterRegression { stored, received } => {
                CeremonyError::CounterRegression { stored, received }
            }
            StoreError::Backend(msg) => CeremonyError::Storage(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_onto_ceremony_taxonomy() {
        assert_eq!(
            CeremonyError::from(StoreError::Duplicate),
            CeremonyError::DuplicateCredential
        );
        assert_eq!(
            CeremonyError::from(StoreError::NotFound),
            CeremonyError::UnknownCredential
        );
        assert_eq!(
            CeremonyError::from(StoreError::CounterRegression {
                stored: 4,
                received: 4
            }),
            CeremonyError::CounterRegression {
                stored: 4,
                received: 4
            }
        );
        assert!(CeremonyError::from(StoreError::Backend("disk full".into())).is_internal());
    }

    #[test]
    fn test_only_storage_failures_are_internal() {
        assert!(!CeremonyError::InvalidSignature.is_internal());
        assert!(!CeremonyError::ChallengeInvalidOrExpired.is_internal());
        assert!(!CeremonyError::UserAlreadyRegistered.is_internal());
        assert!(!CeremonyError::malformed("bad base64").is_internal());
    }

    #[test]
    fn test_kind_labels_are_snake_case() {
        let errors = [
            CeremonyError::ChallengeMismatch,
            CeremonyError::UnsupportedAlgorithm(-999),
            CeremonyError::CounterRegression {
                stored: 1,
                received: 0,
            },
        ];
        for err in errors {
            let kind = err.kind();
            assert!(kind
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
