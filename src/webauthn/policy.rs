//! Relying-party policy
//!
//! The immutable rule set every ceremony is checked against. It is built once
//! from settings, validated, and then shared read-only.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use super::cose::CoseAlgorithm;
use super::crypto;
use crate::settings::{ChallengeSettings, RelyingPartySettings};

/// Whether the authenticator must verify the user (PIN, biometrics)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserVerification {
    #[default]
    Required,
    Preferred,
    Discouraged,
}

impl UserVerification {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            UserVerification::Required => "required",
            UserVerification::Preferred => "preferred",
            UserVerification::Discouraged => "discouraged",
        }
    }
}

impl std::str::FromStr for UserVerification {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "required" => Ok(UserVerification::Required),
            "preferred" => Ok(UserVerification::Preferred),
            "discouraged" => Ok(UserVerification::Discouraged),
            other => Err(PolicyError::InvalidUserVerification(other.to_string())),
        }
    }
}

/// Reasons a relying-party configuration is refused at startup
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("relying party id must not be empty")]
    MissingRelyingPartyId,

    #[error("at least one expected origin is required")]
    NoOrigins,

    #[error("invalid origin '{origin}': {reason}")]
    InvalidOrigin { origin: String, reason: String },

    #[error("origin '{origin}' is not within relying party id '{rp_id}'")]
    OriginOutsideRelyingParty { origin: String, rp_id: String },

    #[error("challenge TTL must be greater than zero")]
    ZeroChallengeTtl,

    #[error("at least one signature algorithm must be allowed")]
    NoAlgorithms,

    #[error("{0}")]
    UnknownAlgorithm(String),

    #[error("invalid user verification requirement '{0}'")]
    InvalidUserVerification(String),
}

#[derive(Debug, Clone)]
pub struct RelyingPartyPolicy {
    relying_party_id: String,
    relying_party_name: String,
    expected_origins: Vec<String>,
    challenge_ttl: Duration,
    allowed_algorithms: Vec<CoseAlgorithm>,
    user_verification: UserVerification,
    require_self_attestation: bool,
    rp_id_hash: [u8; 32],
}

impl RelyingPartyPolicy {
    /// Build and validate the policy from settings
    ///
    /// # Errors
    /// Returns a `PolicyError` when the relying party id is empty, an origin is
    /// not an `https` URL (plain `http` is only accepted for `localhost`), an
    /// origin host lies outside the relying party id, the challenge TTL is
    /// zero, or no known algorithm is allowed.
    pub fn from_settings(
        relying_party: &RelyingPartySettings,
        challenges: &ChallengeSettings,
    ) -> Result<Self, PolicyError> {
        let relying_party_id = relying_party.id.trim().to_ascii_lowercase();
        if relying_party_id.is_empty() {
            return Err(PolicyError::MissingRelyingPartyId);
        }

        let expected_origins = relying_party
            .origins
            .iter()
            .map(|origin| validate_origin(origin, &relying_party_id))
            .collect::<Result<Vec<_>, _>>()?;
        if expected_origins.is_empty() {
            return Err(PolicyError::NoOrigins);
        }

        if challenges.ttl_seconds == 0 {
            return Err(PolicyError::ZeroChallengeTtl);
        }

        let mut allowed_algorithms = Vec::with_capacity(relying_party.algorithms.len());
        for name in &relying_party.algorithms {
            let alg = name
                .parse::<CoseAlgorithm>()
                .map_err(PolicyError::UnknownAlgorithm)?;
            if !allowed_algorithms.contains(&alg) {
                allowed_algorithms.push(alg);
            }
        }
        if allowed_algorithms.is_empty() {
            return Err(PolicyError::NoAlgorithms);
        }

        let relying_party_name = if relying_party.name.trim().is_empty() {
            relying_party_id.clone()
        } else {
            relying_party.name.trim().to_string()
        };

        Ok(Self {
            rp_id_hash: crypto::sha256(relying_party_id.as_bytes()),
            relying_party_id,
            relying_party_name,
            expected_origins,
            challenge_ttl: Duration::from_secs(challenges.ttl_seconds),
            allowed_algorithms,
            user_verification: relying_party.user_verification,
            require_self_attestation: relying_party.require_self_attestation,
        })
    }

    #[must_use]
    pub fn relying_party_id(&self) -> &str {
        &self.relying_party_id
    }

    #[must_use]
    pub fn relying_party_name(&self) -> &str {
        &self.relying_party_name
    }

    /// SHA-256 of the relying party id, as authenticators embed it
    #[must_use]
    pub fn rp_id_hash(&self) -> &[u8; 32] {
        &self.rp_id_hash
    }

    /// Normalized origins (`scheme://host[:port]`)
    #[must_use]
    pub fn expected_origins(&self) -> &[String] {
        &self.expected_origins
    }

    #[must_use]
    pub fn is_expected_origin(&self, origin: &str) -> bool {
        self.expected_origins.iter().any(|expected| expected == origin)
    }

    #[must_use]
    pub fn challenge_ttl(&self) -> Duration {
        self.challenge_ttl
    }

    #[must_use]
    pub fn allowed_algorithms(&self) -> &[CoseAlgorithm] {
        &self.allowed_algorithms
    }

    /// Whether the COSE algorithm id is known and allowed
    #[must_use]
    pub fn allows_algorithm(&self, algorithm: i64) -> bool {
        CoseAlgorithm::from_id(algorithm).is_some_and(|alg| self.allowed_algorithms.contains(&alg))
    }

    #[must_use]
    pub fn user_verification(&self) -> UserVerification {
        self.user_verification
    }

    #[must_use]
    pub fn requires_user_verification(&self) -> bool {
        self.user_verification == UserVerification::Required
    }

    #[must_use]
    pub fn require_self_attestation(&self) -> bool {
        self.require_self_attestation
    }
}

fn validate_origin(origin: &str, rp_id: &str) -> Result<String, PolicyError> {
    let invalid = |reason: &str| PolicyError::InvalidOrigin {
        origin: origin.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(origin.trim()).map_err(|err| invalid(&err.to_string()))?;
    let host = url
        .host_str()
        .ok_or_else(|| invalid("origin has no host"))?
        .to_ascii_lowercase();

    match url.scheme() {
        "https" => {}
        "http" if host == "localhost" => {}
        _ => return Err(invalid("origin must use https")),
    }

    if host != rp_id && !host.ends_with(&format!(".{rp_id}")) {
        return Err(PolicyError::OriginOutsideRelyingParty {
            origin: origin.to_string(),
            rp_id: rp_id.to_string(),
        });
    }

    Ok(url.origin().ascii_serialization())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rp(id: &str, origins: &[&str]) -> RelyingPartySettings {
        RelyingPartySettings {
            id: id.to_string(),
            origins: origins.iter().map(ToString::to_string).collect(),
            ..RelyingPartySettings::default()
        }
    }

    #[test]
    fn test_valid_policy_normalizes_origins() {
        let policy = RelyingPartyPolicy::from_settings(
            &rp("example.com", &["https://example.com/", "https://login.example.com:443"]),
            &ChallengeSettings::default(),
        )
        .unwrap();

        assert_eq!(policy.relying_party_id(), "example.com");
        assert_eq!(
            policy.expected_origins(),
            &["https://example.com", "https://login.example.com"]
        );
        assert!(policy.is_expected_origin("https://login.example.com"));
        assert!(!policy.is_expected_origin("https://evil.example"));
        assert_eq!(policy.rp_id_hash(), &crypto::sha256(b"example.com"));
        assert_eq!(policy.challenge_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_http_only_for_localhost() {
        assert!(RelyingPartyPolicy::from_settings(
            &rp("localhost", &["http://localhost:8080"]),
            &ChallengeSettings::default()
        )
        .is_ok());

        let err = RelyingPartyPolicy::from_settings(
            &rp("example.com", &["http://example.com"]),
            &ChallengeSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::InvalidOrigin { .. }));
    }

    #[test]
    fn test_origin_must_sit_under_rp_id() {
        let err = RelyingPartyPolicy::from_settings(
            &rp("example.com", &["https://notexample.com"]),
            &ChallengeSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::OriginOutsideRelyingParty { .. }));
    }

    #[test]
    fn test_rejects_empty_configuration() {
        let challenges = ChallengeSettings::default();
        assert_eq!(
            RelyingPartyPolicy::from_settings(&rp(" ", &["https://x.com"]), &challenges)
                .unwrap_err(),
            PolicyError::MissingRelyingPartyId
        );
        assert_eq!(
            RelyingPartyPolicy::from_settings(&rp("x.com", &[]), &challenges).unwrap_err(),
            PolicyError::NoOrigins
        );

        let zero_ttl = ChallengeSettings {
            ttl_seconds: 0,
            ..ChallengeSettings::default()
        };
        assert_eq!(
            RelyingPartyPolicy::from_settings(&rp("x.com", &["https://x.com"]), &zero_ttl)
                .unwrap_err(),
            PolicyError::ZeroChallengeTtl
        );

        let mut no_algs = rp("x.com", &["https://x.com"]);
        no_algs.algorithms.clear();
        assert_eq!(
            RelyingPartyPolicy::from_settings(&no_algs, &challenges).unwrap_err(),
            PolicyError::NoAlgorithms
        );
    }

    #[test]
    fn test_algorithm_allow_list() {
        let mut settings = rp("x.com", &["https://x.com"]);
        settings.algorithms = vec!["ES256".into(), "es256".into()];
        let policy =
            RelyingPartyPolicy::from_settings(&settings, &ChallengeSettings::default()).unwrap();
        assert_eq!(policy.allowed_algorithms(), &[CoseAlgorithm::Es256]);
        assert!(policy.allows_algorithm(-7));
        assert!(!policy.allows_algorithm(-257));
        assert!(!policy.allows_algorithm(-999));

        settings.algorithms = vec!["PS256".into()];
        assert!(matches!(
            RelyingPartyPolicy::from_settings(&settings, &ChallengeSettings::default()),
            Err(PolicyError::UnknownAlgorithm(_))
        ));
    }

    #[test]
    fn test_user_verification_parsing() {
        assert_eq!(
            "Preferred".parse::<UserVerification>().unwrap(),
            UserVerification::Preferred
        );
        assert!("sometimes".parse::<UserVerification>().is_err());
        assert_eq!(UserVerification::default(), UserVerification::Required);
    }
}
