use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::webauthn::UserVerification;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse settings: {0}")]
    Parse(#[from] basic_toml::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub relying_party: RelyingPartySettings,
    pub challenges: ChallengeSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelyingPartySettings {
    /// Relying Party ID (a registrable domain, e.g. "example.com")
    pub id: String,
    /// Relying Party name shown by the authenticator
    pub name: String,
    /// Origins allowed to run ceremonies (e.g. <https://login.example.com>)
    pub origins: Vec<String>,
    pub user_verification: UserVerification,
    /// Reject registrations without a verifiable packed self-attestation
    pub require_self_attestation: bool,
    /// Signature algorithms offered to authenticators ("ES256", "EdDSA", "RS256")
    pub algorithms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeSettings {
    pub ttl_seconds: u64,
    /// How often expired challenges are swept from memory
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageSettings {
    /// JSON file holding registered credentials; in-memory when unset
    pub credentials_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for RelyingPartySettings {
    fn default() -> Self {
        Self {
            id: "localhost".to_string(),
            name: "Passkey Ceremony".to_string(),
            origins: vec!["http://localhost:8080".to_string()],
            user_verification: UserVerification::Required,
            require_self_attestation: false,
            algorithms: vec!["ES256".to_string(), "RS256".to_string()],
        }
    }
}

impl Default for ChallengeSettings {
    fn default() -> Self {
        Self {
            ttl_seconds: 300,
            sweep_interval_seconds: 600,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from configuration files and environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Settings file cannot be read
    /// - TOML parsing fails
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_env_file();

        // Load base settings from TOML or defaults
        let mut settings = Self::load_base_settings()?;

        // Apply environment variable overrides
        Self::apply_env_overrides(&mut settings);

        settings.initialize_logging();
        Ok(settings)
    }

    /// Load base settings from TOML file(s) or use defaults
    /// Settings are loaded with the following priority (highest to lowest):
    /// 1. Environment variables (applied separately after loading base settings)
    /// 2. Settings.toml in `PASSKEY_SECRETS_DIR` (if specified and exists)
    /// 3. Settings.toml in current directory (if exists)
    /// 4. Default settings
    ///
    /// # Errors
    ///
    /// Returns an error if a settings file cannot be read or parsed
    fn load_base_settings() -> Result<Self, SettingsError> {
        let mut settings = Self::default();

        let default_config_path = Path::new("Settings.toml");
        if default_config_path.exists() {
            settings = Self::from_file(default_config_path)?;
            println!(
                "✓ Loaded base settings from {}",
                default_config_path.display()
            );
        }

        if let Ok(secrets_dir) = std::env::var("PASSKEY_SECRETS_DIR") {
            let secrets_path = Path::new(&secrets_dir).join("Settings.toml");
            if secrets_path.exists() {
                settings = Self::from_file(&secrets_path)?;
                println!("✓ Overriding settings from {}", secrets_path.display());
            } else {
                println!(
                    "ℹ PASSKEY_SECRETS_DIR set but no Settings.toml found at: {}",
                    secrets_path.display()
                );
            }
        }

        Ok(settings)
    }

    /// Parse a single TOML settings file; missing keys take their defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let toml_content = fs::read_to_string(path)?;
        Ok(basic_toml::from_str(&toml_content)?)
    }

    /// Apply environment variable overrides to settings
    pub fn apply_env_overrides(settings: &mut Self) {
        Self::apply_application_env_overrides(&mut settings.application);
        Self::apply_relying_party_env_overrides(&mut settings.relying_party);
        Self::apply_challenge_env_overrides(&mut settings.challenges);
        Self::apply_storage_env_overrides(&mut settings.storage);
        Self::apply_logging_env_overrides(&mut settings.logging);
    }

    fn apply_application_env_overrides(app_settings: &mut ApplicationSettings) {
        if let Ok(host) = std::env::var("HOST") {
            app_settings.host = host;
        }
        if let Ok(port_str) = std::env::var("PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                app_settings.port = port;
            }
        }
    }

    fn apply_relying_party_env_overrides(rp_settings: &mut RelyingPartySettings) {
        let rp_id = std::env::var("RP_ID").ok().filter(|v| !v.trim().is_empty());
        let rp_origins = std::env::var("RP_ORIGINS")
            .ok()
            .filter(|v| !v.trim().is_empty());

        // Hosted deployments announce their public hostname via SPACE_HOST
        if rp_id.is_none() && rp_origins.is_none() {
            if let Ok(space_host) = std::env::var("SPACE_HOST") {
                let space_host = space_host.trim();
                if !space_host.is_empty() {
                    let host = space_host.split(':').next().unwrap_or(space_host);
                    rp_settings.id = host.to_string();
                    rp_settings.origins = vec![format!("https://{space_host}")];
                }
            }
        }

        if let Some(id) = rp_id {
            rp_settings.id = id;
        }
        if let Some(origins) = rp_origins {
            rp_settings.origins = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(ToString::to_string)
                .collect();
        }
        if let Ok(name) = std::env::var("RP_NAME") {
            rp_settings.name = name;
        }
        if let Ok(requirement) = std::env::var("RP_USER_VERIFICATION") {
            match requirement.parse::<UserVerification>() {
                Ok(uv) => rp_settings.user_verification = uv,
                Err(err) => eprintln!("⚠️  Ignoring RP_USER_VERIFICATION: {err}"),
            }
        }
    }

    fn apply_challenge_env_overrides(challenge_settings: &mut ChallengeSettings) {
        Self::apply_numeric_env_override("CHALLENGE_TTL_SECONDS", &mut challenge_settings.ttl_seconds);
        Self::apply_numeric_env_override(
            "CHALLENGE_SWEEP_SECONDS",
            &mut challenge_settings.sweep_interval_seconds,
        );
    }

    fn apply_storage_env_overrides(storage_settings: &mut StorageSettings) {
        if let Ok(path) = std::env::var("CREDENTIALS_PATH") {
            storage_settings.credentials_path = Some(path).filter(|p| !p.trim().is_empty());
        }
    }

    fn apply_logging_env_overrides(logging_settings: &mut LoggingSettings) {
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            logging_settings.level = log_level;
        }
    }

    /// Helper function to apply numeric environment variable overrides
    fn apply_numeric_env_override(env_var: &str, target: &mut u64) {
        if let Ok(value_str) = std::env::var(env_var) {
            if let Ok(value) = value_str.parse::<u64>() {
                *target = value;
            }
        }
    }

    /// Initialize `env_logger`, defaulting the filter to `logging.level`
    fn initialize_logging(&self) {
        let env = env_logger::Env::default().default_filter_or(self.logging.level.as_str());
        if env_logger::Builder::from_env(env).try_init().is_err() {
            log::debug!("Logger already initialized");
        }
    }

    /// Load environment variables from .env file
    fn load_env_file() {
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    // Variables already set in the process environment win
                    if std::env::var_os(key.trim()).is_none() {
                        std::env::set_var(key.trim(), value.trim().trim_matches('"'));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    // Helper function to clean all relevant environment variables for tests
    fn clean_env_vars() {
        for var in [
            "HOST",
            "PORT",
            "RP_ID",
            "RP_NAME",
            "RP_ORIGINS",
            "RP_USER_VERIFICATION",
            "SPACE_HOST",
            "CHALLENGE_TTL_SECONDS",
            "CHALLENGE_SWEEP_SECONDS",
            "CREDENTIALS_PATH",
            "PASSKEY_SECRETS_DIR",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.application.port, 8080);
        assert_eq!(settings.relying_party.id, "localhost");
        assert_eq!(settings.relying_party.algorithms, vec!["ES256", "RS256"]);
        assert_eq!(settings.challenges.ttl_seconds, 300);
        assert_eq!(settings.challenges.sweep_interval_seconds, 600);
        assert!(settings.storage.credentials_path.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Settings.toml");
        fs::write(
            &path,
            r#"
[relying_party]
id = "example.com"
origins = ["https://example.com", "https://app.example.com"]
user_verification = "preferred"

[challenges]
ttl_seconds = 120
"#,
        )
        .unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.relying_party.id, "example.com");
        assert_eq!(settings.relying_party.origins.len(), 2);
        assert_eq!(
            settings.relying_party.user_verification,
            UserVerification::Preferred
        );
        assert_eq!(settings.challenges.ttl_seconds, 120);
        assert_eq!(settings.challenges.sweep_interval_seconds, 600);
        assert_eq!(settings.application.port, 8080);
    }

    #[test]
    fn test_invalid_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Settings.toml");
        fs::write(&path, "[relying_party\nid = ").unwrap();
        assert!(matches!(
            Settings::from_file(&path),
            Err(SettingsError::Parse(_))
        ));
    }

    #[test]
    #[serial]
    fn test_relying_party_env_overrides() {
        clean_env_vars();
        std::env::set_var("RP_ID", "example.com");
        std::env::set_var("RP_ORIGINS", "https://example.com, https://app.example.com");
        std::env::set_var("RP_USER_VERIFICATION", "discouraged");
        std::env::set_var("CHALLENGE_TTL_SECONDS", "90");

        let mut settings = Settings::default();
        Settings::apply_env_overrides(&mut settings);

        assert_eq!(settings.relying_party.id, "example.com");
        assert_eq!(
            settings.relying_party.origins,
            vec!["https://example.com", "https://app.example.com"]
        );
        assert_eq!(
            settings.relying_party.user_verification,
            UserVerification::Discouraged
        );
        assert_eq!(settings.challenges.ttl_seconds, 90);

        clean_env_vars();
    }

    #[test]
    #[serial]
    fn test_space_host_convention() {
        clean_env_vars();
        std::env::set_var("SPACE_HOST", "someone-passkeys.hf.space");

        let mut settings = Settings::default();
        Settings::apply_env_overrides(&mut settings);

        assert_eq!(settings.relying_party.id, "someone-passkeys.hf.space");
        assert_eq!(
            settings.relying_party.origins,
            vec!["https://someone-passkeys.hf.space"]
        );

        // Explicit relying party configuration wins
        std::env::set_var("RP_ID", "example.com");
        let mut settings = Settings::default();
        Settings::apply_env_overrides(&mut settings);
        assert_eq!(settings.relying_party.id, "example.com");
        assert_eq!(settings.relying_party.origins, vec!["http://localhost:8080"]);

        clean_env_vars();
    }

    #[test]
    #[serial]
    fn test_invalid_numbers_are_ignored() {
        clean_env_vars();
        std::env::set_var("PORT", "not-a-port");
        std::env::set_var("CREDENTIALS_PATH", "/var/lib/passkeys/credentials.json");

        let mut settings = Settings::default();
        Settings::apply_env_overrides(&mut settings);
        assert_eq!(settings.application.port, 8080);
        assert_eq!(
            settings.storage.credentials_path.as_deref(),
            Some("/var/lib/passkeys/credentials.json")
        );

        clean_env_vars();
    }
}
