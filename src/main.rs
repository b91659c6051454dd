#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![deny(warnings)]
#![allow(clippy::multiple_crate_versions)]

use std::sync::Arc;
use std::time::Duration;

use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use chrono::Utc;
use passkey_ceremony::{
    configure_services, settings::Settings, CeremonyEngine, ChallengeStore, CredentialStore,
    JsonFileCredentialStore, MemoryChallengeStore, MemoryCredentialStore, RelyingPartyPolicy,
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from Settings.toml and environment variables
    // This also loads .env file and initializes the logger
    let settings = Settings::load().context("Failed to load settings")?;

    let policy = RelyingPartyPolicy::from_settings(&settings.relying_party, &settings.challenges)
        .context("Invalid relying party configuration")?;

    let credentials: Arc<dyn CredentialStore> = match &settings.storage.credentials_path {
        Some(path) => Arc::new(
            JsonFileCredentialStore::open(path)
                .with_context(|| format!("Failed to open credential store at {path}"))?,
        ),
        None => {
            log::warn!("No credentials_path configured; credentials are kept in memory only");
            Arc::new(MemoryCredentialStore::new())
        }
    };
    let challenges: Arc<dyn ChallengeStore> = Arc::new(MemoryChallengeStore::new());

    spawn_challenge_sweeper(
        challenges.clone(),
        Duration::from_secs(settings.challenges.sweep_interval_seconds.max(1)),
    );

    let engine = Arc::new(CeremonyEngine::new(
        Arc::new(policy),
        challenges,
        credentials,
    ));

    start_server(engine, &settings).await
}

/// Periodically drop challenges nobody came back for
fn spawn_challenge_sweeper(challenges: Arc<dyn ChallengeStore>, every: Duration) {
    actix_web::rt::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let removed = challenges.sweep_expired(Utc::now());
            if removed > 0 {
                log::debug!("Swept {removed} expired challenges");
            }
        }
    });
}

/// Start the HTTP server
///
/// # Errors
///
/// Returns an error if:
/// - Server binding fails
/// - Server fails to start
async fn start_server(engine: Arc<CeremonyEngine>, settings: &Settings) -> anyhow::Result<()> {
    let bind_address = format!("{}:{}", settings.application.host, settings.application.port);
    print_startup_info(&bind_address, &engine);

    let engine = web::Data::from(engine);
    HttpServer::new(move || {
        App::new()
            .app_data(engine.clone())
            .wrap(Logger::default())
            .configure(configure_services)
    })
    .bind(&bind_address)
    .with_context(|| format!("Failed to bind {bind_address}"))?
    .run()
    .await?;

    Ok(())
}

fn print_startup_info(bind_address: &str, engine: &CeremonyEngine) {
    let policy = engine.policy();
    println!(
        "Starting passkey ceremony service v{} on http://{bind_address}",
        passkey_ceremony::VERSION
    );
    println!("Relying party: {} ({})", policy.relying_party_id(), policy.relying_party_name());
    println!("Accepted origins: {}", policy.expected_origins().join(", "));
    println!();
    println!("Endpoints:");
    println!("  POST /api/register/start  - Start passkey registration");
    println!("  POST /api/register/finish - Complete passkey registration");
    println!("  POST /api/login/start     - Start passkey authentication");
    println!("  POST /api/login/finish    - Complete passkey authentication");
    println!("  GET  /ping                - Health check");
}
