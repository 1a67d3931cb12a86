use crate::{
    api::{self, AppState},
    cli::telemetry,
    gateway::Gateway,
    keys::{KeyManager, KeySetCache},
    lifecycle::{spawn_session_sweeper, LifecycleConfig, SessionService},
    postgres::{self, PgPrincipalStore, PgSessionStore},
    principal::{
        password::DEFAULT_PARALLELISM, MemoryPrincipalStore, PasswordHasher, PrincipalStore,
    },
    session::{MemorySessionStore, SessionStore},
    token::{TokenConfig, TokenIssuer},
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub token: TokenConfig,
    pub lifecycle: LifecycleConfig,
    pub signing_key_seed: Option<SecretString>,
    pub password_hash_memory_kib: u32,
    pub password_hash_iterations: u32,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable, the signing key seed is invalid, or the
/// server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let (principals, sessions): (Arc<dyn PrincipalStore>, Arc<dyn SessionStore>) =
        if let Some(dsn) = &args.dsn {
            let pool = postgres::connect(dsn).await?;
            (
                Arc::new(PgPrincipalStore::new(pool.clone())),
                Arc::new(PgSessionStore::new(pool)),
            )
        } else {
            warn!("No DSN configured, principals and sessions are kept in memory");
            (
                Arc::new(MemoryPrincipalStore::new()),
                Arc::new(MemorySessionStore::new()),
            )
        };

    let keys = if let Some(seed) = &args.signing_key_seed {
        KeyManager::from_seed(seed).context("Invalid signing key seed")?
    } else {
        warn!("No signing key seed configured, generated an ephemeral signing key");
        KeyManager::generate()?
    };
    let keys = Arc::new(keys);

    let hasher = PasswordHasher::new(
        args.password_hash_memory_kib,
        args.password_hash_iterations,
        DEFAULT_PARALLELISM,
    )?;

    let issuer_name = args.token.issuer().to_string();
    let service = Arc::new(SessionService::new(
        principals.clone(),
        sessions.clone(),
        TokenIssuer::new(keys.clone(), args.token),
        hasher,
        args.lifecycle,
    )?);

    // Same process as the key manager, so always read the live key set.
    let gateway = Gateway::new(
        KeySetCache::new(keys).with_ttl(Duration::ZERO),
        issuer_name,
        principals,
    )
    .with_session_store(sessions);

    let sweeper = spawn_session_sweeper(
        service.clone(),
        Duration::from_secs(service.config().sweep_interval_seconds()),
    );

    let result = api::serve(args.port, AppState::new(service, Arc::new(gateway))).await;

    sweeper.abort();
    telemetry::shutdown_tracer();

    result
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        (
            "dsn",
            args.dsn
                .as_deref()
                .map_or_else(|| "memory".to_string(), redact_dsn),
        ),
        ("issuer", args.token.issuer().to_string()),
        (
            "access_token_ttl",
            format!("{}s", args.token.access_ttl_seconds()),
        ),
        (
            "refresh_token_ttl",
            format!("{}s", args.token.refresh_ttl_seconds()),
        ),
        (
            "refresh_reuse_policy",
            args.lifecycle.reuse_policy().to_string(),
        ),
        (
            "session_retention",
            format!("{}s", args.lifecycle.session_retention_seconds()),
        ),
        (
            "signing_key_seed_set",
            args.signing_key_seed.is_some().to_string(),
        ),
    ];
    log_entries("Startup configuration", &entries);
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\n{title}:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    if trimmed.len() > 7 {
        trimmed[..7].to_string()
    } else {
        trimmed.to_string()
    }
}
