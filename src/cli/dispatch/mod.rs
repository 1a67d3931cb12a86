use crate::{
    cli::{
        actions::{server::Args, Action},
        commands::tokens,
    },
    lifecycle::{LifecycleConfig, RefreshReusePolicy},
    principal::password::{DEFAULT_ITERATIONS, DEFAULT_MEMORY_KIB},
    token::TokenConfig,
};
use anyhow::{anyhow, Context, Result};
use secrecy::SecretString;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches.get_one::<String>("dsn").cloned();

    let issuer = matches
        .get_one::<String>(tokens::ARG_ISSUER)
        .cloned()
        .context("missing required argument: --issuer")?;
    let access_ttl = required::<i64>(matches, tokens::ARG_ACCESS_TTL)?;
    let refresh_ttl = required::<i64>(matches, tokens::ARG_REFRESH_TTL)?;
    if access_ttl >= refresh_ttl {
        return Err(anyhow!(
            "access token TTL ({access_ttl}s) must be shorter than the refresh TTL ({refresh_ttl}s)"
        ));
    }

    let reuse_policy = matches
        .get_one::<String>(tokens::ARG_REUSE_POLICY)
        .map_or(Ok(RefreshReusePolicy::default()), |policy| {
            policy.parse::<RefreshReusePolicy>()
        })
        .map_err(|e| anyhow!(e))?;

    let token = TokenConfig::new()
        .with_issuer(issuer)
        .with_access_ttl_seconds(access_ttl)
        .with_refresh_ttl_seconds(refresh_ttl);

    let lifecycle = LifecycleConfig::new()
        .with_reuse_policy(reuse_policy)
        .with_session_retention_seconds(required::<i64>(matches, tokens::ARG_SESSION_RETENTION)?)
        .with_sweep_interval_seconds(required::<u64>(matches, tokens::ARG_SWEEP_INTERVAL)?);

    Ok(Action::Server(Args {
        port,
        dsn,
        token,
        lifecycle,
        signing_key_seed: matches
            .get_one::<String>(tokens::ARG_SIGNING_KEY_SEED)
            .cloned()
            .map(SecretString::from),
        password_hash_memory_kib: matches
            .get_one::<u32>(tokens::ARG_HASH_MEMORY)
            .copied()
            .unwrap_or(DEFAULT_MEMORY_KIB),
        password_hash_iterations: matches
            .get_one::<u32>(tokens::ARG_HASH_ITERATIONS)
            .copied()
            .unwrap_or(DEFAULT_ITERATIONS),
    }))
}

fn required<T: Clone + Send + Sync + 'static>(matches: &clap::ArgMatches, id: &str) -> Result<T> {
    matches
        .get_one::<T>(id)
        .cloned()
        .with_context(|| format!("missing required argument: --{id}"))
}
