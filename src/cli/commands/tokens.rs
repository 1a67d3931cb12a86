use crate::token::issuer::DEFAULT_ISSUER;
use clap::{builder::PossibleValuesParser, Arg, Command};

pub const ARG_ISSUER: &str = "issuer";
pub const ARG_ACCESS_TTL: &str = "access-token-ttl-seconds";
pub const ARG_REFRESH_TTL: &str = "refresh-token-ttl-seconds";
pub const ARG_SESSION_RETENTION: &str = "session-retention-seconds";
pub const ARG_SWEEP_INTERVAL: &str = "session-sweep-interval-seconds";
pub const ARG_SIGNING_KEY_SEED: &str = "signing-key-seed";
pub const ARG_REUSE_POLICY: &str = "refresh-reuse-policy";
pub const ARG_HASH_MEMORY: &str = "password-hash-memory-kib";
pub const ARG_HASH_ITERATIONS: &str = "password-hash-iterations";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ISSUER)
                .long(ARG_ISSUER)
                .help("Issuer name written to and required in every access token")
                .default_value(DEFAULT_ISSUER)
                .env("TESSERA_ISSUER"),
        )
        .arg(
            Arg::new(ARG_ACCESS_TTL)
                .long(ARG_ACCESS_TTL)
                .help("Access token lifetime in seconds")
                .default_value("900")
                .env("TESSERA_ACCESS_TOKEN_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TTL)
                .long(ARG_REFRESH_TTL)
                .help("Refresh secret lifetime in seconds, renewed on every refresh")
                .default_value("604800")
                .env("TESSERA_REFRESH_TOKEN_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_SESSION_RETENTION)
                .long(ARG_SESSION_RETENTION)
                .help("How long ended sessions are kept before the sweeper deletes them")
                .default_value("2592000")
                .env("TESSERA_SESSION_RETENTION_SECONDS")
                .value_parser(clap::value_parser!(i64).range(0..)),
        )
        .arg(
            Arg::new(ARG_SWEEP_INTERVAL)
                .long(ARG_SWEEP_INTERVAL)
                .help("Seconds between session sweeps")
                .default_value("3600")
                .env("TESSERA_SESSION_SWEEP_INTERVAL_SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_SIGNING_KEY_SEED)
                .long(ARG_SIGNING_KEY_SEED)
                .help("Base64 encoded 32-byte Ed25519 seed for the signing key")
                .long_help(
                    "Base64 encoded 32-byte Ed25519 seed for the signing key. When absent an ephemeral key is generated and every token dies with the process.",
                )
                .env("TESSERA_SIGNING_KEY_SEED")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_REUSE_POLICY)
                .long(ARG_REUSE_POLICY)
                .help("What to do when a rotated-away refresh secret is presented again")
                .default_value("revoke")
                .env("TESSERA_REFRESH_REUSE_POLICY")
                .value_parser(PossibleValuesParser::new(["revoke", "reject"])),
        )
        .arg(
            Arg::new(ARG_HASH_MEMORY)
                .long(ARG_HASH_MEMORY)
                .help("Argon2id memory cost in KiB")
                .default_value("19456")
                .env("TESSERA_PASSWORD_HASH_MEMORY_KIB")
                .value_parser(clap::value_parser!(u32).range(8..)),
        )
        .arg(
            Arg::new(ARG_HASH_ITERATIONS)
                .long(ARG_HASH_ITERATIONS)
                .help("Argon2id iteration count")
                .default_value("2")
                .env("TESSERA_PASSWORD_HASH_ITERATIONS")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
}
