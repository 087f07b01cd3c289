//! # CLI Interface
//!
//! Command-line arguments for `votifier-node`, via `clap` derive. Every
//! runtime setting has an environment variable fallback so the node can be
//! configured entirely from a container environment.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use votifier_protocol::config::{
    DEFAULT_CLEANUP_INTERVAL_HOURS, DEFAULT_HTTP_PORT, DEFAULT_SOCKET_PORT, DEFAULT_VOTE_TTL_HOURS,
};
use votifier_protocol::storage::StorageConfig;
use votifier_protocol::wire::TokenSpecError;
use votifier_protocol::{ProtocolToggles, ServiceTokenTable, StorageBackend};

use crate::logging::LogFormat;

/// Votifier vote receiver.
///
/// Accepts vote notifications from voting sites over HTTP and the raw
/// Votifier socket, in both the legacy RSA format and the HMAC-signed
/// JSON format.
#[derive(Parser, Debug)]
#[command(
    name = "votifier-node",
    about = "Votifier vote receiver",
    version,
    propagate_version = true
)]
pub struct VotifierCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the receiver.
    Run(RunArgs),
    /// Generate and persist the RSA key pair.
    Init(InitArgs),
    /// Print the public key to hand out to voting sites.
    Pubkey(KeyDirArgs),
    /// Print version information and exit.
    Version,
}

/// Where the RSA key pair lives.
#[derive(Args, Debug, Clone)]
pub struct KeyDirArgs {
    /// Data directory. Holds the vote database and, by default, the keys.
    #[arg(long, short = 'd', env = "VOTIFIER_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Key directory. Defaults to `<data-dir>/keys`.
    #[arg(long, env = "VOTIFIER_KEY_DIR")]
    pub key_dir: Option<PathBuf>,
}

impl KeyDirArgs {
    pub fn key_dir(&self) -> PathBuf {
        self.key_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("keys"))
    }
}

#[derive(Args, Debug)]
pub struct InitArgs {
    #[command(flatten)]
    pub dirs: KeyDirArgs,

    /// Replace an existing key pair. Every voting site using the old
    /// public key stops working.
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub dirs: KeyDirArgs,

    /// Port for the HTTP endpoints.
    #[arg(long, env = "VOTIFIER_HTTP_PORT", default_value_t = DEFAULT_HTTP_PORT)]
    pub http_port: u16,

    /// Port for the raw Votifier socket.
    #[arg(long, env = "VOTIFIER_SOCKET_PORT", default_value_t = DEFAULT_SOCKET_PORT)]
    pub socket_port: u16,

    /// Serve the raw Votifier socket.
    #[arg(
        long,
        env = "VOTIFIER_SOCKET_ENABLED",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub socket_enabled: bool,

    /// Serve the HTTP endpoints.
    #[arg(
        long,
        env = "VOTIFIER_HTTP_ENABLED",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub http_enabled: bool,

    /// Accept legacy (V1, RSA) votes.
    #[arg(
        long,
        env = "VOTIFIER_LEGACY_ENABLED",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub legacy_enabled: bool,

    /// Accept modern (V2, HMAC) votes.
    #[arg(
        long,
        env = "VOTIFIER_MODERN_ENABLED",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub modern_enabled: bool,

    /// Service token as `name=secret`. Repeatable.
    #[arg(long = "token", value_name = "NAME=SECRET")]
    pub tokens: Vec<String>,

    /// Comma-separated service tokens, `name=secret,name2=secret2`.
    /// Merged with `--token`; `--token` wins on duplicates.
    #[arg(long, env = "VOTIFIER_TOKENS", hide_env_values = true)]
    pub token_list: Option<String>,

    /// Vote store backend: `memory` or `sled`.
    #[arg(long, env = "VOTIFIER_STORAGE", default_value = "sled")]
    pub storage: StorageBackend,

    /// Database path for the `sled` backend. Defaults to `<data-dir>/votes.db`.
    #[arg(long, env = "VOTIFIER_STORAGE_PATH")]
    pub storage_path: Option<PathBuf>,

    /// Hours a vote counts as recent.
    #[arg(long, env = "VOTIFIER_VOTE_TTL_HOURS", default_value_t = DEFAULT_VOTE_TTL_HOURS)]
    pub vote_ttl_hours: u32,

    /// Hours between expiry sweeps of the vote store.
    #[arg(
        long,
        env = "VOTIFIER_CLEANUP_INTERVAL_HOURS",
        default_value_t = DEFAULT_CLEANUP_INTERVAL_HOURS,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub cleanup_interval_hours: u32,

    /// Verbose diagnostics, including hex dumps of undecryptable blocks.
    #[arg(long, env = "VOTIFIER_DEBUG")]
    pub debug: bool,

    /// Log output format.
    #[arg(long, env = "VOTIFIER_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Mount `GET /test`, which fires synthetic votes. Never enable on a
    /// public address.
    #[arg(long, env = "VOTIFIER_ENABLE_TEST_ENDPOINT")]
    pub enable_test_endpoint: bool,
}

impl RunArgs {
    pub fn toggles(&self) -> ProtocolToggles {
        ProtocolToggles {
            legacy_enabled: self.legacy_enabled,
            modern_enabled: self.modern_enabled,
        }
    }

    /// `--token-list` entries first, then each `--token`, so repeated flags
    /// override the environment.
    pub fn token_table(&self) -> Result<ServiceTokenTable, TokenSpecError> {
        let mut entries = Vec::new();
        if let Some(list) = &self.token_list {
            for entry in list.split(',').filter(|e| !e.trim().is_empty()) {
                entries.push(ServiceTokenTable::parse_entry(entry)?);
            }
        }
        for entry in &self.tokens {
            entries.push(ServiceTokenTable::parse_entry(entry)?);
        }
        Ok(entries.into_iter().collect())
    }

    pub fn storage_config(&self) -> StorageConfig {
        let mut config = StorageConfig::in_dir(&self.dirs.data_dir);
        config.backend = self.storage;
        if let Some(path) = &self.storage_path {
            config.path = path.clone();
        }
        config.ttl_hours = self.vote_ttl_hours;
        config.cleanup_interval_hours = self.cleanup_interval_hours;
        config
    }
}
