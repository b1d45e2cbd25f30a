use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Arg, ArgAction, ArgMatches, Command};
use serde::Deserialize;

pub const DEFAULT_PORT: u16 = 3000;
/// Docker bridge gateway, i.e. the host as seen from inside a container.
pub const DEFAULT_SSH_HOST: &str = "172.17.0.1";
pub const DEFAULT_SSH_IDENTITY: &str = "/root/.ssh/id_rsa";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 900;
pub const DEFAULT_SCRIPTS_DIR: &str = "scripts";
pub const DEFAULT_LOG_FILE: &str = "public/logs.json";
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read manifest {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse manifest {path:?} as toml, yaml or json")]
    Parse { path: PathBuf },
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Runtime settings of the dispatcher.
///
/// The shared secret and the remote host details may be unset, in which case
/// every request that needs them fails with a configuration error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub secret: Option<String>,
    pub host_user: Option<String>,
    pub scripts_path: Option<String>,
    pub ssh_host: String,
    pub ssh_identity: PathBuf,
    pub connect_timeout: Duration,
    pub execution_timeout: Duration,
    pub scripts_dir: PathBuf,
    pub log_file: PathBuf,
    pub serialize_executions: bool,
    pub log_level: String,
    pub manifest: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            secret: None,
            host_user: None,
            scripts_path: None,
            ssh_host: DEFAULT_SSH_HOST.to_string(),
            ssh_identity: PathBuf::from(DEFAULT_SSH_IDENTITY),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            execution_timeout: Duration::from_secs(DEFAULT_EXECUTION_TIMEOUT_SECS),
            scripts_dir: PathBuf::from(DEFAULT_SCRIPTS_DIR),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            serialize_executions: true,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            manifest: None,
        }
    }
}

impl Config {
    /// Shared secret, treating an empty value as unset.
    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref().filter(|s| !s.is_empty())
    }
}

/// Settings as they may appear in a manifest file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub port: Option<u16>,
    pub secret: Option<String>,
    pub host_user: Option<String>,
    pub scripts_path: Option<String>,
    pub ssh_host: Option<String>,
    pub ssh_identity: Option<PathBuf>,
    pub connect_timeout_secs: Option<u64>,
    pub execution_timeout_secs: Option<u64>,
    pub scripts_dir: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub serialize_executions: Option<bool>,
    pub log_level: Option<String>,
}

impl Manifest {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).ok_or_else(|| ConfigError::Parse {
            path: path.to_path_buf(),
        })
    }

    pub fn parse(content: &str) -> Option<Self> {
        toml::from_str(content)
            .ok()
            .or_else(|| serde_yaml::from_str(content).ok())
            .or_else(|| serde_json::from_str(content).ok())
    }
}

pub fn command() -> Command {
    Command::new("deployhook")
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("manifest")
                .long("config")
                .alias("manifest")
                .env("DEPLOYHOOK_MANIFEST")
                .num_args(1)
                .help("Path to an optional toml/yaml/json configuration file")
                .value_parser(clap::builder::PathBufValueParser::new()),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .env("PORT")
                .num_args(1)
                .help("Port to listen on")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("secret")
                .long("secret")
                .env("GIT_SECRET")
                .hide_env_values(true)
                .num_args(1)
                .help("Shared secret configured on the git provider"),
        )
        .arg(
            Arg::new("host_user")
                .long("host-user")
                .env("HOST_USER")
                .num_args(1)
                .help("User the deployment scripts run as on the remote host"),
        )
        .arg(
            Arg::new("scripts_path")
                .long("scripts-path")
                .env("SCRIPTS_PATH")
                .num_args(1)
                .help("Directory holding the deployment scripts on the remote host"),
        )
        .arg(
            Arg::new("ssh_host")
                .long("ssh-host")
                .env("SSH_HOST")
                .num_args(1)
                .help("Address of the remote host"),
        )
        .arg(
            Arg::new("ssh_identity")
                .long("ssh-identity")
                .env("SSH_IDENTITY")
                .num_args(1)
                .help("Private key used to reach the remote host")
                .value_parser(clap::builder::PathBufValueParser::new()),
        )
        .arg(
            Arg::new("connect_timeout")
                .long("connect-timeout")
                .env("SSH_CONNECT_TIMEOUT")
                .num_args(1)
                .help("SSH connect timeout in seconds")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("execution_timeout")
                .long("execution-timeout")
                .env("EXECUTION_TIMEOUT")
                .num_args(1)
                .help("Upper bound in seconds for a whole remote script run")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("scripts_dir")
                .long("scripts-dir")
                .env("SCRIPTS_DIR")
                .num_args(1)
                .help("Local directory used to resolve project scripts")
                .value_parser(clap::builder::PathBufValueParser::new()),
        )
        .arg(
            Arg::new("log_file")
                .long("log-file")
                .env("LOG_FILE")
                .num_args(1)
                .help("File the audit log is persisted to")
                .value_parser(clap::builder::PathBufValueParser::new()),
        )
        .arg(
            Arg::new("serialize_executions")
                .long("serialize-executions")
                .env("SERIALIZE_EXECUTIONS")
                .num_args(1)
                .action(ArgAction::Set)
                .help("Run at most one script per project at a time")
                .value_parser(clap::builder::BoolishValueParser::new()),
        )
        .arg(
            Arg::new("log_level")
                .long("log-level")
                .env("LOG_LEVEL")
                .num_args(1)
                .help("Default tracing filter when RUST_LOG is unset"),
        )
        .color(clap::ColorChoice::Always)
}

/// Builds the configuration from CLI arguments and the environment,
/// layered over the manifest file when one is given.
pub fn from_matches(args: &ArgMatches) -> Result<Config, ConfigError> {
    let manifest_path = args.get_one::<PathBuf>("manifest").cloned();

    let manifest = match &manifest_path {
        Some(path) => {
            tracing::info!("Reading configs from path: {path:?}");
            Manifest::from_path(path)?
        }
        None => Manifest::default(),
    };

    let mut config = resolve(manifest, manifest_path)?;

    if let Some(port) = args.get_one::<u16>("port") {
        config.port = *port;
    }
    if let Some(secret) = args.get_one::<String>("secret") {
        config.secret = Some(secret.clone());
    }
    if let Some(user) = args.get_one::<String>("host_user") {
        config.host_user = Some(user.clone());
    }
    if let Some(path) = args.get_one::<String>("scripts_path") {
        config.scripts_path = Some(path.clone());
    }
    if let Some(host) = args.get_one::<String>("ssh_host") {
        config.ssh_host = host.clone();
    }
    if let Some(identity) = args.get_one::<PathBuf>("ssh_identity") {
        config.ssh_identity = identity.clone();
    }
    if let Some(secs) = args.get_one::<u64>("connect_timeout") {
        config.connect_timeout = positive_secs("connect_timeout", *secs)?;
    }
    if let Some(secs) = args.get_one::<u64>("execution_timeout") {
        config.execution_timeout = positive_secs("execution_timeout", *secs)?;
    }
    if let Some(dir) = args.get_one::<PathBuf>("scripts_dir") {
        config.scripts_dir = dir.clone();
    }
    if let Some(file) = args.get_one::<PathBuf>("log_file") {
        config.log_file = file.clone();
    }
    if let Some(serialize) = args.get_one::<bool>("serialize_executions") {
        config.serialize_executions = *serialize;
    }
    if let Some(level) = args.get_one::<String>("log_level") {
        config.log_level = level.clone();
    }

    Ok(config)
}

/// Applies a manifest over the defaults.
pub fn resolve(manifest: Manifest, manifest_path: Option<PathBuf>) -> Result<Config, ConfigError> {
    let defaults = Config::default();

    Ok(Config {
        port: manifest.port.unwrap_or(defaults.port),
        secret: manifest.secret,
        host_user: manifest.host_user,
        scripts_path: manifest.scripts_path,
        ssh_host: manifest.ssh_host.unwrap_or(defaults.ssh_host),
        ssh_identity: manifest.ssh_identity.unwrap_or(defaults.ssh_identity),
        connect_timeout: manifest
            .connect_timeout_secs
            .map(|secs| positive_secs("connect_timeout_secs", secs))
            .transpose()?
            .unwrap_or(defaults.connect_timeout),
        execution_timeout: manifest
            .execution_timeout_secs
            .map(|secs| positive_secs("execution_timeout_secs", secs))
            .transpose()?
            .unwrap_or(defaults.execution_timeout),
        scripts_dir: manifest.scripts_dir.unwrap_or(defaults.scripts_dir),
        log_file: manifest.log_file.unwrap_or(defaults.log_file),
        serialize_executions: manifest
            .serialize_executions
            .unwrap_or(defaults.serialize_executions),
        log_level: manifest.log_level.unwrap_or(defaults.log_level),
        manifest: manifest_path,
    })
}

fn positive_secs(key: &'static str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value: secs.to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
