use std::{
    env, fs, io,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use ipnet::IpNet;

use thiserror::Error;

use crate::kube::client::KubeConfig;
use crate::logging::LogFormat;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const DEFAULT_WATCH_MAX_RETRIES: u32 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_token: String,
    pub bind_addr: String,
    pub bind_port: u16,
    pub allowed_cidr: Option<IpNet>,
    pub trusted_proxies: Vec<IpNet>,
    pub kube: KubeConfig,
    pub watch_namespace: Option<String>,
    pub watch_max_retries: u32,
    pub log_format: LogFormat,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("MCP_API_TOKEN is required and must not be empty")]
    MissingApiToken,
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("MCP_ALLOWED_CIDR must be a valid CIDR range")]
    InvalidAllowedCidr,
    #[error("MCP_TRUSTED_PROXIES must be a comma separated list of CIDR ranges")]
    InvalidTrustedProxies,
    #[error("invalid bind address or port")]
    InvalidSocket,
    #[error("KUBE_API_SERVER is required when not running inside a cluster")]
    MissingApiServer,
    #[error("{name} must be true or false")]
    InvalidFlag { name: &'static str },
    #[error("WATCH_MAX_RETRIES must be a non-negative integer")]
    InvalidMaxRetries,
    #[error("LOG_FORMAT must be compact or json, got {0:?}")]
    InvalidLogFormat(String),
    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let api_token = var("MCP_API_TOKEN").ok_or(ConfigError::MissingApiToken)?;

        let bind_addr = var("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string());
        let bind_port = var("BIND_PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(8080);
        let allowed_cidr = var("MCP_ALLOWED_CIDR")
            .map(|value| {
                value
                    .parse::<IpNet>()
                    .map_err(|_| ConfigError::InvalidAllowedCidr)
            })
            .transpose()?;
        let trusted_proxies = var("MCP_TRUSTED_PROXIES")
            .map(|value| parse_cidr_list(&value))
            .transpose()?
            .unwrap_or_default();

        let watch_namespace = var("WATCH_NAMESPACE");
        let watch_max_retries = var("WATCH_MAX_RETRIES")
            .map(|value| value.parse::<u32>().map_err(|_| ConfigError::InvalidMaxRetries))
            .transpose()?
            .unwrap_or(DEFAULT_WATCH_MAX_RETRIES);
        let log_format = var("LOG_FORMAT")
            .map(|value| value.parse::<LogFormat>().map_err(ConfigError::InvalidLogFormat))
            .transpose()?
            .unwrap_or_default();

        let config = Self {
            api_token,
            bind_addr,
            bind_port,
            allowed_cidr,
            trusted_proxies,
            kube: kube_config(&var, Path::new(SERVICE_ACCOUNT_DIR))?,
            watch_namespace,
            watch_max_retries,
            log_format,
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}

fn parse_cidr_list(value: &str) -> Result<Vec<IpNet>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse::<IpNet>()
                .map_err(|_| ConfigError::InvalidTrustedProxies)
        })
        .collect()
}

fn parse_flag(name: &'static str, value: Option<String>) -> Result<bool, ConfigError> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None | Some("false") | Some("0") => Ok(false),
        Some("true") | Some("1") => Ok(true),
        Some(_) => Err(ConfigError::InvalidFlag { name }),
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, ConfigError> {
    fs::read(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Explicit variables win; otherwise fall back to the in-cluster service account.
fn kube_config(
    var: &dyn Fn(&str) -> Option<String>,
    service_account_dir: &Path,
) -> Result<KubeConfig, ConfigError> {
    let api_server = match var("KUBE_API_SERVER") {
        Some(server) => server,
        None => {
            let host = var("KUBERNETES_SERVICE_HOST").ok_or(ConfigError::MissingApiServer)?;
            let port = var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|| "443".to_string());
            if host.contains(':') {
                format!("https://[{host}]:{port}")
            } else {
                format!("https://{host}:{port}")
            }
        }
    };

    let token = match (var("KUBE_TOKEN"), var("KUBE_TOKEN_FILE")) {
        (Some(token), _) => Some(token),
        (None, Some(path)) => Some(read_token(Path::new(&path))?),
        (None, None) => {
            let path = service_account_dir.join("token");
            if path.is_file() {
                Some(read_token(&path)?)
            } else {
                None
            }
        }
    };

    let ca_pem = match var("KUBE_CA_FILE") {
        Some(path) => Some(read_file(Path::new(&path))?),
        None => {
            let path = service_account_dir.join("ca.crt");
            if path.is_file() {
                Some(read_file(&path)?)
            } else {
                None
            }
        }
    };

    Ok(KubeConfig {
        api_server,
        token,
        ca_pem,
        insecure_skip_tls_verify: parse_flag(
            "KUBE_INSECURE_SKIP_TLS_VERIFY",
            var("KUBE_INSECURE_SKIP_TLS_VERIFY"),
        )?,
    })
}

fn read_token(path: &Path) -> Result<String, ConfigError> {
    let raw = read_file(path)?;
    Ok(String::from_utf8_lossy(&raw).trim().to_string())
}
