//! Resolved provisioning settings.
//!
//! Settings are layered by the binary: built-in defaults, then an optional
//! TOML file, then environment variables, then command-line flags. This module
//! only knows about the first two; the rest is merged in `main.rs`.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cert::extensions::is_valid_dns_name;
use crate::error::{Error, Result};
use crate::key::KeyType;
use crate::plan::{ProvisioningProfile, Topology};

/// Prefix of every environment variable the binary reads.
pub const ENV_PREFIX: &str = "NTUN_CERTIFICATE";

/// Key settings of the HTTP channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpSettings {
    #[serde(rename = "type")]
    pub key_type: String,
    pub bits: usize,
    /// Hostname (or IP address) the HTTP server certificate is issued for.
    pub host: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            key_type: "rsa".to_string(),
            bits: 4096,
            host: "localhost".to_string(),
        }
    }
}

/// Key settings of the gRPC channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GrpcSettings {
    #[serde(rename = "type")]
    pub key_type: String,
    pub bits: usize,
}

impl Default for GrpcSettings {
    fn default() -> Self {
        Self {
            key_type: "rsa".to_string(),
            bits: 4096,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Root of the output tree. Empty means the current directory.
    pub output: PathBuf,
    pub topology: Topology,
    pub http: HttpSettings,
    pub grpc: GrpcSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output: default_output_dir(),
            topology: Topology::default(),
            http: HttpSettings::default(),
            grpc: GrpcSettings::default(),
        }
    }
}

/// `$HOME/.ntun`, or empty when `HOME` is unset.
fn default_output_dir() -> PathBuf {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(|home| PathBuf::from(home).join(".ntun"))
        .unwrap_or_default()
}

impl Settings {
    /// Load settings from a TOML file. Missing keys keep their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        toml::from_str(&contents).map_err(|e| {
            Error::InvalidInput(format!("failed to parse {}: {e}", path.display()))
        })
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Encoding(e.to_string()))
    }

    pub fn http_key_type(&self) -> Result<KeyType> {
        KeyType::from_parts(&self.http.key_type, self.http.bits)
    }

    pub fn grpc_key_type(&self) -> Result<KeyType> {
        KeyType::from_parts(&self.grpc.key_type, self.grpc.bits)
    }

    /// Rejects unusable settings before any key material is generated.
    pub fn validate(&self) -> Result<()> {
        self.http_key_type()?;
        self.grpc_key_type()?;

        let host = self.http.host.as_str();
        if host.parse::<IpAddr>().is_err() && !is_valid_dns_name(host) {
            return Err(Error::InvalidInput(format!(
                "http host {host:?} is neither a DNS name nor an IP address"
            )));
        }
        Ok(())
    }

    /// The output root, with an empty setting meaning the working directory.
    pub fn resolve_output_dir(&self) -> Result<PathBuf> {
        if self.output.as_os_str().is_empty() {
            std::env::current_dir().map_err(|e| Error::io(".", e))
        } else {
            Ok(self.output.clone())
        }
    }
}

impl TryFrom<&Settings> for ProvisioningProfile {
    type Error = Error;

    fn try_from(settings: &Settings) -> Result<Self> {
        settings.validate()?;
        Ok(ProvisioningProfile::standard(
            settings.topology,
            settings.http_key_type()?,
            &settings.http.host,
            settings.grpc_key_type()?,
        ))
    }
}
