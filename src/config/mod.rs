//! Configuration loading.
//!
//! Configuration is a TOML file. Every section is optional; missing values
//! fall back to the defaults below.
//!
//! ```toml
//! origin = "http://localhost:8080"
//! namespace = "app"
//! image_prefix = "/images/"
//! root_document = "/"
//! manifest = ["/", "/app.js", "/style.css"]
//!
//! [generations]
//! static = "v1"
//! images = "v1"
//!
//! [store]
//! backend = "disk"
//! path = "/var/cache/swcache"
//!
//! [server]
//! listen = "127.0.0.1:8081"
//!
//! [network]
//! connect_timeout_secs = 10
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::debug;
use url::Url;

use crate::cache::LiveSet;
use crate::classify::Scope;

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid origin {origin:?}: {reason}")]
    Origin { origin: String, reason: String },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The serving origin. Requests to any other origin pass through.
    pub origin: String,

    /// Namespace prefix shared by every partition this application owns.
    pub namespace: String,

    /// Path prefix reserved for images.
    pub image_prefix: String,

    /// Document served to offline navigations.
    pub root_document: String,

    /// Resources stored on install, as paths relative to `origin`.
    pub manifest: Vec<String>,

    pub generations: GenerationConfig,
    pub store: StoreConfig,
    pub server: ServerConfig,
    pub network: NetworkConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            origin: "http://localhost:8080".to_string(),
            namespace: "app".to_string(),
            image_prefix: "/images/".to_string(),
            root_document: "/".to_string(),
            manifest: vec!["/".to_string()],
            generations: GenerationConfig::default(),
            store: StoreConfig::default(),
            server: ServerConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

/// Generation tag per partition role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    #[serde(rename = "static")]
    pub static_tag: String,
    #[serde(rename = "images")]
    pub images_tag: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            static_tag: "v1".to_string(),
            images_tag: "v1".to_string(),
        }
    }
}

/// Which partition store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    Disk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Root directory for the disk backend.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Disk,
            path: PathBuf::from(".swcache"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the proxy listens on.
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8081".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Bound on connection setup. Unset means no timeout.
    pub connect_timeout_secs: Option<u64>,
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }
}

impl Config {
    /// Loads and validates configuration from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`] if the file
    /// cannot be read or parsed, and a validation error from
    /// [`validate`](Self::validate) otherwise.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;

        debug!(path = %path.display(), origin = %config.origin, "config loaded");
        Ok(config)
    }

    /// Checks that every value can be used as-is.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let origin = self.origin_url()?;
        self.root_document_url()?;

        for entry in &self.manifest {
            let resolved = origin.join(entry).map_err(|e| ConfigError::Invalid {
                field: "manifest",
                reason: format!("{entry:?}: {e}"),
            })?;
            if resolved.origin() != origin.origin() {
                return Err(ConfigError::Invalid {
                    field: "manifest",
                    reason: format!("{entry:?} is not on the serving origin"),
                });
            }
        }

        if self.namespace.is_empty() || self.namespace.contains('-') {
            return Err(ConfigError::Invalid {
                field: "namespace",
                reason: "must be non-empty and contain no '-'".to_string(),
            });
        }
        for (field, tag) in [
            ("generations.static", &self.generations.static_tag),
            ("generations.images", &self.generations.images_tag),
        ] {
            if tag.is_empty() || tag.contains('-') {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "generation tags must be non-empty and contain no '-'".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Parses [`origin`](Self::origin) into a URL.
    pub fn origin_url(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::Origin {
            origin: self.origin.clone(),
            reason,
        };
        let url = Url::parse(&self.origin).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {:?}", url.scheme())));
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host".to_string()));
        }
        Ok(url)
    }

    /// Resolves [`root_document`](Self::root_document) against the origin.
    pub fn root_document_url(&self) -> Result<Url, ConfigError> {
        self.origin_url()?
            .join(&self.root_document)
            .map_err(|e| ConfigError::Invalid {
                field: "root_document",
                reason: e.to_string(),
            })
    }

    /// The live partition names for this deployment.
    pub fn live_set(&self) -> LiveSet {
        LiveSet::new(
            &self.namespace,
            &self.generations.static_tag,
            &self.generations.images_tag,
        )
    }

    /// The classification scope for this deployment.
    pub fn scope(&self) -> Result<Scope, ConfigError> {
        Ok(Scope::new(&self.origin_url()?, &self.image_prefix))
    }
}
