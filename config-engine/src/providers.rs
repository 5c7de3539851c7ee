// Configuration providers (files and environment variables)

use crate::error::{ConfigError, Result};
use crate::settings::TrustServiceConfig;
use crate::validation::ConfigValidator;
use config::{Config, Environment, File};
use std::path::PathBuf;
use tracing::{debug, info};

/// Prefix of environment overrides, e.g. `TRUST__HARVESTER__FETCH_TIMEOUT_SECS`
pub const ENV_PREFIX: &str = "TRUST";

#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// TOML, YAML or JSON file; format follows the extension
    File { path: PathBuf, required: bool },
    /// Environment variables with the given prefix, `__` separated
    Environment { prefix: String },
}

impl ConfigSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File {
            path: path.into(),
            required: true,
        }
    }

    pub fn optional_file(path: impl Into<PathBuf>) -> Self {
        Self::File {
            path: path.into(),
            required: false,
        }
    }

    pub fn env() -> Self {
        Self::env_with_prefix(ENV_PREFIX)
    }

    pub fn env_with_prefix(prefix: &str) -> Self {
        Self::Environment {
            prefix: prefix.to_string(),
        }
    }
}

/// Layers configuration sources; later sources override earlier ones
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    sources: Vec<ConfigSource>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_source(mut self, source: ConfigSource) -> Self {
        self.sources.push(source);
        self
    }

    /// Merge all sources over the built-in defaults and validate the result
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::SourceNotFound`] for a missing required file,
    /// [`ConfigError::ParseError`] for malformed input and
    /// [`ConfigError::ValidationError`] when the merged values are inconsistent.
    pub fn load(&self) -> Result<TrustServiceConfig> {
        let mut builder = Config::builder();

        for source in &self.sources {
            match source {
                ConfigSource::File { path, required } => {
                    if *required && !path.exists() {
                        return Err(ConfigError::SourceNotFound(path.display().to_string()));
                    }
                    debug!("Adding configuration file: {}", path.display());
                    builder = builder.add_source(File::from(path.as_path()).required(*required));
                }
                ConfigSource::Environment { prefix } => {
                    debug!("Adding environment overrides with prefix {}", prefix);
                    builder = builder.add_source(
                        Environment::with_prefix(prefix)
                            .prefix_separator("__")
                            .separator("__")
                            .try_parsing(true),
                    );
                }
            }
        }

        let config: TrustServiceConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        info!(
            seed_trust_points = config.bootstrap.trust_points.len(),
            seed_domains = config.bootstrap.domains.len(),
            "Configuration loaded"
        );
        Ok(config)
    }
}

/// Load `path` (when given) followed by `TRUST__*` environment overrides
///
/// # Errors
///
/// See [`ConfigLoader::load`].
pub fn load_config(path: Option<PathBuf>) -> Result<TrustServiceConfig> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = path {
        loader = loader.add_source(ConfigSource::file(path));
    }
    loader.add_source(ConfigSource::env()).load()
}
