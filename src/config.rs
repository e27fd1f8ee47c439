//! Configuration for the raster pipeline.

use crate::fetch::{HttpFetcher, DEFAULT_CAPACITY_BYTES};
use crate::srs::{BuiltinLookup, DefinitionLookup, HttpLookup, DEFAULT_LOOKUP_TEMPLATE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Main configuration for a [`RasterPipeline`](crate::RasterPipeline).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub srs: SrsConfig,

    #[serde(default)]
    pub render: RenderConfig,
}

/// Fetch cache and HTTP configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Byte budget of the response cache
    #[serde(default = "default_capacity_bytes")]
    pub capacity_bytes: usize,

    /// Retries used when a request does not specify its own budget
    #[serde(default)]
    pub default_retries: u32,

    /// Base against which relative request URLs are resolved
    #[serde(default)]
    pub base_url: Option<String>,

    /// Per-request timeout. No timeout when absent.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_capacity_bytes() -> usize {
    DEFAULT_CAPACITY_BYTES
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: default_capacity_bytes(),
            default_retries: 0,
            base_url: None,
            timeout_secs: None,
        }
    }
}

impl FetchConfig {
    pub fn build_fetcher(&self) -> Result<HttpFetcher, ConfigError> {
        let mut fetcher = HttpFetcher::new();
        if let Some(base) = &self.base_url {
            let base = Url::parse(base)
                .map_err(|e| ConfigError::Invalid(format!("fetch.base_url '{base}': {e}")))?;
            fetcher = fetcher.with_base_url(base);
        }
        if let Some(secs) = self.timeout_secs {
            fetcher = fetcher.with_timeout(Duration::from_secs(secs));
        }
        Ok(fetcher)
    }
}

/// Spatial reference definition source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SrsConfig {
    #[serde(default)]
    pub source: SrsSource,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SrsSource {
    /// Embedded EPSG database
    #[default]
    Builtin,
    /// Remote lookup; `{code}` in the template is replaced by the EPSG code
    Http {
        #[serde(default = "default_url_template")]
        url_template: String,
    },
}

fn default_url_template() -> String {
    DEFAULT_LOOKUP_TEMPLATE.to_string()
}

impl SrsConfig {
    pub fn build_lookup(&self) -> Arc<dyn DefinitionLookup> {
        match &self.source {
            SrsSource::Builtin => Arc::new(BuiltinLookup),
            SrsSource::Http { url_template } => Arc::new(HttpLookup::new(url_template.clone())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Color scale used when a request does not name one
    #[serde(default = "default_color_scale")]
    pub default_color_scale: String,
}

fn default_color_scale() -> String {
    "gray".to_string()
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            default_color_scale: default_color_scale(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.capacity_bytes == 0 {
            return Err(ConfigError::Invalid(
                "fetch.capacity_bytes must be greater than zero".to_string(),
            ));
        }

        if let Some(base) = &self.fetch.base_url {
            Url::parse(base)
                .map_err(|e| ConfigError::Invalid(format!("fetch.base_url '{base}': {e}")))?;
        }

        if let SrsSource::Http { url_template } = &self.srs.source {
            if !url_template.contains("{code}") {
                return Err(ConfigError::Invalid(format!(
                    "srs.url_template '{url_template}' has no {{code}} placeholder"
                )));
            }
        }

        if self.render.default_color_scale.is_empty() {
            return Err(ConfigError::Invalid(
                "render.default_color_scale must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
